use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;


/// Protocols a port rule can carry. Hostname/path routing only applies to
/// the L7 members (`http`, `https`, `sni`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Http,
    Https,
    Sni,
    Tls,
}

impl Protocol {
    /// Whether hostname and path matching are meaningful for this protocol.
    pub fn is_l7(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https | Protocol::Sni)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Sni => "sni",
            Protocol::Tls => "tls",
        };
        f.write_str(s)
    }
}

/// How a backend's hostname is matched against the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleComparator {
    #[default]
    Eq,
    Beg,
    End,
}

impl RuleComparator {
    /// More specific matches sort first: exact, then prefix, then suffix.
    fn specificity(&self) -> u8 {
        match self {
            RuleComparator::Eq => 0,
            RuleComparator::Beg => 1,
            RuleComparator::End => 2,
        }
    }
}

/// A single L4 target behind a backend.
///
/// `name` is the hex sha1 of the IP for regular endpoints, or the literal
/// hostname for CNAME endpoints. `weight` is a string because the data
/// plane consumes it verbatim; `"0"` marks a draining endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub is_cname: bool,
    #[serde(default)]
    pub weight: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub request_line: String,
    #[serde(default)]
    pub interval: u32,
    #[serde(default)]
    pub response_timeout: u32,
    #[serde(default)]
    pub healthy_threshold: u32,
    #[serde(default)]
    pub unhealthy_threshold: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickinessPolicy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub indirect: bool,
    #[serde(default)]
    pub nocache: bool,
    #[serde(default)]
    pub postonly: bool,
    #[serde(default)]
    pub mode: String,
}

/// PEM material for one certificate, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub name: String,
    pub cert: String,
    pub key: String,
    #[serde(default)]
    pub fetched: bool,
}

/// A set of endpoints reachable behind one `(source port, hostname, path)`
/// routing decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendService {
    pub uuid: String,
    pub host: String,
    pub path: String,
    pub port: u16,
    pub protocol: Protocol,
    pub rule_comparator: RuleComparator,
    pub endpoints: Vec<Endpoint>,
    pub health_check: Option<HealthCheck>,
    pub priority: i32,
}

/// One listener on the balancer. `name` is the decimal source port; there
/// is at most one frontend per source port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendService {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub backend_services: Vec<BackendService>,
}

/// The canonical artifact handed to a provider. Frontends, backends, and
/// endpoints are sorted before emission so downstream diffing is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub name: String,
    pub frontend_services: Vec<FrontendService>,
    pub certs: Vec<Certificate>,
    pub default_cert: Option<Certificate>,
    pub stickiness_policy: Option<StickinessPolicy>,
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ip.cmp(&other.ip).then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for BackendService {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BackendService {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| {
                self.rule_comparator
                    .specificity()
                    .cmp(&other.rule_comparator.specificity())
            })
            .then_with(|| self.uuid.cmp(&other.uuid))
    }
}

impl PartialOrd for FrontendService {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontendService {
    fn cmp(&self, other: &Self) -> Ordering {
        self.port.cmp(&other.port)
    }
}

impl LoadBalancerConfig {
    /// Sort frontends, every frontend's backends, and every backend's
    /// endpoints into canonical order.
    pub fn sort(&mut self) {
        for frontend in &mut self.frontend_services {
            for backend in &mut frontend.backend_services {
                backend.endpoints.sort();
            }
            frontend.backend_services.sort();
        }
        self.frontend_services.sort();
    }
}
