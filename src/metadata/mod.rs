pub mod client;
pub mod error;

use crate::config::Protocol;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tracing::warn;

pub use client::MetadataClient;
pub use error::MetadataError;

#[cfg(test)]
mod tests;

/// Service states that contribute zero endpoints.
const INACTIVE_STATES: [&str; 4] = ["inactive", "deactivating", "removed", "removing"];

/// What a metadata service record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceKind {
    #[default]
    #[serde(rename = "service")]
    Service,
    #[serde(rename = "externalService")]
    ExternalService,
    #[serde(rename = "dnsService")]
    DnsService,
    #[serde(rename = "loadBalancerService")]
    LoadBalancerService,
    #[serde(other)]
    Other,
}

/// One port rule as declared on a load-balancer service. Selector rules are
/// expanded into concrete service rules before config building.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortRule {
    #[serde(default)]
    pub source_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub target_port: u16,
    #[serde(default)]
    pub backend_name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub environment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
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

impl From<&HealthCheck> for crate::config::HealthCheck {
    fn from(hc: &HealthCheck) -> Self {
        crate::config::HealthCheck {
            port: hc.port,
            request_line: hc.request_line.clone(),
            interval: hc.interval,
            response_timeout: hc.response_timeout,
            healthy_threshold: hc.healthy_threshold,
            unhealthy_threshold: hc.unhealthy_threshold,
        }
    }
}

/// The `lb_config` blob attached to a load-balancer service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LBMetadata {
    #[serde(default)]
    pub port_rules: Vec<PortRule>,
    #[serde(default)]
    pub certs: Vec<String>,
    #[serde(default)]
    pub default_cert: String,
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub stickiness_policy: Option<crate::config::StickinessPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub primary_ip: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub host_uuid: String,
    #[serde(default)]
    pub environment_uuid: String,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

impl Container {
    /// Running and starting containers serve traffic; stopping containers
    /// keep serving while draining.
    pub fn is_serving(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
            || self.state.eq_ignore_ascii_case("starting")
            || self.state.eq_ignore_ascii_case("stopping")
    }

    pub fn is_draining(&self) -> bool {
        self.state.eq_ignore_ascii_case("stopping")
    }
}

/// A service record as the metadata store reports it.
///
/// `links` uses a BTreeMap so alias resolution walks link targets in a
/// stable order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stack_name: String,
    #[serde(default)]
    pub environment_uuid: String,
    #[serde(default)]
    pub kind: ServiceKind,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub external_ips: Vec<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub links: BTreeMap<String, String>,
    #[serde(default)]
    pub lb_config: LBMetadata,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

impl Service {
    pub fn is_active(&self) -> bool {
        !INACTIVE_STATES
            .iter()
            .any(|s| self.state.eq_ignore_ascii_case(s))
    }

    /// `true` for the zero record some metadata answers use in place of
    /// "no such service".
    pub fn is_zero(&self) -> bool {
        self.name.is_empty() && self.stack_name.is_empty()
    }
}

/// A parsed service link.
///
/// The grammar is `stack/name` (local environment), `env/stack/name`
/// (peer environment, same region), or `region/env/stack/name`
/// (cross-region).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRef {
    Local { stack: String, name: String },
    Environment { env: String, stack: String, name: String },
    Region { region: String, env: String, stack: String, name: String },
}

impl LinkRef {
    pub fn parse(link: &str) -> Option<LinkRef> {
        let parts: Vec<&str> = link.split('/').collect();
        match parts.as_slice() {
            [stack, name] => Some(LinkRef::Local {
                stack: stack.to_string(),
                name: name.to_string(),
            }),
            [env, stack, name] => Some(LinkRef::Environment {
                env: env.to_string(),
                stack: stack.to_string(),
                name: name.to_string(),
            }),
            [region, env, stack, name] => Some(LinkRef::Region {
                region: region.to_string(),
                env: env.to_string(),
                stack: stack.to_string(),
                name: name.to_string(),
            }),
            _ => None,
        }
    }
}

/// Some metadata answers wrap the region name in double quotes; strip one
/// layer before any comparison.
pub fn trim_region_quotes(region: &str) -> &str {
    let region = region.strip_prefix('"').unwrap_or(region);
    region.strip_suffix('"').unwrap_or(region)
}

/// Read-only view of the metadata store. The controller depends only on
/// this trait; `MetadataClient` is the HTTP implementation and tests plug
/// in stubs.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn get_self_service(&self) -> Result<Service, MetadataError>;

    async fn get_self_host_uuid(&self) -> Result<String, MetadataError>;

    async fn get_region_name(&self) -> Result<String, MetadataError>;

    /// All services in the local environment.
    async fn get_services(&self) -> Result<Vec<Service>, MetadataError>;

    /// All services in a peer environment of the self region.
    async fn get_services_by_environment(&self, env: &str) -> Result<Vec<Service>, MetadataError>;

    /// All services in an environment of another region.
    async fn get_services_by_region_environment(
        &self,
        region: &str,
        env: &str,
    ) -> Result<Vec<Service>, MetadataError>;

    /// A service in the environment identified by `env_uuid`.
    async fn get_service_by_name(
        &self,
        env_uuid: &str,
        stack: &str,
        name: &str,
    ) -> Result<Option<Service>, MetadataError>;

    async fn get_service_by_environment(
        &self,
        env: &str,
        stack: &str,
        name: &str,
    ) -> Result<Option<Service>, MetadataError>;

    async fn get_service_by_region_environment(
        &self,
        region: &str,
        env: &str,
        stack: &str,
        name: &str,
    ) -> Result<Option<Service>, MetadataError>;

    /// A container by name within the environment identified by `env_uuid`.
    async fn get_container(
        &self,
        env_uuid: &str,
        name: &str,
    ) -> Result<Option<Container>, MetadataError>;

    /// Push the given key into `tx` every time the metadata version
    /// changes, polling at `interval_secs`. Returns when `tx` closes.
    async fn on_change(&self, interval_secs: u64, key: String, tx: mpsc::Sender<String>);

    /// Resolve a service link relative to the environment `env_uuid`.
    ///
    /// A four-part link whose region equals the self region collapses to a
    /// peer-environment lookup. Malformed links and zero records resolve to
    /// `None`; the caller decides whether that is an error.
    async fn resolve_link(
        &self,
        env_uuid: &str,
        link: &str,
    ) -> Result<Option<Service>, MetadataError> {
        let Some(parsed) = LinkRef::parse(link) else {
            warn!(link = %link, "Skipping malformed service link");
            return Ok(None);
        };

        let service = match parsed {
            LinkRef::Local { stack, name } => {
                self.get_service_by_name(env_uuid, &stack, &name).await?
            }
            LinkRef::Environment { env, stack, name } => {
                self.get_service_by_environment(&env, &stack, &name).await?
            }
            LinkRef::Region {
                region,
                env,
                stack,
                name,
            } => {
                let self_region = self.get_region_name().await?;
                if trim_region_quotes(&region) == trim_region_quotes(&self_region) {
                    self.get_service_by_environment(&env, &stack, &name).await?
                } else {
                    self.get_service_by_region_environment(&region, &env, &stack, &name)
                        .await?
                }
            }
        };

        Ok(service.filter(|s| !s.is_zero()))
    }
}
