use super::{ControllerError, LoadBalancerController, LocalityPref};
use crate::config::{
    BackendService, Certificate, FrontendService, HealthCheck, LoadBalancerConfig, Protocol,
    RuleComparator,
};
use crate::metadata::LBMetadata;
use crate::{Result, CERT_DIR_LABEL, DEFAULT_CERT_DIR_LABEL};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Identity of a backend within the whole config: source port plus the
/// normalized hostname/path pair.
type BackendKey = (u16, String, String);

/// Replace every non-alphanumeric character with an underscore; used to
/// derive a stable backend id from its identity triple.
fn sanitize_uuid(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Hostname/path normalization for one rule: non-L7 protocols carry
/// neither, and a leading/trailing `*` on the hostname selects the
/// comparator. Hostnames of one or two characters are never treated as
/// wildcards.
fn normalize_rule_match(
    protocol: Protocol,
    hostname: &str,
    path: &str,
) -> (String, String, RuleComparator) {
    if !protocol.is_l7() {
        return (String::new(), String::new(), RuleComparator::Eq);
    }

    let mut hostname = hostname.to_string();
    let mut comparator = RuleComparator::Eq;
    if hostname.len() > 2 {
        if let Some(stripped) = hostname.strip_prefix('*') {
            hostname = stripped.to_string();
            comparator = RuleComparator::End;
        } else if let Some(stripped) = hostname.strip_suffix('*') {
            hostname = stripped.to_string();
            comparator = RuleComparator::Beg;
        }
    }

    (hostname, path.to_string(), comparator)
}

struct PendingBackend {
    backend: BackendService,
    endpoint_ips: HashSet<String>,
}

impl LoadBalancerController {
    /// Assemble the canonical config for the expanded rule set.
    ///
    /// Returns a single-element list; the list shape is kept so a future
    /// deployment can emit more than one balancer config per pass.
    pub async fn build_config_from_metadata(
        &self,
        lb_name: &str,
        env_uuid: &str,
        self_host_uuid: &str,
        local_pref: LocalityPref,
        lb_meta: &LBMetadata,
        lb_labels: &HashMap<String, String>,
    ) -> Result<Vec<LoadBalancerConfig>> {
        let (default_cert, certs) = self.assemble_certs(lb_meta, lb_labels).await?;

        // Keyed by source port so frontend assembly is ordered without a
        // separate sort over hash-map iteration.
        let mut frontend_protocols: BTreeMap<u16, Protocol> = BTreeMap::new();
        let mut backends: BTreeMap<BackendKey, PendingBackend> = BTreeMap::new();

        for rule in &lb_meta.port_rules {
            if rule.source_port < 1 {
                continue;
            }

            let (endpoints, health_check) = if !rule.service.is_empty() {
                let Some(service) = self
                    .meta_fetcher
                    .resolve_link(env_uuid, &rule.service)
                    .await?
                else {
                    continue;
                };
                if !service.is_active() {
                    debug!(service = %rule.service, "Dropping rule for inactive service");
                    continue;
                }
                let endpoints = self
                    .get_service_endpoints(&service, rule.target_port, self_host_uuid, local_pref)
                    .await?;
                let health_check: Option<HealthCheck> =
                    service.health_check.as_ref().map(Into::into);
                (endpoints, health_check)
            } else if !rule.container.is_empty() {
                let Some(container) = self
                    .meta_fetcher
                    .get_container(env_uuid, &rule.container)
                    .await?
                else {
                    continue;
                };
                let Some((endpoint, _)) = super::endpoints::container_endpoint(
                    &container,
                    rule.target_port,
                    self_host_uuid,
                    local_pref,
                ) else {
                    continue;
                };
                let health_check: Option<HealthCheck> =
                    container.health_check.as_ref().map(Into::into);
                (vec![endpoint], health_check)
            } else {
                continue;
            };

            match frontend_protocols.get(&rule.source_port) {
                Some(existing) if *existing != rule.protocol => {
                    return Err(ControllerError::protocol_conflict(
                        rule.source_port,
                        *existing,
                        rule.protocol,
                    )
                    .into());
                }
                Some(_) => {}
                None => {
                    frontend_protocols.insert(rule.source_port, rule.protocol);
                }
            }

            let (hostname, path, comparator) =
                normalize_rule_match(rule.protocol, &rule.hostname, &rule.path);
            let key: BackendKey = (rule.source_port, hostname.clone(), path.clone());

            if let Some(pending) = backends.get_mut(&key) {
                // Same routing decision from another rule: union in the
                // endpoints this rule resolved, unique by IP.
                for mut endpoint in endpoints {
                    if pending.endpoint_ips.insert(endpoint.ip.clone()) {
                        if endpoint.weight.is_empty() && rule.weight != 0 {
                            endpoint.weight = rule.weight.to_string();
                        }
                        pending.backend.endpoints.push(endpoint);
                    }
                }
            } else {
                let uuid = if rule.backend_name.is_empty() {
                    sanitize_uuid(&format!("{}_{}_{}", rule.source_port, hostname, path))
                } else {
                    rule.backend_name.clone()
                };

                let mut endpoint_ips = HashSet::new();
                let mut unique_endpoints = Vec::new();
                for mut endpoint in endpoints {
                    if endpoint_ips.insert(endpoint.ip.clone()) {
                        if endpoint.weight.is_empty() && rule.weight != 0 {
                            endpoint.weight = rule.weight.to_string();
                        }
                        unique_endpoints.push(endpoint);
                    }
                }

                backends.insert(
                    key,
                    PendingBackend {
                        backend: BackendService {
                            uuid,
                            host: hostname,
                            path,
                            port: rule.target_port,
                            protocol: rule.protocol,
                            rule_comparator: comparator,
                            endpoints: unique_endpoints,
                            health_check,
                            priority: rule.priority,
                        },
                        endpoint_ips,
                    },
                );
            }
        }

        let mut frontends = Vec::with_capacity(frontend_protocols.len());
        for (port, protocol) in frontend_protocols {
            let backend_services: Vec<BackendService> = backends
                .iter()
                .filter(|((backend_port, _, _), _)| *backend_port == port)
                .map(|(_, pending)| pending.backend.clone())
                .collect();
            frontends.push(FrontendService {
                name: port.to_string(),
                port,
                protocol,
                backend_services,
            });
        }

        let mut config = LoadBalancerConfig {
            name: lb_name.to_string(),
            frontend_services: frontends,
            certs,
            default_cert,
            stickiness_policy: lb_meta.stickiness_policy.clone(),
        };
        config.sort();

        self.provider
            .process_custom_config(&mut config, &lb_meta.config)
            .await?;

        Ok(vec![config])
    }

    /// Certificate material for this pass: from the bulk-mount directories
    /// when the self-service labels name them, otherwise by name from the
    /// fetcher's cache. The default certificate is also part of the flat
    /// list.
    async fn assemble_certs(
        &self,
        lb_meta: &LBMetadata,
        lb_labels: &HashMap<String, String>,
    ) -> Result<(Option<Certificate>, Vec<Certificate>)> {
        let cert_dir = lb_labels.get(CERT_DIR_LABEL);
        let default_cert_dir = lb_labels.get(DEFAULT_CERT_DIR_LABEL);

        let mut certs = Vec::new();
        let mut default_cert = None;

        if cert_dir.is_some() || default_cert_dir.is_some() {
            if let Some(dir) = default_cert_dir {
                debug!(dir = %dir, "Reading default certificate directory");
                default_cert = self
                    .cert_fetcher
                    .read_default_certificate(Path::new(dir))
                    .await?;
                if let Some(cert) = &default_cert {
                    certs.push(cert.clone());
                }
            }
            if let Some(dir) = cert_dir {
                debug!(dir = %dir, "Reading certificate directory");
                certs.extend(
                    self.cert_fetcher
                        .read_all_certificates_from_dir(Path::new(dir))
                        .await?,
                );
            }
        } else {
            default_cert = self
                .cert_fetcher
                .fetch_certificate(&lb_meta.default_cert)
                .await?;
            if let Some(cert) = &default_cert {
                certs.push(cert.clone());
            }
            for cert_name in &lb_meta.certs {
                if let Some(cert) = self.cert_fetcher.fetch_certificate(cert_name).await? {
                    certs.push(cert);
                }
            }
        }

        Ok((default_cert, certs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_uuid_replaces_every_non_alphanumeric() {
        assert_eq!(sanitize_uuid("45__"), "45__");
        assert_eq!(sanitize_uuid("80_foo.example_/"), "80_foo_example__");
        assert_eq!(sanitize_uuid("abc123"), "abc123");
    }

    #[test]
    fn test_normalize_clears_match_for_l4() {
        let (host, path, cmp) = normalize_rule_match(Protocol::Tcp, "foo.example", "/x");
        assert_eq!(host, "");
        assert_eq!(path, "");
        assert_eq!(cmp, RuleComparator::Eq);
    }

    #[test]
    fn test_normalize_wildcards() {
        let (host, _, cmp) = normalize_rule_match(Protocol::Http, "*foo.example", "");
        assert_eq!(host, "foo.example");
        assert_eq!(cmp, RuleComparator::End);

        let (host, _, cmp) = normalize_rule_match(Protocol::Http, "foo.example*", "");
        assert_eq!(host, "foo.example");
        assert_eq!(cmp, RuleComparator::Beg);

        let (host, _, cmp) = normalize_rule_match(Protocol::Http, "foo.example", "");
        assert_eq!(host, "foo.example");
        assert_eq!(cmp, RuleComparator::Eq);
    }

    #[test]
    fn test_normalize_keeps_short_hostnames() {
        let (host, _, cmp) = normalize_rule_match(Protocol::Http, "*a", "");
        assert_eq!(host, "*a");
        assert_eq!(cmp, RuleComparator::Eq);
    }
}
