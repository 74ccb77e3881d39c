use super::{LoadBalancerController, LocalityPref};
use crate::config::Endpoint;
use crate::metadata::{Container, Service, ServiceKind};
use crate::Result;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use tracing::warn;

/// Alias chains deeper than this are cut off; combined with the visited
/// set it keeps a mis-linked dnsService from looping forever.
const MAX_ALIAS_DEPTH: usize = 8;

/// Stable endpoint name for an IP.
pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}

/// The endpoint for one container, or `None` when its state keeps it out
/// of rotation. The bool marks a contingency endpoint: one on a foreign
/// host while a locality preference is in force.
pub(crate) fn container_endpoint(
    container: &Container,
    target_port: u16,
    self_host_uuid: &str,
    local_pref: LocalityPref,
) -> Option<(Endpoint, bool)> {
    if !container.is_serving() {
        return None;
    }

    let mut endpoint = Endpoint {
        name: hash_ip(&container.primary_ip),
        ip: container.primary_ip.clone(),
        port: target_port,
        ..Default::default()
    };
    if container.is_draining() {
        endpoint.weight = "0".to_string();
    }

    let contingency = local_pref != LocalityPref::Any
        && !container.host_uuid.eq_ignore_ascii_case(self_host_uuid);
    Some((endpoint, contingency))
}

impl LoadBalancerController {
    /// Resolve a service reference to its ordered endpoint list.
    pub(crate) async fn get_service_endpoints(
        &self,
        svc: &Service,
        target_port: u16,
        self_host_uuid: &str,
        local_pref: LocalityPref,
    ) -> Result<Vec<Endpoint>> {
        let mut visited = HashSet::new();
        let mut endpoints = self
            .collect_service_endpoints(svc, target_port, self_host_uuid, local_pref, 0, &mut visited)
            .await?;
        endpoints.sort();
        Ok(endpoints)
    }

    async fn collect_service_endpoints(
        &self,
        svc: &Service,
        target_port: u16,
        self_host_uuid: &str,
        local_pref: LocalityPref,
        depth: usize,
        visited: &mut HashSet<String>,
    ) -> Result<Vec<Endpoint>> {
        match svc.kind {
            ServiceKind::ExternalService => Ok(external_service_endpoints(svc, target_port)),
            ServiceKind::DnsService => {
                self.alias_service_endpoints(
                    svc,
                    target_port,
                    self_host_uuid,
                    local_pref,
                    depth,
                    visited,
                )
                .await
            }
            _ => Ok(regular_service_endpoints(
                svc,
                target_port,
                self_host_uuid,
                local_pref,
            )),
        }
    }

    /// Follow every link of an alias service and concatenate the results.
    /// Missing targets are skipped; cycles and over-deep chains are cut.
    async fn alias_service_endpoints(
        &self,
        svc: &Service,
        target_port: u16,
        self_host_uuid: &str,
        local_pref: LocalityPref,
        depth: usize,
        visited: &mut HashSet<String>,
    ) -> Result<Vec<Endpoint>> {
        let mut endpoints = Vec::new();
        for link in svc.links.keys() {
            if depth >= MAX_ALIAS_DEPTH {
                warn!(service = %svc.name, link = %link, "Alias chain too deep, cutting off");
                continue;
            }
            if !visited.insert(link.clone()) {
                warn!(service = %svc.name, link = %link, "Alias cycle detected, skipping link");
                continue;
            }

            let Some(target) = self
                .meta_fetcher
                .resolve_link(&svc.environment_uuid, link)
                .await?
            else {
                continue;
            };
            if !target.is_active() {
                continue;
            }

            let nested = Box::pin(self.collect_service_endpoints(
                &target,
                target_port,
                self_host_uuid,
                local_pref,
                depth + 1,
                visited,
            ))
            .await?;
            endpoints.extend(nested);
        }
        Ok(endpoints)
    }
}

fn external_service_endpoints(svc: &Service, target_port: u16) -> Vec<Endpoint> {
    let mut endpoints: Vec<Endpoint> = svc
        .external_ips
        .iter()
        .map(|ip| Endpoint {
            name: hash_ip(ip),
            ip: ip.clone(),
            port: target_port,
            ..Default::default()
        })
        .collect();

    if !svc.hostname.is_empty() {
        endpoints.push(Endpoint {
            name: svc.hostname.clone(),
            ip: svc.hostname.clone(),
            port: target_port,
            is_cname: true,
            ..Default::default()
        });
    }

    endpoints
}

fn regular_service_endpoints(
    svc: &Service,
    target_port: u16,
    self_host_uuid: &str,
    local_pref: LocalityPref,
) -> Vec<Endpoint> {
    let mut endpoints = Vec::new();
    let mut contingency = Vec::new();
    for container in &svc.containers {
        let Some((endpoint, is_contingency)) =
            container_endpoint(container, target_port, self_host_uuid, local_pref)
        else {
            continue;
        };
        if is_contingency {
            contingency.push(endpoint);
        } else {
            endpoints.push(endpoint);
        }
    }

    if local_pref == LocalityPref::PreferLocal && endpoints.is_empty() {
        return contingency;
    }
    endpoints
}
