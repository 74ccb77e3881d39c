use super::LoadBalancerController;
use crate::metadata::{trim_region_quotes, LBMetadata, PortRule, Service};
use crate::Result;
use std::collections::HashMap;
use tracing::debug;

/// Where a candidate service was found, which decides the link form the
/// expanded rule carries.
enum CandidateScope<'a> {
    Local,
    Environment(&'a str),
    Region(&'a str, &'a str),
}

impl CandidateScope<'_> {
    fn link_for(&self, svc: &Service) -> String {
        match self {
            CandidateScope::Local => format!("{}/{}", svc.stack_name, svc.name),
            CandidateScope::Environment(env) => {
                format!("{}/{}/{}", env, svc.stack_name, svc.name)
            }
            CandidateScope::Region(region, env) => format!(
                "{}/{}/{}/{}",
                trim_region_quotes(region),
                env,
                svc.stack_name,
                svc.name
            ),
        }
    }
}

/// `true` when every term of the comma-separated selector matches the
/// label map. A bare `key` term requires presence with any value;
/// `key=value` requires equality. Matching is case-sensitive.
pub fn is_selector_match(selector: &str, labels: &HashMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

impl LoadBalancerController {
    /// Replace selector rules with concrete per-service rules.
    ///
    /// Candidates come from the local environment, then the named peer
    /// environment of the self region, then the named environment of
    /// another region, in that order; within each source, services keep
    /// fetcher order. Empty matches are not an error.
    pub(crate) async fn process_selector(&self, lb_meta: &mut LBMetadata) -> Result<()> {
        let local_services = self.meta_fetcher.get_services().await?;
        let mut self_region: Option<String> = None;

        let mut rules: Vec<PortRule> = Vec::new();
        for lb_rule in &lb_meta.port_rules {
            if lb_rule.selector.is_empty() {
                rules.push(lb_rule.clone());
                continue;
            }

            let rule_region_is_self = if lb_rule.region.is_empty() {
                true
            } else {
                if self_region.is_none() {
                    self_region = Some(self.meta_fetcher.get_region_name().await?);
                }
                let self_region = self_region.as_deref().unwrap_or_default();
                trim_region_quotes(&lb_rule.region) == trim_region_quotes(self_region)
            };

            for svc in &local_services {
                self.expand_candidate(&mut rules, lb_rule, svc, &CandidateScope::Local);
            }

            if !lb_rule.environment.is_empty() && rule_region_is_self {
                let peer_services = self
                    .meta_fetcher
                    .get_services_by_environment(&lb_rule.environment)
                    .await?;
                for svc in &peer_services {
                    self.expand_candidate(
                        &mut rules,
                        lb_rule,
                        svc,
                        &CandidateScope::Environment(&lb_rule.environment),
                    );
                }
            }

            if !lb_rule.environment.is_empty() && !lb_rule.region.is_empty() && !rule_region_is_self
            {
                let remote_services = self
                    .meta_fetcher
                    .get_services_by_region_environment(&lb_rule.region, &lb_rule.environment)
                    .await?;
                for svc in &remote_services {
                    self.expand_candidate(
                        &mut rules,
                        lb_rule,
                        svc,
                        &CandidateScope::Region(&lb_rule.region, &lb_rule.environment),
                    );
                }
            }
        }

        lb_meta.port_rules = rules;
        Ok(())
    }

    /// Emit the expanded rules for one candidate service, if it matches.
    fn expand_candidate(
        &self,
        rules: &mut Vec<PortRule>,
        lb_rule: &PortRule,
        svc: &Service,
        scope: &CandidateScope<'_>,
    ) {
        if svc.is_zero() || !is_selector_match(&lb_rule.selector, &svc.labels) {
            return;
        }

        let nested = &svc.lb_config.port_rules;
        if nested.is_empty() && lb_rule.target_port == 0 {
            // Without a nested rule or a target port there is no way to
            // know where to send traffic.
            debug!(
                service = %svc.name,
                selector = %lb_rule.selector,
                "Skipping selector match without target port"
            );
            return;
        }

        let link = scope.link_for(svc);
        if !nested.is_empty() {
            for nested_rule in nested {
                rules.push(PortRule {
                    source_port: lb_rule.source_port,
                    protocol: lb_rule.protocol,
                    hostname: nested_rule.hostname.clone(),
                    path: nested_rule.path.clone(),
                    service: link.clone(),
                    target_port: nested_rule.target_port,
                    backend_name: nested_rule.backend_name.clone(),
                    weight: lb_rule.weight,
                    region: lb_rule.region.clone(),
                    environment: lb_rule.environment.clone(),
                    ..Default::default()
                });
            }
        } else {
            rules.push(PortRule {
                source_port: lb_rule.source_port,
                protocol: lb_rule.protocol,
                hostname: lb_rule.hostname.clone(),
                path: lb_rule.path.clone(),
                service: link,
                target_port: lb_rule.target_port,
                backend_name: lb_rule.backend_name.clone(),
                weight: lb_rule.weight,
                region: lb_rule.region.clone(),
                environment: lb_rule.environment.clone(),
                ..Default::default()
            });
        }
    }
}
