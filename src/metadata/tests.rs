#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_link_parse_local() {
        let link = LinkRef::parse("stackA/web").unwrap();
        assert_eq!(
            link,
            LinkRef::Local {
                stack: "stackA".to_string(),
                name: "web".to_string(),
            }
        );
    }

    #[test]
    fn test_link_parse_environment() {
        let link = LinkRef::parse("prod/stackA/web").unwrap();
        assert_eq!(
            link,
            LinkRef::Environment {
                env: "prod".to_string(),
                stack: "stackA".to_string(),
                name: "web".to_string(),
            }
        );
    }

    #[test]
    fn test_link_parse_region() {
        let link = LinkRef::parse("region2/prod/stackA/web").unwrap();
        assert_eq!(
            link,
            LinkRef::Region {
                region: "region2".to_string(),
                env: "prod".to_string(),
                stack: "stackA".to_string(),
                name: "web".to_string(),
            }
        );
    }

    #[test]
    fn test_link_parse_rejects_other_shapes() {
        assert!(LinkRef::parse("web").is_none());
        assert!(LinkRef::parse("a/b/c/d/e").is_none());
    }

    #[test]
    fn test_trim_region_quotes() {
        assert_eq!(trim_region_quotes("\"region1\""), "region1");
        assert_eq!(trim_region_quotes("region1"), "region1");
        assert_eq!(trim_region_quotes("\"region1"), "region1");
        assert_eq!(trim_region_quotes(""), "");
    }

    #[test]
    fn test_inactive_states_are_not_active() {
        for state in ["inactive", "deactivating", "removed", "removing", "Removed"] {
            let svc = Service {
                name: "web".to_string(),
                state: state.to_string(),
                ..Default::default()
            };
            assert!(!svc.is_active(), "state {state} should be inactive");
        }

        let svc = Service {
            name: "web".to_string(),
            state: "active".to_string(),
            ..Default::default()
        };
        assert!(svc.is_active());
    }

    #[test]
    fn test_container_serving_states() {
        for state in ["running", "starting", "stopping"] {
            let c = Container {
                state: state.to_string(),
                ..Default::default()
            };
            assert!(c.is_serving(), "state {state} should serve");
        }

        let c = Container {
            state: "stopped".to_string(),
            ..Default::default()
        };
        assert!(!c.is_serving());

        let c = Container {
            state: "stopping".to_string(),
            ..Default::default()
        };
        assert!(c.is_draining());
    }

    #[test]
    fn test_lb_metadata_deserialization() {
        let raw = r#"{
            "port_rules": [
                {"source_port": 80, "protocol": "http", "hostname": "foo.example",
                 "path": "/api", "service": "stackA/web", "target_port": 8080}
            ],
            "certs": ["wild.example"],
            "default_cert": "default.example",
            "config": "timeout client 60s"
        }"#;

        let meta: LBMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.port_rules.len(), 1);
        assert_eq!(meta.port_rules[0].source_port, 80);
        assert_eq!(meta.port_rules[0].protocol, crate::config::Protocol::Http);
        assert_eq!(meta.port_rules[0].service, "stackA/web");
        assert_eq!(meta.certs, vec!["wild.example".to_string()]);
        assert_eq!(meta.default_cert, "default.example");
        assert_eq!(meta.config, "timeout client 60s");
        assert!(meta.stickiness_policy.is_none());
    }

    #[test]
    fn test_service_kind_deserialization() {
        let svc: Service =
            serde_json::from_str(r#"{"name": "ext", "kind": "externalService"}"#).unwrap();
        assert_eq!(svc.kind, ServiceKind::ExternalService);

        let svc: Service = serde_json::from_str(r#"{"name": "x", "kind": "somethingNew"}"#).unwrap();
        assert_eq!(svc.kind, ServiceKind::Other);
    }

    #[test]
    fn test_zero_service_detection() {
        assert!(Service::default().is_zero());
        let svc = Service {
            name: "web".to_string(),
            stack_name: "stackA".to_string(),
            ..Default::default()
        };
        assert!(!svc.is_zero());
    }

    #[test]
    fn test_health_check_field_copy() {
        let hc = HealthCheck {
            port: 9090,
            request_line: "GET /ping HTTP/1.0".to_string(),
            interval: 2000,
            response_timeout: 2000,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        };

        let converted: crate::config::HealthCheck = (&hc).into();
        assert_eq!(converted.port, 9090);
        assert_eq!(converted.request_line, "GET /ping HTTP/1.0");
        assert_eq!(converted.interval, 2000);
        assert_eq!(converted.response_timeout, 2000);
        assert_eq!(converted.healthy_threshold, 2);
        assert_eq!(converted.unhealthy_threshold, 3);
    }
}
