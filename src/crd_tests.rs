// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{DEFAULT_ADMIN_PORT, DEFAULT_KSAFETY, MAIN_CLUSTER};
    use crate::crd::*;

    fn sc(name: &str, r#type: SubclusterType, size: i32) -> Subcluster {
        Subcluster {
            name: name.into(),
            r#type,
            size,
            ..Default::default()
        }
    }

    fn sandbox(name: &str, subclusters: &[&str], shutdown: bool) -> SandboxSpec {
        SandboxSpec {
            name: name.into(),
            subclusters: subclusters
                .iter()
                .map(|s| SubclusterRef { name: (*s).into() })
                .collect(),
            shutdown,
        }
    }

    /// sc1 primary, sc2 and sc3 secondaries. sb1 holds sc2 in spec and status.
    fn cluster() -> DatabaseCluster {
        let mut c = DatabaseCluster::new(
            "db",
            DatabaseClusterSpec {
                db_name: "analytics".into(),
                subclusters: vec![
                    sc("sc1", SubclusterType::Primary, 3),
                    sc("sc2", SubclusterType::Secondary, 1),
                    sc("sc3", SubclusterType::Secondary, 2),
                ],
                sandboxes: vec![sandbox("sb1", &["sc2"], false)],
                ..Default::default()
            },
        );
        c.status = Some(DatabaseClusterStatus {
            sandboxes: vec![SandboxStatus {
                name: "sb1".into(),
                subclusters: vec!["sc2".into()],
                shutdown: false,
            }],
            ..Default::default()
        });
        c
    }

    #[test]
    fn test_object_names() {
        let c = cluster();
        assert_eq!(c.statefulset_name("sc1"), "db-sc1");
        assert_eq!(c.sandbox_configmap_name("sb1"), "db-sb1");
    }

    #[test]
    fn test_find_subcluster() {
        let c = cluster();
        assert_eq!(c.find_subcluster("sc3").map(|s| s.size), Some(2));
        assert!(c.find_subcluster("nope").is_none());
    }

    #[test]
    fn test_subcluster_type_quorum() {
        assert!(SubclusterType::Primary.is_primary());
        assert!(SubclusterType::SandboxPrimary.is_primary());
        assert!(!SubclusterType::Secondary.is_primary());
        assert!(!SubclusterType::Transient.is_primary());
    }

    #[test]
    fn test_sandbox_maps() {
        let c = cluster();
        assert_eq!(
            c.subcluster_sandbox_spec_map().get("sc2").map(String::as_str),
            Some("sb1")
        );
        assert_eq!(
            c.subcluster_sandbox_status_map().get("sc2").map(String::as_str),
            Some("sb1")
        );
        assert!(!c.subcluster_sandbox_spec_map().contains_key("sc1"));
    }

    #[test]
    fn test_observed_sandbox_of() {
        let c = cluster();
        assert_eq!(c.observed_sandbox_of("sc2"), "sb1");
        assert_eq!(c.observed_sandbox_of("sc1"), MAIN_CLUSTER);
    }

    #[test]
    fn test_subclusters_in_scope_follow_status() {
        let mut c = cluster();
        // sc3 is being moved into sb1 but has not been observed there yet
        c.spec.sandboxes = vec![sandbox("sb1", &["sc2", "sc3"], false)];

        let main: Vec<&str> = c
            .subclusters_in_scope(MAIN_CLUSTER)
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        let sb1: Vec<&str> = c
            .subclusters_in_scope("sb1")
            .iter()
            .map(|s| s.name.as_str())
            .collect();

        assert_eq!(main, vec!["sc1", "sc3"]);
        assert_eq!(sb1, vec!["sc2"]);
        assert!(c.subclusters_in_scope("other").is_empty());
    }

    #[test]
    fn test_is_subcluster_shutdown() {
        let mut c = cluster();
        let sc2 = c.spec.subclusters[1].clone();
        assert!(!c.is_subcluster_shutdown(&sc2));

        c.spec.sandboxes[0].shutdown = true;
        assert!(c.is_subcluster_shutdown(&sc2), "Sandbox shutdown covers its subclusters");

        let mut sc1 = c.spec.subclusters[0].clone();
        assert!(!c.is_subcluster_shutdown(&sc1));
        sc1.shutdown = true;
        assert!(c.is_subcluster_shutdown(&sc1));
    }

    #[test]
    fn test_conditions() {
        let mut c = cluster();
        assert!(c.find_condition("RestartNeeded").is_none());
        assert!(!c.is_condition_true("RestartNeeded"));

        if let Some(status) = c.status.as_mut() {
            status.conditions.push(Condition {
                r#type: "RestartNeeded".into(),
                status: "True".into(),
                reason: Some("NodesDown".into()),
                message: None,
                last_transition_time: None,
            });
            status.conditions.push(Condition {
                r#type: "StopDbNeeded".into(),
                status: "False".into(),
                ..Default::default()
            });
        }

        assert!(c.is_condition_true("RestartNeeded"));
        assert!(!c.is_condition_true("StopDbNeeded"));
        assert_eq!(
            c.find_condition("RestartNeeded").and_then(|x| x.reason.as_deref()),
            Some("NodesDown")
        );
    }

    #[test]
    fn test_admin_port_default() {
        let mut c = cluster();
        assert_eq!(c.admin_port(), DEFAULT_ADMIN_PORT);
        c.spec.admin_port = Some(5554);
        assert_eq!(c.admin_port(), 5554);
    }

    #[test]
    fn test_tls_config_status() {
        let mut c = cluster();
        assert!(c.tls_config_status("https").is_none());
        if let Some(status) = c.status.as_mut() {
            status.tls_configs.push(TlsConfigStatus {
                name: "https".into(),
                secret: "cert-v1".into(),
                mode: "try_verify".into(),
            });
        }
        assert_eq!(
            c.tls_config_status("https").map(|t| t.secret.as_str()),
            Some("cert-v1")
        );
    }

    #[test]
    fn test_spec_deserialize_defaults() {
        let spec: DatabaseClusterSpec = serde_json::from_value(serde_json::json!({
            "dbName": "analytics",
            "subclusters": [{"name": "sc1", "size": 3}],
            "httpsTls": {"secret": "cert-v2"}
        }))
        .unwrap();

        assert_eq!(spec.k_safety, DEFAULT_KSAFETY);
        assert!(spec.auto_restart);
        assert!(!spec.shutdown);
        assert!(spec.sandboxes.is_empty());
        assert_eq!(spec.subclusters[0].r#type, SubclusterType::Primary);
        assert!(!spec.subclusters[0].shutdown);

        let tls = spec.https_tls.unwrap();
        assert_eq!(tls.mode, "try_verify");
        assert!(tls.auto_rollback);
    }

    #[test]
    fn test_subcluster_type_wire_names() {
        let t: SubclusterType = serde_json::from_value(serde_json::json!("sandboxprimary")).unwrap();
        assert_eq!(t, SubclusterType::SandboxPrimary);
        assert_eq!(
            serde_json::to_value(SubclusterType::Secondary).unwrap(),
            serde_json::json!("secondary")
        );
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = SubclusterStatus {
            name: "sc1".into(),
            install_count: 3,
            added_to_db_count: 3,
            up_node_count: 2,
            shutdown: false,
            detail: vec![],
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["addedToDbCount"], 3);
        assert_eq!(value["upNodeCount"], 2);
    }
}
