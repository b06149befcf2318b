// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `http.rs`

#[cfg(test)]
mod tests {
    use super::super::{error_from_response, AdminCredentials, CertVerification, HttpDispatcher};
    use crate::admin_errors::AdminError;
    use crate::dispatcher::{
        AddNodeOptions, Dispatcher, FetchNodeStateOptions, Initiator, NodeHost, NodeState,
        RestartNodeOptions, RestorePoint, SandboxSubclusterOptions, ShowRestorePointsOptions,
        StopSubclusterOptions,
    };
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{basic_auth, body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn dispatcher_for(server: &MockServer) -> (HttpDispatcher, Initiator) {
        let port = server.address().port();
        let dispatcher = HttpDispatcher::new(
            "http",
            port,
            "analytics",
            AdminCredentials {
                username: "dbadmin".to_string(),
                password: "s3cret".to_string(),
            },
            Duration::from_secs(5),
            &CertVerification::default(),
        )
        .unwrap();
        (dispatcher, Initiator::new("db-sc1-0", "127.0.0.1"))
    }

    #[tokio::test]
    async fn test_add_node_posts_hosts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/nodes"))
            .and(basic_auth("dbadmin", "s3cret"))
            .and(body_json(json!({
                "dbName": "analytics",
                "subcluster": "sc1",
                "sandbox": "",
                "hosts": ["10.0.0.4", "10.0.0.5"],
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let opts = AddNodeOptions::new(initiator)
            .with_subcluster("sc1")
            .with_hosts(vec!["10.0.0.4".to_string(), "10.0.0.5".to_string()]);

        dispatcher.add_node(opts).await.unwrap();
    }

    #[tokio::test]
    async fn test_license_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "detail": "Cannot create another node. The current license permits 3 node(s) and the database catalog already contains 3 node(s)"
            })))
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let err = dispatcher
            .add_node(
                AddNodeOptions::new(initiator)
                    .with_subcluster("sc1")
                    .with_hosts(vec!["10.0.0.4".to_string()]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::LicenseLimit { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_restart_node_sends_names_and_addresses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/nodes/restart"))
            .and(body_json(json!({
                "dbName": "analytics",
                "sandbox": "",
                "nodes": [{ "name": "v_analytics_node0001", "address": "10.0.0.1" }],
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let opts = RestartNodeOptions::new(initiator).with_hosts(vec![NodeHost {
            vnode: "v_analytics_node0001".to_string(),
            address: "10.0.0.1".to_string(),
        }]);

        dispatcher.restart_node(opts).await.unwrap();
    }

    #[tokio::test]
    async fn test_nodes_not_down_text_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/nodes/restart"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string("All nodes in the input are not down, can't restart"),
            )
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let err = dispatcher
            .restart_node(RestartNodeOptions::new(initiator).with_hosts(vec![NodeHost {
                vnode: "v_analytics_node0001".to_string(),
                address: "10.0.0.1".to_string(),
            }]))
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::NodesNotDown { .. }));
    }

    #[tokio::test]
    async fn test_fetch_node_state_parses_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "v_analytics_node0001", "address": "10.0.0.1", "state": "UP" },
                { "name": "v_analytics_node0002", "address": "10.0.0.2", "state": "DOWN" },
            ])))
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let states = dispatcher
            .fetch_node_state(FetchNodeStateOptions::new(initiator))
            .await
            .unwrap();

        assert_eq!(states.len(), 2);
        assert!(states[0].is_up());
        assert_eq!(
            states[1],
            NodeState {
                name: "v_analytics_node0002".to_string(),
                address: "10.0.0.2".to_string(),
                state: "DOWN".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unexpected_body_is_command_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let err = dispatcher
            .fetch_node_state(FetchNodeStateOptions::new(initiator))
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_stop_subcluster_path_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/subclusters/sc2/stop"))
            .and(body_json(json!({ "sandbox": "sb1", "drainSeconds": 30, "force": true })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let opts = StopSubclusterOptions::new(initiator)
            .with_sandbox("sb1")
            .with_subcluster("sc2")
            .with_drain_seconds(30)
            .with_force(true);

        dispatcher.stop_subcluster(opts).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_options_never_reach_the_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let err = dispatcher
            .add_node(AddNodeOptions::new(initiator).with_subcluster("sc1"))
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::InvalidOptions { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_failure() {
        let dispatcher = HttpDispatcher::new(
            "http",
            1,
            "analytics",
            AdminCredentials::default(),
            Duration::from_secs(2),
            &CertVerification::default(),
        )
        .unwrap();

        let err = dispatcher
            .fetch_node_state(FetchNodeStateOptions::new(Initiator::new("db-sc1-0", "127.0.0.1")))
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::Transport { .. }));
    }

    #[test]
    fn test_gateway_errors_are_transport_failures() {
        let err = error_from_response(StatusCode::SERVICE_UNAVAILABLE, "try again later");
        assert!(matches!(err, AdminError::Transport { .. }));

        let err = error_from_response(StatusCode::INTERNAL_SERVER_ERROR, "{\"detail\":\"boom\"}");
        assert_eq!(
            err,
            AdminError::CommandFailed {
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = AdminCredentials {
            username: "dbadmin".to_string(),
            password: "s3cret".to_string(),
        };
        let printed = format!("{creds:?}");
        assert!(printed.contains("dbadmin"));
        assert!(!printed.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_sandbox_subcluster_posts_sandbox_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/subclusters/sc2/sandbox"))
            .and(body_json(json!({ "dbName": "analytics", "sandbox": "sb1" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        dispatcher
            .sandbox_subcluster(
                SandboxSubclusterOptions::new(initiator)
                    .with_sandbox("sb1")
                    .with_subcluster("sc2"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_restore_point_archive_is_query_encoded() {
        let server = MockServer::start().await;
        let points = vec![RestorePoint {
            archive: "nightly backup&x=1".to_string(),
            id: "rp-1".to_string(),
            index: 1,
            timestamp: "2025-01-01 00:00:00".to_string(),
        }];
        Mock::given(method("GET"))
            .and(path("/v1/archives/restore-points"))
            .and(query_param("archive", "nightly backup&x=1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&points))
            .expect(1)
            .mount(&server)
            .await;
        let (dispatcher, initiator) = dispatcher_for(&server).await;

        let found = dispatcher
            .show_restore_points(
                ShowRestorePointsOptions::new(initiator).with_archive("nightly backup&x=1"),
            )
            .await
            .unwrap();

        assert_eq!(found, points);
    }

    #[test]
    fn test_cert_verification_follows_tls_mode() {
        assert_eq!(CertVerification::for_mode(None), CertVerification::AcceptAny);
        assert_eq!(
            CertVerification::for_mode(Some("try_verify")),
            CertVerification::AcceptAny
        );
        assert_eq!(
            CertVerification::for_mode(Some("enable")),
            CertVerification::AcceptAny
        );
        assert_eq!(
            CertVerification::for_mode(Some("VERIFY_CA")),
            CertVerification::Ca { ca_pem: None }
        );
        assert_eq!(
            CertVerification::for_mode(Some("verify_full")),
            CertVerification::Full { ca_pem: None }
        );
        assert!(
            CertVerification::for_mode(Some("something_new")).verifies(),
            "Unknown modes must not skip verification"
        );
    }

    #[test]
    fn test_ca_is_ignored_when_nothing_is_verified() {
        let pem = Some("-----BEGIN CERTIFICATE-----".to_string());
        assert_eq!(
            CertVerification::AcceptAny.with_ca(pem.clone()),
            CertVerification::AcceptAny
        );
        assert_eq!(
            CertVerification::for_mode(Some("verify_ca")).with_ca(pem.clone()),
            CertVerification::Ca { ca_pem: pem }
        );
    }

    #[test]
    fn test_verifying_client_builds_without_ca() {
        let built = HttpDispatcher::new(
            "https",
            8443,
            "analytics",
            AdminCredentials::default(),
            Duration::from_secs(5),
            &CertVerification::Full { ca_pem: None },
        );
        assert!(built.is_ok());
    }
}
