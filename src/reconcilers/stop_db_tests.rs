// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `stop_db.rs`

#[cfg(test)]
mod tests {
    use super::super::StopDbReconciler;
    use crate::admin_errors::AdminError;
    use crate::crd::DatabaseCluster;
    use crate::dispatcher::StopDbOptions;
    use crate::events::{CLUSTER_SHUTDOWN_FAILED, CLUSTER_SHUTDOWN_STARTED, CLUSTER_SHUTDOWN_SUCCEEDED};
    use crate::reconcilers::test_support::{
        cluster, down_fact, fact, subcluster, unknown_fact, Harness,
    };
    use crate::reconcilers::{Outcome, ReconcileActor};
    use crate::status_reasons::{CONDITION_STOP_DB_NEEDED, REASON_ALREADY_STOPPED};

    fn shutdown_cluster() -> DatabaseCluster {
        let mut c = cluster(vec![subcluster("sc1", 3)]);
        c.spec.shutdown = true;
        c
    }

    fn stop_condition(harness: &Harness) -> Option<(String, Option<String>)> {
        harness.accessor.cluster().and_then(|c| {
            c.find_condition(CONDITION_STOP_DB_NEEDED)
                .map(|c| (c.status.clone(), c.reason.clone()))
        })
    }

    #[tokio::test]
    async fn test_stops_database_and_clears_condition() {
        let harness = Harness::new();
        let facts = (0..3).map(|i| fact("sc1", i)).collect();
        let mut pass = harness.pass(shutdown_cluster(), facts);

        let outcome = StopDbReconciler.reconcile(&mut pass).await.unwrap();

        assert_eq!(outcome, Outcome::proceed());
        assert_eq!(harness.dispatcher.count(StopDbOptions::OPERATION), 1);
        assert_eq!(
            stop_condition(&harness).map(|(s, _)| s).as_deref(),
            Some("False"),
            "The condition is cleared once the database stopped"
        );
        assert!(harness.recorder.has(CLUSTER_SHUTDOWN_STARTED));
        assert!(harness.recorder.has(CLUSTER_SHUTDOWN_SUCCEEDED));
        assert!(pass.facts.needs_collection());
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_condition_and_requeues() {
        let harness = Harness::new();
        harness.dispatcher.fail_next(
            StopDbOptions::OPERATION,
            AdminError::Transport {
                message: "timed out".to_string(),
            },
        );
        let facts = (0..3).map(|i| fact("sc1", i)).collect();
        let mut pass = harness.pass(shutdown_cluster(), facts);

        let outcome = StopDbReconciler.reconcile(&mut pass).await.unwrap();

        assert_eq!(outcome, Outcome::requeue());
        assert_eq!(
            stop_condition(&harness).map(|(s, _)| s).as_deref(),
            Some("True")
        );
        assert!(!harness.recorder.has(CLUSTER_SHUTDOWN_SUCCEEDED));
    }

    #[tokio::test]
    async fn test_unrecognized_failure_is_an_error_and_keeps_condition() {
        let harness = Harness::new();
        harness.dispatcher.fail_next(
            StopDbOptions::OPERATION,
            AdminError::CommandFailed {
                message: "unexpected output".to_string(),
            },
        );
        let facts = (0..3).map(|i| fact("sc1", i)).collect();
        let mut pass = harness.pass(shutdown_cluster(), facts);

        assert!(StopDbReconciler.reconcile(&mut pass).await.is_err());
        assert!(harness.recorder.has(CLUSTER_SHUTDOWN_FAILED));
        assert_eq!(
            stop_condition(&harness).map(|(s, _)| s).as_deref(),
            Some("True")
        );
    }

    #[tokio::test]
    async fn test_no_up_node_means_already_stopped() {
        let harness = Harness::new();
        let facts = (0..3).map(|i| down_fact("sc1", i)).collect();
        let mut pass = harness.pass(shutdown_cluster(), facts);

        let outcome = StopDbReconciler.reconcile(&mut pass).await.unwrap();

        assert_eq!(outcome, Outcome::proceed());
        assert!(harness.dispatcher.calls().is_empty());
        assert_eq!(stop_condition(&harness), None, "Nothing to stop, nothing to record");
    }

    #[tokio::test]
    async fn test_pending_condition_without_up_node_is_cleared() {
        let harness = Harness::new();
        let mut c = shutdown_cluster();
        if let Some(status) = c.status.as_mut() {
            status.conditions.push(crate::reconcilers::status::create_condition(
                CONDITION_STOP_DB_NEEDED,
                "True",
                "ShutdownRequested",
                "requested",
            ));
        }
        let facts = (0..3).map(|i| down_fact("sc1", i)).collect();
        let mut pass = harness.pass(c, facts);

        StopDbReconciler.reconcile(&mut pass).await.unwrap();

        assert!(harness.dispatcher.calls().is_empty());
        assert_eq!(
            stop_condition(&harness),
            Some(("False".to_string(), Some(REASON_ALREADY_STOPPED.to_string())))
        );
    }

    #[tokio::test]
    async fn test_pending_condition_with_unknown_pods_requeues() {
        let harness = Harness::new();
        let mut c = shutdown_cluster();
        if let Some(status) = c.status.as_mut() {
            status.conditions.push(crate::reconcilers::status::create_condition(
                CONDITION_STOP_DB_NEEDED,
                "True",
                "ShutdownRequested",
                "requested",
            ));
        }
        let facts = (0..3).map(|i| unknown_fact("sc1", i)).collect();
        let mut pass = harness.pass(c, facts);

        let outcome = StopDbReconciler.reconcile(&mut pass).await.unwrap();

        assert_eq!(outcome, Outcome::requeue());
        assert!(harness.dispatcher.calls().is_empty());
        assert!(
            pass.cluster.is_condition_true(CONDITION_STOP_DB_NEEDED),
            "A pod that may be up keeps the stop pending"
        );
    }

    #[tokio::test]
    async fn test_shutdown_request_with_unknown_pods_requeues() {
        let harness = Harness::new();
        let facts = vec![down_fact("sc1", 0), unknown_fact("sc1", 1), down_fact("sc1", 2)];
        let mut pass = harness.pass(shutdown_cluster(), facts);

        let outcome = StopDbReconciler.reconcile(&mut pass).await.unwrap();

        assert_eq!(outcome, Outcome::requeue());
        assert!(harness.dispatcher.calls().is_empty());
        assert_eq!(stop_condition(&harness), None);
    }

    #[tokio::test]
    async fn test_running_cluster_without_shutdown_is_left_alone() {
        let harness = Harness::new();
        let facts = (0..3).map(|i| fact("sc1", i)).collect();
        let mut pass = harness.pass(cluster(vec![subcluster("sc1", 3)]), facts);

        let first = StopDbReconciler.reconcile(&mut pass).await.unwrap();
        let second = StopDbReconciler.reconcile(&mut pass).await.unwrap();

        assert_eq!(first, Outcome::proceed());
        assert_eq!(first, second);
        assert!(harness.dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_pass_is_ignored() {
        let harness = Harness::new();
        let facts = (0..3).map(|i| fact("sc1", i)).collect();
        let mut pass = harness.sandbox_pass(shutdown_cluster(), facts, "sb1");

        let outcome = StopDbReconciler.reconcile(&mut pass).await.unwrap();

        assert_eq!(outcome, Outcome::proceed());
        assert!(harness.dispatcher.calls().is_empty());
    }
}
