// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Restarts database processes that went down.
//!
//! Two paths, chosen from the facts:
//!
//! - **cluster restart** when no pod is up and writable: the whole database is
//!   started with `start_db` from an installed pod.
//! - **node restart** otherwise: the down nodes are restarted with `restart_node`
//!   through a pod that is up.
//!
//! Nodes that were just started are given time to report in. The wait is a share of
//! the liveness probe window so that a slow node is not restarted again before the
//! kubelet would have given up on it.
//!
//! The `RestartNeeded` condition is true while a restart is outstanding and is
//! cleared once a pass finds nothing left to do. A running pod whose state could not
//! be gathered counts as something left to do: the pass requeues instead.

use super::{outcome_for_admin_error, Outcome, ReconcileActor, ReconcilePass};
use crate::constants::{LIVENESS_WAIT_FRACTION, MAIN_CLUSTER, REQUEUE_WAIT_SECS};
use crate::crd::DatabaseCluster;
use crate::dispatcher::{
    FetchNodeStateOptions, Initiator, NodeHost, RestartNodeOptions, StartDbOptions,
};
use crate::events::{
    CLUSTER_RESTART_STARTED, CLUSTER_RESTART_SUCCEEDED, NODE_RESTART_STARTED,
    NODE_RESTART_SUCCEEDED, RESTART_FAILED,
};
use crate::podfacts::PodFact;
use crate::status_reasons::{
    CONDITION_AUTO_RESTART, CONDITION_RESTART_NEEDED, CONDITION_STOP_DB_NEEDED,
    REASON_CLUSTER_DOWN, REASON_COMPLETED, REASON_DISABLED, REASON_ENABLED, REASON_NODES_DOWN,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::runtime::events::EventType;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct RestartReconciler;

/// Delay before checking restarted nodes again.
///
/// `max(period * failure_threshold * 0.25, 10)` seconds, or a plain requeue when the
/// cluster has no liveness probe settings.
#[must_use]
pub fn liveness_wait(cluster: &DatabaseCluster) -> Outcome {
    let Some(probe) = cluster.spec.liveness_probe else {
        return Outcome::requeue();
    };
    let window = f64::from(probe.period_seconds) * f64::from(probe.failure_threshold);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let secs = ((window * LIVENESS_WAIT_FRACTION) as u64).max(REQUEUE_WAIT_SECS);
    Outcome::requeue_after(Duration::from_secs(secs))
}

fn restartable(pods: Vec<&PodFact>) -> Vec<PodFact> {
    pods.into_iter().filter(|f| !f.shutdown).cloned().collect()
}

fn addresses(pods: &[PodFact]) -> Vec<String> {
    pods.iter().map(PodFact::address).collect()
}

fn names(pods: &[PodFact]) -> String {
    pods.iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RestartReconciler {
    /// Whether the scope of the pass is meant to be down.
    fn scope_is_shut_down(pass: &ReconcilePass) -> bool {
        if pass.sandbox() == MAIN_CLUSTER {
            return pass.cluster.spec.shutdown
                || pass.cluster.is_condition_true(CONDITION_STOP_DB_NEEDED);
        }
        pass.cluster
            .sandbox_spec(pass.sandbox())
            .is_some_and(|sb| sb.shutdown)
    }

    async fn mark_needed(pass: &mut ReconcilePass, reason: &str, message: &str) -> Result<()> {
        pass.set_condition(
            CONDITION_RESTART_NEEDED,
            true,
            reason,
            message,
        )
        .await?;
        Ok(())
    }

    fn requeue_if_not_restartable(pass: &ReconcilePass) -> Outcome {
        let count = pass.facts.count_not_restartable_pods();
        if count > 0 {
            info!(name = %pass.name(), count, "Some installed pods are not running yet, requeueing");
            return Outcome::requeue();
        }
        Outcome::proceed()
    }

    async fn restart_cluster(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if pass.facts.all_pods_running_and_zero_installed() {
            debug!(name = %pass.name(), "No pod is installed yet, nothing to restart");
            return Ok(Outcome::proceed());
        }
        if pass.facts.count_running_and_installed(None) == 0 {
            info!(name = %pass.name(), "Waiting for installed pods to be running, requeueing");
            return Ok(Outcome::requeue());
        }
        if pass.cluster.spec.k_safety == 0 && pass.facts.count_not_restartable_pods() > 0 {
            info!(name = %pass.name(), "k-safety 0 needs every pod running before a cluster restart, requeueing");
            return Ok(Outcome::requeue());
        }
        let down = restartable(pass.facts.find_restartable_pods(true, true, true));

        let read_only: Vec<&PodFact> = down
            .iter()
            .filter(|f| f.up_node.is_true() && f.read_only.is_true())
            .collect();
        if !read_only.is_empty() {
            let namespace = pass.namespace();
            for pod in read_only {
                info!(pod = %pod.name, "Deleting read-only pod so that it rejoins the cluster");
                pass.env
                    .accessor
                    .delete_pod(&namespace, &pod.name)
                    .await
                    .with_context(|| format!("failed to delete pod {namespace}/{}", pod.name))?;
            }
            pass.facts.invalidate();
            return Ok(Outcome::requeue());
        }

        if down.iter().any(|f| f.startup_in_progress.is_true()) {
            info!(name = %pass.name(), "Nodes are still starting up, waiting");
            return Ok(liveness_wait(&pass.cluster));
        }
        if !pass.facts.does_db_exist() {
            debug!(name = %pass.name(), "No database exists yet, nothing to restart");
            return Ok(Outcome::proceed());
        }
        if down.is_empty() {
            return Ok(Outcome::proceed());
        }

        let Some(initiator) = pass
            .facts
            .find_pod_to_run_admin_cmd_offline()
            .map(Initiator::from)
        else {
            info!(name = %pass.name(), "No installed pod available to start the database, requeueing");
            return Ok(Outcome::requeue());
        };

        Self::mark_needed(pass, REASON_CLUSTER_DOWN, "No database node is up").await?;
        pass.event(
            EventType::Normal,
            CLUSTER_RESTART_STARTED,
            format!("Starting restart of the cluster with pods '{}'", names(&down)),
        )
        .await;

        let opts = StartDbOptions::new(initiator)
            .with_sandbox(pass.sandbox())
            .with_hosts(addresses(&down));
        let start_time = Instant::now();
        if let Err(e) = pass.env.dispatcher.start_db(opts).await {
            return outcome_for_admin_error(pass, RESTART_FAILED, e).await;
        }

        pass.event(
            EventType::Normal,
            CLUSTER_RESTART_SUCCEEDED,
            format!(
                "Successfully restarted the cluster and it took {}s",
                start_time.elapsed().as_secs()
            ),
        )
        .await;
        pass.facts.invalidate();
        Ok(Self::requeue_if_not_restartable(pass))
    }

    async fn restart_nodes(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let down = restartable(pass.facts.find_restartable_pods(false, false, false));
        if down.is_empty() {
            return Ok(Self::requeue_if_not_restartable(pass));
        }

        let Some(initiator) = pass
            .facts
            .find_pod_to_run_admin_cmd_any()
            .map(Initiator::from)
        else {
            info!(name = %pass.name(), "No pod available to run restart node, requeueing");
            return Ok(Outcome::requeue());
        };

        // The pod facts can lag behind the database; trust its view of which nodes are up
        let opts = FetchNodeStateOptions::new(initiator.clone()).with_sandbox(pass.sandbox());
        let states = match pass.env.dispatcher.fetch_node_state(opts).await {
            Ok(states) => states,
            Err(e) => return outcome_for_admin_error(pass, RESTART_FAILED, e).await,
        };
        let up: BTreeSet<&str> = states
            .iter()
            .filter(|s| s.is_up())
            .map(|s| s.name.as_str())
            .collect();

        let still_down: Vec<PodFact> = down
            .iter()
            .filter(|f| !up.contains(f.vnode_name.as_str()))
            .cloned()
            .collect();
        if still_down.is_empty() {
            return Ok(liveness_wait(&pass.cluster));
        }
        let pods: Vec<PodFact> = still_down
            .into_iter()
            .filter(|f| !f.startup_in_progress.is_true())
            .collect();
        if pods.is_empty() {
            info!(name = %pass.name(), "Down nodes are still starting up, waiting");
            return Ok(liveness_wait(&pass.cluster));
        }

        Self::mark_needed(pass, REASON_NODES_DOWN, &format!("Nodes down: {}", names(&pods))).await?;
        pass.event(
            EventType::Normal,
            NODE_RESTART_STARTED,
            format!("Starting restart of nodes for pods '{}'", names(&pods)),
        )
        .await;

        let hosts = pods
            .iter()
            .map(|f| NodeHost {
                vnode: f.vnode_name.clone(),
                address: f.address(),
            })
            .collect();
        let opts = RestartNodeOptions::new(initiator)
            .with_sandbox(pass.sandbox())
            .with_hosts(hosts);
        let start_time = Instant::now();
        if let Err(e) = pass.env.dispatcher.restart_node(opts).await {
            return outcome_for_admin_error(pass, RESTART_FAILED, e).await;
        }

        pass.event(
            EventType::Normal,
            NODE_RESTART_SUCCEEDED,
            format!(
                "Successfully restarted nodes and it took {}s",
                start_time.elapsed().as_secs()
            ),
        )
        .await;
        pass.facts.invalidate();

        if pods.len() < down.len() {
            return Ok(liveness_wait(&pass.cluster));
        }
        Ok(Self::requeue_if_not_restartable(pass))
    }
}

#[async_trait]
impl ReconcileActor for RestartReconciler {
    fn name(&self) -> &'static str {
        "Restart"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if !pass.cluster.spec.auto_restart {
            pass.set_condition(
                CONDITION_AUTO_RESTART,
                false,
                REASON_DISABLED,
                "Automatic restart is disabled",
            )
            .await?;
            return Ok(Outcome::proceed());
        }
        pass.set_condition(
            CONDITION_AUTO_RESTART,
            true,
            REASON_ENABLED,
            "Automatic restart is enabled",
        )
        .await?;

        if Self::scope_is_shut_down(pass) {
            debug!(name = %pass.name(), sandbox = %pass.sandbox(), "Scope is shut down, not restarting");
            return Ok(Outcome::proceed());
        }

        pass.collect_facts().await?;
        let unknown = pass
            .facts
            .any_up_node_unknown(None)
            .or_else(|| pass.facts.any_installed_unknown())
            .map(|f| f.name.clone());
        let outcome = if pass.facts.up_node_and_not_read_only_count() == 0 {
            if let Some(pod) = unknown {
                info!(name = %pass.name(), pod = %pod, "State of a pod is unknown, not deciding on a cluster restart");
                return Ok(Outcome::requeue());
            }
            self.restart_cluster(pass).await?
        } else {
            self.restart_nodes(pass).await?
        };
        if let (false, Some(pod)) = (outcome.is_abort(), unknown) {
            info!(name = %pass.name(), pod = %pod, "State of a pod is unknown, requeueing");
            return Ok(Outcome::requeue());
        }

        if !outcome.is_abort() && pass.cluster.is_condition_true(CONDITION_RESTART_NEEDED) {
            pass.set_condition(
                CONDITION_RESTART_NEEDED,
                false,
                REASON_COMPLETED,
                "No restart is outstanding",
            )
            .await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod restart_tests;
