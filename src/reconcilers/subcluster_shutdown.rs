// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Stops subclusters that are marked for shutdown.
//!
//! A subcluster is shut down by its own `shutdown` flag or by the flag of the sandbox
//! it belongs to. In a sandbox whose shutdown is requested the whole sandbox is
//! stopped at once; otherwise each subcluster is stopped on its own, after checking
//! that the primaries left up still form a quorum.
//!
//! Once every node of a sandbox is known to be down, the sandbox status records the
//! shutdown. A running pod whose up state is unknown is never taken as down.

use super::{outcome_for_admin_error, Outcome, ReconcileActor, ReconcilePass};
use crate::constants::MAIN_CLUSTER;
use crate::crd::Subcluster;
use crate::dispatcher::{Initiator, StopDbOptions, StopSubclusterOptions};
use crate::events::{
    CLUSTER_SHUTDOWN_FAILED, CLUSTER_SHUTDOWN_STARTED, CLUSTER_SHUTDOWN_SUCCEEDED,
    CLUSTER_WILL_LOSE_QUORUM, STOP_SUBCLUSTER_FAILED, STOP_SUBCLUSTER_START,
    STOP_SUBCLUSTER_SUCCEEDED,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use kube::runtime::events::EventType;
use std::time::Instant;
use tracing::{debug, info};

pub struct SubclusterShutdownReconciler;

impl SubclusterShutdownReconciler {
    async fn stop_sandbox(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let Some(initiator) = pass
            .facts
            .find_first_up_pod(true, None)
            .map(Initiator::from)
        else {
            if let Some(pod) = pass.facts.any_up_node_unknown(None) {
                info!(sandbox = %pass.sandbox(), pod = %pod.name, "Up state of a pod is unknown, requeueing");
                return Ok(Outcome::requeue());
            }
            return Ok(Outcome::proceed());
        };

        pass.event(
            EventType::Normal,
            CLUSTER_SHUTDOWN_STARTED,
            format!("Starting stop of sandbox '{}'", pass.sandbox()),
        )
        .await;
        let opts = StopDbOptions::new(initiator).with_sandbox(pass.sandbox());
        let start_time = Instant::now();
        if let Err(e) = pass.env.dispatcher.stop_db(opts).await {
            return outcome_for_admin_error(pass, CLUSTER_SHUTDOWN_FAILED, e).await;
        }
        pass.event(
            EventType::Normal,
            CLUSTER_SHUTDOWN_SUCCEEDED,
            format!(
                "Successfully stopped sandbox '{}' and it took {}s",
                pass.sandbox(),
                start_time.elapsed().as_secs()
            ),
        )
        .await;
        pass.facts.invalidate();
        Ok(Outcome::proceed())
    }

    async fn stop_subclusters(
        &self,
        pass: &mut ReconcilePass,
        targets: &[Subcluster],
    ) -> Result<Outcome> {
        let mut to_stop = Vec::new();
        let mut primaries_going_down = 0;
        let mut unobserved = false;
        for subcluster in targets {
            let Some(initiator) = pass
                .facts
                .find_first_up_pod(false, Some(subcluster.name.as_str()))
                .map(Initiator::from)
            else {
                if let Some(pod) = pass.facts.any_up_node_unknown(Some(&subcluster.name)) {
                    info!(subcluster = %subcluster.name, pod = %pod.name, "Up state of a pod is unknown");
                    unobserved = true;
                } else {
                    debug!(subcluster = %subcluster.name, "No node of the subcluster is up");
                }
                continue;
            };
            if subcluster.r#type.is_primary() {
                primaries_going_down += pass.facts.subcluster_up_node_count(&subcluster.name);
                if !pass.facts.does_db_have_quorum(primaries_going_down) {
                    let message = format!(
                        "Shutting down subcluster '{}' would make the database lose quorum",
                        subcluster.name
                    );
                    pass.event(EventType::Warning, CLUSTER_WILL_LOSE_QUORUM, message.clone())
                        .await;
                    bail!(message);
                }
            }
            to_stop.push((subcluster, initiator));
        }

        for (subcluster, initiator) in to_stop {
            pass.event(
                EventType::Normal,
                STOP_SUBCLUSTER_START,
                format!("Starting stop subcluster '{}'", subcluster.name),
            )
            .await;
            let opts = StopSubclusterOptions::new(initiator)
                .with_sandbox(pass.sandbox())
                .with_subcluster(&subcluster.name)
                .with_drain_seconds(subcluster.drain_seconds.unwrap_or(0).max(0));
            let start_time = Instant::now();
            if let Err(e) = pass.env.dispatcher.stop_subcluster(opts).await {
                return outcome_for_admin_error(pass, STOP_SUBCLUSTER_FAILED, e).await;
            }
            pass.event(
                EventType::Normal,
                STOP_SUBCLUSTER_SUCCEEDED,
                format!(
                    "Successfully stopped subcluster '{}' and it took {}s",
                    subcluster.name,
                    start_time.elapsed().as_secs()
                ),
            )
            .await;
            pass.facts.invalidate();
        }
        if unobserved {
            return Ok(Outcome::requeue());
        }
        Ok(Outcome::proceed())
    }

    /// Copy the sandbox's requested shutdown into its status once it holds.
    async fn record_sandbox_shutdown(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let sandbox = pass.sandbox().to_string();
        if sandbox == MAIN_CLUSTER {
            return Ok(Outcome::proceed());
        }
        let Some(wanted) = pass.cluster.sandbox_spec(&sandbox).map(|sb| sb.shutdown) else {
            return Ok(Outcome::proceed());
        };
        if pass
            .cluster
            .sandbox_status(&sandbox)
            .is_none_or(|sb| sb.shutdown == wanted)
        {
            return Ok(Outcome::proceed());
        }
        if wanted {
            pass.collect_facts().await?;
            if pass.facts.up_node_count() > 0 {
                return Ok(Outcome::proceed());
            }
            if let Some(pod) = pass.facts.any_up_node_unknown(None) {
                info!(sandbox = %sandbox, pod = %pod.name, "Up state of a pod is unknown, not recording shutdown");
                return Ok(Outcome::requeue());
            }
        }

        pass.update_status(|status| {
            if let Some(sb) = status.sandboxes.iter_mut().find(|sb| sb.name == sandbox) {
                sb.shutdown = wanted;
            }
        })
        .await?;
        info!(sandbox = %sandbox, shutdown = wanted, "Recorded sandbox shutdown state");
        Ok(Outcome::proceed())
    }
}

#[async_trait]
impl ReconcileActor for SubclusterShutdownReconciler {
    fn name(&self) -> &'static str {
        "SubclusterShutdown"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let main = pass.sandbox() == MAIN_CLUSTER;
        if main && pass.cluster.spec.shutdown {
            return Ok(Outcome::proceed());
        }
        let whole_sandbox = !main
            && pass
                .cluster
                .sandbox_spec(pass.sandbox())
                .is_some_and(|sb| sb.shutdown);

        let targets: Vec<Subcluster> = pass
            .cluster
            .subclusters_in_scope(pass.sandbox())
            .into_iter()
            .filter(|sc| pass.cluster.is_subcluster_shutdown(sc))
            .cloned()
            .collect();

        if !targets.is_empty() {
            pass.collect_facts().await?;
            let outcome = if whole_sandbox {
                self.stop_sandbox(pass).await?
            } else {
                self.stop_subclusters(pass, &targets).await?
            };
            if outcome.is_abort() {
                return Ok(outcome);
            }
        }
        self.record_sandbox_shutdown(pass).await
    }
}

#[cfg(test)]
#[path = "subcluster_shutdown_tests.rs"]
mod subcluster_shutdown_tests;
