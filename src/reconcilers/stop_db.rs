// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Stops the main cluster when `spec.shutdown` is set.
//!
//! The work is driven by the `StopDbNeeded` condition. The condition is raised when a
//! shutdown is requested while nodes are up, and only cleared after `stop_db`
//! succeeded or no node is left up. A failed stop keeps the condition so the next
//! pass tries again. While a running pod's state is unknown, nothing is decided.

use super::{outcome_for_admin_error, Outcome, ReconcileActor, ReconcilePass};
use crate::constants::MAIN_CLUSTER;
use crate::dispatcher::{Initiator, StopDbOptions};
use crate::events::{CLUSTER_SHUTDOWN_FAILED, CLUSTER_SHUTDOWN_STARTED, CLUSTER_SHUTDOWN_SUCCEEDED};
use crate::status_reasons::{
    CONDITION_STOP_DB_NEEDED, REASON_ALREADY_STOPPED, REASON_COMPLETED, REASON_SHUTDOWN_REQUESTED,
};
use anyhow::Result;
use async_trait::async_trait;
use kube::runtime::events::EventType;
use std::time::Instant;
use tracing::info;

pub struct StopDbReconciler;

#[async_trait]
impl ReconcileActor for StopDbReconciler {
    fn name(&self) -> &'static str {
        "StopDb"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if pass.sandbox() != MAIN_CLUSTER {
            return Ok(Outcome::proceed());
        }

        if pass.cluster.spec.shutdown && !pass.cluster.is_condition_true(CONDITION_STOP_DB_NEEDED) {
            pass.collect_facts().await?;
            if pass.facts.up_node_count() == 0 {
                if let Some(pod) = pass.facts.any_up_node_unknown(None) {
                    info!(name = %pass.name(), pod = %pod.name, "Up state of a pod is unknown, requeueing");
                    return Ok(Outcome::requeue());
                }
            } else {
                pass.set_condition(
                    CONDITION_STOP_DB_NEEDED,
                    true,
                    REASON_SHUTDOWN_REQUESTED,
                    "Shutdown of the database was requested",
                )
                .await?;
            }
        }
        if !pass.cluster.is_condition_true(CONDITION_STOP_DB_NEEDED) {
            return Ok(Outcome::proceed());
        }

        pass.collect_facts().await?;
        let Some(initiator) = pass
            .facts
            .find_first_up_pod(true, None)
            .map(Initiator::from)
        else {
            if let Some(pod) = pass.facts.any_up_node_unknown(None) {
                info!(name = %pass.name(), pod = %pod.name, "Up state of a pod is unknown, requeueing");
                return Ok(Outcome::requeue());
            }
            info!(name = %pass.name(), "No node is up, the database is already stopped");
            pass.set_condition(
                CONDITION_STOP_DB_NEEDED,
                false,
                REASON_ALREADY_STOPPED,
                "No database node is up",
            )
            .await?;
            return Ok(Outcome::proceed());
        };

        pass.event(
            EventType::Normal,
            CLUSTER_SHUTDOWN_STARTED,
            "Starting stop database".to_string(),
        )
        .await;
        let start_time = Instant::now();
        if let Err(e) = pass.env.dispatcher.stop_db(StopDbOptions::new(initiator)).await {
            return outcome_for_admin_error(pass, CLUSTER_SHUTDOWN_FAILED, e).await;
        }
        pass.event(
            EventType::Normal,
            CLUSTER_SHUTDOWN_SUCCEEDED,
            format!(
                "Successfully stopped the database and it took {}s",
                start_time.elapsed().as_secs()
            ),
        )
        .await;

        pass.facts.invalidate();
        pass.set_condition(
            CONDITION_STOP_DB_NEEDED,
            false,
            REASON_COMPLETED,
            "Database stopped",
        )
        .await?;
        Ok(Outcome::proceed())
    }
}

#[cfg(test)]
#[path = "stop_db_tests.rs"]
mod stop_db_tests;
