// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Stops subclusters that are moving between the main cluster and a sandbox.
//!
//! A subcluster is moving when the sandbox it is assigned to in the spec differs from
//! the one it was last observed in. It is stopped by the scope it currently runs in,
//! so that the other side can start it cleanly.

use super::{outcome_for_admin_error, Outcome, ReconcileActor, ReconcilePass};
use crate::dispatcher::{Initiator, StopSubclusterOptions};
use crate::events::{STOP_SUBCLUSTER_FAILED, STOP_SUBCLUSTER_START, STOP_SUBCLUSTER_SUCCEEDED};
use anyhow::Result;
use async_trait::async_trait;
use kube::runtime::events::EventType;
use std::time::Instant;
use tracing::info;

pub struct StopSubclusterReconciler;

impl StopSubclusterReconciler {
    /// Subclusters observed in the pass's scope whose spec assignment points elsewhere.
    fn moving_subclusters(pass: &ReconcilePass) -> Vec<String> {
        let spec_map = pass.cluster.subcluster_sandbox_spec_map();
        pass.cluster
            .spec
            .subclusters
            .iter()
            .filter(|sc| pass.cluster.observed_sandbox_of(&sc.name) == pass.sandbox())
            .filter(|sc| spec_map.get(&sc.name).map_or("", String::as_str) != pass.sandbox())
            .map(|sc| sc.name.clone())
            .collect()
    }
}

#[async_trait]
impl ReconcileActor for StopSubclusterReconciler {
    fn name(&self) -> &'static str {
        "StopSubcluster"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let moving = Self::moving_subclusters(pass);
        if moving.is_empty() {
            return Ok(Outcome::proceed());
        }

        pass.collect_facts().await?;
        let ready: Vec<String> = moving
            .iter()
            .filter(|name| {
                let size = pass.cluster.find_subcluster(name).map_or(0, |sc| sc.size);
                usize::try_from(size).is_ok_and(|size| {
                    pass.facts.count_running_and_installed(Some(name.as_str())) == size
                })
            })
            .cloned()
            .collect();
        let requeue = ready.len() < moving.len();
        if requeue {
            info!(
                name = %pass.name(),
                sandbox = %pass.sandbox(),
                "Some moving subclusters still have pods that are not running and installed"
            );
        }

        for subcluster in &ready {
            let Some(initiator) = pass
                .facts
                .find_first_up_pod(true, Some(subcluster.as_str()))
                .map(Initiator::from)
            else {
                info!(subcluster = %subcluster, "No node of the subcluster is up, nothing to stop");
                continue;
            };

            pass.event(
                EventType::Normal,
                STOP_SUBCLUSTER_START,
                format!("Starting stop subcluster '{subcluster}'"),
            )
            .await;
            let opts = StopSubclusterOptions::new(initiator)
                .with_sandbox(pass.sandbox())
                .with_subcluster(subcluster)
                .with_force(true);
            let start_time = Instant::now();
            if let Err(e) = pass.env.dispatcher.stop_subcluster(opts).await {
                return outcome_for_admin_error(pass, STOP_SUBCLUSTER_FAILED, e).await;
            }
            pass.event(
                EventType::Normal,
                STOP_SUBCLUSTER_SUCCEEDED,
                format!(
                    "Successfully stopped subcluster '{subcluster}' and it took {}s",
                    start_time.elapsed().as_secs()
                ),
            )
            .await;
            pass.facts.invalidate();
        }

        Ok(if requeue { Outcome::requeue() } else { Outcome::proceed() })
    }
}

#[cfg(test)]
#[path = "stop_subcluster_tests.rs"]
mod stop_subcluster_tests;
