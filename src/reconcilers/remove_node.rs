// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Removes database nodes of pods that are being scaled away.
//!
//! Pods of the scale-down range that are in the database and running are removed in
//! one admin call per subcluster. A pod that is in the database but not running is
//! left for a later pass; the others in the range still proceed and the pass is
//! requeued.

use super::scaledown::{scale_down_subclusters, select_pods, PodVerdict, ScaledownActor};
use super::{outcome_for_admin_error, Outcome, ReconcileActor, ReconcilePass};
use crate::crd::Subcluster;
use crate::dispatcher::{Initiator, RemoveNodeOptions};
use crate::events::{REMOVE_NODES_FAILED, REMOVE_NODES_START, REMOVE_NODES_SUCCEEDED};
use crate::podfacts::{PodFact, TriState};
use anyhow::Result;
use async_trait::async_trait;
use kube::runtime::events::EventType;
use std::time::Instant;
use tracing::info;

pub struct RemoveNodeReconciler;

fn remove_verdict(fact: &PodFact) -> PodVerdict {
    match fact.db_exists {
        TriState::False => PodVerdict::Skip,
        TriState::True if fact.is_pod_running => PodVerdict::Act,
        TriState::True | TriState::Unknown => PodVerdict::Wait,
    }
}

#[async_trait]
impl ScaledownActor for RemoveNodeReconciler {
    fn name(&self) -> &'static str {
        "RemoveNode"
    }

    async fn scale_down_range(
        &self,
        pass: &mut ReconcilePass,
        subcluster: &Subcluster,
        start: i32,
        end: i32,
    ) -> Result<Outcome> {
        let (pods, wait) = select_pods(&pass.facts, &subcluster.name, start, end, remove_verdict);
        let pod_names: Vec<String> = pods.iter().map(|p| p.name.clone()).collect();
        let hosts: Vec<String> = pods.iter().map(|p| p.address()).collect();
        let wait_outcome = if wait { Outcome::requeue() } else { Outcome::proceed() };
        if pods.is_empty() {
            return Ok(wait_outcome);
        }

        let excluded: Vec<&str> = pod_names.iter().map(String::as_str).collect();
        let Some(initiator) = pass
            .facts
            .find_pod_to_run_admin_cmd_excluding(&excluded)
            .map(Initiator::from)
        else {
            info!(subcluster = %subcluster.name, "No pod available to run remove node, requeueing");
            return Ok(Outcome::requeue());
        };

        pass.event(
            EventType::Normal,
            REMOVE_NODES_START,
            format!("Starting database remove node for pods '{}'", pod_names.join(", ")),
        )
        .await;

        let opts = RemoveNodeOptions::new(initiator)
            .with_sandbox(pass.sandbox())
            .with_hosts(hosts);
        let start_time = Instant::now();
        if let Err(e) = pass.env.dispatcher.remove_node(opts).await {
            return outcome_for_admin_error(pass, REMOVE_NODES_FAILED, e).await;
        }

        pass.event(
            EventType::Normal,
            REMOVE_NODES_SUCCEEDED,
            format!(
                "Successfully removed nodes from database and it took {}s",
                start_time.elapsed().as_secs()
            ),
        )
        .await;
        pass.facts.invalidate();
        Ok(wait_outcome)
    }
}

#[async_trait]
impl ReconcileActor for RemoveNodeReconciler {
    fn name(&self) -> &'static str {
        ScaledownActor::name(self)
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if !pass.facts.needs_collection()
            && pass
                .facts
                .has_cluster_changed_since_collection(&pass.cluster)
                .await?
        {
            info!(name = %pass.name(), "Cluster changed since pod facts were collected, requeueing");
            return Ok(Outcome::requeue());
        }
        scale_down_subclusters(self, pass).await
    }
}

#[cfg(test)]
#[path = "remove_node_tests.rs"]
mod remove_node_tests;
