// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Adds pods that joined a subcluster to the database.
//!
//! All new pods of a subcluster are added in one admin call. When any of them is not
//! ready yet the whole subcluster is retried later instead of adding a partial batch.

use super::{outcome_for_admin_error, Outcome, ReconcileActor, ReconcilePass};
use crate::admin_errors::AdminError;
use crate::crd::Subcluster;
use crate::dispatcher::{AddNodeOptions, Initiator};
use crate::events::{ADD_NODE_FAILED, ADD_NODE_LICENSE_FAIL, ADD_NODE_START, ADD_NODE_SUCCEEDED};
use anyhow::Result;
use async_trait::async_trait;
use kube::runtime::events::EventType;
use std::time::Instant;
use tracing::{info, warn};

pub struct AddNodeReconciler;

impl AddNodeReconciler {
    async fn add_to_subcluster(&self, pass: &mut ReconcilePass, subcluster: &Subcluster) -> Result<Outcome> {
        let (candidates, unknown) = {
            let in_subcluster = || {
                pass.facts
                    .all()
                    .iter()
                    .filter(|f| f.subcluster == subcluster.name && !f.is_pending_delete)
            };
            let unknown = in_subcluster().any(|f| f.db_exists.is_unknown());
            let candidates: Vec<_> = in_subcluster()
                .filter(|f| f.db_exists.is_false())
                .cloned()
                .collect();
            (candidates, unknown)
        };

        if unknown {
            info!(subcluster = %subcluster.name, "Database membership of some pods is unknown, requeueing");
            return Ok(Outcome::requeue());
        }
        if candidates.is_empty() {
            return Ok(Outcome::proceed());
        }
        if let Some(pod) = candidates
            .iter()
            .find(|f| !f.is_pod_running || !f.installed.is_true())
        {
            info!(
                subcluster = %subcluster.name,
                pod = %pod.name,
                "Pod to add is not running or not installed yet, requeueing"
            );
            return Ok(Outcome::requeue());
        }

        let pod_names: Vec<&str> = candidates.iter().map(|p| p.name.as_str()).collect();
        let Some(initiator) = pass
            .facts
            .find_pod_to_run_admin_cmd_excluding(&pod_names)
            .map(Initiator::from)
        else {
            info!(subcluster = %subcluster.name, "No pod available to run add node, requeueing");
            return Ok(Outcome::requeue());
        };

        pass.event(
            EventType::Normal,
            ADD_NODE_START,
            format!("Starting add database node for pods '{}'", pod_names.join(", ")),
        )
        .await;

        let opts = AddNodeOptions::new(initiator)
            .with_sandbox(pass.sandbox())
            .with_subcluster(&subcluster.name)
            .with_hosts(candidates.iter().map(|p| p.address()).collect());
        let start_time = Instant::now();
        match pass.env.dispatcher.add_node(opts).await {
            Ok(()) => {}
            Err(e @ AdminError::LicenseLimit { .. }) => {
                warn!(subcluster = %subcluster.name, error = %e, "License limit reached, not adding nodes");
                pass.event(
                    EventType::Warning,
                    ADD_NODE_LICENSE_FAIL,
                    format!("You cannot add more nodes to the database. You have reached the limit allowed by your license: {e}"),
                )
                .await;
                pass.facts.invalidate();
                return Ok(Outcome::proceed());
            }
            Err(e) => return outcome_for_admin_error(pass, ADD_NODE_FAILED, e).await,
        }

        pass.event(
            EventType::Normal,
            ADD_NODE_SUCCEEDED,
            format!(
                "Successfully added database nodes and it took {}s",
                start_time.elapsed().as_secs()
            ),
        )
        .await;
        pass.facts.invalidate();
        Ok(Outcome::proceed())
    }
}

#[async_trait]
impl ReconcileActor for AddNodeReconciler {
    fn name(&self) -> &'static str {
        "AddNode"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        pass.collect_facts().await?;
        if !pass.facts.does_db_exist() {
            return Ok(Outcome::proceed());
        }

        let subclusters: Vec<Subcluster> = pass
            .cluster
            .subclusters_in_scope(pass.sandbox())
            .into_iter()
            .filter(|sc| !pass.cluster.is_subcluster_shutdown(sc))
            .cloned()
            .collect();

        for subcluster in &subclusters {
            pass.collect_facts().await?;
            let outcome = self.add_to_subcluster(pass, subcluster).await?;
            if outcome.is_abort() {
                return Ok(outcome);
            }
        }
        Ok(Outcome::proceed())
    }
}

#[cfg(test)]
#[path = "add_node_tests.rs"]
mod add_node_tests;
