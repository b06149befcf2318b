// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Records pod facts in the cluster status.
//!
//! Runs between the other actors so that every later decision, and the next pass,
//! sees current per-subcluster counts. Nothing is written when the status already
//! matches the facts.

use super::{Outcome, ReconcileActor, ReconcilePass};
use crate::crd::{DatabaseCluster, PodStatusDetail, SubclusterStatus};
use crate::podfacts::{PodFact, PodFacts, TriState};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

pub struct StatusSyncReconciler;

/// A known fact, or what was recorded before when the fact is unknown.
fn known_or(value: TriState, previous: Option<bool>) -> bool {
    match value {
        TriState::True => true,
        TriState::False => false,
        TriState::Unknown => previous.unwrap_or(false),
    }
}

fn pod_detail(fact: &PodFact, previous: Option<&PodStatusDetail>) -> PodStatusDetail {
    PodStatusDetail {
        pod_name: fact.name.clone(),
        installed: known_or(fact.installed, previous.map(|p| p.installed)),
        added_to_db: known_or(fact.db_exists, previous.map(|p| p.added_to_db)),
        up_node: known_or(fact.up_node, previous.map(|p| p.up_node)),
        read_only: known_or(fact.read_only, previous.map(|p| p.read_only)),
    }
}

/// Subcluster status entries derived from the facts of the pass's scope.
#[must_use]
pub fn subcluster_statuses(cluster: &DatabaseCluster, facts: &PodFacts) -> Vec<SubclusterStatus> {
    let previous = cluster.status.as_ref().map(|s| s.subclusters.as_slice()).unwrap_or_default();

    cluster
        .subclusters_in_scope(facts.sandbox())
        .into_iter()
        .map(|sc| {
            let before = previous.iter().find(|s| s.name == sc.name);
            let detail: Vec<PodStatusDetail> = facts
                .all()
                .iter()
                .filter(|f| f.subcluster == sc.name)
                .map(|f| {
                    let prev = before.and_then(|b| b.detail.iter().find(|d| d.pod_name == f.name));
                    pod_detail(f, prev)
                })
                .collect();
            let count = |pred: fn(&PodStatusDetail) -> bool| {
                i32::try_from(detail.iter().filter(|d| pred(d)).count()).unwrap_or(i32::MAX)
            };
            SubclusterStatus {
                name: sc.name.clone(),
                install_count: count(|d| d.installed),
                added_to_db_count: count(|d| d.added_to_db),
                up_node_count: count(|d| d.up_node),
                shutdown: cluster.is_subcluster_shutdown(sc),
                detail,
            }
        })
        .collect()
}

#[async_trait]
impl ReconcileActor for StatusSyncReconciler {
    fn name(&self) -> &'static str {
        "Status"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        pass.collect_facts().await?;
        let entries = subcluster_statuses(&pass.cluster, &pass.facts);

        let written = pass.update_status(|status| {
            for entry in &entries {
                match status.subclusters.iter_mut().find(|s| s.name == entry.name) {
                    Some(existing) => existing.clone_from(entry),
                    None => status.subclusters.push(entry.clone()),
                }
            }
        })
        .await?;
        if written {
            debug!(name = %pass.name(), sandbox = %pass.sandbox(), "Recorded pod facts in status");
        }
        Ok(Outcome::proceed())
    }
}

#[cfg(test)]
#[path = "status_sync_tests.rs"]
mod status_sync_tests;
