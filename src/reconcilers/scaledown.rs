// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared shape of reconcilers that act on pods being scaled away.
//!
//! A subcluster is scaling down when its statefulset still has more replicas than the
//! subcluster's desired size. The pods with index in `[size, replicas - 1]` are the
//! scale-down range. [`scale_down_subclusters`] finds those ranges and hands each one to
//! a [`ScaledownActor`]; [`select_pods`] applies the actor's per-pod verdict.

use super::{Outcome, ReconcilePass};
use crate::crd::Subcluster;
use crate::podfacts::{PodFact, PodFacts};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// What to do with one pod of a scale-down range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodVerdict {
    /// Include the pod in the batch.
    Act,
    /// Nothing to do for this pod.
    Skip,
    /// The pod needs work but is not ready for it; retry later.
    Wait,
}

/// A reconciler that acts on the scale-down range of a subcluster.
#[async_trait]
pub trait ScaledownActor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Act on the pods of `subcluster` with index in `[start, end]`.
    ///
    /// Facts are collected before this is called.
    async fn scale_down_range(
        &self,
        pass: &mut ReconcilePass,
        subcluster: &Subcluster,
        start: i32,
        end: i32,
    ) -> Result<Outcome>;
}

/// Run `actor` over every subcluster of the pass's scope that is scaling down.
///
/// Stops at the first range that aborts.
///
/// # Errors
///
/// Returns an error when a statefulset cannot be read, facts cannot be collected, or
/// the actor fails.
pub async fn scale_down_subclusters(
    actor: &dyn ScaledownActor,
    pass: &mut ReconcilePass,
) -> Result<Outcome> {
    let namespace = pass.namespace();
    let subclusters: Vec<Subcluster> = pass
        .cluster
        .subclusters_in_scope(pass.sandbox())
        .into_iter()
        .cloned()
        .collect();

    for subcluster in &subclusters {
        let sts_name = pass.cluster.statefulset_name(&subcluster.name);
        let replicas = pass
            .env
            .accessor
            .get_statefulset(&namespace, &sts_name)
            .await
            .with_context(|| format!("failed to read statefulset {namespace}/{sts_name}"))?
            .and_then(|sts| sts.spec)
            .and_then(|spec| spec.replicas)
            .unwrap_or(0);

        if replicas <= subcluster.size {
            continue;
        }

        debug!(
            actor = actor.name(),
            subcluster = %subcluster.name,
            size = subcluster.size,
            replicas,
            "Subcluster is scaling down"
        );
        pass.collect_facts().await?;
        let outcome = actor
            .scale_down_range(pass, subcluster, subcluster.size, replicas - 1)
            .await?;
        if outcome.is_abort() {
            return Ok(outcome);
        }
    }

    Ok(Outcome::proceed())
}

/// Apply `verdict` to every pod of the range.
///
/// # Returns
///
/// The pods to act on, and whether some pod of the range has to be waited for. A pod
/// missing from the facts is waited for.
pub fn select_pods<'a>(
    facts: &'a PodFacts,
    subcluster: &str,
    start: i32,
    end: i32,
    verdict: impl Fn(&PodFact) -> PodVerdict,
) -> (Vec<&'a PodFact>, bool) {
    let in_range = facts.pods_in_range(subcluster, start, end);
    let mut wait = usize::try_from(end - start + 1).unwrap_or(0) > in_range.len();
    let mut selected = Vec::new();

    for fact in in_range {
        match verdict(fact) {
            PodVerdict::Act => selected.push(fact),
            PodVerdict::Skip => {}
            PodVerdict::Wait => {
                info!(pod = %fact.name, "Pod needs scale-down work but is not ready for it");
                wait = true;
            }
        }
    }
    (selected, wait)
}
