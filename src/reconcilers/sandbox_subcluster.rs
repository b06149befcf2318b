// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Moves subclusters of the main cluster into the sandbox the spec assigns them to.
//!
//! The move hands running nodes to the sandbox, so every node of the subcluster that
//! is already in the database must be up. Pods that are not in the database yet are
//! left to [`super::add_node::AddNodeReconciler`] and moved on a later pass.
//!
//! Each successful move is recorded in `status.sandboxes`. Every recorded sandbox
//! gets a ConfigMap named `<cluster>-<sandbox>`, which the sandbox controller
//! watches.

use super::{outcome_for_admin_error, Outcome, ReconcileActor, ReconcilePass};
use crate::constants::{
    CONFIGMAP_KEY_CLUSTER_NAME, CONFIGMAP_KEY_SANDBOX_NAME, LABEL_SANDBOX_CONFIGMAP,
    MAIN_CLUSTER, REQUEUE_WAIT_SECS,
};
use crate::crd::{DatabaseCluster, SandboxStatus};
use crate::dispatcher::{Initiator, SandboxSubclusterOptions};
use crate::events::{
    SANDBOX_SUBCLUSTER_FAILED, SANDBOX_SUBCLUSTER_START, SANDBOX_SUBCLUSTER_SUCCEEDED,
};
use crate::podfacts::PodFacts;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct SandboxSubclusterReconciler;

/// Whether a subcluster can be handed to its sandbox now.
#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    /// No pod of the subcluster is in the database yet
    NotInDatabase,
    /// Some node is down, or the state of a running pod is unknown
    Waiting,
    Ready,
}

fn readiness(facts: &PodFacts, subcluster: &str) -> Readiness {
    let pods: Vec<_> = facts
        .all()
        .iter()
        .filter(|f| f.subcluster == subcluster)
        .collect();
    if pods
        .iter()
        .any(|f| f.is_pod_running && (f.db_exists.is_unknown() || f.up_node.is_unknown()))
    {
        return Readiness::Waiting;
    }
    let mut members = pods.iter().filter(|f| f.db_exists.is_true()).peekable();
    if members.peek().is_none() {
        return Readiness::NotInDatabase;
    }
    if members.all(|f| f.up_node.is_true()) {
        Readiness::Ready
    } else {
        Readiness::Waiting
    }
}

/// ConfigMap the sandbox controller watches for `sandbox`.
#[must_use]
pub fn sandbox_configmap(cluster: &DatabaseCluster, sandbox: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(cluster.sandbox_configmap_name(sandbox)),
            namespace: cluster.namespace(),
            labels: Some(BTreeMap::from([(
                LABEL_SANDBOX_CONFIGMAP.to_string(),
                "true".to_string(),
            )])),
            owner_references: cluster.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (CONFIGMAP_KEY_CLUSTER_NAME.to_string(), cluster.name_any()),
            (CONFIGMAP_KEY_SANDBOX_NAME.to_string(), sandbox.to_string()),
        ])),
        ..Default::default()
    }
}

impl SandboxSubclusterReconciler {
    /// `(subcluster, sandbox)` pairs for subclusters still running in the main
    /// cluster that the spec assigns to a sandbox.
    fn pending_moves(cluster: &DatabaseCluster) -> Vec<(String, String)> {
        let spec_map = cluster.subcluster_sandbox_spec_map();
        cluster
            .spec
            .subclusters
            .iter()
            .filter(|sc| cluster.observed_sandbox_of(&sc.name) == MAIN_CLUSTER)
            .filter_map(|sc| {
                spec_map
                    .get(&sc.name)
                    .map(|sb| (sc.name.clone(), sb.clone()))
            })
            .collect()
    }

    async fn record_membership(
        pass: &mut ReconcilePass,
        subcluster: &str,
        sandbox: &str,
    ) -> Result<()> {
        let (subcluster, sandbox) = (subcluster.to_string(), sandbox.to_string());
        pass.update_status(move |status| {
            match status.sandboxes.iter_mut().find(|sb| sb.name == sandbox) {
                Some(entry) => {
                    if !entry.subclusters.contains(&subcluster) {
                        entry.subclusters.push(subcluster.clone());
                    }
                }
                None => status.sandboxes.push(SandboxStatus {
                    name: sandbox.clone(),
                    subclusters: vec![subcluster.clone()],
                    shutdown: false,
                }),
            }
        })
        .await?;
        Ok(())
    }

    /// Create the ConfigMap of every sandbox the status knows about, if missing.
    async fn ensure_configmaps(pass: &ReconcilePass) -> Result<()> {
        let namespace = pass.namespace();
        let recorded = pass
            .cluster
            .spec
            .sandboxes
            .iter()
            .filter(|sb| pass.cluster.sandbox_status(&sb.name).is_some());
        for sandbox in recorded {
            let cm_name = pass.cluster.sandbox_configmap_name(&sandbox.name);
            let existing = pass
                .env
                .accessor
                .get_configmap(&namespace, &cm_name)
                .await
                .with_context(|| format!("failed to read ConfigMap {namespace}/{cm_name}"))?;
            if existing.is_some() {
                continue;
            }
            pass.env
                .accessor
                .create_configmap(&namespace, &sandbox_configmap(&pass.cluster, &sandbox.name))
                .await
                .with_context(|| format!("failed to create ConfigMap {namespace}/{cm_name}"))?;
            info!(sandbox = %sandbox.name, configmap = %cm_name, "Created sandbox ConfigMap");
        }
        Ok(())
    }
}

#[async_trait]
impl ReconcileActor for SandboxSubclusterReconciler {
    fn name(&self) -> &'static str {
        "SandboxSubcluster"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if pass.sandbox() != MAIN_CLUSTER || pass.cluster.spec.sandboxes.is_empty() {
            return Ok(Outcome::proceed());
        }

        let moves = Self::pending_moves(&pass.cluster);
        let mut outcome = Outcome::proceed();
        if !moves.is_empty() {
            pass.collect_facts().await?;
        }
        for (subcluster, sandbox) in &moves {
            match readiness(&pass.facts, subcluster) {
                Readiness::NotInDatabase => {
                    debug!(subcluster = %subcluster, "Subcluster has no database node yet");
                    continue;
                }
                Readiness::Waiting => {
                    let shut_down = pass
                        .cluster
                        .find_subcluster(subcluster)
                        .is_some_and(|sc| pass.cluster.is_subcluster_shutdown(sc));
                    if shut_down {
                        debug!(subcluster = %subcluster, "Subcluster is shut down, not sandboxing it");
                        continue;
                    }
                    info!(
                        subcluster = %subcluster,
                        sandbox = %sandbox,
                        "Not every node of the subcluster is up, waiting to sandbox it"
                    );
                    outcome =
                        outcome.merge(Outcome::requeue_after(Duration::from_secs(REQUEUE_WAIT_SECS)));
                    continue;
                }
                Readiness::Ready => {}
            }

            let Some(initiator) = pass
                .facts
                .find_up_primary_outside(subcluster)
                .map(Initiator::from)
            else {
                info!(subcluster = %subcluster, "No primary node of the main cluster is up, requeueing");
                outcome = outcome.merge(Outcome::requeue());
                continue;
            };

            pass.event(
                EventType::Normal,
                SANDBOX_SUBCLUSTER_START,
                format!("Starting add subcluster '{subcluster}' to sandbox '{sandbox}'"),
            )
            .await;
            let opts = SandboxSubclusterOptions::new(initiator)
                .with_sandbox(sandbox)
                .with_subcluster(subcluster);
            let start_time = Instant::now();
            if let Err(e) = pass.env.dispatcher.sandbox_subcluster(opts).await {
                return outcome_for_admin_error(pass, SANDBOX_SUBCLUSTER_FAILED, e).await;
            }
            pass.event(
                EventType::Normal,
                SANDBOX_SUBCLUSTER_SUCCEEDED,
                format!(
                    "Successfully added subcluster '{subcluster}' to sandbox '{sandbox}' and it took {}s",
                    start_time.elapsed().as_secs()
                ),
            )
            .await;

            Self::record_membership(pass, subcluster, sandbox).await?;
            pass.facts.invalidate();
        }

        Self::ensure_configmaps(pass).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "sandbox_subcluster_tests.rs"]
mod sandbox_subcluster_tests;
