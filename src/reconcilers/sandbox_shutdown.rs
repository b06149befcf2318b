// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Wakes the sandbox controller when a sandbox's shutdown flag changes.
//!
//! The main pipeline never stops or starts sandbox nodes itself. When the requested
//! shutdown of a sandbox differs from the one recorded in its status, the trigger
//! annotation is written to the sandbox ConfigMap; the sandbox pipeline picks it up
//! and converges the status. A missing ConfigMap is created with the trigger set.
//!
//! Sandboxes without a status entry have no nodes yet. They are left to
//! [`super::sandbox_subcluster::SandboxSubclusterReconciler`].

use super::sandbox_subcluster::sandbox_configmap;
use super::{Outcome, ReconcileActor, ReconcilePass};
use crate::constants::{ANNOTATION_SANDBOX_SHUTDOWN_TRIGGER, MAIN_CLUSTER};
use crate::events::SANDBOX_SHUTDOWN_TRIGGERED;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info};

pub struct SandboxShutdownTriggerReconciler;

#[async_trait]
impl ReconcileActor for SandboxShutdownTriggerReconciler {
    fn name(&self) -> &'static str {
        "SandboxShutdownTrigger"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if pass.sandbox() != MAIN_CLUSTER {
            return Ok(Outcome::proceed());
        }
        let namespace = pass.namespace();

        let sandboxes = pass.cluster.spec.sandboxes.clone();
        for sandbox in &sandboxes {
            let Some(status) = pass.cluster.sandbox_status(&sandbox.name) else {
                debug!(sandbox = %sandbox.name, "Sandbox has no status yet, nothing to trigger");
                continue;
            };
            if status.shutdown == sandbox.shutdown {
                continue;
            }

            let cm_name = pass.cluster.sandbox_configmap_name(&sandbox.name);
            let cm = pass
                .env
                .accessor
                .get_configmap(&namespace, &cm_name)
                .await
                .with_context(|| format!("failed to read ConfigMap {namespace}/{cm_name}"))?;
            let triggered_at = Utc::now().to_rfc3339();
            match cm {
                Some(cm) if cm.annotations().contains_key(ANNOTATION_SANDBOX_SHUTDOWN_TRIGGER) => {
                    debug!(sandbox = %sandbox.name, "Sandbox shutdown trigger already pending");
                    continue;
                }
                Some(_) => pass
                    .env
                    .accessor
                    .annotate_configmap(
                        &namespace,
                        &cm_name,
                        ANNOTATION_SANDBOX_SHUTDOWN_TRIGGER,
                        Some(&triggered_at),
                    )
                    .await
                    .with_context(|| format!("failed to annotate ConfigMap {namespace}/{cm_name}"))?,
                None => {
                    let mut cm = sandbox_configmap(&pass.cluster, &sandbox.name);
                    cm.annotations_mut()
                        .insert(ANNOTATION_SANDBOX_SHUTDOWN_TRIGGER.to_string(), triggered_at);
                    pass.env
                        .accessor
                        .create_configmap(&namespace, &cm)
                        .await
                        .with_context(|| format!("failed to create ConfigMap {namespace}/{cm_name}"))?;
                }
            }
            info!(sandbox = %sandbox.name, shutdown = sandbox.shutdown, "Triggered sandbox controller");
            pass.event(
                EventType::Normal,
                SANDBOX_SHUTDOWN_TRIGGERED,
                format!(
                    "Triggered sandbox '{}' to change its shutdown state to {}",
                    sandbox.name, sandbox.shutdown
                ),
            )
            .await;
        }
        Ok(Outcome::proceed())
    }
}

#[cfg(test)]
#[path = "sandbox_shutdown_tests.rs"]
mod sandbox_shutdown_tests;
