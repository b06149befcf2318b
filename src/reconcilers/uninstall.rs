// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Clears the install state of pods that are being scaled away.
//!
//! A pod can only be uninstalled after its node left the database. Unlike remove
//! node, uninstall acts on the whole range or not at all: when one pod of the range
//! is not ready, no pod is touched and the pass is requeued.

use super::scaledown::{scale_down_subclusters, select_pods, PodVerdict, ScaledownActor};
use super::{Outcome, ReconcileActor, ReconcilePass};
use crate::constants::{INSTALL_INDICATOR_PATH, SERVER_CONTAINER};
use crate::crd::Subcluster;
use crate::events::UNINSTALL_PODS;
use crate::podfacts::PodFact;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use kube::runtime::events::EventType;
use tracing::info;

pub struct UninstallReconciler;

fn uninstall_verdict(fact: &PodFact) -> PodVerdict {
    if fact.installed.is_false() {
        return PodVerdict::Skip;
    }
    if !fact.is_pod_running || !fact.db_exists.is_false() {
        return PodVerdict::Wait;
    }
    PodVerdict::Act
}

#[async_trait]
impl ScaledownActor for UninstallReconciler {
    fn name(&self) -> &'static str {
        "Uninstall"
    }

    async fn scale_down_range(
        &self,
        pass: &mut ReconcilePass,
        subcluster: &Subcluster,
        start: i32,
        end: i32,
    ) -> Result<Outcome> {
        let (pods, wait) = select_pods(&pass.facts, &subcluster.name, start, end, uninstall_verdict);
        if wait {
            info!(
                subcluster = %subcluster.name,
                start,
                end,
                "Some pods of the range are not ready to be uninstalled, requeueing"
            );
            return Ok(Outcome::requeue());
        }
        let pod_names: Vec<String> = pods.iter().map(|p| p.name.clone()).collect();
        if pod_names.is_empty() {
            return Ok(Outcome::proceed());
        }

        let namespace = pass.namespace();
        for pod in &pod_names {
            let command = vec![
                "rm".to_string(),
                "-f".to_string(),
                INSTALL_INDICATOR_PATH.to_string(),
            ];
            let output = pass
                .env
                .runner
                .exec(&namespace, pod, SERVER_CONTAINER, command)
                .await
                .with_context(|| format!("failed to uninstall pod {namespace}/{pod}"))?;
            if !output.succeeded {
                bail!(
                    "failed to remove install indicator in pod {namespace}/{pod}: {}",
                    output.combined()
                );
            }
            info!(pod = %pod, subcluster = %subcluster.name, "Uninstalled pod");
        }

        pass.facts.invalidate();
        pass.event(
            EventType::Normal,
            UNINSTALL_PODS,
            format!("Uninstalled pods '{}'", pod_names.join(", ")),
        )
        .await;
        Ok(Outcome::proceed())
    }
}

#[async_trait]
impl ReconcileActor for UninstallReconciler {
    fn name(&self) -> &'static str {
        ScaledownActor::name(self)
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        scale_down_subclusters(self, pass).await
    }
}

#[cfg(test)]
#[path = "uninstall_tests.rs"]
mod uninstall_tests;
