// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller entry points.
//!
//! - [`reconcile_cluster`] runs the main pipeline for a `DatabaseCluster`.
//! - [`reconcile_sandbox`] runs the sandbox pipeline for the sandbox named by a
//!   sandbox ConfigMap, then clears the shutdown trigger annotation once the pass
//!   went through.
//!
//! Both return the controller [`Action`] derived from the pass [`Outcome`]; errors go
//! through [`error_policy`].

use crate::constants::{
    ANNOTATION_SANDBOX_SHUTDOWN_TRIGGER, CONFIGMAP_KEY_CLUSTER_NAME, CONFIGMAP_KEY_SANDBOX_NAME,
    ERROR_REQUEUE_SECS, KIND_DATABASE_CLUSTER, MAIN_CLUSTER,
};
use crate::context::Context;
use crate::crd::DatabaseCluster;
use crate::metrics;
use crate::reconcilers::Outcome;
use anyhow::Context as _;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Resource type label used in metrics for sandbox passes.
const RESOURCE_SANDBOX: &str = "Sandbox";

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReconcileError(#[from] anyhow::Error);

/// Run the main pipeline for one `DatabaseCluster`.
///
/// # Errors
///
/// Returns the first actor error of the pass.
pub async fn reconcile_cluster(
    cluster: Arc<DatabaseCluster>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    if cluster.metadata.deletion_timestamp.is_some() {
        debug!(namespace = %namespace, name = %name, "Cluster is being deleted, skipping");
        return Ok(Action::await_change());
    }

    info!(namespace = %namespace, name = %name, "Reconciling DatabaseCluster");
    let result = async {
        let mut pass = ctx.start_pass((*cluster).clone(), MAIN_CLUSTER).await?;
        ctx.main_pipeline.run(&mut pass).await
    }
    .await;

    finish(KIND_DATABASE_CLUSTER, &namespace, &name, start, result)
}

/// Run the sandbox pipeline for the sandbox a ConfigMap stands for.
///
/// ConfigMaps missing the cluster or sandbox key, or pointing at a cluster that no
/// longer exists, are ignored until they change.
///
/// # Errors
///
/// Returns the first actor error of the pass, or a failure to read the cluster or
/// clear the trigger.
pub async fn reconcile_sandbox(
    cm: Arc<ConfigMap>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let namespace = cm.namespace().unwrap_or_default();
    let cm_name = cm.name_any();

    let Some((cluster_name, sandbox)) = sandbox_target(&cm) else {
        warn!(namespace = %namespace, configmap = %cm_name, "Sandbox ConfigMap is missing its cluster or sandbox name");
        return Ok(Action::await_change());
    };

    let cluster = ctx
        .accessor
        .get_cluster(&namespace, &cluster_name)
        .await
        .with_context(|| format!("failed to read DatabaseCluster {namespace}/{cluster_name}"))
        .map_err(ReconcileError::from)?;
    let Some(cluster) = cluster else {
        info!(namespace = %namespace, cluster = %cluster_name, sandbox = %sandbox, "Cluster of sandbox not found");
        return Ok(Action::await_change());
    };

    info!(namespace = %namespace, name = %cluster_name, sandbox = %sandbox, "Reconciling sandbox");
    let result = async {
        let mut pass = ctx.start_pass(cluster, &sandbox).await?;
        let outcome = ctx.sandbox_pipeline.run(&mut pass).await?;
        if !outcome.is_abort() && cm.annotations().contains_key(ANNOTATION_SANDBOX_SHUTDOWN_TRIGGER) {
            ctx.accessor
                .annotate_configmap(&namespace, &cm_name, ANNOTATION_SANDBOX_SHUTDOWN_TRIGGER, None)
                .await
                .with_context(|| format!("failed to clear trigger on ConfigMap {namespace}/{cm_name}"))?;
            debug!(namespace = %namespace, configmap = %cm_name, "Cleared sandbox shutdown trigger");
        }
        anyhow::Ok(outcome)
    }
    .await;

    finish(RESOURCE_SANDBOX, &namespace, &cluster_name, start, result)
}

/// Cluster and sandbox names stored in a sandbox ConfigMap.
fn sandbox_target(cm: &ConfigMap) -> Option<(String, String)> {
    let data = cm.data.as_ref()?;
    let cluster = data.get(CONFIGMAP_KEY_CLUSTER_NAME).filter(|v| !v.is_empty())?;
    let sandbox = data.get(CONFIGMAP_KEY_SANDBOX_NAME).filter(|v| !v.is_empty())?;
    Some((cluster.clone(), sandbox.clone()))
}

fn finish(
    resource_type: &str,
    namespace: &str,
    name: &str,
    start: Instant,
    result: anyhow::Result<Outcome>,
) -> Result<Action, ReconcileError> {
    let elapsed = start.elapsed();
    match result {
        Ok(outcome) if outcome.is_abort() => {
            metrics::record_reconciliation_requeue(resource_type, "aborted", elapsed);
            debug!(namespace = %namespace, name = %name, requeue_after = ?outcome.requeue_after, "Reconcile pass requeued");
            Ok(outcome.to_action())
        }
        Ok(outcome) => {
            metrics::record_reconciliation_success(resource_type, elapsed);
            info!(namespace = %namespace, name = %name, "Successfully reconciled {resource_type}");
            Ok(outcome.to_action())
        }
        Err(e) => {
            metrics::record_reconciliation_error(resource_type, elapsed);
            Err(ReconcileError(e.context(format!(
                "reconcile of {resource_type} {namespace}/{name} failed"
            ))))
        }
    }
}

/// Error policy shared by both controllers.
pub fn error_policy<K>(resource: Arc<K>, err: &ReconcileError, _ctx: Arc<Context>) -> Action
where
    K: ResourceExt,
{
    error!(
        namespace = ?resource.namespace(),
        name = %resource.name_any(),
        error = ?err,
        "Reconcile failed, requeueing"
    );
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
