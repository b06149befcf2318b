// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconcile engine for `DatabaseCluster` resources.
//!
//! A reconcile pass runs an ordered [`Pipeline`] of [`ReconcileActor`]s against one
//! cluster. Every actor inspects the shared [`ReconcilePass`] (the cluster and its
//! [`PodFacts`]), may call the admin [`Dispatcher`], and returns an [`Outcome`]:
//!
//! - **proceed** - the next actor runs
//! - **requeue** - the pass stops and is retried shortly
//! - **requeue after** - the pass stops and is retried after a delay
//! - **error** - the pass stops and the error reaches the controller's error policy
//!
//! # Available Actors
//!
//! ## Scale Changes
//!
//! - [`add_node::AddNodeReconciler`] - adds pods that joined a subcluster to the database
//! - [`remove_node::RemoveNodeReconciler`] - removes nodes of pods being scaled away
//! - [`uninstall::UninstallReconciler`] - clears the install state of scaled-away pods
//!
//! ## Lifecycle
//!
//! - [`restart::RestartReconciler`] - restarts down nodes or the whole cluster
//! - [`stop_db::StopDbReconciler`] - stops the main cluster
//! - [`sandbox_subcluster::SandboxSubclusterReconciler`] - moves subclusters into their sandbox
//! - [`stop_subcluster::StopSubclusterReconciler`] - stops subclusters moving between sandboxes
//! - [`subcluster_shutdown::SubclusterShutdownReconciler`] - stops subclusters marked for shutdown
//! - [`sandbox_shutdown::SandboxShutdownTriggerReconciler`] - wakes the sandbox controller
//! - [`tls_rollback::TlsRollbackReconciler`] - reverts a failed HTTPS certificate rotation
//!
//! ## Status
//!
//! - [`status_sync::StatusSyncReconciler`] - records pod facts in the cluster status

pub mod add_node;
pub mod pipeline;
pub mod pipelines;
pub mod remove_node;
pub mod restart;
pub mod retry;
pub mod sandbox_shutdown;
pub mod sandbox_subcluster;
pub mod scaledown;
pub mod status;
pub mod status_sync;
pub mod stop_db;
pub mod stop_subcluster;
pub mod subcluster_shutdown;
pub mod tls_rollback;
pub mod uninstall;

#[cfg(test)]
pub(crate) mod test_support;


pub use pipeline::Pipeline;
pub use pipelines::{main_pipeline, sandbox_pipeline};

use crate::admin_errors::AdminError;
use crate::constants::{REQUEUE_SOON_SECS, REQUEUE_WAIT_SECS, RESYNC_INTERVAL_SECS};
use crate::crd::{DatabaseCluster, DatabaseClusterStatus};
use crate::dispatcher::Dispatcher;
use crate::events::EventRecorder;
use crate::k8s::{ApiAccessor, PodRunner};
use crate::podfacts::PodFacts;
use crate::status_reasons::condition_status;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Continuation signal returned by every actor.
///
/// The default value means "proceed".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Stop the pass and retry shortly.
    pub requeue: bool,
    /// Stop the pass and retry after this delay.
    pub requeue_after: Option<Duration>,
}

impl Outcome {
    #[must_use]
    pub const fn proceed() -> Self {
        Self {
            requeue: false,
            requeue_after: None,
        }
    }

    #[must_use]
    pub const fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    #[must_use]
    pub const fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(delay),
        }
    }

    /// Whether the pipeline must stop after this outcome.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        self.requeue || self.requeue_after.is_some()
    }

    /// Combine two outcomes, keeping the more urgent retry.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            requeue: self.requeue || other.requeue,
            requeue_after,
        }
    }

    /// Controller action for a finished pass.
    #[must_use]
    pub fn to_action(self) -> Action {
        match (self.requeue_after, self.requeue) {
            (Some(delay), _) => Action::requeue(delay),
            (None, true) => Action::requeue(Duration::from_secs(REQUEUE_SOON_SECS)),
            (None, false) => Action::requeue(Duration::from_secs(RESYNC_INTERVAL_SECS)),
        }
    }
}

/// Collaborators shared by every actor of a pass.
pub struct ReconcileEnv {
    pub accessor: Arc<dyn ApiAccessor>,
    pub runner: Arc<dyn PodRunner>,
    pub recorder: Arc<dyn EventRecorder>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

/// State of one reconcile pass for one cluster (or one sandbox of it).
pub struct ReconcilePass {
    pub env: Arc<ReconcileEnv>,
    /// Latest known copy of the cluster. Refreshed by every status or spec write.
    pub cluster: DatabaseCluster,
    pub facts: PodFacts,
}

impl ReconcilePass {
    /// Start a pass with an uncollected fact cache scoped to `sandbox`.
    #[must_use]
    pub fn new(env: Arc<ReconcileEnv>, cluster: DatabaseCluster, sandbox: &str) -> Self {
        let facts = PodFacts::for_sandbox(env.accessor.clone(), env.runner.clone(), sandbox);
        Self {
            env,
            cluster,
            facts,
        }
    }

    /// Collect pod facts unless they are still valid.
    ///
    /// # Errors
    ///
    /// Propagates [`PodFacts::collect`] failures.
    pub async fn collect_facts(&mut self) -> Result<()> {
        self.facts.collect(&self.cluster).await
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        self.cluster.namespace().unwrap_or_default()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.cluster.name_any()
    }

    /// Sandbox the pass works on, empty for the main cluster.
    #[must_use]
    pub fn sandbox(&self) -> &str {
        self.facts.sandbox()
    }

    /// Write a status change through [`status::update_status_with_retry`].
    ///
    /// When the write leaves the spec untouched the fact cache adopts the new
    /// resource version, so the pass's own status writes do not make its facts stale.
    ///
    /// # Errors
    ///
    /// Same as [`status::update_status_with_retry`].
    pub async fn update_status<F>(&mut self, mutate: F) -> Result<bool>
    where
        F: Fn(&mut DatabaseClusterStatus) + Send + Sync,
    {
        let env = self.env.clone();
        let spec_before = self.cluster.spec.clone();
        let written =
            status::update_status_with_retry(env.accessor.as_ref(), &mut self.cluster, mutate)
                .await?;
        if written && self.cluster.spec == spec_before {
            self.facts.adopt_version(&self.cluster);
        }
        Ok(written)
    }

    /// Set one condition through [`Self::update_status`].
    ///
    /// # Errors
    ///
    /// Same as [`status::update_status_with_retry`].
    pub async fn set_condition(
        &mut self,
        condition_type: &str,
        value: bool,
        reason: &str,
        message: &str,
    ) -> Result<bool> {
        self.update_status(|status| {
            status::update_condition_in_memory(
                &mut status.conditions,
                condition_type,
                condition_status(value),
                reason,
                message,
            );
        })
        .await
    }

    pub async fn event(&self, type_: EventType, reason: &str, note: String) {
        self.env
            .recorder
            .event(&self.cluster, type_, reason, note)
            .await;
    }
}

/// A unit of idempotent reconcile work.
#[async_trait]
pub trait ReconcileActor: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Inspect the pass, act if needed, and say whether the pipeline may continue.
    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome>;
}

/// Map a failed admin command to an outcome.
///
/// - nodes not down: requeue after a fixed wait
/// - transport failure: requeue
/// - other recognized failures: warning event with `failed_reason`, then requeue
/// - anything else: warning event, then error
///
/// # Errors
///
/// Returns the admin error for unrecognized failures and invalid options.
pub async fn outcome_for_admin_error(
    pass: &ReconcilePass,
    failed_reason: &str,
    err: AdminError,
) -> Result<Outcome> {
    match &err {
        AdminError::NodesNotDown { .. } => {
            info!(name = %pass.name(), error = %err, "Nodes are not down yet, waiting before retry");
            Ok(Outcome::requeue_after(Duration::from_secs(REQUEUE_WAIT_SECS)))
        }
        AdminError::Transport { .. } => {
            warn!(name = %pass.name(), error = %err, "Admin endpoint unreachable, requeueing");
            Ok(Outcome::requeue())
        }
        e if e.is_recognized() => {
            pass.event(
                EventType::Warning,
                failed_reason,
                format!("{} ({})", err, err.category()),
            )
            .await;
            Ok(Outcome::requeue())
        }
        _ => {
            pass.event(EventType::Warning, failed_reason, err.to_string())
                .await;
            Err(anyhow!(err))
        }
    }
}
