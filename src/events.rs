// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes Events emitted on `DatabaseCluster` resources.
//!
//! Events are the user-visible trail of admin operations (`kubectl describe dbc`).
//! They are fire-and-forget: a failed publish is logged as a warning and never
//! changes the outcome of a reconcile pass.

use crate::crd::DatabaseCluster;
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

// ============================================================================
// Event Reasons
// ============================================================================

pub const ADD_NODE_START: &str = "AddNodeStart";
pub const ADD_NODE_SUCCEEDED: &str = "AddNodeSucceeded";
pub const ADD_NODE_FAILED: &str = "AddNodeFailed";
pub const ADD_NODE_LICENSE_FAIL: &str = "AddNodeLicenseFail";

pub const REMOVE_NODES_START: &str = "RemoveNodesStart";
pub const REMOVE_NODES_SUCCEEDED: &str = "RemoveNodesSucceeded";
pub const REMOVE_NODES_FAILED: &str = "RemoveNodesFailed";

pub const UNINSTALL_PODS: &str = "UninstallPods";

pub const CLUSTER_RESTART_STARTED: &str = "ClusterRestartStarted";
pub const CLUSTER_RESTART_SUCCEEDED: &str = "ClusterRestartSucceeded";
pub const NODE_RESTART_STARTED: &str = "NodeRestartStarted";
pub const NODE_RESTART_SUCCEEDED: &str = "NodeRestartSucceeded";
pub const RESTART_FAILED: &str = "RestartFailed";

pub const CLUSTER_SHUTDOWN_STARTED: &str = "ClusterShutdownStarted";
pub const CLUSTER_SHUTDOWN_SUCCEEDED: &str = "ClusterShutdownSucceeded";
pub const CLUSTER_SHUTDOWN_FAILED: &str = "ClusterShutdownFailed";

pub const STOP_SUBCLUSTER_START: &str = "StopSubclusterStart";
pub const STOP_SUBCLUSTER_SUCCEEDED: &str = "StopSubclusterSucceeded";
pub const STOP_SUBCLUSTER_FAILED: &str = "StopSubclusterFailed";
/// Stopping the requested primaries would drop the database below quorum.
pub const CLUSTER_WILL_LOSE_QUORUM: &str = "ClusterWillLoseQuorum";

pub const SANDBOX_SUBCLUSTER_START: &str = "SandboxSubclusterStart";
pub const SANDBOX_SUBCLUSTER_SUCCEEDED: &str = "SandboxSubclusterSucceeded";
pub const SANDBOX_SUBCLUSTER_FAILED: &str = "SandboxSubclusterFailed";

pub const SANDBOX_SHUTDOWN_TRIGGERED: &str = "SandboxShutdownTriggered";

pub const TLS_CERT_ROLLBACK_STARTED: &str = "TlsCertRollbackStarted";
pub const TLS_CERT_ROLLBACK_SUCCEEDED: &str = "TlsCertRollbackSucceeded";
pub const TLS_CERT_ROLLBACK_FAILED: &str = "TlsCertRollbackFailed";

/// A known admin failure was handled by requeueing; the category is in the note.
pub const ADMIN_COMMAND_FAILED: &str = "AdminCommandFailed";

/// Event action recorded for every event we publish.
pub const ACTION_RECONCILE: &str = "Reconcile";

/// Publishes events attached to a `DatabaseCluster`.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Publish one event. Never fails.
    ///
    /// # Arguments
    ///
    /// * `cluster` - Resource the event is attached to
    /// * `type_` - Normal or Warning
    /// * `reason` - One of the reason constants in this module
    /// * `note` - Human-readable detail
    async fn event(&self, cluster: &DatabaseCluster, type_: EventType, reason: &str, note: String);
}

/// [`EventRecorder`] backed by `kube::runtime::events::Recorder`.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// # Arguments
    ///
    /// * `client` - Kubernetes client
    /// * `controller` - Reporting component, e.g. `dbop-controller`
    /// * `instance` - Reporting instance, usually the operator pod name
    #[must_use]
    pub fn new(client: Client, controller: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn event(&self, cluster: &DatabaseCluster, type_: EventType, reason: &str, note: String) {
        let object_ref = cluster.object_ref(&());
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: ACTION_RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &object_ref).await {
            warn!(
                reason,
                name = ?object_ref.name,
                namespace = ?object_ref.namespace,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}
