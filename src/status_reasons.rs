// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition types and reasons for `DatabaseCluster` resources.
//!
//! Conditions drive the lifecycle reconcilers: a reconciler reads its guard condition,
//! does the work, and clears the condition through the status updater once the work
//! succeeded. A failed attempt leaves the condition set so the next pass retries.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   conditions:
//!     - type: AutoRestart
//!       status: "True"
//!       reason: Enabled
//!     - type: RestartNeeded
//!       status: "False"
//!       reason: Completed
//!     - type: TlsCertRollbackNeeded
//!       status: "True"
//!       reason: RotationFailed
//!       message: "https cert rotation failed on pod db-sc1-0"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Mirrors `spec.autoRestart`.
pub const CONDITION_AUTO_RESTART: &str = "AutoRestart";

/// Set while down nodes are waiting for a restart.
pub const CONDITION_RESTART_NEEDED: &str = "RestartNeeded";

/// Requests a full stop of the main cluster.
pub const CONDITION_STOP_DB_NEEDED: &str = "StopDbNeeded";

/// Set by a failed certificate rotation; drives the rollback reconciler.
pub const CONDITION_TLS_ROLLBACK_NEEDED: &str = "TlsCertRollbackNeeded";

/// Set while the rollback reconciler is working.
pub const CONDITION_TLS_ROLLBACK_IN_PROGRESS: &str = "TlsCertRollbackInProgress";

/// Set while a TLS config change is being applied.
pub const CONDITION_TLS_UPDATE_IN_PROGRESS: &str = "TlsConfigUpdateInProgress";

// ============================================================================
// Reasons
// ============================================================================

/// Feature enabled in spec.
pub const REASON_ENABLED: &str = "Enabled";

/// Feature disabled in spec.
pub const REASON_DISABLED: &str = "Disabled";

/// The guarded operation finished successfully.
pub const REASON_COMPLETED: &str = "Completed";

/// Some database nodes are down.
pub const REASON_NODES_DOWN: &str = "NodesDown";

/// No database node is up; a full cluster start is required.
pub const REASON_CLUSTER_DOWN: &str = "ClusterDown";

/// `spec.shutdown` requested a stop.
pub const REASON_SHUTDOWN_REQUESTED: &str = "ShutdownRequested";

/// Nothing was running so nothing had to be stopped.
pub const REASON_ALREADY_STOPPED: &str = "AlreadyStopped";

/// Rollback of a failed certificate rotation started.
pub const REASON_ROLLBACK_STARTED: &str = "RollbackStarted";

/// TLS update was abandoned in favour of a rollback.
pub const REASON_ROLLBACK_TRIGGERED: &str = "RollbackTriggered";

/// Condition status string for a boolean.
#[must_use]
pub fn condition_status(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}
