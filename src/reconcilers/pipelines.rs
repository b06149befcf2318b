// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The two fixed actor orders the controllers run.

use super::add_node::AddNodeReconciler;
use super::pipeline::Pipeline;
use super::remove_node::RemoveNodeReconciler;
use super::restart::RestartReconciler;
use super::sandbox_shutdown::SandboxShutdownTriggerReconciler;
use super::sandbox_subcluster::SandboxSubclusterReconciler;
use super::status_sync::StatusSyncReconciler;
use super::stop_db::StopDbReconciler;
use super::stop_subcluster::StopSubclusterReconciler;
use super::subcluster_shutdown::SubclusterShutdownReconciler;
use super::tls_rollback::TlsRollbackReconciler;
use super::uninstall::UninstallReconciler;

/// Pipeline run for the main cluster of a `DatabaseCluster`.
///
/// Status is refreshed after every actor that can change membership so the next one
/// decides on current counts. Subclusters entering a sandbox are moved before
/// `StopSubcluster` runs, so only subclusters leaving a sandbox are stopped.
#[must_use]
pub fn main_pipeline() -> Pipeline {
    Pipeline::new("main")
        .with_actor(StatusSyncReconciler)
        .with_actor(RestartReconciler)
        .with_actor(StatusSyncReconciler)
        .with_actor(SandboxSubclusterReconciler)
        .with_actor(StatusSyncReconciler)
        .with_actor(StopSubclusterReconciler)
        .with_actor(StatusSyncReconciler)
        .with_actor(RemoveNodeReconciler)
        .with_actor(StatusSyncReconciler)
        .with_actor(UninstallReconciler)
        .with_actor(StatusSyncReconciler)
        .with_actor(AddNodeReconciler)
        .with_actor(StatusSyncReconciler)
        .with_actor(SubclusterShutdownReconciler)
        .with_actor(StopDbReconciler)
        .with_actor(SandboxShutdownTriggerReconciler)
        .with_actor(TlsRollbackReconciler)
        .with_actor(StatusSyncReconciler)
}

/// Pipeline run for one sandbox when its ConfigMap is triggered.
#[must_use]
pub fn sandbox_pipeline() -> Pipeline {
    Pipeline::new("sandbox")
        .with_actor(StatusSyncReconciler)
        .with_actor(StopSubclusterReconciler)
        .with_actor(SubclusterShutdownReconciler)
        .with_actor(RestartReconciler)
        .with_actor(StatusSyncReconciler)
}
