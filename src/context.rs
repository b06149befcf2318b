// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the controllers.
//!
//! Both controllers receive an `Arc<Context>` that contains:
//! - the collaborators every reconcile pass needs (API accessor, pod runner, event recorder)
//! - a [`DispatcherSource`] that picks the admin transport per cluster
//! - the fixed main and sandbox pipelines
//! - the operator settings

use crate::config::OperatorSettings;
use crate::constants::FIELD_MANAGER;
use crate::crd::DatabaseCluster;
use crate::dispatcher::{build_dispatcher, Dispatcher};
use crate::events::{EventRecorder, KubeEventRecorder};
use crate::k8s::{ApiAccessor, KubeAccessor, KubePodRunner, PodRunner};
use crate::reconcilers::{main_pipeline, sandbox_pipeline, Pipeline, ReconcileEnv, ReconcilePass};
use anyhow::Result;
use async_trait::async_trait;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;

/// Builds the admin dispatcher for one cluster.
#[async_trait]
pub trait DispatcherSource: Send + Sync {
    async fn dispatcher_for(&self, cluster: &DatabaseCluster) -> Result<Arc<dyn Dispatcher>>;
}

/// [`DispatcherSource`] honouring the cluster's admin transport annotation.
pub struct AnnotatedDispatcherSource {
    accessor: Arc<dyn ApiAccessor>,
    runner: Arc<dyn PodRunner>,
    timeout: Duration,
}

impl AnnotatedDispatcherSource {
    #[must_use]
    pub fn new(accessor: Arc<dyn ApiAccessor>, runner: Arc<dyn PodRunner>, timeout: Duration) -> Self {
        Self {
            accessor,
            runner,
            timeout,
        }
    }
}

#[async_trait]
impl DispatcherSource for AnnotatedDispatcherSource {
    async fn dispatcher_for(&self, cluster: &DatabaseCluster) -> Result<Arc<dyn Dispatcher>> {
        build_dispatcher(
            cluster,
            self.accessor.as_ref(),
            self.runner.clone(),
            self.timeout,
        )
        .await
    }
}

/// Shared context passed to all controllers.
pub struct Context {
    pub accessor: Arc<dyn ApiAccessor>,
    pub runner: Arc<dyn PodRunner>,
    pub recorder: Arc<dyn EventRecorder>,
    pub dispatchers: Arc<dyn DispatcherSource>,
    pub main_pipeline: Pipeline,
    pub sandbox_pipeline: Pipeline,
    pub settings: OperatorSettings,
}

impl Context {
    /// Production context backed by the Kubernetes API.
    #[must_use]
    pub fn new(client: Client, settings: OperatorSettings) -> Self {
        let accessor: Arc<dyn ApiAccessor> = Arc::new(KubeAccessor::new(client.clone()));
        let runner: Arc<dyn PodRunner> =
            Arc::new(KubePodRunner::new(client.clone(), settings.admin_timeout()));
        let recorder: Arc<dyn EventRecorder> = Arc::new(KubeEventRecorder::new(
            client,
            FIELD_MANAGER,
            settings.pod_name.clone(),
        ));
        let dispatchers = Arc::new(AnnotatedDispatcherSource::new(
            accessor.clone(),
            runner.clone(),
            settings.admin_timeout(),
        ));
        Self::from_parts(accessor, runner, recorder, dispatchers, settings)
    }

    /// Context from explicit collaborators, with the standard pipelines.
    #[must_use]
    pub fn from_parts(
        accessor: Arc<dyn ApiAccessor>,
        runner: Arc<dyn PodRunner>,
        recorder: Arc<dyn EventRecorder>,
        dispatchers: Arc<dyn DispatcherSource>,
        settings: OperatorSettings,
    ) -> Self {
        Self {
            accessor,
            runner,
            recorder,
            dispatchers,
            main_pipeline: main_pipeline(),
            sandbox_pipeline: sandbox_pipeline(),
            settings,
        }
    }

    /// Start a reconcile pass for `cluster` scoped to `sandbox`.
    ///
    /// # Errors
    ///
    /// Returns an error if no dispatcher can be built for the cluster.
    pub async fn start_pass(&self, cluster: DatabaseCluster, sandbox: &str) -> Result<ReconcilePass> {
        let dispatcher = self.dispatchers.dispatcher_for(&cluster).await?;
        let env = Arc::new(ReconcileEnv {
            accessor: self.accessor.clone(),
            runner: self.runner.clone(),
            recorder: self.recorder.clone(),
            dispatcher,
        });
        Ok(ReconcilePass::new(env, cluster, sandbox))
    }
}
