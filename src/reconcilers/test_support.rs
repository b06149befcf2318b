// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory fakes of the reconcile engine's collaborators, shared by unit tests.

use super::{ReconcileEnv, ReconcilePass};
use crate::admin_errors::AdminError;
use crate::crd::{
    DatabaseCluster, DatabaseClusterSpec, DatabaseClusterStatus, Subcluster, SubclusterStatus,
    SubclusterType,
};
use crate::dispatcher::{
    AddNodeOptions, AlterSubclusterTypeOptions, CreateArchiveOptions, Dispatcher,
    FetchNodeStateOptions, NodeState, PromoteSandboxOptions, RemoveNodeOptions,
    RestartNodeOptions, RestorePoint, RotateHttpsCertsOptions, SandboxSubclusterOptions,
    SaveRestorePointOptions, SetConfigParameterOptions, ShowRestorePointsOptions, StartDbOptions,
    StartSubclusterOptions, StopDbOptions, StopSubclusterOptions,
};
use crate::events::EventRecorder;
use crate::k8s::{AccessError, ApiAccessor, ExecOutput, PodRunner};
use crate::podfacts::{PodFact, TriState};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "db-ns";
pub const CLUSTER_NAME: &str = "db";

// ============================================================================
// Fixtures
// ============================================================================

pub fn subcluster(name: &str, size: i32) -> Subcluster {
    Subcluster {
        name: name.to_string(),
        r#type: SubclusterType::Primary,
        size,
        shutdown: false,
        drain_seconds: None,
    }
}

pub fn secondary(name: &str, size: i32) -> Subcluster {
    Subcluster {
        r#type: SubclusterType::Secondary,
        ..subcluster(name, size)
    }
}

/// A cluster with the given subclusters, resource version `1`, and status counts
/// saying every pod is installed and added to the database.
pub fn cluster(subclusters: Vec<Subcluster>) -> DatabaseCluster {
    let status = DatabaseClusterStatus {
        subclusters: subclusters
            .iter()
            .map(|sc| SubclusterStatus {
                name: sc.name.clone(),
                install_count: sc.size,
                added_to_db_count: sc.size,
                up_node_count: sc.size,
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    let spec = DatabaseClusterSpec {
        db_name: "analytics".to_string(),
        subclusters,
        k_safety: 1,
        auto_restart: true,
        ..Default::default()
    };
    let mut cluster = DatabaseCluster::new(CLUSTER_NAME, spec);
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.resource_version = Some("1".to_string());
    cluster.status = Some(status);
    cluster
}

/// A healthy fact: running, installed, in the database, up and writable.
pub fn fact(subcluster: &str, index: i32) -> PodFact {
    let name = format!("{CLUSTER_NAME}-{subcluster}-{index}");
    PodFact {
        dns_name: format!("{name}.{CLUSTER_NAME}-{subcluster}.{NAMESPACE}.svc.cluster.local"),
        pod_ip: Some(format!(
            "10.{}.0.{}",
            subcluster.bytes().map(u32::from).sum::<u32>() % 250,
            index + 1
        )),
        name,
        subcluster: subcluster.to_string(),
        pod_index: index,
        exists: true,
        is_pod_running: true,
        managed_by_parent: true,
        is_primary: true,
        installed: TriState::True,
        db_exists: TriState::True,
        up_node: TriState::True,
        read_only: TriState::False,
        startup_in_progress: TriState::False,
        vnode_name: format!("v_analytics_node{:04}", index + 1),
        ..Default::default()
    }
}

/// A fact for a pod whose database process is down.
pub fn down_fact(subcluster: &str, index: i32) -> PodFact {
    PodFact {
        up_node: TriState::False,
        ..fact(subcluster, index)
    }
}

/// A running pod whose state could not be gathered.
pub fn unknown_fact(subcluster: &str, index: i32) -> PodFact {
    PodFact {
        installed: TriState::Unknown,
        db_exists: TriState::Unknown,
        up_node: TriState::Unknown,
        read_only: TriState::Unknown,
        startup_in_progress: TriState::Unknown,
        ..fact(subcluster, index)
    }
}

pub fn statefulset(name: &str, replicas: i32) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod(name: &str, running: bool, ip: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(if running { "Running" } else { "Pending" }.to_string()),
            pod_ip: Some(ip.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn configmap(name: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Gather command output for a probed pod.
pub fn gather_output(installed: bool, db_exists: bool, up: bool, read_only: bool) -> String {
    let node_state = if db_exists {
        format!("{}|{}", if up { "UP" } else { "DOWN" }, if read_only { "t" } else { "f" })
    } else {
        String::new()
    };
    format!(
        "installed={installed}\ndbExists={db_exists}\nvnodeName=\nprocessRunning={db_exists}\nstartupComplete=true\nnodeState={node_state}\n"
    )
}

// ============================================================================
// FakeAccessor
// ============================================================================

#[derive(Default)]
pub struct FakeAccessor {
    cluster: Mutex<Option<DatabaseCluster>>,
    statefulsets: Mutex<BTreeMap<String, StatefulSet>>,
    pods: Mutex<BTreeMap<String, Pod>>,
    configmaps: Mutex<BTreeMap<String, ConfigMap>>,
    secrets: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    conflicts_to_inject: AtomicUsize,
    pub status_writes: AtomicUsize,
    pub spec_writes: AtomicUsize,
    pub pod_reads: AtomicUsize,
    pub deleted_pods: Mutex<Vec<String>>,
}

impl FakeAccessor {
    pub fn set_cluster(&self, cluster: DatabaseCluster) {
        *self.cluster.lock().unwrap() = Some(cluster);
    }

    pub fn cluster(&self) -> Option<DatabaseCluster> {
        self.cluster.lock().unwrap().clone()
    }

    pub fn add_statefulset(&self, name: &str, replicas: i32) {
        self.statefulsets
            .lock()
            .unwrap()
            .insert(name.to_string(), statefulset(name, replicas));
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().insert(pod.name_any(), pod);
    }

    pub fn add_configmap(&self, cm: ConfigMap) {
        self.configmaps.lock().unwrap().insert(cm.name_any(), cm);
    }

    pub fn configmap(&self, name: &str) -> Option<ConfigMap> {
        self.configmaps.lock().unwrap().get(name).cloned()
    }

    pub fn add_secret(&self, name: &str, key: &str, value: &str) {
        self.secrets
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Make the next `n` cluster writes fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts_to_inject.store(n, Ordering::SeqCst);
    }

    /// Simulate an external writer bumping the resource version.
    pub fn bump_resource_version(&self) {
        if let Some(c) = self.cluster.lock().unwrap().as_mut() {
            let next = next_version(c.resource_version());
            c.metadata.resource_version = Some(next);
        }
    }

    fn write(&self, cluster: &DatabaseCluster, status_only: bool) -> Result<DatabaseCluster, AccessError> {
        if self
            .conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AccessError::Conflict {
                kind: "DatabaseCluster",
                name: cluster.name_any(),
            });
        }

        let mut stored = self.cluster.lock().unwrap();
        let Some(current) = stored.as_mut() else {
            return Err(AccessError::Other(anyhow::anyhow!("not found")));
        };
        if current.resource_version() != cluster.resource_version() {
            return Err(AccessError::Conflict {
                kind: "DatabaseCluster",
                name: cluster.name_any(),
            });
        }
        if status_only {
            current.status.clone_from(&cluster.status);
        } else {
            current.spec = cluster.spec.clone();
            current.metadata.annotations.clone_from(&cluster.metadata.annotations);
        }
        current.metadata.resource_version = Some(next_version(current.resource_version()));
        Ok(current.clone())
    }
}

fn next_version(current: Option<String>) -> String {
    let n: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
    (n + 1).to_string()
}

#[async_trait]
impl ApiAccessor for FakeAccessor {
    async fn get_cluster(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<DatabaseCluster>, AccessError> {
        Ok(self.cluster())
    }

    async fn replace_cluster(
        &self,
        cluster: &DatabaseCluster,
    ) -> Result<DatabaseCluster, AccessError> {
        let updated = self.write(cluster, false)?;
        self.spec_writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn replace_cluster_status(
        &self,
        cluster: &DatabaseCluster,
    ) -> Result<DatabaseCluster, AccessError> {
        let updated = self.write(cluster, true)?;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn get_statefulset(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, AccessError> {
        Ok(self.statefulsets.lock().unwrap().get(name).cloned())
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<Option<Pod>, AccessError> {
        self.pod_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.pods.lock().unwrap().get(name).cloned())
    }

    async fn delete_pod(&self, _namespace: &str, name: &str) -> Result<(), AccessError> {
        self.pods.lock().unwrap().remove(name);
        self.deleted_pods.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn get_configmap(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, AccessError> {
        Ok(self.configmap(name))
    }

    async fn create_configmap(&self, _namespace: &str, cm: &ConfigMap) -> Result<(), AccessError> {
        self.configmaps
            .lock()
            .unwrap()
            .entry(cm.name_any())
            .or_insert_with(|| cm.clone());
        Ok(())
    }

    async fn annotate_configmap(
        &self,
        _namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), AccessError> {
        let mut cms = self.configmaps.lock().unwrap();
        let cm = cms
            .get_mut(name)
            .ok_or_else(|| AccessError::Other(anyhow::anyhow!("configmap {name} not found")))?;
        let annotations = cm.metadata.annotations.get_or_insert_with(BTreeMap::new);
        match value {
            Some(v) => {
                annotations.insert(key.to_string(), v.to_string());
            }
            None => {
                annotations.remove(key);
            }
        }
        Ok(())
    }

    async fn get_secret_value(
        &self,
        _namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, AccessError> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(name)
            .and_then(|s| s.get(key).cloned()))
    }
}

// ============================================================================
// FakeRunner
// ============================================================================

#[derive(Default)]
pub struct FakeRunner {
    outputs: Mutex<BTreeMap<String, ExecOutput>>,
    failing_pods: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
    inputs: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeRunner {
    /// Successful stdout for every command run in `pod`.
    pub fn set_output(&self, pod: &str, stdout: &str) {
        self.outputs.lock().unwrap().insert(
            pod.to_string(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                succeeded: true,
            },
        );
    }

    /// Every command run in `pod` exits non-zero with `stderr`.
    pub fn set_failure(&self, pod: &str, stderr: &str) {
        self.outputs.lock().unwrap().insert(
            pod.to_string(),
            ExecOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                succeeded: false,
            },
        );
    }

    /// Commands in `pod` cannot be run at all.
    pub fn fail_pod(&self, pod: &str) {
        self.failing_pods.lock().unwrap().push(pod.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, pod: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == pod)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Stdin of every command run in `pod`, in call order.
    pub fn inputs_for(&self, pod: &str) -> Vec<Option<String>> {
        self.inputs
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == pod)
            .map(|(_, i)| i.clone())
            .collect()
    }
}

#[async_trait]
impl PodRunner for FakeRunner {
    async fn exec_with_input(
        &self,
        _namespace: &str,
        pod: &str,
        _container: &str,
        command: Vec<String>,
        input: Option<String>,
    ) -> Result<ExecOutput, AccessError> {
        self.calls
            .lock()
            .unwrap()
            .push((pod.to_string(), command));
        self.inputs.lock().unwrap().push((pod.to_string(), input));
        if self.failing_pods.lock().unwrap().iter().any(|p| p == pod) {
            return Err(AccessError::Exec {
                pod: pod.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .unwrap_or(ExecOutput {
                succeeded: true,
                ..Default::default()
            }))
    }
}

// ============================================================================
// FakeRecorder
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

#[derive(Default)]
pub struct FakeRecorder {
    pub events: Mutex<Vec<RecordedEvent>>,
}

impl FakeRecorder {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }

    pub fn has(&self, reason: &str) -> bool {
        self.reasons().iter().any(|r| r == reason)
    }
}

#[async_trait]
impl EventRecorder for FakeRecorder {
    async fn event(&self, _cluster: &DatabaseCluster, type_: EventType, reason: &str, note: String) {
        self.events.lock().unwrap().push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

// ============================================================================
// FakeDispatcher
// ============================================================================

/// One recorded dispatcher call.
#[derive(Clone, Debug)]
pub enum Call {
    AddNode(AddNodeOptions),
    RemoveNode(RemoveNodeOptions),
    StartDb(StartDbOptions),
    StopDb(StopDbOptions),
    RestartNode(RestartNodeOptions),
    FetchNodeState(FetchNodeStateOptions),
    StartSubcluster(StartSubclusterOptions),
    StopSubcluster(StopSubclusterOptions),
    SandboxSubcluster(SandboxSubclusterOptions),
    AlterSubclusterType(AlterSubclusterTypeOptions),
    SetConfigParameter(SetConfigParameterOptions),
    SaveRestorePoint(SaveRestorePointOptions),
    CreateArchive(CreateArchiveOptions),
    ShowRestorePoints(ShowRestorePointsOptions),
    PromoteSandbox(PromoteSandboxOptions),
    RotateHttpsCerts(RotateHttpsCertsOptions),
}

impl Call {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::AddNode(_) => AddNodeOptions::OPERATION,
            Self::RemoveNode(_) => RemoveNodeOptions::OPERATION,
            Self::StartDb(_) => StartDbOptions::OPERATION,
            Self::StopDb(_) => StopDbOptions::OPERATION,
            Self::RestartNode(_) => RestartNodeOptions::OPERATION,
            Self::FetchNodeState(_) => FetchNodeStateOptions::OPERATION,
            Self::StartSubcluster(_) => StartSubclusterOptions::OPERATION,
            Self::StopSubcluster(_) => StopSubclusterOptions::OPERATION,
            Self::SandboxSubcluster(_) => SandboxSubclusterOptions::OPERATION,
            Self::AlterSubclusterType(_) => AlterSubclusterTypeOptions::OPERATION,
            Self::SetConfigParameter(_) => SetConfigParameterOptions::OPERATION,
            Self::SaveRestorePoint(_) => SaveRestorePointOptions::OPERATION,
            Self::CreateArchive(_) => CreateArchiveOptions::OPERATION,
            Self::ShowRestorePoints(_) => ShowRestorePointsOptions::OPERATION,
            Self::PromoteSandbox(_) => PromoteSandboxOptions::OPERATION,
            Self::RotateHttpsCerts(_) => RotateHttpsCertsOptions::OPERATION,
        }
    }
}

#[derive(Default)]
pub struct FakeDispatcher {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<BTreeMap<&'static str, VecDeque<AdminError>>>,
    node_states: Mutex<Vec<NodeState>>,
}

impl FakeDispatcher {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change the database, i.e. everything but queries.
    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::FetchNodeState(_) | Call::ShowRestorePoints(_)))
            .collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Make the next call of `operation` fail with `err`.
    pub fn fail_next(&self, operation: &'static str, err: AdminError) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(err);
    }

    pub fn set_node_states(&self, states: Vec<NodeState>) {
        *self.node_states.lock().unwrap() = states;
    }

    fn record(&self, call: Call) -> Result<(), AdminError> {
        let op = call.operation();
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    fn transport(&self) -> &'static str {
        "fake"
    }

    async fn add_node(&self, opts: AddNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::AddNode(opts))
    }

    async fn remove_node(&self, opts: RemoveNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::RemoveNode(opts))
    }

    async fn start_db(&self, opts: StartDbOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::StartDb(opts))
    }

    async fn stop_db(&self, opts: StopDbOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::StopDb(opts))
    }

    async fn restart_node(&self, opts: RestartNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::RestartNode(opts))
    }

    async fn fetch_node_state(
        &self,
        opts: FetchNodeStateOptions,
    ) -> Result<Vec<NodeState>, AdminError> {
        opts.validate()?;
        self.record(Call::FetchNodeState(opts))?;
        Ok(self.node_states.lock().unwrap().clone())
    }

    async fn start_subcluster(&self, opts: StartSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::StartSubcluster(opts))
    }

    async fn stop_subcluster(&self, opts: StopSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::StopSubcluster(opts))
    }

    async fn sandbox_subcluster(&self, opts: SandboxSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::SandboxSubcluster(opts))
    }

    async fn alter_subcluster_type(
        &self,
        opts: AlterSubclusterTypeOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::AlterSubclusterType(opts))
    }

    async fn set_config_parameter(
        &self,
        opts: SetConfigParameterOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::SetConfigParameter(opts))
    }

    async fn save_restore_point(&self, opts: SaveRestorePointOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::SaveRestorePoint(opts))
    }

    async fn create_archive(&self, opts: CreateArchiveOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::CreateArchive(opts))
    }

    async fn show_restore_points(
        &self,
        opts: ShowRestorePointsOptions,
    ) -> Result<Vec<RestorePoint>, AdminError> {
        opts.validate()?;
        self.record(Call::ShowRestorePoints(opts))?;
        Ok(Vec::new())
    }

    async fn promote_sandbox_to_main(
        &self,
        opts: PromoteSandboxOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::PromoteSandbox(opts))
    }

    async fn rotate_https_certs(&self, opts: RotateHttpsCertsOptions) -> Result<(), AdminError> {
        opts.validate()?;
        self.record(Call::RotateHttpsCerts(opts))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// All fakes wired into one [`ReconcileEnv`].
pub struct Harness {
    pub accessor: Arc<FakeAccessor>,
    pub runner: Arc<FakeRunner>,
    pub recorder: Arc<FakeRecorder>,
    pub dispatcher: Arc<FakeDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            accessor: Arc::new(FakeAccessor::default()),
            runner: Arc::new(FakeRunner::default()),
            recorder: Arc::new(FakeRecorder::default()),
            dispatcher: Arc::new(FakeDispatcher::default()),
        }
    }

    pub fn env(&self) -> Arc<ReconcileEnv> {
        Arc::new(ReconcileEnv {
            accessor: self.accessor.clone(),
            runner: self.runner.clone(),
            recorder: self.recorder.clone(),
            dispatcher: self.dispatcher.clone(),
        })
    }

    /// A main-cluster pass whose facts are already collected. The cluster is also
    /// stored in the fake API server.
    pub fn pass(&self, cluster: DatabaseCluster, facts: Vec<PodFact>) -> ReconcilePass {
        self.sandbox_pass(cluster, facts, crate::constants::MAIN_CLUSTER)
    }

    pub fn sandbox_pass(
        &self,
        cluster: DatabaseCluster,
        facts: Vec<PodFact>,
        sandbox: &str,
    ) -> ReconcilePass {
        self.accessor.set_cluster(cluster.clone());
        let version = cluster.resource_version();
        let mut pass = ReconcilePass::new(self.env(), cluster, sandbox);
        pass.facts.set_facts(facts, version);
        pass
    }
}
