// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-pass snapshot of database pod state.
//!
//! [`PodFacts`] is created empty at the start of a reconcile pass and shared by every
//! reconciler in the pipeline. Facts are collected lazily and at most once between two
//! invalidations:
//!
//! 1. [`PodFacts::collect`] walks every subcluster in the cache's sandbox scope, reads
//!    the statefulset replica count and the pods, and probes each running pod with a
//!    single gather command.
//! 2. A reconciler that changes cluster membership calls [`PodFacts::invalidate`].
//! 3. The next reconciler that needs facts calls `collect` again and gets fresh data.
//!
//! Facts that could not be observed are [`TriState::Unknown`]. Callers must treat
//! unknown as "requeue, do not act".

use crate::constants::{
    DB_CATALOG_PATH, DB_DATA_PATH, DB_PROCESS_NAME, INSTALL_INDICATOR_PATH, LABEL_TRANSIENT,
    MAIN_CLUSTER, SERVER_CONTAINER, SQL_CLIENT_PATH,
};
use crate::crd::{DatabaseCluster, Subcluster};
use crate::k8s::{ApiAccessor, PodRunner};
use anyhow::{Context, Result};
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A boolean fact that may not be observable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TriState {
    True,
    False,
    #[default]
    Unknown,
}

impl TriState {
    #[must_use]
    pub fn is_true(self) -> bool {
        self == Self::True
    }

    #[must_use]
    pub fn is_false(self) -> bool {
        self == Self::False
    }

    #[must_use]
    pub fn is_unknown(self) -> bool {
        self == Self::Unknown
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl fmt::Display for TriState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::True => "true",
            Self::False => "false",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Observed state of one database pod.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodFact {
    /// Pod name, `<statefulset>-<index>`
    pub name: String,
    pub subcluster: String,
    /// Sandbox the pod runs in, [`MAIN_CLUSTER`] for the main cluster
    pub sandbox: String,
    pub pod_index: i32,
    /// Fully qualified pod DNS name
    pub dns_name: String,
    pub pod_ip: Option<String>,

    /// Pod object exists in the API server
    pub exists: bool,
    /// Pod phase is `Running`
    pub is_pod_running: bool,
    /// Index is below the statefulset replica count
    pub managed_by_parent: bool,
    pub is_primary: bool,
    /// Index is at or beyond the desired subcluster size
    pub is_pending_delete: bool,
    /// Effective shutdown of the pod's subcluster
    pub shutdown: bool,
    pub is_transient: bool,

    pub installed: TriState,
    pub db_exists: TriState,
    pub up_node: TriState,
    pub read_only: TriState,
    pub startup_in_progress: TriState,

    /// Database node name, e.g. `v_analytics_node0001`
    pub vnode_name: String,
}

impl PodFact {
    /// Address admin commands use for this pod: its IP, or its DNS name before an IP
    /// is assigned.
    #[must_use]
    pub fn address(&self) -> String {
        self.pod_ip.clone().unwrap_or_else(|| self.dns_name.clone())
    }

    fn is_up(&self) -> bool {
        self.up_node.is_true()
    }

    fn is_writable_up(&self) -> bool {
        self.up_node.is_true() && self.read_only.is_false()
    }

    fn is_running_and_installed(&self) -> bool {
        self.is_pod_running && self.installed.is_true()
    }
}

/// Output of the in-pod gather command.
///
/// Each field is `None` when its line was missing or unparsable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatherState {
    pub installed: Option<bool>,
    pub db_exists: Option<bool>,
    pub vnode_name: Option<String>,
    pub process_running: Option<bool>,
    pub startup_complete: Option<bool>,
    /// First line of the node state query, `STATE|readonly`
    pub node_state: Option<String>,
}

impl GatherState {
    /// Parse `key=value` lines. Unknown keys are ignored.
    #[must_use]
    pub fn parse(output: &str) -> Self {
        let mut gs = Self::default();
        for line in output.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "installed" => gs.installed = parse_bool(value),
                "dbExists" => gs.db_exists = parse_bool(value),
                "vnodeName" if !value.is_empty() => gs.vnode_name = Some(value.to_string()),
                "processRunning" => gs.process_running = parse_bool(value),
                "startupComplete" => gs.startup_complete = parse_bool(value),
                "nodeState" if !value.is_empty() => gs.node_state = Some(value.to_string()),
                _ => {}
            }
        }
        gs
    }

    /// Interpret the node state column pair as `(up, read_only)`.
    #[must_use]
    pub fn node_up_and_read_only(&self) -> (bool, bool) {
        let Some(state) = self.node_state.as_deref() else {
            return (false, false);
        };
        let mut cols = state.split('|');
        let up = cols.next().is_some_and(|c| c.trim() == "UP");
        let read_only = cols.next().is_some_and(|c| c.trim() == "t");
        (up, up && read_only)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Shell script run in the server container to gather pod state in one exec.
#[must_use]
pub fn gather_script(db_name: &str) -> String {
    let db = db_name.to_lowercase();
    format!(
        r#"echo "installed=$(test -f {INSTALL_INDICATOR_PATH} && echo true || echo false)"
echo "dbExists=$(ls -d {DB_DATA_PATH}/{db}/v_{db}_node????_data >/dev/null 2>&1 && echo true || echo false)"
echo "vnodeName=$(cd {DB_DATA_PATH}/{db}/v_{db}_node????_data 2>/dev/null && basename "$(pwd)" | sed 's/_data$//')"
echo "processRunning=$(pgrep -x {DB_PROCESS_NAME} >/dev/null && echo true || echo false)"
echo "startupComplete=$(grep -q -e 'Startup Complete' -e 'Database Halted' {DB_CATALOG_PATH}/{db}/*_catalog/startup.log 2>/dev/null && echo true || echo false)"
echo "nodeState=$({SQL_CLIENT_PATH} -tAc "select node_state, is_readonly from nodes where node_name in (select node_name from current_session)" 2>/dev/null | head -1)"
"#
    )
}

/// Lazily collected pod facts for one sandbox scope of one cluster.
pub struct PodFacts {
    accessor: Arc<dyn ApiAccessor>,
    runner: Arc<dyn PodRunner>,
    sandbox: String,
    needs_collection: bool,
    collected_version: Option<String>,
    facts: Vec<PodFact>,
}

impl PodFacts {
    /// Create an empty cache for the main cluster.
    #[must_use]
    pub fn new(accessor: Arc<dyn ApiAccessor>, runner: Arc<dyn PodRunner>) -> Self {
        Self::for_sandbox(accessor, runner, MAIN_CLUSTER)
    }

    /// Create an empty cache scoped to one sandbox.
    #[must_use]
    pub fn for_sandbox(
        accessor: Arc<dyn ApiAccessor>,
        runner: Arc<dyn PodRunner>,
        sandbox: &str,
    ) -> Self {
        Self {
            accessor,
            runner,
            sandbox: sandbox.to_string(),
            needs_collection: true,
            collected_version: None,
            facts: Vec::new(),
        }
    }

    /// An independent, uncollected cache for another sandbox scope.
    #[must_use]
    pub fn copy_for_sandbox(&self, sandbox: &str) -> Self {
        Self::for_sandbox(self.accessor.clone(), self.runner.clone(), sandbox)
    }

    #[must_use]
    pub fn sandbox(&self) -> &str {
        &self.sandbox
    }

    #[must_use]
    pub fn needs_collection(&self) -> bool {
        self.needs_collection
    }

    /// Mark the cache dirty. Takes effect on the next [`Self::collect`].
    pub fn invalidate(&mut self) {
        self.needs_collection = true;
    }

    /// Collect facts if the cache is dirty.
    ///
    /// # Errors
    ///
    /// Returns an error when a statefulset or pod cannot be read from the API server.
    /// A pod that does not exist, or whose probe fails, does not fail the collection.
    pub async fn collect(&mut self, cluster: &DatabaseCluster) -> Result<()> {
        if !self.needs_collection {
            return Ok(());
        }
        let namespace = cluster.namespace().unwrap_or_default();
        debug!(
            namespace = %namespace,
            name = %cluster.name_any(),
            sandbox = %self.sandbox,
            "Collecting pod facts"
        );

        let mut facts = Vec::new();
        for subcluster in cluster.subclusters_in_scope(&self.sandbox) {
            self.collect_subcluster(cluster, &namespace, subcluster, &mut facts)
                .await?;
        }

        self.facts = facts;
        self.collected_version = cluster.resource_version();
        self.needs_collection = false;
        Ok(())
    }

    async fn collect_subcluster(
        &self,
        cluster: &DatabaseCluster,
        namespace: &str,
        subcluster: &Subcluster,
        facts: &mut Vec<PodFact>,
    ) -> Result<()> {
        let sts_name = cluster.statefulset_name(&subcluster.name);
        let sts = self
            .accessor
            .get_statefulset(namespace, &sts_name)
            .await
            .with_context(|| format!("failed to read statefulset {namespace}/{sts_name}"))?;
        let replicas = sts
            .as_ref()
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.replicas)
            .unwrap_or(0);

        for index in 0..subcluster.size.max(replicas) {
            let fact = self
                .collect_pod(cluster, namespace, subcluster, &sts_name, index, replicas)
                .await?;
            facts.push(fact);
        }
        Ok(())
    }

    async fn collect_pod(
        &self,
        cluster: &DatabaseCluster,
        namespace: &str,
        subcluster: &Subcluster,
        sts_name: &str,
        index: i32,
        replicas: i32,
    ) -> Result<PodFact> {
        let name = format!("{sts_name}-{index}");
        let mut fact = PodFact {
            dns_name: format!("{name}.{sts_name}.{namespace}.svc.cluster.local"),
            name,
            subcluster: subcluster.name.clone(),
            sandbox: self.sandbox.clone(),
            pod_index: index,
            managed_by_parent: index < replicas,
            is_primary: subcluster.r#type.is_primary(),
            is_pending_delete: index >= subcluster.size,
            shutdown: cluster.is_subcluster_shutdown(subcluster),
            vnode_name: default_vnode_name(cluster, subcluster, index),
            ..Default::default()
        };

        // Status counts give a baseline for pods that cannot be probed
        let scs = cluster
            .status
            .as_ref()
            .and_then(|s| s.subclusters.iter().find(|s| s.name == subcluster.name));
        fact.installed = scs.map_or(TriState::Unknown, |s| (s.install_count > index).into());
        fact.db_exists = scs.map_or(TriState::Unknown, |s| (s.added_to_db_count > index).into());
        fact.up_node = TriState::False;
        fact.read_only = TriState::False;
        fact.startup_in_progress = TriState::False;

        let pod = self
            .accessor
            .get_pod(namespace, &fact.name)
            .await
            .with_context(|| format!("failed to read pod {namespace}/{}", fact.name))?;
        let Some(pod) = pod else {
            return Ok(fact);
        };

        fact.exists = true;
        fact.is_pod_running = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Running");
        fact.pod_ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone());
        fact.is_transient = pod
            .labels()
            .get(LABEL_TRANSIENT)
            .is_some_and(|v| v == "true");

        if fact.is_pod_running {
            self.probe(cluster, namespace, &mut fact).await;
        }
        Ok(fact)
    }

    async fn probe(&self, cluster: &DatabaseCluster, namespace: &str, fact: &mut PodFact) {
        let command = vec![
            "bash".to_string(),
            "-c".to_string(),
            gather_script(&cluster.spec.db_name),
        ];
        let output = match self
            .runner
            .exec(namespace, &fact.name, SERVER_CONTAINER, command)
            .await
        {
            Ok(out) if out.succeeded => out,
            Ok(out) => {
                warn!(pod = %fact.name, stderr = %out.stderr, "Pod fact gather command failed");
                mark_unknown(fact);
                return;
            }
            Err(e) => {
                warn!(pod = %fact.name, error = %e, "Could not run pod fact gather command");
                mark_unknown(fact);
                return;
            }
        };

        apply_gather_state(fact, &GatherState::parse(&output.stdout));
    }

    /// Whether the cluster changed since the last collection.
    ///
    /// # Errors
    ///
    /// Returns an error when the cluster cannot be read.
    pub async fn has_cluster_changed_since_collection(
        &self,
        cluster: &DatabaseCluster,
    ) -> Result<bool> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let latest = self
            .accessor
            .get_cluster(&namespace, &name)
            .await
            .with_context(|| format!("failed to read DatabaseCluster {namespace}/{name}"))?;
        Ok(match latest {
            Some(latest) => latest.resource_version() != self.collected_version,
            None => true,
        })
    }

    /// Treat a cluster version written by this pass as the one the facts describe.
    ///
    /// Only status writes derived from these facts should be adopted; a spec change
    /// from elsewhere must still be detected.
    pub fn adopt_version(&mut self, cluster: &DatabaseCluster) {
        if !self.needs_collection {
            self.collected_version = cluster.resource_version();
        }
    }

    /// All facts, ordered by subcluster then pod index.
    #[must_use]
    pub fn all(&self) -> &[PodFact] {
        &self.facts
    }

    #[must_use]
    pub fn get(&self, pod_name: &str) -> Option<&PodFact> {
        self.facts.iter().find(|f| f.name == pod_name)
    }

    /// Facts of one subcluster with pod index in `[start, end]`.
    #[must_use]
    pub fn pods_in_range(&self, subcluster: &str, start: i32, end: i32) -> Vec<&PodFact> {
        self.facts
            .iter()
            .filter(|f| f.subcluster == subcluster && f.pod_index >= start && f.pod_index <= end)
            .collect()
    }

    /// First up pod, optionally restricted to a subcluster.
    #[must_use]
    pub fn find_first_up_pod(&self, allow_read_only: bool, subcluster: Option<&str>) -> Option<&PodFact> {
        self.facts.iter().find(|f| {
            subcluster.is_none_or(|sc| f.subcluster == sc)
                && f.is_up()
                && (allow_read_only || f.read_only.is_false())
        })
    }

    #[must_use]
    pub fn find_first_up_pod_ip(&self, allow_read_only: bool, subcluster: Option<&str>) -> Option<String> {
        self.find_first_up_pod(allow_read_only, subcluster)
            .and_then(|f| f.pod_ip.clone())
    }

    /// Best pod to run an admin command that needs a running database.
    ///
    /// Preference: up and writable and staying, up and writable, up, installed and running.
    #[must_use]
    pub fn find_pod_to_run_admin_cmd_any(&self) -> Option<&PodFact> {
        self.find_pod_to_run_admin_cmd_excluding(&[])
    }

    /// Same preference as [`Self::find_pod_to_run_admin_cmd_any`], never returning one
    /// of the `excluded` pods.
    #[must_use]
    pub fn find_pod_to_run_admin_cmd_excluding(&self, excluded: &[&str]) -> Option<&PodFact> {
        let candidates = || {
            self.facts
                .iter()
                .filter(move |f| !excluded.contains(&f.name.as_str()))
        };
        candidates()
            .find(|f| f.is_writable_up() && !f.is_pending_delete)
            .or_else(|| candidates().find(|f| f.is_writable_up()))
            .or_else(|| candidates().find(|f| f.is_up()))
            .or_else(|| candidates().find(|f| f.is_running_and_installed()))
    }

    /// Pod to run an admin command against a stopped database.
    #[must_use]
    pub fn find_pod_to_run_admin_cmd_offline(&self) -> Option<&PodFact> {
        self.facts
            .iter()
            .find(|f| f.is_running_and_installed() && f.up_node.is_false())
    }

    #[must_use]
    pub fn find_running_pod(&self) -> Option<&PodFact> {
        self.facts.iter().find(|f| f.is_pod_running)
    }

    /// Pods whose database process should be (re)started.
    ///
    /// # Arguments
    ///
    /// * `read_only` - Also return up pods that are read-only
    /// * `transient` - Include pods of transient subclusters
    /// * `pending_delete` - Include pods that are being scaled away
    #[must_use]
    pub fn find_restartable_pods(
        &self,
        read_only: bool,
        transient: bool,
        pending_delete: bool,
    ) -> Vec<&PodFact> {
        self.facts
            .iter()
            .filter(|f| transient || !f.is_transient)
            .filter(|f| pending_delete || !f.is_pending_delete)
            .filter(|f| {
                (f.up_node.is_false() || (read_only && f.read_only.is_true()))
                    && f.db_exists.is_true()
                    && f.is_pod_running
            })
            .collect()
    }

    /// Running pods of a subcluster that have no database yet.
    ///
    /// The flag is true when at least one such pod is not running.
    #[must_use]
    pub fn find_pods_with_missing_db(&self, subcluster: &str) -> (Vec<&PodFact>, bool) {
        let mut not_running = false;
        let pods = self
            .facts
            .iter()
            .filter(|f| f.subcluster == subcluster && f.db_exists.is_false())
            .inspect(|f| not_running |= !f.is_pod_running)
            .collect();
        (pods, not_running)
    }

    #[must_use]
    pub fn up_node_and_not_read_only_count(&self) -> usize {
        self.facts.iter().filter(|f| f.is_writable_up()).count()
    }

    #[must_use]
    pub fn up_node_count(&self) -> usize {
        self.facts.iter().filter(|f| f.is_up()).count()
    }

    #[must_use]
    pub fn subcluster_up_node_count(&self, subcluster: &str) -> usize {
        self.facts
            .iter()
            .filter(|f| f.subcluster == subcluster && f.is_up())
            .count()
    }

    #[must_use]
    pub fn count_running_and_installed(&self, subcluster: Option<&str>) -> usize {
        self.facts
            .iter()
            .filter(|f| subcluster.is_none_or(|sc| f.subcluster == sc))
            .filter(|f| f.is_running_and_installed())
            .count()
    }

    /// Installed pods the statefulset manages that are not running yet.
    #[must_use]
    pub fn count_not_restartable_pods(&self) -> usize {
        self.facts
            .iter()
            .filter(|f| f.installed.is_true() && f.managed_by_parent && !f.is_pod_running)
            .count()
    }

    /// First installed pod that is not running.
    #[must_use]
    pub fn any_installed_pod_not_running(&self) -> Option<&PodFact> {
        self.facts
            .iter()
            .find(|f| !f.is_pod_running && f.installed.is_true())
    }

    /// First pod the statefulset manages that does not exist or is not running.
    #[must_use]
    pub fn any_pods_not_running(&self) -> Option<&PodFact> {
        self.facts
            .iter()
            .find(|f| f.managed_by_parent && (!f.exists || !f.is_pod_running))
    }

    /// First writable up primary outside `subcluster`.
    #[must_use]
    pub fn find_up_primary_outside(&self, subcluster: &str) -> Option<&PodFact> {
        self.facts
            .iter()
            .find(|f| f.is_primary && f.is_writable_up() && f.subcluster != subcluster)
    }

    /// First running pod whose up state could not be observed.
    ///
    /// Such a pod may well be serving. Callers deciding that nothing is up must
    /// requeue instead while one exists.
    #[must_use]
    pub fn any_up_node_unknown(&self, subcluster: Option<&str>) -> Option<&PodFact> {
        self.facts
            .iter()
            .filter(|f| subcluster.is_none_or(|sc| f.subcluster == sc))
            .find(|f| f.is_pod_running && f.up_node.is_unknown())
    }

    /// First running pod whose installation state could not be observed.
    #[must_use]
    pub fn any_installed_unknown(&self) -> Option<&PodFact> {
        self.facts
            .iter()
            .find(|f| f.is_pod_running && f.installed.is_unknown())
    }

    #[must_use]
    pub fn all_pods_running_and_zero_installed(&self) -> bool {
        self.facts.iter().all(|f| {
            !((!f.exists || !f.is_pod_running) && f.managed_by_parent) && !f.installed.is_true()
        })
    }

    /// Whether a database exists on any primary pod.
    #[must_use]
    pub fn does_db_exist(&self) -> bool {
        self.facts
            .iter()
            .any(|f| f.is_primary && f.db_exists.is_true())
    }

    #[must_use]
    pub fn count_primaries(&self) -> usize {
        self.facts.iter().filter(|f| f.is_primary).count()
    }

    #[must_use]
    pub fn count_up_primaries(&self) -> usize {
        self.facts.iter().filter(|f| f.is_primary && f.is_up()).count()
    }

    /// Whether the database keeps quorum after `offset` more primaries go down.
    #[must_use]
    pub fn does_db_have_quorum(&self, offset: usize) -> bool {
        let up = self.count_up_primaries().saturating_sub(offset);
        2 * up > self.count_primaries()
    }

    /// Replace the collected facts as if collected at `resource_version`.
    #[cfg(test)]
    pub(crate) fn set_facts(&mut self, facts: Vec<PodFact>, resource_version: Option<String>) {
        self.facts = facts;
        self.collected_version = resource_version;
        self.needs_collection = false;
    }
}

fn mark_unknown(fact: &mut PodFact) {
    fact.installed = TriState::Unknown;
    fact.db_exists = TriState::Unknown;
    fact.up_node = TriState::Unknown;
    fact.read_only = TriState::Unknown;
    fact.startup_in_progress = TriState::Unknown;
}

fn apply_gather_state(fact: &mut PodFact, gs: &GatherState) {
    fact.installed = gs.installed.map_or(TriState::Unknown, TriState::from);
    fact.db_exists = gs.db_exists.map_or(TriState::Unknown, TriState::from);
    if let Some(vnode) = &gs.vnode_name {
        fact.vnode_name.clone_from(vnode);
    }

    let process_running = gs.process_running.unwrap_or(false);
    if fact.db_exists.is_unknown() || gs.process_running.is_none() {
        fact.up_node = TriState::Unknown;
        fact.read_only = TriState::Unknown;
        fact.startup_in_progress = TriState::Unknown;
        return;
    }
    if fact.db_exists.is_false() || !process_running {
        fact.up_node = TriState::False;
        fact.read_only = TriState::False;
        fact.startup_in_progress = TriState::False;
        return;
    }

    let (up, read_only) = gs.node_up_and_read_only();
    fact.up_node = up.into();
    fact.read_only = read_only.into();
    fact.startup_in_progress = (!up && !gs.startup_complete.unwrap_or(false)).into();
}

/// Node name a pod gets when the pod does not report one.
///
/// Nodes are numbered from 1 across subclusters in spec order.
fn default_vnode_name(cluster: &DatabaseCluster, subcluster: &Subcluster, index: i32) -> String {
    let offset: i32 = cluster
        .spec
        .subclusters
        .iter()
        .take_while(|sc| sc.name != subcluster.name)
        .map(|sc| sc.size)
        .sum();
    format!(
        "v_{}_node{:04}",
        cluster.spec.db_name.to_lowercase(),
        offset + index + 1
    )
}

#[cfg(test)]
#[path = "podfacts_tests.rs"]
mod podfacts_tests;
