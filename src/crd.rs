// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for database cluster management.
//!
//! This module defines the [`DatabaseCluster`] custom resource: the desired shape of a
//! sharded database (subclusters, sandboxes, restart and TLS policy) together with the
//! observed state the operator records in its status subresource.
//!
//! # Resource Layout
//!
//! - **Spec** - owned by the user. Reconcilers only change it through
//!   [`crate::reconcilers::status::update_spec_with_retry`], never in place.
//! - **Status** - owned by the operator. Every mutation goes through
//!   [`crate::reconcilers::status::update_status_with_retry`].
//!
//! # Example
//!
//! ```rust,no_run
//! use dbop::crd::{DatabaseClusterSpec, Subcluster, SubclusterType};
//!
//! let spec = DatabaseClusterSpec {
//!     db_name: "analytics".to_string(),
//!     subclusters: vec![Subcluster {
//!         name: "sc1".to_string(),
//!         r#type: SubclusterType::Primary,
//!         size: 3,
//!         shutdown: false,
//!         drain_seconds: None,
//!     }],
//!     ..Default::default()
//! };
//! ```

use crate::constants::{DEFAULT_ADMIN_PORT, DEFAULT_KSAFETY, MAIN_CLUSTER};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Condition represents an observation of a resource's current state.
///
/// Conditions are keyed by `type`; the operator keeps at most one entry per type.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `RestartNeeded`, `TlsCertRollbackNeeded`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Role a subcluster plays in the database.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubclusterType {
    /// Counts toward quorum in the main cluster.
    #[default]
    Primary,
    /// Compute-only, never counts toward quorum.
    Secondary,
    /// Primary subcluster of a sandbox.
    #[serde(rename = "sandboxprimary")]
    SandboxPrimary,
    /// Short-lived subcluster used during online upgrade.
    Transient,
}

impl SubclusterType {
    /// Whether nodes of this subcluster vote in quorum decisions.
    #[must_use]
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Primary | Self::SandboxPrimary)
    }
}

/// A named, independently sized group of database nodes.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Subcluster {
    /// Subcluster name, unique within the cluster. Also used in the statefulset name.
    #[schemars(regex(pattern = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$"))]
    pub name: String,

    /// Subcluster role.
    #[serde(default)]
    pub r#type: SubclusterType,

    /// Desired number of pods.
    #[schemars(range(min = 0))]
    pub size: i32,

    /// When true the subcluster should be stopped and kept down.
    #[serde(default)]
    pub shutdown: bool,

    /// Seconds to wait for client sessions to drain before stopping the subcluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_seconds: Option<i32>,
}

/// Reference to a subcluster from a sandbox definition.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct SubclusterRef {
    /// Name of a subcluster listed in `spec.subclusters`.
    pub name: String,
}

/// An isolated group of subclusters with its own lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSpec {
    /// Sandbox name.
    pub name: String,

    /// Subclusters that belong to this sandbox.
    #[serde(default)]
    pub subclusters: Vec<SubclusterRef>,

    /// When true every subcluster in the sandbox should be stopped.
    #[serde(default)]
    pub shutdown: bool,
}

/// Liveness probe timing used to pace requeues while nodes come back.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSettings {
    /// How often the probe runs.
    pub period_seconds: i32,
    /// Failures tolerated before the container is restarted.
    pub failure_threshold: i32,
}

/// HTTPS certificate configuration of the admin endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpsTlsSpec {
    /// Secret holding the certificate the endpoint should serve.
    pub secret: String,

    /// TLS mode, e.g. `enable`, `try_verify`, `verify_ca`.
    #[serde(default = "default_tls_mode")]
    pub mode: String,

    /// Roll back to the in-use certificate when a rotation fails.
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
}

/// Desired state of a database cluster.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "dbop.firestoned.io",
    version = "v1beta1",
    kind = "DatabaseCluster",
    namespaced,
    shortname = "dbc",
    doc = "DatabaseCluster describes a sharded analytic database: its subclusters, sandboxes, restart policy and admin endpoint TLS."
)]
#[kube(status = "DatabaseClusterStatus")]
#[kube(derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterSpec {
    /// Database name.
    pub db_name: String,

    /// Ordered list of subclusters.
    #[serde(default)]
    pub subclusters: Vec<Subcluster>,

    /// Sandboxes carved out of the subclusters above.
    #[serde(default)]
    pub sandboxes: Vec<SandboxSpec>,

    /// Number of node failures the database tolerates (0 or 1).
    #[serde(default = "default_ksafety")]
    #[schemars(range(min = 0, max = 1))]
    pub k_safety: u8,

    /// Restart database processes that went down.
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// Stop the main cluster.
    #[serde(default)]
    pub shutdown: bool,

    /// Liveness probe timings of the database container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ProbeSettings>,

    /// HTTPS certificate of the admin endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_tls: Option<HttpsTlsSpec>,

    /// Port of the node-management endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_port: Option<u16>,

    /// Secret with the superuser password under the `password` key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superuser_password_secret: Option<String>,
}

/// Observed per-pod detail kept in subcluster status.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodStatusDetail {
    pub pod_name: String,
    pub installed: bool,
    pub added_to_db: bool,
    pub up_node: bool,
    pub read_only: bool,
}

/// Observed state of one subcluster.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubclusterStatus {
    pub name: String,
    #[serde(default)]
    pub install_count: i32,
    #[serde(default)]
    pub added_to_db_count: i32,
    #[serde(default)]
    pub up_node_count: i32,
    #[serde(default)]
    pub shutdown: bool,
    #[serde(default)]
    pub detail: Vec<PodStatusDetail>,
}

/// Observed state of one sandbox.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SandboxStatus {
    pub name: String,
    #[serde(default)]
    pub subclusters: Vec<String>,
    #[serde(default)]
    pub shutdown: bool,
}

/// TLS material currently in use by a database endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfigStatus {
    /// Endpoint name, e.g. `https`.
    pub name: String,
    pub secret: String,
    pub mode: String,
}

/// `DatabaseCluster` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterStatus {
    #[serde(default)]
    pub subclusters: Vec<SubclusterStatus>,
    #[serde(default)]
    pub sandboxes: Vec<SandboxStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub tls_configs: Vec<TlsConfigStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

fn default_true() -> bool {
    true
}

fn default_ksafety() -> u8 {
    DEFAULT_KSAFETY
}

fn default_tls_mode() -> String {
    "try_verify".to_string()
}

impl DatabaseCluster {
    /// Name of the statefulset backing a subcluster.
    #[must_use]
    pub fn statefulset_name(&self, subcluster: &str) -> String {
        format!("{}-{}", self.name_any(), subcluster)
    }

    /// Name of the ConfigMap that drives the sandbox controller.
    #[must_use]
    pub fn sandbox_configmap_name(&self, sandbox: &str) -> String {
        format!("{}-{}", self.name_any(), sandbox)
    }

    #[must_use]
    pub fn find_subcluster(&self, name: &str) -> Option<&Subcluster> {
        self.spec.subclusters.iter().find(|sc| sc.name == name)
    }

    #[must_use]
    pub fn sandbox_spec(&self, name: &str) -> Option<&SandboxSpec> {
        self.spec.sandboxes.iter().find(|sb| sb.name == name)
    }

    #[must_use]
    pub fn sandbox_status(&self, name: &str) -> Option<&SandboxStatus> {
        self.status
            .as_ref()
            .and_then(|s| s.sandboxes.iter().find(|sb| sb.name == name))
    }

    /// Map of subcluster name to the sandbox it is assigned to in the spec.
    #[must_use]
    pub fn subcluster_sandbox_spec_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for sb in &self.spec.sandboxes {
            for sc in &sb.subclusters {
                map.insert(sc.name.clone(), sb.name.clone());
            }
        }
        map
    }

    /// Map of subcluster name to the sandbox it was last observed in.
    #[must_use]
    pub fn subcluster_sandbox_status_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(status) = &self.status {
            for sb in &status.sandboxes {
                for sc in &sb.subclusters {
                    map.insert(sc.clone(), sb.name.clone());
                }
            }
        }
        map
    }

    /// Sandbox a subcluster currently runs in, by observed status.
    ///
    /// Returns [`MAIN_CLUSTER`] for subclusters outside any sandbox.
    #[must_use]
    pub fn observed_sandbox_of(&self, subcluster: &str) -> String {
        self.subcluster_sandbox_status_map()
            .remove(subcluster)
            .unwrap_or_else(|| MAIN_CLUSTER.to_string())
    }

    /// Subclusters that run in the given sandbox scope, in spec order.
    ///
    /// Membership follows the observed status so that a subcluster that is being moved
    /// is still handled by the scope it currently runs in.
    #[must_use]
    pub fn subclusters_in_scope(&self, sandbox: &str) -> Vec<&Subcluster> {
        let status_map = self.subcluster_sandbox_status_map();
        self.spec
            .subclusters
            .iter()
            .filter(|sc| {
                status_map
                    .get(&sc.name)
                    .map_or(sandbox == MAIN_CLUSTER, |sb| sb == sandbox)
            })
            .collect()
    }

    /// Whether a subcluster should be down, either by itself or through its sandbox.
    #[must_use]
    pub fn is_subcluster_shutdown(&self, subcluster: &Subcluster) -> bool {
        if subcluster.shutdown {
            return true;
        }
        self.spec.sandboxes.iter().any(|sb| {
            sb.shutdown && sb.subclusters.iter().any(|r| r.name == subcluster.name)
        })
    }

    #[must_use]
    pub fn find_condition(&self, condition_type: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.r#type == condition_type))
    }

    #[must_use]
    pub fn is_condition_true(&self, condition_type: &str) -> bool {
        self.find_condition(condition_type)
            .is_some_and(|c| c.status == "True")
    }

    #[must_use]
    pub fn admin_port(&self) -> u16 {
        self.spec.admin_port.unwrap_or(DEFAULT_ADMIN_PORT)
    }

    /// TLS config currently in use for an endpoint, as recorded in status.
    #[must_use]
    pub fn tls_config_status(&self, name: &str) -> Option<&TlsConfigStatus> {
        self.status
            .as_ref()
            .and_then(|s| s.tls_configs.iter().find(|c| c.name == name))
    }
}
