// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Administrative command surface of the managed database.
//!
//! Reconcilers depend only on the [`Dispatcher`] trait. Two transports implement it:
//!
//! - [`HttpDispatcher`] - JSON over HTTPS to the node-management endpoint of the
//!   initiator pod (default).
//! - [`ExecDispatcher`] - the legacy admin CLI run inside the initiator pod.
//!
//! The transport is chosen per cluster by the `dbop.firestoned.io/admin-transport`
//! annotation in [`build_dispatcher`]. Reconcilers never branch on it.
//!
//! Calls may take minutes. The reconcile engine serializes them: one pass per
//! cluster, one action at a time.

pub mod exec;
pub mod http;
pub mod options;

pub use exec::ExecDispatcher;
pub use http::{AdminCredentials, CertVerification, HttpDispatcher};
pub use options::*;

use crate::admin_errors::AdminError;
use crate::constants::{
    ADMIN_TRANSPORT_EXEC, ANNOTATION_ADMIN_TRANSPORT, SUPERUSER_NAME, SUPERUSER_PASSWORD_KEY,
    TLS_CA_KEY, TLS_CONFIG_HTTPS,
};
use crate::crd::DatabaseCluster;
use crate::k8s::{ApiAccessor, PodRunner};
use crate::podfacts::PodFact;
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Pod an admin command is sent to or run in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Initiator {
    /// Pod name, used by the exec transport
    pub pod: String,
    /// Pod IP, or DNS name when no IP is assigned yet
    pub address: String,
}

impl Initiator {
    #[must_use]
    pub fn new(pod: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            address: address.into(),
        }
    }
}

impl From<&PodFact> for Initiator {
    fn from(fact: &PodFact) -> Self {
        Self {
            pod: fact.name.clone(),
            address: fact.address(),
        }
    }
}

/// The database's view of one node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub name: String,
    pub address: String,
    /// `UP`, `DOWN`, `INITIALIZING`, ...
    pub state: String,
}

impl NodeState {
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.state == "UP"
    }
}

/// One restore point of an archive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePoint {
    pub archive: String,
    pub id: String,
    pub index: u32,
    pub timestamp: String,
}

/// Administrative operations on the database.
///
/// Every method validates its options first and fails with
/// [`AdminError::InvalidOptions`] without contacting the database when they are
/// incomplete. Failures reported by the database are classified with
/// [`AdminError::classify`].
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Transport name, `http` or `exec`.
    fn transport(&self) -> &'static str;

    async fn add_node(&self, opts: AddNodeOptions) -> Result<(), AdminError>;

    async fn remove_node(&self, opts: RemoveNodeOptions) -> Result<(), AdminError>;

    async fn start_db(&self, opts: StartDbOptions) -> Result<(), AdminError>;

    async fn stop_db(&self, opts: StopDbOptions) -> Result<(), AdminError>;

    async fn restart_node(&self, opts: RestartNodeOptions) -> Result<(), AdminError>;

    async fn fetch_node_state(
        &self,
        opts: FetchNodeStateOptions,
    ) -> Result<Vec<NodeState>, AdminError>;

    async fn start_subcluster(&self, opts: StartSubclusterOptions) -> Result<(), AdminError>;

    async fn stop_subcluster(&self, opts: StopSubclusterOptions) -> Result<(), AdminError>;

    async fn sandbox_subcluster(&self, opts: SandboxSubclusterOptions) -> Result<(), AdminError>;

    async fn alter_subcluster_type(
        &self,
        opts: AlterSubclusterTypeOptions,
    ) -> Result<(), AdminError>;

    async fn set_config_parameter(
        &self,
        opts: SetConfigParameterOptions,
    ) -> Result<(), AdminError>;

    async fn save_restore_point(&self, opts: SaveRestorePointOptions) -> Result<(), AdminError>;

    async fn create_archive(&self, opts: CreateArchiveOptions) -> Result<(), AdminError>;

    async fn show_restore_points(
        &self,
        opts: ShowRestorePointsOptions,
    ) -> Result<Vec<RestorePoint>, AdminError>;

    async fn promote_sandbox_to_main(&self, opts: PromoteSandboxOptions)
        -> Result<(), AdminError>;

    async fn rotate_https_certs(&self, opts: RotateHttpsCertsOptions) -> Result<(), AdminError>;
}

/// Build the dispatcher selected by the cluster's transport annotation.
///
/// # Arguments
///
/// * `cluster` - Cluster the commands target
/// * `accessor` - Used to read the superuser password secret
/// * `runner` - Used by the exec transport
/// * `timeout` - Upper bound for one admin command
///
/// # Errors
///
/// Returns an error if the password secret cannot be read or the HTTP client cannot be
/// built.
pub async fn build_dispatcher(
    cluster: &DatabaseCluster,
    accessor: &dyn ApiAccessor,
    runner: Arc<dyn PodRunner>,
    timeout: Duration,
) -> Result<Arc<dyn Dispatcher>> {
    let namespace = cluster.namespace().unwrap_or_default();
    let password = match &cluster.spec.superuser_password_secret {
        Some(secret) => accessor
            .get_secret_value(&namespace, secret, SUPERUSER_PASSWORD_KEY)
            .await
            .with_context(|| format!("failed to read superuser secret {namespace}/{secret}"))?
            .unwrap_or_default(),
        None => String::new(),
    };

    let transport = cluster
        .annotations()
        .get(ANNOTATION_ADMIN_TRANSPORT)
        .map(String::as_str);
    if transport == Some(ADMIN_TRANSPORT_EXEC) {
        return Ok(Arc::new(ExecDispatcher::new(
            runner,
            &namespace,
            &cluster.spec.db_name,
            password,
        )));
    }

    let credentials = AdminCredentials {
        username: SUPERUSER_NAME.to_string(),
        password,
    };
    let verification = cert_verification(cluster, accessor, &namespace).await?;
    let dispatcher = HttpDispatcher::new(
        "https",
        cluster.admin_port(),
        &cluster.spec.db_name,
        credentials,
        timeout,
        &verification,
    )?;
    Ok(Arc::new(dispatcher))
}

/// Certificate checks for the admin endpoint.
///
/// The TLS config recorded as in use wins over the spec, since the endpoint keeps
/// serving it until a rotation completes. Verifying modes trust the `ca.crt` of its
/// secret when present.
///
/// # Errors
///
/// Returns an error if the TLS secret cannot be read.
pub async fn cert_verification(
    cluster: &DatabaseCluster,
    accessor: &dyn ApiAccessor,
    namespace: &str,
) -> Result<CertVerification> {
    let (secret, mode) = match (
        cluster.tls_config_status(TLS_CONFIG_HTTPS),
        &cluster.spec.https_tls,
    ) {
        (Some(in_use), _) => (in_use.secret.as_str(), in_use.mode.as_str()),
        (None, Some(tls)) => (tls.secret.as_str(), tls.mode.as_str()),
        (None, None) => return Ok(CertVerification::AcceptAny),
    };
    let verification = CertVerification::for_mode(Some(mode));
    if !verification.verifies() || secret.is_empty() {
        return Ok(verification);
    }
    let ca_pem = accessor
        .get_secret_value(namespace, secret, TLS_CA_KEY)
        .await
        .with_context(|| format!("failed to read TLS secret {namespace}/{secret}"))?;
    Ok(verification.with_ca(ca_pem))
}
