// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-operation option structs for [`super::Dispatcher`].
//!
//! Every struct is built with `new(initiator)` followed by `with_*` calls and is
//! validated by the dispatcher before anything is sent to the database.

use super::Initiator;
use crate::admin_errors::AdminError;
use crate::constants::MAIN_CLUSTER;
use crate::crd::SubclusterType;

/// Generates the constructor, sandbox setter and validation entry point shared by
/// all option structs.
macro_rules! admin_options {
    ($name:ident, $op:literal) => {
        impl $name {
            /// Operation name used in logs, metrics and errors.
            pub const OPERATION: &'static str = $op;

            #[must_use]
            pub fn new(initiator: Initiator) -> Self {
                Self {
                    initiator,
                    sandbox: MAIN_CLUSTER.to_string(),
                    ..Default::default()
                }
            }

            /// Target a sandbox instead of the main cluster.
            #[must_use]
            pub fn with_sandbox(mut self, sandbox: impl Into<String>) -> Self {
                self.sandbox = sandbox.into();
                self
            }

            /// # Errors
            ///
            /// Returns [`AdminError::InvalidOptions`] when a required option is missing.
            pub fn validate(&self) -> Result<(), AdminError> {
                require($op, !self.initiator.pod.is_empty(), "initiator pod is not set")?;
                require($op, !self.initiator.address.is_empty(), "initiator address is not set")?;
                self.validate_specific()
            }
        }
    };
}

fn require(operation: &str, ok: bool, reason: &str) -> Result<(), AdminError> {
    if ok {
        Ok(())
    } else {
        Err(AdminError::InvalidOptions {
            operation: operation.to_string(),
            reason: reason.to_string(),
        })
    }
}

/// A database node addressed by name and IP.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeHost {
    pub vnode: String,
    pub address: String,
}

/// Add pods as database nodes to one subcluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddNodeOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub subcluster: String,
    /// Addresses of the pods to add
    pub hosts: Vec<String>,
}
admin_options!(AddNodeOptions, "add_node");

impl AddNodeOptions {
    #[must_use]
    pub fn with_subcluster(mut self, subcluster: impl Into<String>) -> Self {
        self.subcluster = subcluster.into();
        self
    }

    #[must_use]
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.hosts.is_empty(), "no hosts to add")?;
        require(Self::OPERATION, !self.subcluster.is_empty(), "subcluster is not set")
    }
}

/// Remove database nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoveNodeOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    /// Addresses of the pods to remove
    pub hosts: Vec<String>,
}
admin_options!(RemoveNodeOptions, "remove_node");

impl RemoveNodeOptions {
    #[must_use]
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.hosts.is_empty(), "no hosts to remove")?;
        require(
            Self::OPERATION,
            !self.hosts.contains(&self.initiator.address),
            "initiator is one of the hosts being removed",
        )
    }
}

/// Start a stopped database.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartDbOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub hosts: Vec<String>,
}
admin_options!(StartDbOptions, "start_db");

impl StartDbOptions {
    #[must_use]
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.hosts.is_empty(), "no hosts to start")
    }
}

/// Stop every node of the main cluster or of a sandbox.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StopDbOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub drain_seconds: Option<i32>,
}
admin_options!(StopDbOptions, "stop_db");

impl StopDbOptions {
    #[must_use]
    pub fn with_drain_seconds(mut self, drain_seconds: Option<i32>) -> Self {
        self.drain_seconds = drain_seconds;
        self
    }

    #[allow(clippy::unnecessary_wraps)]
    fn validate_specific(&self) -> Result<(), AdminError> {
        Ok(())
    }
}

/// Restart individual nodes of a running database.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestartNodeOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub hosts: Vec<NodeHost>,
}
admin_options!(RestartNodeOptions, "restart_node");

impl RestartNodeOptions {
    #[must_use]
    pub fn with_hosts(mut self, hosts: Vec<NodeHost>) -> Self {
        self.hosts = hosts;
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.hosts.is_empty(), "no nodes to restart")?;
        require(
            Self::OPERATION,
            self.hosts.iter().all(|h| !h.vnode.is_empty()),
            "node name missing for a host",
        )
    }
}

/// Query the database's view of node states.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchNodeStateOptions {
    pub initiator: Initiator,
    pub sandbox: String,
}
admin_options!(FetchNodeStateOptions, "fetch_node_state");

impl FetchNodeStateOptions {
    #[allow(clippy::unnecessary_wraps)]
    fn validate_specific(&self) -> Result<(), AdminError> {
        Ok(())
    }
}

/// Start every node of one subcluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartSubclusterOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub subcluster: String,
}
admin_options!(StartSubclusterOptions, "start_subcluster");

impl StartSubclusterOptions {
    #[must_use]
    pub fn with_subcluster(mut self, subcluster: impl Into<String>) -> Self {
        self.subcluster = subcluster.into();
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.subcluster.is_empty(), "subcluster is not set")
    }
}

/// Stop every node of one subcluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StopSubclusterOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub subcluster: String,
    /// Seconds to wait for sessions to drain; zero stops immediately
    pub drain_seconds: i32,
    /// Stop even when sessions are still active after draining
    pub force: bool,
}
admin_options!(StopSubclusterOptions, "stop_subcluster");

impl StopSubclusterOptions {
    #[must_use]
    pub fn with_subcluster(mut self, subcluster: impl Into<String>) -> Self {
        self.subcluster = subcluster.into();
        self
    }

    #[must_use]
    pub fn with_drain_seconds(mut self, drain_seconds: i32) -> Self {
        self.drain_seconds = drain_seconds;
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.subcluster.is_empty(), "subcluster is not set")?;
        require(Self::OPERATION, self.drain_seconds >= 0, "drain seconds must not be negative")
    }
}

/// Move a running subcluster of the main cluster into a sandbox.
///
/// `sandbox` names the destination; the initiator is a main cluster pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SandboxSubclusterOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub subcluster: String,
}
admin_options!(SandboxSubclusterOptions, "sandbox_subcluster");

impl SandboxSubclusterOptions {
    #[must_use]
    pub fn with_subcluster(mut self, subcluster: impl Into<String>) -> Self {
        self.subcluster = subcluster.into();
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.subcluster.is_empty(), "subcluster is not set")?;
        require(
            Self::OPERATION,
            self.sandbox != MAIN_CLUSTER,
            "destination sandbox is not set",
        )
    }
}

/// Promote or demote a subcluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlterSubclusterTypeOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub subcluster: String,
    pub new_type: SubclusterType,
}
admin_options!(AlterSubclusterTypeOptions, "alter_subcluster_type");

impl AlterSubclusterTypeOptions {
    #[must_use]
    pub fn with_subcluster(mut self, subcluster: impl Into<String>) -> Self {
        self.subcluster = subcluster.into();
        self
    }

    #[must_use]
    pub fn with_new_type(mut self, new_type: SubclusterType) -> Self {
        self.new_type = new_type;
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.subcluster.is_empty(), "subcluster is not set")?;
        require(
            Self::OPERATION,
            matches!(self.new_type, SubclusterType::Primary | SubclusterType::Secondary),
            "only primary and secondary are valid targets",
        )
    }
}

/// Set a database configuration parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetConfigParameterOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub parameter: String,
    pub value: String,
    /// Scope of the parameter, database level when unset
    pub level: Option<String>,
}
admin_options!(SetConfigParameterOptions, "set_config_parameter");

impl SetConfigParameterOptions {
    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameter = parameter.into();
        self.value = value.into();
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.parameter.is_empty(), "parameter name is not set")
    }
}

/// Save a restore point in an archive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveRestorePointOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub archive: String,
}
admin_options!(SaveRestorePointOptions, "save_restore_point");

impl SaveRestorePointOptions {
    #[must_use]
    pub fn with_archive(mut self, archive: impl Into<String>) -> Self {
        self.archive = archive.into();
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.archive.is_empty(), "archive is not set")
    }
}

/// Create a restore point archive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateArchiveOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub archive: String,
    /// Restore points kept in the archive, unlimited when unset
    pub num_restore_points: Option<u32>,
}
admin_options!(CreateArchiveOptions, "create_archive");

impl CreateArchiveOptions {
    #[must_use]
    pub fn with_archive(mut self, archive: impl Into<String>) -> Self {
        self.archive = archive.into();
        self
    }

    #[must_use]
    pub fn with_num_restore_points(mut self, limit: u32) -> Self {
        self.num_restore_points = Some(limit);
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.archive.is_empty(), "archive is not set")
    }
}

/// List restore points, optionally filtered by archive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShowRestorePointsOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub archive: Option<String>,
}
admin_options!(ShowRestorePointsOptions, "show_restore_points");

impl ShowRestorePointsOptions {
    #[must_use]
    pub fn with_archive(mut self, archive: impl Into<String>) -> Self {
        self.archive = Some(archive.into());
        self
    }

    #[allow(clippy::unnecessary_wraps)]
    fn validate_specific(&self) -> Result<(), AdminError> {
        Ok(())
    }
}

/// Promote a sandbox to become the main cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromoteSandboxOptions {
    pub initiator: Initiator,
    pub sandbox: String,
}
admin_options!(PromoteSandboxOptions, "promote_sandbox_to_main");

impl PromoteSandboxOptions {
    fn validate_specific(&self) -> Result<(), AdminError> {
        require(
            Self::OPERATION,
            self.sandbox != MAIN_CLUSTER,
            "the main cluster cannot be promoted",
        )
    }
}

/// Switch the HTTPS endpoint certificate to the one in a secret.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotateHttpsCertsOptions {
    pub initiator: Initiator,
    pub sandbox: String,
    pub secret: String,
    pub tls_mode: String,
}
admin_options!(RotateHttpsCertsOptions, "rotate_https_certs");

impl RotateHttpsCertsOptions {
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    #[must_use]
    pub fn with_tls_mode(mut self, tls_mode: impl Into<String>) -> Self {
        self.tls_mode = tls_mode.into();
        self
    }

    fn validate_specific(&self) -> Result<(), AdminError> {
        require(Self::OPERATION, !self.secret.is_empty(), "secret is not set")?;
        require(Self::OPERATION, !self.tls_mode.is_empty(), "tls mode is not set")
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod options_tests;
