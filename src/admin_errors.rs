// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error taxonomy for administrative commands.
//!
//! Admin commands fail with free-form text, either an HTTP response body from the
//! node-management endpoint or the output of the legacy admin CLI. Reconcilers
//! only need to tell a handful of failures apart, so the text is classified into
//! [`AdminError`] once, at the dispatcher boundary:
//!
//! - **Known domain failures** (license limit, nodes not down, disk full, ...) get a
//!   specific, intentional outcome in the calling reconciler.
//! - **Transport failures** (endpoint unreachable, timeout) are requeued.
//! - **Everything else** is [`AdminError::CommandFailed`] and aborts the pass.

use thiserror::Error;

/// Errors returned by [`crate::dispatcher::Dispatcher`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// The license does not allow more nodes. Retrying cannot help.
    #[error("license limit reached: {message}")]
    LicenseLimit { message: String },

    /// A restart was requested for nodes that are not all down.
    #[error("not all requested nodes are down: {message}")]
    NodesNotDown { message: String },

    /// A node ran out of disk space while running the command.
    #[error("no space left on device: {message}")]
    DiskFull { message: String },

    /// Create-db was pointed at a communal location that already holds data.
    #[error("communal location is not empty: {message}")]
    CommunalPathNotEmpty { message: String },

    /// Object storage was accessed with the wrong region.
    #[error("communal storage accessed with the wrong region: {message}")]
    WrongRegion { message: String },

    /// A configuration parameter passed to the database was rejected.
    #[error("invalid configuration parameter: {message}")]
    InvalidConfigParameter { message: String },

    /// Kerberos authentication failed.
    #[error("kerberos authentication failed: {message}")]
    Kerberos { message: String },

    /// Another cluster still holds the lease on the communal location.
    #[error("cluster lease on communal storage has not expired: {message}")]
    ClusterLeaseNotExpired { message: String },

    /// The database could not be found in communal storage.
    #[error("database not found in communal storage: {message}")]
    DatabaseNotFound { message: String },

    /// Permission was denied while accessing storage.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Node count in the request does not match the catalog.
    #[error("node count mismatch: {message}")]
    NodeCountMismatch { message: String },

    /// The admin endpoint could not be reached or did not answer in time.
    #[error("admin endpoint unreachable: {message}")]
    Transport { message: String },

    /// The operation was built without a required option.
    #[error("invalid {operation} options: {reason}")]
    InvalidOptions {
        /// Operation name, e.g. `add_node`
        operation: String,
        /// What is missing or wrong
        reason: String,
    },

    /// Any failure not recognised above.
    #[error("admin command failed: {message}")]
    CommandFailed { message: String },
}

impl AdminError {
    /// Classify the text of a failed admin command.
    ///
    /// Matching is substring based and case sensitive, mirroring the exact wording the
    /// database tools emit.
    ///
    /// # Arguments
    ///
    /// * `message` - Response body or combined command output
    ///
    /// # Returns
    ///
    /// The most specific category that matches, or [`AdminError::CommandFailed`].
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let message_owned = message.trim().to_string();
        let m = message;
        if m.contains("Cannot create another node. The current license permits") {
            Self::LicenseLimit {
                message: message_owned,
            }
        } else if m.contains("All nodes in the input are not down, can't restart") {
            Self::NodesNotDown {
                message: message_owned,
            }
        } else if m.contains("[Errno 28] No space left on device") {
            Self::DiskFull {
                message: message_owned,
            }
        } else if m.contains("Communal location [") && m.contains("] is not empty") {
            Self::CommunalPathNotEmpty {
                message: message_owned,
            }
        } else if m.contains("using the wrong region")
            || (m.contains("the region '") && m.contains("is wrong; expecting"))
        {
            Self::WrongRegion {
                message: message_owned,
            }
        } else if m.contains("Invalid configuration parameter")
            && m.contains("aborting configuration change")
        {
            Self::InvalidConfigParameter {
                message: message_owned,
            }
        } else if m.contains("An error occurred during kerberos authentication") {
            Self::Kerberos {
                message: message_owned,
            }
        } else if m.contains("might still be in use") && m.contains("cluster lease will expire") {
            Self::ClusterLeaseNotExpired {
                message: message_owned,
            }
        } else if m.contains("Could not copy file") && is_missing_file_text(m) {
            Self::DatabaseNotFound {
                message: message_owned,
            }
        } else if m.contains("Permission Denied") {
            Self::PermissionDenied {
                message: message_owned,
            }
        } else if m.contains("Error: Node count mismatch")
            || m.contains("Error: Primary node count mismatch")
        {
            Self::NodeCountMismatch {
                message: message_owned,
            }
        } else {
            Self::CommandFailed {
                message: message_owned,
            }
        }
    }

    /// Short, stable label for metrics and event reasons.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::LicenseLimit { .. } => "license_limit",
            Self::NodesNotDown { .. } => "nodes_not_down",
            Self::DiskFull { .. } => "disk_full",
            Self::CommunalPathNotEmpty { .. } => "communal_path_not_empty",
            Self::WrongRegion { .. } => "wrong_region",
            Self::InvalidConfigParameter { .. } => "invalid_config_parameter",
            Self::Kerberos { .. } => "kerberos",
            Self::ClusterLeaseNotExpired { .. } => "cluster_lease_not_expired",
            Self::DatabaseNotFound { .. } => "database_not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::NodeCountMismatch { .. } => "node_count_mismatch",
            Self::Transport { .. } => "transport",
            Self::InvalidOptions { .. } => "invalid_options",
            Self::CommandFailed { .. } => "command_failed",
        }
    }

    /// Whether the failure is one the reconcilers recognise and handle without
    /// aborting the pass.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(
            self,
            Self::CommandFailed { .. } | Self::InvalidOptions { .. }
        )
    }
}

fn is_missing_file_text(m: &str) -> bool {
    m.contains("No such file or directory")
        || m.contains("FileNotFoundException")
        || m.contains("File not found")
        || m.contains("blob does not exist")
}
