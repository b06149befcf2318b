// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the dbop operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all dbop CRDs
pub const API_GROUP: &str = "dbop.firestoned.io";

/// API version for all dbop CRDs
pub const API_VERSION: &str = "v1beta1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "dbop.firestoned.io/v1beta1";

/// Kind name for `DatabaseCluster` resource
pub const KIND_DATABASE_CLUSTER: &str = "DatabaseCluster";

/// Field manager / event reporter name
pub const FIELD_MANAGER: &str = "dbop-controller";

// ============================================================================
// Labels and Annotations
// ============================================================================

/// Selects the admin transport: `http` (default) or `exec` for the legacy admin CLI
pub const ANNOTATION_ADMIN_TRANSPORT: &str = "dbop.firestoned.io/admin-transport";

/// Overrides the requeue delay (seconds) of an aborted reconcile pass
pub const ANNOTATION_REQUEUE_TIME: &str = "dbop.firestoned.io/requeue-time";

/// Written on a sandbox ConfigMap to wake the sandbox controller for a shutdown change
pub const ANNOTATION_SANDBOX_SHUTDOWN_TRIGGER: &str = "dbop.firestoned.io/sandbox-shutdown-trigger";

/// Label marking sandbox ConfigMaps watched by the sandbox controller
pub const LABEL_SANDBOX_CONFIGMAP: &str = "dbop.firestoned.io/sandbox-configmap";

/// ConfigMap data key holding the owning `DatabaseCluster` name
pub const CONFIGMAP_KEY_CLUSTER_NAME: &str = "clusterName";

/// ConfigMap data key holding the sandbox name
pub const CONFIGMAP_KEY_SANDBOX_NAME: &str = "sandboxName";

/// Pod label marking pods of a transient (online upgrade) subcluster
pub const LABEL_TRANSIENT: &str = "dbop.firestoned.io/transient";

/// Admin transport value selecting the HTTP node-management endpoint
pub const ADMIN_TRANSPORT_HTTP: &str = "http";

/// Admin transport value selecting the legacy in-pod admin CLI
pub const ADMIN_TRANSPORT_EXEC: &str = "exec";

// ============================================================================
// Cluster Layout
// ============================================================================

/// Sandbox name used for the main cluster
pub const MAIN_CLUSTER: &str = "";

/// Default k-safety when the spec omits it
pub const DEFAULT_KSAFETY: u8 = 1;

/// Container running the database process
pub const SERVER_CONTAINER: &str = "server";

/// File whose presence marks a pod as installed
pub const INSTALL_INDICATOR_PATH: &str = "/opt/db/config/dbop-installed";

/// Root of the local database data directories
pub const DB_DATA_PATH: &str = "/data";

/// Local catalog root holding the startup log
pub const DB_CATALOG_PATH: &str = "/catalog";

/// Name of the database server process
pub const DB_PROCESS_NAME: &str = "dbserver";

/// SQL client inside the server container
pub const SQL_CLIENT_PATH: &str = "/opt/db/bin/dbsql";

/// Legacy admin CLI inside the server container
pub const ADMIN_CLI_PATH: &str = "/opt/db/bin/admintools";

/// Superuser account used for admin commands
pub const SUPERUSER_NAME: &str = "dbadmin";

/// Key of the password inside the superuser secret
pub const SUPERUSER_PASSWORD_KEY: &str = "password";

/// Key of the CA bundle inside a TLS secret
pub const TLS_CA_KEY: &str = "ca.crt";

/// Endpoint name of the HTTPS admin TLS config in status
pub const TLS_CONFIG_HTTPS: &str = "https";

// ============================================================================
// Timing Constants
// ============================================================================

/// Fixed requeue delay for "try again shortly" outcomes
pub const REQUEUE_WAIT_SECS: u64 = 10;

/// Delay used for a plain requeue signal
pub const REQUEUE_SOON_SECS: u64 = 1;

/// Periodic resync of a healthy cluster (5 minutes)
pub const RESYNC_INTERVAL_SECS: u64 = 300;

/// Requeue delay after a failed reconcile pass
pub const ERROR_REQUEUE_SECS: u64 = 30;

/// Share of the liveness window waited before checking restarted nodes again
pub const LIVENESS_WAIT_FRACTION: f64 = 0.25;

/// Default node-management port
pub const DEFAULT_ADMIN_PORT: u16 = 8443;

/// Upper bound for a single admin command (10 minutes)
pub const DEFAULT_ADMIN_TIMEOUT_SECS: u64 = 600;

/// Attempts made by read-modify-write updates on conflict
pub const CONFLICT_RETRY_ATTEMPTS: u32 = 5;

// ============================================================================
// Operator Runtime
// ============================================================================

/// Default lease name for leader election
pub const DEFAULT_LEASE_NAME: &str = "dbop-leader";

/// Default lease duration in seconds
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default lease grace period in seconds
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 5;

/// Default metrics listen address
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Worker threads of the tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
