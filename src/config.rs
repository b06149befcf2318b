// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator settings.
//!
//! Every setting can be given as a command-line flag or through its environment
//! variable; a flag wins over the environment. Defaults live in [`crate::constants`].

use crate::constants::{
    DEFAULT_ADMIN_TIMEOUT_SECS, DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_GRACE_SECS,
    DEFAULT_LEASE_NAME, DEFAULT_METRICS_ADDR,
};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Runtime settings of the `dbop` controller.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "dbop", version, about = "Kubernetes operator for sharded analytic database clusters", long_about = None)]
pub struct OperatorSettings {
    /// Namespace holding the leader election lease
    #[arg(long, env = "DBOP_NAMESPACE", default_value = "dbop-system")]
    pub namespace: String,

    /// Only reconcile while holding the leader lease
    #[arg(
        long,
        env = "DBOP_LEADER_ELECTION",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub leader_election: bool,

    #[arg(long, env = "DBOP_LEASE_NAME", default_value = DEFAULT_LEASE_NAME)]
    pub lease_name: String,

    /// Lease duration in seconds
    #[arg(long, env = "DBOP_LEASE_DURATION_SECS", default_value_t = DEFAULT_LEASE_DURATION_SECS)]
    pub lease_duration_secs: u64,

    /// Lease renewal grace period in seconds
    #[arg(long, env = "DBOP_LEASE_GRACE_SECS", default_value_t = DEFAULT_LEASE_GRACE_SECS)]
    pub lease_grace_secs: u64,

    /// Listen address of the `/metrics` endpoint
    #[arg(long, env = "DBOP_METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: SocketAddr,

    /// Upper bound for one admin command in seconds
    #[arg(long, env = "DBOP_ADMIN_TIMEOUT_SECS", default_value_t = DEFAULT_ADMIN_TIMEOUT_SECS)]
    pub admin_timeout_secs: u64,

    /// Name of the operator pod, used as lease identity and event instance
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,
}

impl OperatorSettings {
    #[must_use]
    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_secs)
    }

    /// Lease identity: the pod name, or a generated one outside a pod.
    #[must_use]
    pub fn identity(&self) -> String {
        self.pod_name
            .clone()
            .unwrap_or_else(|| format!("dbop-{:08x}", rand::random::<u32>()))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
