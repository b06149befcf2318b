// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # dbop - Database Cluster Operator for Kubernetes
//!
//! dbop is a Kubernetes operator written in Rust that keeps a sharded analytic database
//! in line with its `DatabaseCluster` custom resource.
//!
//! ## Overview
//!
//! Each reconcile pass collects facts about every pod of the cluster, then runs an
//! ordered pipeline of actors. Actors drive the database through an admin
//! [`dispatcher`] and record what they observed in the resource status.
//!
//! ## Modules
//!
//! - [`crd`] - `DatabaseCluster` custom resource types
//! - [`podfacts`] - per-pod fact collection
//! - [`dispatcher`] - admin command transports (HTTP endpoint, exec in pod)
//! - [`reconcilers`] - the reconcile engine and its actors
//! - [`controller`] - controller entry points and error policy
//! - [`context`] - shared context for the controllers
//! - [`k8s`] - Kubernetes API access behind test seams
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbop::crd::{DatabaseClusterSpec, SandboxSpec, Subcluster, SubclusterRef, SubclusterType};
//!
//! let spec = DatabaseClusterSpec {
//!     db_name: "analytics".to_string(),
//!     subclusters: vec![
//!         Subcluster {
//!             name: "sc1".to_string(),
//!             r#type: SubclusterType::Primary,
//!             size: 3,
//!             ..Default::default()
//!         },
//!         Subcluster {
//!             name: "sc2".to_string(),
//!             r#type: SubclusterType::Secondary,
//!             size: 2,
//!             ..Default::default()
//!         },
//!     ],
//!     sandboxes: vec![SandboxSpec {
//!         name: "sb1".to_string(),
//!         subclusters: vec![SubclusterRef { name: "sc2".to_string() }],
//!         shutdown: false,
//!     }],
//!     ..Default::default()
//! };
//! ```

pub mod admin_errors;
pub mod config;
pub mod constants;
pub mod context;
pub mod controller;
pub mod crd;
pub mod dispatcher;
pub mod events;
pub mod k8s;
pub mod metrics;
pub mod podfacts;
pub mod reconcilers;
pub mod status_reasons;

#[cfg(test)]
mod crd_tests;
