// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status updater and condition helpers for `DatabaseCluster` resources.
//!
//! The status subresource is the only long-lived state the reconcile engine shares
//! between passes. Every write goes through [`update_status_with_retry`], which:
//!
//! 1. re-fetches the latest copy of the cluster,
//! 2. applies the caller's mutation to that copy,
//! 3. skips the write when nothing changed,
//! 4. writes conditionally on `resourceVersion` and retries on conflict.
//!
//! Spec changes made by the operator itself (TLS rollback) use the same loop through
//! [`update_spec_with_retry`].
//!
//! # Condition Format
//!
//! - `type`: The aspect being reported (e.g., `RestartNeeded`)
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp when the status last flipped

use crate::constants::CONFLICT_RETRY_ATTEMPTS;
use crate::crd::{Condition, DatabaseCluster, DatabaseClusterSpec, DatabaseClusterStatus};
use crate::k8s::{AccessError, ApiAccessor};
use crate::reconcilers::retry::conflict_backoff;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, warn};

/// Create a new condition with the current timestamp.
///
/// # Example
///
/// ```rust
/// use dbop::reconcilers::status::create_condition;
///
/// let condition = create_condition("RestartNeeded", "True", "NodesDown", "2 nodes are down");
/// assert_eq!(condition.r#type, "RestartNeeded");
/// assert_eq!(condition.status, "True");
/// ```
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Update or add a condition in a conditions list, in memory only.
///
/// `lastTransitionTime` is preserved when the status value does not change.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let last_transition_time = if existing.status == status {
            existing
                .last_transition_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        } else {
            Utc::now().to_rfc3339()
        };

        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.last_transition_time = Some(last_transition_time);
    } else {
        conditions.push(create_condition(condition_type, status, reason, message));
    }
}

/// Compare two condition lists ignoring `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    current.len() == new.len()
        && new.iter().all(|n| {
            find_condition(current, &n.r#type).is_some_and(|c| {
                c.status == n.status && c.reason == n.reason && c.message == n.message
            })
        })
}

/// Re-fetch, mutate and write the status subresource, retrying on conflict.
///
/// On return `cluster` holds the latest copy from the API server, whether or not a
/// write was needed.
///
/// # Arguments
///
/// * `accessor` - API access
/// * `cluster` - Cluster to update; replaced with the latest copy
/// * `mutate` - Applied to the latest status; may run more than once
///
/// # Returns
///
/// `true` if the status was written, `false` if the mutation changed nothing.
///
/// # Errors
///
/// Returns an error if the cluster is gone, the API call fails, or conflicts persist
/// for [`CONFLICT_RETRY_ATTEMPTS`] attempts.
pub async fn update_status_with_retry<F>(
    accessor: &dyn ApiAccessor,
    cluster: &mut DatabaseCluster,
    mutate: F,
) -> Result<bool>
where
    F: Fn(&mut DatabaseClusterStatus) + Send + Sync,
{
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let mut backoff = conflict_backoff();

    for attempt in 1..=CONFLICT_RETRY_ATTEMPTS {
        let mut latest = fetch_latest(accessor, &namespace, &name).await?;
        let before = latest.status.clone().unwrap_or_default();
        let mut after = before.clone();
        mutate(&mut after);

        if latest.status.is_some() && after == before {
            *cluster = latest;
            return Ok(false);
        }

        latest.status = Some(after);
        match accessor.replace_cluster_status(&latest).await {
            Ok(updated) => {
                debug!(namespace = %namespace, name = %name, attempt, "Updated DatabaseCluster status");
                *cluster = updated;
                return Ok(true);
            }
            Err(AccessError::Conflict { .. }) => {
                warn!(namespace = %namespace, name = %name, attempt, "Conflict writing status, retrying");
                if let Some(delay) = backoff.next_backoff() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to update status of DatabaseCluster {namespace}/{name}")
                })
            }
        }
    }

    Err(anyhow!(
        "status of DatabaseCluster {namespace}/{name} kept conflicting after {CONFLICT_RETRY_ATTEMPTS} attempts"
    ))
}

/// Re-fetch, mutate and write the spec, retrying on conflict.
///
/// # Returns
///
/// `true` if the spec was written, `false` if the mutation changed nothing.
///
/// # Errors
///
/// Same as [`update_status_with_retry`].
pub async fn update_spec_with_retry<F>(
    accessor: &dyn ApiAccessor,
    cluster: &mut DatabaseCluster,
    mutate: F,
) -> Result<bool>
where
    F: Fn(&mut DatabaseClusterSpec) + Send + Sync,
{
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let mut backoff = conflict_backoff();

    for attempt in 1..=CONFLICT_RETRY_ATTEMPTS {
        let mut latest = fetch_latest(accessor, &namespace, &name).await?;
        let before = latest.spec.clone();
        mutate(&mut latest.spec);
        if latest.spec == before {
            *cluster = latest;
            return Ok(false);
        }

        match accessor.replace_cluster(&latest).await {
            Ok(updated) => {
                debug!(namespace = %namespace, name = %name, attempt, "Updated DatabaseCluster spec");
                *cluster = updated;
                return Ok(true);
            }
            Err(AccessError::Conflict { .. }) => {
                warn!(namespace = %namespace, name = %name, attempt, "Conflict writing spec, retrying");
                if let Some(delay) = backoff.next_backoff() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to update spec of DatabaseCluster {namespace}/{name}")
                })
            }
        }
    }

    Err(anyhow!(
        "spec of DatabaseCluster {namespace}/{name} kept conflicting after {CONFLICT_RETRY_ATTEMPTS} attempts"
    ))
}

async fn fetch_latest(
    accessor: &dyn ApiAccessor,
    namespace: &str,
    name: &str,
) -> Result<DatabaseCluster> {
    accessor
        .get_cluster(namespace, name)
        .await
        .with_context(|| format!("failed to fetch DatabaseCluster {namespace}/{name}"))?
        .ok_or_else(|| anyhow!("DatabaseCluster {namespace}/{name} no longer exists"))
}
