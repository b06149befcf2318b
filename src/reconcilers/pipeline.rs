// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ordered execution of reconcile actors.

use super::{Outcome, ReconcileActor, ReconcilePass};
use crate::constants::ANNOTATION_REQUEUE_TIME;
use crate::crd::DatabaseCluster;
use crate::metrics;
use anyhow::Result;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, error, info};

/// A fixed, ordered list of actors.
///
/// Actors run one at a time. The first actor that errors or asks for a requeue ends
/// the pass; there is no rollback of the actors that already ran.
pub struct Pipeline {
    name: &'static str,
    actors: Vec<Box<dyn ReconcileActor>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            actors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl ReconcileActor + 'static) -> Self {
        self.actors.push(Box::new(actor));
        self
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Actor names in execution order.
    #[must_use]
    pub fn actor_names(&self) -> Vec<&'static str> {
        self.actors.iter().map(|a| a.name()).collect()
    }

    /// Run every actor in order until one aborts.
    ///
    /// An aborting plain requeue picks up the delay from the
    /// `dbop.firestoned.io/requeue-time` annotation when it is set.
    ///
    /// # Errors
    ///
    /// Returns the first actor error unchanged.
    pub async fn run(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let namespace = pass.namespace();
        let name = pass.name();

        for actor in &self.actors {
            debug!(pipeline = self.name, actor = actor.name(), namespace = %namespace, name = %name, "Starting actor");

            match actor.reconcile(pass).await {
                Err(e) => {
                    metrics::record_actor_abort(actor.name(), "error");
                    error!(
                        pipeline = self.name,
                        actor = actor.name(),
                        namespace = %namespace,
                        name = %name,
                        error = %e,
                        "Actor failed, aborting reconcile"
                    );
                    return Err(e);
                }
                Ok(outcome) if outcome.is_abort() => {
                    let outcome = apply_requeue_override(&pass.cluster, outcome);
                    metrics::record_actor_abort(actor.name(), "requeue");
                    info!(
                        pipeline = self.name,
                        actor = actor.name(),
                        namespace = %namespace,
                        name = %name,
                        requeue_after = ?outcome.requeue_after,
                        "Aborting reconcile"
                    );
                    return Ok(outcome);
                }
                Ok(_) => {}
            }
        }

        debug!(pipeline = self.name, namespace = %namespace, name = %name, "Ending reconcile");
        Ok(Outcome::proceed())
    }
}

fn apply_requeue_override(cluster: &DatabaseCluster, outcome: Outcome) -> Outcome {
    if outcome.requeue_after.is_some() {
        return outcome;
    }
    match cluster
        .annotations()
        .get(ANNOTATION_REQUEUE_TIME)
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        Some(secs) if secs > 0 => Outcome::requeue_after(Duration::from_secs(secs)),
        _ => outcome,
    }
}
