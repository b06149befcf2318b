// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reverts a failed HTTPS certificate rotation.
//!
//! When a rotation fails the `TlsCertRollbackNeeded` condition is raised. If the
//! cluster allows automatic rollback, this reconciler puts the certificate that is
//! still recorded as in use back on the endpoint and reverts the spec to it:
//!
//! 1. `TlsCertRollbackInProgress` is set
//! 2. the in-use certificate is rotated back onto the endpoint
//! 3. `TlsConfigUpdateInProgress` is cleared
//! 4. `spec.httpsTls` is reverted to the in-use secret and mode
//! 5. both rollback conditions are cleared
//!
//! Every step is safe to repeat, so an aborted pass resumes from the start.

use super::status::{update_condition_in_memory, update_spec_with_retry};
use super::{outcome_for_admin_error, Outcome, ReconcileActor, ReconcilePass};
use crate::constants::TLS_CONFIG_HTTPS;
use crate::crd::TlsConfigStatus;
use crate::dispatcher::{Initiator, RotateHttpsCertsOptions};
use crate::events::{
    TLS_CERT_ROLLBACK_FAILED, TLS_CERT_ROLLBACK_STARTED, TLS_CERT_ROLLBACK_SUCCEEDED,
};
use crate::status_reasons::{
    condition_status, CONDITION_TLS_ROLLBACK_IN_PROGRESS, CONDITION_TLS_ROLLBACK_NEEDED,
    CONDITION_TLS_UPDATE_IN_PROGRESS, REASON_COMPLETED, REASON_ROLLBACK_STARTED,
};
use anyhow::Result;
use async_trait::async_trait;
use kube::runtime::events::EventType;
use tracing::{info, warn};

pub struct TlsRollbackReconciler;

impl TlsRollbackReconciler {
    async fn rotate_back(&self, pass: &mut ReconcilePass, in_use: &TlsConfigStatus) -> Result<Outcome> {
        pass.collect_facts().await?;
        let Some(initiator) = pass
            .facts
            .find_first_up_pod(false, None)
            .map(Initiator::from)
        else {
            info!(name = %pass.name(), "No node is up to roll back the HTTPS certificate, requeueing");
            return Ok(Outcome::requeue());
        };

        let opts = RotateHttpsCertsOptions::new(initiator)
            .with_sandbox(pass.sandbox())
            .with_secret(&in_use.secret)
            .with_tls_mode(&in_use.mode);
        if let Err(e) = pass.env.dispatcher.rotate_https_certs(opts).await {
            return outcome_for_admin_error(pass, TLS_CERT_ROLLBACK_FAILED, e).await;
        }
        Ok(Outcome::proceed())
    }
}

#[async_trait]
impl ReconcileActor for TlsRollbackReconciler {
    fn name(&self) -> &'static str {
        "TlsRollback"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let enabled = pass
            .cluster
            .spec
            .https_tls
            .as_ref()
            .is_some_and(|tls| tls.auto_rollback);
        if !enabled || !pass.cluster.is_condition_true(CONDITION_TLS_ROLLBACK_NEEDED) {
            return Ok(Outcome::proceed());
        }
        let Some(in_use) = pass.cluster.tls_config_status(TLS_CONFIG_HTTPS).cloned() else {
            warn!(name = %pass.name(), "No HTTPS certificate is recorded as in use, cannot roll back");
            return Ok(Outcome::requeue());
        };
        if !pass.cluster.is_condition_true(CONDITION_TLS_ROLLBACK_IN_PROGRESS) {
            pass.set_condition(
                CONDITION_TLS_ROLLBACK_IN_PROGRESS,
                true,
                REASON_ROLLBACK_STARTED,
                "Rolling back the HTTPS certificate",
            )
            .await?;
            pass.event(
                EventType::Normal,
                TLS_CERT_ROLLBACK_STARTED,
                format!("Starting rollback of the HTTPS certificate to secret '{}'", in_use.secret),
            )
            .await;
        }

        let outcome = self.rotate_back(pass, &in_use).await?;
        if outcome.is_abort() {
            return Ok(outcome);
        }

        pass.set_condition(
            CONDITION_TLS_UPDATE_IN_PROGRESS,
            false,
            REASON_COMPLETED,
            "HTTPS certificate update rolled back",
        )
        .await?;

        let env = pass.env.clone();
        update_spec_with_retry(env.accessor.as_ref(), &mut pass.cluster, |spec| {
            if let Some(tls) = spec.https_tls.as_mut() {
                tls.secret.clone_from(&in_use.secret);
                tls.mode.clone_from(&in_use.mode);
            }
        })
        .await?;

        pass.update_status(|status| {
            for condition_type in [CONDITION_TLS_ROLLBACK_IN_PROGRESS, CONDITION_TLS_ROLLBACK_NEEDED] {
                update_condition_in_memory(
                    &mut status.conditions,
                    condition_type,
                    condition_status(false),
                    REASON_COMPLETED,
                    "HTTPS certificate rollback completed",
                );
            }
        })
        .await?;

        pass.event(
            EventType::Normal,
            TLS_CERT_ROLLBACK_SUCCEEDED,
            format!("Rolled back the HTTPS certificate to secret '{}'", in_use.secret),
        )
        .await;
        Ok(Outcome::proceed())
    }
}

#[cfg(test)]
#[path = "tls_rollback_tests.rs"]
mod tls_rollback_tests;
