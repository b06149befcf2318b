// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`Dispatcher`] over the HTTPS node-management endpoint.
//!
//! Every request goes to `{scheme}://{initiator}:{port}/v1/...` with basic auth as the
//! superuser. Non-2xx answers carry the database's error text, either as plain text or
//! as a problem document with a `detail` field, which is classified into
//! [`AdminError`].
//!
//! No retries happen here: a failed admin command is retried by requeueing the pass.

use super::{
    AddNodeOptions, AlterSubclusterTypeOptions, CreateArchiveOptions, Dispatcher,
    FetchNodeStateOptions, Initiator, NodeState, PromoteSandboxOptions, RemoveNodeOptions,
    RestartNodeOptions, RestorePoint, RotateHttpsCertsOptions, SandboxSubclusterOptions,
    SaveRestorePointOptions, SetConfigParameterOptions, ShowRestorePointsOptions, StartDbOptions,
    StartSubclusterOptions, StopDbOptions, StopSubclusterOptions,
};
use crate::admin_errors::AdminError;
use crate::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client as HttpClient, ClientBuilder, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Basic-auth credentials for the node-management endpoint.
#[derive(Clone, Default)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the client checks the certificate served by the admin endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CertVerification {
    /// Accept any certificate. Pods serve self-signed certificates until a TLS mode
    /// that verifies is configured.
    #[default]
    AcceptAny,
    /// The chain must lead to `ca_pem` or a system root. Host names are not checked.
    Ca { ca_pem: Option<String> },
    /// Chain and host name are both checked.
    Full { ca_pem: Option<String> },
}

impl CertVerification {
    /// Policy for a TLS mode of the admin endpoint. Unrecognised modes verify fully.
    #[must_use]
    pub fn for_mode(mode: Option<&str>) -> Self {
        match mode.map(str::to_ascii_lowercase).as_deref() {
            None | Some("" | "disable" | "enable" | "try_verify") => Self::AcceptAny,
            Some("verify_ca") => Self::Ca { ca_pem: None },
            Some(_) => Self::Full { ca_pem: None },
        }
    }

    #[must_use]
    pub fn verifies(&self) -> bool {
        !matches!(self, Self::AcceptAny)
    }

    /// Trust `ca_pem` in addition to the system roots.
    #[must_use]
    pub fn with_ca(self, ca_pem: Option<String>) -> Self {
        match self {
            Self::AcceptAny => Self::AcceptAny,
            Self::Ca { .. } => Self::Ca { ca_pem },
            Self::Full { .. } => Self::Full { ca_pem },
        }
    }

    fn apply(&self, builder: ClientBuilder) -> Result<ClientBuilder> {
        let (ca_pem, check_hostname) = match self {
            Self::AcceptAny => return Ok(builder.danger_accept_invalid_certs(true)),
            Self::Ca { ca_pem } => (ca_pem, false),
            Self::Full { ca_pem } => (ca_pem, true),
        };
        let mut builder = builder.danger_accept_invalid_hostnames(!check_hostname);
        if let Some(pem) = ca_pem {
            let cert = Certificate::from_pem(pem.as_bytes())
                .context("invalid CA certificate for the admin endpoint")?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(builder)
    }
}

/// HTTP implementation of [`Dispatcher`].
pub struct HttpDispatcher {
    client: HttpClient,
    scheme: String,
    port: u16,
    db_name: String,
    credentials: AdminCredentials,
}

impl HttpDispatcher {
    /// # Arguments
    ///
    /// * `scheme` - `https` in production, `http` for tests
    /// * `port` - Node-management port on every pod
    /// * `db_name` - Database name sent with each request
    /// * `credentials` - Superuser credentials
    /// * `timeout` - Upper bound for one request
    /// * `verification` - Certificate checks for `https`
    ///
    /// # Errors
    ///
    /// Returns an error if the CA certificate is invalid or the HTTP client cannot be
    /// built.
    pub fn new(
        scheme: &str,
        port: u16,
        db_name: &str,
        credentials: AdminCredentials,
        timeout: Duration,
        verification: &CertVerification,
    ) -> Result<Self> {
        let client = verification
            .apply(HttpClient::builder().timeout(timeout))?
            .build()
            .context("failed to build admin HTTP client")?;
        Ok(Self {
            client,
            scheme: scheme.to_string(),
            port,
            db_name: db_name.to_string(),
            credentials,
        })
    }

    fn url(&self, initiator: &Initiator, path: &str) -> String {
        format!(
            "{}://{}:{}/v1/{}",
            self.scheme, initiator.address, self.port, path
        )
    }

    /// Send one request and return the response body.
    async fn request(
        &self,
        operation: &'static str,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<String, AdminError> {
        info!(operation, method = %method, url = %url, "Admin HTTP request");
        let start = Instant::now();

        let mut request = self
            .client
            .request(method.clone(), &url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(operation, url = %url, error = %e, "Admin endpoint unreachable");
                metrics::record_admin_command(operation, "http", "transport", start.elapsed());
                return Err(AdminError::Transport {
                    message: format!("{operation} via {url}: {e}"),
                });
            }
        };

        let status = response.status();
        let text = response.text().await.map_err(|e| AdminError::Transport {
            message: format!("{operation}: failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            let err = error_from_response(status, &text);
            error!(
                operation,
                url = %url,
                status = %status,
                category = err.category(),
                error = %err,
                "Admin HTTP request failed"
            );
            metrics::record_admin_command(operation, "http", err.category(), start.elapsed());
            return Err(err);
        }

        info!(operation, url = %url, status = %status, "Admin HTTP request successful");
        metrics::record_admin_command(operation, "http", "success", start.elapsed());
        Ok(text)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: String,
    ) -> Result<T, AdminError> {
        let text = self.request(operation, Method::GET, url, None).await?;
        serde_json::from_str(&text).map_err(|e| AdminError::CommandFailed {
            message: format!("{operation}: unexpected response: {e}"),
        })
    }
}

/// Map a non-2xx answer to an [`AdminError`].
///
/// Gateway and throttling codes are transport failures regardless of the body.
pub(crate) fn error_from_response(status: StatusCode, body: &str) -> AdminError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => AdminError::Transport {
            message: format!("{status}: {}", message.trim()),
        },
        _ => AdminError::classify(&message),
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    fn transport(&self) -> &'static str {
        "http"
    }

    async fn add_node(&self, opts: AddNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let body = json!({
            "dbName": self.db_name,
            "subcluster": opts.subcluster,
            "sandbox": opts.sandbox,
            "hosts": opts.hosts,
        });
        let url = self.url(&opts.initiator, "nodes");
        self.request(AddNodeOptions::OPERATION, Method::POST, url, Some(body))
            .await
            .map(drop)
    }

    async fn remove_node(&self, opts: RemoveNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let body = json!({
            "dbName": self.db_name,
            "sandbox": opts.sandbox,
            "hosts": opts.hosts,
        });
        let url = self.url(&opts.initiator, "nodes/remove");
        self.request(RemoveNodeOptions::OPERATION, Method::POST, url, Some(body))
            .await
            .map(drop)
    }

    async fn start_db(&self, opts: StartDbOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let body = json!({
            "dbName": self.db_name,
            "sandbox": opts.sandbox,
            "hosts": opts.hosts,
        });
        let url = self.url(&opts.initiator, "database/start");
        self.request(StartDbOptions::OPERATION, Method::POST, url, Some(body))
            .await
            .map(drop)
    }

    async fn stop_db(&self, opts: StopDbOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let body = json!({
            "dbName": self.db_name,
            "sandbox": opts.sandbox,
            "drainSeconds": opts.drain_seconds,
        });
        let url = self.url(&opts.initiator, "database/stop");
        self.request(StopDbOptions::OPERATION, Method::POST, url, Some(body))
            .await
            .map(drop)
    }

    async fn restart_node(&self, opts: RestartNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let nodes: Vec<Value> = opts
            .hosts
            .iter()
            .map(|h| json!({ "name": h.vnode, "address": h.address }))
            .collect();
        let body = json!({
            "dbName": self.db_name,
            "sandbox": opts.sandbox,
            "nodes": nodes,
        });
        let url = self.url(&opts.initiator, "nodes/restart");
        self.request(RestartNodeOptions::OPERATION, Method::POST, url, Some(body))
            .await
            .map(drop)
    }

    async fn fetch_node_state(
        &self,
        opts: FetchNodeStateOptions,
    ) -> Result<Vec<NodeState>, AdminError> {
        opts.validate()?;
        let url = self.url(&opts.initiator, "nodes");
        self.request_json(FetchNodeStateOptions::OPERATION, url).await
    }

    async fn start_subcluster(&self, opts: StartSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(
            &opts.initiator,
            &format!("subclusters/{}/start", opts.subcluster),
        );
        let body = json!({ "sandbox": opts.sandbox });
        self.request(StartSubclusterOptions::OPERATION, Method::POST, url, Some(body))
            .await
            .map(drop)
    }

    async fn stop_subcluster(&self, opts: StopSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(
            &opts.initiator,
            &format!("subclusters/{}/stop", opts.subcluster),
        );
        let body = json!({
            "sandbox": opts.sandbox,
            "drainSeconds": opts.drain_seconds,
            "force": opts.force,
        });
        self.request(StopSubclusterOptions::OPERATION, Method::POST, url, Some(body))
            .await
            .map(drop)
    }

    async fn sandbox_subcluster(&self, opts: SandboxSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(
            &opts.initiator,
            &format!("subclusters/{}/sandbox", opts.subcluster),
        );
        let body = json!({ "dbName": self.db_name, "sandbox": opts.sandbox });
        self.request(
            SandboxSubclusterOptions::OPERATION,
            Method::POST,
            url,
            Some(body),
        )
        .await
        .map(drop)
    }

    async fn alter_subcluster_type(
        &self,
        opts: AlterSubclusterTypeOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(
            &opts.initiator,
            &format!("subclusters/{}/type", opts.subcluster),
        );
        let body = json!({ "sandbox": opts.sandbox, "type": opts.new_type });
        self.request(
            AlterSubclusterTypeOptions::OPERATION,
            Method::POST,
            url,
            Some(body),
        )
        .await
        .map(drop)
    }

    async fn set_config_parameter(
        &self,
        opts: SetConfigParameterOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(
            &opts.initiator,
            &format!("config/parameters/{}", opts.parameter),
        );
        let body = json!({
            "sandbox": opts.sandbox,
            "value": opts.value,
            "level": opts.level,
        });
        self.request(
            SetConfigParameterOptions::OPERATION,
            Method::PUT,
            url,
            Some(body),
        )
        .await
        .map(drop)
    }

    async fn save_restore_point(&self, opts: SaveRestorePointOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(
            &opts.initiator,
            &format!("archives/{}/restore-points", opts.archive),
        );
        let body = json!({ "sandbox": opts.sandbox });
        self.request(
            SaveRestorePointOptions::OPERATION,
            Method::POST,
            url,
            Some(body),
        )
        .await
        .map(drop)
    }

    async fn create_archive(&self, opts: CreateArchiveOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(&opts.initiator, "archives");
        let body = json!({
            "sandbox": opts.sandbox,
            "name": opts.archive,
            "numRestorePoints": opts.num_restore_points,
        });
        self.request(CreateArchiveOptions::OPERATION, Method::POST, url, Some(body))
            .await
            .map(drop)
    }

    async fn show_restore_points(
        &self,
        opts: ShowRestorePointsOptions,
    ) -> Result<Vec<RestorePoint>, AdminError> {
        opts.validate()?;
        let base = self.url(&opts.initiator, "archives/restore-points");
        let url = match &opts.archive {
            Some(archive) => Url::parse_with_params(&base, [("archive", archive.as_str())])
                .map_err(|e| AdminError::InvalidOptions {
                    operation: ShowRestorePointsOptions::OPERATION.to_string(),
                    reason: format!("cannot build request URL: {e}"),
                })?
                .to_string(),
            None => base,
        };
        self.request_json(ShowRestorePointsOptions::OPERATION, url)
            .await
    }

    async fn promote_sandbox_to_main(
        &self,
        opts: PromoteSandboxOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(
            &opts.initiator,
            &format!("sandboxes/{}/promote", opts.sandbox),
        );
        self.request(PromoteSandboxOptions::OPERATION, Method::POST, url, None)
            .await
            .map(drop)
    }

    async fn rotate_https_certs(&self, opts: RotateHttpsCertsOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let url = self.url(&opts.initiator, "tls/https/rotate");
        let body = json!({
            "sandbox": opts.sandbox,
            "secret": opts.secret,
            "mode": opts.tls_mode,
        });
        self.request(
            RotateHttpsCertsOptions::OPERATION,
            Method::POST,
            url,
            Some(body),
        )
        .await
        .map(drop)
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod http_tests;
