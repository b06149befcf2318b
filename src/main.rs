// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use clap::Parser;
use dbop::{
    config::OperatorSettings,
    constants::{LABEL_SANDBOX_CONFIGMAP, TOKIO_WORKER_THREADS},
    context::Context,
    controller::{error_policy, reconcile_cluster, reconcile_sandbox},
    crd::DatabaseCluster,
    metrics,
};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    runtime::{watcher::Config, Controller},
    Api, Client,
};
use kube_lease_manager::LeaseManagerBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let settings = OperatorSettings::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("dbop-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(settings))
}

async fn async_main(settings: OperatorSettings) -> Result<()> {
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG (default info) and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!(settings = ?settings, "Starting dbop controller");

    let client = Client::try_default()
        .await
        .context("failed to initialize Kubernetes client")?;
    debug!("Kubernetes client initialized");

    let ctx = Arc::new(Context::new(client.clone(), settings.clone()));

    tokio::select! {
        result = run_metrics_server(settings.metrics_addr) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        result = run_operator(client, ctx, &settings) => {
            result
        }
    }
}

/// Run the controllers, gated on the leader lease when leader election is on.
async fn run_operator(client: Client, ctx: Arc<Context>, settings: &OperatorSettings) -> Result<()> {
    if !settings.leader_election {
        warn!("Leader election disabled, running controllers unconditionally");
        return run_controllers(client, ctx).await;
    }

    let identity = settings.identity();
    let manager = LeaseManagerBuilder::new(client.clone(), &settings.lease_name)
        .with_namespace(&settings.namespace)
        .with_identity(&identity)
        .with_duration(settings.lease_duration_secs)
        .with_grace(settings.lease_grace_secs)
        .build()
        .await
        .context("failed to create lease manager")?;
    let (mut leader, _lease_task) = manager.watch().await;
    info!(lease = %settings.lease_name, identity = %identity, "Waiting for leadership");

    loop {
        wait_for_leadership(&mut leader, true).await?;
        metrics::record_leader_elected(&identity);
        info!(identity = %identity, "Acquired leadership, starting controllers");

        tokio::select! {
            result = run_controllers(client.clone(), ctx.clone()) => {
                error!("CRITICAL: controllers exited unexpectedly: {:?}", result);
                result?;
                anyhow::bail!("controllers exited unexpectedly without error")
            }
            result = wait_for_leadership(&mut leader, false) => {
                result?;
                metrics::record_leader_lost(&identity);
                warn!(identity = %identity, "Lost leadership, stopping controllers");
            }
        }
    }
}

async fn wait_for_leadership(leader: &mut watch::Receiver<bool>, wanted: bool) -> Result<()> {
    while *leader.borrow_and_update() != wanted {
        leader
            .changed()
            .await
            .context("lease manager stopped")?;
    }
    Ok(())
}

/// Run both controllers until one of them exits.
async fn run_controllers(client: Client, ctx: Arc<Context>) -> Result<()> {
    tokio::select! {
        result = run_cluster_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: DatabaseCluster controller exited unexpectedly: {:?}", result);
            result
        }
        result = run_sandbox_controller(client, ctx) => {
            error!("CRITICAL: sandbox controller exited unexpectedly: {:?}", result);
            result
        }
    }
}

/// Run the `DatabaseCluster` controller
async fn run_cluster_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting DatabaseCluster controller");

    let api = Api::<DatabaseCluster>::all(client.clone());
    let statefulsets = Api::<StatefulSet>::all(client);

    Controller::new(api, Config::default().any_semantic())
        .owns(statefulsets, Config::default())
        .run(reconcile_cluster, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                debug!(error = %e, "DatabaseCluster reconcile event");
            }
        })
        .await;

    Ok(())
}

/// Run the controller watching sandbox ConfigMaps
async fn run_sandbox_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting sandbox controller");

    let api = Api::<ConfigMap>::all(client);

    Controller::new(api, Config::default().labels(LABEL_SANDBOX_CONFIGMAP))
        .run(reconcile_sandbox, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                debug!(error = %e, "Sandbox reconcile event");
            }
        })
        .await;

    Ok(())
}

async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics address {addr}"))?;
    info!(addr = %addr, "Serving metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
