// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Narrow interfaces to the Kubernetes API used by the reconcile engine.
//!
//! Reconcilers never hold a raw [`kube::Client`]. They talk to the cluster through two
//! traits so that the whole engine can be exercised against in-memory fakes:
//!
//! - [`ApiAccessor`] - get/replace of the `DatabaseCluster`, reads of the
//!   statefulsets, pods, ConfigMaps and secrets it owns, and creation of sandbox
//!   ConfigMaps. Optimistic concurrency conflicts surface as [`AccessError::Conflict`].
//! - [`PodRunner`] - run a command inside a pod, optionally feeding it stdin, and
//!   capture its output.
//!
//! [`KubeAccessor`] and [`KubePodRunner`] are the production implementations.

use crate::crd::DatabaseCluster;
use crate::reconcilers::retry::retry_api_call;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, AttachParams, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Errors surfaced by [`ApiAccessor`] and [`PodRunner`].
#[derive(Error, Debug)]
pub enum AccessError {
    /// The object changed since it was read (HTTP 409).
    #[error("{kind} {name} was modified since it was read")]
    Conflict {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// The command could not be started or its streams could not be read.
    #[error("exec in pod {pod} failed: {message}")]
    Exec {
        /// Target pod
        pod: String,
        /// Failure detail
        message: String,
    },

    /// Raw Kubernetes API error.
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// Any other failure, typically a retried API call that gave up.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AccessError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Output of a command run inside a pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether the command exited successfully.
    pub succeeded: bool,
}

impl ExecOutput {
    /// Stdout and stderr joined, for error classification.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Access to the cluster resource and the objects it owns.
#[async_trait]
pub trait ApiAccessor: Send + Sync {
    /// Fetch the latest copy of a `DatabaseCluster`, `None` if it is gone.
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseCluster>, AccessError>;

    /// Replace the whole object. Fails with a conflict when `resourceVersion` is stale.
    async fn replace_cluster(
        &self,
        cluster: &DatabaseCluster,
    ) -> Result<DatabaseCluster, AccessError>;

    /// Write the status subresource. Fails with a conflict when `resourceVersion` is stale.
    async fn replace_cluster_status(
        &self,
        cluster: &DatabaseCluster,
    ) -> Result<DatabaseCluster, AccessError>;

    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, AccessError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, AccessError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), AccessError>;

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, AccessError>;

    /// Create a ConfigMap. An existing ConfigMap of the same name is left as is.
    async fn create_configmap(&self, namespace: &str, cm: &ConfigMap) -> Result<(), AccessError>;

    /// Set (`Some`) or remove (`None`) one annotation on a ConfigMap.
    async fn annotate_configmap(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), AccessError>;

    /// Read one key of a secret as UTF-8.
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, AccessError>;
}

/// Ability to run commands inside pods.
#[async_trait]
pub trait PodRunner: Send + Sync {
    /// Run `command` in `container` of `pod` and capture its output.
    ///
    /// A command that runs and exits non-zero is `Ok` with `succeeded == false`;
    /// `Err` means the command could not be run at all.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, AccessError> {
        self.exec_with_input(namespace, pod, container, command, None)
            .await
    }

    /// Like [`Self::exec`], writing `input` to the command's stdin.
    ///
    /// Secrets go through `input` so they never appear in the command line.
    async fn exec_with_input(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        input: Option<String>,
    ) -> Result<ExecOutput, AccessError>;
}

/// [`ApiAccessor`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeAccessor {
    client: Client,
}

impl KubeAccessor {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn map_write_error(err: kube::Error, kind: &'static str, name: &str) -> AccessError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => AccessError::Conflict {
            kind,
            name: name.to_string(),
        },
        other => AccessError::Kube(other),
    }
}

#[async_trait]
impl ApiAccessor for KubeAccessor {
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseCluster>, AccessError> {
        let api: Api<DatabaseCluster> = Api::namespaced(self.client.clone(), namespace);
        let cluster = retry_api_call(
            || api.get_opt(name),
            &format!("get DatabaseCluster {namespace}/{name}"),
        )
        .await?;
        Ok(cluster)
    }

    async fn replace_cluster(
        &self,
        cluster: &DatabaseCluster,
    ) -> Result<DatabaseCluster, AccessError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api: Api<DatabaseCluster> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), cluster)
            .await
            .map_err(|e| map_write_error(e, "DatabaseCluster", &name))
    }

    async fn replace_cluster_status(
        &self,
        cluster: &DatabaseCluster,
    ) -> Result<DatabaseCluster, AccessError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api: Api<DatabaseCluster> = Api::namespaced(self.client.clone(), &namespace);

        // resourceVersion in a merge patch makes the write conditional
        let patch = json!({
            "metadata": { "resourceVersion": cluster.resource_version() },
            "status": cluster.status,
        });
        debug!(namespace = %namespace, name = %name, "Writing DatabaseCluster status");
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(e, "DatabaseCluster", &name))
    }

    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, AccessError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let sts = retry_api_call(
            || api.get_opt(name),
            &format!("get StatefulSet {namespace}/{name}"),
        )
        .await?;
        Ok(sts)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, AccessError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = retry_api_call(|| api.get_opt(name), &format!("get Pod {namespace}/{name}"))
            .await?;
        Ok(pod)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), AccessError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, AccessError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = retry_api_call(
            || api.get_opt(name),
            &format!("get ConfigMap {namespace}/{name}"),
        )
        .await?;
        Ok(cm)
    }

    async fn create_configmap(&self, namespace: &str, cm: &ConfigMap) -> Result<(), AccessError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), cm).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(namespace = %namespace, name = %cm.name_any(), "ConfigMap already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn annotate_configmap(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), AccessError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(e, "ConfigMap", name))?;
        Ok(())
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, AccessError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = retry_api_call(
            || api.get_opt(name),
            &format!("get Secret {namespace}/{name}"),
        )
        .await?;
        let value = secret
            .and_then(|s| s.data)
            .and_then(|mut data| data.remove(key))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned());
        Ok(value)
    }
}

/// [`PodRunner`] using the pod `exec` subresource.
#[derive(Clone)]
pub struct KubePodRunner {
    client: Client,
    timeout: Duration,
}

impl KubePodRunner {
    /// # Arguments
    ///
    /// * `client` - Kubernetes client
    /// * `timeout` - Upper bound for one command, including stream draining
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn run(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        input: Option<String>,
    ) -> Result<ExecOutput, AccessError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams {
            container: Some(container.to_string()),
            stdin: input.is_some(),
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };
        let mut attached = pods.exec(pod, command, &params).await?;

        let exec_error = |message: &str| AccessError::Exec {
            pod: pod.to_string(),
            message: message.to_string(),
        };
        if let Some(input) = input {
            let mut stdin = attached
                .stdin()
                .ok_or_else(|| exec_error("stdin not attached"))?;
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| exec_error(&e.to_string()))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| exec_error(&e.to_string()))?;
        }
        let mut stdout_stream = attached
            .stdout()
            .ok_or_else(|| exec_error("stdout not attached"))?;
        let mut stderr_stream = attached
            .stderr()
            .ok_or_else(|| exec_error("stderr not attached"))?;
        let status = attached
            .take_status()
            .ok_or_else(|| exec_error("exit status not available"))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let (out_res, err_res) = tokio::join!(
            stdout_stream.read_to_string(&mut stdout),
            stderr_stream.read_to_string(&mut stderr)
        );
        out_res.map_err(|e| exec_error(&e.to_string()))?;
        err_res.map_err(|e| exec_error(&e.to_string()))?;

        let succeeded = status
            .await
            .is_some_and(|s| s.status.as_deref() == Some("Success"));
        Ok(ExecOutput {
            stdout,
            stderr,
            succeeded,
        })
    }
}

#[async_trait]
impl PodRunner for KubePodRunner {
    async fn exec_with_input(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        input: Option<String>,
    ) -> Result<ExecOutput, AccessError> {
        debug!(
            namespace = %namespace,
            pod = %pod,
            container = %container,
            command = ?command,
            with_input = input.is_some(),
            "Running command in pod"
        );
        match tokio::time::timeout(
            self.timeout,
            self.run(namespace, pod, container, command, input),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AccessError::Exec {
                pod: pod.to_string(),
                message: format!("timed out after {:?}", self.timeout),
            }),
        }
    }
}
