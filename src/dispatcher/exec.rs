// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`Dispatcher`] backed by the legacy admin CLI.
//!
//! Each operation is a single command run in the server container of the initiator
//! pod through [`PodRunner`]. Operations the CLI has no verb for go through the SQL
//! client in the same container. Sandbox promotion and certificate rotation are only
//! available over HTTP.
//!
//! The superuser password is written to the command's stdin and read by a small shell
//! wrapper, so it never shows up in the exec request or in logs.

use super::{
    AddNodeOptions, AlterSubclusterTypeOptions, CreateArchiveOptions, Dispatcher,
    FetchNodeStateOptions, Initiator, NodeState, PromoteSandboxOptions, RemoveNodeOptions,
    RestartNodeOptions, RestorePoint, RotateHttpsCertsOptions, SandboxSubclusterOptions,
    SaveRestorePointOptions, SetConfigParameterOptions, ShowRestorePointsOptions, StartDbOptions,
    StartSubclusterOptions, StopDbOptions, StopSubclusterOptions,
};
use crate::admin_errors::AdminError;
use crate::constants::{ADMIN_CLI_PATH, SERVER_CONTAINER, SQL_CLIENT_PATH, SUPERUSER_NAME};
use crate::crd::SubclusterType;
use crate::k8s::PodRunner;
use crate::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Shell script that reads the password line from stdin and hands it to the admin CLI
/// given as `$0 "$@"`.
const ADMIN_CLI_READS_PASSWORD: &str = r#"IFS= read -r pw; exec "$0" "$@" --password "$pw""#;

/// Shell script that reads the password line from stdin into the SQL client's
/// password variable.
const SQL_CLIENT_READS_PASSWORD: &str =
    r#"IFS= read -r DB_PASSWORD; export DB_PASSWORD; exec "$0" "$@""#;

/// Command line plus the stdin it is fed. The password only ever travels on stdin.
struct PodCommand {
    argv: Vec<String>,
    input: Option<String>,
}

/// Admin CLI implementation of [`Dispatcher`].
pub struct ExecDispatcher {
    runner: Arc<dyn PodRunner>,
    namespace: String,
    db_name: String,
    password: String,
}

impl ExecDispatcher {
    #[must_use]
    pub fn new(
        runner: Arc<dyn PodRunner>,
        namespace: &str,
        db_name: &str,
        password: String,
    ) -> Self {
        Self {
            runner,
            namespace: namespace.to_string(),
            db_name: db_name.to_string(),
            password,
        }
    }

    /// Admin CLI invocation for a tool, with the database and password options set.
    fn admin_cli(&self, tool: &str, args: &[&str]) -> PodCommand {
        let mut argv = vec![
            ADMIN_CLI_PATH.to_string(),
            "-t".to_string(),
            tool.to_string(),
            "--database".to_string(),
            self.db_name.clone(),
        ];
        argv.extend(args.iter().map(|a| (*a).to_string()));
        self.with_password(ADMIN_CLI_READS_PASSWORD, argv)
    }

    fn sql(&self, statement: &str) -> PodCommand {
        let argv = vec![
            SQL_CLIENT_PATH.to_string(),
            "-U".to_string(),
            SUPERUSER_NAME.to_string(),
            "-tAc".to_string(),
            statement.to_string(),
        ];
        self.with_password(SQL_CLIENT_READS_PASSWORD, argv)
    }

    /// Wrap `argv` in a shell that reads the password from stdin with `script`.
    fn with_password(&self, script: &str, argv: Vec<String>) -> PodCommand {
        if self.password.is_empty() {
            return PodCommand { argv, input: None };
        }
        let mut wrapped = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        wrapped.extend(argv);
        PodCommand {
            argv: wrapped,
            input: Some(format!("{}\n", self.password)),
        }
    }

    /// Run a command in the initiator pod and return its stdout.
    async fn run(
        &self,
        operation: &'static str,
        initiator: &Initiator,
        command: PodCommand,
    ) -> Result<String, AdminError> {
        info!(operation, pod = %initiator.pod, "Running admin command");
        let start = Instant::now();

        let output = match self
            .runner
            .exec_with_input(
                &self.namespace,
                &initiator.pod,
                SERVER_CONTAINER,
                command.argv,
                command.input,
            )
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!(operation, pod = %initiator.pod, error = %e, "Admin command could not run");
                metrics::record_admin_command(operation, "exec", "transport", start.elapsed());
                return Err(AdminError::Transport {
                    message: format!("{operation} in pod {}: {e}", initiator.pod),
                });
            }
        };

        if !output.succeeded {
            let err = AdminError::classify(&output.combined());
            error!(
                operation,
                pod = %initiator.pod,
                category = err.category(),
                error = %err,
                "Admin command failed"
            );
            metrics::record_admin_command(operation, "exec", err.category(), start.elapsed());
            return Err(err);
        }

        metrics::record_admin_command(operation, "exec", "success", start.elapsed());
        Ok(output.stdout)
    }

    fn http_only(operation: &str) -> AdminError {
        AdminError::InvalidOptions {
            operation: operation.to_string(),
            reason: "only supported by the http admin transport".to_string(),
        }
    }
}

/// Parse the node table printed by the admin CLI's `list_allnodes` tool.
///
/// Rows look like `v_db_node0001 | 10.0.0.1 | UP | ...`; header and separator rows are
/// skipped.
pub(crate) fn parse_node_table(stdout: &str) -> Vec<NodeState> {
    stdout
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('|').map(str::trim).collect();
            if cols.len() < 3 || cols[0].is_empty() || cols[0] == "Node" {
                return None;
            }
            Some(NodeState {
                name: cols[0].to_string(),
                address: cols[1].to_string(),
                state: cols[2].to_string(),
            })
        })
        .collect()
}

/// Parse `archive|id|index|timestamp` rows.
pub(crate) fn parse_restore_points(stdout: &str) -> Vec<RestorePoint> {
    stdout
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('|').map(str::trim).collect();
            if cols.len() < 4 {
                return None;
            }
            Some(RestorePoint {
                archive: cols[0].to_string(),
                id: cols[1].to_string(),
                index: cols[2].parse().ok()?,
                timestamp: cols[3].to_string(),
            })
        })
        .collect()
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl Dispatcher for ExecDispatcher {
    fn transport(&self) -> &'static str {
        "exec"
    }

    async fn add_node(&self, opts: AddNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let hosts = opts.hosts.join(",");
        let cmd = self.admin_cli(
            "db_add_node",
            &["--hosts", &hosts, "--subcluster", &opts.subcluster, "--noprompts"],
        );
        self.run(AddNodeOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn remove_node(&self, opts: RemoveNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let hosts = opts.hosts.join(",");
        let cmd = self.admin_cli("db_remove_node", &["--hosts", &hosts, "--noprompts"]);
        self.run(RemoveNodeOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn start_db(&self, opts: StartDbOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let hosts = opts.hosts.join(",");
        let cmd = self.admin_cli("start_db", &["--hosts", &hosts, "--noprompts"]);
        self.run(StartDbOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn stop_db(&self, opts: StopDbOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let drain = opts.drain_seconds.unwrap_or(0).to_string();
        let cmd = self.admin_cli("stop_db", &["--drain-seconds", &drain, "--noprompts"]);
        self.run(StopDbOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn restart_node(&self, opts: RestartNodeOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let hosts = opts
            .hosts
            .iter()
            .map(|h| h.address.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let cmd = self.admin_cli("restart_node", &["--hosts", &hosts, "--noprompts"]);
        self.run(RestartNodeOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn fetch_node_state(
        &self,
        opts: FetchNodeStateOptions,
    ) -> Result<Vec<NodeState>, AdminError> {
        opts.validate()?;
        let cmd = self.admin_cli("list_allnodes", &[]);
        let stdout = self
            .run(FetchNodeStateOptions::OPERATION, &opts.initiator, cmd)
            .await?;
        Ok(parse_node_table(&stdout))
    }

    async fn start_subcluster(&self, opts: StartSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let cmd = self.admin_cli(
            "restart_subcluster",
            &["--subcluster", &opts.subcluster, "--noprompts"],
        );
        self.run(StartSubclusterOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn stop_subcluster(&self, opts: StopSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let drain = opts.drain_seconds.to_string();
        let mut args: Vec<&str> = vec!["--subcluster", &opts.subcluster, "--drain-seconds", &drain];
        if opts.force {
            args.push("--force");
        }
        let cmd = self.admin_cli("stop_subcluster", &args);
        self.run(StopSubclusterOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn sandbox_subcluster(&self, opts: SandboxSubclusterOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let cmd = self.admin_cli(
            "sandbox_subcluster",
            &["--subcluster", &opts.subcluster, "--sandbox", &opts.sandbox],
        );
        self.run(SandboxSubclusterOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn alter_subcluster_type(
        &self,
        opts: AlterSubclusterTypeOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        let tool = if opts.new_type == SubclusterType::Primary {
            "promote_subcluster_local"
        } else {
            "demote_subcluster_local"
        };
        let cmd = self.admin_cli(tool, &["--subcluster", &opts.subcluster, "--noprompts"]);
        self.run(AlterSubclusterTypeOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn set_config_parameter(
        &self,
        opts: SetConfigParameterOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        let level = opts.level.as_deref().unwrap_or("DEFAULT");
        let statement = format!(
            "ALTER DATABASE {level} SET {} = {}",
            opts.parameter,
            sql_literal(&opts.value)
        );
        let cmd = self.sql(&statement);
        self.run(SetConfigParameterOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn save_restore_point(&self, opts: SaveRestorePointOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let cmd = self.sql(&format!("SAVE RESTORE POINT TO ARCHIVE {}", opts.archive));
        self.run(SaveRestorePointOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn create_archive(&self, opts: CreateArchiveOptions) -> Result<(), AdminError> {
        opts.validate()?;
        let statement = match opts.num_restore_points {
            Some(limit) => format!("CREATE ARCHIVE {} LIMIT {limit}", opts.archive),
            None => format!("CREATE ARCHIVE {}", opts.archive),
        };
        let cmd = self.sql(&statement);
        self.run(CreateArchiveOptions::OPERATION, &opts.initiator, cmd)
            .await
            .map(drop)
    }

    async fn show_restore_points(
        &self,
        opts: ShowRestorePointsOptions,
    ) -> Result<Vec<RestorePoint>, AdminError> {
        opts.validate()?;
        let mut statement =
            "SELECT archive, id, index, timestamp FROM archive_restore_points".to_string();
        if let Some(archive) = &opts.archive {
            statement = format!("{statement} WHERE archive = {}", sql_literal(archive));
        }
        let cmd = self.sql(&statement);
        let stdout = self
            .run(ShowRestorePointsOptions::OPERATION, &opts.initiator, cmd)
            .await?;
        Ok(parse_restore_points(&stdout))
    }

    async fn promote_sandbox_to_main(
        &self,
        opts: PromoteSandboxOptions,
    ) -> Result<(), AdminError> {
        opts.validate()?;
        Err(Self::http_only(PromoteSandboxOptions::OPERATION))
    }

    async fn rotate_https_certs(&self, opts: RotateHttpsCertsOptions) -> Result<(), AdminError> {
        opts.validate()?;
        Err(Self::http_only(RotateHttpsCertsOptions::OPERATION))
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod exec_tests;
