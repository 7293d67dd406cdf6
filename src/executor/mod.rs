//! Container executor.
//!
//! Runs one admitted job inside a resource-limited container: lays out
//! the workspace, spawns the container runtime as a child process,
//! streams its output through the log multiplexer, enforces the job's
//! wall-clock timeout, and tears everything down on every exit path.

pub mod command;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{KilnError, Result};
use crate::job::{JobSpec, Submission};
use crate::logs::{LogKind, LogMux};
use crate::queue::{Claim, JobId};
use crate::runtime::{RuntimeCatalog, RuntimeProfile};
use crate::workspace::WorkspaceManager;

pub use command::{build_command, build_script, container_name, ContainerCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    Error,
    Timeout,
    Cancelled,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl ExecOutcome {
    pub fn success(exit_code: i32) -> Self {
        Self {
            status: ExecStatus::Success,
            exit_code: Some(exit_code),
            error: None,
        }
    }

    pub fn error(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Error,
            exit_code,
            error: Some(message.into()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: ExecStatus::Timeout,
            exit_code: None,
            error: Some("timeout".to_string()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: ExecStatus::Cancelled,
            exit_code: None,
            error: Some("cancelled".to_string()),
        }
    }
}

/// Execution seam for the worker pool. The production implementation is
/// [`ContainerExecutor`]; tests drive the pool with scripted ones.
#[async_trait]
pub trait ExecuteJob: Send + Sync {
    /// Run one claimed job to completion. Must only be invoked after
    /// admission; never returns an error, failures are encoded in the
    /// outcome.
    async fn execute(&self, claim: &Claim, cancel: CancellationToken) -> ExecOutcome;
}

/// Runs jobs in containers via the `docker` CLI contract.
pub struct ContainerExecutor {
    catalog: Arc<RuntimeCatalog>,
    workspaces: WorkspaceManager,
    logs: Arc<LogMux>,
    container_prefix: String,
}

impl ContainerExecutor {
    pub fn new(
        catalog: Arc<RuntimeCatalog>,
        workspaces: WorkspaceManager,
        logs: Arc<LogMux>,
        container_prefix: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            workspaces,
            logs,
            container_prefix: container_prefix.into(),
        }
    }

    /// Write the source file and any synthesized manifest into the
    /// workspace. Custom images bring their own filesystem.
    async fn stage_files(
        &self,
        spec: &JobSpec,
        profile: &RuntimeProfile,
        workspace: &std::path::Path,
    ) -> Result<()> {
        if let Submission::RawCode { raw_code } = &spec.submission {
            tokio::fs::write(workspace.join(profile.file_name), raw_code).await?;
            // Git repositories bring their own manifest; a pre-written one
            // would also make `git clone .` refuse the directory.
            if spec.runtime.eq_ignore_ascii_case("nodejs") && !spec.dependencies.is_empty() {
                let manifest = node_manifest(&spec.dependencies);
                tokio::fs::write(workspace.join("package.json"), manifest).await?;
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        claim: &Claim,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome> {
        let job_id = claim.job_id;
        let spec = &claim.spec;
        let profile = self.catalog.lookup(&spec.runtime);

        let workspace = self.workspaces.allocate(job_id).await?;
        self.stage_files(spec, profile, &workspace).await?;

        let cmd = build_command(job_id, spec, profile, &workspace, &self.container_prefix);
        tracing::info!(job_id = %job_id, container = %name, timeout_ms = spec.timeout_ms,
            "Starting container");

        let mut child = Command::new("docker")
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KilnError::ContainerRuntime(format!("failed to spawn docker: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KilnError::ContainerRuntime("no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| KilnError::ContainerRuntime("no stderr pipe".to_string()))?;
        let out_task = stream_lines(stdout, self.logs.clone(), job_id, LogKind::Stdout);
        let err_task = stream_lines(stderr, self.logs.clone(), job_id, LogKind::Stderr);

        let timeout = Duration::from_millis(spec.timeout_ms);
        let outcome = tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => {
                        let code = status.code();
                        if status.success() {
                            ExecOutcome::success(code.unwrap_or(0))
                        } else {
                            ExecOutcome::error(
                                code,
                                match code {
                                    Some(code) => format!("Exit code: {code}"),
                                    None => "Killed by signal".to_string(),
                                },
                            )
                        }
                    }
                    Err(e) => {
                        ExecOutcome::error(None, format!("Failed to wait on container: {e}"))
                    }
                }
            }
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(job_id = %job_id, container = %name, timeout_ms = spec.timeout_ms,
                    "Timeout reached, killing container");
                // Kill both by container name and by child pid; the child
                // may be a CLI wrapper around the actual container.
                kill_container(name).await;
                let _ = child.kill().await;
                ExecOutcome::timeout()
            }
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %job_id, container = %name, "Cancellation requested, killing container");
                kill_container(name).await;
                let _ = child.kill().await;
                ExecOutcome::cancelled()
            }
        };

        join_stream(out_task, job_id).await;
        join_stream(err_task, job_id).await;
        Ok(outcome)
    }
}

#[async_trait]
impl ExecuteJob for ContainerExecutor {
    async fn execute(&self, claim: &Claim, cancel: CancellationToken) -> ExecOutcome {
        let name = container_name(&self.container_prefix, claim.job_id);
        let result = self.run(claim, &name, &cancel).await;

        // Cleanup runs on every exit path; its errors are logged inside
        // and never change the outcome.
        remove_container(&name).await;
        self.workspaces.remove(claim.job_id).await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %claim.job_id, error = %e, "Executor setup failed");
                ExecOutcome::error(None, e.to_string())
            }
        }
    }
}

fn stream_lines<R>(
    reader: R,
    logs: Arc<LogMux>,
    job_id: JobId,
    kind: LogKind,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => logs.append(job_id, kind, &line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(job_id = %job_id, stream = %kind, error = %e,
                        "Output stream closed with error");
                    break;
                }
            }
        }
    })
}

async fn join_stream(task: JoinHandle<()>, job_id: JobId) {
    if let Err(e) = task.await {
        tracing::warn!(job_id = %job_id, error = %e, "Log streaming task failed");
    }
}

/// Kill a container by name. Not-found is the common benign case.
async fn kill_container(name: &str) {
    match Command::new("docker").args(["kill", name]).output().await {
        Ok(_) => {}
        Err(e) => tracing::debug!(container = %name, error = %e, "docker kill failed"),
    }
}

/// Force-remove a container by name, ignoring not-found.
async fn remove_container(name: &str) {
    match Command::new("docker")
        .args(["rm", "-f", name])
        .output()
        .await
    {
        Ok(_) => {}
        Err(e) => tracing::debug!(container = %name, error = %e, "docker rm failed"),
    }
}

fn node_manifest(dependencies: &[String]) -> String {
    let deps: serde_json::Map<String, serde_json::Value> = dependencies
        .iter()
        .map(|d| (d.clone(), serde_json::Value::String("latest".to_string())))
        .collect();
    serde_json::to_string_pretty(&serde_json::json!({
        "name": "kiln-job",
        "version": "1.0.0",
        "private": true,
        "dependencies": deps,
    }))
    .unwrap_or_else(|_| "{}".to_string())
}
