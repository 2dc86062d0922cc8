//! Serial executor for script instructions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use burrow_artifacts::{ArtifactError, ArtifactStore};
use burrow_core::ServiceId;
use burrow_network::{ErrorKind, NetworkError, ServiceNetwork, ServiceStartConfig};

use crate::instruction::{Instruction, InstructionKind, RunTaskRunner, SourcePosition};

/// Default image for shell tasks.
const SHELL_TASK_IMAGE: &str = "alpine:3.20";

/// Default image for python tasks.
const PYTHON_TASK_IMAGE: &str = "python:3.12-alpine";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Artifacts(#[from] ArtifactError),

    #[error("task failed with exit code {exit_code}: {output}")]
    TaskFailed { exit_code: i32, output: String },
}

impl ScriptError {
    /// Whether this error poisons the whole run.
    fn is_fatal(&self) -> bool {
        matches!(self, ScriptError::Network(err) if err.kind() == ErrorKind::Fatal)
    }
}

/// Result of one instruction: what ran, where it came from, how it went.
#[derive(Debug)]
pub struct InstructionOutcome {
    pub position: SourcePosition,
    pub description: String,
    pub result: Result<String, ScriptError>,
}

/// Aggregated outcomes of one script run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<InstructionOutcome>,
    /// True when a fatal error stopped the run early.
    pub aborted: bool,
}

impl RunReport {
    pub fn error_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .count()
    }

    pub fn is_success(&self) -> bool {
        !self.aborted && self.error_count() == 0
    }
}

/// Applies instructions one at a time against a single enclave.
///
/// Ordinary errors are recorded and the run continues; a fatal error
/// (broken network invariant) aborts immediately.
pub struct InstructionExecutor {
    network: Arc<ServiceNetwork>,
    artifacts: Arc<dyn ArtifactStore>,
    stop_timeout: Duration,
    task_counter: AtomicU64,
}

impl InstructionExecutor {
    pub fn new(
        network: Arc<ServiceNetwork>,
        artifacts: Arc<dyn ArtifactStore>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            network,
            artifacts,
            stop_timeout,
            task_counter: AtomicU64::new(0),
        }
    }

    pub async fn execute_all(
        &self,
        cancel: &CancellationToken,
        instructions: Vec<Instruction>,
    ) -> RunReport {
        let mut report = RunReport::default();
        for instruction in instructions {
            let description = instruction.describe();
            let result = self.apply(cancel, &instruction.kind).await;
            match &result {
                Ok(message) => {
                    info!(position = %instruction.position, %description, %message, "instruction ok")
                }
                Err(err) => {
                    warn!(position = %instruction.position, %description, error = %err, "instruction failed")
                }
            }
            let fatal = result.as_ref().err().is_some_and(ScriptError::is_fatal);
            report.outcomes.push(InstructionOutcome {
                position: instruction.position,
                description,
                result,
            });
            if fatal {
                report.aborted = true;
                break;
            }
        }
        report
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        kind: &InstructionKind,
    ) -> Result<String, ScriptError> {
        match kind {
            InstructionKind::AddService {
                id,
                partition,
                config,
            } => {
                let (ip, _dir) = self
                    .network
                    .register_service(id, partition.clone())
                    .await?;
                // A start failure rolls the registration back inside the
                // network, so there is nothing to compensate here.
                self.network
                    .start_service(cancel, id, config.clone())
                    .await?;
                Ok(format!("service '{id}' started at {ip}"))
            }

            InstructionKind::RemoveService { id } => {
                let guid = self
                    .network
                    .remove_service(cancel, id, self.stop_timeout)
                    .await?;
                Ok(format!("service '{id}' removed (guid {guid})"))
            }

            InstructionKind::Exec { id, argv } => {
                let (exit_code, output) = self.network.exec_command(cancel, id, argv).await?;
                Ok(format!(
                    "exit code {exit_code}, {} output bytes",
                    output.len()
                ))
            }

            InstructionKind::StoreFilesFromService {
                id,
                src_path,
                artifact_name,
            } => {
                let argv = vec!["cat".to_string(), src_path.clone()];
                let (exit_code, output) = self.network.exec_command(cancel, id, &argv).await?;
                if exit_code != 0 {
                    return Err(ScriptError::TaskFailed {
                        exit_code,
                        output: String::from_utf8_lossy(&output).into_owned(),
                    });
                }
                let artifact = self.artifacts.put_artifact(artifact_name, &output).await?;
                Ok(format!("stored '{src_path}' as artifact {artifact}"))
            }

            InstructionKind::UploadFiles {
                artifact_name,
                files,
            } => {
                let artifact = self
                    .artifacts
                    .put_artifact_files(artifact_name, files)
                    .await?;
                Ok(format!("uploaded {} file(s) as artifact {artifact}", files.len()))
            }

            InstructionKind::RenderTemplates {
                artifact_name,
                templates,
            } => {
                let artifact = self
                    .artifacts
                    .render_templates(artifact_name, templates)
                    .await?;
                Ok(format!(
                    "rendered {} template(s) into artifact {artifact}",
                    templates.len()
                ))
            }

            InstructionKind::RunTask {
                runner,
                script,
                image,
            } => self.run_task(cancel, *runner, script, image.as_deref()).await,
        }
    }

    /// Materialize a one-shot service, exec the payload in it, and remove
    /// the service again whatever the payload did.
    async fn run_task(
        &self,
        cancel: &CancellationToken,
        runner: RunTaskRunner,
        script: &str,
        image: Option<&str>,
    ) -> Result<String, ScriptError> {
        let index = self.task_counter.fetch_add(1, Ordering::Relaxed);
        let id = ServiceId::new(format!("task-{index}"));
        let (default_image, argv) = match runner {
            RunTaskRunner::Shell => (
                SHELL_TASK_IMAGE,
                vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            ),
            RunTaskRunner::Python => (
                PYTHON_TASK_IMAGE,
                vec!["python".to_string(), "-c".to_string(), script.to_string()],
            ),
        };

        self.network.register_service(&id, None).await?;
        let config = ServiceStartConfig {
            image: image.unwrap_or(default_image).to_string(),
            cmd: vec!["sleep".to_string(), "infinity".to_string()],
            ..Default::default()
        };
        self.network.start_service(cancel, &id, config).await?;

        let exec_result = self.network.exec_command(cancel, &id, &argv).await;

        // The task service is ephemeral; remove it even when the payload
        // failed, and keep the payload's error if both go wrong.
        if let Err(err) = self
            .network
            .remove_service(cancel, &id, self.stop_timeout)
            .await
        {
            warn!(%id, error = %err, "failed to remove task service");
        }

        let (exit_code, output) = exec_result?;
        let output = String::from_utf8_lossy(&output).into_owned();
        if exit_code != 0 {
            return Err(ScriptError::TaskFailed { exit_code, output });
        }
        Ok(output)
    }
}
