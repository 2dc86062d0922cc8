//! Typed instructions produced by the script interpreter.

use std::collections::BTreeMap;
use std::fmt;

use burrow_artifacts::TemplateSpec;
use burrow_core::{PartitionId, ServiceId};
use burrow_network::ServiceStartConfig;

/// Where in the user's script an instruction originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.line, self.column)
    }
}

/// Interpreter used for a one-shot task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTaskRunner {
    Shell,
    Python,
}

/// One mutation or query against the enclave.
#[derive(Debug, Clone)]
pub enum InstructionKind {
    /// Register and start a service in one step.
    AddService {
        id: ServiceId,
        partition: Option<PartitionId>,
        config: ServiceStartConfig,
    },
    RemoveService {
        id: ServiceId,
    },
    Exec {
        id: ServiceId,
        argv: Vec<String>,
    },
    /// Copy a file out of a running service into a named artifact.
    StoreFilesFromService {
        id: ServiceId,
        src_path: String,
        artifact_name: String,
    },
    /// Store caller-provided files as a named artifact.
    UploadFiles {
        artifact_name: String,
        files: BTreeMap<String, Vec<u8>>,
    },
    /// Render templates into a named artifact.
    RenderTemplates {
        artifact_name: String,
        templates: BTreeMap<String, TemplateSpec>,
    },
    /// Run a script in a throwaway service.
    RunTask {
        runner: RunTaskRunner,
        script: String,
        /// Override of the runner's default image.
        image: Option<String>,
    },
}

/// An instruction plus its origin in the script.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub position: SourcePosition,
    pub kind: InstructionKind,
}

impl Instruction {
    pub fn new(position: SourcePosition, kind: InstructionKind) -> Self {
        Self { position, kind }
    }

    /// Canonical one-line rendering for logs and reports.
    pub fn describe(&self) -> String {
        match &self.kind {
            InstructionKind::AddService { id, config, .. } => {
                format!("add_service(id={id}, image={})", config.image)
            }
            InstructionKind::RemoveService { id } => format!("remove_service(id={id})"),
            InstructionKind::Exec { id, argv } => format!("exec(id={id}, argv={argv:?})"),
            InstructionKind::StoreFilesFromService {
                id,
                src_path,
                artifact_name,
            } => format!("store_files(id={id}, src={src_path}, name={artifact_name})"),
            InstructionKind::UploadFiles {
                artifact_name,
                files,
            } => format!("upload_files(name={artifact_name}, count={})", files.len()),
            InstructionKind::RenderTemplates {
                artifact_name,
                templates,
            } => format!(
                "render_templates(name={artifact_name}, count={})",
                templates.len()
            ),
            InstructionKind::RunTask { runner, .. } => {
                let runner = match runner {
                    RunTaskRunner::Shell => "shell",
                    RunTaskRunner::Python => "python",
                };
                format!("run_task(runner={runner})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_renders_compactly() {
        assert_eq!(SourcePosition::new(12, 4).to_string(), "[12:4]");
    }

    #[test]
    fn describe_names_the_operation() {
        let instruction = Instruction::new(
            SourcePosition::new(1, 1),
            InstructionKind::AddService {
                id: ServiceId::from("datastore"),
                partition: None,
                config: ServiceStartConfig::image("example/datastore:0.2"),
            },
        );
        assert_eq!(
            instruction.describe(),
            "add_service(id=datastore, image=example/datastore:0.2)"
        );
    }
}
