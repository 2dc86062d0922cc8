//! Artifact store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("template '{name}' failed to render: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;
