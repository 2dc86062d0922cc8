//! Directory-backed artifact store.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use burrow_core::ServiceGuid;

use crate::error::{ArtifactError, ArtifactResult};
use crate::templates::render_template;

/// Handle to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One template plus the data it renders against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub template: String,
    pub data: serde_json::Value,
}

/// File-artifact capability consumed by the service network and executor.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create (or return) the scratch directory for a service.
    async fn allocate_service_directory(&self, guid: &ServiceGuid) -> ArtifactResult<PathBuf>;

    /// Delete a service's scratch directory. Idempotent.
    async fn remove_service_directory(&self, guid: &ServiceGuid) -> ArtifactResult<()>;

    /// Store a single-file artifact under a fresh ID.
    async fn put_artifact(&self, name: &str, bytes: &[u8]) -> ArtifactResult<ArtifactId>;

    /// Store a multi-file artifact; keys are relative paths inside it.
    async fn put_artifact_files(
        &self,
        name: &str,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> ArtifactResult<ArtifactId>;

    /// Render each template into the named artifact.
    async fn render_templates(
        &self,
        name: &str,
        templates: &BTreeMap<String, TemplateSpec>,
    ) -> ArtifactResult<ArtifactId>;

    /// Resolve an artifact ID to its directory on disk.
    async fn lookup_artifact(&self, id: &ArtifactId) -> ArtifactResult<PathBuf>;

    /// Delete everything this store owns. Used at enclave destruction.
    async fn remove_all(&self) -> ArtifactResult<()>;
}

/// [`ArtifactStore`] rooted at one enclave data directory on local disk.
///
/// Layout: `<root>/services/<guid>/` for scratch directories and
/// `<root>/artifacts/<artifact-id>/<name>/...` for artifact file trees.
pub struct DirArtifactStore {
    root: PathBuf,
}

impl DirArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn services_dir(&self) -> PathBuf {
        self.root.join("services")
    }

    fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    fn fresh_artifact_id() -> ArtifactId {
        ArtifactId(uuid::Uuid::new_v4().to_string())
    }
}

/// Reject names that would escape the store root.
fn validate_relative(name: &str) -> ArtifactResult<&Path> {
    let path = Path::new(name);
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if name.is_empty() || escapes {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(path)
}

#[async_trait]
impl ArtifactStore for DirArtifactStore {
    async fn allocate_service_directory(&self, guid: &ServiceGuid) -> ArtifactResult<PathBuf> {
        let dir = self.services_dir().join(guid.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        debug!(%guid, path = %dir.display(), "service directory allocated");
        Ok(dir)
    }

    async fn remove_service_directory(&self, guid: &ServiceGuid) -> ArtifactResult<()> {
        let dir = self.services_dir().join(guid.as_str());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn put_artifact(&self, name: &str, bytes: &[u8]) -> ArtifactResult<ArtifactId> {
        validate_relative(name)?;
        self.put_artifact_files(name, &BTreeMap::from([(name.to_string(), bytes.to_vec())]))
            .await
    }

    async fn put_artifact_files(
        &self,
        name: &str,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> ArtifactResult<ArtifactId> {
        validate_relative(name)?;
        let id = Self::fresh_artifact_id();
        let artifact_dir = self.artifacts_dir().join(id.as_str());
        for (relative, bytes) in files {
            let relative = validate_relative(relative)?;
            let file_path = artifact_dir.join(relative);
            if let Some(parent) = file_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&file_path, bytes).await?;
        }
        debug!(%id, %name, files = files.len(), "artifact stored");
        Ok(id)
    }

    async fn render_templates(
        &self,
        name: &str,
        templates: &BTreeMap<String, TemplateSpec>,
    ) -> ArtifactResult<ArtifactId> {
        let mut rendered = BTreeMap::new();
        for (relative, spec) in templates {
            let output = render_template(relative, &spec.template, &spec.data)?;
            rendered.insert(relative.clone(), output.into_bytes());
        }
        self.put_artifact_files(name, &rendered).await
    }

    async fn lookup_artifact(&self, id: &ArtifactId) -> ArtifactResult<PathBuf> {
        let dir = self.artifacts_dir().join(id.as_str());
        if !tokio::fs::try_exists(&dir).await? {
            return Err(ArtifactError::NotFound(id.to_string()));
        }
        Ok(dir)
    }

    async fn remove_all(&self) -> ArtifactResult<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(root = %self.root.display(), error = %err, "failed to clear artifact root");
                Err(err.into())
            }
        }
    }
}
