//! Process-level registry of enclaves.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use burrow_artifacts::ArtifactStore;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use burrow_artifacts::DirArtifactStore;
use burrow_backend::{ContainerBackend, NetworkHandle};
use burrow_core::config::BurrowConfig;
use burrow_core::{labels, EnclaveId};

use crate::error::{NetworkError, NetworkResult};
use crate::network::ServiceNetwork;

/// One live enclave: its service network plus the backend network and
/// artifact store it owns.
pub struct Enclave {
    pub id: EnclaveId,
    pub network: Arc<ServiceNetwork>,
    pub artifacts: Arc<DirArtifactStore>,
    network_handle: NetworkHandle,
}

/// Creates, indexes, and destroys enclaves. Enclaves are independent:
/// operations on different enclaves are not ordered relative to each
/// other.
pub struct EnclaveManager {
    backend: Arc<dyn ContainerBackend>,
    config: BurrowConfig,
    data_root: PathBuf,
    enclaves: Mutex<BTreeMap<EnclaveId, Arc<Enclave>>>,
}

impl EnclaveManager {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        config: BurrowConfig,
        data_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            config,
            data_root: data_root.into(),
            enclaves: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create an enclave: probe the backend, create its isolated network,
    /// and wire up a fresh service network over it.
    pub async fn create_enclave(
        &self,
        cancel: &CancellationToken,
        id: &EnclaveId,
        partitioning_enabled: Option<bool>,
    ) -> NetworkResult<Arc<Enclave>> {
        if id.is_empty() {
            return Err(NetworkError::InvalidArgument(
                "enclave ID cannot be empty or whitespace".to_string(),
            ));
        }
        let mut enclaves = self.enclaves.lock().await;
        if enclaves.contains_key(id) {
            return Err(NetworkError::Conflict(format!(
                "an enclave with ID '{id}' already exists"
            )));
        }

        self.backend
            .check_ready(cancel, self.config.backend.readiness_timeout())
            .await
            .map_err(|err| NetworkError::backend("check_ready", err))?;

        let cidr = self.config.enclave.cidr.clone();
        let network_name = format!("burrow-{id}");
        let network_handle = self
            .backend
            .create_network(
                cancel,
                &network_name,
                &cidr,
                &labels::enclave_selector(id),
            )
            .await
            .map_err(|err| NetworkError::backend("create_network", err))?;

        let artifacts = Arc::new(DirArtifactStore::new(self.data_root.join(id.as_str())));
        let partitioning =
            partitioning_enabled.unwrap_or(self.config.enclave.partitioning_enabled);
        let network = match ServiceNetwork::new(
            id.clone(),
            network_handle.clone(),
            partitioning,
            &cidr,
            Arc::clone(&self.backend),
            artifacts.clone(),
        ) {
            Ok(network) => Arc::new(network),
            Err(err) => {
                if let Err(cleanup_err) =
                    self.backend.destroy_network(cancel, &network_handle).await
                {
                    warn!(%id, error = %cleanup_err, "failed to remove network during rollback");
                }
                return Err(err);
            }
        };

        let enclave = Arc::new(Enclave {
            id: id.clone(),
            network,
            artifacts,
            network_handle,
        });
        enclaves.insert(id.clone(), Arc::clone(&enclave));
        info!(%id, partitioning, "enclave created");
        Ok(enclave)
    }

    /// Destroy an enclave: tear down its services, remove its artifacts,
    /// and delete its backend network. Best-effort — the enclave is
    /// forgotten even when teardown partially fails, and the first error
    /// encountered is returned.
    pub async fn destroy_enclave(
        &self,
        cancel: &CancellationToken,
        id: &EnclaveId,
    ) -> NetworkResult<()> {
        let enclave = {
            let mut enclaves = self.enclaves.lock().await;
            enclaves
                .remove(id)
                .ok_or_else(|| NetworkError::NotFound(format!("no enclave '{id}' exists")))?
        };

        let mut first_error = None;
        match enclave.network.destroy(cancel).await {
            Ok(()) | Err(NetworkError::Destroyed(_)) => {}
            Err(err) => first_error = Some(err),
        }

        // Sweep whatever the network teardown missed. The labels on
        // backend objects are the only record of what an enclave owned.
        match self
            .backend
            .list_containers(cancel, &labels::enclave_selector(id))
            .await
        {
            Ok(strays) => {
                for stray in strays {
                    if let Err(err) =
                        self.backend.destroy_container(cancel, &stray.handle).await
                    {
                        warn!(%id, handle = %stray.handle, error = %err, "failed to remove stray container");
                        first_error.get_or_insert(NetworkError::backend("destroy_container", err));
                    }
                }
            }
            Err(err) => {
                warn!(%id, error = %err, "failed to list enclave containers");
                first_error.get_or_insert(NetworkError::backend("list_containers", err));
            }
        }

        if let Err(err) = enclave.artifacts.remove_all().await {
            warn!(%id, error = %err, "failed to remove enclave artifacts");
            first_error.get_or_insert(NetworkError::artifacts("remove_all", err));
        }

        if let Err(err) = self
            .backend
            .destroy_network(cancel, &enclave.network_handle)
            .await
        {
            warn!(%id, error = %err, "failed to remove enclave network");
            first_error.get_or_insert(NetworkError::backend("destroy_network", err));
        }

        info!(%id, "enclave destroyed");
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    pub async fn get_enclave(&self, id: &EnclaveId) -> Option<Arc<Enclave>> {
        self.enclaves.lock().await.get(id).cloned()
    }

    pub async fn list_enclaves(&self) -> Vec<EnclaveId> {
        self.enclaves.lock().await.keys().cloned().collect()
    }
}
