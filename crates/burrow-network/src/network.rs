//! The in-memory service network authority.
//!
//! Owns service identity, address allocation, lifecycle state, and the
//! partition topology for one enclave, and drives the container backend
//! to make reality match. Every public method takes the single enclave
//! lock for its whole duration — backend I/O included — so the external
//! effects of concurrent calls are linearizable in program order. Exec
//! blocks everything else for the same reason.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use burrow_artifacts::{ArtifactId, ArtifactStore};
use burrow_backend::{
    parallel, BackendError, ContainerBackend, ContainerSpec, MountSpec, NetworkHandle,
};
use burrow_core::{labels, ContainerKind, EnclaveId, PartitionId, PortSpec, ServiceGuid, ServiceId};

use crate::allocator::{AddressAllocator, AllocatorError};
use crate::error::{NetworkError, NetworkResult};
use crate::guid::GuidSuffixSource;
use crate::sidecar::{apply_traffic_control, SidecarRegistry};
use crate::topology::{
    ConnectionId, PartitionConnection, PartitionTopology, ServicePacketLoss, TopologyError,
};

/// Partition every service lands in unless told otherwise.
pub const DEFAULT_PARTITION_ID: &str = "default";

/// Where a service's scratch directory is mounted inside its container.
pub const SERVICE_SCRATCH_MOUNTPOINT: &str = "/burrow/data";

/// Record created when a service is registered, before any container runs.
#[derive(Debug, Clone)]
pub struct RegistrationInfo {
    pub guid: ServiceGuid,
    pub id: ServiceId,
    pub private_ip: Ipv4Addr,
    pub partition: PartitionId,
    pub artifact_dir: PathBuf,
}

/// Record attached to a registration once its container is running.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub container: burrow_backend::ContainerHandle,
    pub private_ports: BTreeMap<String, PortSpec>,
    pub public_ip: Option<IpAddr>,
    pub public_ports: BTreeMap<String, PortSpec>,
    pub mounted_artifacts: BTreeMap<ArtifactId, String>,
}

/// Everything needed to start a registered service's container.
#[derive(Debug, Clone, Default)]
pub struct ServiceStartConfig {
    pub image: String,
    pub private_ports: BTreeMap<String, PortSpec>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Artifact → mountpoint inside the container.
    pub artifact_mounts: BTreeMap<ArtifactId, String>,
    pub publish_ports: bool,
}

impl ServiceStartConfig {
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }
}

/// State guarded by the enclave lock.
struct NetworkState {
    is_destroyed: bool,
    allocator: AddressAllocator,
    topology: PartitionTopology,
    ids_to_guids: BTreeMap<ServiceId, ServiceGuid>,
    registrations: BTreeMap<ServiceGuid, RegistrationInfo>,
    run_info: BTreeMap<ServiceGuid, RunInfo>,
    sidecars: SidecarRegistry,
}

/// The per-enclave orchestrator.
pub struct ServiceNetwork {
    enclave_id: EnclaveId,
    network_handle: NetworkHandle,
    is_partitioning_enabled: bool,
    backend: Arc<dyn ContainerBackend>,
    artifacts: Arc<dyn ArtifactStore>,
    guid_source: GuidSuffixSource,
    state: Mutex<NetworkState>,
}

impl ServiceNetwork {
    pub fn new(
        enclave_id: EnclaveId,
        network_handle: NetworkHandle,
        is_partitioning_enabled: bool,
        cidr: &str,
        backend: Arc<dyn ContainerBackend>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> NetworkResult<Self> {
        let allocator = AddressAllocator::new(cidr)
            .map_err(|err| NetworkError::InvalidArgument(err.to_string()))?;
        let topology = PartitionTopology::new(
            PartitionId::from(DEFAULT_PARTITION_ID),
            PartitionConnection::lossless(),
        );
        let sidecars = SidecarRegistry::new(enclave_id.clone(), Arc::clone(&backend));
        Ok(Self {
            enclave_id,
            network_handle,
            is_partitioning_enabled,
            backend,
            artifacts,
            guid_source: GuidSuffixSource::wall_clock(),
            state: Mutex::new(NetworkState {
                is_destroyed: false,
                allocator,
                topology,
                ids_to_guids: BTreeMap::new(),
                registrations: BTreeMap::new(),
                run_info: BTreeMap::new(),
                sidecars,
            }),
        })
    }

    /// Replace the GUID suffix source (deterministic GUIDs in tests).
    pub fn with_guid_source(mut self, source: GuidSuffixSource) -> Self {
        self.guid_source = source;
        self
    }

    pub fn enclave_id(&self) -> &EnclaveId {
        &self.enclave_id
    }

    pub fn is_partitioning_enabled(&self) -> bool {
        self.is_partitioning_enabled
    }

    // ── Registration ───────────────────────────────────────────────

    /// Reserve identity and an address for a service, before any
    /// container exists for it.
    ///
    /// On success the service owns a GUID, a private IP, an artifact
    /// scratch directory, and a slot in the topology. A failure in any
    /// later step rolls back every earlier one.
    pub async fn register_service(
        &self,
        id: &ServiceId,
        partition: Option<PartitionId>,
    ) -> NetworkResult<(Ipv4Addr, PathBuf)> {
        let mut state = self.state.lock().await;
        self.ensure_alive(&state)?;

        if id.is_empty() {
            return Err(NetworkError::InvalidArgument(
                "service ID cannot be empty or whitespace".to_string(),
            ));
        }
        if state.ids_to_guids.contains_key(id) {
            return Err(NetworkError::Conflict(format!(
                "a service with ID '{id}' already exists"
            )));
        }
        let partition = partition.unwrap_or_else(|| PartitionId::from(DEFAULT_PARTITION_ID));
        if !state.topology.contains_partition(&partition) {
            return Err(NetworkError::InvalidArgument(format!(
                "no partition '{partition}' exists in the current topology"
            )));
        }

        let guid = ServiceGuid::from_id_and_suffix(id, self.guid_source.next());
        let private_ip = state.allocator.reserve().map_err(allocator_error)?;
        debug!(%id, %guid, %private_ip, "service address reserved");

        let artifact_dir = match self.artifacts.allocate_service_directory(&guid).await {
            Ok(dir) => dir,
            Err(err) => {
                state.allocator.release(private_ip);
                return Err(NetworkError::artifacts("allocate_service_directory", err));
            }
        };

        state.registrations.insert(
            guid.clone(),
            RegistrationInfo {
                guid: guid.clone(),
                id: id.clone(),
                private_ip,
                partition: partition.clone(),
                artifact_dir: artifact_dir.clone(),
            },
        );
        state.ids_to_guids.insert(id.clone(), guid.clone());

        if let Err(err) = state.topology.add_service(guid.clone(), partition) {
            state.registrations.remove(&guid);
            state.ids_to_guids.remove(id);
            state.allocator.release(private_ip);
            if let Err(cleanup_err) = self.artifacts.remove_service_directory(&guid).await {
                warn!(%guid, error = %cleanup_err, "failed to remove service directory during rollback");
            }
            return Err(err.into());
        }

        info!(%id, %guid, %private_ip, "service registered");
        Ok((private_ip, artifact_dir))
    }

    // ── Start ──────────────────────────────────────────────────────

    /// Start the container for a registered service.
    ///
    /// When partitioning is enabled, the packet-loss tables of already
    /// running peers are updated with the new node's address *before* its
    /// container starts. That closes the window in which a freshly
    /// started, supposedly partitioned node would be reachable: by the
    /// time its interface exists, peers are already dropping traffic to
    /// it. The node's own table is installed right after its sidecar
    /// comes up.
    ///
    /// Any failure rolls the service all the way back to unregistered,
    /// releasing its IP, directory, and topology slot.
    pub async fn start_service(
        &self,
        cancel: &CancellationToken,
        id: &ServiceId,
        config: ServiceStartConfig,
    ) -> NetworkResult<(Option<IpAddr>, BTreeMap<String, PortSpec>)> {
        let mut state = self.state.lock().await;
        self.ensure_alive(&state)?;

        let guid = state
            .ids_to_guids
            .get(id)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound(format!("no service '{id}' is registered")))?;
        if state.run_info.contains_key(&guid) {
            return Err(NetworkError::Conflict(format!(
                "service '{id}' already has run information"
            )));
        }
        let registration = state
            .registrations
            .get(&guid)
            .cloned()
            .ok_or_else(|| fatal_missing_registration(&guid))?;

        if cancel.is_cancelled() {
            self.rollback_registration(&mut state, &registration).await;
            return Err(NetworkError::Cancelled);
        }

        // Peers first: make existing sidecars drop traffic to the new
        // node before it can come up.
        let loss_by_service = if self.is_partitioning_enabled {
            let loss = state.topology.loss_by_service();
            let mut peers_only = loss.clone();
            peers_only.remove(&guid);
            let pushed = self
                .push_traffic_control(cancel, &state, &peers_only)
                .await;
            if let Err(err) = pushed {
                self.rollback_registration(&mut state, &registration).await;
                return Err(err);
            }
            Some(loss)
        } else {
            None
        };

        let spec = match self.container_spec(&registration, &config).await {
            Ok(spec) => spec,
            Err(err) => {
                self.rollback_registration(&mut state, &registration).await;
                return Err(err);
            }
        };
        let started = match self.backend.start_container(cancel, spec).await {
            Ok(started) => started,
            Err(err) => {
                self.rollback_registration(&mut state, &registration).await;
                return Err(NetworkError::backend("start_container", err));
            }
        };

        if self.is_partitioning_enabled {
            let attached = state.sidecars.attach(cancel, &guid, &started.handle).await;
            if let Err(err) = attached {
                self.teardown_container(cancel, &started.handle).await;
                self.rollback_registration(&mut state, &registration).await;
                return Err(NetworkError::backend("attach_sidecar", err));
            }

            let own_row = loss_by_service
                .as_ref()
                .and_then(|loss| loss.get(&guid).cloned())
                .unwrap_or_default();
            let own_table = ip_table(&state, &own_row);
            let updated = match own_table {
                Ok(table) => state
                    .sidecars
                    .update_traffic_control(cancel, &guid, &table)
                    .await
                    .map_err(|err| NetworkError::backend("update_traffic_control", err)),
                Err(err) => Err(err),
            };
            if let Err(err) = updated {
                let _ = state.sidecars.detach(cancel, &guid).await;
                self.teardown_container(cancel, &started.handle).await;
                self.rollback_registration(&mut state, &registration).await;
                return Err(err);
            }
        }

        let run_info = RunInfo {
            container: started.handle,
            private_ports: config.private_ports,
            public_ip: started.public_ip,
            public_ports: started.public_ports.clone(),
            mounted_artifacts: config.artifact_mounts,
        };
        state.run_info.insert(guid.clone(), run_info);

        info!(%id, %guid, "service started");
        Ok((started.public_ip, started.public_ports))
    }

    // ── Remove ─────────────────────────────────────────────────────

    /// Remove a service: detach it from the topology, free its identity
    /// and address, stop its container, and destroy its sidecar.
    ///
    /// The topology entry goes first so no concurrent traffic-control
    /// push can target the dying service. Peer sidecars are deliberately
    /// not rewritten here; the next repartition or start overwrites every
    /// table anyway.
    pub async fn remove_service(
        &self,
        cancel: &CancellationToken,
        id: &ServiceId,
        stop_timeout: Duration,
    ) -> NetworkResult<ServiceGuid> {
        let mut state = self.state.lock().await;
        self.ensure_alive(&state)?;

        let guid = state
            .ids_to_guids
            .get(id)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound(format!("no service '{id}' is registered")))?;

        state.topology.remove_service(&guid);
        let registration = state
            .registrations
            .remove(&guid)
            .ok_or_else(|| fatal_missing_registration(&guid))?;
        state.ids_to_guids.remove(id);
        state.allocator.release(registration.private_ip);
        if let Err(err) = self.artifacts.remove_service_directory(&guid).await {
            warn!(%guid, error = %err, "failed to remove service directory");
        }

        if let Some(run_info) = state.run_info.remove(&guid) {
            debug!(%id, %guid, container = %run_info.container, "stopping service container");
            self.backend
                .stop_container(cancel, &run_info.container, stop_timeout)
                .await
                .map_err(|err| NetworkError::backend("stop_container", err))?;
            // Free the container's DNS alias so a future service can
            // reuse the ID.
            self.backend
                .disconnect_from_network(cancel, &run_info.container, &self.network_handle)
                .await
                .map_err(|err| NetworkError::backend("disconnect_from_network", err))?;
        }

        state
            .sidecars
            .detach(cancel, &guid)
            .await
            .map_err(|err| NetworkError::backend("detach_sidecar", err))?;

        info!(%id, %guid, "service removed");
        Ok(guid)
    }

    // ── Repartition ────────────────────────────────────────────────

    /// Swap the whole partition topology and push the resulting tables to
    /// every sidecar.
    ///
    /// The swap is atomic and validated up front. The pushes fan out in
    /// parallel; if any fail, the topology has still changed — the
    /// returned [`NetworkError::PartialEnforcement`] names the services
    /// whose traffic control is now stale so the caller can retry or
    /// destroy the enclave.
    pub async fn repartition(
        &self,
        cancel: &CancellationToken,
        new_partitions: BTreeMap<PartitionId, std::collections::BTreeSet<ServiceGuid>>,
        new_connections: BTreeMap<ConnectionId, PartitionConnection>,
        new_default: PartitionConnection,
    ) -> NetworkResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_alive(&state)?;

        if !self.is_partitioning_enabled {
            return Err(NetworkError::InvalidArgument(
                "cannot repartition; partitioning is not enabled for this enclave".to_string(),
            ));
        }

        state
            .topology
            .repartition(new_partitions, new_connections, new_default)?;

        let loss = state.topology.loss_by_service();
        let mut jobs: BTreeMap<String, (burrow_backend::ContainerHandle, BTreeMap<Ipv4Addr, f32>)> =
            BTreeMap::new();
        for (guid, row) in &loss {
            let Some(handle) = state.sidecars.handle_of(guid) else {
                continue;
            };
            jobs.insert(guid.to_string(), (handle.clone(), ip_table(&state, row)?));
        }

        let backend = Arc::clone(&self.backend);
        let ids = jobs.keys().cloned().collect();
        let outcome = parallel::run_in_parallel(
            cancel,
            ids,
            parallel::DEFAULT_MAX_IN_FLIGHT,
            move |id, task_cancel| {
                let (handle, table) = jobs[&id].clone();
                apply_traffic_control(Arc::clone(&backend), task_cancel, handle, table)
            },
        )
        .await;

        if !outcome.all_succeeded() {
            let affected = outcome
                .failed
                .into_iter()
                .map(|(id, err)| (ServiceGuid::new(id), err))
                .collect();
            return Err(NetworkError::PartialEnforcement { affected });
        }

        info!(enclave = %self.enclave_id, "network repartitioned");
        Ok(())
    }

    // ── Exec ───────────────────────────────────────────────────────

    /// Run a command synchronously inside a started service's container.
    ///
    /// Holds the enclave lock for the duration: every other operation on
    /// this network waits until the command finishes.
    pub async fn exec_command(
        &self,
        cancel: &CancellationToken,
        id: &ServiceId,
        argv: &[String],
    ) -> NetworkResult<(i32, Vec<u8>)> {
        let state = self.state.lock().await;
        self.ensure_alive(&state)?;

        let guid = state
            .ids_to_guids
            .get(id)
            .ok_or_else(|| NetworkError::NotFound(format!("no service '{id}' is registered")))?;
        let run_info = state.run_info.get(guid).ok_or_else(|| {
            NetworkError::NotFound(format!(
                "no container has been started for service '{id}' yet"
            ))
        })?;

        let result = self
            .backend
            .exec(cancel, &run_info.container, argv)
            .await
            .map_err(|err| NetworkError::backend("exec", err))?;
        Ok((result.exit_code, result.output))
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub async fn registration_info(&self, id: &ServiceId) -> NetworkResult<RegistrationInfo> {
        let state = self.state.lock().await;
        self.ensure_alive(&state)?;
        let guid = state
            .ids_to_guids
            .get(id)
            .ok_or_else(|| NetworkError::NotFound(format!("no service '{id}' is registered")))?;
        state
            .registrations
            .get(guid)
            .cloned()
            .ok_or_else(|| fatal_missing_registration(guid))
    }

    pub async fn run_info(&self, id: &ServiceId) -> NetworkResult<RunInfo> {
        let state = self.state.lock().await;
        self.ensure_alive(&state)?;
        let guid = state
            .ids_to_guids
            .get(id)
            .ok_or_else(|| NetworkError::NotFound(format!("no service '{id}' is registered")))?;
        state.run_info.get(guid).cloned().ok_or_else(|| {
            NetworkError::NotFound(format!(
                "no run information exists for service '{id}'"
            ))
        })
    }

    /// IDs of all currently registered services.
    pub async fn service_ids(&self) -> NetworkResult<Vec<ServiceId>> {
        let state = self.state.lock().await;
        self.ensure_alive(&state)?;
        Ok(state.ids_to_guids.keys().cloned().collect())
    }

    /// The packet-loss map the current topology implies.
    pub async fn packet_loss_by_service(&self) -> NetworkResult<ServicePacketLoss> {
        let state = self.state.lock().await;
        self.ensure_alive(&state)?;
        Ok(state.topology.loss_by_service())
    }

    // ── Destruction ────────────────────────────────────────────────

    /// Mark the network destroyed and tear everything down best-effort:
    /// sidecars, then containers, then artifact directories. Partial
    /// failures are aggregated per GUID.
    pub async fn destroy(&self, cancel: &CancellationToken) -> NetworkResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_alive(&state)?;
        state.is_destroyed = true;
        info!(enclave = %self.enclave_id, "destroying service network");

        let mut affected: BTreeMap<ServiceGuid, BackendError> = BTreeMap::new();

        // Sidecars.
        let sidecars = state.sidecars.take_all();
        let handles: BTreeMap<String, burrow_backend::ContainerHandle> = sidecars
            .into_iter()
            .map(|(guid, sidecar)| (guid.to_string(), sidecar.handle))
            .collect();
        let backend = Arc::clone(&self.backend);
        let outcome = parallel::run_in_parallel(
            cancel,
            handles.keys().cloned().collect(),
            parallel::DEFAULT_MAX_IN_FLIGHT,
            move |id, task_cancel| {
                let backend = Arc::clone(&backend);
                let handle = handles[&id].clone();
                async move { backend.destroy_container(&task_cancel, &handle).await }
            },
        )
        .await;
        for (id, err) in outcome.failed {
            affected.insert(ServiceGuid::new(id), err);
        }

        // Service containers.
        let containers: BTreeMap<String, burrow_backend::ContainerHandle> = state
            .run_info
            .iter()
            .map(|(guid, run_info)| (guid.to_string(), run_info.container.clone()))
            .collect();
        state.run_info.clear();
        let backend = Arc::clone(&self.backend);
        let outcome = parallel::run_in_parallel(
            cancel,
            containers.keys().cloned().collect(),
            parallel::DEFAULT_MAX_IN_FLIGHT,
            move |id, task_cancel| {
                let backend = Arc::clone(&backend);
                let handle = containers[&id].clone();
                async move { backend.destroy_container(&task_cancel, &handle).await }
            },
        )
        .await;
        for (id, err) in outcome.failed {
            affected.insert(ServiceGuid::new(id), err);
        }

        // Artifact directories.
        let registered: Vec<ServiceGuid> = state.registrations.keys().cloned().collect();
        for guid in &registered {
            if let Err(err) = self.artifacts.remove_service_directory(guid).await {
                affected.insert(
                    guid.clone(),
                    BackendError::OperationFailed {
                        op: "remove_service_directory",
                        message: err.to_string(),
                    },
                );
            }
        }
        state.registrations.clear();
        state.ids_to_guids.clear();

        if affected.is_empty() {
            Ok(())
        } else {
            Err(NetworkError::PartialEnforcement { affected })
        }
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn ensure_alive(&self, state: &NetworkState) -> NetworkResult<()> {
        if state.is_destroyed {
            return Err(NetworkError::Destroyed(self.enclave_id.clone()));
        }
        Ok(())
    }

    /// Push tables to every service in the map that has a sidecar.
    /// Services that are registered but not yet started have no sidecar
    /// and get their table when they start.
    async fn push_traffic_control(
        &self,
        cancel: &CancellationToken,
        state: &NetworkState,
        loss: &ServicePacketLoss,
    ) -> NetworkResult<()> {
        for (guid, row) in loss {
            if !state.sidecars.contains(guid) {
                continue;
            }
            let table = ip_table(state, row)?;
            state
                .sidecars
                .update_traffic_control(cancel, guid, &table)
                .await
                .map_err(|err| NetworkError::backend("update_traffic_control", err))?;
        }
        Ok(())
    }

    async fn container_spec(
        &self,
        registration: &RegistrationInfo,
        config: &ServiceStartConfig,
    ) -> NetworkResult<ContainerSpec> {
        let mut mounts = vec![MountSpec {
            host_path: registration.artifact_dir.clone(),
            container_path: SERVICE_SCRATCH_MOUNTPOINT.to_string(),
        }];
        for (artifact, mountpoint) in &config.artifact_mounts {
            let host_path = self
                .artifacts
                .lookup_artifact(artifact)
                .await
                .map_err(|err| NetworkError::artifacts("lookup_artifact", err))?;
            mounts.push(MountSpec {
                host_path,
                container_path: mountpoint.clone(),
            });
        }
        Ok(ContainerSpec {
            name: format!("{}--{}", self.enclave_id, registration.id),
            image: config.image.clone(),
            network: self.network_handle.clone(),
            private_ip: registration.private_ip,
            private_ports: config.private_ports.clone(),
            entrypoint: config.entrypoint.clone(),
            cmd: config.cmd.clone(),
            env: config.env.clone(),
            mounts,
            labels: labels::object_labels(
                &self.enclave_id,
                ContainerKind::UserService,
                &registration.guid,
            ),
            publish_ports: config.publish_ports,
        })
    }

    /// Undo a registration completely: topology slot, maps, IP, scratch
    /// directory. Runs on every start failure so the service returns to
    /// the unregistered state with all resources released.
    async fn rollback_registration(
        &self,
        state: &mut NetworkState,
        registration: &RegistrationInfo,
    ) {
        state.topology.remove_service(&registration.guid);
        state.registrations.remove(&registration.guid);
        state.ids_to_guids.remove(&registration.id);
        state.allocator.release(registration.private_ip);
        if let Err(err) = self
            .artifacts
            .remove_service_directory(&registration.guid)
            .await
        {
            warn!(
                guid = %registration.guid,
                error = %err,
                "failed to remove service directory during rollback"
            );
        }
        debug!(guid = %registration.guid, "registration rolled back");
    }

    /// Best-effort teardown of a container started during a failed call.
    async fn teardown_container(
        &self,
        cancel: &CancellationToken,
        handle: &burrow_backend::ContainerHandle,
    ) {
        if let Err(err) = self.backend.destroy_container(cancel, handle).await {
            warn!(%handle, error = %err, "failed to tear down container after start failure");
        }
    }
}

/// Translate a GUID-keyed loss row into the IP-keyed table a sidecar
/// consumes.
fn ip_table(
    state: &NetworkState,
    row: &BTreeMap<ServiceGuid, f32>,
) -> NetworkResult<BTreeMap<Ipv4Addr, f32>> {
    let mut table = BTreeMap::new();
    for (peer, loss) in row {
        let registration = state
            .registrations
            .get(peer)
            .ok_or_else(|| fatal_missing_registration(peer))?;
        table.insert(registration.private_ip, *loss);
    }
    Ok(table)
}

fn fatal_missing_registration(guid: &ServiceGuid) -> NetworkError {
    NetworkError::Fatal(format!(
        "service '{guid}' is known to the network but has no registration"
    ))
}

fn allocator_error(err: AllocatorError) -> NetworkError {
    match err {
        AllocatorError::Exhausted(cidr) => NetworkError::Exhausted(cidr),
        AllocatorError::Conflict(addr) => {
            NetworkError::Conflict(format!("address {addr} is already reserved"))
        }
        other => NetworkError::InvalidArgument(other.to_string()),
    }
}

impl From<TopologyError> for NetworkError {
    fn from(err: TopologyError) -> Self {
        NetworkError::InvalidArgument(err.to_string())
    }
}
