//! The `ContainerBackend` capability trait.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BackendResult;
use crate::types::{
    ContainerHandle, ContainerInfo, ContainerSpec, ExecOutput, NetworkHandle, StartedContainer,
};

/// Capability for driving containers on some engine (Docker, Kubernetes).
///
/// Implementations must be safe for concurrent use: multiple enclaves drive
/// one backend simultaneously. Every operation observes the cancellation
/// token and returns [`crate::BackendError::Cancelled`] when it fires
/// before or during the call.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Probe engine liveness, bounded by `timeout`.
    async fn check_ready(&self, cancel: &CancellationToken, timeout: Duration)
        -> BackendResult<()>;

    /// Create an isolated network for one enclave.
    async fn create_network(
        &self,
        cancel: &CancellationToken,
        name: &str,
        cidr: &str,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<NetworkHandle>;

    /// Destroy an enclave network. Succeeds if the network is already gone.
    async fn destroy_network(
        &self,
        cancel: &CancellationToken,
        network: &NetworkHandle,
    ) -> BackendResult<()>;

    /// Start a container as described and wait until it is running.
    async fn start_container(
        &self,
        cancel: &CancellationToken,
        spec: ContainerSpec,
    ) -> BackendResult<StartedContainer>;

    /// Stop a container, giving it `timeout` to exit gracefully.
    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> BackendResult<()>;

    /// Force-remove a container, running or not. Succeeds if already gone.
    async fn destroy_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> BackendResult<()>;

    /// Run a command inside a running container, returning its exit code
    /// and combined output. A nonzero exit code is NOT an error.
    async fn exec(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        argv: &[String],
    ) -> BackendResult<ExecOutput>;

    /// Create a traffic-control sidecar sharing the target container's
    /// network namespace.
    async fn create_sidecar(
        &self,
        cancel: &CancellationToken,
        target: &ContainerHandle,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<ContainerHandle>;

    /// Run a command inside a sidecar (e.g. a `tc` invocation). A nonzero
    /// exit code IS an error here: qdisc mutations must apply fully.
    async fn run_in_sidecar(
        &self,
        cancel: &CancellationToken,
        sidecar: &ContainerHandle,
        argv: &[String],
    ) -> BackendResult<()>;

    /// Detach a container from an enclave network so its DNS alias frees
    /// up for reuse by a later service with the same name.
    async fn disconnect_from_network(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        network: &NetworkHandle,
    ) -> BackendResult<()>;

    /// List containers whose labels match every entry of the selector.
    async fn list_containers(
        &self,
        cancel: &CancellationToken,
        selector: &BTreeMap<String, String>,
    ) -> BackendResult<Vec<ContainerInfo>>;
}
