//! Operation-counting decorator over any backend.
//!
//! Wraps an inner [`ContainerBackend`] and tallies per-operation call and
//! failure counts. Applied at construction time by the daemon so every
//! backend call in the process is counted, whichever implementation runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::ContainerBackend;
use crate::error::BackendResult;
use crate::types::{
    ContainerHandle, ContainerInfo, ContainerSpec, ExecOutput, NetworkHandle, StartedContainer,
};

/// Call/failure tallies for one operation.
#[derive(Debug, Default)]
pub struct OpCounter {
    pub calls: AtomicU64,
    pub failures: AtomicU64,
}

/// All counters kept by [`MetricsBackend`].
#[derive(Debug, Default)]
pub struct BackendOpCounts {
    pub check_ready: OpCounter,
    pub create_network: OpCounter,
    pub destroy_network: OpCounter,
    pub start_container: OpCounter,
    pub stop_container: OpCounter,
    pub destroy_container: OpCounter,
    pub exec: OpCounter,
    pub create_sidecar: OpCounter,
    pub run_in_sidecar: OpCounter,
    pub disconnect_from_network: OpCounter,
    pub list_containers: OpCounter,
}

impl BackendOpCounts {
    /// Flat snapshot of `(operation, calls, failures)` rows.
    pub fn snapshot(&self) -> BTreeMap<&'static str, (u64, u64)> {
        let rows: [(&'static str, &OpCounter); 11] = [
            ("check_ready", &self.check_ready),
            ("create_network", &self.create_network),
            ("destroy_network", &self.destroy_network),
            ("start_container", &self.start_container),
            ("stop_container", &self.stop_container),
            ("destroy_container", &self.destroy_container),
            ("exec", &self.exec),
            ("create_sidecar", &self.create_sidecar),
            ("run_in_sidecar", &self.run_in_sidecar),
            ("disconnect_from_network", &self.disconnect_from_network),
            ("list_containers", &self.list_containers),
        ];
        rows.into_iter()
            .map(|(name, counter)| {
                (
                    name,
                    (
                        counter.calls.load(Ordering::Relaxed),
                        counter.failures.load(Ordering::Relaxed),
                    ),
                )
            })
            .collect()
    }
}

/// Decorator that counts every backend call.
pub struct MetricsBackend {
    inner: Arc<dyn ContainerBackend>,
    counts: Arc<BackendOpCounts>,
}

impl MetricsBackend {
    pub fn new(inner: Arc<dyn ContainerBackend>) -> Self {
        Self {
            inner,
            counts: Arc::new(BackendOpCounts::default()),
        }
    }

    pub fn counts(&self) -> Arc<BackendOpCounts> {
        Arc::clone(&self.counts)
    }

    fn record<T>(counter: &OpCounter, result: &BackendResult<T>) {
        counter.calls.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            counter.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl ContainerBackend for MetricsBackend {
    async fn check_ready(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> BackendResult<()> {
        let result = self.inner.check_ready(cancel, timeout).await;
        Self::record(&self.counts.check_ready, &result);
        result
    }

    async fn create_network(
        &self,
        cancel: &CancellationToken,
        name: &str,
        cidr: &str,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<NetworkHandle> {
        let result = self.inner.create_network(cancel, name, cidr, labels).await;
        Self::record(&self.counts.create_network, &result);
        result
    }

    async fn destroy_network(
        &self,
        cancel: &CancellationToken,
        network: &NetworkHandle,
    ) -> BackendResult<()> {
        let result = self.inner.destroy_network(cancel, network).await;
        Self::record(&self.counts.destroy_network, &result);
        result
    }

    async fn start_container(
        &self,
        cancel: &CancellationToken,
        spec: ContainerSpec,
    ) -> BackendResult<StartedContainer> {
        let result = self.inner.start_container(cancel, spec).await;
        Self::record(&self.counts.start_container, &result);
        result
    }

    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> BackendResult<()> {
        let result = self.inner.stop_container(cancel, handle, timeout).await;
        Self::record(&self.counts.stop_container, &result);
        result
    }

    async fn destroy_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> BackendResult<()> {
        let result = self.inner.destroy_container(cancel, handle).await;
        Self::record(&self.counts.destroy_container, &result);
        result
    }

    async fn exec(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        argv: &[String],
    ) -> BackendResult<ExecOutput> {
        let result = self.inner.exec(cancel, handle, argv).await;
        Self::record(&self.counts.exec, &result);
        result
    }

    async fn create_sidecar(
        &self,
        cancel: &CancellationToken,
        target: &ContainerHandle,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<ContainerHandle> {
        let result = self.inner.create_sidecar(cancel, target, labels).await;
        Self::record(&self.counts.create_sidecar, &result);
        result
    }

    async fn run_in_sidecar(
        &self,
        cancel: &CancellationToken,
        sidecar: &ContainerHandle,
        argv: &[String],
    ) -> BackendResult<()> {
        let result = self.inner.run_in_sidecar(cancel, sidecar, argv).await;
        Self::record(&self.counts.run_in_sidecar, &result);
        result
    }

    async fn disconnect_from_network(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        network: &NetworkHandle,
    ) -> BackendResult<()> {
        let result = self
            .inner
            .disconnect_from_network(cancel, handle, network)
            .await;
        Self::record(&self.counts.disconnect_from_network, &result);
        result
    }

    async fn list_containers(
        &self,
        cancel: &CancellationToken,
        selector: &BTreeMap<String, String>,
    ) -> BackendResult<Vec<ContainerInfo>> {
        let result = self.inner.list_containers(cancel, selector).await;
        Self::record(&self.counts.list_containers, &result);
        result
    }
}
