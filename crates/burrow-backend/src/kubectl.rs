//! Kubernetes backend driving the `kubectl` CLI.
//!
//! An enclave maps to a namespace; a service container maps to a pod.
//! Pod IPs are assigned by the cluster CNI, so the requested private IP is
//! advisory here — the authoritative address for in-enclave DNS is the pod
//! name. Traffic-control sidecars require joining an existing network
//! namespace, which Kubernetes does not allow after pod creation, so
//! partitioning-enabled enclaves must run on the Docker backend.

use std::collections::BTreeMap;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::ContainerBackend;
use crate::error::{BackendError, BackendResult};
use crate::types::{
    ContainerHandle, ContainerInfo, ContainerSpec, ExecOutput, NetworkHandle, StartedContainer,
};

/// Backend implementation for a Kubernetes cluster reachable via kubectl.
pub struct KubectlBackend;

impl KubectlBackend {
    pub fn new() -> Self {
        Self
    }

    async fn kubectl(
        &self,
        cancel: &CancellationToken,
        op: &'static str,
        args: &[String],
    ) -> BackendResult<String> {
        let output = self.kubectl_raw(cancel, op, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_ascii_lowercase().contains("not found") {
                return Err(BackendError::NotFound(stderr.trim().to_string()));
            }
            return Err(BackendError::op_failed(op, stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn kubectl_raw(
        &self,
        cancel: &CancellationToken,
        op: &'static str,
        args: &[String],
    ) -> BackendResult<Output> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        debug!(%op, ?args, "kubectl call");
        let mut command = Command::new("kubectl");
        command.args(args).kill_on_drop(true);
        tokio::select! {
            output = command.output() => Ok(output?),
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
        }
    }
}

impl Default for KubectlBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerBackend for KubectlBackend {
    async fn check_ready(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> BackendResult<()> {
        let args = vec![
            "version".to_string(),
            format!("--request-timeout={}s", timeout.as_secs().max(1)),
        ];
        match tokio::time::timeout(timeout, self.kubectl(cancel, "check_ready", &args)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(BackendError::DeadlineExceeded(timeout)),
        }
    }

    async fn create_network(
        &self,
        cancel: &CancellationToken,
        name: &str,
        _cidr: &str,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<NetworkHandle> {
        let args = vec!["create".to_string(), "namespace".to_string(), name.to_string()];
        self.kubectl(cancel, "create_network", &args).await?;
        if !labels.is_empty() {
            let mut label_args = vec![
                "label".to_string(),
                "namespace".to_string(),
                name.to_string(),
            ];
            for (key, value) in labels {
                label_args.push(format!("{key}={value}"));
            }
            self.kubectl(cancel, "create_network", &label_args).await?;
        }
        Ok(NetworkHandle::new(name))
    }

    async fn destroy_network(
        &self,
        cancel: &CancellationToken,
        network: &NetworkHandle,
    ) -> BackendResult<()> {
        let args = vec![
            "delete".to_string(),
            "namespace".to_string(),
            network.as_str().to_string(),
            "--wait=false".to_string(),
        ];
        match self.kubectl(cancel, "destroy_network", &args).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn start_container(
        &self,
        cancel: &CancellationToken,
        spec: ContainerSpec,
    ) -> BackendResult<StartedContainer> {
        let mut args = vec![
            "run".to_string(),
            spec.name.clone(),
            format!("--image={}", spec.image),
            format!("--namespace={}", spec.network.as_str()),
            "--restart=Never".to_string(),
        ];
        if !spec.labels.is_empty() {
            let joined = spec
                .labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            args.push(format!("--labels={joined}"));
        }
        for (key, value) in &spec.env {
            args.push(format!("--env={key}={value}"));
        }
        for port in spec.private_ports.values() {
            args.push(format!("--port={}", port.number));
        }
        // With --command, everything after `--` replaces the image
        // entrypoint instead of being appended as arguments.
        let mut trailing: Vec<String> = Vec::new();
        if let Some(entrypoint) = &spec.entrypoint {
            args.push("--command".to_string());
            trailing.extend(entrypoint.iter().cloned());
        }
        trailing.extend(spec.cmd.iter().cloned());
        if !trailing.is_empty() {
            args.push("--".to_string());
            args.extend(trailing);
        }
        self.kubectl(cancel, "start_container", &args).await?;

        let wait_args = vec![
            "wait".to_string(),
            format!("pod/{}", spec.name),
            format!("--namespace={}", spec.network.as_str()),
            "--for=condition=Ready".to_string(),
            "--timeout=60s".to_string(),
        ];
        self.kubectl(cancel, "start_container", &wait_args).await?;

        // Pod ports are cluster-internal; nothing is published to the host.
        Ok(StartedContainer {
            handle: ContainerHandle::new(format!("{}/{}", spec.network.as_str(), spec.name)),
            public_ip: None,
            public_ports: BTreeMap::new(),
        })
    }

    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> BackendResult<()> {
        let (namespace, pod) = split_handle(handle)?;
        let args = vec![
            "delete".to_string(),
            "pod".to_string(),
            pod.to_string(),
            format!("--namespace={namespace}"),
            format!("--grace-period={}", timeout.as_secs()),
        ];
        self.kubectl(cancel, "stop_container", &args).await.map(|_| ())
    }

    async fn destroy_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> BackendResult<()> {
        let (namespace, pod) = split_handle(handle)?;
        let args = vec![
            "delete".to_string(),
            "pod".to_string(),
            pod.to_string(),
            format!("--namespace={namespace}"),
            "--force".to_string(),
            "--grace-period=0".to_string(),
        ];
        match self.kubectl(cancel, "destroy_container", &args).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn exec(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        argv: &[String],
    ) -> BackendResult<ExecOutput> {
        let (namespace, pod) = split_handle(handle)?;
        let mut args = vec![
            "exec".to_string(),
            pod.to_string(),
            format!("--namespace={namespace}"),
            "--".to_string(),
        ];
        args.extend(argv.iter().cloned());
        let output = self.kubectl_raw(cancel, "exec", &args).await?;
        let exit_code = output.status.code().unwrap_or(-1);
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(ExecOutput {
            exit_code,
            output: combined,
        })
    }

    async fn create_sidecar(
        &self,
        _cancel: &CancellationToken,
        _target: &ContainerHandle,
        _labels: &BTreeMap<String, String>,
    ) -> BackendResult<ContainerHandle> {
        Err(BackendError::Unsupported(
            "traffic-control sidecars (run partitioning-enabled enclaves on the docker backend)",
        ))
    }

    async fn run_in_sidecar(
        &self,
        _cancel: &CancellationToken,
        _sidecar: &ContainerHandle,
        _argv: &[String],
    ) -> BackendResult<()> {
        Err(BackendError::Unsupported("traffic-control sidecars"))
    }

    async fn disconnect_from_network(
        &self,
        _cancel: &CancellationToken,
        _handle: &ContainerHandle,
        _network: &NetworkHandle,
    ) -> BackendResult<()> {
        // Pod deletion (stop_container) already releases the pod's DNS
        // name, which is the alias-reuse property this call provides on
        // Docker.
        Ok(())
    }

    async fn list_containers(
        &self,
        cancel: &CancellationToken,
        selector: &BTreeMap<String, String>,
    ) -> BackendResult<Vec<ContainerInfo>> {
        let joined = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let args = vec![
            "get".to_string(),
            "pods".to_string(),
            "--all-namespaces".to_string(),
            format!("--selector={joined}"),
            "--output=json".to_string(),
        ];
        let stdout = self.kubectl(cancel, "list_containers", &args).await?;
        let doc: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
            BackendError::op_failed("list_containers", format!("bad pod list: {e}"))
        })?;

        let mut containers = Vec::new();
        for item in doc["items"].as_array().into_iter().flatten() {
            let namespace = item["metadata"]["namespace"].as_str().unwrap_or_default();
            let name = item["metadata"]["name"].as_str().unwrap_or_default();
            let labels = item["metadata"]["labels"]
                .as_object()
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            let is_running = item["status"]["phase"].as_str() == Some("Running");
            containers.push(ContainerInfo {
                handle: ContainerHandle::new(format!("{namespace}/{name}")),
                name: name.to_string(),
                labels,
                is_running,
            });
        }
        Ok(containers)
    }
}

/// Handles are `namespace/pod`.
fn split_handle(handle: &ContainerHandle) -> BackendResult<(&str, &str)> {
    handle
        .as_str()
        .split_once('/')
        .ok_or_else(|| BackendError::op_failed("split_handle", format!("malformed handle: {handle}")))
}
