//! Docker backend driving the `docker` CLI.
//!
//! Every operation shells out to `docker` and interprets its exit status
//! and output. The CLI is deliberate: it keeps the backend dependency-free
//! and matches what an operator would type to inspect the same state.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use burrow_core::PortSpec;

use crate::backend::ContainerBackend;
use crate::error::{BackendError, BackendResult};
use crate::types::{
    ContainerHandle, ContainerInfo, ContainerSpec, ExecOutput, NetworkHandle, StartedContainer,
};

/// Image used for traffic-control sidecars; must ship `tc` and `sh`.
const DEFAULT_SIDECAR_IMAGE: &str = "nicolaka/netshoot:v0.13";

/// Backend implementation for a local or remote Docker daemon.
pub struct DockerCliBackend {
    sidecar_image: String,
}

impl DockerCliBackend {
    pub fn new() -> Self {
        Self {
            sidecar_image: DEFAULT_SIDECAR_IMAGE.to_string(),
        }
    }

    pub fn with_sidecar_image(mut self, image: impl Into<String>) -> Self {
        self.sidecar_image = image.into();
        self
    }

    /// Run `docker <args>`, failing on nonzero exit.
    async fn docker(
        &self,
        cancel: &CancellationToken,
        op: &'static str,
        args: &[String],
    ) -> BackendResult<String> {
        let output = self.docker_raw(cancel, op, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Err(BackendError::NotFound(stderr.trim().to_string()));
            }
            return Err(BackendError::op_failed(op, stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run `docker <args>` and hand back the raw output, whatever the exit
    /// status. Checks cancellation before spawning and while waiting.
    async fn docker_raw(
        &self,
        cancel: &CancellationToken,
        op: &'static str,
        args: &[String],
    ) -> BackendResult<Output> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        debug!(%op, ?args, "docker cli call");
        let mut command = Command::new("docker");
        command.args(args).kill_on_drop(true);
        tokio::select! {
            output = command.output() => Ok(output?),
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
        }
    }
}

impl Default for DockerCliBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerBackend for DockerCliBackend {
    async fn check_ready(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> BackendResult<()> {
        let args = str_args(&["version", "--format", "{{.Server.Version}}"]);
        match tokio::time::timeout(timeout, self.docker(cancel, "check_ready", &args)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(BackendError::DeadlineExceeded(timeout)),
        }
    }

    async fn create_network(
        &self,
        cancel: &CancellationToken,
        name: &str,
        cidr: &str,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<NetworkHandle> {
        let mut args = str_args(&["network", "create", "--driver", "bridge", "--subnet"]);
        args.push(cidr.to_string());
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(name.to_string());
        let id = self.docker(cancel, "create_network", &args).await?;
        Ok(NetworkHandle::new(id))
    }

    async fn destroy_network(
        &self,
        cancel: &CancellationToken,
        network: &NetworkHandle,
    ) -> BackendResult<()> {
        let args = str_args(&["network", "rm", network.as_str()]);
        match self.docker(cancel, "destroy_network", &args).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn start_container(
        &self,
        cancel: &CancellationToken,
        spec: ContainerSpec,
    ) -> BackendResult<StartedContainer> {
        let mut args = str_args(&["run", "-d", "--name"]);
        args.push(spec.name.clone());
        args.push("--network".to_string());
        args.push(spec.network.as_str().to_string());
        args.push("--ip".to_string());
        args.push(spec.private_ip.to_string());
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            args.push("--volume".to_string());
            args.push(format!(
                "{}:{}",
                mount.host_path.display(),
                mount.container_path
            ));
        }
        if spec.publish_ports {
            for port in spec.private_ports.values() {
                args.push("--publish".to_string());
                // Port 0 asks the daemon for an ephemeral host port.
                args.push(format!("0:{}/{}", port.number, port.protocol));
            }
        }
        // The CLI's --entrypoint takes a single binary; remaining
        // entrypoint words are prepended to the command arguments.
        let mut trailing: Vec<String> = Vec::new();
        if let Some(entrypoint) = &spec.entrypoint {
            if let Some((first, rest)) = entrypoint.split_first() {
                args.push("--entrypoint".to_string());
                args.push(first.clone());
                trailing.extend(rest.iter().cloned());
            }
        }
        args.push(spec.image.clone());
        args.extend(trailing);
        args.extend(spec.cmd.iter().cloned());

        let container_id = self.docker(cancel, "start_container", &args).await?;
        let handle = ContainerHandle::new(container_id);

        let mut public_ip = None;
        let mut public_ports = BTreeMap::new();
        if spec.publish_ports && !spec.private_ports.is_empty() {
            for (port_id, port) in &spec.private_ports {
                let args = vec![
                    "port".to_string(),
                    handle.as_str().to_string(),
                    format!("{}/{}", port.number, port.protocol),
                ];
                let binding = self.docker(cancel, "inspect_port", &args).await?;
                if let Some(host_port) = parse_host_port(&binding) {
                    public_ports.insert(
                        port_id.clone(),
                        PortSpec {
                            number: host_port,
                            protocol: port.protocol,
                        },
                    );
                }
            }
            if !public_ports.is_empty() {
                public_ip = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
            }
        }

        Ok(StartedContainer {
            handle,
            public_ip,
            public_ports,
        })
    }

    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> BackendResult<()> {
        let args = vec![
            "stop".to_string(),
            "--time".to_string(),
            timeout.as_secs().to_string(),
            handle.as_str().to_string(),
        ];
        self.docker(cancel, "stop_container", &args).await.map(|_| ())
    }

    async fn destroy_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> BackendResult<()> {
        let args = str_args(&["rm", "--force", handle.as_str()]);
        match self.docker(cancel, "destroy_container", &args).await {
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
        let mut args = str_args(&["exec", handle.as_str()]);
        args.extend(argv.iter().cloned());
        let output = self.docker_raw(cancel, "exec", &args).await?;
        // Only the daemon's own complaint counts as missing; the exec'd
        // command is free to print "not found" itself.
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_ascii_lowercase().contains("no such container") {
            return Err(BackendError::NotFound(stderr.trim().to_string()));
        }
        // `docker exec` forwards the command's exit code.
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
        cancel: &CancellationToken,
        target: &ContainerHandle,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<ContainerHandle> {
        // The sidecar joins the target's network namespace so its qdisc
        // rules apply to the service's own interface.
        let mut args = str_args(&["run", "-d", "--network"]);
        args.push(format!("container:{}", target.as_str()));
        args.push("--cap-add".to_string());
        args.push("NET_ADMIN".to_string());
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.sidecar_image.clone());
        args.extend(str_args(&["sleep", "infinity"]));
        let id = self.docker(cancel, "create_sidecar", &args).await?;
        Ok(ContainerHandle::new(id))
    }

    async fn run_in_sidecar(
        &self,
        cancel: &CancellationToken,
        sidecar: &ContainerHandle,
        argv: &[String],
    ) -> BackendResult<()> {
        let result = self.exec(cancel, sidecar, argv).await?;
        if result.exit_code != 0 {
            return Err(BackendError::op_failed(
                "run_in_sidecar",
                format!(
                    "command {:?} exited with {}: {}",
                    argv,
                    result.exit_code,
                    String::from_utf8_lossy(&result.output).trim()
                ),
            ));
        }
        Ok(())
    }

    async fn disconnect_from_network(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        network: &NetworkHandle,
    ) -> BackendResult<()> {
        let args = str_args(&[
            "network",
            "disconnect",
            network.as_str(),
            handle.as_str(),
        ]);
        self.docker(cancel, "disconnect_from_network", &args)
            .await
            .map(|_| ())
    }

    async fn list_containers(
        &self,
        cancel: &CancellationToken,
        selector: &BTreeMap<String, String>,
    ) -> BackendResult<Vec<ContainerInfo>> {
        let mut args = str_args(&["ps", "--all", "--no-trunc"]);
        for (key, value) in selector {
            args.push("--filter".to_string());
            args.push(format!("label={key}={value}"));
        }
        args.push("--format".to_string());
        args.push("{{json .}}".to_string());
        let stdout = self.docker(cancel, "list_containers", &args).await?;

        let mut containers = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let row: serde_json::Value = serde_json::from_str(line).map_err(|e| {
                BackendError::op_failed("list_containers", format!("bad ps row: {e}"))
            })?;
            let handle = row["ID"].as_str().unwrap_or_default().to_string();
            let name = row["Names"].as_str().unwrap_or_default().to_string();
            let is_running = row["State"].as_str() == Some("running");
            let labels = row["Labels"]
                .as_str()
                .unwrap_or_default()
                .split(',')
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect();
            containers.push(ContainerInfo {
                handle: ContainerHandle::new(handle),
                name,
                labels,
                is_running,
            });
        }
        Ok(containers)
    }
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container")
        || lower.contains("no such object")
        || lower.contains("not found")
}

/// Parse `0.0.0.0:49153` (the first line of `docker port` output).
fn parse_host_port(binding: &str) -> Option<u16> {
    binding
        .lines()
        .next()?
        .rsplit_once(':')?
        .1
        .trim()
        .parse()
        .ok()
}
