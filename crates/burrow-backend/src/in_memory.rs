//! In-memory backend for tests.
//!
//! Simulates container state transitions without any engine, records every
//! call for ordering assertions, and supports scripted exec output plus
//! one-shot failure injection per operation.

use std::collections::{BTreeMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use burrow_core::PortSpec;

use crate::backend::ContainerBackend;
use crate::error::{BackendError, BackendResult};
use crate::types::{
    ContainerHandle, ContainerInfo, ContainerSpec, ExecOutput, NetworkHandle, StartedContainer,
};

/// One recorded backend invocation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CheckReady,
    CreateNetwork { name: String },
    DestroyNetwork { network: String },
    StartContainer { name: String },
    StopContainer { handle: String },
    DestroyContainer { handle: String },
    Exec { handle: String, argv: Vec<String> },
    CreateSidecar { target: String, sidecar: String },
    RunInSidecar { sidecar: String, argv: Vec<String> },
    DisconnectFromNetwork { handle: String },
    ListContainers,
}

#[derive(Debug, Clone)]
struct ContainerRecord {
    name: String,
    network: Option<String>,
    labels: BTreeMap<String, String>,
    is_running: bool,
    is_sidecar: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    networks: BTreeMap<String, String>, // name → cidr
    containers: BTreeMap<String, ContainerRecord>, // handle → record
    calls: Vec<BackendCall>,
    injected_failures: BTreeMap<&'static str, VecDeque<String>>,
    exec_scripts: BTreeMap<String, (i32, Vec<u8>)>, // argv[0] → outcome
}

/// Backend double with no real containers behind it.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `message`.
    pub fn inject_failure(&self, op: &'static str, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state
            .injected_failures
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// Script the outcome of exec'ing a program by its argv[0].
    pub fn script_exec(&self, program: impl Into<String>, exit_code: i32, output: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state
            .exec_scripts
            .insert(program.into(), (exit_code, output.to_vec()));
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Forget recorded calls (to scope assertions to one phase of a test).
    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Handle of the sidecar attached to the named container, if any.
    pub fn sidecar_for(&self, container_name: &str) -> Option<ContainerHandle> {
        let state = self.state.lock().unwrap();
        let expected = format!("sidecar-of-{container_name}");
        state
            .containers
            .iter()
            .find(|(_, record)| record.is_sidecar && record.name == expected)
            .map(|(handle, _)| ContainerHandle::new(handle.clone()))
    }

    /// Whether a container with this handle still exists (any state).
    pub fn container_exists(&self, handle: &ContainerHandle) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .contains_key(handle.as_str())
    }

    /// Whether the container is present and running.
    pub fn is_running(&self, handle: &ContainerHandle) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(handle.as_str())
            .is_some_and(|record| record.is_running)
    }

    fn take_injected(state: &mut State, op: &'static str) -> Option<String> {
        state
            .injected_failures
            .get_mut(op)
            .and_then(|queue| queue.pop_front())
    }

    fn check(
        &self,
        cancel: &CancellationToken,
        op: &'static str,
        call: BackendCall,
    ) -> BackendResult<()> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(message) = Self::take_injected(&mut state, op) {
            return Err(BackendError::op_failed(op, message));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerBackend for InMemoryBackend {
    async fn check_ready(
        &self,
        cancel: &CancellationToken,
        _timeout: Duration,
    ) -> BackendResult<()> {
        self.check(cancel, "check_ready", BackendCall::CheckReady)
    }

    async fn create_network(
        &self,
        cancel: &CancellationToken,
        name: &str,
        cidr: &str,
        _labels: &BTreeMap<String, String>,
    ) -> BackendResult<NetworkHandle> {
        self.check(
            cancel,
            "create_network",
            BackendCall::CreateNetwork {
                name: name.to_string(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        if state.networks.contains_key(name) {
            return Err(BackendError::op_failed(
                "create_network",
                format!("network '{name}' already exists"),
            ));
        }
        state.networks.insert(name.to_string(), cidr.to_string());
        Ok(NetworkHandle::new(name))
    }

    async fn destroy_network(
        &self,
        cancel: &CancellationToken,
        network: &NetworkHandle,
    ) -> BackendResult<()> {
        self.check(
            cancel,
            "destroy_network",
            BackendCall::DestroyNetwork {
                network: network.as_str().to_string(),
            },
        )?;
        self.state.lock().unwrap().networks.remove(network.as_str());
        Ok(())
    }

    async fn start_container(
        &self,
        cancel: &CancellationToken,
        spec: ContainerSpec,
    ) -> BackendResult<StartedContainer> {
        self.check(
            cancel,
            "start_container",
            BackendCall::StartContainer {
                name: spec.name.clone(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        if !state.networks.contains_key(spec.network.as_str()) {
            return Err(BackendError::NotFound(format!(
                "network '{}' does not exist",
                spec.network
            )));
        }
        let name_taken = state
            .containers
            .values()
            .any(|record| record.name == spec.name && record.network.is_some());
        if name_taken {
            return Err(BackendError::op_failed(
                "start_container",
                format!("container name '{}' already in use", spec.name),
            ));
        }

        state.next_id += 1;
        let handle = format!("ctr-{:04}", state.next_id);
        state.containers.insert(
            handle.clone(),
            ContainerRecord {
                name: spec.name.clone(),
                network: Some(spec.network.as_str().to_string()),
                labels: spec.labels.clone(),
                is_running: true,
                is_sidecar: false,
            },
        );

        let mut public_ip = None;
        let mut public_ports = BTreeMap::new();
        if spec.publish_ports {
            for (offset, (port_id, port)) in spec.private_ports.iter().enumerate() {
                public_ports.insert(
                    port_id.clone(),
                    PortSpec {
                        number: 30_000 + offset as u16,
                        protocol: port.protocol,
                    },
                );
            }
            if !public_ports.is_empty() {
                public_ip = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
            }
        }

        Ok(StartedContainer {
            handle: ContainerHandle::new(handle),
            public_ip,
            public_ports,
        })
    }

    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        _timeout: Duration,
    ) -> BackendResult<()> {
        self.check(
            cancel,
            "stop_container",
            BackendCall::StopContainer {
                handle: handle.as_str().to_string(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        match state.containers.get_mut(handle.as_str()) {
            Some(record) => {
                record.is_running = false;
                Ok(())
            }
            None => Err(BackendError::NotFound(format!(
                "no such container: {handle}"
            ))),
        }
    }

    async fn destroy_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> BackendResult<()> {
        self.check(
            cancel,
            "destroy_container",
            BackendCall::DestroyContainer {
                handle: handle.as_str().to_string(),
            },
        )?;
        self.state
            .lock()
            .unwrap()
            .containers
            .remove(handle.as_str());
        Ok(())
    }

    async fn exec(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        argv: &[String],
    ) -> BackendResult<ExecOutput> {
        self.check(
            cancel,
            "exec",
            BackendCall::Exec {
                handle: handle.as_str().to_string(),
                argv: argv.to_vec(),
            },
        )?;
        let state = self.state.lock().unwrap();
        let record = state
            .containers
            .get(handle.as_str())
            .ok_or_else(|| BackendError::NotFound(format!("no such container: {handle}")))?;
        if !record.is_running {
            return Err(BackendError::op_failed(
                "exec",
                format!("container {handle} is not running"),
            ));
        }

        let program = argv.first().map(String::as_str).unwrap_or_default();
        if let Some((exit_code, output)) = state.exec_scripts.get(program) {
            return Ok(ExecOutput {
                exit_code: *exit_code,
                output: output.clone(),
            });
        }
        if program == "echo" {
            let mut output = argv[1..].join(" ").into_bytes();
            output.push(b'\n');
            return Ok(ExecOutput {
                exit_code: 0,
                output,
            });
        }
        Ok(ExecOutput {
            exit_code: 0,
            output: Vec::new(),
        })
    }

    async fn create_sidecar(
        &self,
        cancel: &CancellationToken,
        target: &ContainerHandle,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<ContainerHandle> {
        {
            // Peek at the target name first so the recorded call is useful.
            let state = self.state.lock().unwrap();
            if !state.containers.contains_key(target.as_str()) {
                drop(state);
                self.check(
                    cancel,
                    "create_sidecar",
                    BackendCall::CreateSidecar {
                        target: target.as_str().to_string(),
                        sidecar: String::new(),
                    },
                )?;
                return Err(BackendError::NotFound(format!(
                    "no such container: {target}"
                )));
            }
        }
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let handle = format!("ctr-{:04}", state.next_id);
        let target_name = state.containers[target.as_str()].name.clone();
        state.calls.push(BackendCall::CreateSidecar {
            target: target.as_str().to_string(),
            sidecar: handle.clone(),
        });
        if let Some(message) = Self::take_injected(&mut state, "create_sidecar") {
            return Err(BackendError::op_failed("create_sidecar", message));
        }
        state.containers.insert(
            handle.clone(),
            ContainerRecord {
                name: format!("sidecar-of-{target_name}"),
                network: None,
                labels: labels.clone(),
                is_running: true,
                is_sidecar: true,
            },
        );
        Ok(ContainerHandle::new(handle))
    }

    async fn run_in_sidecar(
        &self,
        cancel: &CancellationToken,
        sidecar: &ContainerHandle,
        argv: &[String],
    ) -> BackendResult<()> {
        self.check(
            cancel,
            "run_in_sidecar",
            BackendCall::RunInSidecar {
                sidecar: sidecar.as_str().to_string(),
                argv: argv.to_vec(),
            },
        )?;
        let state = self.state.lock().unwrap();
        if !state.containers.contains_key(sidecar.as_str()) {
            return Err(BackendError::NotFound(format!(
                "no such container: {sidecar}"
            )));
        }
        Ok(())
    }

    async fn disconnect_from_network(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        _network: &NetworkHandle,
    ) -> BackendResult<()> {
        self.check(
            cancel,
            "disconnect_from_network",
            BackendCall::DisconnectFromNetwork {
                handle: handle.as_str().to_string(),
            },
        )?;
        let mut state = self.state.lock().unwrap();
        match state.containers.get_mut(handle.as_str()) {
            Some(record) => {
                record.network = None;
                Ok(())
            }
            None => Err(BackendError::NotFound(format!(
                "no such container: {handle}"
            ))),
        }
    }

    async fn list_containers(
        &self,
        cancel: &CancellationToken,
        selector: &BTreeMap<String, String>,
    ) -> BackendResult<Vec<ContainerInfo>> {
        self.check(cancel, "list_containers", BackendCall::ListContainers)?;
        let state = self.state.lock().unwrap();
        let matches = state
            .containers
            .iter()
            .filter(|(_, record)| {
                selector
                    .iter()
                    .all(|(key, value)| record.labels.get(key) == Some(value))
            })
            .map(|(handle, record)| ContainerInfo {
                handle: ContainerHandle::new(handle.clone()),
                name: record.name.clone(),
                labels: record.labels.clone(),
                is_running: record.is_running,
            })
            .collect();
        Ok(matches)
    }
}
