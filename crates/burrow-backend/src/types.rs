//! Value types crossing the backend seam.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use burrow_core::PortSpec;

/// Opaque handle to a container on the backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to an isolated network on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHandle(String);

impl NetworkHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host path bind-mounted into a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: String,
}

/// Everything the backend needs to start one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Backend-visible name; doubles as the container's DNS alias on the
    /// enclave network.
    pub name: String,
    pub image: String,
    pub network: NetworkHandle,
    pub private_ip: Ipv4Addr,
    pub private_ports: BTreeMap<String, PortSpec>,
    /// Replaces the image entrypoint when set.
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub labels: BTreeMap<String, String>,
    /// Whether private ports get published to the host.
    pub publish_ports: bool,
}

/// Result of starting a container.
#[derive(Debug, Clone)]
pub struct StartedContainer {
    pub handle: ContainerHandle,
    /// Host-reachable address, absent when no ports were published.
    pub public_ip: Option<IpAddr>,
    /// Port-id → host port, empty when no ports were published.
    pub public_ports: BTreeMap<String, PortSpec>,
}

/// Combined output of an exec'd command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// Interleaved stdout + stderr bytes.
    pub output: Vec<u8>,
}

/// One backend object matched by a label query.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub handle: ContainerHandle,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub is_running: bool,
}
