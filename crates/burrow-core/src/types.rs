//! Identity and wire types for enclaves and their services.
//!
//! A service has two names: the user-chosen [`ServiceId`], unique within
//! an enclave at any point in time and reusable after removal, and the
//! system-generated [`ServiceGuid`], which is globally unique and never
//! reused. Topology and sidecar bookkeeping always key on the GUID.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_string {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_string! {
    /// Name of an isolated enclave environment.
    EnclaveId
}

id_string! {
    /// User-chosen service name, unique among live services in an enclave.
    ServiceId
}

id_string! {
    /// System-generated, never-reused handle for one service instance.
    ServiceGuid
}

id_string! {
    /// Name of a partition in the network-failure simulation topology.
    PartitionId
}

impl ServiceGuid {
    /// Derive a GUID from a service ID and a monotonic suffix.
    pub fn from_id_and_suffix(id: &ServiceId, suffix: u64) -> Self {
        Self(format!("{}-{}", id.as_str(), suffix))
    }
}

// ── Ports ──────────────────────────────────────────────────────────

/// Transport protocol of a service port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => f.write_str("tcp"),
            PortProtocol::Udp => f.write_str("udp"),
        }
    }
}

/// One port a service listens on inside the enclave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub number: u16,
    pub protocol: PortProtocol,
}

impl PortSpec {
    pub fn tcp(number: u16) -> Self {
        Self {
            number,
            protocol: PortProtocol::Tcp,
        }
    }

    pub fn udp(number: u16) -> Self {
        Self {
            number,
            protocol: PortProtocol::Udp,
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

// ── Container kinds ────────────────────────────────────────────────

/// Role of a container created on the backend.
///
/// Every backend object is labelled with its kind; the labels are the only
/// mechanism for finding burrow-owned objects again (see [`crate::labels`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerKind {
    Engine,
    Api,
    UserService,
    Sidecar,
    Module,
}

impl ContainerKind {
    /// The label value persisted on backend objects of this kind.
    pub fn label_value(&self) -> &'static str {
        match self {
            ContainerKind::Engine => "engine",
            ContainerKind::Api => "api",
            ContainerKind::UserService => "user-service",
            ContainerKind::Sidecar => "sidecar",
            ContainerKind::Module => "module",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}
