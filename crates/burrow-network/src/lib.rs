//! The service network: burrow's in-memory authority over service
//! identity, addressing, lifecycle, and simulated network partitions.

pub mod allocator;
pub mod error;
pub mod guid;
pub mod manager;
pub mod network;
pub mod sidecar;
pub mod topology;

pub use allocator::{AddressAllocator, AllocatorError};
pub use error::{ErrorKind, NetworkError, NetworkResult};
pub use guid::GuidSuffixSource;
pub use manager::{Enclave, EnclaveManager};
pub use network::{
    RegistrationInfo, RunInfo, ServiceNetwork, ServiceStartConfig, DEFAULT_PARTITION_ID,
};
pub use sidecar::{Sidecar, SidecarRegistry};
pub use topology::{
    ConnectionId, PartitionConnection, PartitionTopology, ServicePacketLoss, TopologyError,
};
