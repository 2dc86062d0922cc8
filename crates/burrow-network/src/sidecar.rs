//! Traffic-control sidecars.
//!
//! Each sidecar is an auxiliary container sharing its target service's
//! network namespace. Packet loss toward specific peers is enforced with
//! an htb root qdisc, one netem leaf per lossy destination, and u32
//! filters matching the destination IP. Updates are replace-all: the root
//! qdisc is rebuilt on every push, so rules absent from the new table are
//! gone afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use burrow_backend::{BackendError, ContainerBackend, ContainerHandle};
use burrow_core::{labels, ContainerKind, EnclaveId, ServiceGuid};

/// Interface the qdisc rules attach to inside the service's namespace.
const SIDECAR_INTERFACE: &str = "eth0";

/// One attached sidecar.
#[derive(Debug, Clone)]
pub struct Sidecar {
    pub guid: ServiceGuid,
    pub handle: ContainerHandle,
}

/// Shell line that installs a fresh root qdisc with nothing attached.
fn init_command() -> String {
    format!(
        "tc qdisc replace dev {itf} root handle 1: htb default 1 && \
         tc class add dev {itf} parent 1: classid 1:1 htb rate 100gbit",
        itf = SIDECAR_INTERFACE
    )
}

/// Shell line that replaces the whole rule table.
///
/// Destinations with zero loss are simply absent: the default class (1:1)
/// carries them untouched.
fn replace_table_command(table: &BTreeMap<Ipv4Addr, f32>) -> String {
    let mut parts = vec![init_command()];
    let mut class_index: u32 = 2;
    for (ip, loss) in table {
        if *loss <= 0.0 {
            continue;
        }
        parts.push(format!(
            "tc class add dev {itf} parent 1: classid 1:{idx} htb rate 100gbit && \
             tc qdisc add dev {itf} parent 1:{idx} handle {idx}0: netem loss {loss}% && \
             tc filter add dev {itf} protocol ip parent 1: prio 1 u32 match ip dst {ip}/32 flowid 1:{idx}",
            itf = SIDECAR_INTERFACE,
            idx = class_index,
        ));
        class_index += 1;
    }
    parts.join(" && ")
}

fn shell_argv(line: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), line]
}

/// Push a complete rule table into one sidecar.
///
/// Free function so repartition fan-outs can run it without borrowing the
/// registry.
pub async fn apply_traffic_control(
    backend: Arc<dyn ContainerBackend>,
    cancel: CancellationToken,
    handle: ContainerHandle,
    table: BTreeMap<Ipv4Addr, f32>,
) -> Result<(), BackendError> {
    backend
        .run_in_sidecar(&cancel, &handle, &shell_argv(replace_table_command(&table)))
        .await
}

/// Tracks the sidecars of one enclave and drives their qdisc state.
///
/// Mutated only under the enclave lock.
pub struct SidecarRegistry {
    enclave_id: EnclaveId,
    backend: Arc<dyn ContainerBackend>,
    sidecars: BTreeMap<ServiceGuid, Sidecar>,
}

impl SidecarRegistry {
    pub fn new(enclave_id: EnclaveId, backend: Arc<dyn ContainerBackend>) -> Self {
        Self {
            enclave_id,
            backend,
            sidecars: BTreeMap::new(),
        }
    }

    /// Create a sidecar for the target container and install its empty
    /// qdisc scaffolding. If initialization fails the sidecar container is
    /// torn down before the error returns.
    pub async fn attach(
        &mut self,
        cancel: &CancellationToken,
        guid: &ServiceGuid,
        target: &ContainerHandle,
    ) -> Result<(), BackendError> {
        let sidecar_labels = labels::object_labels(&self.enclave_id, ContainerKind::Sidecar, guid);
        let handle = self
            .backend
            .create_sidecar(cancel, target, &sidecar_labels)
            .await?;

        if let Err(err) = self
            .backend
            .run_in_sidecar(cancel, &handle, &shell_argv(init_command()))
            .await
        {
            if let Err(teardown_err) = self.backend.destroy_container(cancel, &handle).await {
                warn!(
                    %guid,
                    error = %teardown_err,
                    "failed to tear down sidecar after init failure"
                );
            }
            return Err(err);
        }

        debug!(%guid, %handle, "sidecar attached");
        self.sidecars.insert(
            guid.clone(),
            Sidecar {
                guid: guid.clone(),
                handle,
            },
        );
        Ok(())
    }

    /// Destroy a service's sidecar. Detaching a service without one is a
    /// no-op.
    pub async fn detach(
        &mut self,
        cancel: &CancellationToken,
        guid: &ServiceGuid,
    ) -> Result<(), BackendError> {
        let Some(sidecar) = self.sidecars.get(guid) else {
            return Ok(());
        };
        self.backend
            .destroy_container(cancel, &sidecar.handle)
            .await?;
        self.sidecars.remove(guid);
        debug!(%guid, "sidecar detached");
        Ok(())
    }

    /// Replace the whole rule table of one sidecar. No retries.
    pub async fn update_traffic_control(
        &self,
        cancel: &CancellationToken,
        guid: &ServiceGuid,
        table: &BTreeMap<Ipv4Addr, f32>,
    ) -> Result<(), BackendError> {
        let sidecar = self.sidecars.get(guid).ok_or_else(|| {
            BackendError::NotFound(format!("service '{guid}' has no sidecar"))
        })?;
        apply_traffic_control(
            Arc::clone(&self.backend),
            cancel.clone(),
            sidecar.handle.clone(),
            table.clone(),
        )
        .await
    }

    pub fn contains(&self, guid: &ServiceGuid) -> bool {
        self.sidecars.contains_key(guid)
    }

    pub fn handle_of(&self, guid: &ServiceGuid) -> Option<&ContainerHandle> {
        self.sidecars.get(guid).map(|sidecar| &sidecar.handle)
    }

    pub fn attached_guids(&self) -> BTreeSet<ServiceGuid> {
        self.sidecars.keys().cloned().collect()
    }

    /// Remove and return every sidecar record (for enclave destruction).
    pub fn take_all(&mut self) -> BTreeMap<ServiceGuid, Sidecar> {
        std::mem::take(&mut self.sidecars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_builds_root_scaffolding() {
        let line = init_command();
        assert!(line.contains("tc qdisc replace dev eth0 root"));
        assert!(line.contains("htb default 1"));
    }

    #[test]
    fn table_skips_lossless_destinations() {
        let table = BTreeMap::from([
            (Ipv4Addr::new(172, 23, 0, 2), 0.0),
            (Ipv4Addr::new(172, 23, 0, 3), 100.0),
        ]);
        let line = replace_table_command(&table);
        assert!(!line.contains("172.23.0.2/32"));
        assert!(line.contains("match ip dst 172.23.0.3/32"));
        assert!(line.contains("netem loss 100%"));
    }

    #[test]
    fn empty_table_still_rebuilds_root() {
        // Replace-all: an all-zero table must wipe previous rules.
        let line = replace_table_command(&BTreeMap::new());
        assert_eq!(line, init_command());
    }

    #[test]
    fn each_lossy_destination_gets_its_own_class() {
        let table = BTreeMap::from([
            (Ipv4Addr::new(10, 0, 0, 2), 50.0),
            (Ipv4Addr::new(10, 0, 0, 3), 25.0),
        ]);
        let line = replace_table_command(&table);
        assert!(line.contains("classid 1:2"));
        assert!(line.contains("classid 1:3"));
        assert!(line.contains("netem loss 50%"));
        assert!(line.contains("netem loss 25%"));
    }
}
