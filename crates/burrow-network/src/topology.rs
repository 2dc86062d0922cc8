//! Partition topology: pure data describing which services may talk to
//! which, and with how much simulated packet loss.
//!
//! No I/O happens here. The service network owns an instance, mutates it
//! under the enclave lock, and turns the computed per-service loss maps
//! into sidecar qdisc updates.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use burrow_core::{PartitionId, ServiceGuid};

#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("no partition '{0}' exists in the current topology")]
    PartitionNotFound(PartitionId),

    #[error("service '{guid}' is assigned to both partition '{first}' and partition '{second}'")]
    DuplicateAssignment {
        guid: ServiceGuid,
        first: PartitionId,
        second: PartitionId,
    },

    #[error("service '{0}' is not assigned to any new partition")]
    MissingAssignment(ServiceGuid),

    #[error("unknown service '{0}' in new partitioning")]
    UnknownService(ServiceGuid),

    #[error("packet loss percentage {0} is outside [0, 100]")]
    InvalidLoss(f32),
}

/// Policy applied between two partitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionConnection {
    packet_loss_percentage: f32,
}

impl PartitionConnection {
    pub fn new(packet_loss_percentage: f32) -> Result<Self, TopologyError> {
        if !(0.0..=100.0).contains(&packet_loss_percentage) {
            return Err(TopologyError::InvalidLoss(packet_loss_percentage));
        }
        Ok(Self {
            packet_loss_percentage,
        })
    }

    /// All traffic passes.
    pub fn lossless() -> Self {
        Self {
            packet_loss_percentage: 0.0,
        }
    }

    /// All traffic drops — a hard partition.
    pub fn severed() -> Self {
        Self {
            packet_loss_percentage: 100.0,
        }
    }

    pub fn packet_loss_percentage(&self) -> f32 {
        self.packet_loss_percentage
    }
}

/// Unordered pair of partitions, stored in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionId {
    lesser: PartitionId,
    greater: PartitionId,
}

impl ConnectionId {
    pub fn new(a: PartitionId, b: PartitionId) -> Self {
        if a <= b {
            Self {
                lesser: a,
                greater: b,
            }
        } else {
            Self {
                lesser: b,
                greater: a,
            }
        }
    }

    pub fn lesser(&self) -> &PartitionId {
        &self.lesser
    }

    pub fn greater(&self) -> &PartitionId {
        &self.greater
    }
}

/// Per-service view of the topology: loss from each service to each peer.
pub type ServicePacketLoss = BTreeMap<ServiceGuid, BTreeMap<ServiceGuid, f32>>;

#[derive(Debug)]
pub struct PartitionTopology {
    partitions: BTreeMap<PartitionId, BTreeSet<ServiceGuid>>,
    service_partitions: BTreeMap<ServiceGuid, PartitionId>,
    connections: BTreeMap<ConnectionId, PartitionConnection>,
    default_connection: PartitionConnection,
}

impl PartitionTopology {
    /// A topology with one (empty) starting partition and a default
    /// connection applied to partition pairs with no explicit entry.
    pub fn new(initial_partition: PartitionId, default_connection: PartitionConnection) -> Self {
        Self {
            partitions: BTreeMap::from([(initial_partition, BTreeSet::new())]),
            service_partitions: BTreeMap::new(),
            connections: BTreeMap::new(),
            default_connection,
        }
    }

    pub fn contains_partition(&self, partition: &PartitionId) -> bool {
        self.partitions.contains_key(partition)
    }

    pub fn partition_of(&self, guid: &ServiceGuid) -> Option<&PartitionId> {
        self.service_partitions.get(guid)
    }

    pub fn partitions(&self) -> &BTreeMap<PartitionId, BTreeSet<ServiceGuid>> {
        &self.partitions
    }

    pub fn service_count(&self) -> usize {
        self.service_partitions.len()
    }

    /// Add a service to an existing partition.
    pub fn add_service(
        &mut self,
        guid: ServiceGuid,
        partition: PartitionId,
    ) -> Result<(), TopologyError> {
        let members = self
            .partitions
            .get_mut(&partition)
            .ok_or_else(|| TopologyError::PartitionNotFound(partition.clone()))?;
        members.insert(guid.clone());
        self.service_partitions.insert(guid, partition);
        Ok(())
    }

    /// Remove a service from the topology. Idempotent.
    pub fn remove_service(&mut self, guid: &ServiceGuid) {
        if let Some(partition) = self.service_partitions.remove(guid) {
            if let Some(members) = self.partitions.get_mut(&partition) {
                members.remove(guid);
            }
        }
    }

    /// Replace the whole topology atomically.
    ///
    /// Every currently-known service must be assigned to exactly one new
    /// partition, and every connection must reference new partitions.
    /// Validation completes before any mutation, so a rejected call leaves
    /// the topology untouched.
    pub fn repartition(
        &mut self,
        new_partitions: BTreeMap<PartitionId, BTreeSet<ServiceGuid>>,
        new_connections: BTreeMap<ConnectionId, PartitionConnection>,
        new_default: PartitionConnection,
    ) -> Result<(), TopologyError> {
        let mut assignments: BTreeMap<ServiceGuid, PartitionId> = BTreeMap::new();
        for (partition, members) in &new_partitions {
            for guid in members {
                if !self.service_partitions.contains_key(guid) {
                    return Err(TopologyError::UnknownService(guid.clone()));
                }
                if let Some(first) = assignments.get(guid) {
                    return Err(TopologyError::DuplicateAssignment {
                        guid: guid.clone(),
                        first: first.clone(),
                        second: partition.clone(),
                    });
                }
                assignments.insert(guid.clone(), partition.clone());
            }
        }
        for guid in self.service_partitions.keys() {
            if !assignments.contains_key(guid) {
                return Err(TopologyError::MissingAssignment(guid.clone()));
            }
        }
        for connection_id in new_connections.keys() {
            for partition in [connection_id.lesser(), connection_id.greater()] {
                if !new_partitions.contains_key(partition) {
                    return Err(TopologyError::PartitionNotFound(partition.clone()));
                }
            }
        }

        self.partitions = new_partitions;
        self.service_partitions = assignments;
        self.connections = new_connections;
        self.default_connection = new_default;
        Ok(())
    }

    /// Set the connection for a pair of existing partitions.
    pub fn set_connection(
        &mut self,
        a: PartitionId,
        b: PartitionId,
        connection: PartitionConnection,
    ) -> Result<(), TopologyError> {
        for partition in [&a, &b] {
            if !self.partitions.contains_key(partition) {
                return Err(TopologyError::PartitionNotFound(partition.clone()));
            }
        }
        self.connections.insert(ConnectionId::new(a, b), connection);
        Ok(())
    }

    /// Drop the explicit connection for a pair, reverting it to the
    /// default.
    pub fn unset_connection(
        &mut self,
        a: PartitionId,
        b: PartitionId,
    ) -> Result<(), TopologyError> {
        for partition in [&a, &b] {
            if !self.partitions.contains_key(partition) {
                return Err(TopologyError::PartitionNotFound(partition.clone()));
            }
        }
        self.connections.remove(&ConnectionId::new(a, b));
        Ok(())
    }

    /// Effective connection between two partitions.
    fn connection_between(&self, a: &PartitionId, b: &PartitionId) -> PartitionConnection {
        if a == b {
            return PartitionConnection::lossless();
        }
        self.connections
            .get(&ConnectionId::new(a.clone(), b.clone()))
            .copied()
            .unwrap_or(self.default_connection)
    }

    /// Loss from every service to every other service.
    ///
    /// The encoding is total: zero-loss pairs are present, so a table
    /// derived from this map is a complete replace-all rule set. Self
    /// pairs are omitted. The result depends only on the topology
    /// contents, never on insertion order.
    pub fn loss_by_service(&self) -> ServicePacketLoss {
        let mut result = ServicePacketLoss::new();
        for (guid, partition) in &self.service_partitions {
            let mut row = BTreeMap::new();
            for (other, other_partition) in &self.service_partitions {
                if other == guid {
                    continue;
                }
                let connection = self.connection_between(partition, other_partition);
                row.insert(other.clone(), connection.packet_loss_percentage());
            }
            result.insert(guid.clone(), row);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PartitionId {
        PartitionId::from(s)
    }

    fn guid(s: &str) -> ServiceGuid {
        ServiceGuid::from(s)
    }

    fn topology_with(services: &[(&str, &str)]) -> PartitionTopology {
        let mut topology = PartitionTopology::new(pid("default"), PartitionConnection::lossless());
        let mut partitions: BTreeMap<PartitionId, BTreeSet<ServiceGuid>> =
            BTreeMap::from([(pid("default"), BTreeSet::new())]);
        for (service, partition) in services {
            partitions
                .entry(pid(partition))
                .or_default()
                .insert(guid(service));
        }
        // Seed services through the default partition, then repartition.
        for (service, _) in services {
            topology
                .add_service(guid(service), pid("default"))
                .unwrap();
        }
        topology
            .repartition(partitions, BTreeMap::new(), PartitionConnection::lossless())
            .unwrap();
        topology
    }

    #[test]
    fn add_to_missing_partition_fails() {
        let mut topology =
            PartitionTopology::new(pid("default"), PartitionConnection::lossless());
        let err = topology.add_service(guid("a-1"), pid("nope")).unwrap_err();
        assert_eq!(err, TopologyError::PartitionNotFound(pid("nope")));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut topology =
            PartitionTopology::new(pid("default"), PartitionConnection::lossless());
        topology.add_service(guid("a-1"), pid("default")).unwrap();
        topology.remove_service(&guid("a-1"));
        topology.remove_service(&guid("a-1"));
        assert_eq!(topology.service_count(), 0);
    }

    #[test]
    fn connection_validates_loss_range() {
        assert!(PartitionConnection::new(-0.1).is_err());
        assert!(PartitionConnection::new(100.1).is_err());
        assert!(PartitionConnection::new(50.0).is_ok());
    }

    #[test]
    fn connection_id_is_unordered() {
        assert_eq!(
            ConnectionId::new(pid("p2"), pid("p1")),
            ConnectionId::new(pid("p1"), pid("p2"))
        );
    }

    #[test]
    fn three_partition_loss_map() {
        // A,B in P1; C in P2; conn(P1,P2) = 100%, default 0%.
        let mut topology = topology_with(&[("a-1", "p1"), ("b-1", "p1"), ("c-1", "p2")]);
        topology
            .set_connection(pid("p1"), pid("p2"), PartitionConnection::severed())
            .unwrap();

        let loss = topology.loss_by_service();
        assert_eq!(loss[&guid("a-1")][&guid("c-1")], 100.0);
        assert_eq!(loss[&guid("a-1")][&guid("b-1")], 0.0);
        assert_eq!(loss[&guid("b-1")][&guid("c-1")], 100.0);
        assert_eq!(loss[&guid("c-1")][&guid("a-1")], 100.0);
    }

    #[test]
    fn loss_map_is_symmetric_for_symmetric_inputs() {
        let mut topology = topology_with(&[("a-1", "p1"), ("b-1", "p2"), ("c-1", "p3")]);
        topology
            .set_connection(
                pid("p1"),
                pid("p2"),
                PartitionConnection::new(25.0).unwrap(),
            )
            .unwrap();

        let loss = topology.loss_by_service();
        for (a, row) in &loss {
            for (b, value) in row {
                assert_eq!(loss[b][a], *value, "asymmetry between {a} and {b}");
            }
        }
    }

    #[test]
    fn each_service_in_own_partition_with_severed_default() {
        let mut topology = topology_with(&[("a-1", "pa"), ("b-1", "pb"), ("c-1", "pc")]);
        let partitions = topology.partitions().clone();
        topology
            .repartition(partitions, BTreeMap::new(), PartitionConnection::severed())
            .unwrap();

        let loss = topology.loss_by_service();
        for (a, row) in &loss {
            assert_eq!(row.len(), 2);
            for (b, value) in row {
                assert_eq!(*value, 100.0, "loss {a} → {b} should be total");
            }
        }
    }

    #[test]
    fn repartition_rejects_duplicate_assignment() {
        let mut topology = topology_with(&[("a-1", "p1")]);
        let new_partitions = BTreeMap::from([
            (pid("x"), BTreeSet::from([guid("a-1")])),
            (pid("y"), BTreeSet::from([guid("a-1")])),
        ]);
        let err = topology
            .repartition(
                new_partitions,
                BTreeMap::new(),
                PartitionConnection::lossless(),
            )
            .unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateAssignment { .. }));
    }

    #[test]
    fn repartition_rejects_missing_assignment() {
        let mut topology = topology_with(&[("a-1", "p1"), ("b-1", "p1")]);
        let new_partitions = BTreeMap::from([(pid("x"), BTreeSet::from([guid("a-1")]))]);
        let err = topology
            .repartition(
                new_partitions,
                BTreeMap::new(),
                PartitionConnection::lossless(),
            )
            .unwrap_err();
        assert_eq!(err, TopologyError::MissingAssignment(guid("b-1")));
    }

    #[test]
    fn repartition_rejects_unknown_service() {
        let mut topology = topology_with(&[("a-1", "p1")]);
        let new_partitions = BTreeMap::from([(
            pid("x"),
            BTreeSet::from([guid("a-1"), guid("ghost-1")]),
        )]);
        let err = topology
            .repartition(
                new_partitions,
                BTreeMap::new(),
                PartitionConnection::lossless(),
            )
            .unwrap_err();
        assert_eq!(err, TopologyError::UnknownService(guid("ghost-1")));
    }

    #[test]
    fn rejected_repartition_leaves_topology_untouched() {
        let mut topology = topology_with(&[("a-1", "p1"), ("b-1", "p2")]);
        let before = topology.loss_by_service();

        let bad = BTreeMap::from([(pid("x"), BTreeSet::from([guid("a-1")]))]);
        assert!(topology
            .repartition(bad, BTreeMap::new(), PartitionConnection::severed())
            .is_err());

        assert_eq!(topology.loss_by_service(), before);
        assert!(topology.contains_partition(&pid("p1")));
    }

    #[test]
    fn repartition_rejects_connection_to_absent_partition() {
        let mut topology = topology_with(&[("a-1", "p1")]);
        let new_partitions = BTreeMap::from([(pid("x"), BTreeSet::from([guid("a-1")]))]);
        let connections = BTreeMap::from([(
            ConnectionId::new(pid("x"), pid("ghost")),
            PartitionConnection::severed(),
        )]);
        let err = topology
            .repartition(
                new_partitions,
                connections,
                PartitionConnection::lossless(),
            )
            .unwrap_err();
        assert_eq!(err, TopologyError::PartitionNotFound(pid("ghost")));
    }

    #[test]
    fn set_connection_requires_existing_partitions() {
        let mut topology = topology_with(&[("a-1", "p1")]);
        let err = topology
            .set_connection(pid("p1"), pid("ghost"), PartitionConnection::severed())
            .unwrap_err();
        assert_eq!(err, TopologyError::PartitionNotFound(pid("ghost")));
    }

    #[test]
    fn unset_connection_reverts_to_default() {
        let mut topology = topology_with(&[("a-1", "p1"), ("b-1", "p2")]);
        topology
            .set_connection(pid("p1"), pid("p2"), PartitionConnection::severed())
            .unwrap();
        assert_eq!(topology.loss_by_service()[&guid("a-1")][&guid("b-1")], 100.0);

        topology.unset_connection(pid("p1"), pid("p2")).unwrap();
        assert_eq!(topology.loss_by_service()[&guid("a-1")][&guid("b-1")], 0.0);
    }

    #[test]
    fn repartition_round_trip_restores_loss_map() {
        let mut topology = topology_with(&[("a-1", "p1"), ("b-1", "p1"), ("c-1", "p2")]);
        topology
            .set_connection(pid("p1"), pid("p2"), PartitionConnection::severed())
            .unwrap();
        let original_partitions = topology.partitions().clone();
        let original_loss = topology.loss_by_service();

        // Move everything into one partition, then restore.
        let merged = BTreeMap::from([(
            pid("all"),
            BTreeSet::from([guid("a-1"), guid("b-1"), guid("c-1")]),
        )]);
        topology
            .repartition(merged, BTreeMap::new(), PartitionConnection::lossless())
            .unwrap();

        let connections = BTreeMap::from([(
            ConnectionId::new(pid("p1"), pid("p2")),
            PartitionConnection::severed(),
        )]);
        topology
            .repartition(
                original_partitions,
                connections,
                PartitionConnection::lossless(),
            )
            .unwrap();

        assert_eq!(topology.loss_by_service(), original_loss);
    }
}
