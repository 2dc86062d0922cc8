//! IPv4 address pool for one enclave.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),

    #[error("no free addresses remain in {0}")]
    Exhausted(String),

    #[error("address {0} is already reserved")]
    Conflict(Ipv4Addr),

    #[error("address {addr} is outside {cidr}")]
    OutOfRange { addr: Ipv4Addr, cidr: String },
}

/// Hands out and reclaims host addresses from a CIDR block.
///
/// Not thread-safe by itself; the service network mutates it under the
/// enclave lock.
#[derive(Debug)]
pub struct AddressAllocator {
    network: u32,
    broadcast: u32,
    cidr: String,
    reserved: BTreeSet<u32>,
}

impl AddressAllocator {
    /// Parse `a.b.c.d/len`. Prefixes longer than /30 have no usable host
    /// addresses and are rejected.
    pub fn new(cidr: &str) -> Result<Self, AllocatorError> {
        let invalid = || AllocatorError::InvalidCidr(cidr.to_string());
        let (addr_part, len_part) = cidr.split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr_part.parse().map_err(|_| invalid())?;
        let prefix_len: u32 = len_part.parse().map_err(|_| invalid())?;
        if prefix_len > 30 {
            return Err(invalid());
        }
        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        };
        let network = u32::from(addr) & mask;
        let broadcast = network | !mask;
        Ok(Self {
            network,
            broadcast,
            cidr: cidr.to_string(),
            reserved: BTreeSet::new(),
        })
    }

    /// Reserve the lowest free host address. Network and broadcast
    /// addresses are never handed out.
    pub fn reserve(&mut self) -> Result<Ipv4Addr, AllocatorError> {
        for candidate in (self.network + 1)..self.broadcast {
            if self.reserved.insert(candidate) {
                return Ok(Ipv4Addr::from(candidate));
            }
        }
        Err(AllocatorError::Exhausted(self.cidr.clone()))
    }

    /// Reserve a specific host address.
    pub fn reserve_specific(&mut self, addr: Ipv4Addr) -> Result<(), AllocatorError> {
        let value = u32::from(addr);
        if value <= self.network || value >= self.broadcast {
            return Err(AllocatorError::OutOfRange {
                addr,
                cidr: self.cidr.clone(),
            });
        }
        if !self.reserved.insert(value) {
            return Err(AllocatorError::Conflict(addr));
        }
        Ok(())
    }

    /// Return an address to the pool. Releasing an unreserved address is
    /// a no-op.
    pub fn release(&mut self, addr: Ipv4Addr) {
        self.reserved.remove(&u32::from(addr));
    }

    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }
}
