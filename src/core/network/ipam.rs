//! A minimal persisted IPv4 allocation bitmap backing the bridge driver's
//! `connect`, saved alongside the network as `<name>.ipam`. Property P6
//! (no two live endpoints share an IP) reduces to "this bitmap never marks
//! the same bit allocated twice," which is exactly what it guarantees.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{CapsuleError, ErrorKind, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamPool {
    /// CIDR this pool allocates from, e.g. "10.0.3.0/24".
    pub subnet: String,
    /// One bit per host address in the subnet (excluding network/broadcast
    /// and the gateway at host offset 1, which is reserved implicitly by
    /// starting allocation at offset 2).
    allocated: Vec<bool>,
}

fn parse_cidr(cidr: &str) -> Result<(u32, u8)> {
    let (addr, prefix) = cidr.split_once('/').ok_or_else(|| {
        CapsuleError::new(ErrorKind::NetworkError, format!("invalid CIDR '{cidr}'"))
    })?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|e| CapsuleError::with_cause(ErrorKind::NetworkError, "invalid subnet address", e))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|e| CapsuleError::with_cause(ErrorKind::NetworkError, "invalid prefix length", e))?;
    if prefix > 32 {
        return Err(CapsuleError::new(
            ErrorKind::NetworkError,
            format!("prefix length {prefix} out of range"),
        ));
    }
    Ok((u32::from(addr), prefix))
}

impl IpamPool {
    pub fn new(subnet: &str) -> Result<IpamPool> {
        let (_, prefix) = parse_cidr(subnet)?;
        let host_bits = 32 - prefix as u32;
        let capacity = if host_bits >= 32 {
            0
        } else {
            1u32 << host_bits
        };
        Ok(IpamPool {
            subnet: subnet.to_string(),
            allocated: vec![false; capacity as usize],
        })
    }

    pub fn load_or_create(path: &Path, subnet: &str) -> Result<IpamPool> {
        if path.exists() {
            let data = fs::read_to_string(path).map_err(|e| {
                CapsuleError::with_cause(ErrorKind::NetworkError, "failed to read ipam file", e)
            })?;
            serde_json::from_str(&data).map_err(|e| {
                CapsuleError::with_cause(ErrorKind::NetworkError, "failed to parse ipam file", e)
            })
        } else {
            IpamPool::new(subnet)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CapsuleError::with_cause(ErrorKind::NetworkError, "failed to create ipam dir", e)
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            CapsuleError::with_cause(ErrorKind::NetworkError, "failed to serialize ipam", e)
        })?;
        fs::write(path, json)
            .map_err(|e| CapsuleError::with_cause(ErrorKind::NetworkError, "failed to write ipam", e))
    }

    /// Allocate the next free host address, starting at offset 2 (offset 0
    /// is the network address, offset 1 is reserved for the gateway).
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let (base, _) = parse_cidr(&self.subnet)?;
        for (offset, taken) in self.allocated.iter_mut().enumerate().skip(2) {
            if !*taken {
                *taken = true;
                return Ok(Ipv4Addr::from(base + offset as u32));
            }
        }
        Err(CapsuleError::new(
            ErrorKind::NetworkError,
            format!("no free addresses left in {}", self.subnet),
        ))
    }

    /// Return an address to the pool.
    pub fn release(&mut self, addr: Ipv4Addr) -> Result<()> {
        let (base, _) = parse_cidr(&self.subnet)?;
        let offset = (u32::from(addr)).wrapping_sub(base) as usize;
        if let Some(slot) = self.allocated.get_mut(offset) {
            *slot = false;
        }
        Ok(())
    }

    /// The gateway address: offset 1 in the subnet.
    pub fn gateway(&self) -> Result<Ipv4Addr> {
        let (base, _) = parse_cidr(&self.subnet)?;
        Ok(Ipv4Addr::from(base + 1))
    }

    pub fn prefix_len(&self) -> Result<u8> {
        let (_, prefix) = parse_cidr(&self.subnet)?;
        Ok(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_never_double_assigns() {
        let mut pool = IpamPool::new("10.0.3.0/29").unwrap(); // 8 addresses
        let mut seen = std::collections::HashSet::new();
        // offsets 2..=5 are allocatable (0 net, 1 gateway, 6 reserved-broadcast unused here)
        for _ in 0..4 {
            let ip = pool.allocate().unwrap();
            assert!(seen.insert(ip), "duplicate IP allocated: {ip}");
        }
    }

    #[test]
    fn release_then_reallocate_reuses_slot() {
        let mut pool = IpamPool::new("10.0.3.0/29").unwrap();
        let ip = pool.allocate().unwrap();
        pool.release(ip).unwrap();
        let ip2 = pool.allocate().unwrap();
        assert_eq!(ip, ip2);
    }

    #[test]
    fn gateway_is_second_host() {
        let pool = IpamPool::new("10.0.3.0/24").unwrap();
        assert_eq!(pool.gateway().unwrap(), Ipv4Addr::new(10, 0, 3, 1));
    }

    #[test]
    fn exhausted_pool_errors() {
        let mut pool = IpamPool::new("10.0.3.0/30").unwrap(); // 4 addresses, 2 allocatable
        let _ = pool.allocate().unwrap();
        let _ = pool.allocate().unwrap();
        let err = pool.allocate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("br0.ipam");
        let mut pool = IpamPool::new("10.0.3.0/24").unwrap();
        let ip = pool.allocate().unwrap();
        pool.save(&path).unwrap();

        let loaded = IpamPool::load_or_create(&path, "10.0.3.0/24").unwrap();
        let mut loaded = loaded;
        // Re-allocating must not hand back the already-allocated address.
        let next = loaded.allocate().unwrap();
        assert_ne!(ip, next);
    }
}
