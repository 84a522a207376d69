//! Ownership of the kernel's VIF index assignment.
//!
//! The in-memory snapshot exists only to answer `vifi(name)` between
//! mutations; it is rebuilt from `/proc/net/ip_mr_vif` after every add/remove
//! so the kernel table, not this struct, remains the single source of truth.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::interface::{Interface, InterfaceRef};
use crate::kernel::{KernelControl, VifCtl};

const DEFAULT_THRESHOLD: u8 = 1;

pub struct VifManager {
    kernel: Arc<dyn KernelControl>,
    snapshot: RwLock<Vec<VifSnapshotEntry>>,
}

#[derive(Clone, Debug)]
struct VifSnapshotEntry {
    vifi: u16,
    name: String,
}

impl VifManager {
    /// Build a VIF Manager and install a VIF for each phyint, in order,
    /// assigning dense indices starting at 0.
    pub fn new(kernel: Arc<dyn KernelControl>, phyints: &[Interface]) -> Result<Self> {
        let manager = VifManager {
            kernel,
            snapshot: RwLock::new(Vec::new()),
        };
        for interface in phyints {
            manager.add(interface, None)?;
        }
        Ok(manager)
    }

    /// Installs a VIF for `interface`. If `vifi` is omitted, the next dense
    /// index (current VIF count) is assigned.
    pub fn add(&self, interface: &Interface, vifi: Option<u16>) -> Result<u16> {
        let assigned = match vifi {
            Some(v) => {
                if self.snapshot.read().iter().any(|e| e.vifi == v) {
                    return Err(Error::Duplicate(format!("vif {v} already exists")));
                }
                v
            }
            None => self.snapshot.read().len() as u16,
        };

        self.kernel.add_vif(VifCtl {
            vifi: assigned,
            threshold: DEFAULT_THRESHOLD,
            rate_limit: 0,
            local: InterfaceRef::ByIndex(interface.index),
            remote: std::net::Ipv4Addr::UNSPECIFIED,
        })?;

        self.refresh()?;
        Ok(assigned)
    }

    pub fn remove_by_name(&self, name: &str) -> Result<()> {
        let vifi = self.vifi(name)?;
        self.kernel.del_vif(vifi)?;
        self.refresh()
    }

    pub fn remove_by_index(&self, vifi: u16) -> Result<()> {
        if !self.snapshot.read().iter().any(|e| e.vifi == vifi) {
            return Err(Error::NotFound(format!("vif {vifi}")));
        }
        self.kernel.del_vif(vifi)?;
        self.refresh()
    }

    /// Looks up the VIF index assigned to `name`.
    pub fn vifi(&self, name: &str) -> Result<u16> {
        self.snapshot
            .read()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.vifi)
            .ok_or_else(|| Error::NotFound(format!("interface {name}")))
    }

    /// The number of VIFs currently installed.
    pub fn count(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Builds a ttls vector sized to the current VIF count, with `ttl` set at
    /// the position of every named outgoing interface and 0 elsewhere.
    pub fn make_ttls(&self, to: &std::collections::BTreeMap<String, u8>) -> Result<Vec<u8>> {
        let snapshot = self.snapshot.read();
        let mut ttls = vec![0u8; snapshot.len()];
        for (name, ttl) in to {
            let entry = snapshot
                .iter()
                .find(|e| &e.name == name)
                .ok_or_else(|| Error::NotFound(format!("interface {name}")))?;
            ttls[entry.vifi as usize] = *ttl;
        }
        Ok(ttls)
    }

    fn refresh(&self) -> Result<()> {
        let table = self.kernel.read_ip_mr_vif()?;
        let mut snapshot: Vec<VifSnapshotEntry> = table
            .into_iter()
            .map(|row| VifSnapshotEntry {
                vifi: row.vifi,
                name: row.name,
            })
            .collect();
        snapshot.sort_by_key(|e| e.vifi);
        *self.snapshot.write() = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{MockKernelControl, VifTableEntry};
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    fn interface(name: &str, index: u32) -> Interface {
        Interface {
            name: name.to_string(),
            index,
            flags: crate::interface::InterfaceFlags::UP | crate::interface::InterfaceFlags::MULTICAST,
            addresses: [Ipv4Addr::new(10, 0, 0, 1)].into_iter().collect(),
        }
    }

    fn vif_row(vifi: u16, name: &str) -> VifTableEntry {
        VifTableEntry {
            vifi,
            name: name.to_string(),
            bytes_in: 0,
            pkts_in: 0,
            bytes_out: 0,
            pkts_out: 0,
            flags: 0,
            local: Ipv4Addr::UNSPECIFIED,
            remote: Ipv4Addr::UNSPECIFIED,
        }
    }

    #[test]
    fn test_new_installs_dense_indices() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(2).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "a1")]));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "a1"), vif_row(1, "a2")]));

        let phyints = vec![interface("a1", 2), interface("a2", 3)];
        let manager = VifManager::new(Arc::new(mock), &phyints).unwrap();

        assert_eq!(manager.count(), 2);
        assert_eq!(manager.vifi("a1").unwrap(), 0);
        assert_eq!(manager.vifi("a2").unwrap(), 1);
    }

    #[test]
    fn test_remove_by_name_refreshes() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(1).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "a1")]));
        mock.expect_del_vif().withf(|&v| v == 0).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif().times(1).returning(|| Ok(vec![]));

        let phyints = vec![interface("a1", 2)];
        let manager = VifManager::new(Arc::new(mock), &phyints).unwrap();
        manager.remove_by_name("a1").unwrap();
        assert_eq!(manager.count(), 0);
        assert!(matches!(manager.vifi("a1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_make_ttls_sizes_to_vif_count() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(3).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif().times(1).returning(|| Ok(vec![vif_row(0, "a1")]));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "a1"), vif_row(1, "a2")]));
        mock.expect_read_ip_mr_vif().times(1).returning(|| {
            Ok(vec![vif_row(0, "a1"), vif_row(1, "a2"), vif_row(2, "a3")])
        });

        let phyints = vec![interface("a1", 2), interface("a2", 3), interface("a3", 4)];
        let manager = VifManager::new(Arc::new(mock), &phyints).unwrap();

        let mut to = BTreeMap::new();
        to.insert("a2".to_string(), 1u8);
        let ttls = manager.make_ttls(&to).unwrap();
        assert_eq!(ttls, vec![0, 1, 0]);
    }

    #[test]
    fn test_add_with_explicit_duplicate_vifi_fails() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(1).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif().times(1).returning(|| Ok(vec![vif_row(0, "a1")]));

        let phyints = vec![interface("a1", 2)];
        let manager = VifManager::new(Arc::new(mock), &phyints).unwrap();
        let err = manager.add(&interface("a2", 3), Some(0)).unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }
}
