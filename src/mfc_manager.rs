//! Ownership of the multicast forwarding cache: static routes installed
//! eagerly, and dynamic templates that wait for a NOCACHE upcall before a
//! specific `(source, group)` entry is ever handed to the kernel.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::MRoute;
use crate::error::{Error, Result};
use crate::kernel::{KernelControl, MfcCtl};
use crate::vif_manager::VifManager;
use crate::wire::upcall::{ControlMsgType, IgmpControl};

pub struct MfcManager {
    kernel: Arc<dyn KernelControl>,
    vif: Arc<VifManager>,
    static_mfc: RwLock<HashMap<u16, Vec<MRoute>>>,
    dynamic: RwLock<HashMap<u16, Vec<MRoute>>>,
}

impl MfcManager {
    pub fn new(kernel: Arc<dyn KernelControl>, vif: Arc<VifManager>, mroutes: &[MRoute]) -> Result<Self> {
        let manager = MfcManager {
            kernel,
            vif,
            static_mfc: RwLock::new(HashMap::new()),
            dynamic: RwLock::new(HashMap::new()),
        };
        for mroute in mroutes {
            manager.add(mroute.clone())?;
        }
        Ok(manager)
    }

    pub fn add(&self, mroute: MRoute) -> Result<()> {
        let vifi = self.vif.vifi(&mroute.from)?;
        if mroute.source == Ipv4Addr::UNSPECIFIED {
            let mut dynamic = self.dynamic.write();
            let templates = dynamic.entry(vifi).or_default();
            match templates
                .iter_mut()
                .find(|existing| existing.group == mroute.group && existing.to == mroute.to)
            {
                Some(existing) => *existing = mroute,
                None => templates.push(mroute),
            }
            Ok(())
        } else {
            let ttls = self.vif.make_ttls(&mroute.to)?;
            self.kernel.add_mfc(MfcCtl {
                origin: mroute.source,
                group: mroute.group,
                parent: vifi,
                ttls,
            })?;
            self.static_mfc.write().entry(vifi).or_default().push(mroute);
            Ok(())
        }
    }

    pub fn remove(&self, mroute: &MRoute) -> Result<()> {
        let vifi = self.vif.vifi(&mroute.from)?;
        if mroute.source == Ipv4Addr::UNSPECIFIED {
            let mut dynamic = self.dynamic.write();
            let templates = dynamic
                .get_mut(&vifi)
                .ok_or_else(|| Error::NotFound("dynamic mroute".to_string()))?;
            let before = templates.len();
            templates.retain(|existing| !(existing.group == mroute.group && existing.to == mroute.to));
            if templates.len() == before {
                return Err(Error::NotFound("dynamic mroute".to_string()));
            }
            if templates.is_empty() {
                dynamic.remove(&vifi);
            }
            Ok(())
        } else {
            self.kernel.del_mfc(mroute.source, mroute.group, vifi)?;
            let mut static_mfc = self.static_mfc.write();
            if let Some(entries) = static_mfc.get_mut(&vifi) {
                entries.retain(|existing| {
                    !(existing.group == mroute.group && existing.source == mroute.source)
                });
                if entries.is_empty() {
                    static_mfc.remove(&vifi);
                }
            }
            Ok(())
        }
    }

    /// Finds the first MRoute registered on `iif_vifi` matching `group`
    /// (and, for a concrete source, matching `origin` too).
    pub fn find_match(&self, iif_vifi: u16, group: Ipv4Addr, source: Ipv4Addr) -> Option<MRoute> {
        if source == Ipv4Addr::UNSPECIFIED {
            self.dynamic
                .read()
                .get(&iif_vifi)
                .and_then(|templates| templates.iter().find(|m| m.group == group).cloned())
        } else {
            self.static_mfc
                .read()
                .get(&iif_vifi)
                .and_then(|entries| {
                    entries
                        .iter()
                        .find(|m| m.group == group && m.source == source)
                        .cloned()
                })
        }
    }

    /// Snapshots the static MFC table, grouped by input vif.
    pub fn list_static(&self) -> HashMap<u16, Vec<MRoute>> {
        self.static_mfc.read().clone()
    }

    /// Snapshots the dynamic template table, grouped by input vif.
    pub fn list_dynamic(&self) -> HashMap<u16, Vec<MRoute>> {
        self.dynamic.read().clone()
    }

    /// Resolves a NOCACHE upcall against the dynamic template table and, on a
    /// match, installs a concrete MFC for the observed `(source, group)`.
    pub fn handle_nocache(&self, msg: &IgmpControl) -> Result<bool> {
        if msg.msgtype != ControlMsgType::NoCache {
            return Ok(false);
        }
        let iif = msg.iif();
        let Some(matched) = self.find_match(iif, msg.im_dst, Ipv4Addr::UNSPECIFIED) else {
            return Ok(false);
        };
        let ttls = self.vif.make_ttls(&matched.to)?;
        self.kernel.add_mfc(MfcCtl {
            origin: msg.im_src,
            group: msg.im_dst,
            parent: iif,
            ttls,
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Interface, InterfaceFlags};
    use crate::kernel::{MockKernelControl, VifTableEntry};
    use crate::wire::upcall::ControlMsgType;
    use std::collections::BTreeMap;

    fn interface(name: &str, index: u32) -> Interface {
        Interface {
            name: name.to_string(),
            index,
            flags: InterfaceFlags::UP | InterfaceFlags::MULTICAST,
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

    fn make_vif_manager(mock: MockKernelControl, phyints: &[Interface]) -> Arc<VifManager> {
        Arc::new(VifManager::new(Arc::new(mock), phyints).unwrap())
    }

    #[test]
    fn test_static_mroute_installs_eagerly() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(1).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "eth0")]));
        let phyints = vec![interface("eth0", 2)];
        let vif = make_vif_manager(mock, &phyints);

        let mut kernel = MockKernelControl::new();
        kernel
            .expect_add_mfc()
            .withf(|m| m.origin == Ipv4Addr::new(10, 0, 0, 1) && m.parent == 0)
            .returning(|_| Ok(()));
        let kernel = Arc::new(kernel);

        let mroute = MRoute {
            from: "eth0".to_string(),
            group: Ipv4Addr::new(239, 0, 0, 1),
            source: Ipv4Addr::new(10, 0, 0, 1),
            to: BTreeMap::new(),
        };
        let manager = MfcManager::new(kernel, vif, &[mroute]).unwrap();
        assert!(manager
            .find_match(0, Ipv4Addr::new(239, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 1))
            .is_some());
    }

    #[test]
    fn test_dynamic_mroute_not_installed_until_upcall() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(1).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "eth0")]));
        let phyints = vec![interface("eth0", 2)];
        let vif = make_vif_manager(mock, &phyints);

        let kernel = Arc::new(MockKernelControl::new());
        let mroute = MRoute {
            from: "eth0".to_string(),
            group: Ipv4Addr::new(239, 0, 0, 1),
            source: Ipv4Addr::UNSPECIFIED,
            to: BTreeMap::new(),
        };
        let manager = MfcManager::new(kernel, vif, &[mroute]).unwrap();
        assert!(manager
            .find_match(0, Ipv4Addr::new(239, 0, 0, 1), Ipv4Addr::UNSPECIFIED)
            .is_some());
    }

    #[test]
    fn test_handle_nocache_installs_on_match() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(1).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "eth0")]));
        let phyints = vec![interface("eth0", 2)];
        let vif = make_vif_manager(mock, &phyints);

        let mut kernel = MockKernelControl::new();
        kernel
            .expect_add_mfc()
            .withf(|m| m.origin == Ipv4Addr::new(10, 1, 1, 1) && m.parent == 0)
            .returning(|_| Ok(()));
        let kernel = Arc::new(kernel);

        let mroute = MRoute {
            from: "eth0".to_string(),
            group: Ipv4Addr::new(239, 0, 0, 1),
            source: Ipv4Addr::UNSPECIFIED,
            to: BTreeMap::new(),
        };
        let manager = MfcManager::new(kernel, vif, &[mroute]).unwrap();

        let msg = IgmpControl {
            msgtype: ControlMsgType::NoCache,
            mbz: 0,
            vif: 0,
            vif_hi: 0,
            im_src: Ipv4Addr::new(10, 1, 1, 1),
            im_dst: Ipv4Addr::new(239, 0, 0, 1),
        };
        assert!(manager.handle_nocache(&msg).unwrap());
    }

    #[test]
    fn test_handle_nocache_no_match_drops_silently() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(1).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "eth0")]));
        let phyints = vec![interface("eth0", 2)];
        let vif = make_vif_manager(mock, &phyints);

        let kernel = Arc::new(MockKernelControl::new());
        let manager = MfcManager::new(kernel, vif, &[]).unwrap();

        let msg = IgmpControl {
            msgtype: ControlMsgType::NoCache,
            mbz: 0,
            vif: 0,
            vif_hi: 0,
            im_src: Ipv4Addr::new(10, 1, 1, 1),
            im_dst: Ipv4Addr::new(239, 9, 9, 9),
        };
        assert!(!manager.handle_nocache(&msg).unwrap());
    }

    #[test]
    fn test_dynamic_upsert_replaces_equal_entry() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(1).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "eth0")]));
        let phyints = vec![interface("eth0", 2)];
        let vif = make_vif_manager(mock, &phyints);

        let kernel = Arc::new(MockKernelControl::new());
        let manager = MfcManager::new(kernel, vif, &[]).unwrap();

        let mut to = BTreeMap::new();
        to.insert("eth1".to_string(), 1u8);
        let first = MRoute {
            from: "eth0".to_string(),
            group: Ipv4Addr::new(239, 0, 0, 1),
            source: Ipv4Addr::UNSPECIFIED,
            to: to.clone(),
        };
        manager.add(first.clone()).unwrap();
        manager.add(first).unwrap();
        assert_eq!(manager.dynamic.read().get(&0).unwrap().len(), 1);
    }

    #[test]
    fn test_list_static_and_dynamic_group_by_iif() {
        let mut mock = MockKernelControl::new();
        mock.expect_add_vif().times(1).returning(|_| Ok(()));
        mock.expect_read_ip_mr_vif()
            .times(1)
            .returning(|| Ok(vec![vif_row(0, "eth0")]));
        let phyints = vec![interface("eth0", 2)];
        let vif = make_vif_manager(mock, &phyints);

        let mut kernel = MockKernelControl::new();
        kernel.expect_add_mfc().returning(|_| Ok(()));
        let kernel = Arc::new(kernel);

        let static_mroute = MRoute {
            from: "eth0".to_string(),
            group: Ipv4Addr::new(239, 0, 0, 1),
            source: Ipv4Addr::new(10, 0, 0, 1),
            to: BTreeMap::new(),
        };
        let dynamic_mroute = MRoute {
            from: "eth0".to_string(),
            group: Ipv4Addr::new(239, 0, 0, 2),
            source: Ipv4Addr::UNSPECIFIED,
            to: BTreeMap::new(),
        };
        let manager = MfcManager::new(kernel, vif, &[static_mroute, dynamic_mroute]).unwrap();

        let static_table = manager.list_static();
        assert_eq!(static_table.get(&0).unwrap().len(), 1);
        let dynamic_table = manager.list_dynamic();
        assert_eq!(dynamic_table.get(&0).unwrap().len(), 1);
    }
}
