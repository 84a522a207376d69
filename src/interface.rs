//! Host network interface inventory.
//!
//! Enumerates interfaces the same way the kernel bridge needs them: name,
//! kernel index, flag set, and the IPv4 addresses bound to them.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Linux network interface flags, as returned by `getifaddrs`/`SIOCGIFFLAGS`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InterfaceFlags: u32 {
        const UP = 1 << 0;
        const BROADCAST = 1 << 1;
        const DEBUG = 1 << 2;
        const LOOPBACK = 1 << 3;
        const POINTOPOINT = 1 << 4;
        const NOTRAILERS = 1 << 5;
        const RUNNING = 1 << 6;
        const NOARP = 1 << 7;
        const PROMISC = 1 << 8;
        const ALLMULTI = 1 << 9;
        const MASTER = 1 << 10;
        const SLAVE = 1 << 11;
        const MULTICAST = 1 << 12;
        const PORTSEL = 1 << 13;
        const AUTOMEDIA = 1 << 14;
        const DYNAMIC = 1 << 15;
        const LOWER_UP = 1 << 16;
        const DORMANT = 1 << 17;
        const ECHO = 1 << 18;
    }
}

/// An address-or-index value, used wherever the kernel lets a VIF's local
/// endpoint be expressed either way (`VIFF_USE_IFINDEX`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceRef {
    ByAddress(Ipv4Addr),
    ByIndex(u32),
    Unspecified,
}

impl InterfaceRef {
    pub fn is_unspecified(&self) -> bool {
        matches!(self, InterfaceRef::Unspecified)
    }
}

/// A host network interface and the addresses bound to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub flags: InterfaceFlags,
    pub addresses: HashSet<Ipv4Addr>,
}

impl Interface {
    pub fn is_multicast_capable(&self) -> bool {
        self.flags.contains(InterfaceFlags::MULTICAST)
    }

    /// The first IPv4 address bound to this interface, if any.
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().min().copied()
    }
}

/// Enumerate host interfaces, merging every address observed under a shared name.
pub fn network_interfaces() -> Result<HashMap<String, Interface>> {
    let mut interfaces: HashMap<String, Interface> = HashMap::new();

    for ifaddr in getifaddrs().map_err(|e| Error::KernelError(format!("getifaddrs: {e}")))? {
        let name = ifaddr.interface_name.clone();
        let index = if_nametoindex(name.as_str()).unwrap_or(0);
        let flags = InterfaceFlags::from_bits_truncate(ifaddr.flags.bits() as u32);

        let entry = interfaces.entry(name.clone()).or_insert_with(|| Interface {
            name,
            index,
            flags,
            addresses: HashSet::new(),
        });

        if let Some(addr) = ifaddr.address.and_then(|a| a.as_sockaddr_in().map(|s| s.ip())) {
            entry.addresses.insert(addr);
        }
    }

    Ok(interfaces)
}
