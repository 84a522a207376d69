//! The IGMP raw socket and the `KernelControl` trait that abstracts it.
//!
//! `IgmpSocketBridge` is the production implementation, backed by a real
//! `AF_INET/SOCK_RAW/IPPROTO_IGMP` socket. Managers and the dispatcher depend
//! on the `KernelControl` trait so tests can substitute a `mockall`-generated
//! fake instead of touching the live kernel routing table.

use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use libc::c_void;

use super::consts::*;
use super::structs::{Mfcctl, SiocSgReq, SiocVifReq, Vifctl};
use crate::error::{Error, Result};
use crate::interface::InterfaceRef;

/// A request to install a VIF, mirroring the kernel's `struct vifctl`.
#[derive(Clone, Copy, Debug)]
pub struct VifCtl {
    pub vifi: u16,
    pub threshold: u8,
    pub rate_limit: u32,
    pub local: InterfaceRef,
    pub remote: Ipv4Addr,
}

/// A request to install or remove an MFC entry, mirroring `struct mfcctl`.
#[derive(Clone, Debug)]
pub struct MfcCtl {
    pub origin: Ipv4Addr,
    pub group: Ipv4Addr,
    pub parent: u16,
    pub ttls: Vec<u8>,
}

/// Packet/byte counters for a single VIF, returned by `SIOCGETVIFCNT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VifCounts {
    pub icount: u64,
    pub ocount: u64,
    pub ibytes: u64,
    pub obytes: u64,
}

/// Packet/byte counters for an (S,G) entry, returned by `SIOCGETSGCNT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SgCounts {
    pub pktcnt: u64,
    pub bytecnt: u64,
    pub wrong_if: u64,
}

/// Flags controlling which tables `flush` clears.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlushOptions {
    pub vifs: bool,
    pub mfc: bool,
    pub static_entries: bool,
}

impl FlushOptions {
    pub fn all() -> Self {
        FlushOptions {
            vifs: true,
            mfc: true,
            static_entries: true,
        }
    }
}

/// Narrow interface over the kernel multicast routing control protocol.
///
/// Everything the VIF Manager, MFC Manager, and Upcall Dispatcher need from
/// the kernel is expressed here so that their logic can be exercised against
/// a `mockall` fake instead of a live `CAP_NET_ADMIN` socket.
#[cfg_attr(test, mockall::automock)]
pub trait KernelControl: Send + Sync {
    fn enable_mrt(&self) -> Result<()>;
    fn disable_mrt(&self) -> Result<()>;
    fn enable_pim(&self) -> Result<()>;
    fn disable_pim(&self) -> Result<()>;
    fn pim_is_enabled(&self) -> Result<bool>;
    fn mrt_version(&self) -> Result<i32>;
    fn add_vif(&self, vifctl: VifCtl) -> Result<()>;
    fn del_vif(&self, vifi: u16) -> Result<()>;
    fn add_mfc(&self, mfcctl: MfcCtl) -> Result<()>;
    fn del_mfc(&self, origin: Ipv4Addr, group: Ipv4Addr, parent: u16) -> Result<()>;
    fn flush(&self, options: FlushOptions) -> Result<()>;
    fn get_vif_counts(&self, vifi: u16) -> Result<VifCounts>;
    fn get_mfc_counts(&self, src: Ipv4Addr, grp: Ipv4Addr) -> Result<SgCounts>;
    fn read_ip_mr_vif(&self) -> Result<Vec<super::proc::VifTableEntry>>;
    fn read_ip_mr_cache(&self) -> Result<Vec<super::proc::MfcEntry>>;
    /// Blocking read of the next datagram on the routing socket.
    fn recv(&self, buf: &mut [u8]) -> Result<usize>;
    /// Joins `group` on the local interface identified by `iface_addr` via
    /// `IP_ADD_MEMBERSHIP`. Used for interactive group membership, separate
    /// from the MRT forwarding tables.
    fn add_membership(&self, group: Ipv4Addr, iface_addr: Ipv4Addr) -> Result<()>;
    /// Leaves `group` on `iface_addr` via `IP_DROP_MEMBERSHIP`.
    fn drop_membership(&self, group: Ipv4Addr, iface_addr: Ipv4Addr) -> Result<()>;
}

/// The production `KernelControl`, backed by a real IGMP raw socket.
pub struct IgmpSocketBridge {
    fd: OwnedFd,
}

impl IgmpSocketBridge {
    /// Open the raw `AF_INET/SOCK_RAW/IPPROTO_IGMP` socket used for both
    /// control (setsockopt/ioctl) and upcall delivery (recv).
    pub fn open() -> Result<Self> {
        let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_IGMP) };
        if raw == -1 {
            let io_err = std::io::Error::last_os_error();
            return Err(match io_err.raw_os_error() {
                Some(libc::EPERM) | Some(libc::EACCES) => Error::Permission(
                    "opening the IGMP raw socket requires CAP_NET_ADMIN".to_string(),
                ),
                _ => Error::KernelError(io_err.to_string()),
            });
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(IgmpSocketBridge { fd })
    }

    fn setsockopt_raw(&self, optname: libc::c_int, value: *const c_void, len: libc::socklen_t) -> Result<()> {
        let ret = unsafe {
            libc::setsockopt(self.fd.as_raw_fd(), libc::IPPROTO_IP, optname, value, len)
        };
        if ret == -1 {
            return Err(errno_to_error(optname));
        }
        Ok(())
    }

    fn setsockopt_int(&self, optname: libc::c_int, value: i32) -> Result<()> {
        self.setsockopt_raw(
            optname,
            &value as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    fn getsockopt_int(&self, optname: libc::c_int) -> Result<i32> {
        let mut value: i32 = 0;
        let mut len = std::mem::size_of::<i32>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                libc::IPPROTO_IP,
                optname,
                &mut value as *mut _ as *mut c_void,
                &mut len,
            )
        };
        if ret == -1 {
            return Err(Error::KernelError(std::io::Error::last_os_error().to_string()));
        }
        Ok(value)
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn errno_to_error(optname: libc::c_int) -> Error {
    let io_err = std::io::Error::last_os_error();
    match (optname, io_err.raw_os_error()) {
        (MRT_INIT, Some(libc::EADDRINUSE)) => Error::AlreadyEnabled,
        (MRT_DONE, Some(libc::EACCES)) => Error::AlreadyDisabled,
        (_, Some(libc::EPERM)) | (_, Some(libc::EACCES)) => {
            Error::Permission(io_err.to_string())
        }
        _ => Error::KernelError(io_err.to_string()),
    }
}

impl KernelControl for IgmpSocketBridge {
    fn enable_mrt(&self) -> Result<()> {
        self.setsockopt_int(MRT_INIT, 1)
    }

    fn disable_mrt(&self) -> Result<()> {
        self.setsockopt_int(MRT_DONE, 1)
    }

    fn enable_pim(&self) -> Result<()> {
        self.setsockopt_int(MRT_PIM, 1)?;
        self.setsockopt_int(MRT_ASSERT, 1)
    }

    fn disable_pim(&self) -> Result<()> {
        self.setsockopt_int(MRT_PIM, 0)?;
        self.setsockopt_int(MRT_ASSERT, 0)
    }

    fn pim_is_enabled(&self) -> Result<bool> {
        Ok(self.getsockopt_int(MRT_PIM)? != 0 && self.getsockopt_int(MRT_ASSERT)? != 0)
    }

    fn mrt_version(&self) -> Result<i32> {
        self.getsockopt_int(MRT_VERSION)
    }

    fn add_vif(&self, vifctl: VifCtl) -> Result<()> {
        let raw = match vifctl.local {
            InterfaceRef::ByIndex(ifindex) => {
                Vifctl::by_index(vifctl.vifi, vifctl.threshold, vifctl.rate_limit, ifindex)
            }
            InterfaceRef::ByAddress(addr) => Vifctl::by_address(
                vifctl.vifi,
                vifctl.threshold,
                vifctl.rate_limit,
                u32::from(addr).to_be(),
                u32::from(vifctl.remote).to_be(),
            ),
            InterfaceRef::Unspecified => {
                return Err(Error::InvariantViolation(
                    "add_vif requires a concrete address or ifindex".to_string(),
                ))
            }
        };
        self.setsockopt_raw(
            MRT_ADD_VIF,
            &raw as *const _ as *const c_void,
            std::mem::size_of::<Vifctl>() as libc::socklen_t,
        )
    }

    fn del_vif(&self, vifi: u16) -> Result<()> {
        let raw = Vifctl::by_address(vifi, 0, 0, 0, 0);
        self.setsockopt_raw(
            MRT_DEL_VIF,
            &raw as *const _ as *const c_void,
            std::mem::size_of::<Vifctl>() as libc::socklen_t,
        )
    }

    fn add_mfc(&self, mfcctl: MfcCtl) -> Result<()> {
        let raw = Mfcctl::new(
            u32::from(mfcctl.origin).to_be(),
            u32::from(mfcctl.group).to_be(),
            mfcctl.parent,
            &mfcctl.ttls,
        );
        self.setsockopt_raw(
            MRT_ADD_MFC,
            &raw as *const _ as *const c_void,
            std::mem::size_of::<Mfcctl>() as libc::socklen_t,
        )
    }

    fn del_mfc(&self, origin: Ipv4Addr, group: Ipv4Addr, parent: u16) -> Result<()> {
        let raw = Mfcctl::new(u32::from(origin).to_be(), u32::from(group).to_be(), parent, &[]);
        self.setsockopt_raw(
            MRT_DEL_MFC,
            &raw as *const _ as *const c_void,
            std::mem::size_of::<Mfcctl>() as libc::socklen_t,
        )
    }

    fn flush(&self, options: FlushOptions) -> Result<()> {
        let mut mask = 0;
        if options.vifs {
            mask |= MRT_FLUSH_VIFS;
            if options.static_entries {
                mask |= MRT_FLUSH_VIFS_STATIC;
            }
        }
        if options.mfc {
            mask |= MRT_FLUSH_MFC;
            if options.static_entries {
                mask |= MRT_FLUSH_MFC_STATIC;
            }
        }
        self.setsockopt_int(MRT_FLUSH, mask)
    }

    fn get_vif_counts(&self, vifi: u16) -> Result<VifCounts> {
        let mut req = SiocVifReq {
            vifi,
            icount: 0,
            ocount: 0,
            ibytes: 0,
            obytes: 0,
        };
        let ret = unsafe {
            libc::ioctl(self.raw_fd(), SIOCGETVIFCNT, &mut req as *mut _ as *mut c_void)
        };
        if ret == -1 {
            return Err(Error::KernelError(std::io::Error::last_os_error().to_string()));
        }
        Ok(VifCounts {
            icount: req.icount as u64,
            ocount: req.ocount as u64,
            ibytes: req.ibytes as u64,
            obytes: req.obytes as u64,
        })
    }

    fn get_mfc_counts(&self, src: Ipv4Addr, grp: Ipv4Addr) -> Result<SgCounts> {
        let mut req = SiocSgReq {
            src: libc::in_addr {
                s_addr: u32::from(src).to_be(),
            },
            grp: libc::in_addr {
                s_addr: u32::from(grp).to_be(),
            },
            pktcnt: 0,
            bytecnt: 0,
            wrong_if: 0,
        };
        let ret = unsafe {
            libc::ioctl(self.raw_fd(), SIOCGETSGCNT, &mut req as *mut _ as *mut c_void)
        };
        if ret == -1 {
            return Err(Error::KernelError(std::io::Error::last_os_error().to_string()));
        }
        Ok(SgCounts {
            pktcnt: req.pktcnt as u64,
            bytecnt: req.bytecnt as u64,
            wrong_if: req.wrong_if as u64,
        })
    }

    fn read_ip_mr_vif(&self) -> Result<Vec<super::proc::VifTableEntry>> {
        super::proc::read_ip_mr_vif()
    }

    fn read_ip_mr_cache(&self) -> Result<Vec<super::proc::MfcEntry>> {
        super::proc::read_ip_mr_cache()
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let n = nix::sys::socket::recv(self.raw_fd(), buf, nix::sys::socket::MsgFlags::empty())?;
        Ok(n)
    }

    fn add_membership(&self, group: Ipv4Addr, iface_addr: Ipv4Addr) -> Result<()> {
        let mreq = libc::ip_mreq {
            imr_multiaddr: libc::in_addr {
                s_addr: u32::from(group).to_be(),
            },
            imr_interface: libc::in_addr {
                s_addr: u32::from(iface_addr).to_be(),
            },
        };
        self.setsockopt_raw(
            libc::IP_ADD_MEMBERSHIP,
            &mreq as *const _ as *const c_void,
            std::mem::size_of::<libc::ip_mreq>() as libc::socklen_t,
        )
    }

    fn drop_membership(&self, group: Ipv4Addr, iface_addr: Ipv4Addr) -> Result<()> {
        let mreq = libc::ip_mreq {
            imr_multiaddr: libc::in_addr {
                s_addr: u32::from(group).to_be(),
            },
            imr_interface: libc::in_addr {
                s_addr: u32::from(iface_addr).to_be(),
            },
        };
        self.setsockopt_raw(
            libc::IP_DROP_MEMBERSHIP,
            &mreq as *const _ as *const c_void,
            std::mem::size_of::<libc::ip_mreq>() as libc::socklen_t,
        )
    }
}
