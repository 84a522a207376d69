//! `#[repr(C)]` mirrors of the kernel's multicast routing structs.
//!
//! Field names follow `<linux/mroute.h>`; layouts are packed by hand to match
//! the kernel ABI exactly rather than relying on Rust's C layout rules lining
//! up, since padding differs between union/non-union members.

use libc::{c_int, c_uchar, c_uint, c_ushort, in_addr};

use super::consts::{MAXVIFS, VIFF_USE_IFINDEX};

#[repr(C)]
#[derive(Clone, Copy)]
pub union VifcAddrUnion {
    pub vifc_lcl_addr: in_addr,
    pub vifc_lcl_ifindex: c_int,
}

#[repr(C)]
pub struct Vifctl {
    pub vifc_vifi: c_ushort,
    pub vifc_flags: c_uchar,
    pub vifc_threshold: c_uchar,
    pub vifc_rate_limit: c_uint,
    pub vifc_lcl: VifcAddrUnion,
    pub vifc_rmt_addr: in_addr,
}

impl Vifctl {
    pub fn by_index(vifi: u16, threshold: u8, rate_limit: u32, ifindex: u32) -> Self {
        Vifctl {
            vifc_vifi: vifi,
            vifc_flags: VIFF_USE_IFINDEX,
            vifc_threshold: threshold,
            vifc_rate_limit: rate_limit,
            vifc_lcl: VifcAddrUnion {
                vifc_lcl_ifindex: ifindex as c_int,
            },
            vifc_rmt_addr: in_addr { s_addr: 0 },
        }
    }

    pub fn by_address(vifi: u16, threshold: u8, rate_limit: u32, lcl_addr: u32, rmt_addr: u32) -> Self {
        Vifctl {
            vifc_vifi: vifi,
            vifc_flags: 0,
            vifc_threshold: threshold,
            vifc_rate_limit: rate_limit,
            vifc_lcl: VifcAddrUnion {
                vifc_lcl_addr: in_addr { s_addr: lcl_addr },
            },
            vifc_rmt_addr: in_addr { s_addr: rmt_addr },
        }
    }
}

#[repr(C)]
pub struct Mfcctl {
    pub mfcc_origin: in_addr,
    pub mfcc_mcastgrp: in_addr,
    pub mfcc_parent: c_ushort,
    pub mfcc_ttls: [c_uchar; MAXVIFS],
    pub mfcc_pkt_cnt: c_uint,
    pub mfcc_byte_cnt: c_uint,
    pub mfcc_wrong_if: c_uint,
    pub mfcc_expire: c_int,
}

impl Mfcctl {
    pub fn new(origin: u32, group: u32, parent: u16, ttls: &[u8]) -> Self {
        let mut mfcc_ttls = [0u8; MAXVIFS];
        for (slot, ttl) in mfcc_ttls.iter_mut().zip(ttls.iter()) {
            *slot = *ttl;
        }
        Mfcctl {
            mfcc_origin: in_addr { s_addr: origin },
            mfcc_mcastgrp: in_addr { s_addr: group },
            mfcc_parent: parent,
            mfcc_ttls,
            mfcc_pkt_cnt: 0,
            mfcc_byte_cnt: 0,
            mfcc_wrong_if: 0,
            mfcc_expire: 0,
        }
    }
}

#[repr(C)]
pub struct SiocVifReq {
    pub vifi: c_ushort,
    pub icount: libc::c_ulong,
    pub ocount: libc::c_ulong,
    pub ibytes: libc::c_ulong,
    pub obytes: libc::c_ulong,
}

#[repr(C)]
pub struct SiocSgReq {
    pub src: in_addr,
    pub grp: in_addr,
    pub pktcnt: libc::c_ulong,
    pub bytecnt: libc::c_ulong,
    pub wrong_if: libc::c_ulong,
}
