//! The kernel bridge: socket options, ioctls, and `/proc` table parsing for
//! the Linux IPv4 multicast routing table.

pub mod consts;
pub mod proc;
pub mod socket;
pub mod structs;

pub use proc::{host_hex_to_ip, MfcEntry, VifTableEntry};
pub use socket::{FlushOptions, IgmpSocketBridge, KernelControl, MfcCtl, SgCounts, VifCounts, VifCtl};

#[cfg(test)]
pub use socket::MockKernelControl;
