//! Static configuration domain model: the phyint list and MRoute set the
//! Daemon Orchestrator builds its VifManager and MfcManager from.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::interface::Interface;

pub(crate) const DEFAULT_TTL: u8 = 1;

/// A single configured multicast route: forward traffic arriving on `from`
/// toward each interface in `to`, optionally restricted to one `source`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MRoute {
    pub from: String,
    pub group: Ipv4Addr,
    pub source: Ipv4Addr,
    pub to: BTreeMap<String, u8>,
}

/// The fully parsed and validated daemon configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub phyints: Vec<Interface>,
    pub mroutes: Vec<MRoute>,
}

impl Config {
    /// Validates that every interface name referenced by an MRoute is a
    /// configured phyint and that every route's group is multicast.
    pub fn validate(&self) -> Result<()> {
        let names: std::collections::HashSet<&str> =
            self.phyints.iter().map(|i| i.name.as_str()).collect();

        for phyint in &self.phyints {
            if !phyint.is_multicast_capable() || phyint.addresses.is_empty() {
                return Err(Error::InvariantViolation(format!(
                    "phyint {} is not multicast-capable or has no address",
                    phyint.name
                )));
            }
        }

        for mroute in &self.mroutes {
            if !names.contains(mroute.from.as_str()) {
                return Err(Error::InvariantViolation(format!(
                    "mroute references unconfigured interface {}",
                    mroute.from
                )));
            }
            if !mroute.group.is_multicast() {
                return Err(Error::InvariantViolation(format!(
                    "mroute group {} is not a multicast address",
                    mroute.group
                )));
            }
            for to_name in mroute.to.keys() {
                if !names.contains(to_name.as_str()) {
                    return Err(Error::InvariantViolation(format!(
                        "mroute references unconfigured outgoing interface {to_name}"
                    )));
                }
            }
        }
        Ok(())
    }
}
