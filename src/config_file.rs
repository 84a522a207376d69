//! INI configuration file loading and validation.
//!
//! Two-stage pipeline: [`parse`] turns raw INI text into typed but
//! unresolved records, then [`resolve`] checks every referenced interface
//! name against the live Interface Inventory and produces a validated
//! [`Config`].

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

use ini::Ini;

use crate::config::{Config, MRoute, DEFAULT_TTL};
use crate::error::{Error, Result};
use crate::interface::Interface;

/// An MRoute as written in the config file, before interface names are
/// checked against the live inventory.
struct RawMRoute {
    from: String,
    group: String,
    source: String,
    to: String,
}

struct RawConfig {
    phyint_names: Vec<String>,
    mroutes: Vec<RawMRoute>,
}

pub fn load(path: impl AsRef<Path>, inventory: &std::collections::HashMap<String, Interface>) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("config file {}", path.display()))
        } else {
            Error::Io(e)
        }
    })?;
    let raw = parse(&content)?;
    resolve(raw, inventory)
}

fn parse(content: &str) -> Result<RawConfig> {
    let ini = Ini::load_from_str(content)
        .map_err(|e| Error::Malformed(format!("invalid INI syntax: {e}")))?;

    let phyints_section = ini
        .section(Some("phyints"))
        .ok_or_else(|| Error::Malformed("missing [phyints] section".to_string()))?;
    let names = phyints_section
        .get("names")
        .ok_or_else(|| Error::Malformed("[phyints] section missing `names` key".to_string()))?;
    let phyint_names = str_to_list(names);

    let mut mroutes = Vec::new();
    for (section_name, props) in ini.iter() {
        let Some(section_name) = section_name else { continue };
        if !section_name.starts_with("mroute_") {
            continue;
        }
        let from = props
            .get("from")
            .ok_or_else(|| Error::Malformed(format!("[{section_name}] missing `from` key")))?
            .to_string();
        let group = props
            .get("group")
            .ok_or_else(|| Error::Malformed(format!("[{section_name}] missing `group` key")))?
            .to_string();
        let source = props.get("source").unwrap_or("0.0.0.0").to_string();
        let to = props.get("to").unwrap_or("").to_string();
        mroutes.push(RawMRoute { from, group, source, to });
    }

    Ok(RawConfig { phyint_names, mroutes })
}

fn resolve(raw: RawConfig, inventory: &std::collections::HashMap<String, Interface>) -> Result<Config> {
    let mut phyints = Vec::new();
    for name in &raw.phyint_names {
        let interface = inventory
            .get(name)
            .ok_or_else(|| Error::InvariantViolation(format!("unknown interface {name}")))?
            .clone();
        phyints.push(interface);
    }

    let mut mroutes = Vec::new();
    for raw_mroute in raw.mroutes {
        let group: Ipv4Addr = raw_mroute
            .group
            .parse()
            .map_err(|_| Error::Malformed(format!("invalid group address {:?}", raw_mroute.group)))?;
        let source: Ipv4Addr = raw_mroute
            .source
            .parse()
            .map_err(|_| Error::Malformed(format!("invalid source address {:?}", raw_mroute.source)))?;
        let to = parse_outgoing_map(&raw_mroute.to)?;

        mroutes.push(MRoute {
            from: raw_mroute.from,
            group,
            source,
            to,
        });
    }

    let config = Config { phyints, mroutes };
    config.validate()?;
    Ok(config)
}

fn str_to_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a comma-separated `iface` or `iface=ttl` list into a name→ttl map.
fn parse_outgoing_map(value: &str) -> Result<BTreeMap<String, u8>> {
    let mut map = BTreeMap::new();
    for entry in str_to_list(value) {
        let (name, ttl) = match entry.split_once('=') {
            Some((name, ttl)) => {
                let ttl: u8 = ttl
                    .trim()
                    .parse()
                    .map_err(|_| Error::Malformed(format!("invalid ttl in {entry:?}")))?;
                (name.trim().to_string(), ttl)
            }
            None => (entry, DEFAULT_TTL),
        };
        map.insert(name, ttl);
    }
    Ok(map)
}
