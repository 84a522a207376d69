//! Parsers for `/proc/net/ip_mr_vif` and `/proc/net/ip_mr_cache`.

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

const IP_MR_VIF_PATH: &str = "/proc/net/ip_mr_vif";
const IP_MR_CACHE_PATH: &str = "/proc/net/ip_mr_cache";

/// A row of `/proc/net/ip_mr_vif`: `%2d %-10s %8lu %7lu %8lu %7lu %05X %08X %08X`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VifTableEntry {
    pub vifi: u16,
    pub name: String,
    pub bytes_in: u64,
    pub pkts_in: u64,
    pub bytes_out: u64,
    pub pkts_out: u64,
    pub flags: u32,
    pub local: Ipv4Addr,
    pub remote: Ipv4Addr,
}

/// A row of `/proc/net/ip_mr_cache`: `%08X %08X %-3d %8lu %8lu %8lu [vifi:ttl ...]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MfcEntry {
    pub group: Ipv4Addr,
    pub origin: Ipv4Addr,
    pub iif: u16,
    pub packets: u64,
    pub bytes: u64,
    pub wrong_if: u64,
    pub oifs: HashMap<u16, u8>,
}

/// Convert a `/proc` hex word (host byte order) to an IPv4 address.
///
/// The kernel formats these fields by writing the address's in-memory
/// representation as hex without correcting for endianness, so on a
/// little-endian host the byte order of the printed hex digits is the
/// reverse of network order.
pub fn host_hex_to_ip(hex: &str) -> Result<Ipv4Addr> {
    if hex.len() != 8 {
        return Err(Error::Malformed(format!(
            "expected 8 hex digits for a host-order IPv4 word, got {hex:?}"
        )));
    }
    let mut bytes = [0u8; 4];
    for i in 0..4 {
        bytes[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| Error::Malformed(format!("invalid hex word {hex:?}")))?;
    }
    bytes.reverse();
    Ok(Ipv4Addr::from(bytes))
}

pub fn read_ip_mr_vif() -> Result<Vec<VifTableEntry>> {
    let content = fs::read_to_string(IP_MR_VIF_PATH).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotAvailable(IP_MR_VIF_PATH.to_string())
        } else {
            Error::Io(e)
        }
    })?;
    parse_ip_mr_vif(&content)
}

pub fn parse_ip_mr_vif(content: &str) -> Result<Vec<VifTableEntry>> {
    let mut entries = Vec::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(Error::Malformed(format!(
                "malformed line in {IP_MR_VIF_PATH}: {line:?}"
            )));
        }

        let vifi: u16 = fields[0]
            .parse()
            .map_err(|_| Error::Malformed(format!("bad vif index in line {line:?}")))?;
        let flags = u32::from_str_radix(fields[6], 16)
            .map_err(|_| Error::Malformed(format!("bad flags field in line {line:?}")))?;

        entries.push(VifTableEntry {
            vifi,
            name: fields[1].to_string(),
            bytes_in: parse_u64(fields[2], line)?,
            pkts_in: parse_u64(fields[3], line)?,
            bytes_out: parse_u64(fields[4], line)?,
            pkts_out: parse_u64(fields[5], line)?,
            flags,
            local: host_hex_to_ip(fields[7])?,
            remote: host_hex_to_ip(fields[8])?,
        });
    }
    Ok(entries)
}

pub fn read_ip_mr_cache() -> Result<Vec<MfcEntry>> {
    let content = fs::read_to_string(IP_MR_CACHE_PATH).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotAvailable(IP_MR_CACHE_PATH.to_string())
        } else {
            Error::Io(e)
        }
    })?;
    parse_ip_mr_cache(&content)
}

pub fn parse_ip_mr_cache(content: &str) -> Result<Vec<MfcEntry>> {
    let mut entries = Vec::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(Error::Malformed(format!(
                "malformed line in {IP_MR_CACHE_PATH}: {line:?}"
            )));
        }

        let oifs = parse_index_ttl_pairs(&fields[6..])?;

        entries.push(MfcEntry {
            group: host_hex_to_ip(fields[0])?,
            origin: host_hex_to_ip(fields[1])?,
            iif: fields[2]
                .parse()
                .map_err(|_| Error::Malformed(format!("bad iif field in line {line:?}")))?,
            packets: parse_u64(fields[3], line)?,
            bytes: parse_u64(fields[4], line)?,
            wrong_if: parse_u64(fields[5], line)?,
            oifs,
        });
    }
    Ok(entries)
}

fn parse_u64(field: &str, line: &str) -> Result<u64> {
    field
        .parse()
        .map_err(|_| Error::Malformed(format!("bad numeric field {field:?} in line {line:?}")))
}

fn parse_index_ttl_pairs(pairs: &[&str]) -> Result<HashMap<u16, u8>> {
    let mut oifs = HashMap::new();
    for pair in pairs {
        let (vifi, ttl) = pair
            .split_once(':')
            .ok_or_else(|| Error::Malformed(format!("bad oif pair {pair:?}")))?;
        let vifi: u16 = vifi
            .parse()
            .map_err(|_| Error::Malformed(format!("bad oif vif index {vifi:?}")))?;
        let ttl: u8 = ttl
            .parse()
            .map_err(|_| Error::Malformed(format!("bad oif ttl {ttl:?}")))?;
        oifs.insert(vifi, ttl);
    }
    Ok(oifs)
}
