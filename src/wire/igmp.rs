//! IGMPv1/v2/v3 message parsing.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgmpType {
    MembershipQuery,
    V1MembershipReport,
    V2MembershipReport,
    V2LeaveGroup,
    V3MembershipReport,
    Other(u8),
}

impl From<u8> for IgmpType {
    fn from(value: u8) -> Self {
        match value {
            0x11 => IgmpType::MembershipQuery,
            0x12 => IgmpType::V1MembershipReport,
            0x16 => IgmpType::V2MembershipReport,
            0x17 => IgmpType::V2LeaveGroup,
            0x22 => IgmpType::V3MembershipReport,
            other => IgmpType::Other(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgmpV3RecordType {
    ModeIsInclude,
    ModeIsExclude,
    ChangeToIncludeMode,
    ChangeToExcludeMode,
    AllowNewSources,
    BlockOldSources,
    Other(u8),
}

impl From<u8> for IgmpV3RecordType {
    fn from(value: u8) -> Self {
        match value {
            1 => IgmpV3RecordType::ModeIsInclude,
            2 => IgmpV3RecordType::ModeIsExclude,
            3 => IgmpV3RecordType::ChangeToIncludeMode,
            4 => IgmpV3RecordType::ChangeToExcludeMode,
            5 => IgmpV3RecordType::AllowNewSources,
            6 => IgmpV3RecordType::BlockOldSources,
            other => IgmpV3RecordType::Other(other),
        }
    }
}

/// A plain IGMPv1/v2 message: just the 8-byte fixed header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Igmp {
    pub kind: IgmpType,
    pub max_response_time: u8,
    pub checksum: u16,
    pub group: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgmpV3Query {
    pub max_response_time: u8,
    pub checksum: u16,
    pub group: Ipv4Addr,
    pub qqic: u32,
    pub suppress: bool,
    pub querier_robustness: u8,
    pub source_list: Vec<Ipv4Addr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgmpV3Record {
    pub kind: IgmpV3RecordType,
    pub aux_data_words: u8,
    pub mca: Ipv4Addr,
    pub source_list: Vec<Ipv4Addr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgmpV3MembershipReport {
    pub checksum: u16,
    pub records: Vec<IgmpV3Record>,
}

/// The result of parsing an IGMP payload: the header alone discriminates
/// between the three shapes an IGMP message can take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgmpMessage {
    Plain(Igmp),
    Query(IgmpV3Query),
    Report(IgmpV3MembershipReport),
}

/// Parse an IGMP message starting at the beginning of `buffer` (the IP
/// payload, i.e. `buffer[ip_header.payload_offset()..]`).
pub fn parse(buffer: &[u8]) -> Result<IgmpMessage> {
    if buffer.len() < 8 {
        return Err(Error::Malformed(format!(
            "igmp header needs at least 8 bytes, got {}",
            buffer.len()
        )));
    }

    let kind = IgmpType::from(buffer[0]);
    let max_response_time = buffer[1];
    let checksum = u16::from_be_bytes([buffer[2], buffer[3]]);
    let group = Ipv4Addr::new(buffer[4], buffer[5], buffer[6], buffer[7]);

    match kind {
        IgmpType::V3MembershipReport => parse_report(checksum, buffer).map(IgmpMessage::Report),
        IgmpType::MembershipQuery if buffer.len() >= 12 => {
            parse_query(max_response_time, checksum, group, buffer).map(IgmpMessage::Query)
        }
        _ => Ok(IgmpMessage::Plain(Igmp {
            kind,
            max_response_time,
            checksum,
            group,
        })),
    }
}

fn decode_qqic(byte: u8) -> u32 {
    if byte & 0x80 == 0 {
        byte as u32
    } else {
        let exp = (byte >> 4) & 0x07;
        let mant = (byte & 0x0f) as u32;
        (mant | 0x10) << (exp + 3)
    }
}

fn parse_query(
    max_response_time: u8,
    checksum: u16,
    group: Ipv4Addr,
    buffer: &[u8],
) -> Result<IgmpV3Query> {
    if buffer.len() < 12 {
        return Err(Error::Malformed(format!(
            "igmpv3 query needs at least 12 bytes, got {}",
            buffer.len()
        )));
    }

    let resv_s_qrv = buffer[8];
    let qqic = decode_qqic(buffer[9]);
    let num_sources = u16::from_be_bytes([buffer[10], buffer[11]]) as usize;

    let sources_end = 12 + num_sources * 4;
    if buffer.len() < sources_end {
        return Err(Error::Malformed(format!(
            "igmpv3 query declares {num_sources} sources but buffer is too short"
        )));
    }

    let source_list = parse_addr_list(&buffer[12..sources_end], num_sources);

    Ok(IgmpV3Query {
        max_response_time,
        checksum,
        group,
        qqic,
        suppress: resv_s_qrv & 0x08 != 0,
        querier_robustness: resv_s_qrv & 0x07,
        source_list,
    })
}

fn parse_report(checksum: u16, buffer: &[u8]) -> Result<IgmpV3MembershipReport> {
    let num_records = u16::from_be_bytes([buffer[6], buffer[7]]) as usize;
    let mut records = Vec::with_capacity(num_records);
    let mut offset = 8;

    for _ in 0..num_records {
        if buffer.len() < offset + 8 {
            return Err(Error::Malformed(
                "igmpv3 report record header truncated".to_string(),
            ));
        }
        let kind = IgmpV3RecordType::from(buffer[offset]);
        let aux_data_words = buffer[offset + 1];
        let num_sources = u16::from_be_bytes([buffer[offset + 2], buffer[offset + 3]]) as usize;
        let mca = Ipv4Addr::new(
            buffer[offset + 4],
            buffer[offset + 5],
            buffer[offset + 6],
            buffer[offset + 7],
        );

        let sources_start = offset + 8;
        let sources_end = sources_start + num_sources * 4;
        let aux_end = sources_end + aux_data_words as usize * 4;
        if buffer.len() < aux_end {
            return Err(Error::Malformed(
                "igmpv3 report record body truncated".to_string(),
            ));
        }

        let source_list = parse_addr_list(&buffer[sources_start..sources_end], num_sources);

        records.push(IgmpV3Record {
            kind,
            aux_data_words,
            mca,
            source_list,
        });

        offset = aux_end;
    }

    Ok(IgmpV3MembershipReport { checksum, records })
}

fn parse_addr_list(buffer: &[u8], count: usize) -> Vec<Ipv4Addr> {
    (0..count)
        .map(|i| {
            let o = i * 4;
            Ipv4Addr::new(buffer[o], buffer[o + 1], buffer[o + 2], buffer[o + 3])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_membership_query_v2() {
        let buf = [0x11u8, 0x00, 0x94, 0x04, 0xef, 0x00, 0x00, 0x01];
        let msg = parse(&buf).unwrap();
        match msg {
            IgmpMessage::Plain(igmp) => {
                assert_eq!(igmp.kind, IgmpType::MembershipQuery);
                assert_eq!(igmp.max_response_time, 0);
                assert_eq!(igmp.checksum, 0x9404);
                assert_eq!(igmp.group, Ipv4Addr::new(239, 0, 0, 1));
            }
            other => panic!("expected plain igmp, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_v2_leave_group() {
        let buf = [0x17u8, 0x00, 0x94, 0x04, 0xef, 0x00, 0x00, 0x04];
        let msg = parse(&buf).unwrap();
        match msg {
            IgmpMessage::Plain(igmp) => {
                assert_eq!(igmp.kind, IgmpType::V2LeaveGroup);
                assert_eq!(igmp.group, Ipv4Addr::new(239, 0, 0, 4));
            }
            other => panic!("expected plain igmp, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_v3_query_with_sources() {
        // resv/s/qrv = 0x02 (robustness 2, suppress false), qqic literal 125,
        // num_sources=1, source=10.0.0.5
        let mut buf = vec![0x11, 0x00, 0x00, 0x00, 239, 0, 0, 1, 0x02, 125, 0x00, 0x01];
        buf.extend_from_slice(&[10, 0, 0, 5]);
        let msg = parse(&buf).unwrap();
        match msg {
            IgmpMessage::Query(q) => {
                assert_eq!(q.qqic, 125);
                assert!(!q.suppress);
                assert_eq!(q.querier_robustness, 2);
                assert_eq!(q.source_list, vec![Ipv4Addr::new(10, 0, 0, 5)]);
            }
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_qqic_exponential() {
        // high bit set: exp=0b011, mant=0b0101 -> (0x15) << 6 = 0x540 = 1344
        assert_eq!(decode_qqic(0b1_011_0101), 1344);
        assert_eq!(decode_qqic(100), 100);
    }

    #[test]
    fn test_parse_v3_report_single_record() {
        // type=0x22, reserved, checksum, reserved, num_records=1
        let mut buf = vec![0x22, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        // record: type=2 (MODE_IS_EXCLUDE), aux=0, num_sources=1, mca=239.1.1.1, src=1.2.3.4
        buf.extend_from_slice(&[2, 0, 0x00, 0x01, 239, 1, 1, 1, 1, 2, 3, 4]);
        let msg = parse(&buf).unwrap();
        match msg {
            IgmpMessage::Report(r) => {
                assert_eq!(r.records.len(), 1);
                assert_eq!(r.records[0].kind, IgmpV3RecordType::ModeIsExclude);
                assert_eq!(r.records[0].mca, Ipv4Addr::new(239, 1, 1, 1));
                assert_eq!(r.records[0].source_list, vec![Ipv4Addr::new(1, 2, 3, 4)]);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_short_header() {
        let err = parse(&[0x11, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_parse_membership_query_short_of_v3_falls_back_to_plain() {
        // 10 bytes: full 8-byte header plus 2 trailing bytes, short of the
        // 12 needed for a v3 query's resv/s/qrv + qqic + num_sources fields.
        let buf = [0x11u8, 0x00, 0x94, 0x04, 0xef, 0x00, 0x00, 0x01, 0x02, 125];
        let msg = parse(&buf).unwrap();
        match msg {
            IgmpMessage::Plain(igmp) => {
                assert_eq!(igmp.kind, IgmpType::MembershipQuery);
                assert_eq!(igmp.group, Ipv4Addr::new(239, 0, 0, 1));
            }
            other => panic!("expected plain igmp, got {other:?}"),
        }
    }
}
