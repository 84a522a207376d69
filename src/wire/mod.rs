//! Pure wire-format decoders for IP headers, IGMP messages, and kernel upcalls.
//!
//! None of these functions touch a socket; they only interpret byte slices,
//! so they are exercised directly with fixture buffers in tests.

pub mod igmp;
pub mod ip;
pub mod upcall;

pub use igmp::{Igmp, IgmpMessage, IgmpType, IgmpV3MembershipReport, IgmpV3Query, IgmpV3Record, IgmpV3RecordType};
pub use ip::{IpHeader, IpProtocol};
pub use upcall::{ControlMsgType, IgmpControl};
