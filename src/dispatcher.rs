//! The blocking upcall read loop: classifies each datagram off the IGMP
//! socket and routes NOCACHE upcalls into the MFC Manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Error;
use crate::kernel::KernelControl;
use crate::mfc_manager::MfcManager;
use crate::wire::ip::{IpHeader, IpProtocol};
use crate::wire::upcall::{ControlMsgType, IgmpControl};

const RECV_BUFFER_SIZE: usize = 6000;

pub struct Dispatcher {
    kernel: Arc<dyn KernelControl>,
    mfc: Arc<MfcManager>,
    shutdown: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(kernel: Arc<dyn KernelControl>, mfc: Arc<MfcManager>, shutdown: Arc<AtomicBool>) -> Self {
        Dispatcher { kernel, mfc, shutdown }
    }

    /// Runs the blocking read loop until `shutdown` is set or the socket
    /// closes. Intended to run on its own background thread.
    pub fn run(&self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.kernel.recv(&mut buf) {
                Ok(n) => self.dispatch(&buf[..n]),
                Err(Error::Io(_)) | Err(Error::Errno(_)) => break,
                Err(e) => {
                    warn!(error = %e, "upcall read failed");
                }
            }
        }
    }

    fn dispatch(&self, datagram: &[u8]) {
        let header = match IpHeader::parse(datagram) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "dropping malformed datagram on igmp socket");
                return;
            }
        };

        match header.protocol {
            IpProtocol::Control => self.dispatch_control(datagram),
            IpProtocol::Igmp => self.dispatch_igmp(&header, datagram),
            other => {
                debug!(protocol = ?other, "dropping non-igmp, non-control datagram");
            }
        }
    }

    fn dispatch_control(&self, datagram: &[u8]) {
        let msg = match IgmpControl::parse(datagram) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed upcall");
                return;
            }
        };

        match msg.msgtype {
            ControlMsgType::NoCache => match self.mfc.handle_nocache(&msg) {
                Ok(true) => debug!(iif = msg.iif(), group = %msg.im_dst, "installed mfc from nocache upcall"),
                Ok(false) => debug!(iif = msg.iif(), group = %msg.im_dst, "no dynamic template matched upcall"),
                Err(e) => warn!(error = %e, "failed installing mfc from upcall"),
            },
            ControlMsgType::WrongVif | ControlMsgType::WholePkt => {
                warn!(msgtype = ?msg.msgtype, "dropping unhandled upcall kind");
            }
            ControlMsgType::Other(kind) => {
                warn!(kind, "dropping unknown upcall kind");
            }
        }
    }

    fn dispatch_igmp(&self, header: &IpHeader, datagram: &[u8]) {
        let offset = header.payload_offset();
        if datagram.len() < offset {
            warn!("igmp datagram shorter than its own ip header claims");
            return;
        }
        match crate::wire::igmp::parse(&datagram[offset..]) {
            Ok(msg) => debug!(?msg, "observed igmp message"),
            Err(e) => warn!(error = %e, "dropping malformed igmp payload"),
        }
    }
}
