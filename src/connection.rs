//! Per-session state record, identical in shape on client and server.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use std::time::Duration;

use crate::config::{TIMEOUT, TIMEOUT_SACK};
use crate::frame::flags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This end is sending the file.
    Upload,
    /// This end is receiving the file.
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    StopAndWait,
    Sack,
}

impl Protocol {
    pub fn from_flag(flags: u8) -> Self {
        if flags & flags::PROTOCOL != 0 {
            Protocol::Sack
        } else {
            Protocol::StopAndWait
        }
    }

    pub fn flag_bit(self) -> u8 {
        match self {
            Protocol::Sack => flags::PROTOCOL,
            Protocol::StopAndWait => 0,
        }
    }

    /// Read timeout the engine waits on before counting a retry.
    pub fn timeout(self) -> Duration {
        match self {
            Protocol::StopAndWait => TIMEOUT,
            Protocol::Sack => TIMEOUT_SACK,
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_and_wait" => Ok(Protocol::StopAndWait),
            "sack" => Ok(Protocol::Sack),
            other => Err(format!("unsupported protocol: {other}")),
        }
    }
}

/// Connection-level state machine, driven by handshake/data/teardown frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Closed,
    SynSent,
    SynAcked,
    SynReceived,
    Established,
    Ending,
}

/// The mutable record a reliability engine drives. Shared shape for sender and
/// receiver; which fields are meaningful depends on the role.
#[derive(Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    pub role: Role,
    pub protocol: Protocol,
    pub state: ConnState,
    /// Cumulative sequence: on the sender, the highest fully-acked sequence;
    /// on the receiver, the highest in-order delivered sequence.
    pub cumulative: u32,
    /// Sender: outgoing unsent/unacked payloads keyed by sequence.
    /// Receiver: reassembly buffer keyed by sequence.
    pub fragments: BTreeMap<u32, Vec<u8>>,
    /// Receiver only: sequences received out of order, strictly above `cumulative`.
    pub out_of_order: Vec<u32>,
    /// SACK sender only: count of payloads currently in flight.
    pub in_flight: usize,
    pub retries: u32,
    pub active: bool,
    pub reason: Option<String>,
}

impl Connection {
    pub fn new(addr: SocketAddr, role: Role, protocol: Protocol) -> Self {
        Connection {
            addr,
            role,
            protocol,
            state: ConnState::Closed,
            cumulative: 0,
            fragments: BTreeMap::new(),
            out_of_order: Vec::new(),
            in_flight: 0,
            retries: 0,
            active: true,
            reason: None,
        }
    }

    pub fn reset_retries(&mut self) {
        self.retries = 0;
    }

    pub fn bump_retries(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retries > crate::config::MAX_RETRIES
    }

    /// Inserts `seq` into the out-of-order set, keeping it sorted and bounded
    /// to `SACK_WINDOW_SIZE` entries (oldest gaps are the ones worth keeping,
    /// since they unblock the cumulative ack first).
    pub fn insert_out_of_order(&mut self, seq: u32) {
        if self.out_of_order.contains(&seq) {
            return;
        }
        self.out_of_order.push(seq);
        self.out_of_order.sort_unstable();
        self.out_of_order.truncate(crate::config::SACK_WINDOW_SIZE);
    }

    /// Advances `cumulative` past `seq`, then drains any contiguous run
    /// already buffered in `out_of_order`.
    pub fn advance_cumulative(&mut self, seq: u32) {
        if seq <= self.cumulative {
            return;
        }
        self.cumulative = seq;
        while let Some(&next) = self.out_of_order.first() {
            if next == self.cumulative + 1 {
                self.cumulative = next;
                self.out_of_order.remove(0);
            } else {
                break;
            }
        }
    }
}
