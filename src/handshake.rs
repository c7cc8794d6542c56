//! Shared handshake frame construction and validation. The three-way exchange
//! itself (retry loops, socket I/O) lives in `client` and `server`, since the
//! two sides suspend on different things.

use crate::connection::Protocol;
use crate::frame::{flags, Frame};

/// The initiator's first frame: START [| DOWNLOAD] [| PROTOCOL], payload is
/// the UTF-8 remote file name.
pub fn build_start(remote_name: &str, download: bool, protocol: Protocol) -> Frame {
    let mut bits = flags::START;
    if download {
        bits |= flags::DOWNLOAD;
    }
    bits |= protocol.flag_bit();
    Frame::new(bits, 0, 0, remote_name.as_bytes().to_vec())
}

/// The responder's reply, and the initiator's closing frame: both are a bare
/// START|ACK with sequence 0.
pub fn build_start_ack() -> Frame {
    Frame::new(flags::START | flags::ACK, 0, 0, Vec::new())
}

pub fn is_start_ack(frame: &Frame) -> bool {
    frame.has(flags::START) && frame.has(flags::ACK) && frame.sequence == 0
}

/// Validates an initial START frame: must carry START, sequence zero, and a
/// non-empty name.
pub fn parse_request(frame: &Frame) -> Result<(String, bool, Protocol), String> {
    if !frame.has(flags::START) {
        return Err("first frame did not carry START".to_string());
    }
    if frame.sequence != 0 {
        return Err("handshake sequence must be 0".to_string());
    }
    let name = String::from_utf8(frame.payload.clone())
        .map_err(|_| "remote name is not valid UTF-8".to_string())?;
    if name.is_empty() {
        return Err("remote name is empty".to_string());
    }

    let download = frame.has(flags::DOWNLOAD);
    let protocol = Protocol::from_flag(frame.flags);
    Ok((name, download, protocol))
}
