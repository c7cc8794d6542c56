//! Shared END/CLOSE exchange. Both sides retry up to 3 times; the retry
//! budget exhausting is not an error here, since termination must be
//! unconditional to avoid deadlocks.

use std::net::SocketAddr;

use super::Transport;
use crate::config::TIMEOUT;
use crate::connection::{ConnState, Connection};
use crate::error::Error;
use crate::frame::{flags, Frame};

const TEARDOWN_RETRIES: u32 = 3;

/// Called by the side that has finished sending all of its data. Sends END,
/// waits for END|ACK, then initiates CLOSE.
pub fn finish_as_sender(transport: &impl Transport, conn: &mut Connection) -> Result<(), Error> {
    log::debug!("{}: data phase complete, sending END", conn.addr);
    conn.state = ConnState::Ending;

    for _ in 0..TEARDOWN_RETRIES {
        transport.send(&Frame::new(flags::END, conn.cumulative, 0, Vec::new()))?;
        match transport.recv(TIMEOUT)? {
            Some(f) if f.has(flags::END) && f.has(flags::ACK) => {
                log::debug!("{}: received END|ACK", conn.addr);
                break;
            }
            Some(f) if f.has(flags::CLOSE) => {
                conn.active = false;
                conn.state = ConnState::Closed;
                return Ok(());
            }
            _ => continue,
        }
    }

    close_initiate(transport, conn, None)
}

/// Called by the side that just received END: flushes have already happened
/// by the caller, this only handles the END|ACK + CLOSE exchange.
pub fn finish_as_receiver(transport: &impl Transport, conn: &mut Connection) -> Result<(), Error> {
    log::debug!("{}: received END, replying END|ACK", conn.addr);
    conn.state = ConnState::Ending;
    transport.send(&Frame::new(flags::END | flags::ACK, conn.cumulative, 0, Vec::new()))?;

    for _ in 0..TEARDOWN_RETRIES {
        match transport.recv(TIMEOUT)? {
            Some(f) if f.has(flags::CLOSE) => {
                transport.send(&Frame::new(flags::CLOSE, 0, 0, Vec::new()))?;
                conn.active = false;
                conn.state = ConnState::Closed;
                return Ok(());
            }
            Some(f) if f.has(flags::END) && f.has(flags::ACK) => continue,
            _ => continue,
        }
    }

    conn.active = false;
    conn.state = ConnState::Closed;
    Ok(())
}

/// Initiates CLOSE, optionally carrying a UTF-8 reason, retrying up to
/// `TEARDOWN_RETRIES` times for an echoed CLOSE. Unconditionally terminates
/// the connection once the budget is exhausted.
pub fn close_initiate(
    transport: &impl Transport,
    conn: &mut Connection,
    reason: Option<String>,
) -> Result<(), Error> {
    let payload = reason.clone().unwrap_or_default().into_bytes();
    conn.reason = reason;
    conn.state = ConnState::Ending;

    for _ in 0..TEARDOWN_RETRIES {
        transport.send(&Frame::new(flags::CLOSE, 0, 0, payload.clone()))?;
        match transport.recv(TIMEOUT)? {
            Some(f) if f.has(flags::CLOSE) => break,
            _ => continue,
        }
    }

    conn.active = false;
    conn.state = ConnState::Closed;
    Ok(())
}

/// Replies to a peer-initiated CLOSE and terminates immediately.
pub fn respond_to_close(transport: &impl Transport, conn: &mut Connection, reason: Option<String>) {
    conn.reason = reason;
    let _ = transport.send(&Frame::new(flags::CLOSE, 0, 0, Vec::new()));
    conn.active = false;
    conn.state = ConnState::Closed;
}

/// Classifies a peer-initiated CLOSE: a carried reason means the remote
/// refused the request (e.g. file not found); a bare CLOSE means the
/// connection was reset with no explanation.
pub fn close_error(addr: SocketAddr, reason: Option<String>) -> Error {
    match reason {
        Some(reason) => Error::RemoteRefused(reason),
        None => Error::ConnectionReset(addr),
    }
}
