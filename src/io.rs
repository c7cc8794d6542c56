//! Thin wrappers around a single UDP socket: send one frame, receive one frame
//! (with its sender address), and a non-blocking readability poll.

use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};

use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::Error;
use crate::frame::Frame;

pub fn send_frame(socket: &UdpSocket, addr: SocketAddr, frame: &Frame) -> Result<(), Error> {
    socket.send_to(&frame.encode(), addr)?;
    Ok(())
}

/// Outcome of a single receive attempt.
pub enum Received {
    Frame(SocketAddr, Frame),
    TimedOut,
}

/// Blocks for at most the socket's configured read timeout. A malformed
/// datagram is dropped silently (logged at `trace`) and treated as a timeout
/// from the caller's point of view, since retrying is the correct response
/// either way.
pub fn recv_frame(socket: &UdpSocket) -> Result<Received, Error> {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    match socket.recv_from(&mut buf) {
        Ok((n, addr)) => match Frame::decode(&buf[..n]) {
            Ok(frame) => Ok(Received::Frame(addr, frame)),
            Err(_) => {
                log::trace!("dropping malformed datagram from {addr} ({n} bytes)");
                Ok(Received::TimedOut)
            }
        },
        Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
            Ok(Received::TimedOut)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Non-blocking check for pending data, used by the SACK engine to drain
/// buffered ACKs before emitting new data.
pub fn is_readable(socket: &UdpSocket) -> bool {
    let mut fds = [PollFd::new(socket.as_raw_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, 0) {
        Ok(n) => n > 0,
        Err(_) => false,
    }
}

pub fn set_timeout(socket: &UdpSocket, timeout: Duration) -> Result<(), Error> {
    socket.set_read_timeout(Some(timeout))?;
    Ok(())
}
