//! Reliability engines: stop-and-wait and SACK-windowed, sharing one transport
//! abstraction so the same engine code drives both the client (direct socket)
//! and a server worker (socket for sends, channel inbox for receives).

pub mod sack;
pub mod stop_and_wait;
pub mod teardown;

use std::time::Duration;

use crate::error::Error;
use crate::frame::Frame;

/// What an engine needs from its I/O boundary. The client implements this
/// directly over a `UdpSocket`; a server worker implements it over a shared
/// send socket and a per-session inbox channel fed by the dispatcher.
pub trait Transport {
    fn send(&self, frame: &Frame) -> Result<(), Error>;

    /// Blocks for at most `timeout`. `Ok(None)` means the timeout elapsed.
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>, Error>;

    /// Non-blocking drain of one already-pending frame, if any.
    fn try_recv(&self) -> Option<Frame>;
}
