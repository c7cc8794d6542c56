//! Protocol tuning knobs. Parameters, not magic constants in the hot path.

use std::time::Duration;

/// Maximum payload carried by a single frame.
pub const FRAGMENT_SIZE: usize = 8192;

/// Size of the fixed frame header: flags(1) + sequence(4) + sack_bitmap(4).
pub const HEADER_SIZE: usize = 9;

/// Largest datagram this crate will ever send or accept.
pub const MAX_DATAGRAM_SIZE: usize = HEADER_SIZE + FRAGMENT_SIZE;

/// Consecutive timeouts tolerated before a connection is declared lost.
pub const MAX_RETRIES: u32 = 3;

/// Stop-and-wait read timeout.
pub const TIMEOUT: Duration = Duration::from_millis(200);

/// SACK read timeout. Slightly longer to tolerate in-flight bursts.
pub const TIMEOUT_SACK: Duration = Duration::from_millis(300);

/// Maximum number of unacknowledged fragments the SACK sender keeps in flight.
pub const SEND_WINDOW_SIZE: usize = 16;

/// Maximum number of out-of-order fragments advertised in a single SACK bitmap.
pub const SACK_WINDOW_SIZE: usize = 8;

/// Cap on how far ahead of the cumulative ACK the SACK sender will emit data.
/// Kept <= 31 so every representable gap still fits the 32-bit bitmap.
pub const MAX_SAC_DIF: u32 = 30;

/// Pacing delay between SACK emit cycles, to avoid self-induced loss at the receiver.
pub const PACKAGE_SEND_DELAY: Duration = Duration::from_millis(5);
