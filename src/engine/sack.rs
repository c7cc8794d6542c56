//! Sliding window with selective acknowledgement: up to `SEND_WINDOW_SIZE`
//! payloads in flight, up to `SACK_WINDOW_SIZE` out-of-order fragments
//! advertised per ACK.

use std::collections::BTreeMap;
use std::thread;

use super::{teardown, Transport};
use crate::config::{MAX_RETRIES, PACKAGE_SEND_DELAY, SEND_WINDOW_SIZE, TIMEOUT_SACK};
use crate::connection::Connection;
use crate::error::Error;
use crate::frame::{self, flags, Frame};

/// Drives the sending side of a SACK transfer to completion.
pub fn run_sender(
    transport: &impl Transport,
    conn: &mut Connection,
    mut pending: BTreeMap<u32, Vec<u8>>,
) -> Result<(), Error> {
    conn.in_flight = 0;

    while !pending.is_empty() {
        emit(transport, conn, &pending)?;

        match transport.recv(TIMEOUT_SACK)? {
            Some(f) if f.has(flags::CLOSE) => {
                let reason = reason_of(&f);
                let err = teardown::close_error(conn.addr, reason.clone());
                teardown::respond_to_close(transport, conn, reason);
                return Err(err);
            }
            Some(f) if f.has(flags::ACK) => {
                apply_ack(&f, conn, &mut pending);
                while let Some(f2) = transport.try_recv() {
                    if f2.has(flags::CLOSE) {
                        let reason = reason_of(&f2);
                        let err = teardown::close_error(conn.addr, reason.clone());
                        teardown::respond_to_close(transport, conn, reason);
                        return Err(err);
                    }
                    if f2.has(flags::ACK) {
                        apply_ack(&f2, conn, &mut pending);
                    }
                }
            }
            Some(_) => {}
            None => {
                // Timeout: credit back half the in-flight slots and let the
                // next emit phase re-send from the front of the map.
                conn.in_flight /= 2;
                if conn.bump_retries() > MAX_RETRIES {
                    log::warn!("{}: SACK sender retries exhausted", conn.addr);
                    conn.active = false;
                    return Err(Error::RetriesExhausted(conn.addr, conn.retries));
                }
            }
        }

        thread::sleep(PACKAGE_SEND_DELAY);
    }

    teardown::finish_as_sender(transport, conn)
}

fn emit(
    transport: &impl Transport,
    conn: &mut Connection,
    pending: &BTreeMap<u32, Vec<u8>>,
) -> Result<(), Error> {
    for (&seq, data) in pending.iter() {
        if conn.in_flight >= SEND_WINDOW_SIZE {
            break;
        }
        if !frame::within_send_horizon(conn.cumulative, seq) {
            break;
        }
        transport.send(&Frame::new(flags::DATA, seq, 0, data.clone()))?;
        conn.in_flight += 1;
        log::debug!("{}: sent DATA seq={} in_flight={}", conn.addr, seq, conn.in_flight);
    }
    Ok(())
}

fn apply_ack(frame: &Frame, conn: &mut Connection, pending: &mut BTreeMap<u32, Vec<u8>>) {
    conn.reset_retries();

    if frame.sequence > conn.cumulative {
        let advance = frame.sequence - conn.cumulative;
        conn.in_flight = conn.in_flight.saturating_sub(advance as usize);
        conn.cumulative = frame.sequence;
        pending.retain(|&seq, _| seq > conn.cumulative);
    } else {
        let acked = frame::list_from_bits(conn.cumulative, frame.sack_bitmap);
        for seq in acked {
            if pending.remove(&seq).is_some() {
                conn.in_flight = conn.in_flight.saturating_sub(1);
            }
        }
    }
}

/// Drives the receiving side of a SACK transfer to completion, returning the
/// reassembled fragments (including any trailing gaps left by unrecovered
/// loss).
pub fn run_receiver(
    transport: &impl Transport,
    conn: &mut Connection,
) -> Result<BTreeMap<u32, Vec<u8>>, Error> {
    loop {
        match transport.recv(TIMEOUT_SACK)? {
            Some(f) if f.has(flags::DATA) => {
                conn.reset_retries();
                handle_data(transport, conn, f.sequence, f.payload)?;
            }
            Some(f) if f.has(flags::END) => {
                teardown::finish_as_receiver(transport, conn)?;
                return Ok(std::mem::take(&mut conn.fragments));
            }
            Some(f) if f.has(flags::CLOSE) => {
                let reason = reason_of(&f);
                let err = teardown::close_error(conn.addr, reason.clone());
                teardown::respond_to_close(transport, conn, reason);
                return Err(err);
            }
            Some(_) => {}
            None => {
                if conn.bump_retries() > MAX_RETRIES {
                    log::warn!("{}: SACK receiver idle, giving up", conn.addr);
                    conn.active = false;
                    return Err(Error::RetriesExhausted(conn.addr, conn.retries));
                }
                send_ack(transport, conn)?;
            }
        }
    }
}

fn handle_data(
    transport: &impl Transport,
    conn: &mut Connection,
    seq: u32,
    payload: Vec<u8>,
) -> Result<(), Error> {
    if seq <= conn.cumulative {
        return send_ack(transport, conn);
    }

    if !conn.fragments.contains_key(&seq) {
        conn.fragments.insert(seq, payload);
        log::info!("{}: buffered DATA seq={}", conn.addr, seq);
    }

    if seq == conn.cumulative + 1 {
        conn.advance_cumulative(seq);
    } else {
        conn.insert_out_of_order(seq);
    }

    send_ack(transport, conn)
}

fn send_ack(transport: &impl Transport, conn: &Connection) -> Result<(), Error> {
    let bitmap = frame::set_bits_from_list(conn.cumulative, &conn.out_of_order);
    transport.send(&Frame::new(
        flags::ACK | flags::SACK,
        conn.cumulative,
        bitmap,
        Vec::new(),
    ))
}

fn reason_of(frame: &Frame) -> Option<String> {
    if frame.payload.is_empty() {
        None
    } else {
        String::from_utf8(frame.payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct PairedTransport {
        outbox: RefCell<VecDeque<Frame>>,
        inbox: RefCell<VecDeque<Frame>>,
    }

    impl Transport for PairedTransport {
        fn send(&self, frame: &Frame) -> Result<(), Error> {
            self.outbox.borrow_mut().push_back(frame.clone());
            Ok(())
        }

        fn recv(&self, _timeout: Duration) -> Result<Option<Frame>, Error> {
            Ok(self.inbox.borrow_mut().pop_front())
        }

        fn try_recv(&self) -> Option<Frame> {
            self.inbox.borrow_mut().pop_front()
        }
    }

    fn receiver_conn() -> Connection {
        Connection::new(
            "127.0.0.1:0".parse().unwrap(),
            crate::connection::Role::Download,
            crate::connection::Protocol::Sack,
        )
    }

    #[test]
    fn receiver_reorders_out_of_order_fragments() {
        // DATA arrives out of order: 1, 3, 2, 5, 4.
        let transport = PairedTransport {
            outbox: RefCell::new(VecDeque::new()),
            inbox: RefCell::new(VecDeque::new()),
        };
        for (seq, byte) in [(1u32, b'A'), (3, b'C'), (2, b'B'), (5, b'E'), (4, b'D')] {
            transport
                .inbox
                .borrow_mut()
                .push_back(Frame::new(flags::DATA, seq, 0, vec![byte]));
        }
        transport.inbox.borrow_mut().push_back(Frame::new(flags::END, 0, 0, vec![]));
        transport.inbox.borrow_mut().push_back(Frame::new(flags::CLOSE, 0, 0, vec![]));

        let mut conn = receiver_conn();
        let fragments = run_receiver(&transport, &mut conn).unwrap();

        assert_eq!(fragments.len(), 5);
        let assembled: Vec<u8> = fragments.values().flatten().copied().collect();
        assert_eq!(assembled, b"ABCDE");
    }

    #[test]
    fn receiver_ack_progression_tracks_reordered_arrivals() {
        let transport = PairedTransport {
            outbox: RefCell::new(VecDeque::new()),
            inbox: RefCell::new(VecDeque::new()),
        };
        for (seq, byte) in [(1u32, b'A'), (3, b'C'), (2, b'B'), (5, b'E'), (4, b'D')] {
            transport
                .inbox
                .borrow_mut()
                .push_back(Frame::new(flags::DATA, seq, 0, vec![byte]));
        }
        transport.inbox.borrow_mut().push_back(Frame::new(flags::END, 0, 0, vec![]));
        transport.inbox.borrow_mut().push_back(Frame::new(flags::CLOSE, 0, 0, vec![]));

        let mut conn = receiver_conn();
        run_receiver(&transport, &mut conn).unwrap();

        let outbox = transport.outbox.into_inner();
        let data_acks: Vec<(u32, Vec<u32>)> = outbox
            .iter()
            .filter(|f| f.has(flags::ACK) && f.has(flags::SACK))
            .map(|f| (f.sequence, frame::list_from_bits(f.sequence, f.sack_bitmap)))
            .collect();

        assert_eq!(
            data_acks,
            vec![
                (1, vec![]),
                (1, vec![3]),
                (3, vec![]),
                (3, vec![5]),
                (5, vec![]),
            ]
        );
    }

    #[test]
    fn sender_applies_cumulative_and_bitmap_acks() {
        // First ACK reports cumulative stuck at 3 with a bitmap of
        // buffered-but-gapped fragments; the next ACK closes the gap to 10.
        let transport = PairedTransport {
            outbox: RefCell::new(VecDeque::new()),
            inbox: RefCell::new(VecDeque::new()),
        };

        // First round: server reports cumulative stuck at 3, bitmap {5,6,8,9,10}.
        let bitmap = frame::set_bits_from_list(3, &[5, 6, 8, 9, 10]);
        transport
            .inbox
            .borrow_mut()
            .push_back(Frame::new(flags::ACK | flags::SACK, 3, bitmap, vec![]));
        // Second round: cumulative jumps to 10 once 4 and 7 are retransmitted.
        transport
            .inbox
            .borrow_mut()
            .push_back(Frame::new(flags::ACK, 10, 0, vec![]));
        transport
            .inbox
            .borrow_mut()
            .push_back(Frame::new(flags::END | flags::ACK, 0, 0, vec![]));
        transport.inbox.borrow_mut().push_back(Frame::new(flags::CLOSE, 0, 0, vec![]));

        let mut conn = Connection::new(
            "127.0.0.1:0".parse().unwrap(),
            crate::connection::Role::Upload,
            crate::connection::Protocol::Sack,
        );

        let mut pending = BTreeMap::new();
        for seq in 1u32..=10 {
            pending.insert(seq, vec![seq as u8]);
        }

        run_sender(&transport, &mut conn, pending).unwrap();
        assert_eq!(conn.cumulative, 10);
        assert!(!conn.active);
    }
}
