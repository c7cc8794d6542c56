//! One in-flight frame at a time, explicit ACK of that exact sequence.

use std::collections::BTreeMap;

use super::{teardown, Transport};
use crate::config::TIMEOUT;
use crate::connection::Connection;
use crate::error::Error;
use crate::frame::{flags, Frame};

/// Drives the sending side of a stop-and-wait transfer to completion.
pub fn run_sender(
    transport: &impl Transport,
    conn: &mut Connection,
    mut pending: BTreeMap<u32, Vec<u8>>,
) -> Result<(), Error> {
    while let Some((&seq, data)) = pending.iter().next().map(|(k, v)| (*k, v.clone())) {
        transport.send(&Frame::new(flags::DATA, seq, 0, data))?;
        log::debug!("{}: sent DATA seq={}", conn.addr, seq);

        match transport.recv(TIMEOUT)? {
            Some(f) if f.has(flags::ACK) && f.sequence == seq => {
                pending.remove(&seq);
                conn.cumulative = seq;
                conn.reset_retries();
            }
            Some(f) if f.has(flags::CLOSE) => {
                let reason = reason_of(&f);
                let err = teardown::close_error(conn.addr, reason.clone());
                teardown::respond_to_close(transport, conn, reason);
                return Err(err);
            }
            Some(_) => {
                // ACK for something else (stale duplicate); keep waiting on this seq.
            }
            None => {
                if conn.bump_retries() > crate::config::MAX_RETRIES {
                    log::warn!("{}: retries exhausted on seq={}", conn.addr, seq);
                    conn.active = false;
                    return Err(Error::RetriesExhausted(conn.addr, conn.retries));
                }
            }
        }
    }

    teardown::finish_as_sender(transport, conn)
}

/// Drives the receiving side of a stop-and-wait transfer to completion,
/// returning the reassembled fragments on success.
pub fn run_receiver(
    transport: &impl Transport,
    conn: &mut Connection,
) -> Result<BTreeMap<u32, Vec<u8>>, Error> {
    loop {
        match transport.recv(TIMEOUT)? {
            Some(f) if f.has(flags::DATA) => {
                conn.reset_retries();
                let seq = f.sequence;
                if !conn.fragments.contains_key(&seq) {
                    conn.fragments.insert(seq, f.payload);
                    log::info!("{}: received DATA seq={}", conn.addr, seq);
                }
                conn.cumulative = seq;
                transport.send(&Frame::new(flags::ACK, seq, 0, Vec::new()))?;
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
                if conn.bump_retries() > crate::config::MAX_RETRIES {
                    log::warn!("{}: receiver idle, giving up", conn.addr);
                    conn.active = false;
                    return Err(Error::RetriesExhausted(conn.addr, conn.retries));
                }
                transport.send(&Frame::new(flags::ACK, conn.cumulative, 0, Vec::new()))?;
            }
        }
    }
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

    /// An in-memory transport pair for exercising the engines without a real
    /// socket: one side's outbox is the other side's inbox.
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

    #[test]
    fn sender_emits_data_in_order_and_finishes() {
        let sender_in = RefCell::new(VecDeque::new());
        let sender_out = RefCell::new(VecDeque::new());
        let transport = PairedTransport {
            outbox: sender_out,
            inbox: sender_in,
        };

        // Pre-seed the expected ACK stream: ACK(1), ACK(2), END|ACK, CLOSE.
        transport.inbox.borrow_mut().push_back(Frame::new(flags::ACK, 1, 0, vec![]));
        transport.inbox.borrow_mut().push_back(Frame::new(flags::ACK, 2, 0, vec![]));
        transport
            .inbox
            .borrow_mut()
            .push_back(Frame::new(flags::END | flags::ACK, 0, 0, vec![]));
        transport.inbox.borrow_mut().push_back(Frame::new(flags::CLOSE, 0, 0, vec![]));

        let mut conn = Connection::new(
            "127.0.0.1:0".parse().unwrap(),
            crate::connection::Role::Upload,
            crate::connection::Protocol::StopAndWait,
        );

        let mut pending = BTreeMap::new();
        pending.insert(1, b"A".to_vec());
        pending.insert(2, b"B".to_vec());

        run_sender(&transport, &mut conn, pending).unwrap();

        let sent: Vec<Frame> = transport.outbox.into_inner().into_iter().collect();
        assert!(sent[0].has(flags::DATA) && sent[0].sequence == 1);
        assert!(sent[1].has(flags::DATA) && sent[1].sequence == 2);
        assert!(!conn.active);
    }

    #[test]
    fn receiver_reassembles_and_deduplicates() {
        let inbox = RefCell::new(VecDeque::new());
        let transport = PairedTransport {
            outbox: RefCell::new(VecDeque::new()),
            inbox,
        };

        transport.inbox.borrow_mut().push_back(Frame::new(flags::DATA, 1, 0, b"A".to_vec()));
        transport.inbox.borrow_mut().push_back(Frame::new(flags::DATA, 1, 0, b"A".to_vec())); // duplicate
        transport.inbox.borrow_mut().push_back(Frame::new(flags::DATA, 2, 0, b"B".to_vec()));
        transport.inbox.borrow_mut().push_back(Frame::new(flags::END, 0, 0, vec![]));
        transport.inbox.borrow_mut().push_back(Frame::new(flags::CLOSE, 0, 0, vec![]));

        let mut conn = Connection::new(
            "127.0.0.1:0".parse().unwrap(),
            crate::connection::Role::Download,
            crate::connection::Protocol::StopAndWait,
        );

        let fragments = run_receiver(&transport, &mut conn).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[&1], b"A".to_vec());
        assert_eq!(fragments[&2], b"B".to_vec());
    }
}
