//! Server dispatcher: a single thread that owns the receive side of the
//! socket and a session table keyed by remote address; one worker thread per
//! active session runs its own reliability engine against a channel inbox.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::connection::{ConnState, Connection, Protocol, Role};
use crate::engine::{sack, stop_and_wait, Transport};
use crate::error::{Error, Outcome};
use crate::frame::{flags, Frame};
use crate::handshake;
use crate::io;
use crate::storage::{write_fragments, FragmentReader};

const DISPATCH_POLL: Duration = Duration::from_millis(200);

struct SessionHandle {
    inbox: Sender<Frame>,
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// `Transport` impl over a shared send socket and a per-session inbox fed by
/// the dispatcher. Checks the shutdown flag at every suspension point.
struct ServerTransport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: Receiver<Frame>,
    shutdown: Arc<AtomicBool>,
}

impl Transport for ServerTransport {
    fn send(&self, frame: &Frame) -> Result<(), Error> {
        io::send_frame(&self.socket, self.peer, frame)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Frame>, Error> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ConnectionReset(self.peer));
        }
        match self.inbox.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::ConnectionReset(self.peer)),
        }
    }

    fn try_recv(&self) -> Option<Frame> {
        self.inbox.try_recv().ok()
    }
}

/// Runs the server until a shutdown signal is observed. Binds the socket
/// itself so bind failures can be reported with a nonzero exit code.
pub fn run(host: &str, port: u16, storage_dir: &Path) -> Outcome {
    match try_run(host, port, storage_dir) {
        Ok(()) => Outcome::Success,
        Err(e) => {
            log::error!("server error: {e}");
            Outcome::from(&e)
        }
    }
}

fn try_run(host: &str, port: u16, storage_dir: &Path) -> Result<(), Error> {
    let socket = UdpSocket::bind((host, port))?;
    log::info!("listening on {host}:{port}, storage root {}", storage_dir.display());

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            running.store(false, Ordering::SeqCst);
        })
        .expect("failed to install signal handler");
    }

    serve(socket, storage_dir, running)
}

/// The dispatch loop proper, independent of process-wide signal wiring so it
/// can also be driven from tests: runs until `running` is cleared, then tears
/// down every outstanding session before returning.
pub fn serve(socket: UdpSocket, storage_dir: &Path, running: Arc<AtomicBool>) -> Result<(), Error> {
    socket.set_read_timeout(Some(DISPATCH_POLL))?;
    let socket = Arc::new(socket);

    let mut sessions: HashMap<SocketAddr, SessionHandle> = HashMap::new();
    let (done_tx, done_rx) = mpsc::channel::<SocketAddr>();

    while running.load(Ordering::Acquire) {
        reap_finished(&mut sessions, &done_rx);

        match io::recv_frame(&socket)? {
            io::Received::Frame(addr, frame) => {
                dispatch(&socket, storage_dir, &mut sessions, &done_tx, addr, frame)
            }
            io::Received::TimedOut => {}
        }
    }

    shutdown_all(&mut sessions);
    Ok(())
}

fn reap_finished(sessions: &mut HashMap<SocketAddr, SessionHandle>, done_rx: &Receiver<SocketAddr>) {
    while let Ok(addr) = done_rx.try_recv() {
        match sessions.remove(&addr) {
            Some(handle) => {
                let _ = handle.join.join();
                log::debug!("{addr}: session removed");
            }
            None => {
                log::debug!("{}", Error::UnknownSession(addr));
            }
        }
    }
}

fn dispatch(
    socket: &Arc<UdpSocket>,
    storage_dir: &Path,
    sessions: &mut HashMap<SocketAddr, SessionHandle>,
    done_tx: &Sender<SocketAddr>,
    addr: SocketAddr,
    frame: Frame,
) {
    if let Some(handle) = sessions.get(&addr) {
        // A fresh request (START without ACK) for an address that already has a
        // session is a stray retransmit or a second client reusing a source
        // port; the initiator's closing START|ACK still belongs in the inbox.
        if frame.has(flags::START) && !frame.has(flags::ACK) {
            let err = Error::DuplicateSession(addr);
            log::warn!("{addr}: {err}, ignoring duplicate request for an active session");
            return;
        }
        let _ = handle.inbox.send(frame);
        return;
    }

    if !frame.has(flags::START) {
        log::warn!("{addr}: rejecting non-START first frame");
        reject(socket, addr, "connection not established".to_string());
        return;
    }

    match handshake::parse_request(&frame) {
        Ok((name, download, protocol)) => {
            log::info!("{addr}: new session name={name} download={download} protocol={protocol:?}");
            let shutdown = Arc::new(AtomicBool::new(false));
            let (tx, rx) = mpsc::channel::<Frame>();

            let join = spawn_worker(
                socket.clone(),
                addr,
                rx,
                shutdown.clone(),
                storage_dir.to_path_buf(),
                name,
                download,
                protocol,
                done_tx.clone(),
            );

            sessions.insert(
                addr,
                SessionHandle {
                    inbox: tx,
                    shutdown,
                    join,
                },
            );

            let _ = io::send_frame(socket, addr, &handshake::build_start_ack());
        }
        Err(reason) => {
            log::warn!("{addr}: handshake rejected: {reason}");
            reject(socket, addr, reason);
        }
    }
}

fn reject(socket: &Arc<UdpSocket>, addr: SocketAddr, reason: String) {
    let frame = Frame::new(flags::CLOSE, 0, 0, reason.into_bytes());
    let _ = io::send_frame(socket, addr, &frame);
}

fn shutdown_all(sessions: &mut HashMap<SocketAddr, SessionHandle>) {
    for (addr, handle) in sessions.drain() {
        handle.shutdown.store(true, Ordering::SeqCst);
        log::debug!("{addr}: waiting for worker to exit");
        let _ = handle.join.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    inbox: Receiver<Frame>,
    shutdown: Arc<AtomicBool>,
    storage_dir: PathBuf,
    name: String,
    download: bool,
    protocol: Protocol,
    done_tx: Sender<SocketAddr>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let transport = ServerTransport {
            socket,
            peer: addr,
            inbox,
            shutdown,
        };

        // Server is the sender (Role::Upload) when the client asked to download,
        // the receiver (Role::Download) when the client asked to upload.
        let role = if download { Role::Upload } else { Role::Download };
        let mut conn = Connection::new(addr, role, protocol);

        if let Err(e) = complete_handshake(&transport, &mut conn) {
            log::warn!("{addr}: handshake did not complete: {e}");
            let _ = done_tx.send(addr);
            return;
        }

        let result = run_session(&transport, &mut conn, &storage_dir, &name, download);
        if let Err(e) = result {
            log::warn!("{addr}: session ended: {e}");
            let _ = transport.send(&Frame::new(flags::CLOSE, 0, 0, Vec::new()));
        }

        let _ = done_tx.send(addr);
    })
}

/// Waits for the initiator's closing START|ACK, driving `conn.state` through
/// `SynReceived -> Established`. The initiator sends it twice; the duplicate
/// is simply ignored.
fn complete_handshake(transport: &ServerTransport, conn: &mut Connection) -> Result<(), Error> {
    conn.state = ConnState::SynReceived;
    for _ in 0..=crate::config::MAX_RETRIES {
        match transport.recv(conn.protocol.timeout())? {
            Some(f) if handshake::is_start_ack(&f) => {
                conn.state = ConnState::Established;
                return Ok(());
            }
            Some(_) => continue,
            None => continue,
        }
    }
    Err(Error::RetriesExhausted(transport.peer, crate::config::MAX_RETRIES))
}

fn run_session(
    transport: &ServerTransport,
    conn: &mut Connection,
    storage_dir: &Path,
    name: &str,
    download: bool,
) -> Result<(), Error> {
    let target = crate::storage::resolve_under_root(storage_dir, name)?;

    if download {
        // Client wants to pull a file from us: we are the sender.
        let mut reader = match FragmentReader::open(&target) {
            Ok(r) => r,
            Err(Error::FileNotFound(_)) => {
                let reason = "Archivo no encontrado.".to_string();
                let _ = transport.send(&Frame::new(flags::CLOSE, 0, 0, reason.clone().into_bytes()));
                return Err(Error::FileNotFound(reason));
            }
            Err(e) => return Err(e),
        };
        let fragments = reader.read_all()?;

        match conn.protocol {
            Protocol::StopAndWait => stop_and_wait::run_sender(transport, conn, fragments),
            Protocol::Sack => sack::run_sender(transport, conn, fragments),
        }
    } else {
        // Client is pushing a file to us: we are the receiver.
        let fragments = match conn.protocol {
            Protocol::StopAndWait => stop_and_wait::run_receiver(transport, conn)?,
            Protocol::Sack => sack::run_receiver(transport, conn)?,
        };

        write_fragments(&target, &fragments)?;
        log::info!(
            "{}: stored {} ({} fragments)",
            conn.addr,
            target.display(),
            fragments.len()
        );
        Ok(())
    }
}
