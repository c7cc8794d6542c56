//! Client driver: handshake, then either sender or receiver side of the
//! chosen reliability engine, then teardown. One session per process, one
//! cooperative task, no threads beyond what `ctrlc` installs for us.

use std::net::{SocketAddr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use crate::connection::{ConnState, Connection, Protocol, Role};
use crate::engine::{sack, stop_and_wait, Transport};
use crate::error::{Error, Outcome};
use crate::frame::{flags, Frame};
use crate::handshake;
use crate::io;
use crate::storage::{write_fragments, FragmentReader};

/// `Transport` impl over a directly-owned, UDP-connected socket.
struct ClientTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl Transport for ClientTransport {
    fn send(&self, frame: &Frame) -> Result<(), Error> {
        io::send_frame(&self.socket, self.peer, frame)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Frame>, Error> {
        io::set_timeout(&self.socket, timeout)?;
        match io::recv_frame(&self.socket)? {
            io::Received::Frame(_, frame) => Ok(Some(frame)),
            io::Received::TimedOut => Ok(None),
        }
    }

    fn try_recv(&self) -> Option<Frame> {
        if !io::is_readable(&self.socket) {
            return None;
        }
        io::set_timeout(&self.socket, Duration::from_millis(1)).ok()?;
        match io::recv_frame(&self.socket).ok()? {
            io::Received::Frame(_, frame) => Some(frame),
            io::Received::TimedOut => None,
        }
    }
}

/// Performs the three-way handshake as the initiator, driving `conn.state`
/// through `SynSent -> SynAcked -> Established`. Returns the connected
/// transport once the handshake succeeds.
fn handshake(
    socket: UdpSocket,
    conn: &mut Connection,
    remote_name: &str,
    download: bool,
    protocol: Protocol,
) -> Result<ClientTransport, Error> {
    let peer = conn.addr;
    let transport = ClientTransport { socket, peer };

    let start = handshake::build_start(remote_name, download, protocol);
    conn.state = ConnState::SynSent;
    transport.send(&start)?;

    let reply = transport
        .recv(protocol.timeout())?
        .ok_or_else(|| Error::HandshakeRejected(peer, "no response to START".to_string()))?;

    if reply.has(flags::CLOSE) {
        let reason = String::from_utf8(reply.payload).unwrap_or_default();
        return Err(Error::RemoteRefused(reason));
    }

    if !handshake::is_start_ack(&reply) {
        return Err(Error::HandshakeRejected(
            peer,
            "expected START|ACK".to_string(),
        ));
    }
    conn.state = ConnState::SynAcked;

    // The initiator SHOULD emit the closing handshake frame twice to cover loss.
    let ack = handshake::build_start_ack();
    transport.send(&ack)?;
    transport.send(&ack)?;

    conn.state = ConnState::Established;
    log::info!("{peer}: handshake established ({protocol:?})");
    Ok(transport)
}

pub fn run_upload(
    host: &str,
    port: u16,
    src_path: &Path,
    remote_name: &str,
    protocol: Protocol,
) -> Outcome {
    match try_upload(host, port, src_path, remote_name, protocol) {
        Ok(()) => Outcome::Success,
        Err(e) => {
            log::error!("upload failed: {e}");
            Outcome::from(&e)
        }
    }
}

fn parse_peer(host: &str, port: u16) -> Result<SocketAddr, Error> {
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "unresolvable host")))
}

fn try_upload(
    host: &str,
    port: u16,
    src_path: &Path,
    remote_name: &str,
    protocol: Protocol,
) -> Result<(), Error> {
    let mut reader = FragmentReader::open(src_path)?;
    let fragments = reader.read_all()?;
    log::info!("{} fragments ready to send", fragments.len());

    let peer = parse_peer(host, port)?;
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let mut conn = Connection::new(peer, Role::Upload, protocol);
    let transport = handshake(socket, &mut conn, remote_name, false, protocol)?;

    match protocol {
        Protocol::StopAndWait => stop_and_wait::run_sender(&transport, &mut conn, fragments),
        Protocol::Sack => sack::run_sender(&transport, &mut conn, fragments),
    }
}

pub fn run_download(
    host: &str,
    port: u16,
    dst_dir: &Path,
    remote_name: &str,
    protocol: Protocol,
) -> Outcome {
    match try_download(host, port, dst_dir, remote_name, protocol) {
        Ok(()) => Outcome::Success,
        Err(e) => {
            log::error!("download failed: {e}");
            Outcome::from(&e)
        }
    }
}

fn try_download(
    host: &str,
    port: u16,
    dst_dir: &Path,
    remote_name: &str,
    protocol: Protocol,
) -> Result<(), Error> {
    let peer = parse_peer(host, port)?;
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let mut conn = Connection::new(peer, Role::Download, protocol);
    let transport = handshake(socket, &mut conn, remote_name, true, protocol)?;

    let fragments = match protocol {
        Protocol::StopAndWait => stop_and_wait::run_receiver(&transport, &mut conn)?,
        Protocol::Sack => sack::run_receiver(&transport, &mut conn)?,
    };

    let dst_path = dst_dir.join(remote_name);
    write_fragments(&dst_path, &fragments)?;
    log::info!("wrote {} to {}", remote_name, dst_path.display());
    Ok(())
}
