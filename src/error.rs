use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too short or malformed")]
    Decode,

    #[error("handshake rejected by {0}: {1}")]
    HandshakeRejected(SocketAddr, String),

    #[error("connection to {0} timed out after {1} retries")]
    RetriesExhausted(SocketAddr, u32),

    #[error("connection reset by peer {0}")]
    ConnectionReset(SocketAddr),

    #[error("remote refused the request: {0}")]
    RemoteRefused(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("session for {0} already exists")]
    DuplicateSession(SocketAddr),

    #[error("no active session for {0}")]
    UnknownSession(SocketAddr),
}

/// The user-visible failure surface the CLI binaries map exit codes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ConnectionLost,
    RemoteRefused,
    LocalError,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::ConnectionLost => 1,
            Outcome::RemoteRefused => 2,
            Outcome::LocalError => 3,
        }
    }
}

impl From<&Error> for Outcome {
    fn from(err: &Error) -> Self {
        match err {
            Error::RemoteRefused(_) | Error::HandshakeRejected(_, _) => Outcome::RemoteRefused,
            Error::RetriesExhausted(_, _) | Error::ConnectionReset(_) => Outcome::ConnectionLost,
            Error::FileNotFound(_) | Error::UnsupportedProtocol(_) | Error::Io(_) => {
                Outcome::LocalError
            }
            Error::Decode | Error::DuplicateSession(_) | Error::UnknownSession(_) => {
                Outcome::LocalError
            }
        }
    }
}
