//! # Bus Errors

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors from the bus and its wire protocol.
#[derive(Debug, Error)]
pub enum BusError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// bincode could not encode or decode a value.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A frame announced more bytes than allowed.
    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Frame payload does not match its checksum.
    #[error("Frame checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Event kind and payload disagree.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// The peer answered with an error.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The peer closed the connection.
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Request did not arrive in time.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Dialing the master failed after every permitted attempt.
    #[error("Could not reach {addr} after {attempts} attempts: {source}")]
    Unreachable {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Snapshot pull exhausted its attempts.
    #[error("Snapshot unavailable after {attempts} attempts: {last}")]
    SnapshotUnavailable { attempts: u32, last: String },

    /// Slave role requested without a master address.
    #[error("Slave role requires a master bus address")]
    NoMasterAddress,

    /// Operation needs a network side that is not running.
    #[error("Network bus is not running as {0}")]
    WrongRole(&'static str),

    /// The bus component was shut down.
    #[error("Bus is shut down")]
    Closed,
}

impl From<bincode::Error> for BusError {
    fn from(e: bincode::Error) -> Self {
        BusError::Codec(e.to_string())
    }
}

/// Outcome of one subscription stream attempt.
///
/// The supervising loop retries on [`SubscribeError::Transient`] and exits
/// on [`SubscribeError::ShutdownRequested`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("Transient subscription failure: {0}")]
    Transient(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl From<BusError> for SubscribeError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::Closed => SubscribeError::ShutdownRequested,
            other => SubscribeError::Transient(other.to_string()),
        }
    }
}

/// I/O error kinds worth another dial attempt.
pub(crate) fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::AddrNotAvailable
    )
}
