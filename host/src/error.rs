//! Host driver errors

use sigprobe::protocol::{Command, DecodeError, Status};
use thiserror::Error;

/// Errors raised by the host driver
#[derive(Debug, Error)]
pub enum Error {
    /// A USB transfer failed
    #[error("USB transfer failed: {0}")]
    Usb(#[from] rusb::Error),

    /// A command replied with the wrong number of bytes
    #[error("{command:?} replied with {actual} bytes, expected {expected}")]
    ReplySize {
        command: Command,
        expected: usize,
        actual: usize,
    },

    /// A reply couldn't be decoded
    #[error("malformed reply: {0}")]
    Decode(DecodeError),

    /// A command left the device in the wrong state
    #[error("{command:?} returned status {status:?}, expected {expected:?}")]
    UnexpectedStatus {
        command: Command,
        expected: Status,
        status: Status,
    },

    /// No matching device is attached
    #[error("no SigProbe device found")]
    NotFound,

    /// The device has no interface with a single bulk IN endpoint
    #[error("failed to find the SigProbe bulk interface")]
    InterfaceNotFound,

    /// The session isn't open
    #[error("session is not open")]
    NotOpen,

    /// A bulk read returned more than it asked for
    #[error("device returned {transferred} bytes, only {remaining} were expected")]
    Overrun { transferred: usize, remaining: usize },
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

/// Result type for host driver operations
pub type Result<T> = std::result::Result<T, Error>;

/// A pattern session delivered the wrong byte
///
/// Reported alongside the benchmark result, not raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("data integrity error at offset {offset}: expected {expected}, got {actual}")]
pub struct IntegrityError {
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}
