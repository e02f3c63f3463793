//! Control command vocabulary and wire records
//!
//! Commands travel as class requests on the control endpoint, addressed
//! to the sampler interface. IN commands reply with a one-byte [`Status`]
//! or a [`SessionConfiguration`] record. The only OUT command,
//! [`Command::ConfigureSession`], carries a record.
//!
//! A record is always nine bytes: the kind tag, then the sample count and
//! the remaining byte count as little-endian `u32`s.
//!
//! ```
//! use sigprobe::protocol::{SessionConfiguration, SessionKind};
//!
//! let config = SessionConfiguration::request(SessionKind::HardwareCapture, 1000);
//! let bytes = config.to_bytes();
//! assert_eq!(bytes, [0x01, 0xE8, 0x03, 0, 0, 0, 0, 0, 0]);
//! assert_eq!(SessionConfiguration::from_bytes(&bytes), Ok(config));
//! ```

/// pid.codes test vendor ID
pub const VENDOR_ID: u16 = 0x1209;
/// Product ID
pub const PRODUCT_ID: u16 = 0x7366;

/// Vendor specific interface class
pub const INTERFACE_CLASS: u8 = 0xFF;
pub const INTERFACE_SUBCLASS: u8 = 0x00;
pub const INTERFACE_PROTOCOL: u8 = 0xFF;

/// Address of the bulk IN data endpoint
pub const BULK_IN_ENDPOINT: u8 = 0x81;
/// Full-speed bulk packet size
pub const BULK_MAX_PACKET_SIZE: u16 = 64;

/// Control request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    Open = 0x01,
    Close = 0x02,
    GetStatus = 0x03,
    Start = 0x10,
    Stop = 0x11,
    ConfigureSession = 0x21,
    GetSessionConfiguration = 0x22,
}

impl TryFrom<u8> for Command {
    type Error = DecodeError;
    fn try_from(opcode: u8) -> Result<Self, Self::Error> {
        Ok(match opcode {
            0x01 => Command::Open,
            0x02 => Command::Close,
            0x03 => Command::GetStatus,
            0x10 => Command::Start,
            0x11 => Command::Stop,
            0x21 => Command::ConfigureSession,
            0x22 => Command::GetSessionConfiguration,
            _ => return Err(DecodeError::Command(opcode)),
        })
    }
}

impl Command {
    /// Number of bytes in this command's data stage
    pub const fn payload_len(self) -> usize {
        match self {
            Command::ConfigureSession | Command::GetSessionConfiguration => {
                SessionConfiguration::SIZE
            }
            _ => 1,
        }
    }

    /// Indicates if the data stage flows from the device to the host
    pub const fn is_in(self) -> bool {
        !matches!(self, Command::ConfigureSession)
    }
}

/// Device status, as reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    Closed = 0x00,
    Opened = 0x01,
    Running = 0x02,
    Error = 0xFF,
}

impl TryFrom<u8> for Status {
    type Error = DecodeError;
    fn try_from(raw: u8) -> Result<Self, DecodeError> {
        Ok(match raw {
            0x00 => Status::Closed,
            0x01 => Status::Opened,
            0x02 => Status::Running,
            0xFF => Status::Error,
            _ => return Err(DecodeError::Status(raw)),
        })
    }
}

/// Data source for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum SessionKind {
    /// Synthetic `i mod 251` byte sequence, no hardware involved
    #[default]
    Pattern = 0x00,
    /// One input pin, sampled by the capture unit
    HardwareCapture = 0x01,
}

impl TryFrom<u8> for SessionKind {
    type Error = DecodeError;
    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x00 => Ok(SessionKind::Pattern),
            0x01 => Ok(SessionKind::HardwareCapture),
            _ => Err(DecodeError::Kind(tag)),
        }
    }
}

/// A session request (host to device) or result (device to host)
///
/// The host fills `kind` and `sample_count`. The device answers with the
/// sample count it honored, and the number of stream bytes it still has to
/// deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SessionConfiguration {
    pub kind: SessionKind,
    pub sample_count: u32,
    pub bytes_left: u32,
}

impl SessionConfiguration {
    /// Size of the wire record
    pub const SIZE: usize = 9;

    /// A host request for `sample_count` samples
    pub const fn request(kind: SessionKind, sample_count: u32) -> Self {
        SessionConfiguration {
            kind,
            sample_count,
            bytes_left: 0,
        }
    }

    /// Encode the wire record
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[0] = self.kind as u8;
        bytes[1..5].copy_from_slice(&self.sample_count.to_le_bytes());
        bytes[5..9].copy_from_slice(&self.bytes_left.to_le_bytes());
        bytes
    }

    /// Decode a wire record
    ///
    /// `bytes` must be exactly [`SIZE`](Self::SIZE) bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: &[u8; Self::SIZE] = bytes.try_into().map_err(|_| DecodeError::Length {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        let [tag, s0, s1, s2, s3, b0, b1, b2, b3] = *bytes;
        Ok(SessionConfiguration {
            kind: SessionKind::try_from(tag)?,
            sample_count: u32::from_le_bytes([s0, s1, s2, s3]),
            bytes_left: u32::from_le_bytes([b0, b1, b2, b3]),
        })
    }
}

/// A wire value couldn't be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DecodeError {
    /// Unknown opcode
    Command(u8),
    /// Unknown status byte
    Status(u8),
    /// Unknown session kind tag
    Kind(u8),
    /// Record has the wrong size
    Length { expected: usize, actual: usize },
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::Command(op) => write!(f, "unknown command {op:#04x}"),
            DecodeError::Status(raw) => write!(f, "unknown status {raw:#04x}"),
            DecodeError::Kind(tag) => write!(f, "unknown session kind {tag:#04x}"),
            DecodeError::Length { expected, actual } => {
                write!(f, "expected a {expected} byte record, got {actual} bytes")
            }
        }
    }
}
