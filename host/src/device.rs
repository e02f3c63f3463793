//! The command client

use std::time::Duration;

use sigprobe::{
    protocol::{Command, SessionConfiguration, SessionKind, Status},
    session::pattern_byte,
};

use crate::{
    error::{Error, IntegrityError, Result},
    transport::{read_stream, Transport},
};

/// Default control and bulk transfer timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Result of a pattern session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Benchmark {
    /// Bytes requested
    pub requested: u32,
    /// Bytes the device agreed to send
    pub honored: u32,
    /// Bytes received
    pub received: usize,
    /// The transfer error that ended the stream early
    pub stream_error: Option<rusb::Error>,
    /// The first byte that broke the pattern
    pub integrity: std::result::Result<(), IntegrityError>,
}

/// Result of a hardware capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Samples the device agreed to record
    pub sample_count: u32,
    /// Packed samples, 32 per little-endian word
    pub data: Vec<u8>,
    /// The transfer error that ended the stream early
    pub stream_error: Option<rusb::Error>,
}

/// Check that `data` follows the pattern sequence
///
/// Returns the first mismatch.
pub fn verify_pattern(data: &[u8]) -> std::result::Result<(), IntegrityError> {
    match data
        .iter()
        .enumerate()
        .find(|&(offset, &byte)| byte != pattern_byte(offset))
    {
        Some((offset, &actual)) => Err(IntegrityError {
            offset,
            expected: pattern_byte(offset),
            actual,
        }),
        None => Ok(()),
    }
}

/// A SigProbe device
///
/// Calls are serialized through `&mut self`; the protocol has no support
/// for overlapping commands. Dropping an open device closes its session.
pub struct Device<T: Transport> {
    transport: T,
    timeout: Duration,
    opened: bool,
}

impl<T: Transport> Device<T> {
    /// Drive a device over `transport`
    ///
    /// The session isn't open; call [`open`](Self::open).
    pub fn new(transport: T) -> Self {
        Device {
            transport,
            timeout: DEFAULT_TIMEOUT,
            opened: false,
        }
    }

    /// Set the control and bulk transfer timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Returns the transfer timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Indicates if the session is open
    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// Open a session
    ///
    /// Does nothing if the session is already open.
    pub fn open(&mut self) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.expect(Command::Open, Status::Opened)?;
        self.opened = true;
        Ok(())
    }

    /// Close the session
    ///
    /// A device that doesn't report `Closed` may need a reset; that's logged,
    /// not raised.
    pub fn close(&mut self) -> Result<()> {
        if !self.opened {
            return Ok(());
        }
        self.opened = false;
        let status = self.command(Command::Close)?;
        if status != Status::Closed {
            log::warn!("device failed to close properly (status {status:?}); it may need a reset");
        }
        Ok(())
    }

    /// Returns the device status
    pub fn status(&mut self) -> Result<Status> {
        self.command(Command::GetStatus)
    }

    /// Start the configured session
    pub fn start(&mut self) -> Result<Status> {
        self.command(Command::Start)
    }

    /// Stop the running session
    pub fn stop(&mut self) -> Result<Status> {
        self.command(Command::Stop)
    }

    /// Request a session
    ///
    /// Read back what the device honored with
    /// [`session_configuration`](Self::session_configuration).
    pub fn configure_session(&mut self, kind: SessionKind, sample_count: u32) -> Result<()> {
        let request = SessionConfiguration::request(kind, sample_count).to_bytes();
        let written = self.transport.write_control(
            Command::ConfigureSession as u8,
            &request,
            self.timeout,
        )?;
        if written != request.len() {
            return Err(Error::ReplySize {
                command: Command::ConfigureSession,
                expected: request.len(),
                actual: written,
            });
        }
        Ok(())
    }

    /// Returns the most recent session record
    pub fn session_configuration(&mut self) -> Result<SessionConfiguration> {
        let mut reply = [0; SessionConfiguration::SIZE];
        let len = self.read_reply(Command::GetSessionConfiguration, &mut reply)?;
        Ok(SessionConfiguration::from_bytes(&reply[..len])?)
    }

    /// Stream `bytes` pattern bytes, and check them
    ///
    /// The device may honor fewer bytes than requested. Integrity failures
    /// and early stream ends are reported in the result.
    pub fn benchmark(&mut self, bytes: u32) -> Result<Benchmark> {
        let config = self.prepare(SessionKind::Pattern, bytes)?;
        let honored = config.sample_count;
        if honored < bytes {
            log::warn!("device limited benchmark to {honored} bytes");
        }

        let mut data = vec![0; honored as usize];
        let (received, stream_error) = self.stream(&mut data)?;
        data.truncate(received);

        let integrity = verify_pattern(&data);
        if let Err(err) = integrity {
            log::warn!("{err}");
        }
        Ok(Benchmark {
            requested: bytes,
            honored,
            received,
            stream_error,
            integrity,
        })
    }

    /// Capture `samples` samples from the device's input pin
    ///
    /// The device may honor fewer samples than requested. Early stream ends
    /// are reported in the result.
    pub fn sample(&mut self, samples: u32) -> Result<Capture> {
        let config = self.prepare(SessionKind::HardwareCapture, samples)?;
        if config.sample_count < samples {
            log::warn!("device limited sampling to {} samples", config.sample_count);
        }

        let mut data = vec![0; config.bytes_left as usize];
        let (received, stream_error) = self.stream(&mut data)?;
        data.truncate(received);
        Ok(Capture {
            sample_count: config.sample_count,
            data,
            stream_error,
        })
    }

    /// Configure and start a session
    fn prepare(&mut self, kind: SessionKind, count: u32) -> Result<SessionConfiguration> {
        if !self.opened {
            return Err(Error::NotOpen);
        }
        self.configure_session(kind, count)?;
        self.expect(Command::GetStatus, Status::Opened)?;
        let config = self.session_configuration()?;
        self.expect(Command::Start, Status::Running)?;
        Ok(config)
    }

    /// Read the session stream into `data`, then stop the session
    fn stream(&mut self, data: &mut [u8]) -> Result<(usize, Option<rusb::Error>)> {
        let read = read_stream(&mut self.transport, data, self.timeout)?;
        if let Some(err) = read.error {
            log::warn!("transfer ended abnormally: {err}");
        }

        let status = self.stop()?;
        if status != Status::Opened {
            log::warn!("device returned status {status:?} after stop");
        }
        Ok((read.received, read.error))
    }

    fn expect(&mut self, command: Command, expected: Status) -> Result<()> {
        let status = self.command(command)?;
        if status != expected {
            return Err(Error::UnexpectedStatus {
                command,
                expected,
                status,
            });
        }
        Ok(())
    }

    fn command(&mut self, command: Command) -> Result<Status> {
        let mut reply = [0; 1];
        self.read_reply(command, &mut reply)?;
        Ok(Status::try_from(reply[0])?)
    }

    /// Issue `command`, and expect a reply that fills `reply`
    fn read_reply(&mut self, command: Command, reply: &mut [u8]) -> Result<usize> {
        let len = self
            .transport
            .read_control(command as u8, reply, self.timeout)?;
        if len != reply.len() {
            return Err(Error::ReplySize {
                command,
                expected: reply.len(),
                actual: len,
            });
        }
        Ok(len)
    }
}

impl<T: Transport> Drop for Device<T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to close device: {err}");
        }
    }
}
