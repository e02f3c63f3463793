//! Command and stream transport
//!
//! [`Transport`] is the seam between the command client and the USB stack.
//! [`UsbTransport`](crate::usb::UsbTransport) implements it with libusb;
//! tests implement it in memory.

use std::time::Duration;

use crate::error::{Error, Result};

/// Outcome of one bulk IN transfer
///
/// A transfer that times out may still have moved some bytes, so the byte
/// count is reported next to the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkTransfer {
    pub transferred: usize,
    pub result: std::result::Result<(), rusb::Error>,
}

/// Moves commands and stream bytes to and from one device interface
pub trait Transport {
    /// Issue the IN class request `request`, and read its reply into `buf`
    fn read_control(
        &mut self,
        request: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, rusb::Error>;

    /// Issue the OUT class request `request`, carrying `data`
    fn write_control(
        &mut self,
        request: u8,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, rusb::Error>;

    /// Read stream bytes into `buf`
    fn read_bulk(&mut self, buf: &mut [u8], timeout: Duration) -> BulkTransfer;
}

/// The end of a stream read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRead {
    /// Bytes received, from the start of the buffer
    pub received: usize,
    /// The transfer error that ended the read early
    pub error: Option<rusb::Error>,
}

/// Read stream bytes until `buf` is full
///
/// A timeout that moved some bytes counts as progress. A transfer that
/// moves nothing, without an error, ends the stream. Any other error ends
/// the read, and is reported in [`StreamRead::error`]. Receiving more bytes
/// than requested is an [`Error::Overrun`].
pub fn read_stream<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<StreamRead> {
    let mut received = 0;
    while received < buf.len() {
        let remaining = buf.len() - received;
        let BulkTransfer {
            transferred,
            result,
        } = transport.read_bulk(&mut buf[received..], timeout);
        let result = match result {
            Err(rusb::Error::Timeout) if transferred > 0 => Ok(()),
            other => other,
        };
        if transferred > remaining {
            return Err(Error::Overrun {
                transferred,
                remaining,
            });
        }
        if let Err(err) = result {
            return Ok(StreamRead {
                received,
                error: Some(err),
            });
        }
        if transferred == 0 {
            break;
        }
        received += transferred;
    }
    Ok(StreamRead {
        received,
        error: None,
    })
}
