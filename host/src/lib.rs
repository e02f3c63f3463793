//! Host driver for SigProbe signal acquisition devices
//!
//! Find a device with [`usb::list`] or [`usb::open`], then drive it through
//! [`Device`]. [`Device::benchmark`] runs a pattern session and checks every
//! byte; [`Device::sample`] records the input pin.
//!
//! ```no_run
//! # fn main() -> sigprobe_host::Result<()> {
//! let mut device = sigprobe_host::usb::open(None)?;
//! device.open()?;
//! let report = device.benchmark(64 * 1024)?;
//! println!("received {} of {} bytes", report.received, report.honored);
//! # Ok(()) }
//! ```
//!
//! [`Transport`] separates the command client from libusb.

mod device;
mod error;
mod transport;

pub mod usb;

pub use device::{verify_pattern, Benchmark, Capture, Device, DEFAULT_TIMEOUT};
pub use error::{Error, IntegrityError, Result};
pub use transport::{read_stream, BulkTransfer, StreamRead, Transport};

pub use sigprobe::protocol;
