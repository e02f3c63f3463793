//! Firmware for a USB signal acquisition device
//!
//! `sigprobe` samples one input pin with a DMA-fed capture unit, and streams
//! the samples to a USB host. A host drives the device with a small command
//! set: open a session, configure it, start it, then read the session bytes
//! from a bulk endpoint until they're exhausted.
//!
//! - [`Engine`] is the protocol state machine. It owns the capture buffer,
//!   and moves session bytes into a [`StreamSink`] once per control loop
//!   iteration.
//! - [`CaptureResources`] owns the DMA channels and samplers, and hands out
//!   exclusive [`CaptureUnit`](capture::CaptureUnit)s.
//! - [`class::SamplerClass`] is a [`usb-device`] class that connects the
//!   engine to a USB bus.
//! - [`protocol`] defines the commands and wire records shared with the host.
//!
//! To use real capture hardware, define a safe implementation of
//! [`Peripherals`]. Host tests instantiate the register blocks in memory.
//!
//! [`usb-device`]: https://crates.io/crates/usb-device

#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod buffer;

pub mod capture;
pub mod class;
pub mod dma;
pub mod engine;
pub mod protocol;
pub mod ral;
pub mod sampler;
pub mod session;

pub use buffer::{CaptureMemory, CAPTURE_BUFFER_SIZE};
pub use capture::{CaptureConfig, CaptureResources};
pub use engine::{DeviceState, Engine, Fault, Resources, StreamSink};

/// A type that owns capture hardware register blocks
///
/// An implementation of `Peripherals` is expected to own
///
/// - a run of consecutive DMA channel register blocks
/// - a run of consecutive sampler register blocks
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the DMA
/// channels and samplers it describes. The pointers returned by the methods
/// are assumed to be valid for `'static`, to point at the stated number of
/// consecutive register blocks, and will be cast to the register block
/// definitions in [`dma`] and [`sampler`].
///
/// # Example
///
/// Two DMA channels and four samplers, at fixed addresses.
///
/// ```
/// use sigprobe::{CaptureResources, Peripherals};
///
/// struct Capture;
///
/// unsafe impl Peripherals for Capture {
///     const DMA_CHANNELS: usize = 2;
///     const SAMPLERS: usize = 4;
///     fn dma(&self) -> *const () {
///         0x5000_0000 as *const ()
///     }
///     fn samplers(&self) -> *const () {
///         0x5020_00c8 as *const ()
///     }
/// }
///
/// let capture = Capture;
/// assert_eq!(capture.dma(), 0x5000_0000 as *const ());
/// # fn on_device(capture: &Capture) -> CaptureResources<'static> {
/// let resources = CaptureResources::from_peripherals(capture);
/// # resources }
/// ```
pub unsafe trait Peripherals {
    /// Number of DMA channels available to capture units
    const DMA_CHANNELS: usize;
    /// Number of samplers available to capture units
    const SAMPLERS: usize;
    /// Returns the address of the first DMA channel register block
    fn dma(&self) -> *const ();
    /// Returns the address of the first sampler register block
    fn samplers(&self) -> *const ();
}
