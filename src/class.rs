//! USB transport adapter
//!
//! [`SamplerClass`] is a `usb-device` class that exposes the [`Engine`]
//! over one vendor-specific interface. Commands arrive as class requests
//! on the control endpoint; session bytes leave through one bulk IN
//! endpoint.
//!
//! Construct the class before building the `UsbDevice`, then drive both
//! from the control loop:
//!
//! ```no_run
//! use sigprobe::{
//!     class::SamplerClass, protocol, CaptureMemory, CaptureResources, Engine,
//!     CAPTURE_BUFFER_SIZE,
//! };
//! use usb_device::{bus::{UsbBus, UsbBusAllocator}, prelude::*};
//!
//! static CAPTURE_MEMORY: CaptureMemory<CAPTURE_BUFFER_SIZE> = CaptureMemory::new();
//!
//! fn run<B: UsbBus>(bus: &UsbBusAllocator<B>, resources: &CaptureResources<'_>) -> ! {
//!     let engine = Engine::new(CAPTURE_MEMORY.take().unwrap(), resources);
//!     let mut class = SamplerClass::new(bus, engine);
//!     let mut device = UsbDeviceBuilder::new(bus, UsbVidPid(protocol::VENDOR_ID, protocol::PRODUCT_ID))
//!         .strings(&[StringDescriptors::default()
//!             .manufacturer("SigProbe")
//!             .product("SigProbe")
//!             .serial_number("0001")])
//!         .unwrap()
//!         .build();
//!
//!     loop {
//!         device.poll(&mut [&mut class]);
//!         class.set_device_state(device.state());
//!         class.tick();
//!     }
//! }
//! ```

use usb_device::{
    class_prelude::*,
    device::UsbDeviceState,
    endpoint::{EndpointAddress, EndpointType},
};

use crate::{
    engine::{Engine, Fault, Resources, StreamSink},
    protocol::{self, Command, SessionConfiguration, Status},
};

/// A control IN reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    bytes: [u8; SessionConfiguration::SIZE],
    len: usize,
}

impl Reply {
    /// A one-byte status reply
    pub fn status(status: Status) -> Self {
        let mut bytes = [0; SessionConfiguration::SIZE];
        bytes[0] = status as u8;
        Reply { bytes, len: 1 }
    }

    /// A session record reply
    pub fn session(config: SessionConfiguration) -> Self {
        Reply {
            bytes: config.to_bytes(),
            len: SessionConfiguration::SIZE,
        }
    }

    /// The reply data stage
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Run the IN command `request` against the engine
///
/// Returns `None` if `request` isn't an IN command.
pub fn control_in<R: Resources>(engine: &mut Engine<'_, R>, request: u8) -> Option<Reply> {
    let command = Command::try_from(request).ok()?;
    let reply = match command {
        Command::Open => Reply::status(engine.open()),
        Command::Close => Reply::status(engine.close()),
        Command::GetStatus => Reply::status(engine.status()),
        Command::Start => Reply::status(engine.start()),
        Command::Stop => Reply::status(engine.stop()),
        Command::GetSessionConfiguration => Reply::session(engine.session_configuration()),
        Command::ConfigureSession => return None,
    };
    Some(reply)
}

/// Run the OUT command `request`, carrying `data`, against the engine
///
/// Returns `false` if the request should be rejected. A record that can't
/// be decoded faults the engine.
pub fn control_out<R: Resources>(engine: &mut Engine<'_, R>, request: u8, data: &[u8]) -> bool {
    if Command::try_from(request) != Ok(Command::ConfigureSession) {
        return false;
    }
    match SessionConfiguration::from_bytes(data) {
        Ok(config) => {
            engine.configure_session(config);
            true
        }
        Err(err) => {
            engine.fail(Fault::MalformedRequest(err));
            false
        }
    }
}

/// Streams into a bulk IN endpoint, one packet at a time
struct BulkSink<'a, B: UsbBus> {
    ep: EndpointIn<'a, B>,
    busy: bool,
}

impl<B: UsbBus> StreamSink for BulkSink<'_, B> {
    fn available(&self) -> usize {
        if self.busy {
            0
        } else {
            self.ep.max_packet_size().into()
        }
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        match self.ep.write(bytes) {
            Ok(written) => {
                self.busy = true;
                written
            }
            Err(UsbError::WouldBlock) => 0,
            Err(_err) => {
                warn!("BULK WRITE FAILED {:?}", _err);
                0
            }
        }
    }

    fn flush(&mut self) {
        // The host reads exactly the session's byte count, so the stream
        // ends without a zero-length packet.
        debug!("BULK STREAM END");
    }
}

/// A `usb-device` class for the engine
pub struct SamplerClass<'a, B: UsbBus, R = ()> {
    interface: InterfaceNumber,
    sink: BulkSink<'a, B>,
    engine: Engine<'a, R>,
    configured: bool,
}

impl<'a, B: UsbBus, R: Resources> SamplerClass<'a, B, R> {
    /// Allocate the interface and bulk endpoint, and take the engine
    ///
    /// The endpoint takes [`protocol::BULK_IN_ENDPOINT`] when the bus can
    /// provide it, and any free IN endpoint otherwise.
    pub fn new(alloc: &'a UsbBusAllocator<B>, engine: Engine<'a, R>) -> Self {
        let ep = alloc
            .alloc(
                Some(EndpointAddress::from(protocol::BULK_IN_ENDPOINT)),
                EndpointType::Bulk,
                protocol::BULK_MAX_PACKET_SIZE,
                0,
            )
            .unwrap_or_else(|_| alloc.bulk(protocol::BULK_MAX_PACKET_SIZE));
        SamplerClass {
            interface: alloc.interface(),
            sink: BulkSink { ep, busy: false },
            engine,
            configured: false,
        }
    }

    /// Returns the engine
    pub fn engine(&self) -> &Engine<'a, R> {
        &self.engine
    }

    /// Returns the engine
    pub fn engine_mut(&mut self) -> &mut Engine<'a, R> {
        &mut self.engine
    }

    /// Forward the device state
    ///
    /// Call after every `UsbDevice::poll`. Entering the configured state
    /// connects the engine. Falling back to the default or addressed state
    /// disconnects it. Suspend leaves the engine alone.
    pub fn set_device_state(&mut self, state: UsbDeviceState) {
        match state {
            UsbDeviceState::Configured if !self.configured => {
                self.configured = true;
                self.engine.bus_connected();
            }
            UsbDeviceState::Default | UsbDeviceState::Addressed if self.configured => {
                self.disconnect();
            }
            _ => {}
        }
    }

    /// Run one streaming step
    pub fn tick(&mut self) {
        self.engine.tick(&mut self.sink);
    }

    fn disconnect(&mut self) {
        self.configured = false;
        self.sink.busy = false;
        self.engine.bus_disconnected();
    }

    fn is_ours(&self, request: &control::Request) -> bool {
        request.request_type == control::RequestType::Class
            && request.recipient == control::Recipient::Interface
            && request.index == u8::from(self.interface) as u16
    }
}

impl<B: UsbBus, R: Resources> UsbClass<B> for SamplerClass<'_, B, R> {
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()> {
        writer.interface(
            self.interface,
            protocol::INTERFACE_CLASS,
            protocol::INTERFACE_SUBCLASS,
            protocol::INTERFACE_PROTOCOL,
        )?;
        writer.endpoint(&self.sink.ep)?;
        Ok(())
    }

    fn reset(&mut self) {
        if self.configured {
            self.disconnect();
        }
        self.sink.busy = false;
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let request = *xfer.request();
        if !self.is_ours(&request) {
            return;
        }
        let result = match control_in(&mut self.engine, request.request) {
            Some(reply) => xfer.accept_with(reply.as_bytes()),
            None => xfer.reject(),
        };
        if result.is_err() {
            warn!("CONTROL IN {:#x} FAILED", request.request);
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let request = *xfer.request();
        if !self.is_ours(&request) {
            return;
        }
        let result = if control_out(&mut self.engine, request.request, xfer.data()) {
            xfer.accept()
        } else {
            xfer.reject()
        };
        if result.is_err() {
            warn!("CONTROL OUT {:#x} FAILED", request.request);
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr == self.sink.ep.address() {
            self.sink.busy = false;
        }
    }
}
