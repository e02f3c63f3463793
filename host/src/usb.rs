//! libusb transport and device discovery

use std::{os::raw::c_int, time::Duration};

use rusb::{
    ffi, ConfigDescriptor, Context, DeviceHandle, Direction, Recipient, RequestType, TransferType,
    UsbContext,
};
use sigprobe::protocol;

use crate::{
    device::Device,
    error::{Error, Result},
    transport::{BulkTransfer, Transport},
};

/// Descriptor details of an attached device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub bus_number: u8,
    pub address: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Bus and address, formatted `bus:address`
    pub fn bus_address(&self) -> String {
        format!("{:03}:{:03}", self.bus_number, self.address)
    }
}

/// Returns every attached SigProbe device
pub fn list(context: &Context) -> Result<Vec<(rusb::Device<Context>, DeviceInfo)>> {
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(err) => {
                log::debug!("skipping device {:03}:{:03}: {err}", device.bus_number(), device.address());
                continue;
            }
        };
        if descriptor.vendor_id() != protocol::VENDOR_ID
            || descriptor.product_id() != protocol::PRODUCT_ID
        {
            continue;
        }

        // Strings are optional; a device we can't open still lists.
        let handle = device.open().ok();
        let string = |read: fn(&DeviceHandle<Context>, &rusb::DeviceDescriptor) -> rusb::Result<String>| {
            handle.as_ref().and_then(|handle| read(handle, &descriptor).ok())
        };
        let info = DeviceInfo {
            bus_number: device.bus_number(),
            address: device.address(),
            manufacturer: string(DeviceHandle::read_manufacturer_string_ascii),
            product: string(DeviceHandle::read_product_string_ascii),
            serial_number: string(DeviceHandle::read_serial_number_string_ascii),
        };
        found.push((device, info));
    }
    Ok(found)
}

/// Open the first SigProbe device, or the one with a matching serial number
///
/// The returned device's session isn't open.
pub fn open(serial_number: Option<&str>) -> Result<Device<UsbTransport>> {
    let context = Context::new()?;
    let (device, info) = list(&context)?
        .into_iter()
        .find(|(_, info)| {
            serial_number.map_or(true, |serial| info.serial_number.as_deref() == Some(serial))
        })
        .ok_or(Error::NotFound)?;
    log::debug!("opening device at {}", info.bus_address());
    Ok(Device::new(UsbTransport::open(&device)?))
}

/// Finds the interface with a single bulk IN endpoint
///
/// Returns the interface number, alternate setting, and endpoint address.
fn find_interface(config: &ConfigDescriptor) -> Option<(u8, u8, u8)> {
    config
        .interfaces()
        .flat_map(|interface| interface.descriptors())
        .find_map(|alt| {
            if alt.class_code() != protocol::INTERFACE_CLASS
                || alt.sub_class_code() != protocol::INTERFACE_SUBCLASS
                || alt.protocol_code() != protocol::INTERFACE_PROTOCOL
                || alt.num_endpoints() != 1
            {
                return None;
            }
            let endpoint = alt.endpoint_descriptors().next()?;
            (endpoint.transfer_type() == TransferType::Bulk && endpoint.direction() == Direction::In)
                .then(|| (alt.interface_number(), alt.setting_number(), endpoint.address()))
        })
}

/// Transport over a claimed libusb interface
///
/// Releases the interface when dropped.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoint: u8,
}

impl UsbTransport {
    /// Open `device`, and claim its SigProbe interface
    pub fn open(device: &rusb::Device<Context>) -> Result<Self> {
        let config = device.active_config_descriptor()?;
        let (interface, setting, endpoint) =
            find_interface(&config).ok_or(Error::InterfaceNotFound)?;

        let mut handle = device.open()?;
        handle.claim_interface(interface)?;
        if setting != 0 {
            handle.set_alternate_setting(interface, setting)?;
        }
        log::debug!("claimed interface {interface}, bulk endpoint {endpoint:#04x}");
        Ok(UsbTransport {
            handle,
            interface,
            endpoint,
        })
    }

    /// Returns the claimed interface number
    pub fn interface(&self) -> u8 {
        self.interface
    }

    /// Returns the bulk IN endpoint address
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }
}

impl Transport for UsbTransport {
    fn read_control(
        &mut self,
        request: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, rusb::Error> {
        let request_type = rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface);
        self.handle
            .read_control(request_type, request, 0, self.interface.into(), buf, timeout)
    }

    fn write_control(
        &mut self,
        request: u8,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, rusb::Error> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        self.handle
            .write_control(request_type, request, 0, self.interface.into(), data, timeout)
    }

    /// Unlike `DeviceHandle::read_bulk`, reports the bytes moved by a
    /// transfer that timed out.
    fn read_bulk(&mut self, buf: &mut [u8], timeout: Duration) -> BulkTransfer {
        let length = c_int::try_from(buf.len()).unwrap_or(c_int::MAX);
        let timeout = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let mut transferred: c_int = 0;
        // Safety: the handle is open for the life of self, and libusb writes
        // at most `length` bytes into `buf`.
        let code = unsafe {
            ffi::libusb_bulk_transfer(
                self.handle.as_raw(),
                self.endpoint,
                buf.as_mut_ptr(),
                length,
                &mut transferred,
                timeout,
            )
        };
        BulkTransfer {
            transferred: usize::try_from(transferred).unwrap_or(0),
            result: libusb_result(code),
        }
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(err) = self.handle.release_interface(self.interface) {
            log::warn!("failed to release interface {}: {err}", self.interface);
        }
    }
}

fn libusb_result(code: c_int) -> std::result::Result<(), rusb::Error> {
    use ffi::constants::*;
    Err(match code {
        0 => return Ok(()),
        LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        LIBUSB_ERROR_IO => rusb::Error::Io,
        LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
        LIBUSB_ERROR_ACCESS => rusb::Error::Access,
        LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
        LIBUSB_ERROR_BUSY => rusb::Error::Busy,
        LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    })
}
