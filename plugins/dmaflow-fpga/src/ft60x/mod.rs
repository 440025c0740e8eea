/*!
FT60x driver backends.

Three ways of talking to the FT601 chip exist depending on the host:
the ft60x kernel driver chardev (Linux), a built-in libusb driver
(fallback on Linux and other libusb platforms) and the proprietary D3XX
library (macOS). All of them surface the same small capability set; the
device layer never cares which one is active.
*/

#[cfg(target_os = "macos")]
pub mod d3xx;
#[cfg(target_os = "linux")]
pub mod kernel;
#[cfg(not(target_os = "macos"))]
pub mod libusb;

use crate::chip::Config;

use dmaflow_core::error::Result;

#[cfg(target_os = "linux")]
use log::debug;

pub const FTDI_VENDOR_ID: u16 = 0x0403;
pub const FTDI_FT60X_PRODUCT_ID: u16 = 0x601f;

pub const FTDI_COMMUNICATION_INTERFACE: u8 = 0x00;
pub const FTDI_DATA_INTERFACE: u8 = 0x01;

pub const FTDI_ENDPOINT_SESSION_OUT: u8 = 0x01;
pub const FTDI_ENDPOINT_OUT: u8 = 0x02;
pub const FTDI_ENDPOINT_IN: u8 = 0x82;

/// Minimal FT60x capability set required by the fpga devices.
///
/// Data path methods take `&self`; serialization is owned by the
/// [`Channel`](../channel/struct.Channel.html) layer above.
pub trait Ft60xBackend
where
    Self: Send + Sync,
{
    /// Retrieves the chip configuration.
    fn config(&self) -> Result<Config>;

    /// Writes the chip configuration.
    fn set_config(&self, config: &Config) -> Result<()>;

    /// Reads up to `buf.len()` bytes from the data pipe.
    ///
    /// Returns the number of bytes actually available.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Writes the whole buffer to the data pipe or fails.
    fn write(&self, data: &[u8]) -> Result<()>;
}

/// Opens the best available backend for this host.
#[cfg(not(target_os = "macos"))]
pub fn open_backend(device_index: usize) -> Result<Box<dyn Ft60xBackend>> {
    #[cfg(target_os = "linux")]
    match kernel::KernelBackend::open() {
        Ok(backend) => return Ok(Box::new(backend)),
        Err(err) => debug!("ft60x kernel driver not available: {}", err),
    }
    Ok(Box::new(libusb::LibusbBackend::open(device_index)?))
}

/// Opens the best available backend for this host.
#[cfg(target_os = "macos")]
pub fn open_backend(device_index: usize) -> Result<Box<dyn Ft60xBackend>> {
    Ok(Box::new(d3xx::D3xxBackend::open(device_index)?))
}
