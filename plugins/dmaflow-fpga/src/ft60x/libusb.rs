// ----------------------------------------------------------------------------
// Built-in libusb driver for the FT601.
// NB! functionality below is by no way complete - only the minimal
// capability set required by the fpga devices is implemented ...
// ----------------------------------------------------------------------------

use super::{
    Ft60xBackend, FTDI_COMMUNICATION_INTERFACE, FTDI_DATA_INTERFACE, FTDI_ENDPOINT_IN,
    FTDI_ENDPOINT_OUT, FTDI_ENDPOINT_SESSION_OUT, FTDI_FT60X_PRODUCT_ID, FTDI_VENDOR_ID,
};
use crate::chip::{Config, ControlRequest};

use rusb::{
    request_type, DeviceHandle, DeviceList, Direction, GlobalContext, Recipient, RequestType,
};

use std::mem::size_of;
use std::time::Duration;

use log::info;

use dmaflow_core::error::{Error, Result};

use dataview::Pod;

pub struct LibusbBackend {
    handle: DeviceHandle<GlobalContext>,
}

impl LibusbBackend {
    /// Opens the `device_index`-th FT60x on the bus.
    pub fn open(device_index: usize) -> Result<Self> {
        let (dev, desc) = DeviceList::new()
            .map_err(|_| Error::Device("unable to get usb device list"))?
            .iter()
            .filter_map(|dev| match dev.device_descriptor() {
                Ok(desc) => Some((dev, desc)),
                Err(_) => None,
            })
            .filter(|(_dev, desc)| {
                desc.vendor_id() == FTDI_VENDOR_ID && desc.product_id() == FTDI_FT60X_PRODUCT_ID
            })
            .nth(device_index)
            .ok_or_else(|| Error::Device("unable to find ftdi device"))?;

        info!(
            "found FTDI device: {:04x}:{:04x} (bus {}, device {})",
            desc.vendor_id(),
            desc.product_id(),
            dev.bus_number(),
            dev.address()
        );

        // open handle and reset chip
        let mut handle = dev
            .open()
            .map_err(|_| Error::Device("unable to open ftdi usb device"))?;
        handle
            .reset()
            .map_err(|_| Error::Device("unable to reset ftdi device"))?;

        // check driver state
        if handle
            .kernel_driver_active(FTDI_COMMUNICATION_INTERFACE)
            .map_err(|_| Error::Device("ftdi driver check failed"))?
        {
            return Err(Error::Device(
                "ftdi driver is already active on FTDI_COMMUNICATION_INTERFACE",
            ));
        }

        if handle
            .kernel_driver_active(FTDI_DATA_INTERFACE)
            .map_err(|_| Error::Device("ftdi driver check failed"))?
        {
            return Err(Error::Device(
                "ftdi driver is already active on FTDI_DATA_INTERFACE",
            ));
        }

        // claim interfaces
        handle
            .claim_interface(FTDI_COMMUNICATION_INTERFACE)
            .map_err(|_| Error::Device("unable to claim FTDI_COMMUNICATION_INTERFACE"))?;
        handle
            .claim_interface(FTDI_DATA_INTERFACE)
            .map_err(|_| Error::Device("unable to claim FTDI_DATA_INTERFACE"))?;

        Ok(Self { handle })
    }

    /// Sends a ControlRequest to issue a read with a given size
    fn send_read_request(&self, len: u32) -> Result<()> {
        let req = ControlRequest::new(1, FTDI_ENDPOINT_IN, 1, len);
        self.write_bulk_raw(FTDI_ENDPOINT_SESSION_OUT, req.as_bytes())
    }

    // Does a bulk write and validates the sent size
    fn write_bulk_raw(&self, endpoint: u8, buf: &[u8]) -> Result<()> {
        let bytes = self
            .handle
            .write_bulk(endpoint, buf, Duration::from_millis(1000))
            .map_err(|_| Error::Transport("unable to write to ft60x"))?;
        if bytes == buf.len() {
            Ok(())
        } else {
            Err(Error::Transport(
                "unable to write the entire buffer to the ft60x",
            ))
        }
    }
}

impl Ft60xBackend for LibusbBackend {
    fn config(&self) -> Result<Config> {
        let mut buf = vec![0u8; size_of::<Config>()];
        self.handle
            .read_control(
                request_type(Direction::In, RequestType::Vendor, Recipient::Device),
                0xCF,
                1,
                0,
                &mut buf,
                Duration::from_millis(1000),
            )
            .map_err(|_| Error::Device("unable to get ft60x config"))?;

        // dataview buf to struct
        let view = buf.as_data_view();
        Ok(view.copy::<Config>(0))
    }

    fn set_config(&self, config: &Config) -> Result<()> {
        let bytes = self
            .handle
            .write_control(
                request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
                0xCF,
                0,
                0,
                config.as_bytes(),
                Duration::from_millis(1000),
            )
            .map_err(|_| Error::Device("unable to set ft60x config"))?;
        if bytes == size_of::<Config>() {
            Ok(())
        } else {
            Err(Error::Device("unable to set ft60x config"))
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.send_read_request(buf.len() as u32)?;
        self.handle
            .read_bulk(FTDI_ENDPOINT_IN, buf, Duration::from_millis(1000))
            .map_err(|_| Error::Transport("unable to read from ft60x"))
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        self.write_bulk_raw(FTDI_ENDPOINT_OUT, data)
    }
}
