/*!
FT601 usb3 transport for pcie fpga acquisition devices.

Covers the FT60x driver backends (kernel chardev, built-in libusb, D3XX
on macOS), the chip configuration fix-up at open, the safe-mode transfer
channel and the asynchronous read pipeline on top of it.
*/

pub mod chip;
pub mod ft60x;

pub mod channel;
#[doc(hidden)]
pub use channel::Channel;

pub mod pipe;
#[doc(hidden)]
pub use pipe::AsyncReader;

use std::sync::Arc;

use log::{info, warn};

use dmaflow_core::error::{Error, Result};
use dmaflow_core::plugin::DeviceArgs;

/// An opened FT601 transport.
///
/// # Examples
///
/// ```no_run
/// use dmaflow_fpga::Ft601;
/// use dmaflow_core::plugin::DeviceArgs;
///
/// let ft601 = Ft601::open(&DeviceArgs::new()).unwrap();
/// let mut reader = ft601.channel().async_reader().unwrap();
/// ```
pub struct Ft601 {
    channel: Arc<Channel>,
}

impl Ft601 {
    /// Opens the FT601 and validates its chip configuration.
    ///
    /// The `device` argument selects among multiple attached boards.
    /// A chip that is not in FIFO 245 / single channel mode is
    /// reconfigured on the fly; failing that the open fails.
    pub fn open(args: &DeviceArgs) -> Result<Self> {
        let device_index = args
            .get("device")
            .map(|index| {
                index
                    .parse::<usize>()
                    .map_err(|_| Error::Device("invalid device index"))
            })
            .transpose()?
            .unwrap_or(0);

        let backend: Arc<dyn ft60x::Ft60xBackend> = Arc::from(ft60x::open_backend(device_index)?);

        let mut config = backend.config()?;
        if !config.is_valid_fpga_config() {
            warn!("bad ftdi configuration, setting chip config to fifo 245, 1 channel, no optional features");
            config.set_fpga_defaults();
            backend.set_config(&config)?;
        }
        info!(
            "ft601 ready: fifo_mode={} channel_config={}",
            config.fifo_mode, config.channel_config
        );

        Ok(Self {
            channel: Arc::new(Channel::new(backend)),
        })
    }

    /// The synchronous transfer channel.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }
}
