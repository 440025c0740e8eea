// ----------------------------------------------------------------------------
// FT60x kernel driver backend.
// The ft60x driver creates a chardev at /dev/ft60x[0-3] when loaded;
// chip configuration travels over ioctls, data over plain read/write.
// ----------------------------------------------------------------------------

use super::Ft60xBackend;
use crate::chip::Config;

use std::cmp::min;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

use log::info;

use dmaflow_core::error::{Error, Result};

// NB! underlying ft60x driver cannot handle more than 0x800 bytes per write
const KERNEL_WRITE_CHUNK: usize = 0x800;

const IOCTL_FT60X_GET_CONFIG: u64 = 0;
const IOCTL_FT60X_SET_CONFIG: u64 = 1;

pub struct KernelBackend {
    file: File,
}

impl KernelBackend {
    /// Opens the first available /dev/ft60x[0-3] chardev.
    pub fn open() -> Result<Self> {
        for i in 0..4 {
            let path = format!("/dev/ft60x{}", i);
            if let Ok(file) = OpenOptions::new().read(true).write(true).open(&path) {
                info!("using ft60x kernel driver: {}", path);
                return Ok(Self { file });
            }
        }
        Err(Error::Device("unable to open /dev/ft60x[0-3]"))
    }
}

impl Ft60xBackend for KernelBackend {
    fn config(&self) -> Result<Config> {
        // all-zeroes is a valid (if nonsensical) bit pattern for the pod
        let mut config: Config = unsafe { std::mem::zeroed() };
        let res = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_FT60X_GET_CONFIG,
                &mut config as *mut Config,
            )
        };
        if res == 0 {
            Ok(config)
        } else {
            Err(Error::Device("unable to get ft60x config"))
        }
    }

    fn set_config(&self, config: &Config) -> Result<()> {
        let res = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_FT60X_SET_CONFIG,
                config as *const Config,
            )
        };
        if res == 0 {
            Ok(())
        } else {
            Err(Error::Device("unable to set ft60x config"))
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        // NB! the driver won't return all data on the usb core queue in
        // the first read so a second pass is always taken.
        let mut total = 0;
        for _ in 0..2 {
            total += read_drain(&self.file, &mut buf[total..])?;
        }
        Ok(total)
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        // split larger writes into smaller chunks the driver can handle
        let mut total = 0;
        while total < data.len() {
            let chunk = min(KERNEL_WRITE_CHUNK, data.len() - total);
            let written = (&self.file)
                .write(&data[total..total + chunk])
                .map_err(|_| Error::Transport("unable to write to ft60x chardev"))?;
            if written == 0 {
                // no bytes transmitted -> error
                return Err(Error::Transport("unable to write to ft60x chardev"));
            }
            total += written;
        }
        Ok(())
    }
}

/// Reads until the driver stops returning full 0x1000 blocks.
///
/// The driver has a maximum transfer size per read, multiple reads may
/// be required to retrieve all queued data.
fn read_drain(mut file: &File, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    loop {
        let read = file
            .read(&mut buf[total..])
            .map_err(|_| Error::Transport("unable to read from ft60x chardev"))?;
        total += read;
        if read == 0 || (read % 0x1000) != 0 || total >= buf.len() {
            return Ok(total);
        }
    }
}
