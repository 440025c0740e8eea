// ----------------------------------------------------------------------------
// D3XX library backend for macOS.
// The proprietary libftd3xx.dylib is loaded at runtime and resolved into
// typed symbols; no link-time dependency exists.
// ----------------------------------------------------------------------------

use super::{Ft60xBackend, FTDI_ENDPOINT_IN, FTDI_ENDPOINT_OUT};
use crate::chip::Config;

use std::os::raw::c_void;

use libloading::Library;
use log::info;

use dmaflow_core::error::{Error, Result};

const D3XX_LIBRARY: &str = "libftd3xx.dylib";

const FT_OPEN_BY_INDEX: u32 = 0x10;

type FtHandle = *mut c_void;

type FnCreate = unsafe extern "C" fn(*mut c_void, u32, *mut FtHandle) -> u32;
type FnClose = unsafe extern "C" fn(FtHandle) -> u32;
type FnGetChipConfiguration = unsafe extern "C" fn(FtHandle, *mut c_void) -> u32;
type FnSetChipConfiguration = unsafe extern "C" fn(FtHandle, *mut c_void) -> u32;
type FnWritePipe = unsafe extern "C" fn(FtHandle, u8, *const u8, u32, *mut u32, u32) -> u32;
type FnReadPipe = unsafe extern "C" fn(FtHandle, u8, *mut u8, u32, *mut u32, u32) -> u32;

pub struct D3xxBackend {
    // keeps the resolved symbols below alive
    _library: Library,
    handle: FtHandle,
    ft_close: FnClose,
    ft_get_chip_configuration: FnGetChipConfiguration,
    ft_set_chip_configuration: FnSetChipConfiguration,
    ft_write_pipe: FnWritePipe,
    ft_read_pipe: FnReadPipe,
}

// the D3XX handle may be used from any thread, serialization is owned
// by the channel layer
unsafe impl Send for D3xxBackend {}
unsafe impl Sync for D3xxBackend {}

fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T> {
    unsafe {
        library
            .get::<T>(name)
            .map(|sym| *sym)
            .map_err(|_| Error::Device("unable to find function in d3xx library"))
    }
}

impl D3xxBackend {
    /// Loads libftd3xx.dylib and opens the `device_index`-th FT60x.
    pub fn open(device_index: usize) -> Result<Self> {
        let library =
            Library::new(D3XX_LIBRARY).map_err(|_| Error::Device("unable to open d3xx library"))?;

        let ft_create: FnCreate = symbol(&library, b"FT_Create")?;
        let ft_close: FnClose = symbol(&library, b"FT_Close")?;
        let ft_get_chip_configuration: FnGetChipConfiguration =
            symbol(&library, b"FT_GetChipConfiguration")?;
        let ft_set_chip_configuration: FnSetChipConfiguration =
            symbol(&library, b"FT_SetChipConfiguration")?;
        let ft_write_pipe: FnWritePipe = symbol(&library, b"FT_WritePipe")?;
        let ft_read_pipe: FnReadPipe = symbol(&library, b"FT_ReadPipe")?;

        let mut handle: FtHandle = std::ptr::null_mut();
        let rc = unsafe { ft_create(device_index as *mut c_void, FT_OPEN_BY_INDEX, &mut handle) };
        if rc != 0 || handle.is_null() {
            return Err(Error::Device("unable to create d3xx device"));
        }
        info!("opened d3xx device {}", device_index);

        Ok(Self {
            _library: library,
            handle,
            ft_close,
            ft_get_chip_configuration,
            ft_set_chip_configuration,
            ft_write_pipe,
            ft_read_pipe,
        })
    }
}

impl Drop for D3xxBackend {
    fn drop(&mut self) {
        unsafe { (self.ft_close)(self.handle) };
    }
}

impl Ft60xBackend for D3xxBackend {
    fn config(&self) -> Result<Config> {
        let mut config: Config = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            (self.ft_get_chip_configuration)(self.handle, &mut config as *mut Config as *mut c_void)
        };
        if rc == 0 {
            Ok(config)
        } else {
            Err(Error::Device("unable to get ft60x config"))
        }
    }

    fn set_config(&self, config: &Config) -> Result<()> {
        let mut copy = config.clone();
        let rc = unsafe {
            (self.ft_set_chip_configuration)(self.handle, &mut copy as *mut Config as *mut c_void)
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(Error::Device("unable to set ft60x config"))
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut transferred = 0u32;
        let rc = unsafe {
            (self.ft_read_pipe)(
                self.handle,
                FTDI_ENDPOINT_IN,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut transferred,
                1000,
            )
        };
        if rc == 0 {
            Ok(transferred as usize)
        } else {
            Err(Error::Transport("unable to read from ft60x"))
        }
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        let mut transferred = 0u32;
        let rc = unsafe {
            (self.ft_write_pipe)(
                self.handle,
                FTDI_ENDPOINT_OUT,
                data.as_ptr(),
                data.len() as u32,
                &mut transferred,
                1000,
            )
        };
        if rc == 0 && transferred as usize == data.len() {
            Ok(())
        } else {
            Err(Error::Transport("unable to write to ft60x"))
        }
    }
}
