use super::{MemoryMap, ScatterRequest};
use crate::error::{Error, Result};
use crate::types::Address;

use std::time::Duration;

/// Static information about an opened device.
#[derive(Clone, Debug)]
pub struct DeviceMetadata {
    /// Maximum addressable physical address of the device.
    pub max_address: Address,
    /// Whether the underlying memory is volatile (live hardware) or a
    /// static snapshot.
    pub volatile: bool,
}

/// Vendor specific commands understood by some devices.
///
/// Devices that do not implement a command return `Error::Device`.
pub enum DeviceCommand<'a> {
    /// Transmits a raw transaction layer packet. The buffer has to be at
    /// least one header (12 bytes) and a multiple of 4 bytes.
    WriteTlp(&'a [u8]),
    /// Passively receives and traces incoming transaction layer packets
    /// for the given duration.
    ListenTlp(Duration),
    /// Probes which pages starting at `addr` are readable. Returns a
    /// `CommandResult::ProbeMap` with one byte per page (1 = readable).
    Probe { addr: Address, pages: u32 },
}

/// Result of a vendor specific command.
pub enum CommandResult {
    None,
    ProbeMap(Vec<u8>),
}

/// The `DeviceMemory` trait is implemented by device plugins
/// and provides a generic way to read and write physical memory.
///
/// The scatter operations are the primitive: each request in the batch is
/// independent and reports success solely through its completion flag.
/// An `Err` return is reserved for channel level failures; per-request
/// failures leave the flag unset and let the rest of the batch proceed.
///
/// # Examples
///
/// Implementing `DeviceMemory` for a memory backend:
/// ```
/// use dmaflow_core::mem::{DeviceMemory, DeviceMetadata, MemoryMap, ScatterRequest};
/// use dmaflow_core::error::Result;
///
/// pub struct MemoryBackend {
///     mem: Box<[u8]>,
/// }
///
/// impl DeviceMemory for MemoryBackend {
///     fn read_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
///         for req in reqs.iter_mut() {
///             let addr = req.addr.as_usize();
///             if addr + req.len() <= self.mem.len() {
///                 let len = req.len();
///                 req.buf.copy_from_slice(&self.mem[addr..addr + len]);
///                 req.set_completed();
///             }
///         }
///         Ok(())
///     }
///
///     fn write_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
///         for req in reqs.iter_mut() {
///             let addr = req.addr.as_usize();
///             if addr + req.len() <= self.mem.len() {
///                 self.mem[addr..addr + req.len()].copy_from_slice(req.buf);
///                 req.set_completed();
///             }
///         }
///         Ok(())
///     }
///
///     fn metadata(&self) -> DeviceMetadata {
///         DeviceMetadata {
///             max_address: self.mem.len().into(),
///             volatile: false,
///         }
///     }
/// }
/// ```
pub trait DeviceMemory
where
    Self: Send,
{
    fn read_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()>;
    fn write_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()>;
    fn metadata(&self) -> DeviceMetadata;

    /// Returns the memory-region map of the device.
    ///
    /// The default is a single identity region up to the maximum address.
    fn memory_map(&self) -> MemoryMap {
        MemoryMap::identity(self.metadata().max_address.as_usize())
    }

    /// Reads a contiguous physical memory range into `out`.
    fn read_into(&mut self, addr: Address, out: &mut [u8]) -> Result<()> {
        let mut reqs = [ScatterRequest::new(addr, out)];
        self.read_scatter(&mut reqs)?;
        if reqs[0].is_completed() {
            Ok(())
        } else {
            Err(Error::Partial)
        }
    }

    /// Reads a contiguous physical memory range.
    fn read_raw(&mut self, addr: Address, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(addr, &mut buf)?;
        Ok(buf)
    }

    /// Writes `data` to a contiguous physical memory range.
    fn write(&mut self, addr: Address, data: &[u8]) -> Result<()> {
        // scatter buffers are mutable; writes only ever read from them.
        let mut copy = data.to_vec();
        let mut reqs = [ScatterRequest::new(addr, &mut copy)];
        self.write_scatter(&mut reqs)?;
        if reqs[0].is_completed() {
            Ok(())
        } else {
            Err(Error::Partial)
        }
    }

    /// Dispatches a vendor specific command.
    fn command(&mut self, _cmd: DeviceCommand) -> Result<CommandResult> {
        Err(Error::Device("device does not support vendor commands"))
    }
}

// forward impls
impl<T: DeviceMemory + ?Sized, P: std::ops::DerefMut<Target = T> + Send> DeviceMemory for P {
    fn read_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
        (**self).read_scatter(reqs)
    }

    fn write_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
        (**self).write_scatter(reqs)
    }

    fn metadata(&self) -> DeviceMetadata {
        (**self).metadata()
    }

    fn memory_map(&self) -> MemoryMap {
        (**self).memory_map()
    }

    fn command(&mut self, cmd: DeviceCommand) -> Result<CommandResult> {
        (**self).command(cmd)
    }
}
