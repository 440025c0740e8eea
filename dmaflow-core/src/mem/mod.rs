/*!
This module covers the memory acquisition contract shared by all device plugins.
*/

pub mod mem_map;
#[doc(hidden)]
pub use mem_map::MemoryMap;

pub mod phys;
#[doc(hidden)]
pub use phys::{CommandResult, DeviceCommand, DeviceMemory, DeviceMetadata};

pub mod scatter;
#[doc(hidden)]
pub use scatter::{ScatterRequest, SCATTER_STACK_DEPTH};
