/*!
This crate contains the foundation of dmaflow's physical memory acquisition.

It contains abstractions over [memory addresses](types/index.html),
[scatter-gather memory transfers](mem/index.html) and
[the device plugin interface](plugin/index.html).
*/

pub mod error;
#[doc(hidden)]
pub use error::*;

pub mod types;
#[doc(hidden)]
pub use types::*;

pub mod mem;
#[doc(hidden)]
pub use mem::*;

pub mod plugin;
#[doc(hidden)]
pub use plugin::*;
