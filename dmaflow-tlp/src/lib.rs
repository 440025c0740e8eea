/*!
PCIe transaction layer packet (TLP) plumbing for dmaflow devices.

TLP capable devices only move raw packets; the codec, the completion
reassembly and the scatter-gather engine in this crate are shared by all
of them.
*/

pub mod codec;
#[doc(hidden)]
pub use codec::*;

pub mod tag;

pub mod reassembly;
#[doc(hidden)]
pub use reassembly::*;

pub mod engine;
#[doc(hidden)]
pub use engine::*;
