/*!
Module with basic types used in dmaflow.

It contains the physical address abstraction used throughout the
plugin contract and different size helpers.
*/

pub mod address;
#[doc(hidden)]
pub use address::Address;

pub mod size;
