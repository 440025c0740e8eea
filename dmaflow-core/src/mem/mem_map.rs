use crate::error::{Error, Result};
use crate::types::Address;

/// The `MemoryMap` struct describes the physical memory regions a device
/// can address and maps linear addresses to hardware specific addresses.
///
/// All memory addresses are bounds checked.
#[derive(Clone, Debug, Default)]
pub struct MemoryMap {
    mappings: Vec<MemoryMapping>,
}

#[derive(Clone, Debug)]
pub struct MemoryMapping {
    base: Address,
    size: usize,
    real_base: Address,
}

impl MemoryMapping {
    pub fn base(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn real_base(&self) -> Address {
        self.real_base
    }
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a memory map with a single identity region of `size` bytes.
    pub fn identity(size: usize) -> Self {
        let mut map = Self::new();
        map.push(Address::NULL, size, Address::NULL);
        map
    }

    /// Adds a new memory mapping to this memory map.
    pub fn push(&mut self, base: Address, size: usize, real_base: Address) {
        self.mappings.push(MemoryMapping {
            base,
            size,
            real_base,
        });
        self.mappings.sort_by_key(|m| m.base);
    }

    /// Iterator over memory mappings.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryMapping> {
        self.mappings.iter()
    }

    /// Returns the highest mapped address plus one, i.e. the maximum
    /// addressable physical address of the device.
    pub fn max_address(&self) -> Address {
        self.mappings
            .iter()
            .map(|m| m.base + m.size)
            .max()
            .unwrap_or(Address::NULL)
    }

    /// Maps a linear address to a hardware address.
    /// Returns an `Error::Bounds` error if the address does not lie within any memory region.
    pub fn map(&self, addr: Address) -> Result<Address> {
        let mapping = self
            .mappings
            .iter()
            .find(|m| m.base <= addr && addr < m.base + m.size)
            .ok_or(Error::Bounds)?;

        Ok(mapping.real_base + (addr - mapping.base))
    }
}
