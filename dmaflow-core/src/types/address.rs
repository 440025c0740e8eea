/*!
Abstraction over a physical address on the target system.
*/

use std::fmt;
use std::ops;

/// This type represents a physical address on the target system.
/// It internally holds a `u64` value.
///
/// This type will not handle overflow for 64-bit addresses / lengths.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(u64);

impl Address {
    /// An address with the value of zero.
    pub const NULL: Address = Address(0);

    /// An address with an invalid value.
    ///
    /// Scatter requests carrying this address fail input validation
    /// and are skipped without aborting the batch.
    pub const INVALID: Address = Address(!0);

    /// Returns an address with a value of zero.
    pub const fn null() -> Self {
        Address::NULL
    }

    /// Checks whether the address is zero.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns an address with an invalid value.
    pub const fn invalid() -> Self {
        Address::INVALID
    }

    /// Checks whether the address is valid.
    pub const fn is_valid(self) -> bool {
        self.0 != !0
    }

    /// Returns the address as a `u64` value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address as a `usize` value.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Checks whether the address is aligned to `alignment` bytes.
    ///
    /// `alignment` has to be a power of two.
    pub const fn is_aligned(self, alignment: u64) -> bool {
        self.0 & (alignment - 1) == 0
    }

    /// Aligns the address down to `alignment` bytes.
    ///
    /// `alignment` has to be a power of two.
    pub const fn align_down(self, alignment: u64) -> Self {
        Address(self.0 & !(alignment - 1))
    }

    /// Checks whether the address requires the 64-bit wire representation.
    ///
    /// Addresses below 4GB fit the short 32-bit header variants.
    pub const fn is_wide(self) -> bool {
        self.0 >= (1u64 << 32)
    }
}

impl From<u32> for Address {
    fn from(item: u32) -> Self {
        Self(u64::from(item))
    }
}

impl From<u64> for Address {
    fn from(item: u64) -> Self {
        Self(item)
    }
}

impl From<usize> for Address {
    fn from(item: usize) -> Self {
        Self(item as u64)
    }
}

impl ops::Add<u64> for Address {
    type Output = Self;

    fn add(self, other: u64) -> Self {
        Self(self.0 + other)
    }
}

impl ops::Add<usize> for Address {
    type Output = Self;

    fn add(self, other: usize) -> Self {
        Self(self.0 + other as u64)
    }
}

impl ops::AddAssign<u64> for Address {
    fn add_assign(&mut self, other: u64) {
        *self = Self(self.0 + other)
    }
}

impl ops::AddAssign<usize> for Address {
    fn add_assign(&mut self, other: usize) {
        *self = Self(self.0 + other as u64)
    }
}

impl ops::Sub for Address {
    type Output = u64;

    fn sub(self, other: Self) -> u64 {
        self.0 - other.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}
