/*!
Read request tag allocation.

The 8-bit TLP tag routes every completion back to its originating scatter
request. The top bit is an epoch ("ECC") bit which alternates per
sub-batch so stale completions of the previous sub-batch can be told
apart and dropped.

Two layouts are used:

- page mode: `ecc | index(7)`: one request per tag, up to 128 requests
  per sub-batch, data offsets derived from the completion byte count.
- tiny mode: `ecc | index(2) | chunk(5)`: a request is split into
  128-byte read chunks and the chunk number travels in the tag, making
  the data offset recoverable from the tag alone. Up to 4 requests of up
  to 32 chunks (4KB) per sub-batch. Completions may arrive in any order.
*/

/// Read chunk size in tiny mode.
pub const TINY_CHUNK: usize = 128;

/// Requests per sub-batch in tiny mode.
pub const TINY_BATCH: usize = 4;

/// Requests per sub-batch in page mode.
pub const PAGE_BATCH: usize = 128;

#[inline]
pub fn encode_tiny(ecc: bool, index: usize, chunk: usize) -> u8 {
    ((ecc as u8) << 7) | (((index & 0x3) as u8) << 5) | ((chunk & 0x1f) as u8)
}

#[inline]
pub fn decode_tiny(tag: u8) -> (bool, usize, usize) {
    ((tag >> 7) != 0, ((tag >> 5) & 0x3) as usize, (tag & 0x1f) as usize)
}

#[inline]
pub fn encode_page(ecc: bool, index: usize) -> u8 {
    ((ecc as u8) << 7) | ((index & 0x7f) as u8)
}

#[inline]
pub fn decode_page(tag: u8) -> (bool, usize) {
    ((tag >> 7) != 0, (tag & 0x7f) as usize)
}
