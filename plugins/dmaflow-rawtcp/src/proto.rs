/*!
Wire header of the raw tcp memory protocol.

Every request and response starts with the same 24-byte little-endian
header: a command dword, 4 reserved bytes, address and length. Read
responses are followed by the payload, status responses by a single
ready byte.
*/

pub const HEADER_SIZE: usize = 24;

pub mod cmd {
    pub const STATUS: u32 = 0;
    pub const MEM_READ: u32 = 1;
    pub const MEM_WRITE: u32 = 2;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub cmd: u32,
    pub addr: u64,
    pub len: u64,
}

impl Header {
    pub fn new(cmd: u32, addr: u64, len: u64) -> Self {
        Self { cmd, addr, len }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.cmd.to_le_bytes());
        out[8..16].copy_from_slice(&self.addr.to_le_bytes());
        out[16..24].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Self {
        let dword = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self {
            cmd: dword(0),
            addr: u64::from(dword(8)) | (u64::from(dword(12)) << 32),
            len: u64::from(dword(16)) | (u64::from(dword(20)) << 32),
        }
    }
}
