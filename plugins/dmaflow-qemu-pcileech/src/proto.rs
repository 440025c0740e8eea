/*!
Wire format of the qemu pcileech device protocol.

Requests are 24 bytes: a command byte, 7 reserved bytes, address and
length as little-endian qwords. Responses are 16 bytes: a little-endian
result dword mirroring qemu's MemTxResult, 4 reserved bytes and the
length of the payload that follows.
*/

pub const REQUEST_SIZE: usize = 24;
pub const RESPONSE_SIZE: usize = 16;

pub mod cmd {
    pub const READ: u8 = 0;
    pub const WRITE: u8 = 1;
}

pub const RESULT_OK: u32 = 0;

bitflags::bitflags! {
    /// The named bits of qemu's MemTxResult.
    pub struct ResultFlags: u32 {
        const DEVICE_ERROR = 1 << 0;
        const DECODE_ERROR = 1 << 1;
        const ACCESS_DENIED = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub command: u8,
    pub addr: u64,
    pub len: u64,
}

impl Request {
    pub fn new(command: u8, addr: u64, len: u64) -> Self {
        Self { command, addr, len }
    }

    pub fn encode(&self) -> [u8; REQUEST_SIZE] {
        let mut out = [0u8; REQUEST_SIZE];
        out[0] = self.command;
        out[8..16].copy_from_slice(&self.addr.to_le_bytes());
        out[16..24].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; REQUEST_SIZE]) -> Self {
        let qword = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[i..i + 8]);
            u64::from_le_bytes(b)
        };
        Self {
            command: raw[0],
            addr: qword(8),
            len: qword(16),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Response {
    pub result: u32,
    pub len: u64,
}

impl Response {
    pub fn new(result: u32, len: u64) -> Self {
        Self { result, len }
    }

    pub fn encode(&self) -> [u8; RESPONSE_SIZE] {
        let mut out = [0u8; RESPONSE_SIZE];
        out[0..4].copy_from_slice(&self.result.to_le_bytes());
        out[8..16].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; RESPONSE_SIZE]) -> Self {
        let mut result = [0u8; 4];
        result.copy_from_slice(&raw[0..4]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&raw[8..16]);
        Self {
            result: u32::from_le_bytes(result),
            len: u64::from_le_bytes(len),
        }
    }
}

/// Renders a nonzero result for the log.
///
/// The three known bits get their qemu meaning; any other bit is
/// reported verbatim without inventing semantics for it.
pub fn describe_result(result: u32) -> String {
    let known = ResultFlags::from_bits_truncate(result);
    let mut parts: Vec<String> = Vec::new();
    if known.contains(ResultFlags::DEVICE_ERROR) {
        parts.push("device returned an error".to_string());
    }
    if known.contains(ResultFlags::DECODE_ERROR) {
        parts.push("nothing on this address".to_string());
    }
    if known.contains(ResultFlags::ACCESS_DENIED) {
        parts.push("access denied".to_string());
    }
    let unknown = result & !ResultFlags::all().bits();
    if unknown != 0 {
        parts.push(format!("unknown bits {:#x}", unknown));
    }
    format!("{} (result {:#010x})", parts.join(", "), result)
}
