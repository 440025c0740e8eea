/*!
Wire frames of the SP605/MicroBlaze tcp protocol.

Every frame is 5 bytes: a flags byte followed by a dword. TLP dwords
travel with their big-endian wire value stored little-endian in the
frame; status replies carry a plain little-endian value.
*/

/// Frame flag bits.
pub mod flag {
    /// The frame carries a TLP dword.
    pub const HAS_DATA: u8 = 0x01;
    /// Request the device to transmit pending reply TLPs.
    pub const RECV_REPLY: u8 = 0x02;
    /// Last dword of a TLP.
    pub const TLAST: u8 = 0x04;
    /// The device had no TLP to deliver within its timeout.
    pub const TIMEOUT: u8 = 0x08;
    /// The device failed to receive a TLP.
    pub const ERROR: u8 = 0x10;
    /// Request/carry the pcie link status.
    pub const STATUS: u8 = 0x20;
}

pub const FRAME_SIZE: usize = 5;

/// Encodes a control frame without payload.
pub fn encode_control(flags: u8) -> [u8; FRAME_SIZE] {
    [flags, 0, 0, 0, 0]
}

/// Encodes one TLP dword, given in wire (big-endian) byte order.
pub fn encode_data(flags: u8, dword: [u8; 4]) -> [u8; FRAME_SIZE] {
    let d = u32::from_be_bytes(dword).to_le_bytes();
    [flags, d[0], d[1], d[2], d[3]]
}

pub fn flags(frame: &[u8]) -> u8 {
    frame[0]
}

/// The TLP dword of a frame, back in wire (big-endian) byte order.
pub fn decode_dword(frame: &[u8]) -> [u8; 4] {
    u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]).to_be_bytes()
}

/// The payload of a status reply.
pub fn decode_status(frame: &[u8]) -> u32 {
    u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frame() {
        assert_eq!(
            encode_control(flag::RECV_REPLY | flag::TIMEOUT),
            [0x0a, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_data_frame_byte_order() {
        // a TLP dword is stored byte-reversed in the frame
        let frame = encode_data(flag::HAS_DATA | flag::TLAST, [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(frame, [0x05, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(decode_dword(&frame), [0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_status_little_endian() {
        let frame = [flag::STATUS | flag::HAS_DATA, 0x21, 0x43, 0x00, 0x00];
        assert_eq!(decode_status(&frame), 0x4321);
    }
}
