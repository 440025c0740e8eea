/*!
PCIe transaction layer packet (TLP) encoding and decoding.

TLPs travel as a sequence of big-endian dwords. The first dword carries the
TypeFmt byte and the payload length in dwords, the following dwords are
type specific. Only the packet types the supported devices actually emit
and consume are modelled; everything else parses as an opaque packet.
*/

use dmaflow_core::error::{Error, Result};

use std::fmt;

/// TLP TypeFmt byte values.
pub mod tlp_type {
    pub const MRD32: u8 = 0x00;
    pub const MRD64: u8 = 0x20;
    pub const MWR32: u8 = 0x40;
    pub const MWR64: u8 = 0x60;
    pub const IO_RD: u8 = 0x02;
    pub const IO_WR: u8 = 0x42;
    pub const CFG_RD0: u8 = 0x04;
    pub const CFG_WR0: u8 = 0x44;
    pub const CPL: u8 = 0x0a;
    pub const CPLD: u8 = 0x4a;
    pub const CPL_LK: u8 = 0x0b;
    pub const CPLD_LK: u8 = 0x4b;
}

/// Maximum size of a single TLP in bytes (header + payload).
pub const TLP_MAX_SIZE: usize = 0x1000 + 0x10;

/// Minimum size of a TLP header in bytes.
pub const TLP_MIN_SIZE: usize = 12;

#[inline]
fn push_dword(out: &mut Vec<u8>, dw: u32) {
    out.extend_from_slice(&dw.to_be_bytes());
}

#[inline]
fn read_dword(tlp: &[u8], i: usize) -> u32 {
    u32::from_be_bytes([tlp[i], tlp[i + 1], tlp[i + 2], tlp[i + 3]])
}

/// Appends a memory read request TLP to `out`.
///
/// `len` is the read length in bytes and has to be a dword multiple.
/// The 32-bit header variant is chosen whenever the address fits in
/// 32 bits, the 64-bit variant otherwise.
pub fn encode_mem_read(
    out: &mut Vec<u8>,
    requester_id: u16,
    tag: u8,
    addr: u64,
    len: usize,
    first_be: u8,
    last_be: u8,
) {
    let len_dw = ((len >> 2) & 0x3ff) as u32;
    let dw1 = (u32::from(requester_id) << 16)
        | (u32::from(tag) << 8)
        | (u32::from(last_be & 0xf) << 4)
        | u32::from(first_be & 0xf);
    if addr < (1u64 << 32) {
        push_dword(out, (u32::from(tlp_type::MRD32) << 24) | len_dw);
        push_dword(out, dw1);
        push_dword(out, (addr as u32) & !0x3);
    } else {
        push_dword(out, (u32::from(tlp_type::MRD64) << 24) | len_dw);
        push_dword(out, dw1);
        push_dword(out, (addr >> 32) as u32);
        push_dword(out, (addr as u32) & !0x3);
    }
}

/// Appends a memory write request TLP to `out`.
///
/// `data` is copied behind the header and padded up to a full dword.
/// The byte-enable nibbles select the valid byte lanes of the first and
/// last payload dword; a zero `last_be` denotes a single-dword write.
pub fn encode_mem_write(
    out: &mut Vec<u8>,
    requester_id: u16,
    addr: u64,
    first_be: u8,
    last_be: u8,
    data: &[u8],
) {
    let len_dw = (((data.len() + 3) >> 2) & 0x3ff) as u32;
    let dw1 = (u32::from(requester_id) << 16)
        | (u32::from(last_be & 0xf) << 4)
        | u32::from(first_be & 0xf);
    if addr < (1u64 << 32) {
        push_dword(out, (u32::from(tlp_type::MWR32) << 24) | len_dw);
        push_dword(out, dw1);
        push_dword(out, (addr as u32) & !0x3);
    } else {
        push_dword(out, (u32::from(tlp_type::MWR64) << 24) | len_dw);
        push_dword(out, dw1);
        push_dword(out, (addr >> 32) as u32);
        push_dword(out, (addr as u32) & !0x3);
    }
    out.extend_from_slice(data);
    // pad the payload to a full dword
    for _ in 0..((4 - (data.len() & 0x3)) & 0x3) {
        out.push(0);
    }
}

/// A parsed completion TLP (`CplD` / `Cpl`).
#[derive(Debug)]
pub struct Completion<'a> {
    /// true for `CplD` (with data), false for `Cpl`.
    pub has_data: bool,
    /// Completion status, 0 on success.
    pub status: u8,
    pub completer_id: u16,
    pub requester_id: u16,
    pub tag: u8,
    /// Remaining byte count including this completion. A value of 0
    /// denotes the maximum of 0x1000 bytes.
    pub byte_count: u32,
    /// Low 7 bits of the completed address.
    pub lower_address: u8,
    pub data: &'a [u8],
}

impl<'a> Completion<'a> {
    /// Remaining byte count with the on-wire 0 decoded to 0x1000.
    pub fn remaining(&self) -> usize {
        if self.byte_count == 0 {
            0x1000
        } else {
            self.byte_count as usize
        }
    }
}

/// A parsed incoming TLP.
#[derive(Debug)]
pub enum Tlp<'a> {
    Completion(Completion<'a>),
    /// Any non-completion packet, surfaced opaquely.
    Other { type_fmt: u8, raw: &'a [u8] },
}

/// Parses a single raw TLP.
///
/// The packet has to be at least one header and a dword multiple in size,
/// and a completion with data has to carry its full payload.
pub fn parse(tlp: &[u8]) -> Result<Tlp<'_>> {
    if tlp.len() < TLP_MIN_SIZE || (tlp.len() & 0x3) != 0 {
        return Err(Error::Protocol("malformed tlp received"));
    }
    let dw0 = read_dword(tlp, 0);
    let type_fmt = (dw0 >> 24) as u8;
    match type_fmt {
        tlp_type::CPL | tlp_type::CPLD | tlp_type::CPL_LK | tlp_type::CPLD_LK => {
            let has_data = (type_fmt & 0x40) != 0;
            let len_dw = (dw0 & 0x3ff) as usize;
            let data = if has_data {
                if tlp.len() < TLP_MIN_SIZE + (len_dw << 2) {
                    return Err(Error::Protocol("truncated completion received"));
                }
                &tlp[TLP_MIN_SIZE..TLP_MIN_SIZE + (len_dw << 2)]
            } else {
                &[][..]
            };
            let dw1 = read_dword(tlp, 4);
            let dw2 = read_dword(tlp, 8);
            Ok(Tlp::Completion(Completion {
                has_data,
                status: ((dw1 >> 13) & 0x7) as u8,
                completer_id: (dw1 >> 16) as u16,
                requester_id: (dw2 >> 16) as u16,
                tag: (dw2 >> 8) as u8,
                byte_count: dw1 & 0xfff,
                lower_address: (dw2 & 0x7f) as u8,
                data,
            }))
        }
        _ => Ok(Tlp::Other { type_fmt, raw: tlp }),
    }
}

/// Short single-line summary of a TLP for trace logging.
pub struct TlpSummary<'a>(pub &'a [u8]);

impl<'a> fmt::Display for TlpSummary<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tlp = self.0;
        if tlp.len() < TLP_MIN_SIZE || (tlp.len() & 0x3) != 0 {
            return write!(f, "tlp??? ({} bytes)", tlp.len());
        }
        let dw0 = read_dword(tlp, 0);
        let dw1 = read_dword(tlp, 4);
        let dw2 = read_dword(tlp, 8);
        let type_fmt = (dw0 >> 24) as u8;
        let len_dw = dw0 & 0x3ff;
        match type_fmt {
            tlp_type::CPL | tlp_type::CPLD | tlp_type::CPL_LK | tlp_type::CPLD_LK => write!(
                f,
                "{} len {:03x} cplid {:04x} status {:x} bc {:03x} reqid {:04x} tag {:02x} lowaddr {:02x}",
                if (type_fmt & 0x40) != 0 { "CplD" } else { "Cpl" },
                len_dw,
                dw1 >> 16,
                (dw1 >> 13) & 0x7,
                dw1 & 0xfff,
                dw2 >> 16,
                (dw2 >> 8) & 0xff,
                dw2 & 0x7f
            ),
            tlp_type::MRD32 | tlp_type::MWR32 => write!(
                f,
                "{} len {:03x} reqid {:04x} tag {:02x} be_fl {:x}{:x} addr {:08x}",
                if type_fmt == tlp_type::MRD32 { "MRd32" } else { "MWr32" },
                len_dw,
                dw1 >> 16,
                (dw1 >> 8) & 0xff,
                dw1 & 0xf,
                (dw1 >> 4) & 0xf,
                dw2
            ),
            tlp_type::MRD64 | tlp_type::MWR64 => {
                let addr = (u64::from(dw2) << 32) | u64::from(read_dword(tlp, 12));
                write!(
                    f,
                    "{} len {:03x} reqid {:04x} tag {:02x} be_fl {:x}{:x} addr {:016x}",
                    if type_fmt == tlp_type::MRD64 { "MRd64" } else { "MWr64" },
                    len_dw,
                    dw1 >> 16,
                    (dw1 >> 8) & 0xff,
                    dw1 & 0xf,
                    (dw1 >> 4) & 0xf,
                    addr
                )
            }
            _ => write!(f, "tlp typefmt {:02x} len {:03x}", type_fmt, len_dw),
        }
    }
}
