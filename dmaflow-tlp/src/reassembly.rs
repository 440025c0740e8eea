/*!
Completion reassembly.

Memory read completions arrive fragmented and possibly out of order. The
sinks in this module route each completion payload to its destination
offset purely from the completion header (tag, byte count, lower address)
so no arrival order is assumed. Completions that do not fit the expected
shape are dropped silently; the originating request then simply never
accounts all its bytes and keeps its completion flag unset.
*/

use crate::codec::{self, Completion, Tlp};
use crate::tag;

use dmaflow_core::mem::ScatterRequest;

use log::{trace, warn};

use std::cmp::min;

/// Reassembles completions of a contiguous memory read.
///
/// Data is placed at `page * 0x1000 + span - byte_count` where `page` is
/// the tag value and `span` the read length within the page.
pub struct MemReadSink<'a> {
    buf: &'a mut [u8],
    received: usize,
}

impl<'a> MemReadSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, received: 0 }
    }

    /// Total payload bytes placed so far.
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn push_tlp(&mut self, raw: &[u8]) {
        if let Ok(Tlp::Completion(c)) = codec::parse(raw) {
            self.push(&c);
        }
    }

    pub fn push(&mut self, c: &Completion) {
        if !c.has_data || c.status != 0 {
            return;
        }
        let page = usize::from(c.tag) << 12;
        if page >= self.buf.len() {
            return;
        }
        let span = min(0x1000, self.buf.len() - page);
        if c.remaining() > span {
            return;
        }
        let o = page + span - c.remaining();
        if o + c.data.len() > self.buf.len() {
            return;
        }
        self.buf[o..o + c.data.len()].copy_from_slice(c.data);
        self.received += c.data.len();
    }
}

/// Collects page probe results.
///
/// A probe transmits one dword read per page with the page index split
/// between the tag (high bits) and the low address bits of the read
/// itself; a data completion marks the page readable.
pub struct ProbeSink<'a> {
    map: &'a mut [u8],
    hits: usize,
}

impl<'a> ProbeSink<'a> {
    pub fn new(map: &'a mut [u8]) -> Self {
        Self { map, hits: 0 }
    }

    /// Number of pages marked readable so far.
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn push_tlp(&mut self, raw: &[u8]) {
        if let Ok(Tlp::Completion(c)) = codec::parse(raw) {
            self.push(&c);
        }
    }

    pub fn push(&mut self, c: &Completion) {
        if !c.has_data {
            return;
        }
        let i = (usize::from(c.tag) << 5) | usize::from((c.lower_address >> 2) & 0x1f);
        if i < self.map.len() {
            self.map[i] = 1;
            self.hits += 1;
        }
    }
}

/// Reassembles completions of a scatter read sub-batch.
///
/// Every placed (or error-accounted) byte is added to the running total
/// so the engine can tell when the sub-batch is fully answered; placed
/// bytes are additionally accounted on the owning request's auxiliary
/// stack which decides its completion flag.
pub struct ScatterSink<'r, 'a> {
    reqs: &'r mut [ScatterRequest<'a>],
    tiny: bool,
    ecc: bool,
    accounted: usize,
}

impl<'r, 'a> ScatterSink<'r, 'a> {
    pub fn new(reqs: &'r mut [ScatterRequest<'a>], tiny: bool, ecc: bool) -> Self {
        Self {
            reqs,
            tiny,
            ecc,
            accounted: 0,
        }
    }

    /// Total bytes accounted so far, error completions included.
    pub fn accounted(&self) -> usize {
        self.accounted
    }

    pub fn push_tlp(&mut self, raw: &[u8]) {
        match codec::parse(raw) {
            Ok(Tlp::Completion(c)) => self.push(&c),
            Ok(Tlp::Other { type_fmt, .. }) => {
                trace!("dropping unexpected tlp typefmt {:02x}", type_fmt)
            }
            Err(_) => warn!("malformed tlp received"),
        }
    }

    pub fn push(&mut self, c: &Completion) {
        if c.has_data && c.status == 0 {
            if self.tiny {
                self.push_tiny(c);
            } else {
                self.push_page(c);
            }
        } else if c.status != 0 {
            // error completion: account the failed span so the drain
            // loop terminates, the request flag stays unset.
            if (c.tag >> 7 != 0) != self.ecc {
                return;
            }
            self.accounted += c.remaining();
        }
    }

    fn push_tiny(&mut self, c: &Completion) {
        let (ecc, index, chunk) = tag::decode_tiny(c.tag);
        if ecc != self.ecc || index >= self.reqs.len() {
            return;
        }
        let req = &mut self.reqs[index];
        let chunk_base = chunk * tag::TINY_CHUNK;
        if chunk_base >= req.len() {
            return;
        }
        let chunk_len = min(tag::TINY_CHUNK, req.len() - chunk_base);
        if c.remaining() > chunk_len {
            return;
        }
        let o = chunk_base + chunk_len - c.remaining();
        if o + c.data.len() > chunk_base + chunk_len {
            return;
        }
        req.buf[o..o + c.data.len()].copy_from_slice(c.data);
        req.stack_add(c.data.len() as u64);
        self.accounted += c.data.len();
    }

    fn push_page(&mut self, c: &Completion) {
        let (ecc, index) = tag::decode_page(c.tag);
        if ecc != self.ecc || index >= self.reqs.len() {
            return;
        }
        let req = &mut self.reqs[index];
        let span = min(0x1000, req.len());
        if c.remaining() > span {
            return;
        }
        let o = span - c.remaining();
        if o + c.data.len() > req.len() {
            return;
        }
        req.buf[o..o + c.data.len()].copy_from_slice(c.data);
        req.stack_add(c.data.len() as u64);
        self.accounted += c.data.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tlp_type;
    use dmaflow_core::types::Address;

    fn cpld(tag: u8, byte_count: u32, lower_address: u8, data: &[u8]) -> Vec<u8> {
        let mut tlp = Vec::new();
        tlp.extend_from_slice(
            &(((u32::from(tlp_type::CPLD)) << 24) | ((data.len() as u32) >> 2)).to_be_bytes(),
        );
        tlp.extend_from_slice(&(((0x0100u32) << 16) | (byte_count & 0xfff)).to_be_bytes());
        tlp.extend_from_slice(
            &(((0x0010u32) << 16) | (u32::from(tag) << 8) | u32::from(lower_address)).to_be_bytes(),
        );
        tlp.extend_from_slice(data);
        tlp
    }

    fn cpl_err(tag: u8, byte_count: u32) -> Vec<u8> {
        let mut tlp = Vec::new();
        tlp.extend_from_slice(&((u32::from(tlp_type::CPL)) << 24).to_be_bytes());
        tlp.extend_from_slice(
            &(((0x0100u32) << 16) | (0x1 << 13) | (byte_count & 0xfff)).to_be_bytes(),
        );
        tlp.extend_from_slice(&(((0x0010u32) << 16) | (u32::from(tag) << 8)).to_be_bytes());
        tlp
    }

    #[test]
    fn test_mem_read_out_of_order() {
        let mut buf = [0u8; 0x100];
        let mut sink = MemReadSink::new(&mut buf);
        // second half before first half
        sink.push_tlp(&cpld(0, 0x80, 0x00, &[2u8; 0x80]));
        sink.push_tlp(&cpld(0, 0x100, 0x00, &[1u8; 0x80]));
        assert_eq!(sink.received(), 0x100);
        assert_eq!(&buf[..0x80], &[1u8; 0x80][..]);
        assert_eq!(&buf[0x80..], &[2u8; 0x80][..]);
    }

    #[test]
    fn test_mem_read_second_page() {
        let mut buf = vec![0u8; 0x2000];
        let mut sink = MemReadSink::new(&mut buf);
        sink.push_tlp(&cpld(1, 0x1000 & 0xfff, 0x00, &[3u8; 0x80]));
        assert_eq!(sink.received(), 0x80);
        assert_eq!(buf[0x1000], 3);
        assert_eq!(buf[0x0fff], 0);
    }

    #[test]
    fn test_probe_index() {
        let mut map = [0u8; 64];
        {
            let mut sink = ProbeSink::new(&mut map);
            sink.push_tlp(&cpld(0x01, 4, (7 << 2) as u8, &[0u8; 4]));
            assert_eq!(sink.hits(), 1);
            // out of range index dropped
            sink.push_tlp(&cpld(0x7f, 4, 0, &[0u8; 4]));
            assert_eq!(sink.hits(), 1);
        }
        assert_eq!(map[(1 << 5) | 7], 1);
        assert_eq!(map.iter().filter(|b| **b != 0).count(), 1);
    }

    #[test]
    fn test_scatter_tiny_out_of_order() {
        let mut buf0 = [0u8; 256];
        let mut reqs = [ScatterRequest::new(Address::from(0x1000u64), &mut buf0)];
        reqs[0].stack_push(0);
        {
            let mut sink = ScatterSink::new(&mut reqs, true, false);
            // chunk 1 before chunk 0
            sink.push_tlp(&cpld(tag::encode_tiny(false, 0, 1), 0x80, 0, &[2u8; 0x80]));
            sink.push_tlp(&cpld(tag::encode_tiny(false, 0, 0), 0x80, 0, &[1u8; 0x80]));
            assert_eq!(sink.accounted(), 256);
        }
        assert_eq!(reqs[0].stack_pop(), 256);
        assert_eq!(&reqs[0].buf[..0x80], &[1u8; 0x80][..]);
        assert_eq!(&reqs[0].buf[0x80..], &[2u8; 0x80][..]);
    }

    #[test]
    fn test_scatter_tiny_split_chunk() {
        let mut buf0 = [0u8; 128];
        let mut reqs = [ScatterRequest::new(Address::from(0x1000u64), &mut buf0)];
        reqs[0].stack_push(0);
        let mut sink = ScatterSink::new(&mut reqs, true, false);
        // 128-byte chunk answered by two 64-byte completions, reversed
        sink.push_tlp(&cpld(tag::encode_tiny(false, 0, 0), 0x40, 0x40, &[2u8; 0x40]));
        sink.push_tlp(&cpld(tag::encode_tiny(false, 0, 0), 0x80, 0x00, &[1u8; 0x40]));
        assert_eq!(sink.accounted(), 128);
    }

    #[test]
    fn test_scatter_page_offsets() {
        let mut buf0 = vec![0u8; 0x1000];
        let mut reqs = [ScatterRequest::new(Address::from(0x1000u64), &mut buf0)];
        reqs[0].stack_push(0);
        {
            let mut sink = ScatterSink::new(&mut reqs, false, true);
            // byte count 0 denotes the full 0x1000 remaining
            sink.push_tlp(&cpld(tag::encode_page(true, 0), 0, 0, &[1u8; 0x800]));
            sink.push_tlp(&cpld(tag::encode_page(true, 0), 0x800, 0, &[2u8; 0x800]));
            assert_eq!(sink.accounted(), 0x1000);
        }
        assert_eq!(reqs[0].stack_pop(), 0x1000);
        assert_eq!(reqs[0].buf[0x7ff], 1);
        assert_eq!(reqs[0].buf[0x800], 2);
    }

    #[test]
    fn test_scatter_ecc_mismatch_dropped() {
        let mut buf0 = [0u8; 64];
        let mut reqs = [ScatterRequest::new(Address::from(0x1000u64), &mut buf0)];
        reqs[0].stack_push(0);
        let mut sink = ScatterSink::new(&mut reqs, false, false);
        sink.push_tlp(&cpld(tag::encode_page(true, 0), 0x40, 0, &[1u8; 0x40]));
        assert_eq!(sink.accounted(), 0);
    }

    #[test]
    fn test_scatter_error_completion_accounted() {
        let mut buf0 = [0u8; 64];
        let mut reqs = [ScatterRequest::new(Address::from(0x1000u64), &mut buf0)];
        reqs[0].stack_push(0);
        {
            let mut sink = ScatterSink::new(&mut reqs, false, false);
            sink.push_tlp(&cpl_err(tag::encode_page(false, 0), 0x40));
            assert_eq!(sink.accounted(), 0x40);
        }
        // nothing was copied, the per-request account stays zero
        assert_eq!(reqs[0].stack_pop(), 0);
        assert_eq!(reqs[0].buf, &[0u8; 64]);
    }
}
