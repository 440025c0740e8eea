/*!
Scatter-gather read/write engine on top of a TLP transport.

The engine owns request validation, tag allocation, the sub-batch
transmit/drain cycle and the byte-enable arithmetic of the write path.
Transports only move raw TLPs.
*/

use crate::codec::{self, TlpSummary};
use crate::reassembly::{ProbeSink, ScatterSink};
use crate::tag;

use dmaflow_core::error::Result;
use dmaflow_core::mem::ScatterRequest;
use dmaflow_core::types::Address;

use log::trace;

use std::cmp::min;

/// Maximum size of a single read request in bytes.
pub const READ_MAX_SIZE: usize = 0x1000;

/// Maximum number of pages probed per transmit/drain cycle.
pub const PROBE_MAX_PAGES: usize = 1024;

/// A transport capable of moving raw TLPs to and from a device.
pub trait TlpTransport {
    /// Queues a raw TLP for transmission.
    ///
    /// The transport coalesces queued TLPs and puts them on the wire when
    /// `flush` is set or its transmit buffer runs full. An empty `tlp`
    /// with `flush` set just drains the buffer.
    fn tx_tlp(&mut self, tlp: &[u8], flush: bool) -> Result<()>;

    /// Receives pending TLPs, handing each complete packet to `sink`.
    ///
    /// Returns once the device has no more data immediately available.
    fn rx_drain(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<()>;
}

/// Per-device parameters of the scatter engine.
#[derive(Clone, Debug)]
pub struct ScatterParams {
    /// PCIe requester id transmitted in every request TLP.
    pub requester_id: u16,
    /// Splits reads into 128-byte requests for devices with small
    /// completion credits.
    pub tiny: bool,
}

fn valid_read(req: &ScatterRequest) -> bool {
    if req.is_completed() || !req.addr.is_valid() || req.is_empty() || req.len() > READ_MAX_SIZE {
        return false;
    }
    if req.len() == READ_MAX_SIZE {
        req.addr.is_aligned(0x1000)
    } else {
        req.addr.is_aligned(8) && req.len() % 8 == 0
    }
}

/// Reads a batch of scatter requests.
///
/// Invalid requests (bad alignment, oversized, invalid address) are
/// skipped with their completion flag left unset. The batch is processed
/// in tag-space-sized sub-batches; within a sub-batch all read requests
/// are transmitted before completions are drained, so requests proceed
/// concurrently and completions may arrive in any order.
pub fn read_scatter<T: TlpTransport + ?Sized>(
    transport: &mut T,
    params: &ScatterParams,
    reqs: &mut [ScatterRequest],
) -> Result<()> {
    let stride = if params.tiny {
        tag::TINY_BATCH
    } else {
        tag::PAGE_BATCH
    };
    let mut ecc = false;
    for batch in reqs.chunks_mut(stride) {
        read_batch(transport, params, ecc, batch)?;
        ecc = !ecc;
    }
    Ok(())
}

fn read_batch<T: TlpTransport + ?Sized>(
    transport: &mut T,
    params: &ScatterParams,
    ecc: bool,
    reqs: &mut [ScatterRequest],
) -> Result<()> {
    let mut valid = [false; tag::PAGE_BATCH];
    let mut expected = 0;

    // transmit all reads of the sub-batch
    let mut tlp = Vec::with_capacity(16);
    for (i, req) in reqs.iter_mut().enumerate() {
        if !valid_read(req) {
            trace!("skipping invalid read request at {:x}", req.addr);
            continue;
        }
        valid[i] = true;
        expected += req.len();
        req.stack_push(0);
        if params.tiny {
            let mut o = 0;
            let mut chunk = 0;
            while o < req.len() {
                let cb = min(tag::TINY_CHUNK, req.len() - o);
                tlp.clear();
                codec::encode_mem_read(
                    &mut tlp,
                    params.requester_id,
                    tag::encode_tiny(ecc, i, chunk),
                    req.addr.as_u64() + o as u64,
                    cb,
                    0xf,
                    0xf,
                );
                trace!("tx: {}", TlpSummary(&tlp));
                transport.tx_tlp(&tlp, false)?;
                o += cb;
                chunk += 1;
            }
        } else {
            tlp.clear();
            codec::encode_mem_read(
                &mut tlp,
                params.requester_id,
                tag::encode_page(ecc, i),
                req.addr.as_u64(),
                req.len(),
                0xf,
                0xf,
            );
            trace!("tx: {}", TlpSummary(&tlp));
            transport.tx_tlp(&tlp, false)?;
        }
    }
    if expected == 0 {
        return Ok(());
    }
    transport.tx_tlp(&[], true)?;

    // drain completions until everything is accounted or the device
    // stops making progress
    {
        let mut sink = ScatterSink::new(reqs, params.tiny, ecc);
        loop {
            let before = sink.accounted();
            transport.rx_drain(&mut |raw| sink.push_tlp(raw))?;
            if sink.accounted() >= expected || sink.accounted() == before {
                break;
            }
        }
    }

    for (i, req) in reqs.iter_mut().enumerate() {
        if !valid[i] {
            continue;
        }
        let accounted = req.stack_pop();
        if accounted == req.len() as u64 {
            req.set_completed();
        }
    }
    Ok(())
}

/// Writes a batch of scatter requests.
///
/// Each request is transmitted independently; requests with an invalid
/// address are skipped with their completion flag left unset.
pub fn write_scatter<T: TlpTransport + ?Sized>(
    transport: &mut T,
    params: &ScatterParams,
    reqs: &mut [ScatterRequest],
) -> Result<()> {
    for req in reqs.iter_mut() {
        if req.is_completed() || !req.addr.is_valid() || req.is_empty() {
            continue;
        }
        write(transport, params, req.addr, &req.buf[..])?;
        req.set_completed();
    }
    Ok(())
}

/// Writes a contiguous memory range.
///
/// An unaligned head is fixed up with a single byte-enabled dword write,
/// the remainder is transmitted as write TLPs aligned to 128-byte
/// boundaries. The transmit buffer is flushed at the end.
pub fn write<T: TlpTransport + ?Sized>(
    transport: &mut T,
    params: &ScatterParams,
    addr: Address,
    data: &[u8],
) -> Result<()> {
    let mut addr = addr.as_u64();
    let mut data = data;

    // head dword if the target is not dword aligned
    if !data.is_empty() && (addr & 0x3) != 0 {
        let misalign = (addr & 0x3) as usize;
        let be = ((if data.len() < 3 {
            0xfu8 >> (4 - data.len())
        } else {
            0xf
        }) << misalign)
            & 0xf;
        let cb = min(data.len(), 4 - misalign);
        let mut head = [0u8; 4];
        head[misalign..misalign + cb].copy_from_slice(&data[..cb]);
        tx_write_packet(transport, params, addr & !0x3, be, 0, &head)?;
        data = &data[cb..];
        addr += cb as u64;
    }

    // 128-byte packets aligned to 128-byte boundaries
    while !data.is_empty() {
        let cb = min(128 - (addr & 0x7f) as usize, data.len());
        let be = if cb & 0x3 != 0 {
            0xf >> (4 - (cb & 0x3))
        } else {
            0xf
        };
        if cb <= 4 {
            let mut head = [0u8; 4];
            head[..cb].copy_from_slice(&data[..cb]);
            tx_write_packet(transport, params, addr, be, 0, &head)?;
        } else {
            tx_write_packet(transport, params, addr, 0xf, be, &data[..cb])?;
        }
        data = &data[cb..];
        addr += cb as u64;
    }

    transport.tx_tlp(&[], true)
}

fn tx_write_packet<T: TlpTransport + ?Sized>(
    transport: &mut T,
    params: &ScatterParams,
    addr: u64,
    first_be: u8,
    last_be: u8,
    data: &[u8],
) -> Result<()> {
    let mut tlp = Vec::with_capacity(16 + data.len());
    codec::encode_mem_write(&mut tlp, params.requester_id, addr, first_be, last_be, data);
    trace!("tx: {}", TlpSummary(&tlp));
    transport.tx_tlp(&tlp, false)
}

/// Probes which pages starting at `addr` are readable.
///
/// Transmits one dword read per page with the page index encoded into
/// the tag and the low address bits; pages answered with a data
/// completion are marked with a 1 in the result map.
pub fn probe<T: TlpTransport + ?Sized>(
    transport: &mut T,
    params: &ScatterParams,
    addr: Address,
    pages: u32,
) -> Result<Vec<u8>> {
    let mut map = vec![0u8; pages as usize];
    for (ci, chunk) in map.chunks_mut(PROBE_MAX_PAGES).enumerate() {
        let base = addr.as_u64() + ((ci * PROBE_MAX_PAGES) as u64) * 0x1000;
        probe_chunk(transport, params, base, chunk)?;
    }
    Ok(map)
}

fn probe_chunk<T: TlpTransport + ?Sized>(
    transport: &mut T,
    params: &ScatterParams,
    base: u64,
    map: &mut [u8],
) -> Result<()> {
    let mut tlp = Vec::with_capacity(16);
    for i in 0..map.len() {
        // 5 low index bits travel in the dword address, the rest in the tag
        let a = base + ((i as u64) << 12) + (((i & 0x1f) as u64) << 2);
        tlp.clear();
        codec::encode_mem_read(
            &mut tlp,
            params.requester_id,
            ((i >> 5) & 0x1f) as u8,
            a,
            4,
            0xf,
            0,
        );
        transport.tx_tlp(&tlp, false)?;
    }
    transport.tx_tlp(&[], true)?;

    // unreadable pages are simply never answered, the drain loop is
    // bounded by the no-progress check alone
    let mut sink = ProbeSink::new(map);
    loop {
        let before = sink.hits();
        transport.rx_drain(&mut |raw| sink.push_tlp(raw))?;
        if sink.hits() == before {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tlp_type;

    /// Transport emulating a memory-backed PCIe endpoint.
    struct MockTransport {
        mem: Vec<u8>,
        base: u64,
        /// maximum payload bytes per completion
        max_payload: usize,
        /// deliver completions of a flush in reverse order
        reverse: bool,
        /// answer every read with an error completion
        fail_reads: bool,
        staged: Vec<Vec<u8>>,
        pending: Vec<Vec<u8>>,
        tx_log: Vec<Vec<u8>>,
    }

    impl MockTransport {
        fn new(base: u64, size: usize) -> Self {
            let mem = (0..size).map(|i| (i % 251) as u8).collect();
            Self {
                mem,
                base,
                max_payload: 128,
                reverse: false,
                fail_reads: false,
                staged: Vec::new(),
                pending: Vec::new(),
                tx_log: Vec::new(),
            }
        }

        fn dword(tlp: &[u8], i: usize) -> u32 {
            u32::from_be_bytes([tlp[i], tlp[i + 1], tlp[i + 2], tlp[i + 3]])
        }

        fn answer_read(&mut self, tlp: &[u8]) {
            let dw0 = Self::dword(tlp, 0);
            let dw1 = Self::dword(tlp, 4);
            let tag = ((dw1 >> 8) & 0xff) as u8;
            let len_dw = (dw0 & 0x3ff) as usize;
            let len = if len_dw == 0 { 0x1000 } else { len_dw << 2 };
            let addr = if (dw0 >> 24) as u8 == tlp_type::MRD32 {
                u64::from(Self::dword(tlp, 8))
            } else {
                (u64::from(Self::dword(tlp, 8)) << 32) | u64::from(Self::dword(tlp, 12))
            };

            if self.fail_reads {
                let mut cpl = Vec::new();
                cpl.extend_from_slice(&((u32::from(tlp_type::CPL)) << 24).to_be_bytes());
                cpl.extend_from_slice(
                    &((0x0100u32 << 16) | (0x1 << 13) | ((len as u32) & 0xfff)).to_be_bytes(),
                );
                cpl.extend_from_slice(&((0x0010u32 << 16) | (u32::from(tag) << 8)).to_be_bytes());
                self.staged.push(cpl);
                return;
            }

            let mut remaining = len;
            let mut o = 0;
            while remaining > 0 {
                let cb = remaining.min(self.max_payload);
                let off = (addr + o as u64 - self.base) as usize;
                let mut cpl = Vec::new();
                cpl.extend_from_slice(
                    &(((u32::from(tlp_type::CPLD)) << 24) | ((cb as u32) >> 2)).to_be_bytes(),
                );
                cpl.extend_from_slice(
                    &((0x0100u32 << 16) | ((remaining as u32) & 0xfff)).to_be_bytes(),
                );
                cpl.extend_from_slice(
                    &((0x0010u32 << 16)
                        | (u32::from(tag) << 8)
                        | (((addr + o as u64) & 0x7f) as u32))
                        .to_be_bytes(),
                );
                cpl.extend_from_slice(&self.mem[off..off + cb]);
                self.staged.push(cpl);
                remaining -= cb;
                o += cb;
            }
        }
    }

    impl TlpTransport for MockTransport {
        fn tx_tlp(&mut self, tlp: &[u8], flush: bool) -> Result<()> {
            if !tlp.is_empty() {
                self.tx_log.push(tlp.to_vec());
                let type_fmt = tlp[0];
                if type_fmt == tlp_type::MRD32 || type_fmt == tlp_type::MRD64 {
                    self.answer_read(tlp);
                }
            }
            if flush {
                let mut staged = std::mem::replace(&mut self.staged, Vec::new());
                if self.reverse {
                    staged.reverse();
                }
                self.pending.extend(staged);
            }
            Ok(())
        }

        fn rx_drain(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<()> {
            for tlp in self.pending.drain(..) {
                sink(&tlp);
            }
            Ok(())
        }
    }

    const PARAMS: ScatterParams = ScatterParams {
        requester_id: 0x0010,
        tiny: false,
    };

    const PARAMS_TINY: ScatterParams = ScatterParams {
        requester_id: 0x0010,
        tiny: true,
    };

    #[test]
    fn test_read_scatter_page_mode() {
        let mut tp = MockTransport::new(0x1000, 0x4000);
        tp.reverse = true;

        let mut page = vec![0u8; 0x1000];
        let mut sub = vec![0u8; 0x40];
        let mut reqs = [
            ScatterRequest::new(Address::from(0x1000u64), &mut page),
            ScatterRequest::new(Address::from(0x3000u64), &mut sub),
        ];
        read_scatter(&mut tp, &PARAMS, &mut reqs).unwrap();

        assert!(reqs[0].is_completed());
        assert!(reqs[1].is_completed());
        for (i, b) in reqs[0].buf.iter().enumerate() {
            assert_eq!(*b, (i % 251) as u8);
        }
        for (i, b) in reqs[1].buf.iter().enumerate() {
            assert_eq!(*b, ((0x2000 + i) % 251) as u8);
        }
    }

    #[test]
    fn test_read_scatter_tiny_out_of_order() {
        let mut tp = MockTransport::new(0x1000, 0x1000);
        tp.reverse = true;
        tp.max_payload = 0x20;

        let mut buf = vec![0u8; 0x200];
        let mut reqs = [ScatterRequest::new(Address::from(0x1000u64), &mut buf)];
        read_scatter(&mut tp, &PARAMS_TINY, &mut reqs).unwrap();

        assert!(reqs[0].is_completed());
        for (i, b) in reqs[0].buf.iter().enumerate() {
            assert_eq!(*b, (i % 251) as u8);
        }
        // 4 chunk reads of 128 bytes each were transmitted
        assert_eq!(tp.tx_log.len(), 4);
    }

    #[test]
    fn test_read_scatter_rejects_invalid() {
        let mut tp = MockTransport::new(0x1000, 0x4000);

        let mut misaligned_len = vec![0u8; 12];
        let mut misaligned_addr = vec![0u8; 0x1000];
        let mut oversized = vec![0u8; 0x2000];
        let mut invalid = vec![0u8; 0x40];
        let mut reqs = [
            ScatterRequest::new(Address::from(0x1000u64), &mut misaligned_len),
            ScatterRequest::new(Address::from(0x1008u64), &mut misaligned_addr),
            ScatterRequest::new(Address::from(0x1000u64), &mut oversized),
            ScatterRequest::new(Address::INVALID, &mut invalid),
        ];
        read_scatter(&mut tp, &PARAMS, &mut reqs).unwrap();

        assert!(reqs.iter().all(|r| !r.is_completed()));
        assert!(tp.tx_log.is_empty());
    }

    #[test]
    fn test_read_scatter_error_completion() {
        let mut tp = MockTransport::new(0x1000, 0x1000);
        tp.fail_reads = true;

        let mut buf = vec![0u8; 0x40];
        let mut reqs = [ScatterRequest::new(Address::from(0x1000u64), &mut buf)];
        read_scatter(&mut tp, &PARAMS, &mut reqs).unwrap();

        assert!(!reqs[0].is_completed());
    }

    #[test]
    fn test_write_unaligned_byte_enables() {
        let mut tp = MockTransport::new(0x1000, 0x1000);
        write(
            &mut tp,
            &PARAMS,
            Address::from(0x1003u64),
            &[1, 2, 3, 4, 5, 6],
        )
        .unwrap();

        assert_eq!(tp.tx_log.len(), 2);
        // head: single dword at 0x1000, byte lane 3 enabled
        assert_eq!(
            tp.tx_log[0],
            vec![
                0x40, 0x00, 0x00, 0x01, //
                0x00, 0x10, 0x00, 0x08, //
                0x00, 0x00, 0x10, 0x00, //
                0x00, 0x00, 0x00, 0x01, //
            ]
        );
        // tail: 5 bytes at 0x1004, first be f, last be 1
        assert_eq!(
            tp.tx_log[1],
            vec![
                0x40, 0x00, 0x00, 0x02, //
                0x00, 0x10, 0x00, 0x1f, //
                0x00, 0x00, 0x10, 0x04, //
                0x02, 0x03, 0x04, 0x05, //
                0x06, 0x00, 0x00, 0x00, //
            ]
        );
    }

    #[test]
    fn test_write_chunks_at_128() {
        let mut tp = MockTransport::new(0x1000, 0x1000);
        let data = vec![0xaau8; 0x100];
        write(&mut tp, &PARAMS, Address::from(0x1040u64), &data).unwrap();

        // 0x40 to the first boundary, then 0x80, then the final 0x40
        let lens: Vec<usize> = tp.tx_log.iter().map(|t| t.len() - 12).collect();
        assert_eq!(lens, vec![0x40, 0x80, 0x40]);
    }

    #[test]
    fn test_write_scatter_flags() {
        let mut tp = MockTransport::new(0x1000, 0x1000);
        let mut a = vec![1u8; 0x10];
        let mut b = vec![2u8; 0x10];
        let mut reqs = [
            ScatterRequest::new(Address::from(0x1000u64), &mut a),
            ScatterRequest::new(Address::INVALID, &mut b),
        ];
        write_scatter(&mut tp, &PARAMS, &mut reqs).unwrap();
        assert!(reqs[0].is_completed());
        assert!(!reqs[1].is_completed());
    }

    #[test]
    fn test_probe() {
        let mut tp = MockTransport::new(0, 0x40 * 0x1000);
        let map = probe(&mut tp, &PARAMS, Address::NULL, 0x40).unwrap();
        assert_eq!(map, vec![1u8; 0x40]);
        assert_eq!(tp.tx_log.len(), 0x40);
    }

    #[test]
    fn test_probe_unreadable_pages() {
        let mut tp = MockTransport::new(0, 0x10 * 0x1000);
        tp.fail_reads = true;
        let map = probe(&mut tp, &PARAMS, Address::NULL, 0x10).unwrap();
        assert_eq!(map, vec![0u8; 0x10]);
    }
}
