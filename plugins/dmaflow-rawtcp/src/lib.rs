/*!
Raw tcp memory server device.

A dumb remote service (a BMC, an embedded board, ...) exposes physical
memory over a strictly sequential request/response tcp protocol. Every
scatter request degenerates to its own round trip; there is no
concurrency to exploit on this kind of device.
*/

pub mod proto;

use proto::{cmd, Header, HEADER_SIZE};

use std::io::{Read, Write};
use std::net::TcpStream;

use log::{info, trace, warn};

use dmaflow_core::error::{Error, Result};
use dmaflow_core::mem::{DeviceMemory, DeviceMetadata, ScatterRequest};
use dmaflow_core::plugin::{DeviceArgs, DeviceMemoryBox, PluginDescriptor, PLUGIN_API_VERSION};
use dmaflow_core::types::{size, Address};

pub const DEFAULT_PORT: u16 = 8888;

/// Largest read served in a single round trip.
const MAX_SIZE_RX: usize = size::mb(16);
/// Writes are chunked at this size.
const MAX_SIZE_TX: usize = size::mb(1);

const DEFAULT_MAX_ADDRESS: u64 = 1 << 40;

/// An opened raw tcp memory device.
pub struct RawTcpDevice {
    stream: TcpStream,
}

impl RawTcpDevice {
    /// Connects to the memory service and checks that it is ready.
    ///
    /// The default argument is the `host[:port]` target; port defaults
    /// to 8888.
    pub fn open(args: &DeviceArgs) -> Result<Self> {
        let target = args
            .get_default()
            .ok_or(Error::Device("no target given, expected host[:port]"))?;
        let target = if target.contains(':') {
            target.to_string()
        } else {
            format!("{}:{}", target, DEFAULT_PORT)
        };

        let stream = TcpStream::connect(&target)
            .map_err(|_| Error::Device("unable to connect to the rawtcp service"))?;

        let mut dev = Self { stream };
        if !dev.status()? {
            return Err(Error::Device("remote memory service is not ready"));
        }
        info!("raw tcp memory device connected");
        Ok(dev)
    }

    fn send_header(&mut self, hdr: &Header) -> Result<()> {
        self.stream
            .write_all(&hdr.encode())
            .map_err(|_| Error::Transport("rawtcp socket send failed"))
    }

    fn recv_header(&mut self) -> Result<Header> {
        let mut raw = [0u8; HEADER_SIZE];
        self.stream
            .read_exact(&mut raw)
            .map_err(|_| Error::Transport("rawtcp socket recv failed"))?;
        Ok(Header::decode(&raw))
    }

    fn status(&mut self) -> Result<bool> {
        self.send_header(&Header::new(cmd::STATUS, 0, 0))?;
        let reply = self.recv_header()?;
        let mut ready = [0u8; 1];
        self.stream
            .read_exact(&mut ready)
            .map_err(|_| Error::Transport("rawtcp socket recv failed"))?;
        if reply.cmd != cmd::STATUS || reply.len != 1 {
            warn!("unexpected status reply from the memory service");
        }
        Ok(ready[0] != 0)
    }

    /// Reads one range, returning the bytes the service delivered.
    fn read_mem(&mut self, addr: Address, buf: &mut [u8]) -> Result<usize> {
        self.send_header(&Header::new(cmd::MEM_READ, addr.as_u64(), buf.len() as u64))?;
        let reply = self.recv_header()?;
        if reply.len as usize > buf.len() {
            return Err(Error::Protocol("oversized read reply from the service"));
        }
        let len = reply.len as usize;
        self.stream
            .read_exact(&mut buf[..len])
            .map_err(|_| Error::Transport("rawtcp socket recv failed"))?;
        if reply.cmd != cmd::MEM_READ {
            warn!("memory read at {:x} rejected by the service", addr);
            return Ok(0);
        }
        Ok(len)
    }

    fn write_mem(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        for (i, chunk) in data.chunks(MAX_SIZE_TX).enumerate() {
            let a = addr + (i * MAX_SIZE_TX) as u64;
            self.send_header(&Header::new(cmd::MEM_WRITE, a, chunk.len() as u64))?;
            self.stream
                .write_all(chunk)
                .map_err(|_| Error::Transport("rawtcp socket send failed"))?;
            let reply = self.recv_header()?;
            if reply.cmd != cmd::MEM_WRITE {
                warn!("memory write at {:x} rejected by the service", a);
            }
        }
        Ok(())
    }
}

fn valid_read(req: &ScatterRequest) -> bool {
    if req.is_completed() || !req.addr.is_valid() || req.is_empty() || req.len() > MAX_SIZE_RX {
        return false;
    }
    if !req.addr.is_aligned(0x1000) {
        return false;
    }
    if req.len() >= 0x1000 {
        req.len() % 0x1000 == 0
    } else {
        req.len() % 8 == 0
    }
}

impl DeviceMemory for RawTcpDevice {
    fn read_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
        for req in reqs.iter_mut() {
            if !valid_read(req) {
                trace!("skipping invalid read request at {:x}", req.addr);
                continue;
            }
            let bytes = self.read_mem(req.addr, req.buf)?;
            if bytes == req.len() {
                req.set_completed();
            }
        }
        Ok(())
    }

    fn write_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
        for req in reqs.iter_mut() {
            if req.is_completed() || !req.addr.is_valid() || req.is_empty() {
                continue;
            }
            self.write_mem(req.addr.as_u64(), req.buf)?;
            req.set_completed();
        }
        Ok(())
    }

    fn metadata(&self) -> DeviceMetadata {
        DeviceMetadata {
            max_address: Address::from(DEFAULT_MAX_ADDRESS),
            volatile: true,
        }
    }
}

fn create_device(args: &DeviceArgs) -> Result<DeviceMemoryBox> {
    Ok(Box::new(RawTcpDevice::open(args)?))
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor {
        api_version: PLUGIN_API_VERSION,
        name: "rawtcp",
        factory: create_device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Memory service speaking the raw tcp protocol.
    struct Service {
        mem: Vec<u8>,
        ready: u8,
        /// answer reads with half the requested length
        short_reads: bool,
        writes: Vec<(u64, u64)>,
    }

    impl Service {
        fn new(size: usize) -> Self {
            Self {
                mem: (0..size).map(|i| (i % 251) as u8).collect(),
                ready: 1,
                short_reads: false,
                writes: Vec::new(),
            }
        }

        fn serve(&mut self, listener: TcpListener) {
            let mut stream = match listener.accept() {
                Ok((stream, _)) => stream,
                Err(_) => return,
            };
            let mut raw = [0u8; HEADER_SIZE];
            while stream.read_exact(&mut raw).is_ok() {
                let hdr = Header::decode(&raw);
                match hdr.cmd {
                    cmd::STATUS => {
                        let reply = Header::new(cmd::STATUS, 0, 1).encode();
                        if stream.write_all(&reply).is_err()
                            || stream.write_all(&[self.ready]).is_err()
                        {
                            return;
                        }
                    }
                    cmd::MEM_READ => {
                        let addr = hdr.addr as usize;
                        let mut len = (hdr.len as usize).min(self.mem.len().saturating_sub(addr));
                        if self.short_reads {
                            len /= 2;
                        }
                        let reply = Header::new(cmd::MEM_READ, hdr.addr, len as u64).encode();
                        if stream.write_all(&reply).is_err()
                            || stream.write_all(&self.mem[addr..addr + len]).is_err()
                        {
                            return;
                        }
                    }
                    cmd::MEM_WRITE => {
                        let addr = hdr.addr as usize;
                        let len = hdr.len as usize;
                        let mut data = vec![0u8; len];
                        if stream.read_exact(&mut data).is_err() {
                            return;
                        }
                        self.mem[addr..addr + len].copy_from_slice(&data);
                        self.writes.push((hdr.addr, hdr.len));
                        let reply = Header::new(cmd::MEM_WRITE, hdr.addr, hdr.len).encode();
                        if stream.write_all(&reply).is_err() {
                            return;
                        }
                    }
                    _ => return,
                }
            }
        }
    }

    fn spawn_service(service: Service) -> (String, JoinHandle<Service>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let mut service = service;
            service.serve(listener);
            service
        });
        (target, handle)
    }

    fn args(target: &str) -> DeviceArgs {
        DeviceArgs::with_default(target)
    }

    #[test]
    fn test_open_not_ready() {
        let mut service = Service::new(0x1000);
        service.ready = 0;
        let (target, handle) = spawn_service(service);
        assert_eq!(
            RawTcpDevice::open(&args(&target)).err(),
            Some(Error::Device("remote memory service is not ready"))
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_read() {
        let (target, handle) = spawn_service(Service::new(0x4000));
        let mut dev = RawTcpDevice::open(&args(&target)).unwrap();

        let buf = dev.read_raw(Address::from(0x1000u64), 0x2000).unwrap();
        for (i, b) in buf.iter().enumerate() {
            assert_eq!(*b, ((0x1000 + i) % 251) as u8);
        }
        drop(dev);
        handle.join().unwrap();
    }

    #[test]
    fn test_short_read_leaves_flag_unset() {
        let mut service = Service::new(0x4000);
        service.short_reads = true;
        let (target, handle) = spawn_service(service);
        let mut dev = RawTcpDevice::open(&args(&target)).unwrap();

        assert_eq!(
            dev.read_into(Address::from(0x1000u64), &mut [0u8; 0x40]),
            Err(Error::Partial)
        );
        drop(dev);
        handle.join().unwrap();
    }

    #[test]
    fn test_read_alignment_rejected() {
        let (target, handle) = spawn_service(Service::new(0x4000));
        let mut dev = RawTcpDevice::open(&args(&target)).unwrap();

        // unaligned base and odd sub-page length never hit the wire
        let mut a = vec![0u8; 0x40];
        let mut b = vec![0u8; 12];
        let mut c = vec![0u8; 0x1800];
        let mut reqs = [
            ScatterRequest::new(Address::from(0x1008u64), &mut a),
            ScatterRequest::new(Address::from(0x1000u64), &mut b),
            ScatterRequest::new(Address::from(0x1000u64), &mut c),
        ];
        dev.read_scatter(&mut reqs).unwrap();
        assert!(reqs.iter().all(|r| !r.is_completed()));
        drop(dev);
        handle.join().unwrap();
    }

    #[test]
    fn test_write_chunks() {
        let (target, handle) = spawn_service(Service::new(0x20_0000));
        let mut dev = RawTcpDevice::open(&args(&target)).unwrap();

        let data = vec![0x5au8; 0x18_0000];
        dev.write(Address::from(0x100u64), &data).unwrap();
        drop(dev);

        let service = handle.join().unwrap();
        assert_eq!(
            service.writes,
            vec![(0x100, 0x10_0000), (0x10_0100, 0x8_0000)]
        );
        assert!(service.mem[0x100..0x100 + 0x18_0000]
            .iter()
            .all(|b| *b == 0x5a));
        assert_eq!(service.mem[0xff], (0xff % 251) as u8);
    }
}
