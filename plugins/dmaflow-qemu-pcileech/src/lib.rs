/*!
QEMU pcileech socket device.

The qemu-pcileech device model exposes guest physical memory over a
simple request/response socket protocol. Reads may arrive in multiple
response segments; writes go out in 1KB segments each acknowledged by
its own response header.
*/

pub mod proto;

use proto::{cmd, Request, Response, RESPONSE_SIZE};

use std::io::{Read, Write};
use std::net::TcpStream;

use log::{info, warn};

use dmaflow_core::error::{Error, Result};
use dmaflow_core::mem::{DeviceMemory, DeviceMetadata, ScatterRequest};
use dmaflow_core::plugin::{DeviceArgs, DeviceMemoryBox, PluginDescriptor, PLUGIN_API_VERSION};
use dmaflow_core::types::Address;

pub const DEFAULT_PORT: u16 = 6789;

/// Write payload segment size; the device acknowledges every segment.
const WRITE_SEGMENT: usize = 1024;

const DEFAULT_MAX_ADDRESS: u64 = 1 << 40;

/// An opened qemu pcileech device.
///
/// The connection is persistent by default; with the `reconnect`
/// argument every scatter transaction opens a fresh connection.
pub struct QemuPcileechDevice {
    target: String,
    reconnect: bool,
    stream: Option<TcpStream>,
}

impl QemuPcileechDevice {
    /// Connects to the qemu pcileech device model.
    ///
    /// The default argument is the `host[:port]` target; port defaults
    /// to 6789.
    pub fn open(args: &DeviceArgs) -> Result<Self> {
        let target = args
            .get_default()
            .ok_or(Error::Device("no target given, expected host[:port]"))?;
        let target = if target.contains(':') {
            target.to_string()
        } else {
            format!("{}:{}", target, DEFAULT_PORT)
        };
        let reconnect = args
            .get("reconnect")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(false);

        let stream = if reconnect {
            None
        } else {
            Some(connect(&target)?)
        };
        info!(
            "qemu pcileech device at {} ({})",
            target,
            if reconnect { "reconnecting" } else { "persistent" }
        );

        Ok(Self {
            target,
            reconnect,
            stream,
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            self.stream = Some(connect(&self.target)?);
        }
        self.stream
            .as_mut()
            .ok_or(Error::Device("qemu pcileech connection lost"))
    }

    fn end_transaction(&mut self) {
        if self.reconnect {
            self.stream = None;
        }
    }

    /// One read round trip; segments accumulate until the full length
    /// arrived or the device reports an error.
    fn read_dma(&mut self, addr: Address, buf: &mut [u8]) -> Result<u32> {
        let request = Request::new(cmd::READ, addr.as_u64(), buf.len() as u64);
        let stream = self.stream()?;
        send_all(stream, &request.encode())?;

        let mut received = 0;
        let mut result = proto::RESULT_OK;
        while received < buf.len() {
            let response = recv_response(stream)?;
            result = response.result;
            if response.result != proto::RESULT_OK {
                warn!(
                    "dma read at {:x} failed: {}",
                    addr,
                    proto::describe_result(response.result)
                );
            }
            let len = response.len as usize;
            if len > buf.len() - received {
                return Err(Error::Protocol("oversized read response segment"));
            }
            if len > 0 {
                stream
                    .read_exact(&mut buf[received..received + len])
                    .map_err(|_| Error::Transport("qemu pcileech socket recv failed"))?;
                received += len;
            }
            if response.result != proto::RESULT_OK || len == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// One write round trip in acknowledged 1KB segments.
    fn write_dma(&mut self, addr: Address, data: &[u8]) -> Result<u32> {
        let request = Request::new(cmd::WRITE, addr.as_u64(), data.len() as u64);
        let stream = self.stream()?;
        send_all(stream, &request.encode())?;

        let mut result = proto::RESULT_OK;
        for segment in data.chunks(WRITE_SEGMENT) {
            send_all(stream, segment)?;
            let response = recv_response(stream)?;
            result = response.result;
            if response.result != proto::RESULT_OK {
                warn!(
                    "dma write at {:x} failed: {}",
                    addr,
                    proto::describe_result(response.result)
                );
            }
        }
        Ok(result)
    }
}

fn connect(target: &str) -> Result<TcpStream> {
    TcpStream::connect(target).map_err(|_| Error::Device("unable to connect to qemu pcileech"))
}

fn send_all(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    stream
        .write_all(data)
        .map_err(|_| Error::Transport("qemu pcileech socket send failed"))
}

fn recv_response(stream: &mut TcpStream) -> Result<Response> {
    let mut raw = [0u8; RESPONSE_SIZE];
    stream
        .read_exact(&mut raw)
        .map_err(|_| Error::Transport("qemu pcileech socket recv failed"))?;
    Ok(Response::decode(&raw))
}

impl DeviceMemory for QemuPcileechDevice {
    fn read_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
        for req in reqs.iter_mut() {
            if req.is_completed() || !req.addr.is_valid() || req.is_empty() {
                continue;
            }
            let result = self.read_dma(req.addr, req.buf)?;
            if result == proto::RESULT_OK {
                req.set_completed();
            }
        }
        self.end_transaction();
        Ok(())
    }

    fn write_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
        for req in reqs.iter_mut() {
            if req.is_completed() || !req.addr.is_valid() || req.is_empty() {
                continue;
            }
            let result = self.write_dma(req.addr, req.buf)?;
            if result == proto::RESULT_OK {
                req.set_completed();
            }
        }
        self.end_transaction();
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
    Ok(Box::new(QemuPcileechDevice::open(args)?))
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor {
        api_version: PLUGIN_API_VERSION,
        name: "qemupcileech",
        factory: create_device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Scripted qemu pcileech device model.
    struct DeviceModel {
        mem: Vec<u8>,
        /// answer reads in two segments
        split_reads: bool,
        /// deny every access with this result, 0 for none
        deny_result: u32,
        write_segments: Vec<usize>,
        sessions: usize,
    }

    impl DeviceModel {
        fn new(size: usize) -> Self {
            Self {
                mem: (0..size).map(|i| (i % 251) as u8).collect(),
                split_reads: false,
                deny_result: 0,
                write_segments: Vec::new(),
                sessions: 0,
            }
        }

        fn serve(&mut self, listener: TcpListener, max_sessions: usize) {
            for _ in 0..max_sessions {
                let mut stream = match listener.accept() {
                    Ok((stream, _)) => stream,
                    Err(_) => return,
                };
                self.sessions += 1;
                self.session(&mut stream);
            }
        }

        fn session(&mut self, stream: &mut TcpStream) {
            let mut raw = [0u8; proto::REQUEST_SIZE];
            while stream.read_exact(&mut raw).is_ok() {
                let request = Request::decode(&raw);
                match request.command {
                    cmd::READ => {
                        if self.deny_result != 0 {
                            let reply = Response::new(self.deny_result, 0).encode();
                            if stream.write_all(&reply).is_err() {
                                return;
                            }
                            continue;
                        }
                        let addr = request.addr as usize;
                        let len = request.len as usize;
                        let parts = if self.split_reads && len >= 2 {
                            vec![len / 2, len - len / 2]
                        } else {
                            vec![len]
                        };
                        let mut o = 0;
                        for part in parts {
                            let reply = Response::new(proto::RESULT_OK, part as u64).encode();
                            if stream.write_all(&reply).is_err()
                                || stream.write_all(&self.mem[addr + o..addr + o + part]).is_err()
                            {
                                return;
                            }
                            o += part;
                        }
                    }
                    cmd::WRITE => {
                        let mut addr = request.addr as usize;
                        let mut remaining = request.len as usize;
                        while remaining > 0 {
                            let chunk = remaining.min(1024);
                            let mut data = vec![0u8; chunk];
                            if stream.read_exact(&mut data).is_err() {
                                return;
                            }
                            self.mem[addr..addr + chunk].copy_from_slice(&data);
                            self.write_segments.push(chunk);
                            let reply = Response::new(proto::RESULT_OK, chunk as u64).encode();
                            if stream.write_all(&reply).is_err() {
                                return;
                            }
                            addr += chunk;
                            remaining -= chunk;
                        }
                    }
                    _ => return,
                }
            }
        }
    }

    fn spawn_model(model: DeviceModel, max_sessions: usize) -> (String, JoinHandle<DeviceModel>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let mut model = model;
            model.serve(listener, max_sessions);
            model
        });
        (target, handle)
    }

    fn args(target: &str) -> DeviceArgs {
        DeviceArgs::with_default(target)
    }

    #[test]
    fn test_read() {
        let (target, handle) = spawn_model(DeviceModel::new(0x2000), 1);
        let mut dev = QemuPcileechDevice::open(&args(&target)).unwrap();

        let buf = dev.read_raw(Address::from(0x100u64), 0x80).unwrap();
        for (i, b) in buf.iter().enumerate() {
            assert_eq!(*b, ((0x100 + i) % 251) as u8);
        }
        drop(dev);
        handle.join().unwrap();
    }

    #[test]
    fn test_read_segmented() {
        let mut model = DeviceModel::new(0x2000);
        model.split_reads = true;
        let (target, handle) = spawn_model(model, 1);
        let mut dev = QemuPcileechDevice::open(&args(&target)).unwrap();

        let buf = dev.read_raw(Address::from(0x40u64), 0x101).unwrap();
        for (i, b) in buf.iter().enumerate() {
            assert_eq!(*b, ((0x40 + i) % 251) as u8);
        }
        drop(dev);
        handle.join().unwrap();
    }

    #[test]
    fn test_read_denied() {
        let mut model = DeviceModel::new(0x2000);
        model.deny_result = proto::ResultFlags::ACCESS_DENIED.bits();
        let (target, handle) = spawn_model(model, 1);
        let mut dev = QemuPcileechDevice::open(&args(&target)).unwrap();

        assert_eq!(
            dev.read_into(Address::from(0x100u64), &mut [0u8; 0x80]),
            Err(Error::Partial)
        );
        drop(dev);
        handle.join().unwrap();
    }

    #[test]
    fn test_write_segments() {
        let (target, handle) = spawn_model(DeviceModel::new(0x2000), 1);
        let mut dev = QemuPcileechDevice::open(&args(&target)).unwrap();

        let data = vec![0xa5u8; 0xa00];
        dev.write(Address::from(0x80u64), &data).unwrap();
        drop(dev);

        let model = handle.join().unwrap();
        assert_eq!(model.write_segments, vec![1024, 1024, 0x200]);
        assert!(model.mem[0x80..0x80 + 0xa00].iter().all(|b| *b == 0xa5));
        assert_eq!(model.mem[0x7f], (0x7f % 251) as u8);
    }

    #[test]
    fn test_reconnect_per_transaction() {
        let (target, handle) = spawn_model(DeviceModel::new(0x2000), 2);
        let mut dev =
            QemuPcileechDevice::open(&args(&target).insert("reconnect", "true")).unwrap();

        dev.read_raw(Address::from(0x0u64), 0x10).unwrap();
        dev.read_raw(Address::from(0x10u64), 0x10).unwrap();
        drop(dev);

        let model = handle.join().unwrap();
        assert_eq!(model.sessions, 2);
    }
}
