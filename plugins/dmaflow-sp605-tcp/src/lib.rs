/*!
SP605/MicroBlaze tcp TLP device.

The Xilinx SP605 dev board bitstream exposes its pcie endpoint over a
tcp socket speaking 5-byte control frames. The device moves raw TLPs
through that socket; all scatter-gather logic lives in the dmaflow-tlp
engine on top of it.
*/

pub mod frame;

use frame::flag;

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, trace, warn};

use dmaflow_core::error::{Error, Result};
use dmaflow_core::mem::{
    CommandResult, DeviceCommand, DeviceMemory, DeviceMetadata, ScatterRequest,
};
use dmaflow_core::plugin::{DeviceArgs, DeviceMemoryBox, PluginDescriptor, PLUGIN_API_VERSION};
use dmaflow_core::types::{size, Address};
use dmaflow_tlp::codec::{TlpSummary, TLP_MAX_SIZE};
use dmaflow_tlp::engine::{self, ScatterParams, TlpTransport};

pub const DEFAULT_PORT: u16 = 28472;

/// Largest TLP accepted by the device for transmit.
const TLP_TX_MAX: usize = 2048;

const TX_BUF_MAX: usize = 0x11000;
const RX_BUF_MAX: usize = size::mb(24);

const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const LISTEN_POLL: Duration = Duration::from_millis(10);

/// Upper bound on pages per probe command.
const PROBE_CMD_MAX_PAGES: u32 = 0x0100_0000;

const DEFAULT_MAX_ADDRESS: u64 = 1 << 40;

/// An opened SP605 tcp device.
pub struct Sp605Device {
    stream: TcpStream,
    device_id: u16,
    params: ScatterParams,
    txbuf: Vec<u8>,
    rxbuf: Vec<u8>,
}

impl Sp605Device {
    /// Connects to the device and performs the status handshake.
    ///
    /// The default argument is the `host[:port]` target; port defaults
    /// to 28472. The `tiny` argument switches reads to 128-byte
    /// requests for endpoints with small completion credits.
    pub fn open(args: &DeviceArgs) -> Result<Self> {
        let target = args
            .get_default()
            .ok_or(Error::Device("no target given, expected host[:port]"))?;
        let target = if target.contains(':') {
            target.to_string()
        } else {
            format!("{}:{}", target, DEFAULT_PORT)
        };

        let mut stream = TcpStream::connect(&target)
            .map_err(|_| Error::Device("unable to connect to the sp605 device"))?;
        stream
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(|_| Error::Device("unable to configure the sp605 socket"))?;

        let device_id = Self::handshake(&mut stream)?;
        let tiny = args
            .get("tiny")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(false);
        info!(
            "sp605/microblaze tcp device connected, pcie device id {:04x}",
            device_id
        );

        Ok(Self {
            stream,
            device_id,
            params: ScatterParams {
                requester_id: device_id,
                tiny,
            },
            txbuf: Vec::with_capacity(TX_BUF_MAX),
            rxbuf: vec![0u8; RX_BUF_MAX],
        })
    }

    /// The pcie device id reported by the endpoint.
    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    fn handshake(stream: &mut TcpStream) -> Result<u16> {
        send_all(stream, &frame::encode_control(flag::STATUS))?;
        let mut reply = [0u8; frame::FRAME_SIZE];
        recv_exact(stream, &mut reply)?;
        if frame::flags(&reply) & (flag::STATUS | flag::HAS_DATA) == 0 {
            return Err(Error::Protocol("unexpected status reply from the device"));
        }
        let device_id = frame::decode_status(&reply) as u16;
        if device_id == 0 {
            return Err(Error::Device(
                "pcie endpoint is not configured by the root complex yet",
            ));
        }
        Ok(device_id)
    }
}

fn send_all(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    stream
        .write_all(data)
        .map_err(|_| Error::Transport("sp605 socket send failed"))
}

fn recv_exact(stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
    stream
        .read_exact(buf)
        .map_err(|_| Error::Transport("sp605 socket recv failed"))
}

impl TlpTransport for Sp605Device {
    fn tx_tlp(&mut self, tlp: &[u8], flush: bool) -> Result<()> {
        if tlp.len() & 0x3 != 0 || tlp.len() > TLP_TX_MAX {
            return Err(Error::Misuse(
                "tlp has to be a dword multiple of at most 2048 bytes",
            ));
        }
        let dwords = tlp.len() / 4;
        for (i, dw) in tlp.chunks_exact(4).enumerate() {
            let flags = if i + 1 == dwords {
                flag::HAS_DATA | flag::TLAST
            } else {
                flag::HAS_DATA
            };
            self.txbuf
                .extend_from_slice(&frame::encode_data(flags, [dw[0], dw[1], dw[2], dw[3]]));
        }
        if !self.txbuf.is_empty() && (flush || self.txbuf.len() > TX_BUF_MAX - 0x1000) {
            send_all(&mut self.stream, &self.txbuf)?;
            self.txbuf.clear();
        }
        Ok(())
    }

    fn rx_drain(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<()> {
        send_all(
            &mut self.stream,
            &frame::encode_control(flag::RECV_REPLY | flag::TIMEOUT),
        )?;
        let bytes = match self.stream.read(&mut self.rxbuf) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => 0,
            Err(_) => return Err(Error::Transport("sp605 socket recv failed")),
        };

        let mut tlp: Vec<u8> = Vec::with_capacity(0x100);
        for f in self.rxbuf[..bytes].chunks_exact(frame::FRAME_SIZE) {
            let flags = frame::flags(f);
            if flags & flag::ERROR != 0 {
                warn!("device signalled a tlp receive error");
                return Ok(());
            }
            if flags & flag::HAS_DATA == 0 {
                return Ok(());
            }
            if tlp.len() >= TLP_MAX_SIZE {
                warn!("oversized tlp received, discarding");
                return Ok(());
            }
            tlp.extend_from_slice(&frame::decode_dword(f));
            if flags & flag::TLAST != 0 {
                if tlp.len() >= 12 {
                    sink(&tlp);
                } else {
                    warn!("runt tlp received, discarding");
                    return Ok(());
                }
                tlp.clear();
            }
        }
        Ok(())
    }
}

impl DeviceMemory for Sp605Device {
    fn read_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
        let params = self.params.clone();
        engine::read_scatter(self, &params, reqs)
    }

    fn write_scatter(&mut self, reqs: &mut [ScatterRequest]) -> Result<()> {
        let params = self.params.clone();
        engine::write_scatter(self, &params, reqs)
    }

    fn metadata(&self) -> DeviceMetadata {
        DeviceMetadata {
            max_address: Address::from(DEFAULT_MAX_ADDRESS),
            volatile: true,
        }
    }

    fn command(&mut self, cmd: DeviceCommand) -> Result<CommandResult> {
        match cmd {
            DeviceCommand::WriteTlp(tlp) => {
                if tlp.len() < 12 || tlp.len() % 4 != 0 {
                    return Err(Error::Misuse(
                        "raw tlp has to be at least a header and a dword multiple",
                    ));
                }
                self.tx_tlp(tlp, true)?;
                Ok(CommandResult::None)
            }
            DeviceCommand::ListenTlp(duration) => {
                let start = Instant::now();
                while start.elapsed() < duration {
                    self.tx_tlp(&[], true)?;
                    thread::sleep(LISTEN_POLL);
                    self.rx_drain(&mut |raw| trace!("rx: {}", TlpSummary(raw)))?;
                }
                Ok(CommandResult::None)
            }
            DeviceCommand::Probe { addr, pages } => {
                if pages == 0 || pages > PROBE_CMD_MAX_PAGES {
                    return Err(Error::Misuse("probe page count out of range"));
                }
                let params = self.params.clone();
                let map = engine::probe(self, &params, addr, pages)?;
                Ok(CommandResult::ProbeMap(map))
            }
        }
    }
}

fn create_device(args: &DeviceArgs) -> Result<DeviceMemoryBox> {
    Ok(Box::new(Sp605Device::open(args)?))
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor {
        api_version: PLUGIN_API_VERSION,
        name: "sp605tcp",
        factory: create_device,
    }
}
