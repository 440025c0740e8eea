use clap::{App, Arg};
use log::{info, Level};

use dmaflow_core::mem::DeviceMemory;
use dmaflow_core::plugin::DeviceArgs;
use dmaflow_core::types::Address;
use dmaflow_sp605_tcp::Sp605Device;

fn main() {
    simple_logger::init_with_level(Level::Debug).unwrap();

    let matches = App::new("sp605_read")
        .arg(Arg::with_name("target").index(1).required(true))
        .arg(Arg::with_name("addr").long("addr").takes_value(true))
        .get_matches();

    let args = DeviceArgs::with_default(matches.value_of("target").unwrap());
    let addr = matches
        .value_of("addr")
        .and_then(|a| u64::from_str_radix(a.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0x1000);

    let mut dev = match Sp605Device::open(&args) {
        Ok(dev) => dev,
        Err(e) => {
            info!("couldn't open sp605 device: {}", e);
            return;
        }
    };
    info!("pcie device id: {:04x}", dev.device_id());

    match dev.read_raw(Address::from(addr), 0x100) {
        Ok(buf) => info!("read at {:x}: {:x?}", addr, &buf[..0x20]),
        Err(e) => info!("read at {:x} failed: {}", addr, e),
    }
}
