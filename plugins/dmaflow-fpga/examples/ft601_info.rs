use clap::{App, Arg};
use log::{info, Level};

use dmaflow_core::plugin::DeviceArgs;
use dmaflow_fpga::Ft601;

fn main() {
    simple_logger::init_with_level(Level::Debug).unwrap();

    let matches = App::new("ft601_info")
        .arg(Arg::with_name("device").long("device").takes_value(true))
        .get_matches();

    let mut args = DeviceArgs::new();
    if let Some(device) = matches.value_of("device") {
        args = args.insert("device", device);
    }

    let ft601 = match Ft601::open(&args) {
        Ok(ft601) => ft601,
        Err(e) => {
            info!("couldn't open ft601 device: {}", e);
            return;
        }
    };

    info!("ft601 opened, safe_mode={}", ft601.channel().is_safe_mode());
}
