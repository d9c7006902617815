use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use io_device::{Device, IoConfig};
use log::info;
use sim_common::{logging, ConfigFile, Module};
use sim_protocol::{handshake, Connection};

/// I/O device service: one instance of a named device.
#[derive(Parser, Debug)]
#[command(name = "io")]
struct Args {
    /// Device name announced to the Kernel.
    device: String,
    /// Path to the config file.
    #[arg(long, default_value = "io.config")]
    config: PathBuf,
    /// Optional log file, in addition to stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = IoConfig::from_file(&ConfigFile::load(&args.config)?)?;
    logging::init(Module::Io, config.log_level, args.log_file.as_deref())?;

    let mut kernel = Connection::connect((config.kernel_ip.as_str(), config.kernel_port))?;
    handshake::io_to_kernel(&mut kernel, &args.device)?;
    info!("Device {} connected to the Kernel", args.device);

    Device::new(&args.device).serve(&mut kernel)?;
    Ok(())
}
