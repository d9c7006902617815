use std::error::Error;
use std::io::BufRead;
use std::net::TcpListener;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use kernel_core::runtime::Inbound;
use kernel_core::{KernelConfig, KernelEvent, KernelRuntime, SchedulerError};
use log::info;
use sim_common::{logging, ConfigFile, Module};

/// Kernel service: schedules processes over the connected CPUs.
#[derive(Parser, Debug)]
#[command(name = "kernel")]
struct Args {
    /// Pseudocode file of the initial process.
    file: String,
    /// Size in bytes of the initial process.
    size: u32,
    /// Path to the config file.
    #[arg(long, default_value = "kernel.config")]
    config: PathBuf,
    /// Optional log file, in addition to stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = KernelConfig::from_file(&ConfigFile::load(&args.config)?)?;
    logging::init(Module::Kernel, config.log_level, args.log_file.as_deref())?;
    info!(
        "Suspension after {} ms is not scheduled; swap is not available",
        config.suspension_ms
    );

    let runtime = KernelRuntime::new(&config);
    for port in [config.dispatch_port, config.interrupt_port, config.io_port] {
        runtime.listen(TcpListener::bind(("0.0.0.0", port))?);
        info!("Listening on port {}", port);
    }
    let sender = runtime.sender();
    let event_loop = thread::spawn(move || runtime.run());

    info!("Press ENTER to start the scheduler");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    sender
        .send(Inbound::Event(KernelEvent::NewProcess {
            file: args.file,
            size: args.size,
        }))
        .map_err(|_| SchedulerError::Stopped)?;

    let _ = event_loop.join();
    Ok(())
}
