use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use cpu_core::links::{serve_dispatch, spawn_interrupt_listener};
use cpu_core::{Cpu, CpuConfig, InterruptLatch, Mmu, PageCache, Tlb};
use log::info;
use sim_common::{logging, ConfigFile, Module};
use sim_protocol::{handshake, Connection};

/// CPU service: runs the contexts the Kernel dispatches.
#[derive(Parser, Debug)]
#[command(name = "cpu")]
struct Args {
    /// Identifier announced to the Kernel.
    cpu_id: u32,
    /// Path to the config file.
    #[arg(long, default_value = "cpu.config")]
    config: PathBuf,
    /// Optional log file, in addition to stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = CpuConfig::from_file(&ConfigFile::load(&args.config)?)?;
    logging::init(Module::Cpu, config.log_level, args.log_file.as_deref())?;

    let mut memoria = Connection::connect((config.memoria_ip.as_str(), config.memoria_port))?;
    let geometry = handshake::cpu_to_memoria(&mut memoria)?;
    info!(
        "Connected to Memoria: page size {}, {} entries per table, {} levels",
        geometry.page_size, geometry.entries_per_table, geometry.levels
    );

    let kernel = (config.kernel_ip.as_str(), config.kernel_dispatch_port);
    let mut dispatch = Connection::connect(kernel)?;
    handshake::cpu_dispatch_to_kernel(&mut dispatch, args.cpu_id)?;
    let mut interrupt =
        Connection::connect((config.kernel_ip.as_str(), config.kernel_interrupt_port))?;
    handshake::cpu_interrupt_to_kernel(&mut interrupt, args.cpu_id)?;
    info!("CPU {} connected to the Kernel", args.cpu_id);

    let latch = InterruptLatch::new();
    let listener = spawn_interrupt_listener(interrupt, latch.clone());

    let mmu = Mmu::new(
        memoria,
        geometry,
        Tlb::new(config.tlb_entries, config.tlb_replacement),
        PageCache::new(config.cache_entries, config.cache_replacement),
    )
    .with_cache_delay(config.cache_delay);
    let mut cpu = Cpu::new(args.cpu_id, mmu, latch);
    serve_dispatch(&mut dispatch, &mut cpu)?;

    let _ = listener.join();
    Ok(())
}
