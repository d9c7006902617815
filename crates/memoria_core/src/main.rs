use std::error::Error;
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::info;
use memoria_core::server::MemoriaServer;
use memoria_core::{MemoriaConfig, MemoryManager};
use sim_common::{logging, ConfigFile, Module};

/// Memoria service: simulated RAM and page tables.
#[derive(Parser, Debug)]
#[command(name = "memoria")]
struct Args {
    /// Path to the config file.
    #[arg(long, default_value = "memoria.config")]
    config: PathBuf,
    /// Optional log file, in addition to stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = MemoriaConfig::from_file(&ConfigFile::load(&args.config)?)?;
    logging::init(Module::Memoria, config.log_level, args.log_file.as_deref())?;
    info!(
        "Swap file {} (delay {} ms) is not used",
        config.swapfile_path.display(),
        config.swap_delay_ms
    );

    let manager = MemoryManager::new(config.geometry(), config.memory_size)
        .with_instructions_path(&config.instructions_path)
        .with_dump_path(&config.dump_path);
    let server = MemoriaServer::new(manager, Duration::from_millis(config.memory_delay_ms));

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port))?;
    info!("Listening on port {}", config.listen_port);
    server.serve(listener);
    Ok(())
}
