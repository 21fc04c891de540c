use std::{error::Error, sync::mpsc};

use clap::Parser;
use log::info;
use sdms::protocol::{self, AnonHandler, FacilityServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(version, about = "SDMS facility server", long_about = None)]
struct Cli {
    /// Interface to listen on
    #[arg(long, default_value = "*")]
    host: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = 5800)]
    port: u16,
    /// Worker threads (0 = one per core)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
    /// Worker poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_timeout: u32,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ServerConfig::new(format!("tcp://{}:{}", cli.host, cli.port))
        .with_threads(cli.threads)
        .with_poll_timeout(cli.poll_timeout);

    let server = FacilityServer::new(config, protocol::registry()?, AnonHandler::default());
    let handle = server.start()?;
    info!(
        "listening at {} with {} workers",
        handle.address(),
        handle.workers()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        tx.send(()).ok();
    })?;

    rx.recv()?;
    info!("shutting down");
    handle.stop()?;

    Ok(())
}
