//! CryCrawler CLI
//!
//! Runs a host or a worker until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use crycrawler::{
    config::{ConfigContext, DEFAULT_CONFIG_PATH},
    crawl::http::HttpProcessor,
    error::Result,
    program::{HostProgram, Program, WorkerProgram},
};

/// CryCrawler - distributed web crawler
#[derive(Parser, Debug)]
#[command(name = "crycrawler", version, about = "Distributed web crawler")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run as host and distribute work to workers
    #[arg(long)]
    host: bool,

    /// Delete the cache file and start a fresh session
    #[arg(long)]
    new: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Initialize logging based on the debug flag.
fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match ConfigContext::load_or_create(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return Err(e);
        }
    };

    if cli.new {
        let cache_file = config.read(|c| c.cache_file.clone());
        match std::fs::remove_file(&cache_file) {
            Ok(()) => log::info!("Deleted cache file {}", cache_file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let program: Box<dyn Program> = if cli.host {
        log::info!("Starting in host mode");
        Box::new(HostProgram::new(config.clone()).await?)
    } else {
        log::info!("Starting in worker mode");
        let user_agent = config.read(|c| c.worker.user_agent.clone());
        let processor = Arc::new(HttpProcessor::new(&user_agent)?);
        Box::new(WorkerProgram::new(config.clone(), processor).await?)
    };

    program.start().await?;
    log::info!("Running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down...");

    program.stop().await;
    config.save()?;

    Ok(())
}
