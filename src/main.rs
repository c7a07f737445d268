//! slotmeter binary
//!
//! Runs the exporter for a counter store, or records/inspects counts from
//! the command line.

use clap::Parser;
use slotmeter::cli::{Cli, Command, generate_config_template};
use slotmeter::config::Config;
use slotmeter::{CounterSlab, Exporter, Recorder, telemetry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = &cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(path, template)?;
                eprintln!("Wrote configuration template to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let mut config = cli.load_config()?;
    config.apply_process_env()?;
    telemetry::init(&config.observability.log_level);

    match cli.command {
        None | Some(Command::Run) => run(&config).await?,
        Some(Command::Record { url, status }) => {
            let recorder = Recorder::from_config(&config);
            recorder.initialize()?;
            let recorded = recorder.record(&url, status);
            println!("{}", if recorded { "recorded" } else { "not recorded" });
        }
        Some(Command::Show) => {
            let slab = CounterSlab::open(&config.store.path, config.store.slot_count)?;
            for (slot, value) in slab.peek().iter().enumerate() {
                println!("{}\t{}", slot, value);
            }
        }
        Some(Command::Config { .. }) => {}
    }

    Ok(())
}

async fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let slab = Arc::new(CounterSlab::open(
        &config.store.path,
        config.store.slot_count,
    )?);
    let exporter = Exporter::with_udp(slab, &config.exporter).await?;

    let shutdown = CancellationToken::new();
    let handle = exporter.spawn(shutdown.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    let metrics = handle.await?;
    match metrics.gather() {
        Ok(text) => tracing::debug!(metrics = %text, "Exporter metrics at shutdown"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode exporter metrics"),
    }
    Ok(())
}
