#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use postbox_common::logging;

/// Outbound mail queue
#[derive(Parser, Debug)]
#[command(name = "postbox")]
#[command(about = "Deliver queued mail", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, instead of searching the usual locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drain the queue once and exit
    Send,
    /// Keep draining the queue until interrupted
    Loop,
    /// Make deferred messages eligible for the next send
    Retry {
        /// Leave messages that have been retried this many times deferred
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config_path = postbox::find_config_file(cli.config)?;
    let postbox = postbox::load_config(&config_path)?;

    match cli.command {
        Command::Send => postbox.send().await,
        Command::Loop => postbox.run().await,
        Command::Retry { max_retries } => {
            let retried = postbox.retry(max_retries).await?;
            println!("{retried} deferred messages queued for retry");
            Ok(())
        }
    }
}
