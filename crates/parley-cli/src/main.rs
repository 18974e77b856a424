//! Parley CLI - chat relay server and terminal client
//!
//! Parley relays chat messages between connected clients and lets them
//! offer files to each other, streamed in chunks through the relay.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a relay
//! parley serve
//!
//! # Join it (on any machine that can reach the relay)
//! parley chat --server 192.168.1.10 --name alice
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Chat(args) => commands::chat::run(args).await,
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "info,parley=debug,parley_core=debug"
    } else {
        "warn,parley=info,parley_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
