//! CLI command definitions and handlers.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Load configuration with graceful fallback to defaults.
///
/// This function should be used by all commands to load the user's configuration.
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> parley_core::config::Config {
    parley_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config: {}", e);
        parley_core::config::Config::default()
    })
}

pub mod chat;
pub mod config;
pub mod serve;

/// Parley - a small chat relay with file sharing
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run the relay server
    Serve(ServeArgs),

    /// Join a relay and chat from the terminal
    Chat(ChatArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Arguments for the chat command
#[derive(Parser)]
pub struct ChatArgs {
    /// Relay address (IP, IP:PORT or host name)
    #[arg(short, long, env = "PARLEY_SERVER")]
    pub server: Option<String>,

    /// Display name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Directory for downloaded files
    #[arg(short, long)]
    pub download_dir: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}
