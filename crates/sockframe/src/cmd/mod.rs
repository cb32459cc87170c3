use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use sockframe_conn::ConnectionConfig;

use crate::exit::{config_error, CliResult};
use crate::output::OutputFormat;

pub mod config;
pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an echo server.
    Echo(EchoArgs),
    /// Send a single frame.
    Send(SendArgs),
    /// Listen and print received frames.
    Listen(ListenArgs),
    /// Print the effective connection configuration.
    Config(ConfigArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, config: ConnectionConfig, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, config, format),
        Command::Send(args) => send::run(args, config, format),
        Command::Listen(args) => listen::run(args, config, format),
        Command::Config(args) => config::run(args, config, format),
        Command::Version(args) => version::run(args),
    }
}

/// Defaults, optionally overridden by a JSON file.
pub fn load_config(path: Option<&Path>) -> CliResult<ConnectionConfig> {
    match path {
        Some(path) => ConnectionConfig::from_json_file(path).map_err(config_error),
        None => Ok(ConnectionConfig::default()),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Mark every accepted peer as registered.
    #[arg(long)]
    pub register: bool,
    /// Comma-separated message type names, indexed by type, for diagnostics.
    #[arg(long, value_delimiter = ',')]
    pub type_names: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Message type to send.
    #[arg(long = "type", short = 't', default_value = "0")]
    pub msg_type: i64,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one reply frame of the same type and print it.
    #[arg(long)]
    pub wait: bool,
    /// Connect attempts; negative uses the configured default.
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub retries: i32,
    /// Delay between connect attempts in ms; negative uses the configured default.
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub retry_delay_ms: i64,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Filter to specific message types (comma-separated).
    #[arg(long = "types", value_delimiter = ',')]
    pub msg_types: Option<Vec<i64>>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
