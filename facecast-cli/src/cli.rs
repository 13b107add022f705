use clap::{Parser, Subcommand, ValueEnum};
use facecast::{DeliveryPolicy, OverlapPolicy};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "facecast",
    author,
    version,
    about = "Stream face detections to a WebSocket consumer"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "FACECAST_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish detections read as JSON lines
    Run(RunArgs),

    /// Inspect the effective configuration
    Config {
        /// Print the configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Detection input, one JSON array per line ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    pub input: PathBuf,

    /// Consumer WebSocket URL
    #[arg(short, long, env = "FACECAST_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Detection period in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Reconnect delay in milliseconds
    #[arg(long)]
    pub retry_ms: Option<u64>,

    /// Handshake timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Skip detections scored below this (0.0-1.0)
    #[arg(long)]
    pub min_confidence: Option<f64>,

    /// Handling of ticks that fire while detection is busy
    #[arg(long, value_enum)]
    pub overlap: Option<OverlapArg>,

    /// Handling of messages produced while disconnected
    #[arg(long, value_enum)]
    pub delivery: Option<DeliveryArg>,

    /// Wait for the consumer before reading the first detection
    #[arg(long)]
    pub wait_for_consumer: bool,
}

impl RunArgs {
    pub fn reads_stdin(&self) -> bool {
        self.input.as_os_str() == "-"
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapArg {
    Skip,
    Coalesce,
}

impl From<OverlapArg> for OverlapPolicy {
    fn from(arg: OverlapArg) -> Self {
        match arg {
            OverlapArg::Skip => OverlapPolicy::Skip,
            OverlapArg::Coalesce => OverlapPolicy::Coalesce,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryArg {
    FireAndForget,
    ResendLatest,
}

impl From<DeliveryArg> for DeliveryPolicy {
    fn from(arg: DeliveryArg) -> Self {
        match arg {
            DeliveryArg::FireAndForget => DeliveryPolicy::FireAndForget,
            DeliveryArg::ResendLatest => DeliveryPolicy::ResendLatestOnReconnect,
        }
    }
}
