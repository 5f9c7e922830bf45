//! Process-boundary CLI surface.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gatewayd", version, about = "Local AI gateway for Anthropic and OpenAI-compatible upstreams")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the listen bind address.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Detach from the controlling terminal after startup.
    #[arg(long)]
    pub daemon: bool,

    /// Raise the default log level from info to debug.
    #[arg(short, long)]
    pub verbose: bool,
}
