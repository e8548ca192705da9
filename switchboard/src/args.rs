use std::path::PathBuf;

use clap::Parser;

/// The switchboard LLM gateway.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SWITCHBOARD_CONFIG", default_value = "switchboard.toml")]
    pub config: PathBuf,

    /// Listen address override, e.g. `0.0.0.0:4100`.
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Log filter, e.g. `info` or `gateway=debug,switchboard=debug`.
    #[arg(long, env = "SWITCHBOARD_LOG", default_value = "info")]
    pub log_filter: String,
}
