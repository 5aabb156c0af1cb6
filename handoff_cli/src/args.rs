//! Command-line arguments. Flags override values from the config file.

use clap::Parser;
use handoff_core::config::AppConfig;
use std::path::PathBuf;

/// Handoff - discover peers on the LAN and hand files over to them.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// TCP port of the transfer server. 0 = auto (OS-assigned).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// UDP port used for discovery announcements.
    #[arg(long)]
    pub discovery_port: Option<u16>,

    /// Default folder for received files.
    #[arg(short, long)]
    pub save_folder: Option<PathBuf>,

    /// Milliseconds between discovery announcements.
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Write the resulting settings back to the config file.
    #[arg(long)]
    pub save_config: bool,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(port) = self.port {
            config.transfer_port = port;
        }
        if let Some(port) = self.discovery_port {
            config.discovery_port = port;
        }
        if let Some(folder) = &self.save_folder {
            config.save_folder = folder.clone();
        }
        if let Some(interval) = self.interval_ms {
            config.broadcast_interval_ms = interval;
        }
        config
    }

    /// Default filter when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn,handoff_core=info,handoff_cli=info",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
