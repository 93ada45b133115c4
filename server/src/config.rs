//! Command-line configuration for the match server

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, parsed from the command line.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    pub port: u16,
    /// Simulation ticks per second for every match
    #[clap(short, long, default_value = "60")]
    pub tick_rate: u32,
    /// Send a state snapshot every N ticks
    #[clap(short, long, default_value = "2")]
    pub broadcast_every: u32,
    /// Milliseconds a lone player waits before being matched against a bot
    #[clap(long, default_value = "5000")]
    pub bot_fill_ms: u64,
    /// Maximum concurrent WebSocket connections
    #[clap(short, long, default_value = "256")]
    pub max_clients: usize,
    /// JSON file for match records; kept in memory when omitted
    #[clap(short, long)]
    pub store: Option<PathBuf>,
    /// Default log filter, overridden by RUST_LOG
    #[clap(short, long, default_value = "info")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: 60,
            broadcast_every: 2,
            bot_fill_ms: 5000,
            max_clients: 256,
            store: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn bot_fill_timeout(&self) -> Duration {
        Duration::from_millis(self.bot_fill_ms)
    }

    pub fn snapshot_interval(&self) -> u32 {
        self.broadcast_every.max(1)
    }
}
