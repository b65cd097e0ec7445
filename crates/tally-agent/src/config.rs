//! Agent configuration from flags and environment.

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "tally-agent", about = "Tally runtime statistics agent")]
pub struct AgentConfig {
    /// Server address, `host:port`, `:port`, or a full `http://` URL.
    #[arg(short, long, env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Seconds between samples.
    #[arg(
        short,
        long,
        env = "POLL_INTERVAL",
        default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval: u64,

    /// Seconds between reports to the server.
    #[arg(
        short,
        long,
        env = "REPORT_INTERVAL",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub report_interval: u64,
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }
}
