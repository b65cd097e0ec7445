//! Server configuration from flags and environment.
//!
//! An explicit flag wins over its environment variable, which wins over
//! the default.

use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tally_state::{Backend, FileBackend, NoopBackend, PgBackend};
use tally_sync::SyncPolicy;

#[derive(Debug, Parser)]
#[command(name = "tallyd", about = "Tally metrics collection server")]
pub struct Config {
    /// Listen address, `host:port` or `:port`.
    #[arg(short, long, env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Snapshot flush interval in seconds; 0 saves after every update.
    #[arg(short = 'i', long, env = "STORE_INTERVAL", default_value_t = 300)]
    pub store_interval: u64,

    /// JSON snapshot file; empty disables file persistence.
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH", default_value = "/tmp/metrics-db.json")]
    pub file_storage_path: String,

    /// Load the snapshot on start.
    #[arg(
        short,
        long,
        env = "RESTORE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub restore: bool,

    /// Postgres DSN; selects the database backend when set.
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Snapshot load attempts on start.
    #[arg(long, env = "RESTORE_ATTEMPTS", default_value_t = 3)]
    pub restore_attempts: u32,

    /// Seconds the HTTP server may spend draining on shutdown.
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,
}

impl Config {
    /// Address in a form `TcpListener::bind` accepts. A bare `:port`
    /// listens on all interfaces.
    pub fn listen_addr(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy::new(Duration::from_secs(self.store_interval), self.restore)
            .with_restore_retries(self.restore_attempts, Duration::from_secs(1))
    }

    /// DSN first, then a non-empty file path, then no persistence.
    pub fn backend(&self) -> anyhow::Result<Arc<dyn Backend>> {
        if let Some(dsn) = self.database_dsn.as_deref().filter(|d| !d.trim().is_empty()) {
            return Ok(Arc::new(PgBackend::connect_lazy(dsn)?));
        }
        if !self.file_storage_path.is_empty() {
            return Ok(Arc::new(FileBackend::new(self.file_storage_path.as_str())));
        }
        Ok(Arc::new(NoopBackend))
    }
}
