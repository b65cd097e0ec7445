//! tally-agent — samples runtime statistics and reports them to tallyd.
//!
//! # Architecture
//!
//! ```text
//! poll ticker ───▶ Sampler::poll ──collect()──▶ Repository (local)
//!                                                   │
//! report ticker ──▶ Reporter::report ◀──get_all()───┘
//!                        │
//!                        └── gzip JSON ──▶ POST /updates/
//! ```

pub mod config;
pub mod reporter;
pub mod sampler;

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use tally_state::Repository;

pub use config::AgentConfig;
pub use reporter::{ReportError, ReportResult, Reporter, normalise_address};
pub use sampler::Sampler;

pub struct Agent {
    repo: Repository,
    sampler: Sampler,
    reporter: Reporter,
}

impl Agent {
    pub fn new(sampler: Sampler, reporter: Reporter) -> Self {
        Self {
            repo: Repository::default(),
            sampler,
            reporter,
        }
    }

    /// Poll and report until `shutdown` flips to `true` or its sender is
    /// dropped, then make one last report.
    pub async fn run(
        &mut self,
        poll_interval: Duration,
        report_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = tokio::time::interval_at(Instant::now() + report_interval, report_interval);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            server = self.reporter.authority(),
            ?poll_interval,
            ?report_interval,
            "agent started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = poll.tick() => self.sampler.poll(&self.repo),
                _ = report.tick() => self.report().await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("agent stopping, sending final report");
        self.report().await;
    }

    async fn report(&self) {
        if let Err(e) = self.reporter.report(&self.repo).await {
            warn!(error = %e, "report failed");
        }
    }
}
