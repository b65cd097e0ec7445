//! Ships the local repository to the server.
//!
//! One report is a single gzip-compressed JSON array posted to
//! `/updates/` over a plain HTTP/1 connection. Connection failures are
//! retried; an HTTP error status is not.

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header;
use http_body_util::Full;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tracing::{debug, info, warn};

use tally_state::{MetricDto, MetricKey, Repository};

use crate::sampler::POLL_COUNT;

const UPDATES_PATH: &str = "/updates/";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server answered {0}")]
    Status(u16),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// `:8080` → `http://localhost:8080`; a missing scheme gets `http://`.
pub fn normalise_address(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');
    let with_host = if raw.starts_with(':') {
        format!("localhost{raw}")
    } else {
        raw.to_string()
    };
    if with_host.contains("://") {
        with_host
    } else {
        format!("http://{with_host}")
    }
}

pub struct Reporter {
    /// `host:port` used both to connect and as the `Host` header.
    authority: String,
    retry_delays: Vec<Duration>,
    timeout: Duration,
}

impl Reporter {
    pub fn new(address: &str) -> ReportResult<Self> {
        let url = normalise_address(address);
        let uri: http::Uri = url
            .parse()
            .map_err(|e| ReportError::InvalidAddress(format!("{url}: {e}")))?;
        if uri.scheme_str() != Some("http") {
            return Err(ReportError::InvalidAddress(format!("{url}: only http is supported")));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| ReportError::InvalidAddress(format!("{url}: missing host")))?;
        let authority = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:80", authority.host()),
        };

        Ok(Self {
            authority,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
            timeout: Duration::from_secs(10),
        })
    }

    /// Replace the retry schedule; one retry per entry.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Send everything in `repo`. After a successful send the local
    /// `PollCount` is cleared so the server never counts a poll twice.
    pub async fn report(&self, repo: &Repository) -> ReportResult<usize> {
        let snapshot = repo.get_all();
        if snapshot.is_empty() {
            return Ok(0);
        }
        let body = encode(&snapshot.iter().map(MetricDto::from).collect::<Vec<_>>())?;

        let mut attempt = 0;
        loop {
            match self.send(body.clone()).await {
                Ok(()) => break,
                Err(ReportError::Transport(e)) if attempt < self.retry_delays.len() => {
                    let delay = self.retry_delays[attempt];
                    attempt += 1;
                    warn!(attempt, error = %e, ?delay, "report failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        if let Ok(key) = MetricKey::counter(POLL_COUNT) {
            if let Err(e) = repo.delete(&key) {
                warn!(error = %e, "failed to reset poll count");
            }
        }
        info!(metrics = snapshot.len(), server = %self.authority, "report sent");
        Ok(snapshot.len())
    }

    async fn send(&self, body: Bytes) -> ReportResult<()> {
        tokio::time::timeout(self.timeout, self.send_once(body))
            .await
            .map_err(|_| ReportError::Transport(format!("timed out after {:?}", self.timeout)))?
    }

    async fn send_once(&self, body: Bytes) -> ReportResult<()> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| ReportError::Transport(format!("connect {}: {e}", self.authority)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ReportError::Transport(format!("handshake: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "report connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method(http::Method::POST)
            .uri(UPDATES_PATH)
            .header(header::HOST, &self.authority)
            .header(header::USER_AGENT, "tally-agent/0.1")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Full::new(body))
            .map_err(|e| ReportError::Transport(format!("request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ReportError::Transport(format!("send: {e}")))?;
        if !resp.status().is_success() {
            return Err(ReportError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// JSON-encode and gzip a batch.
fn encode(batch: &[MetricDto]) -> ReportResult<Bytes> {
    let json = serde_json::to_vec(batch).map_err(|e| ReportError::Encode(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| ReportError::Encode(e.to_string()))?;
    let compressed = encoder.finish().map_err(|e| ReportError::Encode(e.to_string()))?;
    Ok(Bytes::from(compressed))
}
