//! JSON snapshot file backend.
//!
//! The file holds a flat JSON array of [`MetricDto`] records. Saves write
//! a sibling `.tmp` file and rename it over the target, so a crash while
//! writing leaves the previous snapshot in place.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::Backend;
use crate::error::{StateError, StateResult};
use crate::types::{Metric, MetricDto};

/// Persists snapshots to a JSON file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, snapshot: &[Metric]) -> StateResult<()> {
        let records: Vec<MetricDto> = snapshot.iter().map(MetricDto::from).collect();
        let bytes = serde_json::to_vec(&records).map_err(|e| StateError::Serialize(e.to_string()))?;

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StateError::Io(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StateError::Io(format!("{}: {e}", self.path.display())))?;

        debug!(path = ?self.path, metrics = records.len(), "snapshot written");
        Ok(())
    }

    async fn load(&self) -> StateResult<Vec<Metric>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = ?self.path, "no snapshot file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StateError::Io(format!("{}: {e}", self.path.display()))),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let records: Vec<MetricDto> =
            serde_json::from_slice(&bytes).map_err(|e| StateError::Deserialize(e.to_string()))?;
        let metrics = records
            .into_iter()
            .map(MetricDto::into_metric)
            .collect::<StateResult<Vec<_>>>()?;

        debug!(path = ?self.path, metrics = metrics.len(), "snapshot read");
        Ok(metrics)
    }

    async fn close(&self) -> StateResult<()> {
        Ok(())
    }

    async fn ping(&self) -> StateResult<()> {
        Ok(())
    }
}
