//! Backend used when no durability is configured.

use async_trait::async_trait;

use super::Backend;
use crate::error::StateResult;
use crate::types::Metric;

/// Accepts every snapshot and restores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

#[async_trait]
impl Backend for NoopBackend {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn save(&self, _snapshot: &[Metric]) -> StateResult<()> {
        Ok(())
    }

    async fn load(&self) -> StateResult<Vec<Metric>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> StateResult<()> {
        Ok(())
    }

    async fn ping(&self) -> StateResult<()> {
        Ok(())
    }
}
