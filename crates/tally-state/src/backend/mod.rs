//! Snapshot persistence backends.
//!
//! A backend stores and returns whole snapshots; it never sees the live
//! map. Callers take a copy with [`Repository::get_all`] and hand it to
//! [`Backend::save`]; [`Backend::load`] returns a fully decoded and
//! validated snapshot which the caller then applies with
//! [`Repository::set`]. A load that fails therefore never leaves a
//! partially restored repository behind.
//!
//! [`Repository::get_all`]: crate::Repository::get_all
//! [`Repository::set`]: crate::Repository::set

pub mod file;
pub mod noop;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StateResult;
use crate::types::Metric;

pub use file::FileBackend;
pub use noop::NoopBackend;
pub use postgres::PgBackend;

/// Durable store for metric snapshots.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Replace the durable snapshot with `snapshot`.
    async fn save(&self, snapshot: &[Metric]) -> StateResult<()>;

    /// Read the last durable snapshot. An absent snapshot is empty.
    async fn load(&self) -> StateResult<Vec<Metric>>;

    /// Release held resources.
    async fn close(&self) -> StateResult<()>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> StateResult<()>;
}
