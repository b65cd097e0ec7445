//! tally-state — metric model, live repository, and snapshot backends.
//!
//! # Architecture
//!
//! ```text
//! producer ──collect()──▶ Repository ──▶ MemStore (Mutex<HashMap<(id, kind), value>>)
//!                              │
//!                       get_all() copy
//!                              ▼
//!                     Backend::save / load   (noop | JSON file | Postgres)
//! ```
//!
//! The [`MemStore`] is the single source of truth while the process runs.
//! Backends only ever hold a copy taken through [`Repository::get_all`].

pub mod backend;
pub mod error;
pub mod repository;
pub mod store;
pub mod types;

pub use backend::{Backend, FileBackend, NoopBackend, PgBackend};
pub use error::{StateError, StateResult};
pub use repository::Repository;
pub use store::MemStore;
pub use types::*;
