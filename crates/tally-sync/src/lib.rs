//! tally-sync — keeps the live repository and its snapshot backend in step.
//!
//! # Architecture
//!
//! ```text
//! Synchronizer
//!   ├── start()   ← restore snapshot (bounded retries), spawn flush task
//!   ├── collect() ← aggregate, then save immediately in write-through mode
//!   ├── flush task: ticker → save | shutdown → final save
//!   ├── done()    ← join the flush task
//!   └── close()   ← release the backend
//! ```

pub mod backoff;
pub mod synchronizer;

pub use backoff::Backoff;
pub use synchronizer::{FlushMode, SyncPolicy, Synchronizer};
