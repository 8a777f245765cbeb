//! tally-store: the aggregation core of the tally server.
//!
//! # Architecture
//!
//! ```text
//! Storage
//!   ├── MemStore      ← authoritative map, per-type update rules
//!   ├── FileSnapshot  ← optional, line-delimited JSON, periodic or sync
//!   └── PgStore       ← optional, flat upsert mirror of post-update state
//! ```
//!
//! Arithmetic happens only in [`MemStore`]. The durable backends store the
//! results, so a counter row in Postgres always holds the running total,
//! never an individual delta.

pub mod error;
pub mod file;
pub mod memory;
pub mod postgres;
pub mod storage;

pub use error::{StoreError, StoreResult};
pub use file::FileSnapshot;
pub use memory::MemStore;
pub use postgres::PgStore;
pub use storage::{RestoreSource, SnapshotPolicy, Storage};
