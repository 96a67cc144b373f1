//! Time series storage for sensor readings.
//!
//! Readings live in one SQLite table, `series(ts REAL PRIMARY KEY, data TEXT)`,
//! where `data` is the JSON encoded [`Payload`]. The primary key gives each
//! timestamp exactly one reading and keeps range scans and MIN/MAX lookups on
//! an index.
//!
//! [`Storage`] is the synchronous, single owner handle with a lazy
//! [`Storage::range`]. [`SharedStorage`] runs the same operations on a
//! dedicated SQLite thread for async callers (the sampling loop and the web
//! server), each of which opens its own handle on the same file.

pub mod error;
pub mod payload;
pub mod query;
pub mod shared;
pub mod storage;

pub use error::SeriesError;
pub use payload::Payload;
pub use query::{Page, Reading, Readings};
pub use shared::SharedStorage;
pub use storage::{Location, OpenMode, Storage, StoreOptions};
