// ABOUTME: Library root for table-syncer
// ABOUTME: Incremental and full table sync between PostgreSQL, Redshift, MySQL and SQLite

pub mod commands;
pub mod compare;
pub mod config;
pub mod connect;
pub mod error;
pub mod handle;
pub mod memory;
pub mod mysql;
pub mod postgres;
pub mod runner;
pub mod sqlite;
pub mod sync;
pub mod table;
pub mod utils;
pub mod value;

pub use error::{SyncError, SyncResult};
pub use handle::{Backend, DatabaseHandle, DestinationHandle, SourceHandle, TableHandle};
pub use sync::{IncrementalSyncEngine, SyncOutcome, SyncSpec, TableSpec};
