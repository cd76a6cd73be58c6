/// Whole-document JSON file sink.
pub mod json_file;
/// Append-only SQLite journal sink.
pub mod sqlite;

use thiserror::Error;

use crate::{
    core::store::{GameStore, StoreError, StoreSnapshotV1},
    op::StoredOp,
    types::OpSeq,
};

/// Failures at the storage boundary. A missing database or file is not one.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite driver error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encode or decode error.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Filesystem error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Stored payload was written by an unknown format version.
    #[error("unsupported {what} format version {version}")]
    UnsupportedFormat {
        /// Payload kind.
        what: &'static str,
        /// Version found on disk.
        version: u16,
    },
    /// Journal does not replay onto the stored state.
    #[error("replay failed: {0}")]
    Replay(#[from] StoreError),
    /// Anything else, e.g. a worker join failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for committed ops, and source of the state to rehydrate from.
pub trait OpSink: Send {
    /// Rebuilds the store from persisted data; first run yields an empty store.
    /// The returned store is always marked ready.
    fn load_store(&mut self) -> PersistResult<GameStore> {
        let mut store = GameStore::new();
        store.mark_ready();
        Ok(store)
    }
    /// Appends ops in sequence order and returns the highest sequence written.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;
    /// Makes appended ops durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Stores a checkpoint covering every op up to `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &StoreSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }
    /// Drops journaled ops up to `seq`, returning how many were removed.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
