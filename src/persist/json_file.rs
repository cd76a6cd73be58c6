//! Whole-document JSON persistence, one file per store.
//!
//! The sink keeps a replica of the store fed by appended ops and rewrites the
//! whole document after every batch that changed it. Writes go to a synced
//! sibling temp file that is then renamed over the target, so a crash leaves
//! either the old or the new document.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{
    core::store::{GameState, GameStore, StoreSnapshotV1},
    op::StoredOp,
    types::OpSeq,
};

use super::{OpSink, PersistError, PersistResult};

const DOCUMENT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDocument {
    version: u16,
    last_seq: OpSeq,
    state: GameState,
}

/// JSON file implementation of [`crate::persist::OpSink`].
pub struct JsonFileSink {
    path: PathBuf,
    replica: GameStore,
    dirty: bool,
}

impl JsonFileSink {
    /// Targets `path`; nothing is read or created until load or flush.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            replica: GameStore::new(),
            dirty: false,
        }
    }

    /// Target document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, or `None` when the file does not exist yet.
    pub fn read_state(&self) -> PersistResult<Option<(OpSeq, GameState)>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let doc: JsonDocument = serde_json::from_slice(&bytes)?;
        if doc.version != DOCUMENT_FORMAT_VERSION {
            return Err(PersistError::UnsupportedFormat {
                what: "document",
                version: doc.version,
            });
        }
        Ok(Some((doc.last_seq, doc.state)))
    }

    fn write_document(&self) -> PersistResult<()> {
        let doc = JsonDocument {
            version: DOCUMENT_FORMAT_VERSION,
            last_seq: self.replica.latest_op_seq(),
            state: self.replica.state().clone(),
        };
        let payload = serde_json::to_vec_pretty(&doc)?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        debug!(path = %self.path.display(), last_seq = doc.last_seq, "document written");
        Ok(())
    }
}

impl OpSink for JsonFileSink {
    fn load_store(&mut self) -> PersistResult<GameStore> {
        let snapshot = match self.read_state()? {
            Some((last_seq, state)) => StoreSnapshotV1 {
                next_op_seq: last_seq.saturating_add(1),
                state,
            },
            None => {
                info!(path = %self.path.display(), "no stored document, starting fresh");
                GameStore::new().export_snapshot()
            }
        };

        self.replica = GameStore::from_snapshot(snapshot.clone());
        self.dirty = false;
        let mut store = GameStore::from_snapshot(snapshot);
        store.mark_ready();
        Ok(store)
    }

    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        for stored in ops {
            if stored.seq <= self.replica.latest_op_seq() {
                continue;
            }
            self.replica.apply_replayed_op(stored.clone())?;
            self.dirty = true;
        }
        self.flush()?;
        Ok(self.replica.latest_op_seq())
    }

    fn flush(&mut self) -> PersistResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.write_document()?;
        self.dirty = false;
        Ok(())
    }
}
