//! SQLite-backed append-only op journal sink.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    core::store::{GameStore, StoreSnapshotV1},
    op::{Op, StoredOp, StoredOpEnvelope},
    types::{GameId, OpSeq},
};

use super::{OpSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: StoreSnapshotV1,
}

/// SQLite implementation of [`crate::persist::OpSink`].
pub struct SqliteOpSink {
    conn: Connection,
}

impl SqliteOpSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Loads store state from latest snapshot plus tail events.
    ///
    /// An empty database is a first run, not an error.
    pub fn load_store(&self) -> PersistResult<GameStore> {
        let mut store = match self.load_latest_snapshot()? {
            Some(snapshot) => GameStore::from_snapshot(snapshot),
            None => GameStore::new(),
        };

        let events = self.load_events_after(store.latest_op_seq())?;
        let replayed = events.len();
        for event in events {
            store.apply_replayed_op(event)?;
        }
        store.mark_ready();
        info!(
            replayed,
            latest_seq = store.latest_op_seq(),
            history = store.state().history.len(),
            "rehydrated from sqlite"
        );
        Ok(store)
    }

    /// Loads events strictly after `seq`, oldest first.
    ///
    /// The row columns are authoritative for sequence and timestamp.
    pub fn load_events_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM events WHERE seq > ?1 ORDER BY seq ASC")?;
        let rows = stmt.query_map(params![seq as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, Vec<u8>>(2)?))
        })?;

        rows.map(|row| -> PersistResult<StoredOp> {
            let (seq, ts_ms, payload) = row?;
            let mut stored = decode_stored_op_payload(&payload)?;
            stored.seq = seq as OpSeq;
            stored.ts_ms = ts_ms as u64;
            Ok(stored)
        })
        .collect()
    }

    /// Journaled ops that touched `game_id`'s lifecycle, oldest first.
    pub fn lifecycle_events_for(&self, game_id: &str) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM events WHERE game_id = ?1 ORDER BY seq ASC")?;
        let payloads = stmt.query_map(params![game_id], |row| row.get::<_, Vec<u8>>(0))?;

        let mut out = Vec::new();
        for payload in payloads {
            out.push(decode_stored_op_payload(&payload?)?);
        }
        Ok(out)
    }

    /// Writes a snapshot covering `last_seq`.
    pub fn write_snapshot(
        &mut self,
        snapshot: &StoreSnapshotV1,
        last_seq: OpSeq,
    ) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, Utc::now().timestamp_millis(), payload],
        )?;
        debug!(last_seq, "snapshot written");
        Ok(())
    }

    /// Deletes events up to and including `seq`.
    pub fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM events WHERE seq <= ?1", params![seq as i64])?;
        debug!(removed, through = seq, "events compacted");
        Ok(removed)
    }

    /// Returns the latest sequence persisted in the events table.
    pub fn latest_seq(&self) -> PersistResult<OpSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM events", [], |row| row.get::<_, Option<i64>>(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as OpSeq)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::UnsupportedFormat {
                what: "snapshot",
                version: env.format_version,
            });
        }
        Ok(Some(env.snapshot))
    }
}

impl OpSink for SqliteOpSink {
    fn load_store(&mut self) -> PersistResult<GameStore> {
        SqliteOpSink::load_store(self)
    }

    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        if ops.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events(seq, ts_ms, kind, game_id, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in ops {
                let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    stored.op.kind(),
                    lifecycle_game_id(&stored.op),
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = ops.len(), "ops appended");

        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        SqliteOpSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        SqliteOpSink::compact_through(self, seq)
    }
}

fn lifecycle_game_id(op: &Op) -> Option<&GameId> {
    match op {
        Op::StartGame { game, .. } => Some(&game.id),
        Op::Finish { entry } | Op::Load { entry } => Some(&entry.game.id),
        _ => None,
    }
}

fn decode_stored_op_payload(payload: &[u8]) -> PersistResult<StoredOp> {
    let envelope: StoredOpEnvelope = serde_json::from_slice(payload)?;
    if envelope.format_version != crate::op::OP_FORMAT_VERSION {
        return Err(PersistError::UnsupportedFormat {
            what: "op",
            version: envelope.format_version,
        });
    }
    Ok(envelope.stored)
}
