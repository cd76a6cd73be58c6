//! Materialized store operations and persistence wrappers.
//!
//! Generated ids and timestamps are captured in the op, so replaying a journal
//! reproduces the exact same state.

use serde::{Deserialize, Serialize};

use crate::{
    game::{Game, HistoryEntry, Player},
    types::{OpSeq, PlayerId, Points},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Immutable operation appended to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Archive the live game (if any) and make `game` live with an empty ledger.
    StartGame {
        /// Snapshot of the superseded game, appended to history.
        archive: Option<HistoryEntry>,
        /// New live game.
        game: Game,
    },
    /// Append a player to the live roster.
    AddPlayer {
        /// Newly created player.
        player: Player,
    },
    /// Append points to a player's list.
    AddScore {
        /// Scored player.
        player_id: PlayerId,
        /// Points for the round.
        points: Points,
    },
    /// Overwrite one recorded round for a player.
    UpdateScore {
        /// Edited player.
        player_id: PlayerId,
        /// Zero-based round index.
        round_index: usize,
        /// Replacement points.
        points: Points,
    },
    /// Remove a round across all players.
    DeleteRound {
        /// Zero-based round index.
        round_index: usize,
    },
    /// Zero-fill a round for every roster member missing it.
    CompleteRound {
        /// Zero-based round index.
        round_index: usize,
    },
    /// Archive the live game, replacing a history entry with the same game id.
    Finish {
        /// Final snapshot.
        entry: HistoryEntry,
    },
    /// Resume a history entry as the live game.
    Load {
        /// Entry being resumed.
        entry: HistoryEntry,
    },
    /// Discard the live game without archiving.
    ClearCurrent,
    /// Drop every history entry.
    ClearHistory,
    /// Set the live game's ranking direction.
    SetReverseScoring {
        /// New flag value.
        enabled: bool,
    },
}

impl Op {
    /// Short stable label, used for journal rows and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::StartGame { .. } => "start_game",
            Op::AddPlayer { .. } => "add_player",
            Op::AddScore { .. } => "add_score",
            Op::UpdateScore { .. } => "update_score",
            Op::DeleteRound { .. } => "delete_round",
            Op::CompleteRound { .. } => "complete_round",
            Op::Finish { .. } => "finish",
            Op::Load { .. } => "load",
            Op::ClearCurrent => "clear_current",
            Op::ClearHistory => "clear_history",
            Op::SetReverseScoring { .. } => "set_reverse_scoring",
        }
    }

    /// True for ops that move a game in or out of the live slot or history.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Op::StartGame { .. }
                | Op::Finish { .. }
                | Op::Load { .. }
                | Op::ClearCurrent
                | Op::ClearHistory
        )
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
