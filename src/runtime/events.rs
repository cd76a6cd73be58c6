//! Runtime event stream payloads.

use crate::{
    op::Op,
    types::{GameId, OpSeq, PlayerId},
};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Stored state was loaded and actions are now being applied.
    Rehydrated,
    /// A game became live, by creation or restart.
    GameStarted {
        /// New live game id.
        game_id: GameId,
        /// Game archived to make room, if any.
        archived: Option<GameId>,
    },
    /// A player joined the live game.
    PlayerAdded {
        /// New player id.
        player_id: PlayerId,
    },
    /// The live ledger changed.
    ScoresChanged,
    /// The live game was archived and the slot emptied.
    GameFinished {
        /// Archived game id.
        game_id: GameId,
    },
    /// A history entry was resumed.
    GameLoaded {
        /// Resumed game id.
        game_id: GameId,
    },
    /// The live game was discarded.
    CurrentCleared,
    /// History was emptied.
    HistoryCleared,
    /// The live game's ranking direction changed.
    ReverseScoringChanged {
        /// New flag value.
        enabled: bool,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
    /// A storage read or write failed; in-memory state is unaffected.
    PersistFailed {
        /// Rendered error.
        message: String,
    },
}

impl From<&Op> for GameEvent {
    fn from(op: &Op) -> Self {
        match op {
            Op::StartGame { archive, game } => GameEvent::GameStarted {
                game_id: game.id.clone(),
                archived: archive.as_ref().map(|e| e.game.id.clone()),
            },
            Op::AddPlayer { player } => GameEvent::PlayerAdded {
                player_id: player.id.clone(),
            },
            Op::AddScore { .. }
            | Op::UpdateScore { .. }
            | Op::DeleteRound { .. }
            | Op::CompleteRound { .. } => GameEvent::ScoresChanged,
            Op::Finish { entry } => GameEvent::GameFinished {
                game_id: entry.game.id.clone(),
            },
            Op::Load { entry } => GameEvent::GameLoaded {
                game_id: entry.game.id.clone(),
            },
            Op::ClearCurrent => GameEvent::CurrentCleared,
            Op::ClearHistory => GameEvent::HistoryCleared,
            Op::SetReverseScoring { enabled } => GameEvent::ReverseScoringChanged { enabled: *enabled },
        }
    }
}
