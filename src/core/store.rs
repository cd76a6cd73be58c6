use chrono::Utc;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    game::{self, Game, HistoryEntry, Player},
    ledger::Ledger,
    op::{Op, StoredOp},
    types::{OpSeq, PlayerId, Points, Rank},
};

/// Raised only when a journaled op cannot apply to the replayed state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The op needs a live game but the slot is empty.
    #[error("op `{0}` requires a live game")]
    NoLiveGame(&'static str),
}

/// The persisted triple: live game, its ledger, and finished games oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Live game, if any.
    pub current_game: Option<Game>,
    /// Ledger of the live game; empty when no game is live.
    #[serde(default)]
    pub current_scores: Ledger,
    /// Archived games, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl GameState {
    /// Rounds recorded in the live game, 0 when none is live.
    pub fn round_count(&self) -> usize {
        match self.current_game {
            Some(_) => self.current_scores.round_count(),
            None => 0,
        }
    }

    /// Live roster totals in display order.
    pub fn totals(&self) -> Vec<(PlayerId, Points)> {
        match &self.current_game {
            Some(game) => self
                .current_scores
                .totals_for(game.players.iter().map(|p| &p.id)),
            None => Vec::new(),
        }
    }

    /// Live roster ranks using the game's own ranking direction.
    pub fn rankings(&self) -> HashMap<PlayerId, Rank> {
        let reverse = self
            .current_game
            .as_ref()
            .is_some_and(|g| g.reverse_scoring);
        self.rankings_with(reverse)
    }

    /// Live roster ranks with an explicit direction.
    pub fn rankings_with(&self, reverse: bool) -> HashMap<PlayerId, Rank> {
        match &self.current_game {
            Some(game) => self
                .current_scores
                .rankings_for(&game.player_ids(), reverse),
            None => HashMap::new(),
        }
    }

    /// Live game, else the game of the most recent history entry.
    pub fn last_game(&self) -> Option<&Game> {
        self.current_game
            .as_ref()
            .or_else(|| self.history.last().map(|e| &e.game))
    }

    /// Most recent history entry, only when no game is live.
    pub fn last_game_history_entry(&self) -> Option<&HistoryEntry> {
        match self.current_game {
            Some(_) => None,
            None => self.history.last(),
        }
    }

    /// Listing for a history screen: the live game first as an unfinished
    /// entry, then the archive without any entry sharing the live game's id.
    pub fn history_for_list(&self) -> Vec<HistoryEntry> {
        let Some(live) = &self.current_game else {
            return self.history.clone();
        };
        let mut out = Vec::with_capacity(self.history.len() + 1);
        out.push(HistoryEntry {
            game: live.clone(),
            scores: self.current_scores.clone(),
            finished_at: None,
        });
        out.extend(
            self.history
                .iter()
                .filter(|e| e.game.id != live.id)
                .cloned(),
        );
        out
    }

    fn live_game(&self, op: &'static str) -> Result<&Game, StoreError> {
        self.current_game.as_ref().ok_or(StoreError::NoLiveGame(op))
    }
}

/// Checkpoint payload: state plus the sequence the next op will take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    /// Sequence assigned to the next committed op.
    pub next_op_seq: OpSeq,
    /// Full game state.
    pub state: GameState,
}

/// Authoritative game state and its lifecycle actions.
///
/// Every action is atomic and total. It returns the committed op, or `None`
/// when it was a no-op: no live game, or an index outside the recorded rounds.
///
/// Committed ops are only buffered for [`GameStore::drain_pending_ops`] once
/// [`GameStore::recording`] is enabled; otherwise callers own the returned op.
#[derive(Debug, Default)]
pub struct GameStore {
    state: GameState,
    ready: bool,
    recording: bool,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
}

impl GameStore {
    /// Empty store, not yet marked ready.
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            ..Self::default()
        }
    }

    /// Rebuilds a store from a checkpoint.
    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Self {
        Self {
            state: snapshot.state,
            next_op_seq: snapshot.next_op_seq.max(1),
            ..Self::default()
        }
    }

    /// Buffers every committed op until drained.
    pub fn recording(mut self) -> Self {
        self.recording = true;
        self
    }

    /// Captures a checkpoint of the current state.
    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        StoreSnapshotV1 {
            next_op_seq: self.next_op_seq,
            state: self.state.clone(),
        }
    }

    /// Current state; all selectors hang off it.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// True once rehydration finished, even when nothing was stored.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Flags rehydration as complete.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Archives the live game, if any, then starts a new game for `players`.
    pub fn create_game(&mut self, players: &[Player]) -> Option<StoredOp> {
        let archive = self
            .state
            .current_game
            .as_ref()
            .map(|g| game::snapshot_to_history(g, &self.state.current_scores));
        let game = game::new_game(players);
        self.commit(Op::StartGame { archive, game })
    }

    /// Appends a new player to the live roster with an empty score list.
    pub fn add_player(&mut self, name: impl Into<String>) -> Option<StoredOp> {
        let current = self.state.current_game.as_ref()?;
        let player = game::add_player_to(current, name).players.pop()?;
        self.commit(Op::AddPlayer { player })
    }

    /// Appends points to a player's list.
    pub fn add_score(&mut self, player_id: &str, points: Points) -> Option<StoredOp> {
        self.state.current_game.as_ref()?;
        self.commit(Op::AddScore {
            player_id: player_id.to_string(),
            points,
        })
    }

    /// Overwrites an already recorded round.
    pub fn update_score(&mut self, player_id: &str, round_index: usize, points: Points) -> Option<StoredOp> {
        self.state.current_game.as_ref()?;
        let recorded = self
            .state
            .current_scores
            .scores_for(player_id)
            .map_or(0, <[Points]>::len);
        if round_index >= recorded {
            return None;
        }
        self.commit(Op::UpdateScore {
            player_id: player_id.to_string(),
            round_index,
            points,
        })
    }

    /// Removes a round from every player that recorded it.
    pub fn delete_round(&mut self, round_index: usize) -> Option<StoredOp> {
        self.state.current_game.as_ref()?;
        if round_index >= self.state.current_scores.round_count() {
            return None;
        }
        self.commit(Op::DeleteRound { round_index })
    }

    /// Zero-fills a round for every roster member missing it.
    ///
    /// Only recorded rounds and the next one can be completed.
    pub fn complete_round(&mut self, round_index: usize) -> Option<StoredOp> {
        let game = self.state.current_game.as_ref()?;
        if round_index > self.state.current_scores.round_count() {
            return None;
        }
        let missing = self
            .state
            .current_scores
            .players_missing_at(&game.player_ids(), round_index);
        if missing.is_empty() {
            return None;
        }
        self.commit(Op::CompleteRound { round_index })
    }

    /// Archives the live game and starts a new one over the same roster.
    pub fn restart_with_same_players(&mut self) -> Option<StoredOp> {
        let current = self.state.current_game.as_ref()?;
        let archive = game::snapshot_to_history(current, &self.state.current_scores);
        let game = game::restart_same_roster(current);
        self.commit(Op::StartGame {
            archive: Some(archive),
            game,
        })
    }

    /// Archives the live game and empties the slot.
    ///
    /// A game resumed from history replaces its original entry in place.
    pub fn finish_and_save_current_game(&mut self) -> Option<StoredOp> {
        let current = self.state.current_game.as_ref()?;
        let entry = game::snapshot_to_history(current, &self.state.current_scores);
        self.commit(Op::Finish { entry })
    }

    /// Resumes `entry` as the live game. History is left untouched.
    pub fn load_from_history(&mut self, entry: &HistoryEntry) -> Option<StoredOp> {
        self.commit(Op::Load {
            entry: entry.clone(),
        })
    }

    /// Discards the live game without archiving it.
    pub fn clear_current_game(&mut self) -> Option<StoredOp> {
        if self.state.current_game.is_none() && self.state.current_scores.is_empty() {
            return None;
        }
        self.commit(Op::ClearCurrent)
    }

    /// Drops every history entry; the live game is kept.
    pub fn clear_history(&mut self) -> Option<StoredOp> {
        self.commit(Op::ClearHistory)
    }

    /// Flips the live game's ranking direction.
    pub fn toggle_reverse_scoring(&mut self) -> Option<StoredOp> {
        let enabled = !self.state.current_game.as_ref()?.reverse_scoring;
        self.commit(Op::SetReverseScoring { enabled })
    }

    /// Re-applies a journaled op without recording it again.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        self.apply_op(&stored.op)?;
        self.bump_next_seq_from(stored.seq);
        Ok(())
    }

    /// Takes the ops committed since the last drain; empty unless recording.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Sequence of the last committed or replayed op.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn commit(&mut self, op: Op) -> Option<StoredOp> {
        if let Err(err) = self.apply_op(&op) {
            // Only reachable from replay-style ops; actions guard first.
            debug!(kind = op.kind(), %err, "action skipped");
            return None;
        }
        let seq = self.take_next_op_seq();
        debug!(seq, kind = op.kind(), "action applied");
        let stored = StoredOp {
            seq,
            ts_ms: now_ms(),
            op,
        };
        if self.recording {
            self.pending_ops.push(stored.clone());
        }
        Some(stored)
    }

    fn apply_op(&mut self, op: &Op) -> Result<(), StoreError> {
        let state = &mut self.state;
        match op {
            Op::StartGame { archive, game } => {
                if let Some(entry) = archive {
                    state.history.push(entry.clone());
                }
                state.current_scores = Ledger::for_players(game.players.iter().map(|p| &p.id));
                state.current_game = Some(game.clone());
            }
            Op::AddPlayer { player } => {
                let existing = state.live_game(op.kind())?.player_ids();
                state.current_scores = state
                    .current_scores
                    .merge_new_players(&existing, std::slice::from_ref(&player.id));
                if let Some(game) = state.current_game.as_mut() {
                    game.players.push(player.clone());
                }
            }
            Op::AddScore { player_id, points } => {
                state.live_game(op.kind())?;
                state.current_scores = state.current_scores.append_score(player_id, *points);
            }
            Op::UpdateScore {
                player_id,
                round_index,
                points,
            } => {
                state.live_game(op.kind())?;
                state.current_scores =
                    state
                        .current_scores
                        .update_score(player_id, *round_index, *points);
            }
            Op::DeleteRound { round_index } => {
                state.live_game(op.kind())?;
                state.current_scores = state.current_scores.delete_round_at(*round_index);
            }
            Op::CompleteRound { round_index } => {
                let roster = state.live_game(op.kind())?.player_ids();
                state.current_scores = state.current_scores.complete_round_at(&roster, *round_index);
            }
            Op::Finish { entry } => {
                match state
                    .history
                    .iter()
                    .position(|e| e.game.id == entry.game.id)
                {
                    Some(idx) => state.history[idx] = entry.clone(),
                    None => state.history.push(entry.clone()),
                }
                state.current_game = None;
                state.current_scores = Ledger::empty();
            }
            Op::Load { entry } => {
                let roster = entry.game.player_ids();
                let present: Vec<PlayerId> = entry.scores.player_ids().cloned().collect();
                state.current_scores = entry.scores.merge_new_players(&present, &roster);
                state.current_game = Some(entry.game.clone());
            }
            Op::ClearCurrent => {
                state.current_game = None;
                state.current_scores = Ledger::empty();
            }
            Op::ClearHistory => {
                state.history.clear();
            }
            Op::SetReverseScoring { enabled } => {
                state.live_game(op.kind())?;
                if let Some(game) = state.current_game.as_mut() {
                    game.reverse_scoring = *enabled;
                }
            }
        }
        Ok(())
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
