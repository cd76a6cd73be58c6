//! Player, game and history records, and the pure lifecycle constructors.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    ledger::Ledger,
    types::{GameId, PlayerId, Timestamp},
};

/// A participant. The id is stable across renames, edits and restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stable player identifier.
    pub id: PlayerId,
    /// Display name; not required to be unique.
    pub name: String,
}

/// Identity of one play session: who plays and when it started. No scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    /// Game identifier, fresh on every create or restart.
    pub id: GameId,
    /// Start instant.
    pub started_at: Timestamp,
    /// Roster in display order.
    pub players: Vec<Player>,
    /// When set, the lowest total ranks first.
    #[serde(default)]
    pub reverse_scoring: bool,
}

impl Game {
    /// Roster ids in display order.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id.clone()).collect()
    }

    /// Looks up a roster member by id.
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }
}

/// Immutable snapshot of a game and its scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Copy of the game identity.
    pub game: Game,
    /// Copy of the ledger at snapshot time.
    pub scores: Ledger,
    /// `None` marks a game that is still live.
    #[serde(with = "finished_at_wire")]
    pub finished_at: Option<Timestamp>,
}

/// Creates a player with a fresh id.
pub fn new_player(name: impl Into<String>) -> Player {
    Player {
        id: fresh_id(),
        name: name.into(),
    }
}

/// Starts a game for `players` with a fresh id and the current time.
pub fn new_game(players: &[Player]) -> Game {
    Game {
        id: fresh_id(),
        started_at: Utc::now(),
        players: players.to_vec(),
        reverse_scoring: false,
    }
}

/// Returns `game` with a newly created player appended to the roster.
pub fn add_player_to(game: &Game, name: impl Into<String>) -> Game {
    let mut next = game.clone();
    next.players.push(new_player(name));
    next
}

/// New game identity over the same roster: same player ids and names.
pub fn restart_same_roster(game: &Game) -> Game {
    Game {
        id: fresh_id(),
        started_at: Utc::now(),
        players: game.players.clone(),
        reverse_scoring: game.reverse_scoring,
    }
}

/// Snapshots `game` and `ledger` as finished now.
pub fn snapshot_to_history(game: &Game, ledger: &Ledger) -> HistoryEntry {
    HistoryEntry {
        game: game.clone(),
        scores: ledger.clone(),
        finished_at: Some(Utc::now()),
    }
}

fn fresh_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// Live entries travel as "" rather than null.
mod finished_at_wire {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::types::Timestamp;

    pub fn serialize<S: Serializer>(value: &Option<Timestamp>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_str(&ts.to_rfc3339()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Timestamp>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        if raw.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(D::Error::custom)
    }
}
