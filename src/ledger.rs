//! Per-player round scores and the pure operations over them.
//!
//! A round is not stored as an entity: "round N" is index `N - 1` into every
//! player's list, and the round count is the longest list. Lists may differ in
//! length while a round is in progress.
//!
//! Every operation takes `&self` and returns a fresh [`Ledger`]. Out-of-range
//! indices are silent no-ops, never errors.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::{PlayerId, Points, Rank};

/// Mapping from player id to that player's points, one entry per recorded round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    scores: HashMap<PlayerId, Vec<Points>>,
}

impl Ledger {
    /// Returns a ledger with no players.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a ledger with an empty list for every id in `player_ids`.
    pub fn for_players<'a>(player_ids: impl IntoIterator<Item = &'a PlayerId>) -> Self {
        let scores = player_ids
            .into_iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        Self { scores }
    }

    /// Returns true when no player has an entry, not even an empty list.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Returns the recorded points for `player_id`, if the player is known.
    pub fn scores_for(&self, player_id: &str) -> Option<&[Points]> {
        self.scores.get(player_id).map(Vec::as_slice)
    }

    /// Returns true when `player_id` has a list, even an empty one.
    pub fn contains(&self, player_id: &str) -> bool {
        self.scores.contains_key(player_id)
    }

    /// Iterates over the player ids present in the ledger, in no particular order.
    pub fn player_ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.scores.keys()
    }

    /// Appends `points` to the player's list, creating the list when absent.
    pub fn append_score(&self, player_id: &str, points: Points) -> Self {
        let mut next = self.clone();
        next.scores
            .entry(player_id.to_string())
            .or_default()
            .push(points);
        next
    }

    /// Replaces the value at `round_index` for one player.
    ///
    /// Returns an unchanged copy when the player has no entry at that index.
    pub fn update_score(&self, player_id: &str, round_index: usize, points: Points) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next
            .scores
            .get_mut(player_id)
            .and_then(|list| list.get_mut(round_index))
        {
            *slot = points;
        }
        next
    }

    /// Returns the longest list length, or 0 for an empty ledger.
    pub fn round_count(&self) -> usize {
        self.scores.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Sums one player's points; an unknown player totals 0.
    pub fn total_for(&self, player_id: &str) -> Points {
        self.scores
            .get(player_id)
            .map(|list| list.iter().sum())
            .unwrap_or(0)
    }

    /// Totals for each id in `player_ids`, in the given order.
    pub fn totals_for<'a>(
        &self,
        player_ids: impl IntoIterator<Item = &'a PlayerId>,
    ) -> Vec<(PlayerId, Points)> {
        player_ids
            .into_iter()
            .map(|id| (id.clone(), self.total_for(id)))
            .collect()
    }

    /// Competition ranking of `player_ids` by total.
    ///
    /// Highest total ranks 1, or lowest when `reverse` is set. Tied players
    /// share a rank and the next distinct total ranks `1 + players ahead`.
    pub fn rankings_for(&self, player_ids: &[PlayerId], reverse: bool) -> HashMap<PlayerId, Rank> {
        let mut sorted: Vec<(&PlayerId, Points)> = player_ids
            .iter()
            .map(|id| (id, self.total_for(id)))
            .collect();
        sorted.sort_by(|(_, a), (_, b)| if reverse { a.cmp(b) } else { b.cmp(a) });

        let mut rankings = HashMap::with_capacity(sorted.len());
        let mut current: Rank = 1;
        for (pos, (id, total)) in sorted.iter().enumerate() {
            if pos > 0 && sorted[pos - 1].1 != *total {
                current = Rank::try_from(pos + 1).unwrap_or(Rank::MAX);
            }
            rankings.insert((*id).clone(), current);
        }
        rankings
    }

    /// Removes the entry at `round_index` from every list long enough to hold it.
    ///
    /// Later entries shift down. Lists are kept even when they become empty.
    pub fn delete_round_at(&self, round_index: usize) -> Self {
        let mut next = self.clone();
        for list in next.scores.values_mut() {
            if round_index < list.len() {
                list.remove(round_index);
            }
        }
        next
    }

    /// Pads every listed player with zeros up to and including `round_index`.
    ///
    /// An index with no representable round count leaves the ledger unchanged.
    pub fn complete_round_at(&self, player_ids: &[PlayerId], round_index: usize) -> Self {
        let Some(len) = round_index.checked_add(1) else {
            return self.clone();
        };
        let mut next = self.clone();
        for id in player_ids {
            let list = next.scores.entry(id.clone()).or_default();
            if list.len() < len {
                list.resize(len, 0);
            }
        }
        next
    }

    /// Players from `player_ids`, in order, with no entry at `round_index`.
    pub fn players_missing_at(&self, player_ids: &[PlayerId], round_index: usize) -> Vec<PlayerId> {
        player_ids
            .iter()
            .filter(|id| self.scores.get(*id).map_or(0, Vec::len) <= round_index)
            .cloned()
            .collect()
    }

    /// Adds an empty list for each id in `new_ids` that is not in `existing_ids`.
    pub fn merge_new_players(&self, existing_ids: &[PlayerId], new_ids: &[PlayerId]) -> Self {
        let mut next = self.clone();
        for id in new_ids {
            if !existing_ids.contains(id) {
                next.scores.insert(id.clone(), Vec::new());
            }
        }
        next
    }
}

impl FromIterator<(PlayerId, Vec<Points>)> for Ledger {
    fn from_iter<T: IntoIterator<Item = (PlayerId, Vec<Points>)>>(iter: T) -> Self {
        Self {
            scores: iter.into_iter().collect(),
        }
    }
}
