//! Round-by-round scorekeeping: a signed-points ledger per player, competition
//! rankings, and a persisted store that moves games between the live slot and
//! history.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::GameStore`]:
//! ```
//! use scorekeep::{core::store::GameStore, game::new_player};
//!
//! let alice = new_player("Alice");
//! let bob = new_player("Bob");
//! let mut store = GameStore::new();
//! store.create_game(&[alice.clone(), bob.clone()]);
//! store.add_score(&alice.id, 10);
//! store.add_score(&bob.id, 5);
//!
//! let state = store.state();
//! assert_eq!(state.round_count(), 1);
//! assert_eq!(state.rankings()[&alice.id], 1);
//! ```
//!
//! Runtime usage with a SQLite sink:
//! ```no_run
//! use scorekeep::{
//!     game::new_player,
//!     persist::sqlite::SqliteOpSink,
//!     runtime::handle::{spawn_scorekeeper, RuntimeConfig},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteOpSink::open("scores.db").expect("open sqlite");
//! let handle = spawn_scorekeeper(Some(Box::new(sink)), RuntimeConfig::default());
//! handle.wait_ready().await.expect("ready");
//! handle.create_game(vec![new_player("Alice")]).await.expect("create");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// In-memory store, state and selectors.
pub mod core;
/// Human-readable timestamp labels.
pub mod date;
/// Player, game and history records.
pub mod game;
/// Per-player score ledger.
pub mod ledger;
/// Mutation op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and sink implementations.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
