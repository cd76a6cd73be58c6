//! In-memory authoritative store.

/// Game state, selectors and lifecycle actions.
pub mod store;
