//! Shared primitive IDs and scalar aliases.

use chrono::{DateTime, Utc};

/// Opaque, collision-resistant player identifier.
pub type PlayerId = String;
/// Opaque, collision-resistant game identifier.
pub type GameId = String;
/// Signed points for one round. Penalty rounds may be negative.
pub type Points = i64;
/// Competition rank, 1 being the best.
pub type Rank = u32;
/// Monotonic operation sequence number.
pub type OpSeq = u64;
/// Wall-clock instant, serialized as ISO-8601.
pub type Timestamp = DateTime<Utc>;
