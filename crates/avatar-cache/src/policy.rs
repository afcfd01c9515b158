//! Staleness policy: pure decision on whether a cached avatar needs a refresh

use crate::types::CacheEntry;
use chrono::{DateTime, Duration, Utc};

/// Cached avatars are refreshed after this many days, for both the batch
/// and the client variants.
pub const DEFAULT_TTL_DAYS: i64 = 7;

pub fn default_ttl() -> Duration {
    Duration::days(DEFAULT_TTL_DAYS)
}

/// Decide whether a key's cached blob must be refreshed.
///
/// Total over all inputs. Callers that can observe storage directly (the
/// batch reconciler) pass `None` when the underlying file is missing, so a
/// metadata entry without a backing file self-heals as stale.
pub fn is_stale(
    entry: Option<&CacheEntry>,
    now: DateTime<Utc>,
    force: bool,
    ttl: Duration,
) -> bool {
    if force {
        return true;
    }
    match entry {
        None => true,
        Some(entry) => now - entry.last_updated > ttl,
    }
}
