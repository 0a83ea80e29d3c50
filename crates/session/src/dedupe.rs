use std::time::Duration;

use moka::sync::Cache;
use teleportal_primitives::MessageId;

/// TTL-bounded set of recently-applied message ids, per session (§3
/// Session, §8 invariant 4: "at most one apply occurs within the TTL
/// window"). 30s is the suggested default where the source is silent
/// (§9 open question 3).
pub const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(30);

pub struct DedupeCache {
    seen: Cache<MessageId, ()>,
}

impl DedupeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_DEDUPE_TTL)
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Returns `true` the first time `id` is observed within the TTL
    /// window, `false` on every subsequent observation until it expires.
    pub fn observe(&self, id: &MessageId) -> bool {
        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.clone(), ());
        true
    }
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new()
    }
}
