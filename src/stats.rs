//! Keyed cache for aggregate user statistics.
//!
//! Entries are keyed by `(entity, scope)` where scope is `central` or
//! `tenant:{id}`. Writes to the user table invalidate the exact key for the
//! current scope; nothing is updated incrementally, so a stale count never
//! survives past one invalidation cycle. Entries also age out after five
//! minutes, matching the original cache TTL.

use moka::sync::Cache;
use serde::Serialize;
use std::time::Duration;
use utoipa::ToSchema;

const STATS_TTL: Duration = Duration::from_secs(300);

/// Compound cache key. Invalidation is exact-match, never pattern based.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StatsKey {
    pub entity: &'static str,
    pub scope: String,
}

impl StatsKey {
    #[must_use]
    pub fn users(scope: String) -> Self {
        Self {
            entity: "users",
            scope,
        }
    }
}

/// Aggregate counts shown on the user list.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct UserStats {
    pub total_users: i64,
    pub active_users: i64,
    pub new_this_week: i64,
}

#[derive(Clone)]
pub struct StatsCache {
    inner: Cache<StatsKey, UserStats>,
}

impl StatsCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Cache::builder().time_to_live(STATS_TTL).build(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &StatsKey) -> Option<UserStats> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: StatsKey, stats: UserStats) {
        self.inner.insert(key, stats);
    }

    /// Drop the cached aggregates for one scope. Scopes map 1:1 to guard
    /// contexts, so central writes never evict tenant entries and vice versa.
    pub fn invalidate_users(&self, scope: &str) {
        self.inner.invalidate(&StatsKey::users(scope.to_string()));
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: i64) -> UserStats {
        UserStats {
            total_users: total,
            active_users: total,
            new_this_week: 0,
        }
    }

    #[test]
    fn invalidation_is_scope_exact() {
        let cache = StatsCache::new();
        cache.insert(StatsKey::users("central".to_string()), stats(10));
        cache.insert(StatsKey::users("tenant:acme".to_string()), stats(3));
        cache.insert(StatsKey::users("tenant:globex".to_string()), stats(7));

        cache.invalidate_users("tenant:acme");

        assert!(cache.get(&StatsKey::users("tenant:acme".to_string())).is_none());
        assert_eq!(
            cache
                .get(&StatsKey::users("central".to_string()))
                .map(|s| s.total_users),
            Some(10)
        );
        assert_eq!(
            cache
                .get(&StatsKey::users("tenant:globex".to_string()))
                .map(|s| s.total_users),
            Some(7)
        );
    }

    #[test]
    fn central_invalidation_leaves_tenants_alone() {
        let cache = StatsCache::new();
        cache.insert(StatsKey::users("central".to_string()), stats(10));
        cache.insert(StatsKey::users("tenant:acme".to_string()), stats(3));

        cache.invalidate_users("central");

        assert!(cache.get(&StatsKey::users("central".to_string())).is_none());
        assert!(cache.get(&StatsKey::users("tenant:acme".to_string())).is_some());
    }
}
