use crate::codec::PackedRules;
use crate::types::UserId;
use async_trait::async_trait;

/// Cache interface for packed per-user rule sets.
///
/// Entries are a performance aid only; the persisted form in the
/// [`RuleStore`](crate::RuleStore) stays authoritative.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Gets the cached rules of a user. Expired entries are misses.
    async fn get_rules(&self, user: &UserId) -> Option<PackedRules>;

    /// Sets the cached rules of a user.
    async fn set_rules(&self, user: &UserId, rules: PackedRules);

    /// Invalidates the cache entry of a user. Unknown users are a no-op.
    async fn invalidate_user(&self, user: &UserId);

    /// Drops every entry.
    async fn clear(&self);
}

/// No-op cache implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get_rules(&self, _user: &UserId) -> Option<PackedRules> {
        None
    }

    async fn set_rules(&self, _user: &UserId, _rules: PackedRules) {}

    async fn invalidate_user(&self, _user: &UserId) {}

    async fn clear(&self) {}
}
