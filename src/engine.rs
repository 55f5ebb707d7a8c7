use crate::cache::{Cache, NoCache};
use crate::condition::Subject;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::RoleEvent;
use crate::permission_cache::PermissionCache;
use crate::rule::RuleSet;
use crate::store::Store;
use crate::types::{Action, HouseholdId, SubjectType, UserId};
use std::collections::BTreeSet;

/// Authorization facade over a store and an optional cache.
///
/// The engine owns its [`PermissionCache`]; create one per service and share
/// it (e.g. behind an `Arc`) rather than keeping rules in global state.
pub struct Engine<S, C = NoCache> {
    permissions: PermissionCache<S, C>,
    eager_recompute: bool,
}

/// Builder for [`Engine`].
pub struct EngineBuilder<S, C = NoCache> {
    store: S,
    cache: C,
    eager_recompute: bool,
}

impl<S> EngineBuilder<S, NoCache> {
    /// Creates a new builder with default configuration.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: NoCache,
            eager_recompute: EngineConfig::default().eager_recompute,
        }
    }
}

impl<S, C> EngineBuilder<S, C> {
    /// Enables or disables recomputing affected users when an event arrives.
    pub fn eager_recompute(mut self, on: bool) -> Self {
        self.eager_recompute = on;
        self
    }

    /// Applies the engine-level settings of `config`.
    ///
    /// Cache sizing is applied where the cache is built, see
    /// `MemoryCache::from_config`.
    pub fn config(self, config: &EngineConfig) -> Self {
        self.eager_recompute(config.eager_recompute)
    }

    /// Sets the cache implementation.
    pub fn cache<C2: Cache>(self, cache: C2) -> EngineBuilder<S, C2> {
        EngineBuilder {
            store: self.store,
            cache,
            eager_recompute: self.eager_recompute,
        }
    }

    /// Builds the engine.
    pub fn build(self) -> Engine<S, C> {
        Engine {
            permissions: PermissionCache::new(self.store, self.cache),
            eager_recompute: self.eager_recompute,
        }
    }
}

impl<S, C> Engine<S, C> {
    /// Returns the underlying permission cache.
    pub fn permissions(&self) -> &PermissionCache<S, C> {
        &self.permissions
    }

    /// Returns the backing store.
    pub fn store(&self) -> &S {
        self.permissions.store()
    }
}

impl<S, C> Engine<S, C>
where
    S: Store,
    C: Cache,
{
    /// Decides whether `user` may perform `action` on `subject_type`.
    ///
    /// With an `instance`, rule conditions are evaluated against it; without
    /// one the answer is whether the action is allowed on some instance.
    /// Failing to obtain the user's rules is an error, never a silent deny.
    pub async fn can(
        &self,
        user: &UserId,
        action: Action,
        subject_type: &SubjectType,
        instance: Option<&dyn Subject>,
    ) -> Result<bool> {
        let rules = self.permissions.get_or_compute(user).await?;
        let allowed = rules.can(action, subject_type, instance);
        tracing::trace!(
            user = %user,
            action = %action,
            subject = %subject_type,
            allowed,
            "authorization check"
        );
        Ok(allowed)
    }

    /// Returns the current rule set of `user`.
    pub async fn rules_for(&self, user: &UserId) -> Result<RuleSet> {
        self.permissions.get_or_compute(user).await
    }

    /// Drops the rules of one user.
    pub async fn invalidate_user(&self, user: &UserId) -> Result<()> {
        self.permissions.invalidate(user).await
    }

    /// Drops the rules of every member of a household.
    pub async fn invalidate_household(&self, household: &HouseholdId) -> Result<Vec<UserId>> {
        self.permissions.invalidate_household(household).await
    }

    /// Applies a role-change event and returns the invalidated users, sorted.
    ///
    /// Household events reach the named user and every member of the
    /// household, since membership changes alter everyone's user visibility.
    /// With eager recompute enabled the affected users are compiled and
    /// persisted before this returns.
    pub async fn handle_event(&self, event: &RoleEvent) -> Result<Vec<UserId>> {
        let mut affected = BTreeSet::new();
        affected.insert(event.user().clone());
        if let Some(household) = event.household() {
            affected.extend(self.permissions.household_users(household).await?);
        }

        for user in &affected {
            self.permissions.invalidate(user).await?;
        }
        if self.eager_recompute {
            for user in &affected {
                self.permissions.get_or_compute(user).await?;
            }
        }

        tracing::info!(
            event = event.name(),
            users = affected.len(),
            eager = self.eager_recompute,
            "applied role event"
        );
        Ok(affected.into_iter().collect())
    }
}
