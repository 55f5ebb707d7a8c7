//! Per-user rule sets with lazy compilation, persistence and invalidation.

use crate::cache::{Cache, NoCache};
use crate::codec::{PackedRules, pack, unpack};
use crate::compiler::{compile, load_context};
use crate::error::{Error, Result};
use crate::rule::RuleSet;
use crate::store::Store;
use crate::types::{HouseholdId, UserContext, UserId};
use futures::lock::Mutex as AsyncMutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Resolves rule sets for users, in order of preference, from the cache, from
/// the persisted packed form, or by compiling fresh role data.
///
/// Every write for a user (compile, persist, cache fill, invalidation) runs
/// under that user's gate, so an invalidation waits for an in-flight compute
/// and then removes what it stored. Concurrent misses for the same user are
/// coalesced: one caller compiles while the others wait and then read the
/// cache. Different users never wait on each other. No std lock is held
/// across a store call, and the cache is only written after a complete,
/// successful recompute.
pub struct PermissionCache<S, C = NoCache> {
    store: S,
    cache: C,
    in_flight: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
    // Users with compiled rules, per household they belonged to at compile
    // time. Entries are pruned when the user is invalidated.
    household_index: Mutex<HashMap<HouseholdId, HashSet<UserId>>>,
}

impl<S, C> PermissionCache<S, C> {
    /// Creates a permission cache over `store` and `cache`.
    pub fn new(store: S, cache: C) -> Self {
        Self {
            store,
            cache,
            in_flight: Mutex::new(HashMap::new()),
            household_index: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    fn gate(&self, user: &UserId) -> Arc<AsyncMutex<()>> {
        let mut flights = self.in_flight.lock().expect("poisoned lock");
        flights
            .entry(user.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_gate(&self, user: &UserId, gate: Arc<AsyncMutex<()>>) {
        let mut flights = self.in_flight.lock().expect("poisoned lock");
        // Two references left means only the map and this caller hold the
        // gate, so nobody is waiting on it.
        if Arc::strong_count(&gate) == 2
            && flights
                .get(user)
                .is_some_and(|current| Arc::ptr_eq(current, &gate))
        {
            flights.remove(user);
        }
    }

    fn remember_households(&self, context: &UserContext) {
        let mut index = self.household_index.lock().expect("poisoned lock");
        for membership in &context.households {
            index
                .entry(membership.household_id.clone())
                .or_default()
                .insert(context.user_id.clone());
        }
    }

    fn forget_user(&self, user: &UserId) {
        let mut index = self.household_index.lock().expect("poisoned lock");
        index.retain(|_, users| {
            users.remove(user);
            !users.is_empty()
        });
    }

    #[cfg(test)]
    pub(crate) fn indexed_households(&self) -> usize {
        self.household_index.lock().expect("poisoned lock").len()
    }
}

impl<S, C> PermissionCache<S, C>
where
    S: Store,
    C: Cache,
{
    /// Returns the rule set of `user`, computing it at most once for
    /// concurrent callers.
    pub async fn get_or_compute(&self, user: &UserId) -> Result<RuleSet> {
        if let Some(rules) = self.cached(user).await {
            return Ok(rules);
        }

        let gate = self.gate(user);
        let result = {
            let _turn = gate.lock().await;
            match self.cached(user).await {
                Some(rules) => Ok(rules),
                None => self.load_or_compile(user).await,
            }
        };
        self.release_gate(user, gate);
        result
    }

    /// Drops the cached and persisted rules of `user`; the next lookup
    /// compiles fresh role data. Unknown users are a no-op.
    ///
    /// Waits for an in-flight compute of the same user to finish first.
    pub async fn invalidate(&self, user: &UserId) -> Result<()> {
        let gate = self.gate(user);
        let result = {
            let _turn = gate.lock().await;
            self.clear(user).await
        };
        self.release_gate(user, gate);
        result
    }

    /// Invalidates every member of `household` and returns them.
    ///
    /// Members are the household's current members according to the role
    /// store plus every user this cache compiled as a member, so users who
    /// just left are included.
    pub async fn invalidate_household(&self, household: &HouseholdId) -> Result<Vec<UserId>> {
        let users = self.household_users(household).await?;
        for user in &users {
            self.invalidate(user).await?;
        }
        debug!(household = %household, users = users.len(), "invalidated household");
        Ok(users)
    }

    /// Current and previously compiled members of `household`, sorted.
    pub(crate) async fn household_users(&self, household: &HouseholdId) -> Result<Vec<UserId>> {
        let current = self
            .store
            .household_members(household.clone())
            .await
            .map_err(Error::RoleDataUnavailable)?;
        let previous = self
            .household_index
            .lock()
            .expect("poisoned lock")
            .get(household)
            .cloned()
            .unwrap_or_default();

        let users: BTreeSet<UserId> = current.into_iter().chain(previous).collect();
        Ok(users.into_iter().collect())
    }

    async fn clear(&self, user: &UserId) -> Result<()> {
        self.cache.invalidate_user(user).await;
        self.store
            .clear_rules(user.clone())
            .await
            .map_err(Error::Persistence)?;
        // Only after the persisted form is gone, so a failed attempt can be
        // retried through the household index.
        self.forget_user(user);
        debug!(user = %user, "invalidated rules");
        Ok(())
    }

    async fn cached(&self, user: &UserId) -> Option<RuleSet> {
        let packed = self.cache.get_rules(user).await?;
        match unpack(&packed) {
            Ok(rules) => {
                debug!(user = %user, "rule cache hit");
                Some(rules)
            }
            Err(err) => {
                warn!(user = %user, error = %err, "discarding malformed cached rules");
                self.cache.invalidate_user(user).await;
                None
            }
        }
    }

    // Callers hold the user's gate.
    async fn load_or_compile(&self, user: &UserId) -> Result<RuleSet> {
        let persisted = self
            .store
            .load_rules(user.clone())
            .await
            .map_err(Error::Persistence)?;

        if let Some(packed) = persisted {
            match unpack(&packed) {
                Ok(rules) => {
                    debug!(user = %user, rules = rules.len(), "loaded persisted rules");
                    self.cache.set_rules(user, packed).await;
                    return Ok(rules);
                }
                Err(err) => {
                    warn!(user = %user, error = %err, "discarding malformed persisted rules");
                }
            }
        }

        self.compile_and_store(user).await
    }

    async fn compile_and_store(&self, user: &UserId) -> Result<RuleSet> {
        debug!(user = %user, "rule cache miss; compiling");
        let context = load_context(&self.store, user).await?;
        let rules = compile(&context);
        let packed: PackedRules = pack(&rules);

        self.store
            .save_rules(user.clone(), packed.clone())
            .await
            .map_err(Error::Persistence)?;
        self.remember_households(&context);
        self.cache.set_rules(user, packed).await;
        Ok(rules)
    }
}
