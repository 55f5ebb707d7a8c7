use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use async_trait::async_trait;
use crate::codec::PackedRules;
use crate::store::{RoleStore, RuleStore};
use crate::types::{HouseholdId, HouseholdMembership, HouseholdRole, UserId};

/// In-memory store implementation for tests and demos.
///
/// AI users and household members are derived from the membership table, so
/// a single [`set_role`](MemoryStore::set_role) keeps every view consistent.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    households: RwLock<HashMap<HouseholdId, BTreeMap<UserId, HouseholdRole>>>,
    managed: RwLock<HashMap<UserId, BTreeSet<UserId>>>,
    rules: RwLock<HashMap<UserId, PackedRules>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user to a household, or changes the role they hold there.
    pub fn set_role(&self, household: HouseholdId, user: UserId, role: HouseholdRole) {
        let mut guard = self.inner.households.write().expect("poisoned lock");
        guard.entry(household).or_default().insert(user, role);
    }

    /// Removes a user from a household.
    pub fn remove_member(&self, household: &HouseholdId, user: &UserId) {
        let mut guard = self.inner.households.write().expect("poisoned lock");
        if let Some(members) = guard.get_mut(household) {
            members.remove(user);
            if members.is_empty() {
                guard.remove(household);
            }
        }
    }

    /// Records that `manager` directly manages `user`.
    pub fn add_managed_user(&self, manager: UserId, user: UserId) {
        let mut guard = self.inner.managed.write().expect("poisoned lock");
        guard.entry(manager).or_default().insert(user);
    }

    /// Ends a managed relationship.
    pub fn remove_managed_user(&self, manager: &UserId, user: &UserId) {
        let mut guard = self.inner.managed.write().expect("poisoned lock");
        if let Some(users) = guard.get_mut(manager) {
            users.remove(user);
        }
    }

    /// Returns the persisted rules of a user without going through the trait.
    pub fn persisted_rules(&self, user: &UserId) -> Option<PackedRules> {
        let guard = self.inner.rules.read().expect("poisoned lock");
        guard.get(user).cloned()
    }

    fn members_where(
        &self,
        household: &HouseholdId,
        keep: impl Fn(HouseholdRole) -> bool,
    ) -> Vec<UserId> {
        let guard = self.inner.households.read().expect("poisoned lock");
        guard
            .get(household)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, role)| keep(**role))
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn household_roles_for_user(
        &self,
        user: UserId,
    ) -> std::result::Result<Vec<HouseholdMembership>, crate::StoreError> {
        let guard = self.inner.households.read().expect("poisoned lock");
        let mut memberships: Vec<HouseholdMembership> = guard
            .iter()
            .filter_map(|(household, members)| {
                members
                    .get(&user)
                    .map(|role| HouseholdMembership::new(household.clone(), *role))
            })
            .collect();
        memberships.sort_by(|a, b| a.household_id.cmp(&b.household_id));
        Ok(memberships)
    }

    async fn managed_users(
        &self,
        user: UserId,
    ) -> std::result::Result<Vec<UserId>, crate::StoreError> {
        let guard = self.inner.managed.read().expect("poisoned lock");
        Ok(guard
            .get(&user)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn ai_users(
        &self,
        household: HouseholdId,
    ) -> std::result::Result<Vec<UserId>, crate::StoreError> {
        Ok(self.members_where(&household, |role| role == HouseholdRole::Ai))
    }

    async fn household_members(
        &self,
        household: HouseholdId,
    ) -> std::result::Result<Vec<UserId>, crate::StoreError> {
        Ok(self.members_where(&household, |_| true))
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn load_rules(
        &self,
        user: UserId,
    ) -> std::result::Result<Option<PackedRules>, crate::StoreError> {
        Ok(self.persisted_rules(&user))
    }

    async fn save_rules(
        &self,
        user: UserId,
        rules: PackedRules,
    ) -> std::result::Result<(), crate::StoreError> {
        let mut guard = self.inner.rules.write().expect("poisoned lock");
        guard.insert(user, rules);
        Ok(())
    }

    async fn clear_rules(&self, user: UserId) -> std::result::Result<(), crate::StoreError> {
        let mut guard = self.inner.rules.write().expect("poisoned lock");
        guard.remove(&user);
        Ok(())
    }
}
