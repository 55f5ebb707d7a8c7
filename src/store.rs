use crate::codec::PackedRules;
use crate::error::StoreError;
use crate::types::{HouseholdId, HouseholdMembership, UserId};
use async_trait::async_trait;

/// Read-only source of the role data a [`UserContext`](crate::UserContext) is
/// built from.
#[async_trait]
pub trait RoleStore {
    /// Returns the households a user belongs to and the role held in each.
    async fn household_roles_for_user(
        &self,
        user: UserId,
    ) -> std::result::Result<Vec<HouseholdMembership>, StoreError>;

    /// Returns users managed directly by `user`.
    async fn managed_users(&self, user: UserId) -> std::result::Result<Vec<UserId>, StoreError>;

    /// Returns the AI users of a household.
    async fn ai_users(
        &self,
        household: HouseholdId,
    ) -> std::result::Result<Vec<UserId>, StoreError>;

    /// Returns every member of a household, whatever their role.
    async fn household_members(
        &self,
        household: HouseholdId,
    ) -> std::result::Result<Vec<UserId>, StoreError>;
}

/// Persistence of packed rule sets alongside the user record.
///
/// The persisted form is authoritative over any cache and must stay readable
/// across restarts.
#[async_trait]
pub trait RuleStore {
    /// Loads the persisted rules of a user, if any.
    async fn load_rules(
        &self,
        user: UserId,
    ) -> std::result::Result<Option<PackedRules>, StoreError>;

    /// Replaces the persisted rules of a user.
    async fn save_rules(
        &self,
        user: UserId,
        rules: PackedRules,
    ) -> std::result::Result<(), StoreError>;

    /// Removes the persisted rules of a user. Removing absent rules succeeds.
    async fn clear_rules(&self, user: UserId) -> std::result::Result<(), StoreError>;
}

/// Composite store trait.
pub trait Store: RoleStore + RuleStore + Send + Sync {}

impl<T> Store for T where T: RoleStore + RuleStore + Send + Sync {}
