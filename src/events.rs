use crate::types::{HouseholdId, UserId};
use serde::{Deserialize, Serialize};

/// Inbound event signalling that role data changed.
///
/// Serialized with an `event` tag carrying the dotted event name:
///
/// ```
/// use household_authz::RoleEvent;
/// let event: RoleEvent = serde_json::from_str(
///     r#"{"event": "household.member.role_changed", "householdId": "h1", "userId": "u2"}"#,
/// )
/// .unwrap();
/// assert_eq!(event.name(), "household.member.role_changed");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RoleEvent {
    #[serde(rename = "household.member.added", rename_all = "camelCase")]
    MemberAdded {
        household_id: HouseholdId,
        user_id: UserId,
    },
    #[serde(rename = "household.member.removed", rename_all = "camelCase")]
    MemberRemoved {
        household_id: HouseholdId,
        user_id: UserId,
    },
    #[serde(rename = "household.member.role_changed", rename_all = "camelCase")]
    RoleChanged {
        household_id: HouseholdId,
        user_id: UserId,
    },
    #[serde(rename = "user.managed_relationship_changed", rename_all = "camelCase")]
    ManagedRelationshipChanged { user_id: UserId },
}

impl RoleEvent {
    /// Returns the dotted event name.
    pub fn name(&self) -> &'static str {
        match self {
            RoleEvent::MemberAdded { .. } => "household.member.added",
            RoleEvent::MemberRemoved { .. } => "household.member.removed",
            RoleEvent::RoleChanged { .. } => "household.member.role_changed",
            RoleEvent::ManagedRelationshipChanged { .. } => "user.managed_relationship_changed",
        }
    }

    /// The user named by the event.
    pub fn user(&self) -> &UserId {
        match self {
            RoleEvent::MemberAdded { user_id, .. }
            | RoleEvent::MemberRemoved { user_id, .. }
            | RoleEvent::RoleChanged { user_id, .. }
            | RoleEvent::ManagedRelationshipChanged { user_id } => user_id,
        }
    }

    /// The household whose structure changed, for household-wide events.
    pub fn household(&self) -> Option<&HouseholdId> {
        match self {
            RoleEvent::MemberAdded { household_id, .. }
            | RoleEvent::MemberRemoved { household_id, .. }
            | RoleEvent::RoleChanged { household_id, .. } => Some(household_id),
            RoleEvent::ManagedRelationshipChanged { .. } => None,
        }
    }
}
