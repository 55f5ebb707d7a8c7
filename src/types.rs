use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const MAX_ID_LEN: usize = 128;

fn validate_id(value: &str, kind: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidId(format!("{kind} must not be empty")));
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(Error::InvalidId(format!(
            "{kind} length must be <= {MAX_ID_LEN}"
        )));
    }
    if !trimmed.chars().all(is_allowed_id_char) {
        return Err(Error::InvalidId(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn is_allowed_id_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ':' | '_' | '-' | '.')
}

macro_rules! define_id_type {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                validate_id(value.as_ref(), $kind).map(Self)
            }

            /// Creates an identifier from a trusted string without validation.
            pub fn from_string(value: String) -> Self {
                Self(value)
            }

            /// Returns the underlying string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from_string(value)
            }
        }
    };
}

define_id_type!(
    /// User identifier.
    UserId,
    "user id"
);
define_id_type!(
    /// Household identifier.
    HouseholdId,
    "household id"
);

/// Action a rule grants or denies.
///
/// [`Action::Manage`] is a wildcard: a rule carrying it matches every action.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Manage,
}

impl Action {
    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "manage" => Ok(Action::Manage),
            other => Err(Error::MalformedRuleSet(format!("unknown action `{other}`"))),
        }
    }
}

/// Tag identifying a domain entity class.
///
/// The well-known household entities are associated constants; other tags can
/// be created with [`SubjectType::new`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectType(Cow<'static, str>);

impl SubjectType {
    pub const USER: SubjectType = SubjectType(Cow::Borrowed("User"));
    pub const HOUSEHOLD: SubjectType = SubjectType(Cow::Borrowed("Household"));
    pub const HOUSEHOLD_MEMBER: SubjectType = SubjectType(Cow::Borrowed("HouseholdMember"));
    pub const MESSAGE: SubjectType = SubjectType(Cow::Borrowed("Message"));

    /// Creates a subject tag. Tags must be non-empty and free of commas and
    /// whitespace, since the packed form joins them with `,`.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() || value.chars().any(|ch| ch == ',' || ch.is_whitespace()) {
            return Err(Error::InvalidId(format!("invalid subject type `{value}`")));
        }
        Ok(Self(Cow::Owned(value)))
    }

    /// Returns the tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SubjectType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "User" => Ok(Self::USER),
            "Household" => Ok(Self::HOUSEHOLD),
            "HouseholdMember" => Ok(Self::HOUSEHOLD_MEMBER),
            "Message" => Ok(Self::MESSAGE),
            other => Self::new(other),
        }
    }
}

/// Role a user holds inside one household.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum HouseholdRole {
    #[serde(rename = "MANAGER")]
    Manager,
    #[serde(rename = "MEMBER")]
    Member,
    #[serde(rename = "AI")]
    Ai,
}

impl HouseholdRole {
    /// Returns the wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            HouseholdRole::Manager => "MANAGER",
            HouseholdRole::Member => "MEMBER",
            HouseholdRole::Ai => "AI",
        }
    }
}

impl fmt::Display for HouseholdRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One household membership of a user.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdMembership {
    pub household_id: HouseholdId,
    pub role: HouseholdRole,
}

impl HouseholdMembership {
    pub fn new(household_id: HouseholdId, role: HouseholdRole) -> Self {
        Self { household_id, role }
    }
}

/// Snapshot of everything the compiler needs to know about one user.
///
/// A context is assembled fresh for every compile and never updated in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: UserId,
    #[serde(default)]
    pub households: Vec<HouseholdMembership>,
    #[serde(default)]
    pub managed_user_ids: Vec<UserId>,
    #[serde(default)]
    pub ai_users_by_household: HashMap<HouseholdId, Vec<UserId>>,
    #[serde(default)]
    pub household_members_by_household: HashMap<HouseholdId, Vec<UserId>>,
}

impl UserContext {
    /// Creates an empty context for `user_id`.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            households: Vec::new(),
            managed_user_ids: Vec::new(),
            ai_users_by_household: HashMap::new(),
            household_members_by_household: HashMap::new(),
        }
    }

    /// Adds a household membership.
    pub fn with_household(mut self, household_id: HouseholdId, role: HouseholdRole) -> Self {
        self.households
            .push(HouseholdMembership::new(household_id, role));
        self
    }

    /// Adds users managed directly by this user.
    pub fn with_managed_users(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.managed_user_ids.extend(users);
        self
    }

    /// Sets the AI users of a household.
    pub fn with_ai_users(
        mut self,
        household_id: HouseholdId,
        users: impl IntoIterator<Item = UserId>,
    ) -> Self {
        self.ai_users_by_household
            .insert(household_id, users.into_iter().collect());
        self
    }

    /// Sets the members of a household.
    pub fn with_members(
        mut self,
        household_id: HouseholdId,
        users: impl IntoIterator<Item = UserId>,
    ) -> Self {
        self.household_members_by_household
            .insert(household_id, users.into_iter().collect());
        self
    }

    /// Household ids in which the user holds `role`, in membership order.
    pub fn households_with_role(&self, role: HouseholdRole) -> Vec<HouseholdId> {
        self.households
            .iter()
            .filter(|membership| membership.role == role)
            .map(|membership| membership.household_id.clone())
            .collect()
    }

    /// Returns true when every membership is [`HouseholdRole::Ai`] and there is
    /// at least one.
    pub fn is_pure_ai(&self) -> bool {
        !self.households.is_empty()
            && self
                .households
                .iter()
                .all(|membership| membership.role == HouseholdRole::Ai)
    }
}
