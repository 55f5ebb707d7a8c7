//! Compiles a user's household roles into an ordered [`RuleSet`].

use crate::condition::{ConditionExpr, FieldPath};
use crate::error::{Error, Result};
use crate::rule::RuleSet;
use crate::store::RoleStore;
use crate::types::{Action, HouseholdId, HouseholdRole, SubjectType, UserContext, UserId};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Builds the rule set for `context`.
///
/// Rules are emitted in a fixed order: own-profile rules, managed-user rules,
/// household rules, the user visibility rule and finally the deny rules for
/// AI-only users. Empty role partitions simply produce no rules.
pub fn compile(context: &UserContext) -> RuleSet {
    let user_id = context.user_id.as_str();
    let pure_ai = context.is_pure_ai();
    let mut builder = RuleSet::builder();

    builder.can(
        [Action::Read, Action::Update],
        SubjectType::USER,
        Some(ConditionExpr::eq(FieldPath::ID, user_id)),
    );

    if !pure_ai && !context.managed_user_ids.is_empty() {
        builder.can(
            [Action::Update],
            SubjectType::USER,
            Some(ids_in(FieldPath::ID, unique(&context.managed_user_ids))),
        );
    }

    let manager_households = context.households_with_role(HouseholdRole::Manager);
    let member_households = context.households_with_role(HouseholdRole::Member);
    let ai_households = context.households_with_role(HouseholdRole::Ai);

    let managed_ai_users: Vec<UserId> = unique(
        manager_households
            .iter()
            .filter_map(|household| context.ai_users_by_household.get(household))
            .flatten(),
    );
    if !managed_ai_users.is_empty() {
        builder.can(
            [Action::Update],
            SubjectType::USER,
            Some(ids_in(FieldPath::ID, managed_ai_users)),
        );
    }

    if !manager_households.is_empty() {
        builder
            .can(
                [Action::Manage],
                SubjectType::HOUSEHOLD,
                Some(households_in(FieldPath::ID, &manager_households)),
            )
            .can(
                [Action::Manage],
                SubjectType::HOUSEHOLD_MEMBER,
                Some(ConditionExpr::all([
                    households_in(FieldPath::HOUSEHOLD_ID, &manager_households),
                    ConditionExpr::ne(FieldPath::ROLE, HouseholdRole::Manager.as_str()),
                ])),
            )
            .can(
                [Action::Manage],
                SubjectType::MESSAGE,
                Some(households_in(FieldPath::HOUSEHOLD_ID, &manager_households)),
            );
    }

    let participant_households = unique(member_households.iter().chain(&ai_households));
    if !participant_households.is_empty() {
        let all_households = unique(
            context
                .households
                .iter()
                .map(|membership| &membership.household_id),
        );
        builder
            .can(
                [Action::Read],
                SubjectType::HOUSEHOLD,
                Some(households_in(FieldPath::ID, &participant_households)),
            )
            .can(
                [Action::Read],
                SubjectType::HOUSEHOLD_MEMBER,
                Some(households_in(FieldPath::HOUSEHOLD_ID, &all_households)),
            )
            .can(
                [Action::Create, Action::Read],
                SubjectType::MESSAGE,
                Some(households_in(FieldPath::HOUSEHOLD_ID, &participant_households)),
            );
    }

    if !member_households.is_empty() {
        builder.can(
            [Action::Update, Action::Delete],
            SubjectType::MESSAGE,
            Some(ConditionExpr::all([
                households_in(FieldPath::HOUSEHOLD_ID, &member_households),
                ConditionExpr::eq(FieldPath::USER_ID, user_id),
            ])),
        );
    }

    let visible_users = unique(
        std::iter::once(&context.user_id).chain(
            context
                .households
                .iter()
                .filter_map(|membership| {
                    context
                        .household_members_by_household
                        .get(&membership.household_id)
                })
                .flatten(),
        ),
    );
    builder.can(
        [Action::Read],
        SubjectType::USER,
        Some(ids_in(FieldPath::ID, visible_users)),
    );

    if pure_ai {
        builder
            .cannot(
                [Action::Update],
                SubjectType::USER,
                Some(ConditionExpr::ne(FieldPath::ID, user_id)),
            )
            .cannot(
                [Action::Create, Action::Update, Action::Delete],
                SubjectType::HOUSEHOLD_MEMBER,
                None,
            );
    }

    let rules = builder.build();
    tracing::debug!(
        user = %context.user_id,
        households = context.households.len(),
        rules = rules.len(),
        pure_ai,
        "compiled rule set"
    );
    rules
}

/// Assembles a fresh [`UserContext`] for `user` from the role store.
///
/// AI users are only fetched for households the user manages, since no other
/// rule refers to them.
pub async fn load_context<S>(store: &S, user: &UserId) -> Result<UserContext>
where
    S: RoleStore + Sync + ?Sized,
{
    let households = store
        .household_roles_for_user(user.clone())
        .await
        .map_err(Error::RoleDataUnavailable)?;
    let managed_user_ids = store
        .managed_users(user.clone())
        .await
        .map_err(Error::RoleDataUnavailable)?;

    let mut ai_users_by_household = HashMap::new();
    let mut household_members_by_household = HashMap::new();
    for membership in &households {
        let household = &membership.household_id;
        if membership.role == HouseholdRole::Manager && !ai_users_by_household.contains_key(household)
        {
            let ai_users = store
                .ai_users(household.clone())
                .await
                .map_err(Error::RoleDataUnavailable)?;
            ai_users_by_household.insert(household.clone(), ai_users);
        }
        if !household_members_by_household.contains_key(household) {
            let members = store
                .household_members(household.clone())
                .await
                .map_err(Error::RoleDataUnavailable)?;
            household_members_by_household.insert(household.clone(), members);
        }
    }

    Ok(UserContext {
        user_id: user.clone(),
        households,
        managed_user_ids,
        ai_users_by_household,
        household_members_by_household,
    })
}

fn unique<'a, T>(items: impl IntoIterator<Item = &'a T>) -> Vec<T>
where
    T: Eq + Hash + Clone + 'a,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}

fn ids_in(path: FieldPath, users: Vec<UserId>) -> ConditionExpr {
    ConditionExpr::is_in(path, users.iter().map(UserId::as_str))
}

fn households_in(path: FieldPath, households: &[HouseholdId]) -> ConditionExpr {
    ConditionExpr::is_in(path, households.iter().map(HouseholdId::as_str))
}
