//! Store double shared by unit tests.

use crate::codec::PackedRules;
use crate::error::StoreError;
use crate::store::{RoleStore, RuleStore};
use crate::types::{HouseholdId, HouseholdMembership, HouseholdRole, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

pub(crate) fn uid(value: &str) -> UserId {
    UserId::new(value).unwrap()
}

pub(crate) fn hid(value: &str) -> HouseholdId {
    HouseholdId::new(value).unwrap()
}

/// Yields once to the executor so concurrent futures interleave.
pub(crate) struct YieldNow(bool);

pub(crate) fn yield_now() -> YieldNow {
    YieldNow(false)
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[derive(Default)]
pub(crate) struct TestStore {
    pub memberships: Mutex<HashMap<UserId, Vec<HouseholdMembership>>>,
    pub managed: Mutex<HashMap<UserId, Vec<UserId>>>,
    pub ai_users: Mutex<HashMap<HouseholdId, Vec<UserId>>>,
    pub persisted: Mutex<HashMap<UserId, PackedRules>>,
    pub role_fetches: AtomicUsize,
    pub saves: AtomicUsize,
    pub fail_roles: AtomicBool,
    pub fail_saves: AtomicBool,
    pub fail_clears: AtomicBool,
}

impl TestStore {
    pub fn add_member(&self, household: &str, user: &str, role: HouseholdRole) {
        let mut guard = self.memberships.lock().unwrap();
        guard
            .entry(uid(user))
            .or_default()
            .push(HouseholdMembership::new(hid(household), role));
        if role == HouseholdRole::Ai {
            let mut ai = self.ai_users.lock().unwrap();
            ai.entry(hid(household)).or_default().push(uid(user));
        }
    }

    pub fn remove_member(&self, household: &str, user: &str) {
        let household = hid(household);
        let mut guard = self.memberships.lock().unwrap();
        if let Some(memberships) = guard.get_mut(&uid(user)) {
            memberships.retain(|membership| membership.household_id != household);
        }
    }

    pub fn set_managed(&self, user: &str, managed: &[&str]) {
        let mut guard = self.managed.lock().unwrap();
        guard.insert(uid(user), managed.iter().map(|id| uid(id)).collect());
    }

    pub fn role_fetches(&self) -> usize {
        self.role_fetches.load(Ordering::SeqCst)
    }

    pub fn persisted(&self, user: &str) -> Option<PackedRules> {
        self.persisted.lock().unwrap().get(&uid(user)).cloned()
    }
}

#[async_trait]
impl RoleStore for TestStore {
    async fn household_roles_for_user(
        &self,
        user: UserId,
    ) -> std::result::Result<Vec<HouseholdMembership>, StoreError> {
        self.role_fetches.fetch_add(1, Ordering::SeqCst);
        yield_now().await;
        if self.fail_roles.load(Ordering::SeqCst) {
            return Err("role store offline".into());
        }
        let guard = self.memberships.lock().unwrap();
        Ok(guard.get(&user).cloned().unwrap_or_default())
    }

    async fn managed_users(&self, user: UserId) -> std::result::Result<Vec<UserId>, StoreError> {
        let guard = self.managed.lock().unwrap();
        Ok(guard.get(&user).cloned().unwrap_or_default())
    }

    async fn ai_users(
        &self,
        household: HouseholdId,
    ) -> std::result::Result<Vec<UserId>, StoreError> {
        let guard = self.ai_users.lock().unwrap();
        Ok(guard.get(&household).cloned().unwrap_or_default())
    }

    async fn household_members(
        &self,
        household: HouseholdId,
    ) -> std::result::Result<Vec<UserId>, StoreError> {
        if self.fail_roles.load(Ordering::SeqCst) {
            return Err("role store offline".into());
        }
        let guard = self.memberships.lock().unwrap();
        let mut members: Vec<UserId> = guard
            .iter()
            .filter(|(_, memberships)| {
                memberships
                    .iter()
                    .any(|membership| membership.household_id == household)
            })
            .map(|(user, _)| user.clone())
            .collect();
        members.sort();
        Ok(members)
    }
}

#[async_trait]
impl RuleStore for TestStore {
    async fn load_rules(
        &self,
        user: UserId,
    ) -> std::result::Result<Option<PackedRules>, StoreError> {
        Ok(self.persisted.lock().unwrap().get(&user).cloned())
    }

    async fn save_rules(
        &self,
        user: UserId,
        rules: PackedRules,
    ) -> std::result::Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err("rule store offline".into());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.persisted.lock().unwrap().insert(user, rules);
        Ok(())
    }

    async fn clear_rules(&self, user: UserId) -> std::result::Result<(), StoreError> {
        if self.fail_clears.load(Ordering::SeqCst) {
            return Err("rule store offline".into());
        }
        self.persisted.lock().unwrap().remove(&user);
        Ok(())
    }
}
