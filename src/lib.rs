//! Household role-based authorization.
//!
//! A user's household memberships are compiled into an ordered list of
//! allow/deny rules with Mongo-style conditions. Rules are persisted in a
//! compact packed form, cached per user with a TTL and re-evaluated against
//! concrete records on every check. The default behavior is deny-by-default:
//! the last matching rule decides and no match means deny.
//! Use [`Engine`] for authorization and [`RoleEvent`] to keep rules current.
//!
//! # Examples
//!
//! Evaluating a hand-written rule set:
//! ```
//! use household_authz::{Action, ConditionExpr, FieldPath, RuleSet, SubjectType};
//! use serde_json::json;
//!
//! let rules = RuleSet::builder()
//!     .can([Action::Read], SubjectType::HOUSEHOLD, None)
//!     .cannot(
//!         [Action::Read],
//!         SubjectType::HOUSEHOLD,
//!         Some(ConditionExpr::eq(FieldPath::new("archived").unwrap(), json!(true))),
//!     )
//!     .build();
//! assert!(rules.can(Action::Read, &SubjectType::HOUSEHOLD, Some(&json!({"id": "h1"}))));
//! assert!(!rules.can(Action::Read, &SubjectType::HOUSEHOLD, Some(&json!({"archived": true}))));
//! ```
//!
//! Full authorization flow using the in-memory store (enable `memory-store`):
//! ```no_run
//! # #[cfg(feature = "memory-store")]
//! # {
//! use household_authz::{Action, EngineBuilder, HouseholdId, HouseholdRole, MemoryStore, SubjectType, UserId};
//! use serde_json::json;
//! let store = MemoryStore::new();
//! let household = HouseholdId::try_from("h1").unwrap();
//! let user = UserId::try_from("u1").unwrap();
//! store.set_role(household, user.clone(), HouseholdRole::Member);
//! let engine = EngineBuilder::new(store).build();
//! let message = json!({"household_id": "h1", "user_id": "u1"});
//! let _ = engine.can(&user, Action::Update, &SubjectType::MESSAGE, Some(&message));
//! # }
//! ```
//!
//! Creating a process-local cache (enable `memory-cache`):
//! ```no_run
//! # #[cfg(feature = "memory-cache")]
//! # {
//! use household_authz::MemoryCache;
//! use std::time::Duration;
//! let cache = MemoryCache::new(1024).with_ttl(Duration::from_secs(30));
//! # let _ = cache;
//! # }
//! ```
#![forbid(unsafe_code)]

mod cache;
mod codec;
mod compiler;
mod condition;
mod config;
mod engine;
mod error;
mod events;
mod permission_cache;
mod rule;
mod store;
mod types;
#[cfg(any(test, feature = "memory-cache"))]
mod memory_cache;

#[cfg(feature = "memory-store")]
mod memory_store;

#[cfg(test)]
mod testing;

pub use crate::cache::{Cache, NoCache};
pub use crate::codec::{PackedRules, pack, unpack};
pub use crate::compiler::{compile, load_context};
pub use crate::condition::{
    ConditionExpr, FieldPath, FieldTest, Operator, Subject, matches, resolve, values_equal,
};
pub use crate::config::EngineConfig;
pub use crate::engine::{Engine, EngineBuilder};
pub use crate::error::{Error, Result, StoreError};
pub use crate::events::RoleEvent;
pub use crate::permission_cache::PermissionCache;
pub use crate::rule::{Rule, RuleSet, RuleSetBuilder};
pub use crate::store::{RoleStore, RuleStore, Store};
pub use crate::types::{
    Action, HouseholdId, HouseholdMembership, HouseholdRole, SubjectType, UserContext, UserId,
};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::MemoryStore;

#[cfg(feature = "memory-cache")]
pub use crate::memory_cache::{DEFAULT_TTL, MemoryCache};
