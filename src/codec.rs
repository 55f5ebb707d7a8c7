//! Compact, storable form of a [`RuleSet`].
//!
//! Each rule packs to a JSON array `[actions, subjects, conditions, inverted]`:
//! `actions` and `subjects` are comma-joined strings, `conditions` is a
//! condition document or `0`, `inverted` is `1` or `0`. Trailing default
//! entries are dropped, so a packed rule has two to four elements.

use crate::condition::ConditionExpr;
use crate::error::{Error, Result};
use crate::rule::{Rule, RuleSet};
use crate::types::{Action, SubjectType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const JOIN: char = ',';

/// Packed rule set, suitable for persistence next to the user record and for
/// cache storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackedRules(Value);

impl PackedRules {
    /// Wraps a JSON value without validating it; validation happens in
    /// [`unpack`].
    pub fn from_json(value: Value) -> Self {
        Self(value)
    }

    /// Parses packed rules from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map(Self)
            .map_err(|err| Error::MalformedRuleSet(format!("invalid json: {err}")))
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn into_json(self) -> Value {
        self.0
    }
}

impl fmt::Display for PackedRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Packs a rule set, preserving rule order.
pub fn pack(rules: &RuleSet) -> PackedRules {
    PackedRules(Value::Array(rules.rules().iter().map(pack_rule).collect()))
}

fn pack_rule(rule: &Rule) -> Value {
    let actions = join(rule.actions.iter().map(Action::as_str));
    let subjects = join(rule.subject_types.iter().map(SubjectType::as_str));
    let mut packed = vec![Value::String(actions), Value::String(subjects)];
    if rule.conditions.is_some() || rule.inverted {
        packed.push(
            rule.conditions
                .as_ref()
                .map_or_else(|| Value::from(0), ConditionExpr::to_json),
        );
    }
    if rule.inverted {
        packed.push(Value::from(1));
    }
    Value::Array(packed)
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(&JOIN.to_string())
}

/// Reconstructs a rule set from its packed form.
///
/// Any structural problem is an [`Error::MalformedRuleSet`]; no rule is ever
/// dropped or guessed.
pub fn unpack(packed: &PackedRules) -> Result<RuleSet> {
    let Value::Array(items) = &packed.0 else {
        return Err(malformed("top level must be an array"));
    };
    let rules = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            unpack_rule(item).map_err(|err| match err {
                Error::MalformedRuleSet(msg) => malformed(format!("rule {index}: {msg}")),
                other => other,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RuleSet::new(rules))
}

fn unpack_rule(item: &Value) -> Result<Rule> {
    let Value::Array(fields) = item else {
        return Err(malformed("rule must be an array"));
    };
    if !(2..=4).contains(&fields.len()) {
        return Err(malformed(format!("wrong arity {}", fields.len())));
    }

    let actions = split(&fields[0], "actions")?
        .map(str::parse::<Action>)
        .collect::<Result<Vec<_>>>()?;
    let subject_types = split(&fields[1], "subjects")?
        .map(|tag| tag.parse::<SubjectType>().map_err(|err| malformed(err.to_string())))
        .collect::<Result<Vec<_>>>()?;

    let conditions = match fields.get(2) {
        None => None,
        Some(value) if is_zero(value) => None,
        Some(document @ Value::Object(_)) => Some(
            ConditionExpr::parse(document).map_err(|err| malformed(err.to_string()))?,
        ),
        Some(_) => return Err(malformed("conditions must be an object or 0")),
    };

    let inverted = match fields.get(3) {
        None => false,
        Some(value) if is_zero(value) => false,
        Some(value) if value.as_u64() == Some(1) => true,
        Some(_) => return Err(malformed("inverted flag must be 0 or 1")),
    };

    Ok(Rule {
        actions,
        subject_types,
        conditions,
        inverted,
    })
}

// An empty list packs to an empty string.
fn split<'a>(value: &'a Value, what: &str) -> Result<impl Iterator<Item = &'a str> + use<'a>> {
    let joined = value
        .as_str()
        .ok_or_else(|| malformed(format!("{what} must be a string")))?;
    Ok((!joined.is_empty())
        .then(|| joined.split(JOIN))
        .into_iter()
        .flatten())
}

fn is_zero(value: &Value) -> bool {
    value.as_u64() == Some(0)
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedRuleSet(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::condition::{FieldPath, FieldTest};
    use crate::types::{HouseholdId, HouseholdRole, UserContext, UserId};
    use serde_json::json;

    fn uid(value: &str) -> UserId {
        UserId::new(value).unwrap()
    }

    fn hid(value: &str) -> HouseholdId {
        HouseholdId::new(value).unwrap()
    }

    #[test]
    fn pack_uses_compact_tuples() {
        let rules = RuleSet::builder()
            .can([Action::Read, Action::Update], SubjectType::USER, None)
            .can(
                [Action::Manage],
                SubjectType::HOUSEHOLD,
                Some(ConditionExpr::is_in(FieldPath::ID, ["h1"])),
            )
            .cannot([Action::Create], SubjectType::HOUSEHOLD_MEMBER, None)
            .build();

        assert_eq!(
            pack(&rules).into_json(),
            json!([
                ["read,update", "User"],
                ["manage", "Household", {"id": {"$in": ["h1"]}}],
                ["create", "HouseholdMember", 0, 1]
            ])
        );
    }

    #[test]
    fn unpack_preserves_decisions_of_compiled_rule_sets() {
        let context = UserContext::new(uid("u1"))
            .with_household(hid("h1"), HouseholdRole::Manager)
            .with_household(hid("h2"), HouseholdRole::Member)
            .with_household(hid("h3"), HouseholdRole::Ai)
            .with_ai_users(hid("h1"), [uid("bot")])
            .with_members(hid("h1"), [uid("u1"), uid("u2"), uid("bot")])
            .with_members(hid("h2"), [uid("u1"), uid("u3")])
            .with_managed_users([uid("kid")]);
        let original = compile(&context);
        let text = pack(&original).to_string();
        let restored = unpack(&PackedRules::from_json_str(&text).unwrap()).unwrap();

        let battery = [
            (Action::Read, SubjectType::USER, json!({"id": "u1"})),
            (Action::Update, SubjectType::USER, json!({"id": "kid"})),
            (Action::Update, SubjectType::USER, json!({"id": "bot"})),
            (Action::Update, SubjectType::USER, json!({"id": "u3"})),
            (Action::Read, SubjectType::USER, json!({"id": "u3"})),
            (Action::Delete, SubjectType::HOUSEHOLD, json!({"id": "h1"})),
            (Action::Delete, SubjectType::HOUSEHOLD, json!({"id": "h2"})),
            (Action::Read, SubjectType::HOUSEHOLD, json!({"id": "h3"})),
            (
                Action::Update,
                SubjectType::HOUSEHOLD_MEMBER,
                json!({"household_id": "h1", "role": "MANAGER"}),
            ),
            (
                Action::Update,
                SubjectType::HOUSEHOLD_MEMBER,
                json!({"household_id": "h1", "role": "MEMBER"}),
            ),
            (
                Action::Update,
                SubjectType::MESSAGE,
                json!({"household_id": "h2", "user_id": "u1"}),
            ),
            (
                Action::Delete,
                SubjectType::MESSAGE,
                json!({"household_id": "h3", "user_id": "u1"}),
            ),
            (Action::Create, SubjectType::MESSAGE, json!({"household_id": "h3"})),
        ];
        for (action, subject_type, instance) in &battery {
            assert_eq!(
                original.can(*action, subject_type, Some(instance)),
                restored.can(*action, subject_type, Some(instance)),
                "{action} {subject_type} {instance}"
            );
            assert_eq!(
                original.can(*action, subject_type, None),
                restored.can(*action, subject_type, None),
            );
        }
        assert_eq!(pack(&restored), pack(&original));
    }

    #[test]
    fn unpack_rejects_structurally_invalid_input() {
        let cases = [
            json!({"rules": []}),
            json!(["read", "User"]),
            json!([["read"]]),
            json!([["read", "User", 0, 1, "extra"]]),
            json!([["fly", "User"]]),
            json!([["read,", "User"]]),
            json!([[1, "User"]]),
            json!([["read", "User", {"id": {"$near": 1}}]]),
            json!([["read", "User", "id=1"]]),
            json!([["read", "User", 0, 2]]),
        ];
        for case in cases {
            let err = unpack(&PackedRules::from_json(case.clone())).expect_err("must reject");
            assert!(matches!(err, Error::MalformedRuleSet(_)), "{case}");
        }
        assert!(matches!(
            PackedRules::from_json_str("not json"),
            Err(Error::MalformedRuleSet(_))
        ));
    }

    #[test]
    fn empty_rule_set_round_trips() {
        let packed = pack(&RuleSet::default());
        assert_eq!(packed.as_json(), &json!([]));
        assert!(unpack(&packed).unwrap().is_empty());
    }

    #[test]
    fn rules_without_actions_or_subjects_round_trip_and_never_match() {
        let rules = RuleSet::new(vec![
            Rule {
                actions: Vec::new(),
                subject_types: vec![SubjectType::USER],
                conditions: None,
                inverted: false,
            },
            Rule {
                actions: vec![Action::Read],
                subject_types: Vec::new(),
                conditions: None,
                inverted: true,
            },
        ]);
        let packed = pack(&rules);
        assert_eq!(packed.as_json(), &json!([["", "User"], ["read", "", 0, 1]]));

        let restored = unpack(&packed).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(pack(&restored), packed);
        assert!(!restored.can(Action::Read, &SubjectType::USER, None));
    }

    #[test]
    fn builder_conditions_always_unpack() {
        let nested = FieldPath::new("owner.profile.age").unwrap();
        let rules = RuleSet::builder()
            .can(
                [Action::Read],
                SubjectType::USER,
                Some(ConditionExpr::any([
                    ConditionExpr::field(nested, FieldTest::Gte(json!(18))),
                    ConditionExpr::negate(ConditionExpr::always()),
                ])),
            )
            .can(Vec::<Action>::new(), SubjectType::MESSAGE, Some(ConditionExpr::always()))
            .build();

        let restored = unpack(&pack(&rules)).unwrap();
        let adult = json!({"owner": {"profile": {"age": 30}}});
        assert!(restored.can(Action::Read, &SubjectType::USER, Some(&adult)));
        assert!(!restored.can(Action::Read, &SubjectType::USER, Some(&json!({}))));
        assert_eq!(pack(&restored), pack(&rules));
    }
}
