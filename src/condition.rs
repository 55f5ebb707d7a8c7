//! Declarative condition documents and their evaluation.
//!
//! Conditions are written as Mongo-style JSON documents such as
//! `{"household_id": {"$in": ["h1"]}, "role": {"$ne": "MANAGER"}}`. They are
//! parsed once into a [`ConditionExpr`] tree and then evaluated against any
//! value implementing [`Subject`].
//!
//! Absence is a first-class value: a field missing from the subject is never
//! equal to anything (not even an explicit `null`), and ordering operators
//! against it are `false`.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Comparison operator of a leaf check.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
    Regex,
}

impl Operator {
    /// Every supported operator.
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Exists,
        Operator::Regex,
    ];

    /// Returns the document token, e.g. `$gte`.
    pub fn token(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Exists => "$exists",
            Operator::Regex => "$regex",
        }
    }

    /// Looks up an operator by its document token.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.token() == token)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Dot-separated path to a subject field.
///
/// Segments are non-empty and never start with `$`, so every path survives a
/// round trip through a condition document.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FieldPath(Cow<'static, str>);

impl FieldPath {
    pub const ID: FieldPath = FieldPath(Cow::Borrowed("id"));
    pub const HOUSEHOLD_ID: FieldPath = FieldPath(Cow::Borrowed("household_id"));
    pub const USER_ID: FieldPath = FieldPath(Cow::Borrowed("user_id"));
    pub const ROLE: FieldPath = FieldPath(Cow::Borrowed("role"));

    /// Creates a validated path from its dotted form.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let valid = !path.is_empty()
            && path
                .split('.')
                .all(|segment| !segment.is_empty() && !segment.starts_with('$'));
        if !valid {
            return Err(Error::InvalidCondition(format!("invalid field path `{path}`")));
        }
        Ok(Self(Cow::Owned(path)))
    }

    /// Returns the dotted form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    fn join(&self, tail: &FieldPath) -> Self {
        Self(Cow::Owned(format!("{}.{}", self.0, tail.0)))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for FieldPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

/// Read access to the fields of a concrete subject instance.
///
/// Only the first path segment goes through this trait; deeper segments are
/// resolved against nested JSON objects. Typed subjects can return owned
/// values built on demand.
pub trait Subject: Sync {
    /// Returns a top-level field, or `None` when the subject has no such field.
    fn field(&self, name: &str) -> Option<Cow<'_, Value>>;
}

impl Subject for Value {
    fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.as_object()?.get(name).map(Cow::Borrowed)
    }
}

impl Subject for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.get(name).map(Cow::Borrowed)
    }
}

impl Subject for HashMap<String, Value> {
    fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.get(name).map(Cow::Borrowed)
    }
}

impl Subject for BTreeMap<String, Value> {
    fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.get(name).map(Cow::Borrowed)
    }
}

/// Resolves a dotted path against a subject.
///
/// A missing segment, or a segment that would have to step into a non-object
/// (including arrays), yields `None`.
pub fn resolve<'a>(subject: &'a dyn Subject, path: &FieldPath) -> Option<Cow<'a, Value>> {
    let mut segments = path.segments();
    let mut current = subject.field(segments.next()?)?;
    for segment in segments {
        current = match current {
            Cow::Borrowed(value) => Cow::Borrowed(value.as_object()?.get(segment)?),
            Cow::Owned(Value::Object(mut map)) => Cow::Owned(map.remove(segment)?),
            Cow::Owned(_) => return None,
        };
    }
    Some(current)
}

/// A single operator check against one field.
#[derive(Clone, Debug)]
pub enum FieldTest {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
}

impl FieldTest {
    /// Parses an `{"$op": operand}` pair.
    pub fn parse(token: &str, operand: &Value) -> Result<Self> {
        let op = Operator::from_token(token)
            .ok_or_else(|| Error::InvalidCondition(format!("unknown operator `{token}`")))?;
        let test = match op {
            Operator::Eq => FieldTest::Eq(operand.clone()),
            Operator::Ne => FieldTest::Ne(operand.clone()),
            Operator::Gt => FieldTest::Gt(operand.clone()),
            Operator::Gte => FieldTest::Gte(operand.clone()),
            Operator::Lt => FieldTest::Lt(operand.clone()),
            Operator::Lte => FieldTest::Lte(operand.clone()),
            Operator::In => FieldTest::In(expect_list(op, operand)?),
            Operator::Nin => FieldTest::Nin(expect_list(op, operand)?),
            Operator::Exists => match operand {
                Value::Bool(expected) => FieldTest::Exists(*expected),
                Value::Null => FieldTest::Exists(true),
                _ => {
                    return Err(Error::InvalidCondition(
                        "$exists expects a boolean".to_string(),
                    ));
                }
            },
            Operator::Regex => {
                let Value::String(pattern) = operand else {
                    return Err(Error::InvalidCondition(
                        "$regex expects a string pattern".to_string(),
                    ));
                };
                let regex = Regex::new(pattern).map_err(|err| {
                    Error::InvalidCondition(format!("invalid $regex pattern: {err}"))
                })?;
                FieldTest::Regex(regex)
            }
        };
        Ok(test)
    }

    /// Returns the operator of this check.
    pub fn operator(&self) -> Operator {
        match self {
            FieldTest::Eq(_) => Operator::Eq,
            FieldTest::Ne(_) => Operator::Ne,
            FieldTest::Gt(_) => Operator::Gt,
            FieldTest::Gte(_) => Operator::Gte,
            FieldTest::Lt(_) => Operator::Lt,
            FieldTest::Lte(_) => Operator::Lte,
            FieldTest::In(_) => Operator::In,
            FieldTest::Nin(_) => Operator::Nin,
            FieldTest::Exists(_) => Operator::Exists,
            FieldTest::Regex(_) => Operator::Regex,
        }
    }

    /// Returns the operand in document form.
    pub fn operand(&self) -> Value {
        match self {
            FieldTest::Eq(value)
            | FieldTest::Ne(value)
            | FieldTest::Gt(value)
            | FieldTest::Gte(value)
            | FieldTest::Lt(value)
            | FieldTest::Lte(value) => value.clone(),
            FieldTest::In(values) | FieldTest::Nin(values) => Value::Array(values.clone()),
            FieldTest::Exists(expected) => Value::Bool(*expected),
            FieldTest::Regex(regex) => Value::String(regex.as_str().to_string()),
        }
    }

    /// Checks a resolved field value; `None` means the field is absent.
    pub fn check(&self, actual: Option<&Value>) -> bool {
        match self {
            FieldTest::Eq(expected) => actual.is_some_and(|value| values_equal(value, expected)),
            FieldTest::Ne(expected) => !actual.is_some_and(|value| values_equal(value, expected)),
            FieldTest::Gt(expected) => ordering(actual, expected) == Some(Ordering::Greater),
            FieldTest::Gte(expected) => {
                matches!(ordering(actual, expected), Some(Ordering::Greater | Ordering::Equal))
            }
            FieldTest::Lt(expected) => ordering(actual, expected) == Some(Ordering::Less),
            FieldTest::Lte(expected) => {
                matches!(ordering(actual, expected), Some(Ordering::Less | Ordering::Equal))
            }
            FieldTest::In(values) => contains(actual, values),
            FieldTest::Nin(values) => !contains(actual, values),
            FieldTest::Exists(expected) => actual.is_some() == *expected,
            FieldTest::Regex(regex) => {
                matches!(actual, Some(Value::String(text)) if regex.is_match(text))
            }
        }
    }
}

fn expect_list(op: Operator, operand: &Value) -> Result<Vec<Value>> {
    match operand {
        Value::Array(values) => Ok(values.clone()),
        _ => Err(Error::InvalidCondition(format!("{op} expects an array"))),
    }
}

fn contains(actual: Option<&Value>, values: &[Value]) -> bool {
    actual.is_some_and(|value| values.iter().any(|candidate| values_equal(value, candidate)))
}

fn compare_numbers(left: &Number, right: &Number) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        return Some(l.cmp(&r));
    }
    if let (Some(l), Some(r)) = (left.as_u64(), right.as_u64()) {
        return Some(l.cmp(&r));
    }
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

// Ordering is only defined number-to-number and string-to-string.
fn ordering(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(left), Value::Number(right)) => compare_numbers(left, right),
        (Value::String(left), Value::String(right)) => Some(left.as_str().cmp(right.as_str())),
        _ => None,
    }
}

/// Structural equality with numeric comparison by value (`1 == 1.0`).
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r) == Some(Ordering::Equal),
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l
                    .iter()
                    .all(|(key, a)| r.get(key).is_some_and(|b| values_equal(a, b)))
        }
        _ => left == right,
    }
}

/// Parsed condition tree.
#[derive(Clone, Debug)]
pub enum ConditionExpr {
    /// Matches when every child matches. An empty `And` always matches.
    And(Vec<ConditionExpr>),
    /// Matches when at least one child matches.
    Or(Vec<ConditionExpr>),
    /// Matches when the child does not.
    Not(Box<ConditionExpr>),
    /// Leaf check on one field.
    Field { path: FieldPath, test: FieldTest },
}

impl ConditionExpr {
    /// A condition that matches every subject.
    pub fn always() -> Self {
        ConditionExpr::And(Vec::new())
    }

    /// Leaf check on `path`.
    pub fn field(path: FieldPath, test: FieldTest) -> Self {
        ConditionExpr::Field { path, test }
    }

    /// `path == value`.
    pub fn eq(path: FieldPath, value: impl Into<Value>) -> Self {
        Self::field(path, FieldTest::Eq(value.into()))
    }

    /// `path != value`.
    pub fn ne(path: FieldPath, value: impl Into<Value>) -> Self {
        Self::field(path, FieldTest::Ne(value.into()))
    }

    /// `path` is one of `values`.
    pub fn is_in<V: Into<Value>>(
        path: FieldPath,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::field(path, FieldTest::In(values.into_iter().map(Into::into).collect()))
    }

    /// Conjunction of `children`.
    pub fn all(children: impl IntoIterator<Item = ConditionExpr>) -> Self {
        ConditionExpr::And(children.into_iter().collect())
    }

    /// Disjunction of `children`.
    pub fn any(children: impl IntoIterator<Item = ConditionExpr>) -> Self {
        ConditionExpr::Or(children.into_iter().collect())
    }

    /// Negation of `child`.
    pub fn negate(child: ConditionExpr) -> Self {
        ConditionExpr::Not(Box::new(child))
    }

    /// Parses a condition document.
    pub fn parse(document: &Value) -> Result<Self> {
        let Value::Object(map) = document else {
            return Err(Error::InvalidCondition(
                "condition document must be an object".to_string(),
            ));
        };
        Ok(collapse(parse_object(map, None)?))
    }

    /// Evaluates the condition against `subject`.
    pub fn matches(&self, subject: &dyn Subject) -> bool {
        match self {
            ConditionExpr::And(children) => children.iter().all(|child| child.matches(subject)),
            ConditionExpr::Or(children) => children.iter().any(|child| child.matches(subject)),
            ConditionExpr::Not(child) => !child.matches(subject),
            ConditionExpr::Field { path, test } => test.check(resolve(subject, path).as_deref()),
        }
    }

    /// Renders the condition as a document that [`ConditionExpr::parse`]
    /// reads back to an equivalent tree.
    ///
    /// Leaves are always written in explicit `{"$op": operand}` form.
    pub fn to_json(&self) -> Value {
        match self {
            ConditionExpr::And(children) => match merge_leaves(children) {
                Some(merged) => Value::Object(merged),
                None => single("$and", Value::Array(children.iter().map(Self::to_json).collect())),
            },
            ConditionExpr::Or(children) => {
                single("$or", Value::Array(children.iter().map(Self::to_json).collect()))
            }
            ConditionExpr::Not(child) => single("$not", child.to_json()),
            ConditionExpr::Field { path, test } => single(
                path.as_str(),
                single(test.operator().token(), test.operand()),
            ),
        }
    }
}

/// Evaluates optional rule conditions; absent conditions always match.
pub fn matches(conditions: Option<&ConditionExpr>, subject: &dyn Subject) -> bool {
    conditions.is_none_or(|conditions| conditions.matches(subject))
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn collapse(mut parts: Vec<ConditionExpr>) -> ConditionExpr {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        ConditionExpr::And(parts)
    }
}

fn parse_object(map: &Map<String, Value>, prefix: Option<&FieldPath>) -> Result<Vec<ConditionExpr>> {
    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "$and" if prefix.is_none() => parts.push(ConditionExpr::And(parse_list(key, value)?)),
            "$or" if prefix.is_none() => parts.push(ConditionExpr::Or(parse_list(key, value)?)),
            "$not" if prefix.is_none() => {
                parts.push(ConditionExpr::Not(Box::new(ConditionExpr::parse(value)?)))
            }
            operator if operator.starts_with('$') => {
                return Err(Error::InvalidCondition(format!(
                    "unexpected operator `{operator}`"
                )));
            }
            field => {
                let field = FieldPath::new(field)?;
                let path = match prefix {
                    Some(prefix) => prefix.join(&field),
                    None => field,
                };
                parse_field(path, value, &mut parts)?;
            }
        }
    }
    Ok(parts)
}

fn parse_list(key: &str, value: &Value) -> Result<Vec<ConditionExpr>> {
    let Value::Array(items) = value else {
        return Err(Error::InvalidCondition(format!("{key} expects an array")));
    };
    items.iter().map(ConditionExpr::parse).collect()
}

fn parse_field(path: FieldPath, value: &Value, parts: &mut Vec<ConditionExpr>) -> Result<()> {
    let inner = match value {
        Value::Object(inner) if !inner.is_empty() => inner,
        other => {
            parts.push(ConditionExpr::eq(path, other.clone()));
            return Ok(());
        }
    };

    let operator_keys = inner.keys().filter(|key| key.starts_with('$')).count();
    if operator_keys == inner.len() {
        for (token, operand) in inner {
            parts.push(ConditionExpr::Field {
                path: path.clone(),
                test: FieldTest::parse(token, operand)?,
            });
        }
    } else if operator_keys == 0 {
        parts.extend(parse_object(inner, Some(&path))?);
    } else {
        return Err(Error::InvalidCondition(format!(
            "field `{path}` mixes operators with nested fields"
        )));
    }
    Ok(())
}

// Writes an `And` of leaves as one flat document when no (path, operator)
// pair repeats.
fn merge_leaves(children: &[ConditionExpr]) -> Option<Map<String, Value>> {
    let mut merged = Map::new();
    for child in children {
        let ConditionExpr::Field { path, test } = child else {
            return None;
        };
        let entry = merged
            .entry(path.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(ops) = entry else {
            return None;
        };
        let token = test.operator().token();
        if ops.contains_key(token) {
            return None;
        }
        ops.insert(token.to_string(), test.operand());
    }
    Some(merged)
}

impl Serialize for ConditionExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConditionExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let document = Value::deserialize(deserializer)?;
        ConditionExpr::parse(&document).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(document: Value, subject: Value) -> bool {
        ConditionExpr::parse(&document)
            .expect("valid condition")
            .matches(&subject)
    }

    #[test]
    fn missing_field_is_not_equal_to_null() {
        assert!(!check(json!({"field": {"$eq": null}}), json!({})));
        assert!(check(json!({"field": {"$eq": null}}), json!({"field": null})));
        assert!(!check(json!({"field": {"$eq": null}}), json!({"field": 0})));
    }

    #[test]
    fn empty_document_and_absent_conditions_match() {
        assert!(check(json!({}), json!({"anything": 1})));
        assert!(matches(None, &json!({})));
    }

    #[test]
    fn implicit_equality_and_multiple_keys_are_conjunctive() {
        let doc = json!({"household_id": "h1", "user_id": "u1"});
        assert!(check(doc.clone(), json!({"household_id": "h1", "user_id": "u1"})));
        assert!(!check(doc, json!({"household_id": "h1", "user_id": "u2"})));
    }

    #[test]
    fn nested_objects_compose_dotted_paths() {
        let doc = json!({"owner": {"profile": {"age": {"$gte": 18}}}});
        assert!(check(doc.clone(), json!({"owner": {"profile": {"age": 30}}})));
        assert!(!check(doc.clone(), json!({"owner": {"profile": {"age": 12}}})));
        assert!(!check(doc, json!({"owner": {}})));

        let dotted = json!({"owner.profile.age": {"$lt": 18}});
        assert!(check(dotted, json!({"owner": {"profile": {"age": 12}}})));
    }

    #[test]
    fn path_resolution_does_not_cross_arrays() {
        let doc = json!({"items.name": "milk"});
        assert!(!check(doc, json!({"items": [{"name": "milk"}]})));
    }

    #[test]
    fn combinators_follow_boolean_logic() {
        let doc = json!({
            "$or": [{"role": "MANAGER"}, {"$and": [{"role": "MEMBER"}, {"active": true}]}],
            "$not": {"banned": true}
        });
        assert!(check(doc.clone(), json!({"role": "MANAGER"})));
        assert!(check(doc.clone(), json!({"role": "MEMBER", "active": true})));
        assert!(!check(doc.clone(), json!({"role": "MEMBER", "active": false})));
        assert!(!check(doc, json!({"role": "MANAGER", "banned": true})));
    }

    #[test]
    fn ordering_operators_are_false_for_absent_or_incompatible_values() {
        for op in ["$gt", "$gte", "$lt", "$lte"] {
            assert!(!check(json!({"n": {op: 5}}), json!({})), "{op} absent");
            assert!(!check(json!({"n": {op: 5}}), json!({"n": "5"})), "{op} mixed");
            assert!(!check(json!({"n": {op: 5}}), json!({"n": null})), "{op} null");
        }
        assert!(check(json!({"n": {"$gte": 5}}), json!({"n": 5})));
        assert!(check(json!({"n": {"$gt": 5, "$lt": 10}}), json!({"n": 7.5})));
        assert!(check(json!({"s": {"$lt": "b"}}), json!({"s": "abc"})));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(check(json!({"n": 1}), json!({"n": 1.0})));
        assert!(check(json!({"n": {"$in": [2, 3]}}), json!({"n": 3.0})));
        assert!(check(json!({"n": {"$gt": -1}}), json!({"n": 18446744073709551615u64})));
    }

    #[test]
    fn membership_and_negations() {
        let doc = json!({"id": {"$in": ["a", "b"]}});
        assert!(check(doc.clone(), json!({"id": "a"})));
        assert!(!check(doc, json!({})));

        let doc = json!({"id": {"$nin": ["a"]}});
        assert!(check(doc.clone(), json!({"id": "c"})));
        assert!(check(doc, json!({})));

        assert!(check(json!({"id": {"$ne": "a"}}), json!({})));
        assert!(!check(json!({"id": {"$ne": "a"}}), json!({"id": "a"})));
    }

    #[test]
    fn exists_distinguishes_null_from_absent() {
        assert!(check(json!({"f": {"$exists": true}}), json!({"f": null})));
        assert!(!check(json!({"f": {"$exists": true}}), json!({})));
        assert!(check(json!({"f": {"$exists": false}}), json!({})));
    }

    #[test]
    fn regex_only_matches_strings() {
        let doc = json!({"name": {"$regex": "^al"}});
        assert!(check(doc.clone(), json!({"name": "alice"})));
        assert!(!check(doc.clone(), json!({"name": "bob"})));
        assert!(!check(doc.clone(), json!({"name": 42})));
        assert!(!check(doc, json!({})));
    }

    #[test]
    fn empty_object_value_is_equality() {
        assert!(check(json!({"meta": {}}), json!({"meta": {}})));
        assert!(!check(json!({"meta": {}}), json!({"meta": {"a": 1}})));
    }

    #[test]
    fn parse_rejects_malformed_documents() {
        let cases = [
            json!([1, 2]),
            json!({"a": {"$between": [1, 2]}}),
            json!({"a": {"$eq": 1, "b": 2}}),
            json!({"a": {"$in": "x"}}),
            json!({"a": {"$exists": "yes"}}),
            json!({"a": {"$regex": "("}}),
            json!({"$or": {"a": 1}}),
            json!({"$where": "x"}),
            json!({"a..b": 1}),
            json!({"a.$b": 1}),
        ];
        for case in cases {
            let err = ConditionExpr::parse(&case).expect_err("must reject");
            assert!(matches!(err, Error::InvalidCondition(_)), "{case}");
        }
    }

    #[test]
    fn to_json_reparses_to_equivalent_condition() {
        let doc = json!({
            "household_id": {"$in": ["h1", "h2"]},
            "role": {"$ne": "MANAGER"},
            "meta": {"$eq": {"pinned": true}},
            "$or": [{"n": {"$gt": 1, "$lte": 3}}, {"name": {"$regex": "^x"}}]
        });
        let parsed = ConditionExpr::parse(&doc).unwrap();
        let reparsed = ConditionExpr::parse(&parsed.to_json()).unwrap();

        let subjects = [
            json!({"household_id": "h1", "role": "MEMBER", "meta": {"pinned": true}, "n": 2}),
            json!({"household_id": "h1", "role": "MEMBER", "meta": {"pinned": true}, "name": "xy"}),
            json!({"household_id": "h1", "role": "MANAGER", "meta": {"pinned": true}, "n": 2}),
            json!({"household_id": "h3", "role": "MEMBER", "meta": {"pinned": true}, "n": 2}),
            json!({"household_id": "h2", "role": "MEMBER", "meta": {"pinned": true}, "n": 5}),
        ];
        for subject in &subjects {
            assert_eq!(parsed.matches(subject), reparsed.matches(subject), "{subject}");
        }
        assert_eq!(parsed.to_json(), reparsed.to_json());
    }

    struct Member {
        household_id: String,
        role: &'static str,
    }

    impl Subject for Member {
        fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
            match name {
                "household_id" => Some(Cow::Owned(Value::String(self.household_id.clone()))),
                "role" => Some(Cow::Owned(Value::String(self.role.to_string()))),
                _ => None,
            }
        }
    }

    #[test]
    fn typed_subjects_resolve_fields_through_the_trait() {
        let condition = ConditionExpr::all([
            ConditionExpr::is_in(FieldPath::HOUSEHOLD_ID, ["h1"]),
            ConditionExpr::ne(FieldPath::ROLE, "MANAGER"),
        ]);
        let member = Member {
            household_id: "h1".to_string(),
            role: "MEMBER",
        };
        let manager = Member {
            household_id: "h1".to_string(),
            role: "MANAGER",
        };
        assert!(condition.matches(&member));
        assert!(!condition.matches(&manager));
        let missing = FieldPath::new("missing").unwrap();
        assert!(!ConditionExpr::eq(missing, Value::Null).matches(&member));
    }

    #[test]
    fn field_paths_reject_segments_the_parser_cannot_read() {
        for bad in ["", "a..b", ".a", "a.", "$a", "a.$b"] {
            let err = FieldPath::new(bad).expect_err("must reject");
            assert!(matches!(err, Error::InvalidCondition(_)), "{bad:?}");
        }
        let path = FieldPath::try_from("owner.profile.age").unwrap();
        assert_eq!(path.segments().collect::<Vec<_>>(), ["owner", "profile", "age"]);
        assert_eq!(FieldPath::HOUSEHOLD_ID.as_str(), "household_id");
    }
}
