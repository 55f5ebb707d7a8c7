use crate::condition::{ConditionExpr, Subject};
use crate::types::{Action, SubjectType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single allow or deny rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub actions: Vec<Action>,
    pub subject_types: Vec<SubjectType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionExpr>,
    #[serde(default)]
    pub inverted: bool,
}

impl Rule {
    /// Returns true when the rule covers `action` on `subject_type`, ignoring
    /// conditions.
    pub fn applies_to(&self, action: Action, subject_type: &SubjectType) -> bool {
        self.actions
            .iter()
            .any(|granted| *granted == action || *granted == Action::Manage)
            && self.subject_types.iter().any(|ty| ty == subject_type)
    }

    /// Returns true when the rule's conditions hold.
    ///
    /// Without an instance the check is about the subject type as a whole:
    /// conditional allow rules count as matching (some instance may satisfy
    /// them) while conditional deny rules do not.
    pub fn matches_instance(&self, instance: Option<&dyn Subject>) -> bool {
        match (&self.conditions, instance) {
            (None, _) => true,
            (Some(conditions), Some(instance)) => conditions.matches(instance),
            (Some(_), None) => !self.inverted,
        }
    }
}

/// Ordered, immutable set of rules.
///
/// Rules are evaluated front to back and the last matching rule decides, so
/// deny rules appended after allow rules override them.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Arc<[Rule]>,
}

impl RuleSet {
    /// Creates a rule set from rules in evaluation order.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    /// Starts a builder.
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    /// Returns the rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decides whether `action` is allowed on `subject_type`.
    ///
    /// The verdict starts at deny; every rule that covers the action and
    /// subject type and whose conditions hold for `instance` overwrites it.
    pub fn can(
        &self,
        action: Action,
        subject_type: &SubjectType,
        instance: Option<&dyn Subject>,
    ) -> bool {
        self.relevant_rule(action, subject_type, instance)
            .is_some_and(|rule| !rule.inverted)
    }

    /// Inverse of [`RuleSet::can`].
    pub fn cannot(
        &self,
        action: Action,
        subject_type: &SubjectType,
        instance: Option<&dyn Subject>,
    ) -> bool {
        !self.can(action, subject_type, instance)
    }

    /// Returns the rule that decides the check, if any.
    pub fn relevant_rule(
        &self,
        action: Action,
        subject_type: &SubjectType,
        instance: Option<&dyn Subject>,
    ) -> Option<&Rule> {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.applies_to(action, subject_type) && rule.matches_instance(instance))
    }
}

/// Builder collecting `can`/`cannot` rules in order.
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: Vec<Rule>,
}

impl RuleSetBuilder {
    /// Appends an allow rule.
    pub fn can(
        &mut self,
        actions: impl IntoIterator<Item = Action>,
        subject_type: SubjectType,
        conditions: Option<ConditionExpr>,
    ) -> &mut Self {
        self.push(actions, subject_type, conditions, false)
    }

    /// Appends a deny rule.
    pub fn cannot(
        &mut self,
        actions: impl IntoIterator<Item = Action>,
        subject_type: SubjectType,
        conditions: Option<ConditionExpr>,
    ) -> &mut Self {
        self.push(actions, subject_type, conditions, true)
    }

    /// Appends a prepared rule.
    pub fn rule(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    fn push(
        &mut self,
        actions: impl IntoIterator<Item = Action>,
        subject_type: SubjectType,
        conditions: Option<ConditionExpr>,
        inverted: bool,
    ) -> &mut Self {
        self.rules.push(Rule {
            actions: actions.into_iter().collect(),
            subject_types: vec![subject_type],
            conditions,
            inverted,
        });
        self
    }

    /// Finishes the rule set.
    pub fn build(&mut self) -> RuleSet {
        RuleSet::new(std::mem::take(&mut self.rules))
    }
}
