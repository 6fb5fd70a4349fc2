#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    AnyOf,
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    IsAfter,
    IsBefore,
    IsOnOrAfter,
    IsOnOrBefore,
    LessThan,
    LessThanOrEqual,
    NoneOf,
    NotEqual,
    NotIn,
    SubsetOf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PredicateValue {
    Text(String),
    Number(i64),
    /// ISO-8601 calendar date, `yyyy-mm-dd`.
    Date(String),
    TextList(Vec<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateAction {
    Show,
    Hide,
    Eligible,
}

/// Condition tree attached to a program block. The union is closed: matching
/// is exhaustive, an unknown node kind cannot exist past deserialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredicateExpression {
    And { children: Vec<PredicateExpression> },
    Or { children: Vec<PredicateExpression> },
    Leaf { question_id: i64, operator: Operator, value: PredicateValue },
}

impl PredicateExpression {
    pub fn leaf(question_id: i64, operator: Operator, value: PredicateValue) -> Self {
        PredicateExpression::Leaf {
            question_id,
            operator,
            value,
        }
    }

    /// Rebuilds the tree with every leaf's question id passed through `remap`.
    /// Shape, child order, operators and values are preserved exactly; the
    /// input is left untouched. Fails on the first remap error.
    pub fn map_question_ids<E, F>(&self, remap: &mut F) -> Result<Self, E>
    where
        F: FnMut(i64) -> Result<i64, E>,
    {
        match self {
            PredicateExpression::And { children } => {
                let mut rebuilt = Vec::with_capacity(children.len());
                for child in children {
                    rebuilt.push(child.map_question_ids(remap)?);
                }
                Ok(PredicateExpression::And { children: rebuilt })
            }
            PredicateExpression::Or { children } => {
                let mut rebuilt = Vec::with_capacity(children.len());
                for child in children {
                    rebuilt.push(child.map_question_ids(remap)?);
                }
                Ok(PredicateExpression::Or { children: rebuilt })
            }
            PredicateExpression::Leaf {
                question_id,
                operator,
                value,
            } => Ok(PredicateExpression::Leaf {
                question_id: remap(*question_id)?,
                operator: *operator,
                value: value.clone(),
            }),
        }
    }

    pub fn collect_question_ids(&self, out: &mut BTreeSet<i64>) {
        match self {
            PredicateExpression::And { children } | PredicateExpression::Or { children } => {
                for child in children {
                    child.collect_question_ids(out);
                }
            }
            PredicateExpression::Leaf { question_id, .. } => {
                out.insert(*question_id);
            }
        }
    }

    pub fn question_ids(&self) -> BTreeSet<i64> {
        let mut out = BTreeSet::new();
        self.collect_question_ids(&mut out);
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateDefinition {
    pub root: PredicateExpression,
    pub action: PredicateAction,
}

impl PredicateDefinition {
    pub fn map_question_ids<E, F>(&self, remap: &mut F) -> Result<Self, E>
    where
        F: FnMut(i64) -> Result<i64, E>,
    {
        Ok(PredicateDefinition {
            root: self.root.map_question_ids(remap)?,
            action: self.action,
        })
    }

    pub fn question_ids(&self) -> BTreeSet<i64> {
        self.root.question_ids()
    }
}
