//! Finished requests, as produced by [`crate::criteria::QueryCriteria::complete`].
//!
//! Conditions name stored attributes, not properties, and hold unmarshalled values. Operations
//! implementations marshal the values with their configured mode.

use super::value::{Item, Value};
use std::{collections::HashMap, fmt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    In,
    Le,
    Lt,
    Ge,
    Gt,
    Between,
    Null,
    NotNull,
    Contains,
    NotContains,
    BeginsWith,
}

impl ComparisonOperator {
    /// Whether DynamoDB accepts the operator in a key condition on a sort key.
    pub fn is_key_condition_operator(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Le | Self::Lt | Self::Ge | Self::Gt | Self::BeginsWith | Self::Between
        )
    }

    pub fn operand_count(&self) -> usize {
        match self {
            Self::Null | Self::NotNull => 0,
            Self::Between => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::In => "IN",
            Self::Le => "LE",
            Self::Lt => "LT",
            Self::Ge => "GE",
            Self::Gt => "GT",
            Self::Between => "BETWEEN",
            Self::Null => "NULL",
            Self::NotNull => "NOT_NULL",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::BeginsWith => "BEGINS_WITH",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub attribute: String,
    pub operator: ComparisonOperator,
    pub values: Vec<Value>,
}

impl Condition {
    pub fn new<S: Into<String>>(attribute: S, operator: ComparisonOperator, values: Vec<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            values,
        }
    }

    pub fn eq<S: Into<String>>(attribute: S, value: Value) -> Self {
        Self::new(attribute, ComparisonOperator::Eq, vec![value])
    }
}

/// A user-supplied filter expression and its substitutions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterExpression {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyLookup {
    pub hash_key: (String, Value),
    pub range_key: Option<(String, Value)>,
    pub consistent_read: Option<bool>,
    pub projection: Option<String>,
}

impl KeyLookup {
    pub fn key(&self) -> Item {
        let mut key = Item::new();
        key.insert(self.hash_key.0.clone(), self.hash_key.1.clone());
        if let Some((a, v)) = &self.range_key {
            key.insert(a.clone(), v.clone());
        }
        key
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub index_name: Option<String>,
    pub key_conditions: Vec<Condition>,
    pub filter_conditions: Vec<Condition>,
    pub filter_expression: Option<FilterExpression>,
    pub projection: Option<String>,
    /// Bounds the items examined per page, not the items returned.
    pub limit: Option<usize>,
    pub consistent_read: Option<bool>,
    pub scan_index_forward: bool,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            index_name: None,
            key_conditions: vec![],
            filter_conditions: vec![],
            filter_expression: None,
            projection: None,
            limit: None,
            consistent_read: None,
            scan_index_forward: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanRequest {
    pub filter_conditions: Vec<Condition>,
    pub filter_expression: Option<FilterExpression>,
    pub projection: Option<String>,
    pub limit: Option<usize>,
    pub consistent_read: Option<bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestShape {
    /// Nothing was bound, so the result is a constant and the store is never called.
    Static,
    Get(KeyLookup),
    Query(QueryRequest),
    Scan(ScanRequest),
}

impl RequestShape {
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Get(_) => "get",
            Self::Query(q) if q.index_name.is_some() => "index query",
            Self::Query(_) => "table query",
            Self::Scan(_) => "scan",
        }
    }
}
