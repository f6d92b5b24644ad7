//! Renders structured conditions into DynamoDB condition expressions.

use super::{
    request::{ComparisonOperator, Condition, FilterExpression},
    value::Value,
};
use std::collections::HashMap;

/// Accumulates placeholders across the expressions of one request, so that a key condition and a
/// filter share a single set of attribute names and values.
#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    names: HashMap<String, String>,
    placeholders: HashMap<String, String>,
    values: HashMap<String, Value>,
    next_name: usize,
    next_value: usize,
}

impl ExpressionBuilder {
    /// Seeds the builder with the substitutions of a user filter expression. Generated placeholders
    /// never collide with them.
    pub fn new(user: Option<&FilterExpression>) -> Self {
        let mut ret = Self::default();
        if let Some(user) = user {
            ret.names.extend(user.names.clone());
            ret.values.extend(user.values.clone());
        }
        ret
    }

    fn name(&mut self, attribute: &str) -> String {
        if let Some(placeholder) = self.placeholders.get(attribute) {
            return placeholder.clone();
        }
        let placeholder = loop {
            let candidate = format!("#n{}", self.next_name);
            self.next_name += 1;
            if !self.names.contains_key(&candidate) {
                break candidate;
            }
        };
        self.names.insert(placeholder.clone(), attribute.to_string());
        self.placeholders.insert(attribute.to_string(), placeholder.clone());
        placeholder
    }

    fn value(&mut self, v: &Value) -> String {
        let placeholder = loop {
            let candidate = format!(":v{}", self.next_value);
            self.next_value += 1;
            if !self.values.contains_key(&candidate) {
                break candidate;
            }
        };
        self.values.insert(placeholder.clone(), v.clone());
        placeholder
    }

    fn condition(&mut self, c: &Condition) -> String {
        let n = self.name(&c.attribute);
        let v: Vec<String> = c.values.iter().map(|v| self.value(v)).collect();
        let first = v.first().cloned().unwrap_or_default();
        match c.operator {
            ComparisonOperator::Eq => format!("{} = {}", n, first),
            ComparisonOperator::Ne => format!("{} <> {}", n, first),
            ComparisonOperator::Le => format!("{} <= {}", n, first),
            ComparisonOperator::Lt => format!("{} < {}", n, first),
            ComparisonOperator::Ge => format!("{} >= {}", n, first),
            ComparisonOperator::Gt => format!("{} > {}", n, first),
            ComparisonOperator::Between => format!("{} BETWEEN {} AND {}", n, first, v.get(1).cloned().unwrap_or_default()),
            ComparisonOperator::In => format!("{} IN ({})", n, v.join(", ")),
            ComparisonOperator::Null => format!("attribute_not_exists({})", n),
            ComparisonOperator::NotNull => format!("attribute_exists({})", n),
            ComparisonOperator::Contains => format!("contains({}, {})", n, first),
            ComparisonOperator::NotContains => format!("NOT contains({}, {})", n, first),
            ComparisonOperator::BeginsWith => format!("begins_with({}, {})", n, first),
        }
    }

    /// Joins the conditions with `AND`. Returns `None` when there are none.
    pub fn conditions(&mut self, conditions: &[Condition]) -> Option<String> {
        if conditions.is_empty() {
            return None;
        }
        Some(conditions.iter().map(|c| self.condition(c)).collect::<Vec<_>>().join(" AND "))
    }

    /// Like [`Self::conditions`], with the user's filter expression appended in parentheses.
    pub fn filter(&mut self, conditions: &[Condition], user: Option<&FilterExpression>) -> Option<String> {
        let generated = self.conditions(conditions);
        match (generated, user) {
            (Some(generated), Some(user)) => Some(format!("{} AND ({})", generated, user.expression)),
            (None, Some(user)) => Some(user.expression.clone()),
            (generated, None) => generated,
        }
    }

    /// Rewrites a comma separated attribute list with name placeholders, so that reserved words
    /// such as `status` can be projected.
    pub fn projection(&mut self, projection: &str) -> String {
        projection
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|a| self.name(a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The substitutions used so far. Either map may be empty.
    pub fn finish(self) -> (HashMap<String, String>, HashMap<String, Value>) {
        (self.names, self.values)
    }
}
