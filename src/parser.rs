//! Derives query structure from repository method names and query annotations.
//!
//! Method names follow the `findBy<Property><Keyword>And...OrderBy<Property>Desc` grammar. Parsing
//! happens once, when a query method is registered, so every error here is a configuration error.

use super::{
    metadata::EntityKeySchema,
    paging::{Direction, Order, Sort},
    value::Value,
    Error, Result,
};
use std::collections::HashSet;

/// Limit value meaning "no limit".
pub const QUERY_LIMIT_UNLIMITED: i32 = i32::MIN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subject {
    Find,
    Count,
    Exists,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermOperator {
    Equals,
    NotEquals,
    In,
    Between,
    IsNull,
    IsNotNull,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Before,
    After,
    StartingWith,
    Containing,
    NotContaining,
    True,
    False,
}

impl TermOperator {
    pub fn operand_count(&self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull | Self::True | Self::False => 0,
            Self::Between => 2,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComparisonTerm {
    pub property: String,
    pub operator: TermOperator,
}

impl ComparisonTerm {
    pub fn operand_count(&self) -> usize {
        self.operator.operand_count()
    }
}

enum Keyword {
    Supported(TermOperator),
    Unsupported(&'static str),
}

// Checked in this order, first suffix match wins. Longer keywords that end with a shorter one
// (IsNotNull / IsNull) come first.
const KEYWORDS: &[(&[&str], Keyword)] = &[
    (&["IsBetween", "Between"], Keyword::Supported(TermOperator::Between)),
    (&["IsNotNull", "NotNull"], Keyword::Supported(TermOperator::IsNotNull)),
    (&["IsNull", "Null"], Keyword::Supported(TermOperator::IsNull)),
    (&["IsLessThan", "LessThan"], Keyword::Supported(TermOperator::LessThan)),
    (&["IsLessThanEqual", "LessThanEqual"], Keyword::Supported(TermOperator::LessThanEqual)),
    (&["IsGreaterThan", "GreaterThan"], Keyword::Supported(TermOperator::GreaterThan)),
    (&["IsGreaterThanEqual", "GreaterThanEqual"], Keyword::Supported(TermOperator::GreaterThanEqual)),
    (&["IsBefore", "Before"], Keyword::Supported(TermOperator::Before)),
    (&["IsAfter", "After"], Keyword::Supported(TermOperator::After)),
    (&["IsNotLike", "NotLike"], Keyword::Unsupported("NotLike")),
    (&["IsLike", "Like"], Keyword::Unsupported("Like")),
    (&["IsStartingWith", "StartingWith", "StartsWith"], Keyword::Supported(TermOperator::StartingWith)),
    (&["IsEndingWith", "EndingWith", "EndsWith"], Keyword::Unsupported("EndingWith")),
    (&["IsNotEmpty", "NotEmpty"], Keyword::Unsupported("IsNotEmpty")),
    (&["IsEmpty", "Empty"], Keyword::Unsupported("IsEmpty")),
    (&["IsNotContaining", "NotContaining", "NotContains"], Keyword::Supported(TermOperator::NotContaining)),
    (&["IsContaining", "Containing", "Contains"], Keyword::Supported(TermOperator::Containing)),
    (&["IsNotIn", "NotIn"], Keyword::Unsupported("NotIn")),
    (&["IsIn", "In"], Keyword::Supported(TermOperator::In)),
    (&["IsNear", "Near"], Keyword::Unsupported("Near")),
    (&["IsWithin", "Within"], Keyword::Unsupported("Within")),
    (&["MatchesRegex", "Matches", "Regex"], Keyword::Unsupported("Regex")),
    (&["Exists"], Keyword::Unsupported("Exists")),
    (&["IsTrue", "True"], Keyword::Supported(TermOperator::True)),
    (&["IsFalse", "False"], Keyword::Supported(TermOperator::False)),
    (&["IsNot", "Not"], Keyword::Supported(TermOperator::NotEquals)),
    (&["Is", "Equals"], Keyword::Supported(TermOperator::Equals)),
];

const SUBJECTS: &[(&str, Subject)] = &[
    ("find", Subject::Find),
    ("read", Subject::Find),
    ("get", Subject::Find),
    ("query", Subject::Find),
    ("search", Subject::Find),
    ("stream", Subject::Find),
    ("count", Subject::Count),
    ("exists", Subject::Exists),
    ("delete", Subject::Delete),
    ("remove", Subject::Delete),
];

/// The parsed form of a derived query method name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartTree {
    pub subject: Subject,
    /// Set by `First`/`Top`, with or without a count.
    pub max_results: Option<usize>,
    pub terms: Vec<ComparisonTerm>,
    pub sort: Sort,
}

fn starts_upper(s: &str) -> bool {
    s.chars().next().map_or(false, |c| c.is_ascii_uppercase())
}

/// Finds `keyword` where it is followed by an uppercase letter, skipping position 0.
fn find_keyword(s: &str, keyword: &str) -> Option<usize> {
    let mut start = 1;
    while let Some(i) = s.get(start..).and_then(|rest| rest.find(keyword)) {
        let at = start + i;
        if starts_upper(&s[at + keyword.len()..]) {
            return Some(at);
        }
        start = at + 1;
    }
    None
}

fn split_keyword<'a>(s: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut parts = vec![];
    let mut rest = s;
    while let Some(at) = find_keyword(rest, keyword) {
        parts.push(&rest[..at]);
        rest = &rest[at + keyword.len()..];
    }
    parts.push(rest);
    parts
}

fn resolve_property(schema: &EntityKeySchema, raw: &str) -> Option<String> {
    let mut chars = raw.chars();
    let first = chars.next()?;
    let uncapitalized = first.to_ascii_lowercase().to_string() + chars.as_str();
    [uncapitalized, raw.to_string()].into_iter().find(|p| schema.has_property(p))
}

impl PartTree {
    pub fn parse(method_name: &str, schema: &EntityKeySchema) -> Result<Self> {
        let err = |msg: String| Error::Configuration(format!("{}: {}", method_name, msg));

        let (subject, rest) = SUBJECTS
            .iter()
            .find_map(|(prefix, subject)| {
                method_name
                    .strip_prefix(prefix)
                    .filter(|rest| starts_upper(rest))
                    .map(|rest| (*subject, rest))
            })
            .ok_or_else(|| err("not a derived query method name".to_string()))?;

        let by = if rest.starts_with("By") {
            Some(0)
        } else {
            find_keyword(rest, "By")
        };
        let Some(by) = by else {
            return Err(err("missing By clause".to_string()));
        };
        let max_results = Self::parse_subject_modifiers(&rest[..by]).map_err(err)?;

        let predicate = &rest[by + 2..];
        let (predicate, order) = match predicate.find("OrderBy").filter(|i| starts_upper(&predicate[i + 7..])) {
            Some(i) => (&predicate[..i], Some(&predicate[i + 7..])),
            None => (predicate, None),
        };

        if predicate.ends_with("AllIgnoreCase") {
            return Err(err("AllIgnoreCase is not supported".to_string()));
        }

        let mut terms = vec![];
        if !predicate.is_empty() {
            let groups = split_keyword(predicate, "Or");
            if groups.len() > 1 {
                return Err(err("Or is not supported, conditions can only be combined with And".to_string()));
            }
            for part in split_keyword(predicate, "And") {
                terms.push(Self::parse_term(part, schema).map_err(err)?);
            }
        }

        let sort = match order {
            Some(order) => Self::parse_order(order, schema).map_err(err)?,
            None => Sort::unsorted(),
        };

        Ok(Self {
            subject,
            max_results,
            terms,
            sort,
        })
    }

    fn parse_subject_modifiers(subject: &str) -> std::result::Result<Option<usize>, String> {
        if subject.contains("Distinct") {
            return Err("Distinct is not supported".to_string());
        }
        for keyword in ["First", "Top"] {
            if let Some(i) = subject.find(keyword) {
                let digits: String = subject[i + keyword.len()..].chars().take_while(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    return Ok(Some(1));
                }
                return match digits.parse::<usize>() {
                    Ok(n) if n > 0 => Ok(Some(n)),
                    _ => Err(format!("invalid result restriction {}{}", keyword, digits)),
                };
            }
        }
        Ok(None)
    }

    fn parse_term(part: &str, schema: &EntityKeySchema) -> std::result::Result<ComparisonTerm, String> {
        if part.is_empty() {
            return Err("empty condition".to_string());
        }
        if part.ends_with("IgnoreCase") {
            return Err("IgnoreCase is not supported".to_string());
        }

        for (spellings, keyword) in KEYWORDS {
            for spelling in spellings.iter() {
                let Some(raw) = part.strip_suffix(spelling) else {
                    continue;
                };
                let Some(property) = resolve_property(schema, raw) else {
                    continue;
                };
                return match keyword {
                    Keyword::Supported(operator) => Ok(ComparisonTerm {
                        property,
                        operator: *operator,
                    }),
                    Keyword::Unsupported(name) => Err(format!("{} is not supported on {}", name, property)),
                };
            }
        }

        match resolve_property(schema, part) {
            Some(property) => Ok(ComparisonTerm {
                property,
                operator: TermOperator::Equals,
            }),
            None => Err(format!("no property found for {}", part)),
        }
    }

    fn parse_order(order: &str, schema: &EntityKeySchema) -> std::result::Result<Sort, String> {
        let mut orders = vec![];
        let mut rest = order;
        while !rest.is_empty() {
            let mut end = None;
            for (i, _) in rest.char_indices().skip(1) {
                let head = &rest[..i];
                if (head.ends_with("Asc") || head.ends_with("Desc")) && starts_upper(&rest[i..]) {
                    end = Some(i);
                    break;
                }
            }
            let end = end.unwrap_or(rest.len());
            let block = &rest[..end];
            rest = &rest[end..];

            let (raw, direction) = if let Some(raw) = block.strip_suffix("Desc") {
                (raw, Direction::Desc)
            } else if let Some(raw) = block.strip_suffix("Asc") {
                (raw, Direction::Asc)
            } else {
                (block, Direction::Asc)
            };
            let property = resolve_property(schema, raw).ok_or_else(|| format!("no property found for {} in order clause", raw))?;
            orders.push(Order { property, direction });
        }
        Ok(orders.into())
    }

    /// Number of arguments the derived conditions consume, in declaration order.
    pub fn parameter_count(&self) -> usize {
        self.terms.iter().map(ComparisonTerm::operand_count).sum()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsistentReadMode {
    /// Leaves the choice to the store.
    #[default]
    Default,
    Consistent,
    Eventual,
}

/// One expression-attribute substitution. Exactly one of `value` and `parameter_name` is set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpressionAttribute {
    pub key: String,
    pub value: Option<String>,
    pub parameter_name: Option<String>,
}

impl ExpressionAttribute {
    pub fn value<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            parameter_name: None,
        }
    }

    pub fn parameter<K: Into<String>, P: Into<String>>(key: K, parameter_name: P) -> Self {
        Self {
            key: key.into(),
            value: None,
            parameter_name: Some(parameter_name.into()),
        }
    }
}

/// Static options attached to a query method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryAnnotation {
    pub filter_expression: Option<String>,
    pub expression_attribute_names: Vec<ExpressionAttribute>,
    pub expression_attribute_values: Vec<ExpressionAttribute>,
    pub limit: i32,
    pub consistent_reads: ConsistentReadMode,
    pub projection: Option<String>,
    /// Pins the secondary index used by the query.
    pub index_name: Option<String>,
}

impl Default for QueryAnnotation {
    fn default() -> Self {
        Self {
            filter_expression: None,
            expression_attribute_names: vec![],
            expression_attribute_values: vec![],
            limit: QUERY_LIMIT_UNLIMITED,
            consistent_reads: ConsistentReadMode::Default,
            projection: None,
            index_name: None,
        }
    }
}

impl QueryAnnotation {
    pub fn with_filter_expression<S: Into<String>>(mut self, expression: S) -> Self {
        self.filter_expression = Some(expression.into());
        self
    }

    pub fn with_name(mut self, attribute: ExpressionAttribute) -> Self {
        self.expression_attribute_names.push(attribute);
        self
    }

    pub fn with_value(mut self, attribute: ExpressionAttribute) -> Self {
        self.expression_attribute_values.push(attribute);
        self
    }

    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_consistent_reads(mut self, mode: ConsistentReadMode) -> Self {
        self.consistent_reads = mode;
        self
    }

    pub fn with_projection<S: Into<String>>(mut self, projection: S) -> Self {
        self.projection = Some(projection.into());
        self
    }

    pub fn with_index_name<S: Into<String>>(mut self, index_name: S) -> Self {
        self.index_name = Some(index_name.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    Literal(Value),
    /// Position of the method argument supplying the value.
    Parameter(usize),
}

/// A validated [`QueryAnnotation`], with parameter names resolved to argument positions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub filter_expression: Option<String>,
    pub names: Vec<(String, Binding)>,
    pub values: Vec<(String, Binding)>,
    pub limit: Option<usize>,
    pub consistent_reads: ConsistentReadMode,
    pub projection: Option<String>,
    pub index_name: Option<String>,
}

fn bindings(
    attributes: &[ExpressionAttribute],
    prefix: char,
    parameter_names: &[String],
) -> Result<Vec<(String, Binding)>> {
    let mut seen = HashSet::new();
    attributes
        .iter()
        .map(|a| {
            if !a.key.starts_with(prefix) || a.key.len() < 2 {
                return Err(Error::Configuration(format!(
                    "expression attribute key {} must start with {}",
                    a.key, prefix
                )));
            }
            if !seen.insert(a.key.as_str()) {
                return Err(Error::Configuration(format!("expression attribute {} is declared twice", a.key)));
            }
            let binding = match (&a.value, &a.parameter_name) {
                (Some(v), None) => Binding::Literal(Value::S(v.clone())),
                (None, Some(p)) => match parameter_names.iter().position(|n| n == p) {
                    Some(i) => Binding::Parameter(i),
                    None => {
                        return Err(Error::Configuration(format!(
                            "expression attribute {} refers to undeclared parameter {}",
                            a.key, p
                        )))
                    }
                },
                _ => {
                    return Err(Error::Configuration(format!(
                        "expression attribute {} needs exactly one of a value or a parameter name",
                        a.key
                    )))
                }
            };
            Ok((a.key.clone(), binding))
        })
        .collect()
}

/// Validates an annotation against the method's parameter names. An absent annotation leaves
/// every option unset.
pub fn parse_annotation(annotation: Option<&QueryAnnotation>, parameter_names: &[String]) -> Result<QueryOptions> {
    let Some(annotation) = annotation else {
        return Ok(QueryOptions::default());
    };

    let limit = match annotation.limit {
        QUERY_LIMIT_UNLIMITED => None,
        n if n > 0 => Some(n as usize),
        n => return Err(Error::Configuration(format!("query limit must be positive, got {}", n))),
    };

    if annotation.filter_expression.as_deref().map_or(false, |e| e.trim().is_empty()) {
        return Err(Error::Configuration("filter expression must not be blank".to_string()));
    }
    if annotation.filter_expression.is_none()
        && !(annotation.expression_attribute_names.is_empty() && annotation.expression_attribute_values.is_empty())
    {
        return Err(Error::Configuration(
            "expression attribute names and values need a filter expression".to_string(),
        ));
    }
    if annotation.index_name.as_deref() == Some("") {
        return Err(Error::Configuration("index name must not be empty".to_string()));
    }

    Ok(QueryOptions {
        filter_expression: annotation.filter_expression.clone(),
        names: bindings(&annotation.expression_attribute_names, '#', parameter_names)?,
        values: bindings(&annotation.expression_attribute_values, ':', parameter_names)?,
        limit,
        consistent_reads: annotation.consistent_reads,
        projection: annotation.projection.clone(),
        index_name: annotation.index_name.clone(),
    })
}
