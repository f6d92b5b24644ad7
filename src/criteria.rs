//! Accumulates bound conditions for one query invocation and decides how to execute it.
//!
//! A [`QueryCriteria`] is built fresh for every invocation and consumed by [`QueryCriteria::complete`],
//! which produces an immutable [`RequestShape`]. The decision, in order of preference:
//!
//! 1. nothing bound: a static result, the store is never called
//! 2. the full primary key bound by equality and nothing else: a key lookup
//! 3. a secondary index whose partition key is bound by equality: a query on that index
//! 4. the table partition key bound by equality: a query on the table
//! 5. otherwise a scan, with every condition as a filter

use super::{
    metadata::{EntityKeySchema, IndexKind, SecondaryIndex},
    paging::Sort,
    parser::ConsistentReadMode,
    request::{ComparisonOperator, Condition, FilterExpression, KeyLookup, QueryRequest, RequestShape, ScanRequest},
    value::Value,
    Error, Result,
};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

#[derive(Clone, Debug)]
struct PropertyCondition {
    property: String,
    operator: ComparisonOperator,
    values: Vec<Value>,
}

#[derive(Clone, Debug)]
pub struct QueryCriteria {
    schema: Arc<EntityKeySchema>,
    hash_key_value: Option<Value>,
    conditions: Vec<PropertyCondition>,
    bindings: usize,
    error: Option<String>,
    sort: Sort,
    projection: Option<String>,
    limit: Option<usize>,
    consistent_reads: ConsistentReadMode,
    filter_expression: Option<String>,
    expression_attribute_names: HashMap<String, String>,
    expression_attribute_values: HashMap<String, Value>,
    index_name: Option<String>,
}

impl QueryCriteria {
    pub fn new(schema: Arc<EntityKeySchema>) -> Self {
        Self {
            schema,
            hash_key_value: None,
            conditions: vec![],
            bindings: 0,
            error: None,
            sort: Sort::unsorted(),
            projection: None,
            limit: None,
            consistent_reads: ConsistentReadMode::Default,
            filter_expression: None,
            expression_attribute_names: HashMap::new(),
            expression_attribute_values: HashMap::new(),
            index_name: None,
        }
    }

    // Binding problems are reported by complete() so the builder stays chainable.
    fn fail(&mut self, msg: String) {
        if self.error.is_none() {
            self.error = Some(msg);
        }
    }

    fn bind(&mut self, property: &str, values: &[Value]) -> bool {
        self.bindings += 1;
        if !self.schema.has_property(property) {
            self.fail(format!("{} has no property {}", self.schema.table_name(), property));
            return false;
        }
        if values.iter().any(Value::is_null) {
            self.fail(format!("null value bound to {}, use an IsNull condition instead", property));
            return false;
        }
        true
    }

    fn push(&mut self, property: &str, operator: ComparisonOperator, values: Vec<Value>) {
        self.conditions.push(PropertyCondition {
            property: property.to_string(),
            operator,
            values,
        });
    }

    /// Equality on the table partition key becomes the hash-key candidate. Any other equality is
    /// kept as a condition, to be used as a sort-key or index key condition or as a filter.
    pub fn with_property_equals(mut self, property: &str, value: Value) -> Self {
        if !self.bind(property, std::slice::from_ref(&value)) {
            return self;
        }
        if property == self.schema.hash_key_property_name() {
            match self.hash_key_value.as_ref().map(|existing| existing.matches(&value)) {
                Some(false) => self.fail(format!("competing equality conditions on partition key {}", property)),
                Some(true) => {}
                None => self.hash_key_value = Some(value),
            }
        } else {
            self.push(property, ComparisonOperator::Eq, vec![value]);
        }
        self
    }

    pub fn with_property_in(mut self, property: &str, values: Vec<Value>) -> Self {
        if !self.bind(property, &values) {
            return self;
        }
        if values.is_empty() {
            self.fail(format!("IN condition on {} needs at least one value", property));
            return self;
        }
        self.push(property, ComparisonOperator::In, values);
        self
    }

    /// The caller is responsible for `low <= high`.
    pub fn with_property_between(mut self, property: &str, low: Value, high: Value) -> Self {
        let values = vec![low, high];
        if self.bind(property, &values) {
            self.push(property, ComparisonOperator::Between, values);
        }
        self
    }

    pub fn with_single_value_criteria(mut self, property: &str, operator: ComparisonOperator, value: Value) -> Self {
        match operator {
            ComparisonOperator::Eq => self.with_property_equals(property, value),
            ComparisonOperator::In => self.with_property_in(property, vec![value]),
            op if op.operand_count() != 1 => {
                self.bindings += 1;
                self.fail(format!("{} does not take a single value", op));
                self
            }
            op => {
                if self.bind(property, std::slice::from_ref(&value)) {
                    self.push(property, op, vec![value]);
                }
                self
            }
        }
    }

    pub fn with_no_valued_criteria(mut self, property: &str, operator: ComparisonOperator) -> Self {
        if operator.operand_count() != 0 {
            self.bindings += 1;
            self.fail(format!("{} needs a value", operator));
            return self;
        }
        if self.bind(property, &[]) {
            self.push(property, operator, vec![]);
        }
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_projection(mut self, projection: Option<String>) -> Self {
        self.projection = projection;
        self
    }

    /// Bounds the items examined per page. The executor truncates the result separately.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_consistent_reads(mut self, mode: ConsistentReadMode) -> Self {
        self.consistent_reads = mode;
        self
    }

    pub fn with_filter_expression(mut self, expression: Option<String>) -> Self {
        self.filter_expression = expression;
        self
    }

    pub fn with_expression_attribute_names(mut self, names: HashMap<String, String>) -> Self {
        self.expression_attribute_names.extend(names);
        self
    }

    pub fn with_expression_attribute_values(mut self, values: HashMap<String, Value>) -> Self {
        self.expression_attribute_values.extend(values);
        self
    }

    /// Pins the secondary index instead of letting the criteria pick one.
    pub fn with_index_name(mut self, index_name: Option<String>) -> Self {
        self.index_name = index_name;
        self
    }

    pub fn is_hash_key_bound(&self) -> bool {
        self.hash_key_value.is_some()
    }

    fn has_condition(&self, property: &str, f: impl Fn(ComparisonOperator) -> bool) -> bool {
        self.conditions.iter().any(|c| c.property == property && f(c.operator))
    }

    fn has_equality(&self, property: &str) -> bool {
        if property == self.schema.hash_key_property_name() {
            return self.is_hash_key_bound();
        }
        self.has_condition(property, |op| op == ComparisonOperator::Eq)
    }

    fn has_range_condition(&self, index: &SecondaryIndex) -> bool {
        index
            .range_key_property
            .as_deref()
            .map_or(false, |p| self.has_condition(p, |op| op.is_key_condition_operator()))
    }

    fn sorts_by(&self, property: Option<&str>) -> bool {
        match (self.sort.orders().first(), property) {
            (Some(order), Some(p)) => order.property == p,
            _ => false,
        }
    }

    /// The index the request will target. An explicitly named index always wins. Otherwise, in
    /// lexicographic order of index names, the first index whose partition key is bound by
    /// equality and whose sort key has a usable condition, then one whose sort key matches the
    /// requested order, then (global indexes only) any whose partition key is bound.
    pub fn selected_index_name(&self) -> Option<&str> {
        if let Some(name) = &self.index_name {
            return Some(name.as_str());
        }

        let table_pk = self.schema.hash_key_property_name();
        if self.is_hash_key_bound() {
            let table_range = self.schema.range_key_property_name();
            if table_range.map_or(false, |p| self.has_condition(p, |op| op.is_key_condition_operator()))
                || self.sorts_by(table_range)
            {
                return None;
            }
            let candidates = move || self.schema.indexes().filter(move |i| i.hash_key_property == table_pk);
            return candidates()
                .find(|i| self.has_range_condition(i))
                .or_else(|| candidates().find(|i| self.sorts_by(i.range_key_property.as_deref())))
                .map(|i| i.name.as_str());
        }

        let candidates = move || {
            self.schema
                .indexes()
                .filter(move |i| i.kind == IndexKind::Global && self.has_equality(&i.hash_key_property))
        };
        candidates()
            .find(|i| self.has_range_condition(i))
            .or_else(|| candidates().find(|i| self.sorts_by(i.range_key_property.as_deref())))
            .or_else(|| candidates().next())
            .map(|i| i.name.as_str())
    }

    fn selected_index(&self) -> Option<&SecondaryIndex> {
        self.selected_index_name().and_then(|n| self.schema.index(n))
    }

    /// Whether the selected index has its partition key bound by equality. For a local index, or a
    /// global index keyed on the table's partition key, that is the table's hash-key binding.
    pub fn has_index_hash_key_equal_condition(&self) -> bool {
        match self.selected_index() {
            Some(index) if index.hash_key_property == self.schema.hash_key_property_name() => self.is_hash_key_bound(),
            Some(index) => self.schema.is_global_index_hash_key_property(&index.hash_key_property)
                && self.has_equality(&index.hash_key_property),
            None => false,
        }
    }

    pub fn is_applicable_for_global_secondary_index(&self) -> bool {
        self.selected_index().is_some() && self.has_index_hash_key_equal_condition()
    }

    /// True when the only conditions are equalities on the full primary key.
    pub fn is_applicable_for_load(&self) -> bool {
        if !self.is_hash_key_bound() || self.filter_expression.is_some() || self.index_name.is_some() {
            return false;
        }
        match self.schema.range_key_property_name() {
            None => self.conditions.is_empty(),
            Some(range) => {
                self.conditions.len() == 1
                    && self.conditions[0].property == range
                    && self.conditions[0].operator == ComparisonOperator::Eq
            }
        }
    }

    /// The equality condition on the partition key of whichever key path the request uses.
    /// Emitted whenever a partition-key equality is bound, index selected or not.
    pub fn hash_key_conditions(&self) -> Vec<Condition> {
        if let Some(index) = self.selected_index() {
            if index.hash_key_property != self.schema.hash_key_property_name() {
                if let Some(c) = self
                    .conditions
                    .iter()
                    .find(|c| c.property == index.hash_key_property && c.operator == ComparisonOperator::Eq)
                {
                    return vec![self.to_condition(c)];
                }
            }
        }
        match &self.hash_key_value {
            Some(v) => vec![Condition::eq(self.schema.hash_key_attribute_name(), v.clone())],
            None => vec![],
        }
    }

    fn to_condition(&self, c: &PropertyCondition) -> Condition {
        Condition::new(self.schema.attribute_name(&c.property), c.operator, c.values.clone())
    }

    fn consistent_read(&self) -> Option<bool> {
        match self.consistent_reads {
            ConsistentReadMode::Default => None,
            ConsistentReadMode::Consistent => Some(true),
            ConsistentReadMode::Eventual => Some(false),
        }
    }

    fn user_filter_expression(&self) -> Option<FilterExpression> {
        self.filter_expression.as_ref().map(|expression| FilterExpression {
            expression: expression.clone(),
            names: self.expression_attribute_names.clone(),
            values: self.expression_attribute_values.clone(),
        })
    }

    /// Splits the conditions into key conditions and filters for a query whose key path is
    /// `hash_property` plus `range_property`.
    fn key_path(&self, hash_property: &str, range_property: Option<&str>) -> Result<(Vec<Condition>, Vec<Condition>)> {
        let mut key_conditions = self.hash_key_conditions();
        let mut filter_conditions = vec![];
        let table_pk = self.schema.hash_key_property_name();

        if hash_property != table_pk {
            if let Some(v) = &self.hash_key_value {
                filter_conditions.push(Condition::eq(self.schema.hash_key_attribute_name(), v.clone()));
            }
        }

        let mut hash_key_used = hash_property == table_pk;
        let mut range_key_used = false;
        for c in &self.conditions {
            if c.property == hash_property && c.operator == ComparisonOperator::Eq && !hash_key_used {
                hash_key_used = true;
            } else if Some(c.property.as_str()) == range_property && c.operator.is_key_condition_operator() && !range_key_used {
                range_key_used = true;
                key_conditions.push(self.to_condition(c));
            } else if c.property == hash_property || Some(c.property.as_str()) == range_property {
                return Err(Error::InvalidQuery(format!(
                    "{} is a key of the queried index and can only have one key condition",
                    c.property
                )));
            } else {
                filter_conditions.push(self.to_condition(c));
            }
        }
        Ok((key_conditions, filter_conditions))
    }

    fn scan_index_forward(&self, range_property: Option<&str>) -> Result<bool> {
        match self.sort.orders() {
            [] => Ok(true),
            [order] if Some(order.property.as_str()) == range_property => Ok(order.direction.is_ascending()),
            [order] => Err(Error::InvalidQuery(format!(
                "cannot sort by {}, only by the sort key of the queried table or index",
                order.property
            ))),
            _ => Err(Error::InvalidQuery("only one sort order is supported".to_string())),
        }
    }

    /// Finishes the criteria, consuming it.
    pub fn complete(self) -> Result<RequestShape> {
        if let Some(msg) = &self.error {
            return Err(Error::InvalidQuery(msg.clone()));
        }
        if let Some(name) = &self.index_name {
            if self.schema.index(name).is_none() {
                return Err(Error::InvalidQuery(format!("{} has no index {}", self.schema.table_name(), name)));
            }
            if self.bindings > 0 && !self.has_index_hash_key_equal_condition() {
                return Err(Error::InvalidQuery(format!(
                    "index {} needs an equality condition on its partition key",
                    name
                )));
            }
        }

        let shape = if self.bindings == 0 {
            RequestShape::Static
        } else if self.is_applicable_for_load() {
            let range_key = match (self.schema.range_key_attribute_name(), self.conditions.first()) {
                (Some(attribute), Some(c)) => Some((attribute.to_string(), c.values[0].clone())),
                _ => None,
            };
            RequestShape::Get(KeyLookup {
                hash_key: (
                    self.schema.hash_key_attribute_name().to_string(),
                    self.hash_key_value.clone().unwrap_or(Value::Null),
                ),
                range_key,
                consistent_read: self.consistent_read(),
                projection: self.projection.clone(),
            })
        } else if self.is_applicable_for_global_secondary_index() {
            let Some(index) = self.selected_index() else {
                return Err(Error::InvalidQuery("no index selected".to_string()));
            };
            let range = index.range_key_property.as_deref();
            let (key_conditions, filter_conditions) = self.key_path(&index.hash_key_property, range)?;
            RequestShape::Query(QueryRequest {
                index_name: Some(index.name.clone()),
                key_conditions,
                filter_conditions,
                filter_expression: self.user_filter_expression(),
                projection: self.projection.clone(),
                limit: self.limit,
                consistent_read: self.consistent_read(),
                scan_index_forward: self.scan_index_forward(range)?,
            })
        } else if self.is_hash_key_bound() {
            let range = self.schema.range_key_property_name();
            let (key_conditions, filter_conditions) = self.key_path(self.schema.hash_key_property_name(), range)?;
            RequestShape::Query(QueryRequest {
                index_name: None,
                key_conditions,
                filter_conditions,
                filter_expression: self.user_filter_expression(),
                projection: self.projection.clone(),
                limit: self.limit,
                consistent_read: self.consistent_read(),
                scan_index_forward: self.scan_index_forward(range)?,
            })
        } else {
            if !self.sort.is_unsorted() {
                return Err(Error::InvalidQuery(
                    "sorting needs a partition key equality condition, scans cannot be sorted".to_string(),
                ));
            }
            RequestShape::Scan(ScanRequest {
                filter_conditions: self.conditions.iter().map(|c| self.to_condition(c)).collect(),
                filter_expression: self.user_filter_expression(),
                projection: self.projection.clone(),
                limit: self.limit,
                consistent_read: self.consistent_read(),
            })
        };

        debug!(
            table = self.schema.table_name(),
            strategy = shape.strategy(),
            index = ?self.selected_index_name(),
            conditions = self.bindings,
            "query criteria completed"
        );
        Ok(shape)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        operationstest::fixtures::{Customer, Order as OrderEntity},
        paging::Order,
    };

    fn customer() -> QueryCriteria {
        QueryCriteria::new(EntityKeySchema::of::<Customer>().unwrap())
    }

    fn order() -> QueryCriteria {
        QueryCriteria::new(EntityKeySchema::of::<OrderEntity>().unwrap())
    }

    fn query(shape: RequestShape) -> QueryRequest {
        match shape {
            RequestShape::Query(q) => q,
            other => panic!("expected a query, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_conditions_are_static() {
        assert_eq!(customer().complete().unwrap(), RequestShape::Static);
        assert_eq!(
            customer().with_limit(Some(3)).with_projection(Some("id".into())).complete().unwrap(),
            RequestShape::Static
        );
    }

    #[test]
    fn test_local_index_discrimination() {
        let criteria = order()
            .with_property_equals("customerId", "c1".into())
            .with_single_value_criteria("total", ComparisonOperator::Gt, 100.into());
        assert_eq!(criteria.selected_index_name(), Some("totalIndex"));
        assert!(criteria.is_applicable_for_global_secondary_index());
        assert!(criteria.has_index_hash_key_equal_condition());

        let q = query(criteria.complete().unwrap());
        assert_eq!(q.index_name.as_deref(), Some("totalIndex"));
        assert_eq!(
            q.key_conditions,
            vec![
                Condition::eq("customerId", "c1".into()),
                Condition::new("total", ComparisonOperator::Gt, vec![100.into()]),
            ]
        );
        assert!(q.filter_conditions.is_empty());
    }

    #[test]
    fn test_global_index_discrimination() {
        let criteria = customer().with_property_equals("email", "a@example.com".into());
        assert_eq!(criteria.selected_index_name(), Some("emailIndex"));
        assert!(criteria.is_applicable_for_global_secondary_index());
        assert!(criteria.has_index_hash_key_equal_condition());
        assert_eq!(criteria.hash_key_conditions(), vec![Condition::eq("email", "a@example.com".into())]);

        let q = query(criteria.complete().unwrap());
        assert_eq!(q.index_name.as_deref(), Some("emailIndex"));
    }

    #[test]
    fn test_no_index_selected() {
        let criteria = order().with_property_equals("customerId", "c1".into());
        assert_eq!(criteria.selected_index_name(), None);
        assert!(!criteria.is_applicable_for_global_secondary_index());
        assert!(!criteria.has_index_hash_key_equal_condition());
        // still emitted for table queries
        assert_eq!(criteria.hash_key_conditions(), vec![Condition::eq("customerId", "c1".into())]);

        let q = query(criteria.complete().unwrap());
        assert_eq!(q.index_name, None);
        assert!(q.scan_index_forward);
    }

    #[test]
    fn test_table_range_condition_beats_local_index() {
        let q = query(
            order()
                .with_property_equals("customerId", "c1".into())
                .with_single_value_criteria("orderDate", ComparisonOperator::Ge, "2020-01-01".into())
                .with_single_value_criteria("total", ComparisonOperator::Gt, 100.into())
                .complete()
                .unwrap(),
        );
        assert_eq!(q.index_name, None);
        assert_eq!(q.key_conditions.len(), 2);
        assert_eq!(q.key_conditions[1].attribute, "order_date");
        assert_eq!(q.filter_conditions, vec![Condition::new("total", ComparisonOperator::Gt, vec![100.into()])]);
    }

    #[test]
    fn test_index_tie_break() {
        let build = || {
            customer()
                .with_property_equals("status", "active".into())
                .with_property_equals("lastName", "Smith".into())
                .with_single_value_criteria("age", ComparisonOperator::Gt, 30.into())
        };
        assert_eq!(build().selected_index_name(), Some("lastNameIndex"));

        let q = query(build().with_index_name(Some("statusIndex".into())).complete().unwrap());
        assert_eq!(q.index_name.as_deref(), Some("statusIndex"));
        assert_eq!(q.key_conditions[0], Condition::eq("status", "active".into()));
        assert_eq!(q.filter_conditions, vec![Condition::eq("last_name", "Smith".into())]);
    }

    #[test]
    fn test_global_index_query_filters_table_key() {
        let q = query(
            customer()
                .with_property_equals("id", "u1".into())
                .with_property_equals("status", "active".into())
                .with_index_name(Some("statusIndex".into()))
                .complete()
                .unwrap(),
        );
        assert_eq!(q.key_conditions, vec![Condition::eq("status", "active".into())]);
        assert_eq!(q.filter_conditions, vec![Condition::eq("id", "u1".into())]);
    }

    #[test]
    fn test_load() {
        match customer().with_property_equals("id", "u1".into()).complete().unwrap() {
            RequestShape::Get(lookup) => {
                assert_eq!(lookup.hash_key, ("id".to_string(), "u1".into()));
                assert_eq!(lookup.range_key, None);
            }
            other => panic!("expected a get, got {:?}", other),
        }

        match order()
            .with_property_equals("customerId", "c1".into())
            .with_property_equals("orderDate", "2020-01-01".into())
            .with_consistent_reads(ConsistentReadMode::Consistent)
            .complete()
            .unwrap()
        {
            RequestShape::Get(lookup) => {
                assert_eq!(lookup.range_key, Some(("order_date".to_string(), "2020-01-01".into())));
                assert_eq!(lookup.consistent_read, Some(true));
            }
            other => panic!("expected a get, got {:?}", other),
        }
    }

    #[test]
    fn test_scan() {
        match customer()
            .with_property_equals("name", "Bob".into())
            .with_no_valued_criteria("status", ComparisonOperator::NotNull)
            .with_limit(Some(5))
            .complete()
            .unwrap()
        {
            RequestShape::Scan(scan) => {
                assert_eq!(scan.filter_conditions.len(), 2);
                assert_eq!(scan.limit, Some(5));
            }
            other => panic!("expected a scan, got {:?}", other),
        }
    }

    #[test]
    fn test_competing_hash_keys() {
        let r = customer()
            .with_property_equals("id", "u1".into())
            .with_property_equals("id", "u2".into())
            .complete();
        assert!(matches!(r, Err(Error::InvalidQuery(_))));

        // the same value twice is not a conflict
        let r = customer()
            .with_property_equals("id", "u1".into())
            .with_property_equals("id", "u1".into())
            .complete();
        assert!(matches!(r, Ok(RequestShape::Get(_))));
    }

    #[test]
    fn test_structural_misuse() {
        for criteria in [
            customer().with_property_equals("name", Value::Null),
            customer().with_property_equals("nickname", "x".into()),
            customer().with_property_in("status", vec![]),
            customer().with_single_value_criteria("age", ComparisonOperator::Between, 1.into()),
            customer().with_no_valued_criteria("age", ComparisonOperator::Gt),
            customer().with_index_name(Some("nope".into())).with_property_equals("id", "u1".into()),
            customer()
                .with_index_name(Some("emailIndex".into()))
                .with_property_equals("id", "u1".into())
                .with_property_equals("status", "active".into()),
        ] {
            assert!(matches!(criteria.complete(), Err(Error::InvalidQuery(_))));
        }
    }

    #[test]
    fn test_sort() {
        let q = query(
            order()
                .with_property_equals("customerId", "c1".into())
                .with_sort(Sort::by(Order::desc("orderDate")))
                .complete()
                .unwrap(),
        );
        assert!(!q.scan_index_forward);

        // ordering by a local index sort key selects that index
        let q = query(
            order()
                .with_property_equals("customerId", "c1".into())
                .with_sort(Sort::by(Order::asc("total")))
                .complete()
                .unwrap(),
        );
        assert_eq!(q.index_name.as_deref(), Some("totalIndex"));

        let r = customer()
            .with_property_equals("name", "Bob".into())
            .with_sort(Sort::by(Order::asc("age")))
            .complete();
        assert!(matches!(r, Err(Error::InvalidQuery(_))));

        let r = order()
            .with_property_equals("customerId", "c1".into())
            .with_sort(Sort::by(Order::asc("orderDate")).and(Sort::by(Order::asc("total"))))
            .complete();
        assert!(matches!(r, Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_second_sort_key_condition_is_rejected() {
        let r = order()
            .with_property_equals("customerId", "c1".into())
            .with_single_value_criteria("orderDate", ComparisonOperator::Ge, "2020".into())
            .with_single_value_criteria("orderDate", ComparisonOperator::Lt, "2021".into())
            .complete();
        assert!(matches!(r, Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_filter_expression_is_carried() {
        let q = query(
            order()
                .with_property_equals("customerId", "c1".into())
                .with_filter_expression(Some("#t > :min".into()))
                .with_expression_attribute_names([("#t".to_string(), "total".to_string())].into())
                .with_expression_attribute_values([(":min".to_string(), Value::from(5))].into())
                .complete()
                .unwrap(),
        );
        let filter = q.filter_expression.unwrap();
        assert_eq!(filter.expression, "#t > :min");
        assert_eq!(filter.names["#t"], "total");
    }
}
