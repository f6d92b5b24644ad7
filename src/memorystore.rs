//! An in-memory [`Operations`] implementation for tests and local development.
//!
//! Items are stored marshalled and under their attribute names, so conditions are evaluated the
//! way DynamoDB evaluates them. Filter expressions are parsed and evaluated by [`crate::filter`].

use super::{
    batch::{write_with_retry, BatchWriteRetryConfig},
    config::{DynamoConfig, TableNameResolver},
    filter::{begins_with, contains, Filter},
    marshalling::MarshallingMode,
    operations::{Operations, ResultPage, TableSchema},
    request::{ComparisonOperator, Condition, FilterExpression, KeyLookup, QueryRequest, ScanRequest},
    value::{Item, Value},
    Entity, Error, Result,
};
use parking_lot::Mutex;
use simple_error::SimpleError;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
};

const DEFAULT_PAGE_SIZE: usize = 100;

type Table = BTreeMap<String, Item>;

pub struct Backend {
    tables: Mutex<HashMap<String, Table>>,
    marshalling_mode: MarshallingMode,
    table_name_resolver: TableNameResolver,
    batch_retry: BatchWriteRetryConfig,
    page_size: usize,
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates a marshalled condition against a stored item. Comparisons between values of
/// different types are false, as in DynamoDB.
fn evaluate(item: &Item, c: &Condition) -> bool {
    let actual = item.get(&c.attribute);
    let operand = c.values.first();
    let compare = |f: fn(Ordering) -> bool| match (actual, operand) {
        (Some(a), Some(v)) => a.compare(v).map_or(false, f),
        _ => false,
    };
    match c.operator {
        ComparisonOperator::Eq => matches!((actual, operand), (Some(a), Some(v)) if a.matches(v)),
        ComparisonOperator::Ne => !matches!((actual, operand), (Some(a), Some(v)) if a.matches(v)),
        ComparisonOperator::In => actual.map_or(false, |a| c.values.iter().any(|v| a.matches(v))),
        ComparisonOperator::Le => compare(|o| o != Ordering::Greater),
        ComparisonOperator::Lt => compare(|o| o == Ordering::Less),
        ComparisonOperator::Ge => compare(|o| o != Ordering::Less),
        ComparisonOperator::Gt => compare(|o| o == Ordering::Greater),
        ComparisonOperator::Between => match (actual, c.values.as_slice()) {
            (Some(a), [low, high]) => {
                a.compare(low).map_or(false, |o| o != Ordering::Less) && a.compare(high).map_or(false, |o| o != Ordering::Greater)
            }
            _ => false,
        },
        ComparisonOperator::Null => actual.is_none(),
        ComparisonOperator::NotNull => actual.is_some(),
        ComparisonOperator::Contains => matches!((actual, operand), (Some(a), Some(v)) if contains(a, v)),
        ComparisonOperator::NotContains => !matches!((actual, operand), (Some(a), Some(v)) if contains(a, v)),
        ComparisonOperator::BeginsWith => matches!((actual, operand), (Some(a), Some(v)) if begins_with(a, v)),
    }
}

fn project(item: Item, projection: Option<&str>) -> Item {
    match projection {
        None => item,
        Some(projection) => {
            let attributes: Vec<&str> = projection.split(',').map(str::trim).collect();
            item.into_iter().filter(|(k, _)| attributes.contains(&k.as_str())).collect()
        }
    }
}

fn storage_key(schema: &TableSchema, key: &Item) -> Result<String> {
    let hash_key = schema.key_schema.hash_key_attribute_name();
    let Some(hash) = key.get(hash_key) else {
        return Err(Error::Mapping(format!("{}: missing partition key {}", schema.table_name, hash_key)));
    };
    let mut ret = hash.key_string();
    if let Some(range_key) = schema.key_schema.range_key_attribute_name() {
        let Some(range) = key.get(range_key) else {
            return Err(Error::Mapping(format!("{}: missing sort key {}", schema.table_name, range_key)));
        };
        ret.push('|');
        ret.push_str(&range.key_string());
    }
    Ok(ret)
}

/// The non-key part of a request, in stored form.
struct ItemFilter {
    conditions: Vec<Condition>,
    expression: Option<Filter>,
}

impl ItemFilter {
    fn new(schema: &TableSchema, conditions: &[Condition], expression: Option<&FilterExpression>) -> Result<Self> {
        let expression = match expression {
            Some(f) => {
                let values: HashMap<String, Value> =
                    f.values.iter().map(|(k, v)| (k.clone(), schema.marshal(v))).collect();
                Some(Filter::parse(&f.expression, &f.names, &values)?)
            }
            None => None,
        };
        Ok(Self {
            conditions: schema.marshal_conditions(conditions),
            expression,
        })
    }

    fn matches(&self, item: &Item) -> bool {
        self.conditions.iter().all(|c| evaluate(item, c)) && self.expression.as_ref().map_or(true, |e| e.matches(item))
    }
}

/// Returns one page starting after `exclusive_start_key`. At most `limit` items are examined and
/// a last evaluated key is only returned when more items remain.
fn page(
    schema: &TableSchema,
    items: Vec<Item>,
    exclusive_start_key: Option<&Item>,
    limit: usize,
    filter: &ItemFilter,
) -> Result<(Vec<Item>, Option<Item>)> {
    let start = match exclusive_start_key {
        Some(key) => {
            let key = storage_key(schema, key)?;
            let mut position = None;
            for (i, item) in items.iter().enumerate() {
                if storage_key(schema, item)? == key {
                    position = Some(i + 1);
                    break;
                }
            }
            position.ok_or_else(|| SimpleError::new("exclusive start key does not match any item"))?
        }
        None => 0,
    };
    let end = (start + limit.max(1)).min(items.len());
    let last_evaluated_key = match end < items.len() {
        true => items.get(end - 1).map(|item| schema.key_of(item)),
        false => None,
    };
    let matches = items[start.min(end)..end]
        .iter()
        .filter(|item| filter.matches(item))
        .cloned()
        .collect();
    Ok((matches, last_evaluated_key))
}

impl Backend {
    pub fn new() -> Self {
        Self::with_config(&DynamoConfig::default())
    }

    pub fn with_config(config: &DynamoConfig) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            marshalling_mode: config.marshalling_mode,
            table_name_resolver: config.table_name_resolver(),
            batch_retry: config.batch_retry.clone(),
            page_size: config.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }

    /// Names of the tables written so far, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the stored form of every item in a table, keyed by attribute name.
    pub fn raw_items(&self, table_name: &str) -> Vec<Item> {
        self.tables.lock().get(table_name).map(|t| t.values().cloned().collect()).unwrap_or_default()
    }

    fn page_limit(&self, limit: Option<usize>) -> usize {
        limit.map_or(self.page_size, |limit| limit.min(self.page_size))
    }

    /// The items on the request's key path, in key order.
    fn key_path_items(&self, schema: &TableSchema, request: &QueryRequest) -> Result<Vec<Item>> {
        let key_schema = &schema.key_schema;
        let (hash_attribute, range_attribute) = match &request.index_name {
            Some(name) => {
                let index = key_schema
                    .index(name)
                    .ok_or_else(|| Error::InvalidQuery(format!("{} has no index {}", schema.table_name, name)))?;
                (
                    key_schema.attribute_name(&index.hash_key_property).to_string(),
                    index.range_key_property.as_deref().map(|p| key_schema.attribute_name(p).to_string()),
                )
            }
            None => (
                key_schema.hash_key_attribute_name().to_string(),
                key_schema.range_key_attribute_name().map(str::to_string),
            ),
        };
        if !request.key_conditions.iter().any(|c| c.attribute == hash_attribute && c.operator == ComparisonOperator::Eq) {
            return Err(Error::InvalidQuery(format!("query needs an equality condition on {}", hash_attribute)));
        }

        let key_conditions = schema.marshal_conditions(&request.key_conditions);
        let mut items: Vec<(String, Item)> = vec![];
        if let Some(table) = self.tables.lock().get(&schema.table_name) {
            for (key, item) in table {
                // items lacking an index key are not in the index
                if !item.contains_key(&hash_attribute) || range_attribute.as_ref().map_or(false, |r| !item.contains_key(r)) {
                    continue;
                }
                if key_conditions.iter().all(|c| evaluate(item, c)) {
                    items.push((key.clone(), item.clone()));
                }
            }
        }
        if let Some(range) = &range_attribute {
            items.sort_by(|(ka, a), (kb, b)| {
                let ordering = match (a.get(range), b.get(range)) {
                    (Some(a), Some(b)) => a.compare(b).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                ordering.then_with(|| ka.cmp(kb))
            });
        }
        if !request.scan_index_forward {
            items.reverse();
        }
        Ok(items.into_iter().map(|(_, item)| item).collect())
    }

    fn scan_items(&self, table_name: &str) -> Vec<Item> {
        self.raw_items(table_name)
    }

    fn put_all(&self, schema: &TableSchema, items: Vec<Item>) -> Result<()> {
        let mut keyed = vec![];
        for item in items {
            keyed.push((storage_key(schema, &item)?, item));
        }
        let mut tables = self.tables.lock();
        let table = tables.entry(schema.table_name.clone()).or_default();
        for (key, item) in keyed {
            table.insert(key, item);
        }
        Ok(())
    }

    fn remove_all(&self, schema: &TableSchema, keys: Vec<Item>) -> Result<()> {
        let mut storage_keys = vec![];
        for key in keys {
            storage_keys.push(storage_key(schema, &key)?);
        }
        if let Some(table) = self.tables.lock().get_mut(&schema.table_name) {
            for key in storage_keys {
                table.remove(&key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Operations for Backend {
    async fn get<T: Entity>(&self, lookup: &KeyLookup) -> Result<Option<T>> {
        let schema = self.table_schema::<T>()?;
        let key = schema.marshalling_mode.marshal_item(&lookup.key());
        let key = storage_key(&schema, &key)?;
        let item = self.tables.lock().get(&schema.table_name).and_then(|t| t.get(&key).cloned());
        item.map(|item| schema.from_stored(project(item, lookup.projection.as_deref()))).transpose()
    }

    async fn query_page<T: Entity>(&self, request: &QueryRequest, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>> {
        let schema = self.table_schema::<T>()?;
        let items = self.key_path_items(&schema, request)?;
        let filter = ItemFilter::new(&schema, &request.filter_conditions, request.filter_expression.as_ref())?;
        let (items, last_evaluated_key) = page(&schema, items, exclusive_start_key.as_ref(), self.page_limit(request.limit), &filter)?;
        Ok(ResultPage {
            items: items
                .into_iter()
                .map(|item| schema.from_stored(project(item, request.projection.as_deref())))
                .collect::<Result<_>>()?,
            last_evaluated_key,
        })
    }

    async fn scan_page<T: Entity>(&self, request: &ScanRequest, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>> {
        let schema = self.table_schema::<T>()?;
        let items = self.scan_items(&schema.table_name);
        let filter = ItemFilter::new(&schema, &request.filter_conditions, request.filter_expression.as_ref())?;
        let (items, last_evaluated_key) = page(&schema, items, exclusive_start_key.as_ref(), self.page_limit(request.limit), &filter)?;
        Ok(ResultPage {
            items: items
                .into_iter()
                .map(|item| schema.from_stored(project(item, request.projection.as_deref())))
                .collect::<Result<_>>()?,
            last_evaluated_key,
        })
    }

    async fn count_query<T: Entity>(&self, request: &QueryRequest) -> Result<usize> {
        let schema = self.table_schema::<T>()?;
        let filter = ItemFilter::new(&schema, &request.filter_conditions, request.filter_expression.as_ref())?;
        Ok(self
            .key_path_items(&schema, request)?
            .iter()
            .filter(|item| filter.matches(item))
            .count())
    }

    async fn count_scan<T: Entity>(&self, request: &ScanRequest) -> Result<usize> {
        let schema = self.table_schema::<T>()?;
        let filter = ItemFilter::new(&schema, &request.filter_conditions, request.filter_expression.as_ref())?;
        Ok(self
            .scan_items(&schema.table_name)
            .iter()
            .filter(|item| filter.matches(item))
            .count())
    }

    async fn save<T: Entity>(&self, entity: T) -> Result<T> {
        let schema = self.table_schema::<T>()?;
        self.put_all(&schema, vec![schema.to_stored(&entity)])?;
        Ok(entity)
    }

    async fn delete<T: Entity>(&self, entity: T) -> Result<T> {
        let schema = self.table_schema::<T>()?;
        self.remove_all(&schema, vec![schema.key_of(&schema.to_stored(&entity))])?;
        Ok(entity)
    }

    async fn batch_save<T: Entity>(&self, entities: Vec<T>) -> Result<()> {
        let schema = self.table_schema::<T>()?;
        write_with_retry(&self.batch_retry, entities, |pending| {
            let r = self
                .put_all(&schema, pending.iter().map(|e| schema.to_stored(e)).collect())
                .map(|_| Vec::new());
            async move { r }
        })
        .await
    }

    async fn batch_delete<T: Entity>(&self, entities: Vec<T>) -> Result<()> {
        let schema = self.table_schema::<T>()?;
        write_with_retry(&self.batch_retry, entities, |pending| {
            let r = self
                .remove_all(&schema, pending.iter().map(|e| schema.key_of(&schema.to_stored(e))).collect())
                .map(|_| Vec::new());
            async move { r }
        })
        .await
    }

    fn resolve_table_name(&self, base_name: &str) -> String {
        self.table_name_resolver.resolve(base_name)
    }

    fn marshalling_mode(&self) -> MarshallingMode {
        self.marshalling_mode
    }
}

#[cfg(test)]
mod test {
    mod operations {
        use crate::{memorystore, test_operations, DynamoConfig};

        test_operations!(|| async {
            memorystore::Backend::with_config(&DynamoConfig {
                page_size: Some(100),
                ..Default::default()
            })
        });
    }

    use super::*;
    use crate::{
        criteria::QueryCriteria,
        operationstest::fixtures::{counter, customer, order, Counter, Customer, Order},
        request::{FilterExpression, RequestShape},
        EntityKeySchema,
    };
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_marshalling_modes() {
        let mut c = customer("u1", "Smith", 42, "active");
        c.created_at = Utc.timestamp_millis_opt(1_500_000_000_000).single();

        let v2 = Backend::new();
        v2.save(c.clone()).await.unwrap();
        let stored = &v2.raw_items("Customer")[0];
        assert_eq!(stored["active"], Value::Bool(true));
        assert_eq!(stored["createdAt"], Value::N("1500000000000".into()));
        assert_eq!(stored["last_name"], Value::S("Smith".into()));
        assert!(!stored.contains_key("lastName"));

        let v1 = Backend::with_config(&DynamoConfig {
            marshalling_mode: MarshallingMode::SdkV1Compatible,
            ..Default::default()
        });
        v1.save(c.clone()).await.unwrap();
        let stored = &v1.raw_items("Customer")[0];
        assert_eq!(stored["active"], Value::N("1".into()));
        assert_eq!(stored["createdAt"], Value::S("2017-07-14T02:40:00.000Z".into()));
        assert_eq!(v1.load::<Customer>("u1".into(), None).await.unwrap(), Some(c));

        // condition values are marshalled the same way
        let RequestShape::Scan(scan) = QueryCriteria::new(EntityKeySchema::of::<Customer>().unwrap())
            .with_property_equals("active", true.into())
            .complete()
            .unwrap()
        else {
            panic!("expected a scan");
        };
        assert_eq!(v1.count_scan::<Customer>(&scan).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_table_name_resolution() {
        let backend = Backend::with_config(&DynamoConfig {
            table_name_prefix: Some("test_".into()),
            table_name_overrides: [("Order".to_string(), "orders".to_string())].into(),
            ..Default::default()
        });
        backend.save(customer("u1", "Smith", 42, "active")).await.unwrap();
        backend.save(order("c1", "2021-01-01", 5, "open")).await.unwrap();
        assert_eq!(backend.table_names(), vec!["orders".to_string(), "test_Customer".to_string()]);
    }

    #[tokio::test]
    async fn test_page_size_bounds_unlimited_pages() {
        let backend = Backend::with_config(&DynamoConfig {
            page_size: Some(2),
            ..Default::default()
        });
        for i in 0..5 {
            backend.save(order("c1", &format!("2021-01-0{}", i + 1), i, "open")).await.unwrap();
        }
        let request = ScanRequest::default();
        let first = backend.scan_page::<Order>(&request, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let second = backend.scan_page::<Order>(&request, first.last_evaluated_key).await.unwrap();
        assert_eq!(second.items.len(), 2);
        let third = backend.scan_page::<Order>(&request, second.last_evaluated_key).await.unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.last_evaluated_key.is_none());
    }

    #[tokio::test]
    async fn test_filter_expressions() {
        let backend = Backend::new();
        let mut noted = order("c1", "2021-01-01", 50, "open");
        noted.note = Some("gift".into());
        backend.save(noted).await.unwrap();
        backend.save(order("c1", "2021-02-01", 150, "closed")).await.unwrap();
        backend.save(order("c2", "2021-03-01", 250, "open")).await.unwrap();

        let scan = |expression: &str| ScanRequest {
            filter_expression: Some(FilterExpression {
                expression: expression.into(),
                names: [("#s".to_string(), "status".to_string())].into(),
                values: [(":open".to_string(), Value::from("open")), (":min".to_string(), Value::from(100))].into(),
            }),
            ..Default::default()
        };
        let page = backend.scan_page::<Order>(&scan("attribute_exists(note)"), None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(backend.count_scan::<Order>(&scan("#s = :open AND total > :min")).await.unwrap(), 1);
        assert_eq!(backend.count_scan::<Order>(&scan("#s = :open OR total > :min")).await.unwrap(), 3);
        assert!(matches!(
            backend.count_scan::<Order>(&scan("#s = :closed")).await,
            Err(Error::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_numeric_keys_keep_full_precision() {
        let backend = Backend::new();
        backend.save(counter(9007199254740992, 1)).await.unwrap();
        backend.save(counter(9007199254740993, 2)).await.unwrap();
        assert_eq!(backend.raw_items("Counter").len(), 2);
        assert_eq!(
            backend.load::<Counter>(9007199254740992u64.into(), None).await.unwrap(),
            Some(counter(9007199254740992, 1))
        );
        assert_eq!(
            backend.load::<Counter>(Value::N("9007199254740993.0".into()), None).await.unwrap(),
            Some(counter(9007199254740993, 2))
        );
    }

    #[test]
    fn test_evaluate() {
        let mut item = Item::new();
        item.insert("n".into(), Value::N("10".into()));
        item.insert("s".into(), Value::S("hello".into()));
        item.insert("l".into(), Value::L(vec![Value::S("a".into())]));

        let c = |attribute: &str, operator, values: Vec<Value>| Condition::new(attribute, operator, values);
        assert!(evaluate(&item, &c("n", ComparisonOperator::Eq, vec![Value::N("10.0".into())])));
        assert!(evaluate(&item, &c("n", ComparisonOperator::Between, vec![Value::N("9".into()), Value::N("10".into())])));
        assert!(!evaluate(&item, &c("n", ComparisonOperator::Gt, vec![Value::S("1".into())])));
        assert!(evaluate(&item, &c("missing", ComparisonOperator::Ne, vec![Value::S("x".into())])));
        assert!(evaluate(&item, &c("missing", ComparisonOperator::Null, vec![])));
        assert!(evaluate(&item, &c("s", ComparisonOperator::BeginsWith, vec![Value::S("he".into())])));
        assert!(evaluate(&item, &c("l", ComparisonOperator::Contains, vec![Value::S("a".into())])));
        assert!(evaluate(&item, &c("missing", ComparisonOperator::NotContains, vec![Value::S("a".into())])));
    }
}
