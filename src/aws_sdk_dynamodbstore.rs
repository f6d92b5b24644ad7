//! An [`Operations`] implementation backed by the AWS SDK's DynamoDB client.

use super::{
    batch::{write_with_retry, BatchWriteRetryConfig},
    config::{DynamoConfig, TableNameResolver, TableSynchronization},
    expression::ExpressionBuilder,
    marshalling::MarshallingMode,
    metadata::{IndexKind, ScalarType},
    operations::{Operations, ResultPage, TableSchema},
    request::{Condition, FilterExpression, KeyLookup, QueryRequest, ScanRequest},
    value::{Item, Value},
    Entity, Error, Result,
};
use aws_sdk_dynamodb::{
    client::Client,
    error::{BuildError, DisplayErrorContext, SdkError},
    operation::{delete_table::DeleteTableError, describe_table::DescribeTableError},
    primitives::Blob,
    types::{
        AttributeDefinition, AttributeValue, BillingMode, ConsumedCapacity, DeleteRequest, GlobalSecondaryIndex, KeySchemaElement, KeyType,
        LocalSecondaryIndex, Projection, ProjectionType, PutRequest, ReturnConsumedCapacity, ScalarAttributeType, Select, WriteRequest,
    },
};
use itertools::Itertools as _;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::time;
use tracing::{info, Span};

/// DynamoDB accepts at most this many requests per `BatchWriteItem` call.
const MAX_BATCH_WRITE_SIZE: usize = 25;

#[derive(Clone)]
pub struct Backend {
    pub client: Client,
    marshalling_mode: MarshallingMode,
    table_name_resolver: TableNameResolver,
    batch_retry: BatchWriteRetryConfig,
    table_synchronization: TableSynchronization,
}

impl<E, R> From<SdkError<E, R>> for Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    fn from(e: SdkError<E, R>) -> Self {
        Self::Store(Box::new(e))
    }
}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Self {
        Self::Store(Box::new(e))
    }
}

trait ResultExt {
    /// Marks the current span as failed if the result is an error.
    fn spanify_err(self) -> Self;
}

impl<T, E: std::error::Error + 'static> ResultExt for std::result::Result<T, E> {
    fn spanify_err(self) -> Self {
        if let Err(e) = &self {
            let span = Span::current();
            span.record("otel.status_code", "ERROR");
            span.record("error.msg", tracing::field::display(DisplayErrorContext(e)));
        }
        self
    }
}

/// Converts a marshalled value. Timestamps should already have been marshalled. If one slips
/// through it is written as epoch milliseconds.
fn attribute_value(v: &Value) -> AttributeValue {
    match v {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::N(n) => AttributeValue::N(n.clone()),
        Value::S(s) => AttributeValue::S(s.clone()),
        Value::B(b) => AttributeValue::B(Blob::new(b.clone())),
        Value::Timestamp(t) => AttributeValue::N(t.timestamp_millis().to_string()),
        Value::L(l) => AttributeValue::L(l.iter().map(attribute_value).collect()),
        Value::M(m) => AttributeValue::M(m.iter().map(|(k, v)| (k.clone(), attribute_value(v))).collect()),
    }
}

fn attribute_values(item: &Item) -> HashMap<String, AttributeValue> {
    item.iter().map(|(k, v)| (k.clone(), attribute_value(v))).collect()
}

/// Sets come back as lists. Set types are never written.
fn value(v: AttributeValue) -> Result<Value> {
    Ok(match v {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(b),
        AttributeValue::N(n) => Value::N(n),
        AttributeValue::S(s) => Value::S(s),
        AttributeValue::B(b) => Value::B(b.into_inner()),
        AttributeValue::L(l) => Value::L(l.into_iter().map(value).collect::<Result<_>>()?),
        AttributeValue::M(m) => Value::M(m.into_iter().map(|(k, v)| Ok((k, value(v)?))).collect::<Result<BTreeMap<_, _>>>()?),
        AttributeValue::Ss(ss) => Value::L(ss.into_iter().map(Value::S).collect()),
        AttributeValue::Ns(ns) => Value::L(ns.into_iter().map(Value::N).collect()),
        AttributeValue::Bs(bs) => Value::L(bs.into_iter().map(|b| Value::B(b.into_inner())).collect()),
        v => return Err(Error::Mapping(format!("unsupported attribute value {:?}", v))),
    })
}

fn item(attributes: HashMap<String, AttributeValue>) -> Result<Item> {
    attributes.into_iter().map(|(k, v)| Ok((k, value(v)?))).collect()
}

/// Identifies an item by its primary key, for matching unprocessed batch requests.
fn storage_key(schema: &TableSchema, key: &Item) -> String {
    std::iter::once(schema.key_schema.hash_key_attribute_name())
        .chain(schema.key_schema.range_key_attribute_name())
        .map(|attribute| key.get(attribute).map(Value::key_string).unwrap_or_default())
        .join("|")
}

/// The expressions of a single request, sharing one set of placeholders.
struct Expressions {
    key_condition: Option<String>,
    filter: Option<String>,
    projection: Option<String>,
    names: Option<HashMap<String, String>>,
    values: Option<HashMap<String, AttributeValue>>,
}

impl Expressions {
    fn new(
        schema: &TableSchema,
        key_conditions: &[Condition],
        filter_conditions: &[Condition],
        filter_expression: Option<&FilterExpression>,
        projection: Option<&str>,
    ) -> Self {
        let mut builder = ExpressionBuilder::new(filter_expression);
        let key_condition = builder.conditions(key_conditions);
        let filter = builder.filter(filter_conditions, filter_expression);
        let projection = projection.map(|p| builder.projection(p));
        let (names, values) = builder.finish();
        let values: HashMap<String, AttributeValue> = values
            .iter()
            .map(|(k, v)| (k.clone(), attribute_value(&schema.marshal(v))))
            .collect();
        Self {
            key_condition,
            filter,
            projection,
            names: Some(names).filter(|n| !n.is_empty()),
            values: Some(values).filter(|v| !v.is_empty()),
        }
    }
}

fn page_limit(limit: Option<usize>) -> Option<i32> {
    limit.map(|limit| i32::try_from(limit).unwrap_or(i32::MAX))
}

impl Backend {
    pub fn new(client: Client, config: &DynamoConfig) -> Self {
        Self {
            client,
            marshalling_mode: config.marshalling_mode,
            table_name_resolver: config.table_name_resolver(),
            batch_retry: config.batch_retry.clone(),
            table_synchronization: config.table_synchronization,
        }
    }

    /// Applies the configured [`TableSynchronization`] to the table of `T`. Call once per entity
    /// type before the store is used.
    pub async fn on_startup<T: Entity>(&self) -> Result<()> {
        let schema = self.table_schema::<T>()?;
        match self.table_synchronization {
            TableSynchronization::Validate => validate_table(&self.client, &schema).await,
            s if s.creates_on_startup() => {
                delete_table(&self.client, &schema.table_name).await?;
                create_table(&self.client, &schema).await
            }
            _ => Ok(()),
        }
    }

    pub async fn on_shutdown<T: Entity>(&self) -> Result<()> {
        if self.table_synchronization.drops_on_shutdown() {
            let schema = self.table_schema::<T>()?;
            delete_table(&self.client, &schema.table_name).await?;
        }
        Ok(())
    }

    /// Writes the entities in chunks and returns the ones DynamoDB left unprocessed.
    #[tracing::instrument(skip_all, fields(table = %schema.table_name, count = entities.len(), delete = delete, consumed_wcu, otel.status_code, error.msg, otel.span_kind = "client"))]
    async fn batch_write<T: Entity>(&self, schema: &TableSchema, entities: Vec<T>, delete: bool) -> Result<Vec<T>> {
        let span = Span::current();

        let mut unprocessed = HashSet::new();
        let mut cap = TotalConsumedCapacity::default();
        for chunk in entities.chunks(MAX_BATCH_WRITE_SIZE) {
            let mut requests = Vec::with_capacity(chunk.len());
            for entity in chunk {
                let stored = schema.to_stored(entity);
                requests.push(match delete {
                    true => WriteRequest::builder()
                        .delete_request(DeleteRequest::builder().set_key(Some(attribute_values(&schema.key_of(&stored)))).build()?)
                        .build(),
                    false => WriteRequest::builder()
                        .put_request(PutRequest::builder().set_item(Some(attribute_values(&stored))).build()?)
                        .build(),
                });
            }

            let result = self
                .client
                .batch_write_item()
                .request_items(schema.table_name.clone(), requests)
                .return_consumed_capacity(ReturnConsumedCapacity::Total)
                .send()
                .await
                .spanify_err()?;

            for c in result.consumed_capacity.iter().flatten() {
                cap.add_as_wcu(c);
            }
            for request in result.unprocessed_items.and_then(|mut u| u.remove(&schema.table_name)).unwrap_or_default() {
                let key = match (request.put_request, request.delete_request) {
                    (Some(put), _) => put.item,
                    (None, Some(delete)) => delete.key,
                    (None, None) => continue,
                };
                unprocessed.insert(storage_key(schema, &item(key)?));
            }
        }

        cap.record_to(&span);

        Ok(entities
            .into_iter()
            .filter(|e| unprocessed.contains(&storage_key(schema, &schema.to_stored(e))))
            .collect())
    }
}

#[async_trait]
impl Operations for Backend {
    #[tracing::instrument(skip_all, fields(table, consistent = ?lookup.consistent_read, consumed_rcu, otel.status_code, error.msg, otel.span_kind = "client"))]
    async fn get<T: Entity>(&self, lookup: &KeyLookup) -> Result<Option<T>> {
        let schema = self.table_schema::<T>()?;
        let span = Span::current();
        span.record("table", schema.table_name.as_str());

        let expressions = Expressions::new(&schema, &[], &[], None, lookup.projection.as_deref());
        let result = self
            .client
            .get_item()
            .table_name(schema.table_name.clone())
            .set_key(Some(attribute_values(&schema.marshalling_mode.marshal_item(&lookup.key()))))
            .set_consistent_read(lookup.consistent_read)
            .set_projection_expression(expressions.projection)
            .set_expression_attribute_names(expressions.names)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .spanify_err()?;

        record_rcu(&result.consumed_capacity, &span);

        result.item.map(|i| schema.from_stored(item(i)?)).transpose()
    }

    #[tracing::instrument(skip_all, fields(table, index = ?request.index_name, consumed_rcu, otel.status_code, error.msg, otel.span_kind = "client"))]
    async fn query_page<T: Entity>(&self, request: &QueryRequest, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>> {
        let schema = self.table_schema::<T>()?;
        let span = Span::current();
        span.record("table", schema.table_name.as_str());

        let expressions = Expressions::new(
            &schema,
            &request.key_conditions,
            &request.filter_conditions,
            request.filter_expression.as_ref(),
            request.projection.as_deref(),
        );
        let result = self
            .client
            .query()
            .table_name(schema.table_name.clone())
            .set_index_name(request.index_name.clone())
            .set_key_condition_expression(expressions.key_condition)
            .set_filter_expression(expressions.filter)
            .set_projection_expression(expressions.projection)
            .set_expression_attribute_names(expressions.names)
            .set_expression_attribute_values(expressions.values)
            .set_consistent_read(request.consistent_read)
            .scan_index_forward(request.scan_index_forward)
            .set_limit(page_limit(request.limit))
            .set_exclusive_start_key(exclusive_start_key.as_ref().map(attribute_values))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .spanify_err()?;

        record_rcu(&result.consumed_capacity, &span);

        Ok(ResultPage {
            items: result
                .items
                .unwrap_or_default()
                .into_iter()
                .map(|i| schema.from_stored(item(i)?))
                .collect::<Result<_>>()?,
            last_evaluated_key: result.last_evaluated_key.map(item).transpose()?,
        })
    }

    #[tracing::instrument(skip_all, fields(table, consumed_rcu, otel.status_code, error.msg, otel.span_kind = "client"))]
    async fn scan_page<T: Entity>(&self, request: &ScanRequest, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>> {
        let schema = self.table_schema::<T>()?;
        let span = Span::current();
        span.record("table", schema.table_name.as_str());

        let expressions = Expressions::new(
            &schema,
            &[],
            &request.filter_conditions,
            request.filter_expression.as_ref(),
            request.projection.as_deref(),
        );
        let result = self
            .client
            .scan()
            .table_name(schema.table_name.clone())
            .set_filter_expression(expressions.filter)
            .set_projection_expression(expressions.projection)
            .set_expression_attribute_names(expressions.names)
            .set_expression_attribute_values(expressions.values)
            .set_consistent_read(request.consistent_read)
            .set_limit(page_limit(request.limit))
            .set_exclusive_start_key(exclusive_start_key.as_ref().map(attribute_values))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .spanify_err()?;

        record_rcu(&result.consumed_capacity, &span);

        Ok(ResultPage {
            items: result
                .items
                .unwrap_or_default()
                .into_iter()
                .map(|i| schema.from_stored(item(i)?))
                .collect::<Result<_>>()?,
            last_evaluated_key: result.last_evaluated_key.map(item).transpose()?,
        })
    }

    #[tracing::instrument(skip_all, fields(table, index = ?request.index_name, count, consumed_rcu, otel.status_code, error.msg, otel.span_kind = "client"))]
    async fn count_query<T: Entity>(&self, request: &QueryRequest) -> Result<usize> {
        let schema = self.table_schema::<T>()?;
        let span = Span::current();
        span.record("table", schema.table_name.as_str());

        let expressions = Expressions::new(
            &schema,
            &request.key_conditions,
            &request.filter_conditions,
            request.filter_expression.as_ref(),
            None,
        );
        let mut query = self
            .client
            .query()
            .table_name(schema.table_name.clone())
            .set_index_name(request.index_name.clone())
            .set_key_condition_expression(expressions.key_condition)
            .set_filter_expression(expressions.filter)
            .set_expression_attribute_names(expressions.names)
            .set_expression_attribute_values(expressions.values)
            .set_consistent_read(request.consistent_read)
            .select(Select::Count)
            .return_consumed_capacity(ReturnConsumedCapacity::Total);

        let mut count = 0;
        let mut cap = TotalConsumedCapacity::default();
        loop {
            let result = query.clone().send().await.spanify_err()?;
            if let Some(c) = &result.consumed_capacity {
                cap.add_as_rcu(c);
            }
            count += result.count.max(0) as usize;
            match result.last_evaluated_key {
                Some(key) => query = query.set_exclusive_start_key(Some(key)),
                None => break,
            }
        }

        span.record("count", count);
        cap.record_to(&span);
        Ok(count)
    }

    #[tracing::instrument(skip_all, fields(table, count, consumed_rcu, otel.status_code, error.msg, otel.span_kind = "client"))]
    async fn count_scan<T: Entity>(&self, request: &ScanRequest) -> Result<usize> {
        let schema = self.table_schema::<T>()?;
        let span = Span::current();
        span.record("table", schema.table_name.as_str());

        let expressions = Expressions::new(&schema, &[], &request.filter_conditions, request.filter_expression.as_ref(), None);
        let mut scan = self
            .client
            .scan()
            .table_name(schema.table_name.clone())
            .set_filter_expression(expressions.filter)
            .set_expression_attribute_names(expressions.names)
            .set_expression_attribute_values(expressions.values)
            .set_consistent_read(request.consistent_read)
            .select(Select::Count)
            .return_consumed_capacity(ReturnConsumedCapacity::Total);

        let mut count = 0;
        let mut cap = TotalConsumedCapacity::default();
        loop {
            let result = scan.clone().send().await.spanify_err()?;
            if let Some(c) = &result.consumed_capacity {
                cap.add_as_rcu(c);
            }
            count += result.count.max(0) as usize;
            match result.last_evaluated_key {
                Some(key) => scan = scan.set_exclusive_start_key(Some(key)),
                None => break,
            }
        }

        span.record("count", count);
        cap.record_to(&span);
        Ok(count)
    }

    #[tracing::instrument(skip_all, fields(table, consumed_wcu, otel.status_code, error.msg, otel.span_kind = "client"))]
    async fn save<T: Entity>(&self, entity: T) -> Result<T> {
        let schema = self.table_schema::<T>()?;
        let span = Span::current();
        span.record("table", schema.table_name.as_str());

        let result = self
            .client
            .put_item()
            .table_name(schema.table_name.clone())
            .set_item(Some(attribute_values(&schema.to_stored(&entity))))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .spanify_err()?;

        record_wcu(&result.consumed_capacity, &span);

        Ok(entity)
    }

    #[tracing::instrument(skip_all, fields(table, consumed_wcu, otel.status_code, error.msg, otel.span_kind = "client"))]
    async fn delete<T: Entity>(&self, entity: T) -> Result<T> {
        let schema = self.table_schema::<T>()?;
        let span = Span::current();
        span.record("table", schema.table_name.as_str());

        let result = self
            .client
            .delete_item()
            .table_name(schema.table_name.clone())
            .set_key(Some(attribute_values(&schema.key_of(&schema.to_stored(&entity)))))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .spanify_err()?;

        record_wcu(&result.consumed_capacity, &span);

        Ok(entity)
    }

    async fn batch_save<T: Entity>(&self, entities: Vec<T>) -> Result<()> {
        let schema = self.table_schema::<T>()?;
        write_with_retry(&self.batch_retry, entities, |pending| self.batch_write(&schema, pending, false)).await
    }

    async fn batch_delete<T: Entity>(&self, entities: Vec<T>) -> Result<()> {
        let schema = self.table_schema::<T>()?;
        write_with_retry(&self.batch_retry, entities, |pending| self.batch_write(&schema, pending, true)).await
    }

    fn resolve_table_name(&self, base_name: &str) -> String {
        self.table_name_resolver.resolve(base_name)
    }

    fn marshalling_mode(&self) -> MarshallingMode {
        self.marshalling_mode
    }
}

fn scalar_attribute_type(schema: &TableSchema, property: &str) -> ScalarAttributeType {
    match schema.key_schema.scalar_type(property) {
        ScalarType::S => ScalarAttributeType::S,
        ScalarType::N => ScalarAttributeType::N,
        ScalarType::B => ScalarAttributeType::B,
        ScalarType::Timestamp => match schema.marshalling_mode {
            MarshallingMode::SdkV2Compatible => ScalarAttributeType::N,
            MarshallingMode::SdkV1Compatible => ScalarAttributeType::S,
        },
    }
}

fn key_schema_elements(schema: &TableSchema, hash_key_property: &str, range_key_property: Option<&str>) -> Result<Vec<KeySchemaElement>> {
    let key_schema = &schema.key_schema;
    let mut ret = vec![KeySchemaElement::builder()
        .attribute_name(key_schema.attribute_name(hash_key_property))
        .key_type(KeyType::Hash)
        .build()?];
    if let Some(range_key_property) = range_key_property {
        ret.push(
            KeySchemaElement::builder()
                .attribute_name(key_schema.attribute_name(range_key_property))
                .key_type(KeyType::Range)
                .build()?,
        );
    }
    Ok(ret)
}

/// Creates the table of an entity type, with every declared secondary index projecting all
/// attributes.
pub async fn create_table(client: &Client, schema: &TableSchema) -> Result<()> {
    let key_schema = &schema.key_schema;

    let mut key_properties = vec![key_schema.hash_key_property_name()];
    key_properties.extend(key_schema.range_key_property_name());
    for index in key_schema.indexes() {
        key_properties.push(&index.hash_key_property);
        key_properties.extend(index.range_key_property.as_deref());
    }
    let attribute_definitions = key_properties
        .into_iter()
        .unique()
        .map(|p| {
            AttributeDefinition::builder()
                .attribute_name(key_schema.attribute_name(p))
                .attribute_type(scalar_attribute_type(schema, p))
                .build()
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut global_indexes = vec![];
    let mut local_indexes = vec![];
    for index in key_schema.indexes() {
        let elements = key_schema_elements(schema, &index.hash_key_property, index.range_key_property.as_deref())?;
        let projection = Projection::builder().projection_type(ProjectionType::All).build();
        match index.kind {
            IndexKind::Global => global_indexes.push(
                GlobalSecondaryIndex::builder()
                    .index_name(index.name.clone())
                    .set_key_schema(Some(elements))
                    .projection(projection)
                    .build()?,
            ),
            IndexKind::Local => local_indexes.push(
                LocalSecondaryIndex::builder()
                    .index_name(index.name.clone())
                    .set_key_schema(Some(elements))
                    .projection(projection)
                    .build()?,
            ),
        }
    }

    info!(table = %schema.table_name, "creating table");
    client
        .create_table()
        .table_name(schema.table_name.clone())
        .set_attribute_definitions(Some(attribute_definitions))
        .set_key_schema(Some(key_schema_elements(
            schema,
            key_schema.hash_key_property_name(),
            key_schema.range_key_property_name(),
        )?))
        .set_global_secondary_indexes(Some(global_indexes).filter(|i| !i.is_empty()))
        .set_local_secondary_indexes(Some(local_indexes).filter(|i| !i.is_empty()))
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await?;
    Ok(())
}

/// Deletes a table if it exists and waits briefly for the deletion to complete.
pub async fn delete_table(client: &Client, table_name: &str) -> Result<()> {
    match client.delete_table().table_name(table_name).send().await.map_err(|e| e.into_service_error()) {
        Ok(_) => {}
        Err(DeleteTableError::ResourceNotFoundException(_)) => return Ok(()),
        Err(e) => return Err(Error::Store(Box::new(e))),
    }
    info!(table = table_name, "deleted table");
    for _ in 0..10u32 {
        match client.describe_table().table_name(table_name).send().await.map_err(|e| e.into_service_error()) {
            Err(DescribeTableError::ResourceNotFoundException(_)) => break,
            _ => time::sleep(time::Duration::from_millis(200)).await,
        }
    }
    Ok(())
}

/// Checks that the table exists with the expected primary key and secondary indexes.
pub async fn validate_table(client: &Client, schema: &TableSchema) -> Result<()> {
    let output = match client.describe_table().table_name(schema.table_name.clone()).send().await {
        Ok(output) => output,
        Err(e) => {
            return Err(match e.into_service_error() {
                DescribeTableError::ResourceNotFoundException(_) => {
                    Error::Configuration(format!("table {} does not exist", schema.table_name))
                }
                e => Error::Store(Box::new(e)),
            })
        }
    };
    let Some(table) = output.table() else {
        return Err(Error::Configuration(format!("table {} does not exist", schema.table_name)));
    };

    let key_attribute = |key_type: KeyType| {
        table
            .key_schema()
            .iter()
            .find(|k| *k.key_type() == key_type)
            .map(|k| k.attribute_name())
    };
    let expected_hash_key = schema.key_schema.hash_key_attribute_name();
    let expected_range_key = schema.key_schema.range_key_attribute_name();
    if key_attribute(KeyType::Hash) != Some(expected_hash_key) || key_attribute(KeyType::Range) != expected_range_key {
        return Err(Error::Configuration(format!(
            "table {} does not have the key schema ({}, {:?})",
            schema.table_name, expected_hash_key, expected_range_key
        )));
    }

    for index in schema.key_schema.indexes() {
        let exists = match index.kind {
            IndexKind::Global => table
                .global_secondary_indexes()
                .iter()
                .any(|i| i.index_name() == Some(index.name.as_str())),
            IndexKind::Local => table
                .local_secondary_indexes()
                .iter()
                .any(|i| i.index_name() == Some(index.name.as_str())),
        };
        if !exists {
            return Err(Error::Configuration(format!(
                "table {} is missing the secondary index {}",
                schema.table_name, index.name
            )));
        }
    }
    Ok(())
}

/// Tracks total consumed capacity by repeated/batch operations.
#[derive(Default)]
struct TotalConsumedCapacity {
    total_rcu: Option<f64>,
    total_wcu: Option<f64>,
}

impl TotalConsumedCapacity {
    fn add_as_rcu(&mut self, c: &ConsumedCapacity) {
        if let Some(rcu) = c.capacity_units {
            *self.total_rcu.get_or_insert(0.) += rcu;
        }
    }

    fn add_as_wcu(&mut self, c: &ConsumedCapacity) {
        if let Some(wcu) = c.capacity_units {
            *self.total_wcu.get_or_insert(0.) += wcu;
        }
    }

    /// Records to the given span, which must already have empty `consumed_rcu` or `consumed_wcu`
    /// attributes or recording those will do nothing.
    fn record_to(&self, span: &Span) {
        if let Some(rcu) = self.total_rcu {
            span.record("consumed_rcu", rcu);
        }
        if let Some(wcu) = self.total_wcu {
            span.record("consumed_wcu", wcu);
        }
    }
}

fn record_wcu(capacity: &Option<ConsumedCapacity>, span: &Span) {
    if let Some(wcu) = capacity.as_ref().and_then(|c| c.capacity_units) {
        span.record("consumed_wcu", wcu);
    }
}

fn record_rcu(capacity: &Option<ConsumedCapacity>, span: &Span) {
    if let Some(rcu) = capacity.as_ref().and_then(|c| c.capacity_units) {
        span.record("consumed_rcu", rcu);
    }
}
