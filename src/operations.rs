use super::{
    marshalling::MarshallingMode,
    metadata::EntityKeySchema,
    request::{Condition, KeyLookup, QueryRequest, ScanRequest},
    value::{Item, Value},
    Entity, Error, Result,
};
use std::sync::Arc;

/// One page of a query or scan.
#[derive(Clone, Debug)]
pub struct ResultPage<T> {
    pub items: Vec<T>,
    /// Present when more items may follow. Pass it back to fetch the next page.
    pub last_evaluated_key: Option<Item>,
}

/// Everything an Operations implementation needs to store a domain type.
#[derive(Clone, Debug)]
pub struct TableSchema {
    pub table_name: String,
    pub marshalling_mode: MarshallingMode,
    pub key_schema: Arc<EntityKeySchema>,
}

impl TableSchema {
    /// Converts an entity into the item that is actually written: attribute names, marshalled
    /// values, no null attributes.
    pub fn to_stored<T: Entity>(&self, entity: &T) -> Item {
        self.marshalling_mode.marshal_item(&self.key_schema.to_attributes(entity.to_item()))
    }

    pub fn from_stored<T: Entity>(&self, item: Item) -> Result<T> {
        T::from_item(&self.key_schema.to_properties(item))
    }

    pub fn key_of(&self, stored: &Item) -> Item {
        self.key_schema.primary_key(stored)
    }

    pub fn marshal(&self, v: &Value) -> Value {
        self.marshalling_mode.marshal(v)
    }

    pub fn marshal_conditions(&self, conditions: &[Condition]) -> Vec<Condition> {
        conditions
            .iter()
            .map(|c| Condition::new(c.attribute.clone(), c.operator, c.values.iter().map(|v| self.marshal(v)).collect()))
            .collect()
    }

    /// Builds the lookup for a primary key. The range key must be given exactly when the table
    /// has one.
    pub fn lookup(&self, hash_key: Value, range_key: Option<Value>) -> Result<KeyLookup> {
        let range_key = match (self.key_schema.range_key_attribute_name(), range_key) {
            (Some(attribute), Some(v)) => Some((attribute.to_string(), v)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(Error::InvalidQuery(format!("{} needs a sort key value", self.table_name)));
            }
            (None, Some(_)) => {
                return Err(Error::InvalidQuery(format!("{} has no sort key", self.table_name)));
            }
        };
        Ok(KeyLookup {
            hash_key: (self.key_schema.hash_key_attribute_name().to_string(), hash_key),
            range_key,
            consistent_read: None,
            projection: None,
        })
    }
}

/// The store-facing port. Requests carry attribute names and unmarshalled values; implementations
/// marshal with [`Operations::marshalling_mode`].
#[async_trait]
pub trait Operations: Send + Sync {
    async fn get<T: Entity>(&self, lookup: &KeyLookup) -> Result<Option<T>>;

    async fn load<T: Entity>(&self, hash_key: Value, range_key: Option<Value>) -> Result<Option<T>> {
        let lookup = self.table_schema::<T>()?.lookup(hash_key, range_key)?;
        self.get(&lookup).await
    }

    async fn query_page<T: Entity>(&self, request: &QueryRequest, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>>;

    async fn scan_page<T: Entity>(&self, request: &ScanRequest, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>>;

    /// Counts every matching item. The request's limit is ignored.
    async fn count_query<T: Entity>(&self, request: &QueryRequest) -> Result<usize>;

    /// Counts every matching item. The request's limit is ignored.
    async fn count_scan<T: Entity>(&self, request: &ScanRequest) -> Result<usize>;

    async fn save<T: Entity>(&self, entity: T) -> Result<T>;

    async fn delete<T: Entity>(&self, entity: T) -> Result<T>;

    /// Fails with [`Error::BatchWrite`] if items remain unprocessed after retrying.
    async fn batch_save<T: Entity>(&self, entities: Vec<T>) -> Result<()>;

    async fn batch_delete<T: Entity>(&self, entities: Vec<T>) -> Result<()>;

    fn resolve_table_name(&self, base_name: &str) -> String;

    fn marshalling_mode(&self) -> MarshallingMode;

    fn table_schema<T: Entity>(&self) -> Result<TableSchema> {
        let key_schema = EntityKeySchema::of::<T>()?;
        Ok(TableSchema {
            table_name: self.resolve_table_name(key_schema.table_name()),
            marshalling_mode: self.marshalling_mode(),
            key_schema,
        })
    }
}
