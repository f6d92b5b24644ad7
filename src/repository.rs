//! CRUD repositories and derived query methods.
//!
//! A [`QueryMethod`] is validated once, when it is registered with [`Repository::query_method`].
//! Every invocation of the resulting [`DerivedQuery`] binds its arguments into a fresh
//! [`QueryCriteria`].

use super::{
    criteria::QueryCriteria,
    metadata::EntityKeySchema,
    operations::Operations,
    paging::{Page, Pageable, Slice, Sort},
    parser::{parse_annotation, Binding, PartTree, QueryAnnotation, QueryOptions, Subject, TermOperator},
    query::{count_query, entity_query, MultipleEntityScanQuery, Query},
    request::{ComparisonOperator, RequestShape, ScanRequest},
    value::Value,
    Entity, Error, Result,
};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Hooks invoked by a repository around the operations it performs. Every hook defaults to doing
/// nothing. Listeners run in registration order.
pub trait EntityListener<T>: Send + Sync {
    fn before_save(&self, _entity: &mut T) {}

    fn after_save(&self, _entity: &T) {}

    fn before_delete(&self, _entity: &T) {}

    fn after_delete(&self, _entity: &T) {}

    fn after_load(&self, _entity: &T) {}

    fn after_query(&self, _entities: &[T]) {}

    fn after_scan(&self, _entities: &[T]) {}
}

struct Listeners<T>(Vec<Arc<dyn EntityListener<T>>>);

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Listeners<T> {
    fn before_save(&self, entity: &mut T) {
        self.0.iter().for_each(|l| l.before_save(entity));
    }

    fn after_save(&self, entity: &T) {
        self.0.iter().for_each(|l| l.after_save(entity));
    }

    fn before_delete(&self, entity: &T) {
        self.0.iter().for_each(|l| l.before_delete(entity));
    }

    fn after_delete(&self, entity: &T) {
        self.0.iter().for_each(|l| l.after_delete(entity));
    }

    fn after_read(&self, shape: &RequestShape, entities: &[T]) {
        for l in &self.0 {
            match shape {
                RequestShape::Get(_) => entities.iter().for_each(|e| l.after_load(e)),
                RequestShape::Query(_) => l.after_query(entities),
                RequestShape::Scan(_) => l.after_scan(entities),
                RequestShape::Static => {}
            }
        }
    }
}

pub struct Repository<T, O> {
    ops: Arc<O>,
    schema: Arc<EntityKeySchema>,
    scan_enabled: bool,
    scan_count_enabled: bool,
    listeners: Listeners<T>,
}

impl<T: Entity, O: Operations + 'static> Repository<T, O> {
    /// Fails with [`Error::Configuration`] if `T` declares an invalid key schema.
    pub fn new(ops: Arc<O>) -> Result<Self> {
        Ok(Self {
            ops,
            schema: EntityKeySchema::of::<T>()?,
            scan_enabled: false,
            scan_count_enabled: false,
            listeners: Listeners(vec![]),
        })
    }

    /// Allows operations that need a full table scan, for this repository and its query methods.
    pub fn enable_scan(mut self) -> Self {
        self.scan_enabled = true;
        self
    }

    pub fn enable_scan_count(mut self) -> Self {
        self.scan_count_enabled = true;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn EntityListener<T>>) -> Self {
        self.listeners.0.push(listener);
        self
    }

    pub fn schema(&self) -> &EntityKeySchema {
        &self.schema
    }

    pub async fn save(&self, mut entity: T) -> Result<T> {
        self.listeners.before_save(&mut entity);
        let saved = self.ops.save(entity).await?;
        self.listeners.after_save(&saved);
        Ok(saved)
    }

    /// Saves with batch writes. Entities still unprocessed after retrying are reported through
    /// [`Error::BatchWrite`].
    pub async fn save_all(&self, mut entities: Vec<T>) -> Result<Vec<T>> {
        entities.iter_mut().for_each(|e| self.listeners.before_save(e));
        self.ops.batch_save(entities.clone()).await?;
        entities.iter().for_each(|e| self.listeners.after_save(e));
        Ok(entities)
    }

    pub async fn find_by_id(&self, hash_key: Value, range_key: Option<Value>) -> Result<Option<T>> {
        let found = self.ops.load::<T>(hash_key, range_key).await?;
        if let Some(entity) = &found {
            self.listeners.0.iter().for_each(|l| l.after_load(entity));
        }
        Ok(found)
    }

    pub async fn exists_by_id(&self, hash_key: Value, range_key: Option<Value>) -> Result<bool> {
        Ok(self.ops.load::<T>(hash_key, range_key).await?.is_some())
    }

    fn scan_shape(&self, limit: Option<usize>) -> RequestShape {
        RequestShape::Scan(ScanRequest {
            limit,
            ..Default::default()
        })
    }

    pub async fn find_all(&self) -> Result<Vec<T>> {
        let entities = MultipleEntityScanQuery::<T, O>::new(self.ops.clone(), ScanRequest::default(), self.scan_enabled)
            .get_result_list()
            .await?;
        self.listeners.0.iter().for_each(|l| l.after_scan(&entities));
        Ok(entities)
    }

    /// Scans for one page of entities. Needs both scans and scan counts enabled. Scans are
    /// unordered, so the pageable must not carry a sort.
    pub async fn find_all_paged(&self, pageable: &Pageable) -> Result<Page<T>> {
        if !pageable.sort.is_unsorted() {
            return Err(Error::InvalidQuery(format!("{} cannot be sorted without a partition key", self.schema.table_name())));
        }
        let shape = self.scan_shape(Some(pageable.offset() + pageable.size));
        let entities = entity_query::<T, O>(self.ops.clone(), shape.clone(), self.scan_enabled)
            .get_result_list()
            .await?;
        let total = self.count().await?;
        let content: Vec<T> = entities.into_iter().skip(pageable.offset()).take(pageable.size).collect();
        self.listeners.after_read(&shape, &content);
        Ok(Page {
            content,
            pageable: pageable.clone(),
            total,
        })
    }

    pub async fn count(&self) -> Result<usize> {
        let total = count_query::<T, O>(self.ops.clone(), self.scan_shape(None), self.scan_count_enabled, false)
            .get_single_result()
            .await?;
        Ok(total.unwrap_or(0))
    }

    pub async fn delete(&self, entity: T) -> Result<T> {
        self.listeners.before_delete(&entity);
        let deleted = self.ops.delete(entity).await?;
        self.listeners.after_delete(&deleted);
        Ok(deleted)
    }

    /// Loads and deletes the entity with the given key. Fails with [`Error::IncorrectResultSize`]
    /// if there is none.
    pub async fn delete_by_id(&self, hash_key: Value, range_key: Option<Value>) -> Result<T> {
        match self.ops.load::<T>(hash_key, range_key).await? {
            Some(entity) => self.delete(entity).await,
            None => Err(Error::IncorrectResultSize { expected: 1, actual: 0 }),
        }
    }

    pub async fn delete_all(&self, entities: Vec<T>) -> Result<()> {
        entities.iter().for_each(|e| self.listeners.before_delete(e));
        self.ops.batch_delete(entities.clone()).await?;
        entities.iter().for_each(|e| self.listeners.after_delete(e));
        Ok(())
    }

    /// Validates and registers a derived query method.
    pub fn query_method(&self, method: QueryMethod) -> Result<DerivedQuery<T, O>> {
        let tree = PartTree::parse(&method.name, &self.schema)?;
        let options = parse_annotation(method.annotation.as_ref(), &method.parameter_names)
            .map_err(|e| match e {
                Error::Configuration(msg) => Error::Configuration(format!("{}: {}", method.name, msg)),
                e => e,
            })?;
        if let Some(index_name) = &options.index_name {
            let Some(index) = self.schema.index(index_name) else {
                return Err(Error::Configuration(format!(
                    "{}: {} has no index {}",
                    method.name,
                    self.schema.table_name(),
                    index_name
                )));
            };
            let binds_partition_key = tree.terms.iter().any(|t| {
                t.property == index.hash_key_property && matches!(t.operator, TermOperator::Equals | TermOperator::In)
            });
            if !tree.terms.is_empty() && !binds_partition_key {
                return Err(Error::Configuration(format!(
                    "{}: index {} needs an equality condition on {}",
                    method.name, index_name, index.hash_key_property
                )));
            }
        }
        if !method.parameter_names.is_empty() && method.parameter_names.len() < tree.parameter_count() {
            return Err(Error::Configuration(format!(
                "{}: {} parameter names declared, but the method takes at least {} arguments",
                method.name,
                method.parameter_names.len(),
                tree.parameter_count()
            )));
        }

        debug!(
            table = self.schema.table_name(),
            method = method.name.as_str(),
            terms = tree.terms.len(),
            "registered query method"
        );

        Ok(DerivedQuery {
            ops: self.ops.clone(),
            schema: self.schema.clone(),
            name: method.name,
            tree,
            options,
            scan_enabled: self.scan_enabled || method.scan_enabled,
            scan_count_enabled: self.scan_count_enabled || method.scan_count_enabled,
            listeners: self.listeners.clone(),
        })
    }
}

/// The declaration of a derived query method: its name, the names of its parameters and an
/// optional annotation.
#[derive(Clone, Debug)]
pub struct QueryMethod {
    name: String,
    parameter_names: Vec<String>,
    annotation: Option<QueryAnnotation>,
    scan_enabled: bool,
    scan_count_enabled: bool,
}

impl QueryMethod {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            parameter_names: vec![],
            annotation: None,
            scan_enabled: false,
            scan_count_enabled: false,
        }
    }

    /// Names of the method's parameters, in argument order. Annotations refer to arguments by
    /// these names.
    pub fn with_parameter_names<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        self.parameter_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_annotation(mut self, annotation: QueryAnnotation) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn enable_scan(mut self) -> Self {
        self.scan_enabled = true;
        self
    }

    pub fn enable_scan_count(mut self) -> Self {
        self.scan_count_enabled = true;
        self
    }
}

/// The arguments of one query method invocation.
#[derive(Clone, Debug, Default)]
pub struct QueryArgs {
    values: Vec<Value>,
    sort: Sort,
    pageable: Option<Pageable>,
}

impl QueryArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next positional argument. `In` conditions take a [`Value::L`].
    pub fn arg<V: Into<Value>>(mut self, v: V) -> Self {
        self.values.push(v.into());
        self
    }

    /// A dynamic sort, applied after the method name's `OrderBy` clause.
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn pageable(mut self, pageable: Pageable) -> Self {
        self.pageable = Some(pageable);
        self
    }
}

#[derive(Clone, Debug)]
pub enum QueryResult<T> {
    Entities(Vec<T>),
    Page(Page<T>),
    Count(usize),
    Exists(bool),
    Deleted(Vec<T>),
}

pub struct DerivedQuery<T, O> {
    ops: Arc<O>,
    schema: Arc<EntityKeySchema>,
    name: String,
    tree: PartTree,
    options: QueryOptions,
    scan_enabled: bool,
    scan_count_enabled: bool,
    listeners: Listeners<T>,
}

fn next_arg<'a>(name: &str, property: &str, args: &mut impl Iterator<Item = &'a Value>) -> Result<Value> {
    args.next()
        .cloned()
        .ok_or_else(|| Error::InvalidQuery(format!("{}: missing argument for {}", name, property)))
}

impl<T: Entity, O: Operations + 'static> DerivedQuery<T, O> {
    pub fn subject(&self) -> Subject {
        self.tree.subject
    }

    fn argument(&self, args: &QueryArgs, i: usize) -> Result<Value> {
        args.values
            .get(i)
            .cloned()
            .ok_or_else(|| Error::InvalidQuery(format!("{}: missing argument {}", self.name, i)))
    }

    fn limit(&self) -> Option<usize> {
        match (self.options.limit, self.tree.max_results) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn criteria(&self, args: &QueryArgs, sort: Sort) -> Result<QueryCriteria> {
        let mut values = args.values.iter();
        let mut c = QueryCriteria::new(self.schema.clone());
        for term in &self.tree.terms {
            let p = term.property.as_str();
            let single = |c: QueryCriteria, op: ComparisonOperator, v: Value| c.with_single_value_criteria(p, op, v);
            c = match term.operator {
                TermOperator::Equals => c.with_property_equals(p, next_arg(&self.name, p, &mut values)?),
                TermOperator::NotEquals => single(c, ComparisonOperator::Ne, next_arg(&self.name, p, &mut values)?),
                TermOperator::In => match next_arg(&self.name, p, &mut values)? {
                    Value::L(list) => c.with_property_in(p, list),
                    v => c.with_property_in(p, vec![v]),
                },
                TermOperator::Between => {
                    let low = next_arg(&self.name, p, &mut values)?;
                    let high = next_arg(&self.name, p, &mut values)?;
                    c.with_property_between(p, low, high)
                }
                TermOperator::IsNull => c.with_no_valued_criteria(p, ComparisonOperator::Null),
                TermOperator::IsNotNull => c.with_no_valued_criteria(p, ComparisonOperator::NotNull),
                TermOperator::GreaterThan | TermOperator::After => {
                    single(c, ComparisonOperator::Gt, next_arg(&self.name, p, &mut values)?)
                }
                TermOperator::GreaterThanEqual => single(c, ComparisonOperator::Ge, next_arg(&self.name, p, &mut values)?),
                TermOperator::LessThan | TermOperator::Before => {
                    single(c, ComparisonOperator::Lt, next_arg(&self.name, p, &mut values)?)
                }
                TermOperator::LessThanEqual => single(c, ComparisonOperator::Le, next_arg(&self.name, p, &mut values)?),
                TermOperator::StartingWith => single(c, ComparisonOperator::BeginsWith, next_arg(&self.name, p, &mut values)?),
                TermOperator::Containing => single(c, ComparisonOperator::Contains, next_arg(&self.name, p, &mut values)?),
                TermOperator::NotContaining => {
                    single(c, ComparisonOperator::NotContains, next_arg(&self.name, p, &mut values)?)
                }
                TermOperator::True => c.with_property_equals(p, Value::Bool(true)),
                TermOperator::False => c.with_property_equals(p, Value::Bool(false)),
            };
        }

        let mut names = HashMap::new();
        for (key, binding) in &self.options.names {
            let name = match binding {
                Binding::Literal(v) => v.clone(),
                Binding::Parameter(i) => self.argument(args, *i)?,
            };
            match name {
                Value::S(name) => names.insert(key.clone(), name),
                other => {
                    return Err(Error::InvalidQuery(format!(
                        "{}: expression attribute name {} must be a string, got {:?}",
                        self.name, key, other
                    )))
                }
            };
        }
        let mut attribute_values = HashMap::new();
        for (key, binding) in &self.options.values {
            let v = match binding {
                Binding::Literal(v) => v.clone(),
                Binding::Parameter(i) => self.argument(args, *i)?,
            };
            attribute_values.insert(key.clone(), v);
        }

        Ok(c.with_sort(sort)
            .with_projection(self.options.projection.clone())
            .with_limit(self.limit())
            .with_consistent_reads(self.options.consistent_reads)
            .with_filter_expression(self.options.filter_expression.clone())
            .with_expression_attribute_names(names)
            .with_expression_attribute_values(attribute_values)
            .with_index_name(self.options.index_name.clone()))
    }

    fn sort(&self, args: &QueryArgs) -> Sort {
        let mut sort = self.tree.sort.clone().and(args.sort.clone());
        if let Some(pageable) = &args.pageable {
            sort = sort.and(pageable.sort.clone());
        }
        sort
    }

    fn shape(&self, args: &QueryArgs) -> Result<RequestShape> {
        self.criteria(args, self.sort(args))?.complete()
    }

    /// Runs the query the way its subject asks for. Finders given a pageable return a page.
    pub async fn execute(&self, args: QueryArgs) -> Result<QueryResult<T>> {
        Ok(match self.tree.subject {
            Subject::Count => QueryResult::Count(self.count(args).await?),
            Subject::Exists => QueryResult::Exists(self.exists(args).await?),
            Subject::Delete => QueryResult::Deleted(self.delete(args).await?),
            Subject::Find => match args.pageable.clone() {
                Some(pageable) => QueryResult::Page(self.find_page(args, pageable).await?),
                None => QueryResult::Entities(self.find(args).await?),
            },
        })
    }

    async fn results(&self, shape: RequestShape) -> Result<Vec<T>> {
        let mut entities = entity_query::<T, O>(self.ops.clone(), shape.clone(), self.scan_enabled)
            .get_result_list()
            .await?;
        if let Some(max) = self.tree.max_results {
            entities.truncate(max);
        }
        self.listeners.after_read(&shape, &entities);
        Ok(entities)
    }

    pub async fn find(&self, args: QueryArgs) -> Result<Vec<T>> {
        self.results(self.shape(&args)?).await
    }

    /// Fails with [`Error::IncorrectResultSize`] if more than one entity matches.
    pub async fn find_one(&self, args: QueryArgs) -> Result<Option<T>> {
        let shape = self.shape(&args)?;
        let found = entity_query::<T, O>(self.ops.clone(), shape.clone(), self.scan_enabled)
            .get_single_result()
            .await?;
        if let Some(entity) = &found {
            self.listeners.after_read(&shape, std::slice::from_ref(entity));
        }
        Ok(found)
    }

    /// Skips to the page's offset in the full result and counts the matches for the total.
    pub async fn find_page(&self, args: QueryArgs, pageable: Pageable) -> Result<Page<T>> {
        let args = args.pageable(pageable.clone());
        let shape = self.shape(&args)?;
        let entities = entity_query::<T, O>(self.ops.clone(), shape.clone(), self.scan_enabled)
            .get_result_list()
            .await?;
        let content: Vec<T> = entities.into_iter().skip(pageable.offset()).take(pageable.size).collect();
        let mut total = count_query::<T, O>(self.ops.clone(), shape.clone(), self.scan_count_enabled, true)
            .get_single_result()
            .await?
            .unwrap_or(0);
        if let Some(max) = self.tree.max_results {
            total = total.min(max);
        }
        self.listeners.after_read(&shape, &content);
        Ok(Page { content, pageable, total })
    }

    /// Reads one entity past the page to learn whether another page follows, without counting.
    pub async fn find_slice(&self, args: QueryArgs, pageable: Pageable) -> Result<Slice<T>> {
        let args = args.pageable(pageable.clone());
        let shape = self.shape(&args)?;
        let entities = entity_query::<T, O>(self.ops.clone(), shape.clone(), self.scan_enabled)
            .get_result_list()
            .await?;
        let mut content: Vec<T> = entities.into_iter().skip(pageable.offset()).take(pageable.size + 1).collect();
        let has_next = content.len() > pageable.size;
        content.truncate(pageable.size);
        self.listeners.after_read(&shape, &content);
        Ok(Slice {
            content,
            pageable,
            has_next,
        })
    }

    pub async fn count(&self, args: QueryArgs) -> Result<usize> {
        let count = count_query::<T, O>(self.ops.clone(), self.shape(&args)?, self.scan_count_enabled, false)
            .get_single_result()
            .await?
            .unwrap_or(0);
        Ok(match self.tree.max_results {
            Some(max) => count.min(max),
            None => count,
        })
    }

    pub async fn exists(&self, args: QueryArgs) -> Result<bool> {
        Ok(self.count(args).await? > 0)
    }

    /// Finds the matching entities and batch deletes them, returning what was deleted.
    pub async fn delete(&self, args: QueryArgs) -> Result<Vec<T>> {
        let entities = self.find(args).await?;
        entities.iter().for_each(|e| self.listeners.before_delete(e));
        self.ops.batch_delete(entities.clone()).await?;
        entities.iter().for_each(|e| self.listeners.after_delete(e));
        Ok(entities)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        memorystore::Backend,
        operationstest::fixtures::{customer, order, Customer, Order},
        paging::Order as SortOrder,
        parser::{ConsistentReadMode, ExpressionAttribute},
    };
    use parking_lot::Mutex;

    async fn orders() -> Repository<Order, Backend> {
        let repo = Repository::new(Arc::new(Backend::new())).unwrap();
        for (date, total, status) in [
            ("2021-01-01", 50, "open"),
            ("2021-02-01", 150, "closed"),
            ("2021-03-01", 250, "open"),
            ("2021-04-01", 100, "closed"),
            ("2021-05-01", 300, "open"),
        ] {
            repo.save(order("c1", date, total, status)).await.unwrap();
        }
        repo.save(order("c2", "2021-01-15", 75, "open")).await.unwrap();
        repo
    }

    async fn customers() -> Repository<Customer, Backend> {
        let repo = Repository::new(Arc::new(Backend::new())).unwrap();
        for c in [
            customer("u1", "Smith", 42, "active"),
            customer("u2", "Jones", 30, "active"),
            customer("u3", "Smith", 25, "inactive"),
        ] {
            repo.save(c).await.unwrap();
        }
        repo
    }

    fn dates(orders: &[Order]) -> Vec<&str> {
        orders.iter().map(|o| o.order_date.as_str()).collect()
    }

    #[tokio::test]
    async fn test_crud() {
        let repo = orders().await;

        let found = repo.find_by_id("c1".into(), Some("2021-03-01".into())).await.unwrap();
        assert_eq!(found.map(|o| o.total), Some(250));
        assert!(repo.exists_by_id("c2".into(), Some("2021-01-15".into())).await.unwrap());
        assert!(!repo.exists_by_id("c2".into(), Some("2021-01-16".into())).await.unwrap());

        let deleted = repo.delete_by_id("c2".into(), Some("2021-01-15".into())).await.unwrap();
        assert_eq!(deleted.total, 75);
        assert!(matches!(
            repo.delete_by_id("c2".into(), Some("2021-01-15".into())).await,
            Err(Error::IncorrectResultSize { expected: 1, actual: 0 })
        ));
    }

    #[tokio::test]
    async fn test_scan_permissions() {
        let repo = orders().await;
        assert!(matches!(repo.find_all().await, Err(Error::ScanNotEnabled(_))));
        assert!(matches!(repo.count().await, Err(Error::ScanNotEnabled(_))));

        let repo = Repository::<Order, _>::new(repo.ops.clone()).unwrap().enable_scan();
        assert_eq!(repo.find_all().await.unwrap().len(), 6);
        assert!(matches!(repo.count().await, Err(Error::ScanNotEnabled(_))));

        let repo = repo.enable_scan_count();
        assert_eq!(repo.count().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_find_all_paged() {
        let repo = orders().await.enable_scan().enable_scan_count();
        let page = repo.find_all_paged(&Pageable::of(1, 4)).await.unwrap();
        assert_eq!(page.content.len(), 2);
        assert_eq!(page.total, 6);
        assert!(!page.has_next());

        let sorted = Pageable::of(0, 4).with_sort(SortOrder::asc("total"));
        assert!(matches!(repo.find_all_paged(&sorted).await, Err(Error::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_save_all_and_delete_all() {
        let repo = Repository::<Order, _>::new(Arc::new(Backend::new())).unwrap().enable_scan_count();
        let batch: Vec<Order> = (0..40).map(|i| order("c9", &format!("d{:02}", i), i, "open")).collect();
        assert_eq!(repo.save_all(batch.clone()).await.unwrap().len(), 40);
        assert_eq!(repo.count().await.unwrap(), 40);
        repo.delete_all(batch).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EntityListener<Order> for Recorder {
        fn before_save(&self, entity: &mut Order) {
            entity.note.get_or_insert_with(|| "stamped".to_string());
            self.events.lock().push(format!("before_save {}", entity.order_date));
        }

        fn after_save(&self, entity: &Order) {
            self.events.lock().push(format!("after_save {}", entity.order_date));
        }

        fn before_delete(&self, entity: &Order) {
            self.events.lock().push(format!("before_delete {}", entity.order_date));
        }

        fn after_delete(&self, entity: &Order) {
            self.events.lock().push(format!("after_delete {}", entity.order_date));
        }

        fn after_load(&self, entity: &Order) {
            self.events.lock().push(format!("after_load {}", entity.order_date));
        }

        fn after_query(&self, entities: &[Order]) {
            self.events.lock().push(format!("after_query {}", entities.len()));
        }

        fn after_scan(&self, entities: &[Order]) {
            self.events.lock().push(format!("after_scan {}", entities.len()));
        }
    }

    #[tokio::test]
    async fn test_listeners() {
        let recorder = Arc::new(Recorder::default());
        let repo = Repository::<Order, _>::new(Arc::new(Backend::new()))
            .unwrap()
            .enable_scan()
            .with_listener(recorder.clone());

        let saved = repo.save(order("c1", "2021-01-01", 5, "open")).await.unwrap();
        assert_eq!(saved.note.as_deref(), Some("stamped"));
        let loaded = repo.find_by_id("c1".into(), Some("2021-01-01".into())).await.unwrap().unwrap();
        assert_eq!(loaded.note.as_deref(), Some("stamped"));

        repo.query_method(QueryMethod::new("findByCustomerId"))
            .unwrap()
            .find(QueryArgs::new().arg("c1"))
            .await
            .unwrap();
        repo.find_all().await.unwrap();
        repo.delete(loaded).await.unwrap();

        assert_eq!(
            *recorder.events.lock(),
            vec![
                "before_save 2021-01-01",
                "after_save 2021-01-01",
                "after_load 2021-01-01",
                "after_query 1",
                "after_scan 1",
                "before_delete 2021-01-01",
                "after_delete 2021-01-01",
            ]
        );
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let repo = orders().await;
        for method in [
            QueryMethod::new("findByNickname"),
            QueryMethod::new("findByCustomerIdOrStatus"),
            QueryMethod::new("findByCustomerId").with_annotation(QueryAnnotation::default().with_index_name("nope")),
            QueryMethod::new("findByStatus").with_annotation(QueryAnnotation::default().with_index_name("totalIndex")),
            QueryMethod::new("findByCustomerId")
                .with_annotation(
                    QueryAnnotation::default()
                        .with_filter_expression("#s = :s")
                        .with_value(ExpressionAttribute::parameter(":s", "status")),
                ),
            QueryMethod::new("findByCustomerIdAndTotalBetween").with_parameter_names(["customerId", "low"]),
            QueryMethod::new("findByCustomerId").with_annotation(QueryAnnotation::default().with_limit(0)),
        ] {
            assert!(matches!(repo.query_method(method), Err(Error::Configuration(_))));
        }
    }

    #[tokio::test]
    async fn test_find() {
        let repo = orders().await;

        let q = repo.query_method(QueryMethod::new("findByCustomerIdAndTotalGreaterThan")).unwrap();
        let results = q.find(QueryArgs::new().arg("c1").arg(100)).await.unwrap();
        assert_eq!(results.iter().map(|o| o.total).collect::<Vec<_>>(), vec![150, 250, 300]);

        let q = repo.query_method(QueryMethod::new("findByCustomerIdOrderByOrderDateDesc")).unwrap();
        let results = q.find(QueryArgs::new().arg("c1")).await.unwrap();
        assert_eq!(results[0].order_date, "2021-05-01");

        let q = repo.query_method(QueryMethod::new("findTop2ByCustomerIdOrderByOrderDateDesc")).unwrap();
        let results = q.find(QueryArgs::new().arg("c1")).await.unwrap();
        assert_eq!(dates(&results), vec!["2021-05-01", "2021-04-01"]);

        let q = repo.query_method(QueryMethod::new("findByCustomerIdAndOrderDateBetween")).unwrap();
        let results = q.find(QueryArgs::new().arg("c1").arg("2021-02-01").arg("2021-03-31")).await.unwrap();
        assert_eq!(dates(&results), vec!["2021-02-01", "2021-03-01"]);

        let q = repo.query_method(QueryMethod::new("findByCustomerIdAndStatusIn")).unwrap();
        let results = q
            .find(QueryArgs::new().arg("c1").arg(vec![Value::from("closed")]))
            .await
            .unwrap();
        assert_eq!(dates(&results), vec!["2021-02-01", "2021-04-01"]);

        let q = repo.query_method(QueryMethod::new("findByCustomerId")).unwrap();
        let results = q
            .find(QueryArgs::new().arg("c1").sort(Sort::by(SortOrder::desc("total"))))
            .await
            .unwrap();
        assert_eq!(results.iter().map(|o| o.total).collect::<Vec<_>>(), vec![300, 250, 150, 100, 50]);

        assert!(matches!(q.find(QueryArgs::new()).await, Err(Error::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_find_one() {
        let repo = orders().await;
        let q = repo.query_method(QueryMethod::new("findByCustomerIdAndOrderDate")).unwrap();
        let found = q.find_one(QueryArgs::new().arg("c1").arg("2021-02-01")).await.unwrap();
        assert_eq!(found.map(|o| o.total), Some(150));
        assert_eq!(q.find_one(QueryArgs::new().arg("c1").arg("1999-01-01")).await.unwrap(), None);

        let q = repo.query_method(QueryMethod::new("findByCustomerId")).unwrap();
        assert!(matches!(
            q.find_one(QueryArgs::new().arg("c1")).await,
            Err(Error::IncorrectResultSize { expected: 1, actual: 5 })
        ));
    }

    #[tokio::test]
    async fn test_page_and_slice() {
        let repo = orders().await;
        let q = repo.query_method(QueryMethod::new("findByCustomerId")).unwrap();

        let page = q.find_page(QueryArgs::new().arg("c1"), Pageable::of(1, 2)).await.unwrap();
        assert_eq!(dates(&page.content), vec!["2021-03-01", "2021-04-01"]);
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());

        let slice = q.find_slice(QueryArgs::new().arg("c1"), Pageable::of(0, 2)).await.unwrap();
        assert_eq!(slice.content.len(), 2);
        assert!(slice.has_next);
        let slice = q.find_slice(QueryArgs::new().arg("c1"), Pageable::of(2, 2)).await.unwrap();
        assert_eq!(dates(&slice.content), vec!["2021-05-01"]);
        assert!(!slice.has_next);

        match q.execute(QueryArgs::new().arg("c1").pageable(Pageable::of(0, 3))).await.unwrap() {
            QueryResult::Page(page) => assert_eq!(page.content.len(), 3),
            other => panic!("expected a page, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_count_exists_delete() {
        let repo = orders().await;

        let count = repo.query_method(QueryMethod::new("countByCustomerId")).unwrap();
        assert!(matches!(count.execute(QueryArgs::new().arg("c1")).await.unwrap(), QueryResult::Count(5)));

        let exists = repo.query_method(QueryMethod::new("existsByCustomerIdAndStatus")).unwrap();
        assert!(exists.exists(QueryArgs::new().arg("c1").arg("closed")).await.unwrap());
        assert!(!exists.exists(QueryArgs::new().arg("c1").arg("void")).await.unwrap());

        let delete = repo.query_method(QueryMethod::new("deleteByCustomerIdAndStatus")).unwrap();
        let deleted = delete.delete(QueryArgs::new().arg("c1").arg("closed")).await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(count.count(QueryArgs::new().arg("c1")).await.unwrap(), 3);

        let scan_count = repo.query_method(QueryMethod::new("countByStatus")).unwrap();
        assert!(matches!(scan_count.count(QueryArgs::new().arg("open")).await, Err(Error::ScanNotEnabled(_))));
        let scan_count = repo.query_method(QueryMethod::new("countByStatus").enable_scan_count()).unwrap();
        assert_eq!(scan_count.count(QueryArgs::new().arg("open")).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_methods_without_conditions_match_nothing() {
        let repo = orders().await;

        let find = repo.query_method(QueryMethod::new("findBy")).unwrap();
        assert!(find.find(QueryArgs::new()).await.unwrap().is_empty());
        let page = find.find_page(QueryArgs::new(), Pageable::of(0, 10)).await.unwrap();
        assert!(page.content.is_empty());
        assert_eq!(page.total, 0);

        let count = repo.query_method(QueryMethod::new("countBy")).unwrap();
        assert_eq!(count.count(QueryArgs::new()).await.unwrap(), 0);
        let exists = repo.query_method(QueryMethod::new("existsBy")).unwrap();
        assert!(!exists.exists(QueryArgs::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_booleans_and_scans() {
        let repo = customers().await;

        let q = repo.query_method(QueryMethod::new("findByActiveTrue")).unwrap();
        assert!(matches!(q.find(QueryArgs::new()).await, Err(Error::ScanNotEnabled(_))));

        let q = repo.query_method(QueryMethod::new("findByActiveTrue").enable_scan()).unwrap();
        let mut ids: Vec<String> = q.find(QueryArgs::new()).await.unwrap().into_iter().map(|c| c.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["u1", "u2"]);

        let q = repo.query_method(QueryMethod::new("findByLastNameAndAgeGreaterThan")).unwrap();
        let found = q.find(QueryArgs::new().arg("Smith").arg(30)).await.unwrap();
        assert_eq!(found.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["u1"]);
    }

    #[tokio::test]
    async fn test_annotation_options() {
        let repo = customers().await;

        let q = repo
            .query_method(
                QueryMethod::new("findByStatus").with_annotation(QueryAnnotation::default().with_limit(1)),
            )
            .unwrap();
        assert_eq!(q.find(QueryArgs::new().arg("active")).await.unwrap().len(), 1);

        let q = repo
            .query_method(
                QueryMethod::new("findByIdAndStatus")
                    .with_annotation(QueryAnnotation::default().with_index_name("statusIndex")),
            )
            .unwrap();
        let shape = q.shape(&QueryArgs::new().arg("u1").arg("active")).unwrap();
        match shape {
            RequestShape::Query(request) => assert_eq!(request.index_name.as_deref(), Some("statusIndex")),
            other => panic!("expected a query, got {:?}", other),
        }
        let found = q.find(QueryArgs::new().arg("u1").arg("active")).await.unwrap();
        assert_eq!(found.len(), 1);

        let q = repo
            .query_method(
                QueryMethod::new("findByStatus")
                    .with_parameter_names(["status", "field", "minAge"])
                    .with_annotation(
                        QueryAnnotation::default()
                            .with_filter_expression("#f > :min")
                            .with_name(ExpressionAttribute::parameter("#f", "field"))
                            .with_value(ExpressionAttribute::parameter(":min", "minAge"))
                            .with_value(ExpressionAttribute::value(":fixed", "x"))
                            .with_consistent_reads(ConsistentReadMode::Eventual),
                    ),
            )
            .unwrap();
        let args = QueryArgs::new().arg("active").arg("age").arg(35);
        match q.shape(&args).unwrap() {
            RequestShape::Query(request) => {
                let filter = request.filter_expression.unwrap();
                assert_eq!(filter.expression, "#f > :min");
                assert_eq!(filter.names["#f"], "age");
                assert_eq!(filter.values[":min"], Value::from(35));
                assert_eq!(filter.values[":fixed"], Value::from("x"));
                assert_eq!(request.consistent_read, Some(false));
            }
            other => panic!("expected a query, got {:?}", other),
        }
        let found = q.find(args).await.unwrap();
        assert_eq!(found.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["u1"]);

        let bad = QueryArgs::new().arg("active").arg(5).arg(35);
        assert!(matches!(q.shape(&bad), Err(Error::InvalidQuery(_))));
    }
}
