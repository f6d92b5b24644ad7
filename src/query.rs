//! Executable queries wrapping a completed request.

use super::{
    operations::Operations,
    request::{KeyLookup, QueryRequest, RequestShape, ScanRequest},
    Entity, Error, Result,
};
use std::{marker::PhantomData, sync::Arc};

#[async_trait]
pub trait Query<R: Send>: Send + Sync {
    async fn get_result_list(&self) -> Result<Vec<R>>;

    /// `None` for no results, an error for more than one.
    async fn get_single_result(&self) -> Result<Option<R>> {
        let mut results = self.get_result_list().await?;
        match results.len() {
            0 | 1 => Ok(results.pop()),
            actual => Err(Error::IncorrectResultSize { expected: 1, actual }),
        }
    }
}

/// A constant result. Never touches the store.
pub struct StaticQuery<R> {
    value: Option<R>,
}

impl<R> StaticQuery<R> {
    pub fn new(value: Option<R>) -> Self {
        Self { value }
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> Query<R> for StaticQuery<R> {
    async fn get_result_list(&self) -> Result<Vec<R>> {
        Ok(self.value.iter().cloned().collect())
    }
}

pub struct SingleEntityLoadQuery<T, O> {
    ops: Arc<O>,
    lookup: KeyLookup,
    _entity: PhantomData<fn() -> T>,
}

impl<T, O> SingleEntityLoadQuery<T, O> {
    pub fn new(ops: Arc<O>, lookup: KeyLookup) -> Self {
        Self {
            ops,
            lookup,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Entity, O: Operations + 'static> Query<T> for SingleEntityLoadQuery<T, O> {
    async fn get_result_list(&self) -> Result<Vec<T>> {
        Ok(self.ops.get::<T>(&self.lookup).await?.into_iter().collect())
    }
}

/// Counts by primary key: 1 if the item exists, otherwise 0.
pub struct CountByKeyQuery<T, O> {
    load: SingleEntityLoadQuery<T, O>,
}

impl<T, O> CountByKeyQuery<T, O> {
    pub fn new(ops: Arc<O>, lookup: KeyLookup) -> Self {
        Self {
            load: SingleEntityLoadQuery::new(ops, lookup),
        }
    }
}

#[async_trait]
impl<T: Entity, O: Operations + 'static> Query<usize> for CountByKeyQuery<T, O> {
    async fn get_result_list(&self) -> Result<Vec<usize>> {
        Ok(vec![self.load.get_result_list().await?.len()])
    }
}

/// Concatenates query pages. The request limit bounds the items DynamoDB examines per page, so
/// with filters a page can hold fewer matches than the limit. Accumulation continues until the
/// limit is reached and the result is truncated to it.
pub struct MultipleEntityQueryRequestQuery<T, O> {
    ops: Arc<O>,
    request: QueryRequest,
    _entity: PhantomData<fn() -> T>,
}

impl<T, O> MultipleEntityQueryRequestQuery<T, O> {
    pub fn new(ops: Arc<O>, request: QueryRequest) -> Self {
        Self {
            ops,
            request,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Entity, O: Operations + 'static> Query<T> for MultipleEntityQueryRequestQuery<T, O> {
    async fn get_result_list(&self) -> Result<Vec<T>> {
        let limit = self.request.limit;
        let mut items = vec![];
        let mut start = None;
        loop {
            let page = self.ops.query_page::<T>(&self.request, start).await?;
            items.extend(page.items);
            if limit.map_or(false, |limit| items.len() >= limit) {
                break;
            }
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }
}

fn scan_not_enabled(table: &str) -> Error {
    Error::ScanNotEnabled(format!(
        "scanning {} is not enabled; enable scans on the repository or the query method",
        table
    ))
}

fn scan_count_not_enabled(table: &str) -> Error {
    Error::ScanNotEnabled(format!(
        "counting {} requires a scan, which is not enabled; enable scan counts on the repository or the query method",
        table
    ))
}

pub struct MultipleEntityScanQuery<T, O> {
    ops: Arc<O>,
    request: ScanRequest,
    scan_enabled: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T, O> MultipleEntityScanQuery<T, O> {
    pub fn new(ops: Arc<O>, request: ScanRequest, scan_enabled: bool) -> Self {
        Self {
            ops,
            request,
            scan_enabled,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Entity, O: Operations + 'static> Query<T> for MultipleEntityScanQuery<T, O> {
    async fn get_result_list(&self) -> Result<Vec<T>> {
        if !self.scan_enabled {
            return Err(scan_not_enabled(T::describe().table_name()));
        }
        let limit = self.request.limit;
        let mut items = vec![];
        let mut start = None;
        loop {
            let page = self.ops.scan_page::<T>(&self.request, start).await?;
            items.extend(page.items);
            if limit.map_or(false, |limit| items.len() >= limit) {
                break;
            }
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }
}

/// Counts the matches of a query. In page mode the count is capped at the request limit, which
/// is the number of items one page of the query could return.
pub struct QueryRequestCountQuery<T, O> {
    ops: Arc<O>,
    request: QueryRequest,
    page_query: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T, O> QueryRequestCountQuery<T, O> {
    pub fn new(ops: Arc<O>, request: QueryRequest, page_query: bool) -> Self {
        Self {
            ops,
            request,
            page_query,
            _entity: PhantomData,
        }
    }
}

fn page_capped(count: usize, limit: Option<usize>, page_query: bool) -> usize {
    match limit {
        Some(limit) if page_query => count.min(limit),
        _ => count,
    }
}

#[async_trait]
impl<T: Entity, O: Operations + 'static> Query<usize> for QueryRequestCountQuery<T, O> {
    async fn get_result_list(&self) -> Result<Vec<usize>> {
        let count = self.ops.count_query::<T>(&self.request).await?;
        Ok(vec![page_capped(count, self.request.limit, self.page_query)])
    }
}

pub struct ScanCountQuery<T, O> {
    ops: Arc<O>,
    request: ScanRequest,
    scan_count_enabled: bool,
    page_query: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T, O> ScanCountQuery<T, O> {
    pub fn new(ops: Arc<O>, request: ScanRequest, scan_count_enabled: bool, page_query: bool) -> Self {
        Self {
            ops,
            request,
            scan_count_enabled,
            page_query,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Entity, O: Operations + 'static> Query<usize> for ScanCountQuery<T, O> {
    async fn get_result_list(&self) -> Result<Vec<usize>> {
        if !self.scan_count_enabled {
            return Err(scan_count_not_enabled(T::describe().table_name()));
        }
        let count = self.ops.count_scan::<T>(&self.request).await?;
        Ok(vec![page_capped(count, self.request.limit, self.page_query)])
    }
}

/// Wraps a completed request in the query that returns entities.
pub fn entity_query<T: Entity, O: Operations + 'static>(ops: Arc<O>, shape: RequestShape, scan_enabled: bool) -> Box<dyn Query<T>> {
    match shape {
        RequestShape::Static => Box::new(StaticQuery::<T>::new(None)),
        RequestShape::Get(lookup) => Box::new(SingleEntityLoadQuery::<T, O>::new(ops, lookup)),
        RequestShape::Query(request) => Box::new(MultipleEntityQueryRequestQuery::<T, O>::new(ops, request)),
        RequestShape::Scan(request) => Box::new(MultipleEntityScanQuery::<T, O>::new(ops, request, scan_enabled)),
    }
}

/// Wraps a completed request in the query that counts its matches. A request with no conditions
/// matches nothing and counts as 0.
pub fn count_query<T: Entity, O: Operations + 'static>(
    ops: Arc<O>,
    shape: RequestShape,
    scan_count_enabled: bool,
    page_query: bool,
) -> Box<dyn Query<usize>> {
    match shape {
        RequestShape::Static => Box::new(StaticQuery::new(Some(0))),
        RequestShape::Get(lookup) => Box::new(CountByKeyQuery::<T, O>::new(ops, lookup)),
        RequestShape::Query(request) => Box::new(QueryRequestCountQuery::<T, O>::new(ops, request, page_query)),
        RequestShape::Scan(request) => Box::new(ScanCountQuery::<T, O>::new(ops, request, scan_count_enabled, page_query)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        marshalling::MarshallingMode,
        operations::ResultPage,
        operationstest::fixtures::{order, Order},
        value::{Item, Value},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned pages and counts the calls it receives.
    struct Pages {
        pages: Vec<Vec<Order>>,
        count: usize,
        calls: AtomicUsize,
    }

    impl Pages {
        fn new(pages: Vec<Vec<Order>>) -> Arc<Self> {
            let count = pages.iter().map(Vec::len).sum();
            Arc::new(Self {
                pages,
                count,
                calls: AtomicUsize::new(0),
            })
        }

        fn page<T: Entity>(&self, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index = match exclusive_start_key.as_ref().and_then(|k| k.get("page")) {
                Some(Value::N(n)) => n.parse::<usize>().map_err(|e| Error::Mapping(e.to_string()))?,
                _ => 0,
            };
            let items = self.pages[index].iter().map(|o| T::from_item(&o.to_item())).collect::<Result<_>>()?;
            let last_evaluated_key = (index + 1 < self.pages.len()).then(|| [("page".to_string(), Value::from(index + 1))].into());
            Ok(ResultPage { items, last_evaluated_key })
        }
    }

    #[async_trait]
    impl Operations for Pages {
        async fn get<T: Entity>(&self, _lookup: &KeyLookup) -> Result<Option<T>> {
            Ok(self.page::<T>(None)?.items.into_iter().next())
        }

        async fn query_page<T: Entity>(&self, _request: &QueryRequest, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>> {
            self.page(exclusive_start_key)
        }

        async fn scan_page<T: Entity>(&self, _request: &ScanRequest, exclusive_start_key: Option<Item>) -> Result<ResultPage<T>> {
            self.page(exclusive_start_key)
        }

        async fn count_query<T: Entity>(&self, _request: &QueryRequest) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.count)
        }

        async fn count_scan<T: Entity>(&self, _request: &ScanRequest) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.count)
        }

        async fn save<T: Entity>(&self, entity: T) -> Result<T> {
            Ok(entity)
        }

        async fn delete<T: Entity>(&self, entity: T) -> Result<T> {
            Ok(entity)
        }

        async fn batch_save<T: Entity>(&self, _entities: Vec<T>) -> Result<()> {
            Ok(())
        }

        async fn batch_delete<T: Entity>(&self, _entities: Vec<T>) -> Result<()> {
            Ok(())
        }

        fn resolve_table_name(&self, base_name: &str) -> String {
            base_name.to_string()
        }

        fn marshalling_mode(&self) -> MarshallingMode {
            MarshallingMode::default()
        }
    }

    fn three_pages() -> Arc<Pages> {
        Pages::new(vec![
            vec![order("c1", "2021-01-01", 1, "open")],
            vec![],
            vec![order("c1", "2021-03-01", 3, "open"), order("c1", "2021-04-01", 4, "open")],
        ])
    }

    fn request(limit: Option<usize>) -> QueryRequest {
        QueryRequest {
            limit,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_static_never_calls_store() {
        let ops = three_pages();
        let results = entity_query::<Order, _>(ops.clone(), RequestShape::Static, false).get_result_list().await.unwrap();
        assert!(results.is_empty());
        let count = count_query::<Order, _>(ops.clone(), RequestShape::Static, false, false).get_single_result().await.unwrap();
        assert_eq!(count, Some(0));
        assert_eq!(ops.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pages_are_concatenated() {
        let ops = three_pages();
        let results = entity_query::<Order, _>(ops.clone(), RequestShape::Query(request(None)), false)
            .get_result_list()
            .await
            .unwrap();
        assert_eq!(results.iter().map(|o| o.total).collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(ops.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_limit_stops_paging_and_truncates() {
        // the empty second page does not satisfy the limit, the third overshoots it
        let ops = three_pages();
        let results = entity_query::<Order, _>(ops.clone(), RequestShape::Query(request(Some(2))), false)
            .get_result_list()
            .await
            .unwrap();
        assert_eq!(results.iter().map(|o| o.total).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(ops.calls.load(Ordering::SeqCst), 3);

        let ops = three_pages();
        let results = entity_query::<Order, _>(ops.clone(), RequestShape::Query(request(Some(1))), false)
            .get_result_list()
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(ops.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_result() {
        let ops = three_pages();
        let err = entity_query::<Order, _>(ops.clone(), RequestShape::Query(request(None)), false)
            .get_single_result()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IncorrectResultSize { expected: 1, actual: 3 }));

        let result = entity_query::<Order, _>(ops, RequestShape::Query(request(Some(1))), false)
            .get_single_result()
            .await
            .unwrap();
        assert_eq!(result.map(|o| o.total), Some(1));
    }

    #[tokio::test]
    async fn test_scan_gates() {
        let ops = three_pages();
        let scan = RequestShape::Scan(ScanRequest::default());
        assert!(matches!(
            entity_query::<Order, _>(ops.clone(), scan.clone(), false).get_result_list().await,
            Err(Error::ScanNotEnabled(_))
        ));
        assert!(matches!(
            count_query::<Order, _>(ops.clone(), scan.clone(), false, false).get_result_list().await,
            Err(Error::ScanNotEnabled(_))
        ));
        assert_eq!(ops.calls.load(Ordering::SeqCst), 0);

        assert_eq!(entity_query::<Order, _>(ops.clone(), scan.clone(), true).get_result_list().await.unwrap().len(), 3);
        assert_eq!(count_query::<Order, _>(ops, scan, true, false).get_single_result().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_page_counts_are_capped() {
        let ops = three_pages();
        let count = count_query::<Order, _>(ops.clone(), RequestShape::Query(request(Some(2))), false, true)
            .get_single_result()
            .await
            .unwrap();
        assert_eq!(count, Some(2));
        let count = count_query::<Order, _>(ops, RequestShape::Query(request(Some(2))), false, false)
            .get_single_result()
            .await
            .unwrap();
        assert_eq!(count, Some(3));
    }
}
