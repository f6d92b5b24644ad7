
/// Contract tests for [`crate::Operations`] implementations. `$f` is a closure returning a future
/// that resolves to a store with empty `Customer` and `Order` tables.
#[macro_export]
macro_rules! test_operations {
    ($f:expr) => {
        use crate::{
            criteria::QueryCriteria,
            operations::Operations,
            operationstest::fixtures::{customer, order, Customer, Order},
            paging::{Order as SortOrder, Sort},
            query::{count_query, entity_query},
            request::{ComparisonOperator, RequestShape, ScanRequest},
            value::Value,
            EntityKeySchema, Error,
        };
        use chrono::{TimeZone, Utc};
        use serial_test::serial;
        use std::sync::Arc;

        fn orders() -> QueryCriteria {
            QueryCriteria::new(EntityKeySchema::of::<Order>().unwrap())
        }

        fn customers() -> QueryCriteria {
            QueryCriteria::new(EntityKeySchema::of::<Customer>().unwrap())
        }

        async fn seed_orders<O: Operations>(ops: &O) {
            for (date, total, status) in [
                ("2021-01-01", 50, "open"),
                ("2021-02-01", 150, "closed"),
                ("2021-03-01", 250, "open"),
                ("2021-04-01", 100, "closed"),
                ("2021-05-01", 300, "open"),
            ] {
                ops.save(order("c1", date, total, status)).await.unwrap();
            }
            ops.save(order("c2", "2021-01-15", 75, "open")).await.unwrap();
        }

        async fn seed_customers<O: Operations>(ops: &O) {
            for c in [
                customer("u1", "Smith", 42, "active"),
                customer("u2", "Jones", 30, "active"),
                customer("u3", "Smith", 25, "inactive"),
                customer("u4", "Brown", 50, "active"),
            ] {
                ops.save(c).await.unwrap();
            }
        }

        fn dates(orders: &[Order]) -> Vec<&str> {
            orders.iter().map(|o| o.order_date.as_str()).collect()
        }

        #[tokio::test]
        #[serial]
        async fn test_save_and_load() {
            let ops = ($f)().await;

            let mut o = order("c1", "2021-01-01", 50, "open");
            o.note = Some("gift".into());
            assert_eq!(ops.save(o.clone()).await.unwrap(), o);
            assert_eq!(
                ops.load::<Order>("c1".into(), Some("2021-01-01".into())).await.unwrap(),
                Some(o)
            );
            assert_eq!(ops.load::<Order>("c1".into(), Some("2021-01-02".into())).await.unwrap(), None);

            let mut c = customer("u1", "Smith", 42, "active");
            c.signed_in = true;
            c.created_at = Utc.timestamp_millis_opt(1_600_000_000_123).single();
            ops.save(c.clone()).await.unwrap();
            assert_eq!(ops.load::<Customer>("u1".into(), None).await.unwrap(), Some(c));
        }

        #[tokio::test]
        #[serial]
        async fn test_load_needs_full_key() {
            let ops = ($f)().await;
            assert!(matches!(ops.load::<Order>("c1".into(), None).await, Err(Error::InvalidQuery(_))));
            assert!(matches!(
                ops.load::<Customer>("u1".into(), Some("x".into())).await,
                Err(Error::InvalidQuery(_))
            ));
        }

        #[tokio::test]
        #[serial]
        async fn test_overwrite_and_delete() {
            let ops = ($f)().await;

            ops.save(order("c1", "2021-01-01", 50, "open")).await.unwrap();
            let updated = order("c1", "2021-01-01", 60, "closed");
            ops.save(updated.clone()).await.unwrap();
            assert_eq!(
                ops.load::<Order>("c1".into(), Some("2021-01-01".into())).await.unwrap(),
                Some(updated.clone())
            );

            assert_eq!(ops.delete(updated).await.unwrap().total, 60);
            assert_eq!(ops.load::<Order>("c1".into(), Some("2021-01-01".into())).await.unwrap(), None);
        }

        #[tokio::test]
        #[serial]
        async fn test_table_query() {
            let ops = Arc::new(($f)().await);
            seed_orders(ops.as_ref()).await;

            let build = || {
                orders()
                    .with_property_equals("customerId", "c1".into())
                    .with_single_value_criteria("orderDate", ComparisonOperator::Ge, "2021-02-01".into())
            };

            let results = entity_query::<Order, _>(ops.clone(), build().complete().unwrap(), false)
                .get_result_list()
                .await
                .unwrap();
            assert_eq!(dates(&results), vec!["2021-02-01", "2021-03-01", "2021-04-01", "2021-05-01"]);

            let shape = build().with_sort(Sort::by(SortOrder::desc("orderDate"))).complete().unwrap();
            let results = entity_query::<Order, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(dates(&results), vec!["2021-05-01", "2021-04-01", "2021-03-01", "2021-02-01"]);

            let shape = orders()
                .with_property_equals("customerId", "c1".into())
                .with_single_value_criteria("orderDate", ComparisonOperator::BeginsWith, "2021-03".into())
                .complete()
                .unwrap();
            let results = entity_query::<Order, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(dates(&results), vec!["2021-03-01"]);
        }

        #[tokio::test]
        #[serial]
        async fn test_local_index_query() {
            let ops = Arc::new(($f)().await);
            seed_orders(ops.as_ref()).await;

            let shape = orders()
                .with_property_equals("customerId", "c1".into())
                .with_single_value_criteria("total", ComparisonOperator::Gt, 100.into())
                .complete()
                .unwrap();
            assert_eq!(shape.strategy(), "index query");
            let results = entity_query::<Order, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(results.iter().map(|o| o.total).collect::<Vec<_>>(), vec![150, 250, 300]);

            let shape = orders()
                .with_property_equals("customerId", "c1".into())
                .with_property_between("total", 100.into(), 250.into())
                .with_sort(Sort::by(SortOrder::desc("total")))
                .complete()
                .unwrap();
            let results = entity_query::<Order, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(results.iter().map(|o| o.total).collect::<Vec<_>>(), vec![250, 150, 100]);
        }

        #[tokio::test]
        #[serial]
        async fn test_global_index_query() {
            let ops = Arc::new(($f)().await);
            seed_customers(ops.as_ref()).await;

            let shape = customers().with_property_equals("status", "active".into()).complete().unwrap();
            let results = entity_query::<Customer, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(results.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["u2", "u1", "u4"]);

            let shape = customers()
                .with_property_equals("lastName", "Smith".into())
                .with_single_value_criteria("age", ComparisonOperator::Gt, 30.into())
                .complete()
                .unwrap();
            let results = entity_query::<Customer, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(results.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["u1"]);

            let shape = customers().with_property_equals("email", "u3@example.com".into()).complete().unwrap();
            let found = entity_query::<Customer, _>(ops.clone(), shape, false).get_single_result().await.unwrap();
            assert_eq!(found.map(|c| c.id), Some("u3".to_string()));
        }

        #[tokio::test]
        #[serial]
        async fn test_filters() {
            let ops = Arc::new(($f)().await);
            seed_orders(ops.as_ref()).await;
            let mut noted = order("c1", "2021-06-01", 10, "open");
            noted.note = Some("gift wrap".into());
            ops.save(noted).await.unwrap();

            let count = |criteria: QueryCriteria| {
                let ops = ops.clone();
                async move {
                    entity_query::<Order, _>(ops, criteria.complete().unwrap(), false)
                        .get_result_list()
                        .await
                        .unwrap()
                        .len()
                }
            };
            let c1 = || orders().with_property_equals("customerId", "c1".into());

            assert_eq!(count(c1().with_no_valued_criteria("note", ComparisonOperator::NotNull)).await, 1);
            assert_eq!(count(c1().with_no_valued_criteria("note", ComparisonOperator::Null)).await, 5);
            assert_eq!(count(c1().with_single_value_criteria("note", ComparisonOperator::Contains, "wrap".into())).await, 1);
            assert_eq!(count(c1().with_single_value_criteria("status", ComparisonOperator::Ne, "open".into())).await, 2);
            assert_eq!(count(c1().with_single_value_criteria("status", ComparisonOperator::Contains, "los".into())).await, 2);
            assert_eq!(
                count(c1().with_single_value_criteria("status", ComparisonOperator::NotContains, "los".into())).await,
                4
            );
            assert_eq!(count(c1().with_property_in("status", vec!["open".into(), "closed".into()])).await, 6);
            assert_eq!(count(c1().with_property_equals("status", "closed".into())).await, 2);
        }

        #[tokio::test]
        #[serial]
        async fn test_limit_truncation() {
            let ops = Arc::new(($f)().await);
            seed_orders(ops.as_ref()).await;

            let build = || {
                orders()
                    .with_property_equals("customerId", "c1".into())
                    .with_property_equals("status", "open".into())
            };

            // two items are examined per page, so matches arrive one page at a time
            let shape = build().with_limit(Some(2)).complete().unwrap();
            let results = entity_query::<Order, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(dates(&results), vec!["2021-01-01", "2021-03-01"]);

            let shape = build().complete().unwrap();
            let query = entity_query::<Order, _>(ops.clone(), shape, false);
            assert_eq!(query.get_result_list().await.unwrap().len(), 3);
            assert!(matches!(
                query.get_single_result().await,
                Err(Error::IncorrectResultSize { expected: 1, actual: 3 })
            ));
        }

        #[tokio::test]
        #[serial]
        async fn test_filter_expression_with_limit() {
            let ops = Arc::new(($f)().await);
            seed_orders(ops.as_ref()).await;

            let build = |expression: &str| {
                orders()
                    .with_property_equals("customerId", "c1".into())
                    .with_filter_expression(Some(expression.into()))
                    .with_expression_attribute_names(
                        [("#s".to_string(), "status".to_string()), ("#t".to_string(), "total".to_string())].into(),
                    )
                    .with_expression_attribute_values(
                        [(":open".to_string(), Value::from("open")), (":min".to_string(), Value::from(100))].into(),
                    )
            };

            let shape = build("#s = :open").with_limit(Some(2)).complete().unwrap();
            let results = entity_query::<Order, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(dates(&results), vec!["2021-01-01", "2021-03-01"]);

            let shape = build("#s = :open AND #t >= :min").with_limit(Some(1)).complete().unwrap();
            let results = entity_query::<Order, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(dates(&results), vec!["2021-03-01"]);

            let shape = build("#s = :open OR #t <= :min").complete().unwrap();
            let count = count_query::<Order, _>(ops.clone(), shape, false, false);
            assert_eq!(count.get_single_result().await.unwrap(), Some(4));
        }

        #[tokio::test]
        #[serial]
        async fn test_scan_gate() {
            let ops = Arc::new(($f)().await);
            seed_orders(ops.as_ref()).await;

            let build = || orders().with_single_value_criteria("total", ComparisonOperator::Gt, 100.into());
            assert!(matches!(build().complete().unwrap(), RequestShape::Scan(_)));

            let r = entity_query::<Order, _>(ops.clone(), build().complete().unwrap(), false)
                .get_result_list()
                .await;
            assert!(matches!(r, Err(Error::ScanNotEnabled(_))));

            let mut totals: Vec<i64> = entity_query::<Order, _>(ops.clone(), build().complete().unwrap(), true)
                .get_result_list()
                .await
                .unwrap()
                .into_iter()
                .map(|o| o.total)
                .collect();
            totals.sort();
            assert_eq!(totals, vec![150, 250, 300]);
        }

        #[tokio::test]
        #[serial]
        async fn test_scan_pages() {
            let ops = ($f)().await;
            seed_orders(&ops).await;

            let request = ScanRequest {
                limit: Some(2),
                ..Default::default()
            };
            let mut seen = 0;
            let mut start = None;
            loop {
                let page = ops.scan_page::<Order>(&request, start).await.unwrap();
                assert!(page.items.len() <= 2);
                seen += page.items.len();
                match page.last_evaluated_key {
                    Some(key) => start = Some(key),
                    None => break,
                }
            }
            assert_eq!(seen, 6);
        }

        #[tokio::test]
        #[serial]
        async fn test_counts() {
            let ops = Arc::new(($f)().await);
            seed_orders(ops.as_ref()).await;

            let c1 = || orders().with_property_equals("customerId", "c1".into());
            let count = count_query::<Order, _>(ops.clone(), c1().complete().unwrap(), false, false);
            assert_eq!(count.get_single_result().await.unwrap(), Some(5));

            let shape = c1().with_limit(Some(2)).complete().unwrap();
            let paged = count_query::<Order, _>(ops.clone(), shape.clone(), false, true);
            assert_eq!(paged.get_single_result().await.unwrap(), Some(2));
            let total = count_query::<Order, _>(ops.clone(), shape, false, false);
            assert_eq!(total.get_single_result().await.unwrap(), Some(5));

            let by_key = c1().with_property_equals("orderDate", "2021-03-01".into()).complete().unwrap();
            assert!(matches!(by_key, RequestShape::Get(_)));
            let count = count_query::<Order, _>(ops.clone(), by_key, false, false);
            assert_eq!(count.get_single_result().await.unwrap(), Some(1));

            let scan = || orders().with_property_equals("status", "open".into()).complete().unwrap();
            let r = count_query::<Order, _>(ops.clone(), scan(), false, false).get_single_result().await;
            assert!(matches!(r, Err(Error::ScanNotEnabled(_))));
            let count = count_query::<Order, _>(ops.clone(), scan(), true, false);
            assert_eq!(count.get_single_result().await.unwrap(), Some(4));

            let count = count_query::<Order, _>(ops.clone(), orders().complete().unwrap(), false, false);
            assert_eq!(count.get_single_result().await.unwrap(), Some(0));
        }

        #[tokio::test]
        #[serial]
        async fn test_batch_save_and_delete() {
            let ops = Arc::new(($f)().await);

            let batch: Vec<Order> = (0..30)
                .map(|i| order("c3", &format!("2022-01-{:02}", i + 1), i, "open"))
                .collect();
            ops.batch_save(batch.clone()).await.unwrap();

            let count = || {
                count_query::<Order, _>(
                    ops.clone(),
                    orders().with_property_equals("customerId", "c3".into()).complete().unwrap(),
                    false,
                    false,
                )
            };
            assert_eq!(count().get_single_result().await.unwrap(), Some(30));

            ops.batch_delete(batch).await.unwrap();
            assert_eq!(count().get_single_result().await.unwrap(), Some(0));

            ops.batch_save(Vec::<Order>::new()).await.unwrap();
        }

        #[tokio::test]
        #[serial]
        async fn test_projection() {
            let ops = Arc::new(($f)().await);
            let mut o = order("c1", "2021-01-01", 50, "open");
            o.note = Some("gift".into());
            ops.save(o).await.unwrap();

            let shape = orders()
                .with_property_equals("customerId", "c1".into())
                .with_single_value_criteria("orderDate", ComparisonOperator::Gt, "2020".into())
                .with_projection(Some("customerId, order_date, total".into()))
                .complete()
                .unwrap();
            let results = entity_query::<Order, _>(ops.clone(), shape, false).get_result_list().await.unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].total, 50);
            assert_eq!(results[0].note, None);
            assert_eq!(results[0].status, None);
        }
    };
}
