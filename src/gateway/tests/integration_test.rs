//! Integration tests for the gateway core
//!
//! Everything runs against a scripted mock adapter registered through the
//! manager's injection seam, so the tests exercise the real component wiring
//! without a live database.

mod support;

use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use datagate_gateway::types::QueryOptions;
use datagate_gateway::{
    DatabaseAdapter, DatabaseGateway, DatabaseType, EventBus, GatewayError, OperationRequest,
    OperationResponse, SchemaCache,
};
use support::MockAdapter;

async fn gateway_with_mock(database_type: DatabaseType) -> (DatabaseGateway, Arc<MockAdapter>) {
    let gateway = DatabaseGateway::default();
    let adapter = MockAdapter::new(database_type);
    gateway
        .manager()
        .create_connection_with_adapter("primary", Arc::clone(&adapter) as Arc<dyn DatabaseAdapter>)
        .await
        .unwrap();
    (gateway, adapter)
}

#[tokio::test]
async fn test_select_one_scenario() {
    let (gateway, adapter) = gateway_with_mock(DatabaseType::SqlServer).await;
    adapter.script_rows(
        "SELECT 1 as test",
        vec![serde_json::json!({ "test": 1 })],
    );

    let response = gateway
        .handle_operation(OperationRequest::ExecuteQuery {
            query: "SELECT 1 as test".to_string(),
            params: Vec::new(),
        })
        .await
        .unwrap();

    match response {
        OperationResponse::Query(result) => {
            assert!(result.success);
            assert_eq!(result.rows.len(), 1);
            assert_eq!(result.rows[0].get("test"), Some(&serde_json::json!(1)));
            assert!(result.rows_affected <= 1);
            // execution time is a u64, so non-negative by construction;
            // the metadata must carry the original query text
            assert_eq!(
                result.metadata.as_ref().map(|m| m.query.as_str()),
                Some("SELECT 1 as test")
            );
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_describe_missing_table_names_the_table() {
    let (gateway, _) = gateway_with_mock(DatabaseType::Postgres).await;

    let failure = gateway
        .handle_operation(OperationRequest::DescribeTable {
            table: "nonexistent_audit_log".to_string(),
        })
        .await
        .unwrap_err();

    assert!(failure.message.contains("schema validation error"));
    assert!(failure.message.contains("nonexistent_audit_log"));
    // remediation hint, not a stack trace
    assert!(failure.message.contains("Suggestion"));
    assert!(!failure.message.contains("backtrace"));
}

#[tokio::test]
async fn test_schema_statistics_cached_within_ttl() {
    let (gateway, adapter) = gateway_with_mock(DatabaseType::Postgres).await;

    let first = gateway
        .handle_operation(OperationRequest::GetSchemaStatistics)
        .await
        .unwrap();
    let second = gateway
        .handle_operation(OperationRequest::GetSchemaStatistics)
        .await
        .unwrap();

    // exactly one backend round trip for the two calls
    assert_eq!(adapter.schema_calls.load(Ordering::SeqCst), 1);

    let first = serde_json::to_value(&first).unwrap();
    let second = serde_json::to_value(&second).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_cache_expiry_forces_fresh_fetch() {
    let events = EventBus::new(16);
    let gateway = DatabaseGateway::default();
    let adapter = MockAdapter::new(DatabaseType::Postgres);
    gateway
        .manager()
        .create_connection_with_adapter("primary", Arc::clone(&adapter) as Arc<dyn DatabaseAdapter>)
        .await
        .unwrap();

    let cache = SchemaCache::with_ttl(
        Arc::clone(gateway.manager()),
        Duration::from_millis(25),
        events,
    );

    cache.get_tables().await.unwrap();
    assert_eq!(adapter.tables_calls.load(Ordering::SeqCst), 1);

    // within the ttl the cached listing is served
    cache.get_tables().await.unwrap();
    assert_eq!(adapter.tables_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(35)).await;
    cache.get_tables().await.unwrap();
    assert_eq!(adapter.tables_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_caches_operation() {
    let (gateway, adapter) = gateway_with_mock(DatabaseType::Postgres).await;

    gateway
        .handle_operation(OperationRequest::ListTables)
        .await
        .unwrap();
    gateway
        .handle_operation(OperationRequest::ClearCaches)
        .await
        .unwrap();
    gateway
        .handle_operation(OperationRequest::ListTables)
        .await
        .unwrap();

    assert_eq!(adapter.tables_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_transaction_failure_rolls_back_and_skips_rest() {
    let (gateway, adapter) = gateway_with_mock(DatabaseType::Postgres).await;
    adapter.fail_queries_containing("UPDATE orders");

    let statements = vec![
        "INSERT INTO audit VALUES (1)".to_string(),
        "UPDATE orders SET total = -1".to_string(),
        "DELETE FROM audit".to_string(),
    ];
    let err = gateway
        .query()
        .execute_in_transaction(&statements)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::QueryExecution { .. }));

    let executed = adapter.executed();
    assert_eq!(
        executed,
        vec![
            "BEGIN",
            "INSERT INTO audit VALUES (1)",
            "UPDATE orders SET total = -1",
            "ROLLBACK",
        ]
    );
}

#[tokio::test]
async fn test_batch_aggregates_per_statement_results() {
    let (gateway, _) = gateway_with_mock(DatabaseType::MySql).await;

    let response = gateway
        .handle_operation(OperationRequest::ExecuteBatch {
            statements: vec!["SELECT 1".to_string(), "SELECT 2".to_string()],
        })
        .await
        .unwrap();

    match response {
        OperationResponse::Batch(results) => {
            assert_eq!(results.len(), 2);
            assert!(results.iter().all(|r| r.success));
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_pool_status_operation() {
    let (gateway, _) = gateway_with_mock(DatabaseType::Postgres).await;

    let response = gateway
        .handle_operation(OperationRequest::GetConnectionPoolStatus)
        .await
        .unwrap();

    match response {
        OperationResponse::PoolStatus(status) => {
            assert_eq!(status.total_connections, 5);
            assert_eq!(status.idle_connections, 3);
            assert_eq!(status.active_connections, 2);
            assert_eq!(status.max_size, 20);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_query_stats_reflect_history() {
    let (gateway, adapter) = gateway_with_mock(DatabaseType::Postgres).await;
    adapter.fail_queries_containing("bad");

    gateway
        .query()
        .execute_query("SELECT 1", &QueryOptions::default())
        .await
        .unwrap();
    let _ = gateway
        .query()
        .execute_query("SELECT bad", &QueryOptions::default())
        .await;

    let response = gateway
        .handle_operation(OperationRequest::GetQueryStats)
        .await
        .unwrap();
    match response {
        OperationResponse::QueryStats(stats) => {
            assert_eq!(stats.total, 2);
            assert_eq!(stats.successful, 1);
            assert_eq!(stats.failed, 1);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_double_start_keeps_a_single_timer() {
    let (gateway, _) = gateway_with_mock(DatabaseType::Postgres).await;

    let first = gateway
        .handle_operation(OperationRequest::StartPerformanceMonitoring {
            interval_ms: Some(1000),
        })
        .await
        .unwrap();
    match first {
        OperationResponse::MonitoringStarted { started, .. } => assert!(started),
        other => panic!("unexpected response: {:?}", other),
    }

    // second start is a soft failure and must not add a second timer
    let second = gateway
        .handle_operation(OperationRequest::StartPerformanceMonitoring {
            interval_ms: Some(1000),
        })
        .await
        .unwrap();
    match second {
        OperationResponse::MonitoringStarted { started, .. } => assert!(!started),
        other => panic!("unexpected response: {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(3500)).await;
    gateway.monitor().stop().await;

    // one metric per interval tick: three ticks in 3.5 intervals
    let collected = gateway.monitor().metrics_history().await.len();
    assert!(
        (3..=4).contains(&collected),
        "expected one collection per tick, got {}",
        collected
    );
}

#[tokio::test]
async fn test_performance_report_operation() {
    let (gateway, _) = gateway_with_mock(DatabaseType::Postgres).await;

    gateway
        .query()
        .execute_query("SELECT 1", &QueryOptions::default())
        .await
        .unwrap();
    let metric = gateway.metrics().collect().await;
    gateway.monitor().record_metric(metric).await;

    let response = gateway
        .handle_operation(OperationRequest::GeneratePerformanceReport)
        .await
        .unwrap();
    match response {
        OperationResponse::Report(report) => {
            assert_eq!(report.samples, 1);
            assert_eq!(report.total_queries, 1);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_remove_current_connection_reassigns() {
    let (gateway, _) = gateway_with_mock(DatabaseType::Postgres).await;
    let secondary = MockAdapter::new(DatabaseType::MySql);
    gateway
        .manager()
        .create_connection_with_adapter("secondary", secondary as Arc<dyn DatabaseAdapter>)
        .await
        .unwrap();

    assert_eq!(
        gateway.manager().current_id().await.as_deref(),
        Some("primary")
    );
    gateway.manager().remove_connection("primary").await.unwrap();
    assert_eq!(
        gateway.manager().current_id().await.as_deref(),
        Some("secondary")
    );

    gateway
        .manager()
        .remove_connection("secondary")
        .await
        .unwrap();
    assert!(gateway.manager().current_id().await.is_none());
}

#[tokio::test]
async fn test_failed_connect_leaves_no_registration() {
    let gateway = DatabaseGateway::default();
    let adapter = MockAdapter::new(DatabaseType::Postgres);
    adapter.refuse_connect();

    let err = gateway
        .manager()
        .create_connection_with_adapter("broken", adapter as Arc<dyn DatabaseAdapter>)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Connection { .. }));
    assert!(gateway.manager().list_connections().await.is_empty());
    assert!(gateway.manager().current_id().await.is_none());
}

#[tokio::test]
async fn test_alert_lifecycle_through_gateway() {
    let (gateway, _) = gateway_with_mock(DatabaseType::Postgres).await;
    let monitor = gateway.monitor();

    let alert = monitor
        .raise_alert(
            datagate_gateway::AlertType::ConnectionTimeout,
            datagate_gateway::AlertSeverity::High,
            "connection attempt timed out",
            serde_json::json!({ "timeout_ms": 10000 }),
        )
        .await;

    monitor.acknowledge(alert.id).await.unwrap();
    monitor.resolve(alert.id).await.unwrap();
    assert!(monitor.acknowledge(alert.id).await.is_err());
    assert!(!monitor.should_escalate(alert.id, -1).await);
}

#[tokio::test]
async fn test_auto_reconnect_through_gateway() {
    let (gateway, adapter) = gateway_with_mock(DatabaseType::Postgres).await;
    assert!(adapter.is_connected());
    assert!(gateway.manager().auto_reconnect(None).await);
    assert!(adapter.is_connected());
}

#[tokio::test]
async fn test_events_published_for_queries() {
    let (gateway, _) = gateway_with_mock(DatabaseType::Postgres).await;
    let mut rx = gateway.events().subscribe();

    gateway
        .query()
        .execute_query("SELECT 1", &QueryOptions::default())
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        datagate_gateway::GatewayEvent::QueryExecuted { query, success, .. } => {
            assert_eq!(query, "SELECT 1");
            assert!(success);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}
