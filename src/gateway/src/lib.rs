//! Multi-backend connection and query-execution core for DataGate
//!
//! The gateway core manages heterogeneous database connections behind one
//! adapter contract, executes queries and transactions through the current
//! connection, caches derived schema metadata with TTL invalidation, and
//! continuously evaluates operational health thresholds into a stateful
//! alerting model. The outer tool-invocation protocol is an external
//! collaborator: requests arrive here already validated and leave as typed
//! payloads or structured failures.

pub mod adapters;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod ops;
pub mod query;
pub mod schema_cache;
pub mod types;

use std::sync::Arc;
use tracing::info;

// Re-export the types callers touch most
pub use adapters::{create_adapter, DatabaseAdapter};
pub use config::{
    AlertThresholds, CacheConfig, DatabaseConfig, GatewayConfig, MonitoringConfig, PoolConfig,
};
pub use error::{GatewayError, GatewayResult};
pub use events::{spawn_event_logger, EventBus, GatewayEvent};
pub use manager::ConnectionManager;
pub use metrics::MetricsCollector;
pub use monitor::PerformanceMonitor;
pub use ops::{OperationFailure, OperationRequest, OperationResponse};
pub use query::QueryExecutionService;
pub use schema_cache::{CacheStats, SchemaCache};
pub use types::{
    AlertSeverity, AlertStatus, AlertType, ColumnInfo, ConnectionRecord, ConnectionStatus,
    DatabaseType, ForeignKeyAction, ForeignKeyInfo, IndexInfo, PerformanceAlert,
    PerformanceMetric, PerformanceReport, PoolStatus, QueryHistoryEntry, QueryOptions,
    QueryResult, QueryStats, SchemaInfo, SchemaStatistics, TableInfo,
};

/// The assembled gateway core.
///
/// Construction wires every component with explicitly passed dependencies;
/// there are no global singletons. Consumers hold the gateway and reach the
/// components through accessors, or drive it through `handle_operation`.
pub struct DatabaseGateway {
    config: GatewayConfig,
    events: EventBus,
    manager: Arc<ConnectionManager>,
    metrics: Arc<MetricsCollector>,
    query: Arc<QueryExecutionService>,
    schema_cache: Arc<SchemaCache>,
    monitor: Arc<PerformanceMonitor>,
}

impl DatabaseGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let manager = Arc::new(ConnectionManager::new(events.clone()));
        let metrics = Arc::new(MetricsCollector::new(
            Arc::clone(&manager),
            config.monitoring.slow_query_threshold_ms,
        ));
        let query = Arc::new(QueryExecutionService::new(
            Arc::clone(&manager),
            Arc::clone(&metrics),
            events.clone(),
            config.max_query_history,
        ));
        let schema_cache = Arc::new(SchemaCache::new(
            Arc::clone(&manager),
            &config.cache,
            events.clone(),
        ));
        let monitor = Arc::new(PerformanceMonitor::new(
            Arc::clone(&metrics),
            config.monitoring.clone(),
            events.clone(),
        ));

        Self {
            config,
            events,
            manager,
            metrics,
            query,
            schema_cache,
            monitor,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn query(&self) -> &Arc<QueryExecutionService> {
        &self.query
    }

    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.schema_cache
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Stop monitoring and disconnect everything, best-effort
    pub async fn shutdown(&self) {
        info!("shutting down gateway core");
        self.monitor.stop().await;
        let failures = self.manager.disconnect_all().await;
        for (id, error) in failures {
            tracing::warn!(connection = %id, "disconnect during shutdown failed: {}", error);
        }
        info!("gateway core shut down");
    }
}

impl Default for DatabaseGateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

/// Install the process-wide tracing subscriber with env-filter support.
/// Call once at startup; returns quietly when a subscriber is already set.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gateway_wiring() {
        let gateway = DatabaseGateway::default();
        assert!(gateway.manager().current_id().await.is_none());
        assert!(!gateway.monitor().is_running().await);
        assert!(gateway.schema_cache().is_empty().await);
        assert_eq!(gateway.config().cache.ttl_seconds, 300);
    }

    #[tokio::test]
    async fn test_shutdown_without_connections() {
        let gateway = DatabaseGateway::default();
        gateway.shutdown().await;
        assert!(!gateway.monitor().is_running().await);
    }

    #[tokio::test]
    async fn test_operations_require_active_connection() {
        let gateway = DatabaseGateway::default();
        let failure = gateway
            .handle_operation(OperationRequest::ListTables)
            .await
            .unwrap_err();
        assert!(failure.message.contains("no active connection"));
    }
}
