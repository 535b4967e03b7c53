//! TTL cache for schema metadata
//!
//! Keyed by connection identifier plus request shape. Entries expire after
//! the configured time-to-live and are evicted lazily on lookup; population
//! always goes through the current adapter, never directly to a backend.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::GatewayResult;
use crate::events::{EventBus, GatewayEvent};
use crate::manager::ConnectionManager;
use crate::types::{SchemaInfo, SchemaStatistics, TableInfo};

/// Request shape portion of the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SchemaRequest {
    Tables,
    Table(String),
    Schema { include_details: bool },
    Statistics,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SchemaCacheKey {
    connection: String,
    request: SchemaRequest,
}

#[derive(Clone)]
enum CachedPayload {
    Tables(Vec<TableInfo>),
    Table(TableInfo),
    Schema(SchemaInfo),
    Statistics(SchemaStatistics),
}

struct CacheEntry {
    stored_at: Instant,
    payload: CachedPayload,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Schema metadata cache in front of the current adapter
pub struct SchemaCache {
    manager: Arc<ConnectionManager>,
    ttl: Duration,
    entries: RwLock<HashMap<SchemaCacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    events: EventBus,
}

impl SchemaCache {
    pub fn new(manager: Arc<ConnectionManager>, config: &CacheConfig, events: EventBus) -> Self {
        Self::with_ttl(manager, Duration::from_secs(config.ttl_seconds), events)
    }

    /// Cache with an explicit TTL
    pub fn with_ttl(manager: Arc<ConnectionManager>, ttl: Duration, events: EventBus) -> Self {
        Self {
            manager,
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            events,
        }
    }

    /// Cached table listing for the current connection
    pub async fn get_tables(&self) -> GatewayResult<Vec<TableInfo>> {
        let key = self.key(SchemaRequest::Tables).await?;
        if let Some(CachedPayload::Tables(tables)) = self.lookup(&key).await {
            return Ok(tables);
        }

        let adapter = self.manager.get_current_connection().await?;
        let tables = adapter.get_tables().await?;
        self.store(key, CachedPayload::Tables(tables.clone())).await;
        Ok(tables)
    }

    /// Cached table detail for the current connection
    pub async fn get_table_info(&self, table: &str) -> GatewayResult<TableInfo> {
        let key = self.key(SchemaRequest::Table(table.to_string())).await?;
        if let Some(CachedPayload::Table(info)) = self.lookup(&key).await {
            return Ok(info);
        }

        let adapter = self.manager.get_current_connection().await?;
        let info = adapter.get_table_info(table).await?;
        self.store(key, CachedPayload::Table(info.clone())).await;
        Ok(info)
    }

    /// Cached schema snapshot for the current connection
    pub async fn get_schema(&self, include_details: bool) -> GatewayResult<SchemaInfo> {
        let key = self.key(SchemaRequest::Schema { include_details }).await?;
        if let Some(CachedPayload::Schema(schema)) = self.lookup(&key).await {
            return Ok(schema);
        }

        let adapter = self.manager.get_current_connection().await?;
        let schema = adapter.get_schema(include_details).await?;
        self.store(key, CachedPayload::Schema(schema.clone())).await;
        self.events.publish(GatewayEvent::SchemaRefreshed {
            scope: schema.database.clone(),
            timestamp: Utc::now(),
        });
        Ok(schema)
    }

    /// Cached aggregated statistics for the current connection
    pub async fn get_statistics(&self) -> GatewayResult<SchemaStatistics> {
        let key = self.key(SchemaRequest::Statistics).await?;
        if let Some(CachedPayload::Statistics(stats)) = self.lookup(&key).await {
            return Ok(stats);
        }

        let adapter = self.manager.get_current_connection().await?;
        let schema = adapter.get_schema(true).await?;
        let stats = SchemaStatistics::from_schema(&schema);
        self.store(key, CachedPayload::Statistics(stats.clone()))
            .await;
        Ok(stats)
    }

    /// Drop every cached entry immediately
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        debug!("schema cache cleared");
        self.events.publish(GatewayEvent::SchemaCacheCleared {
            timestamp: Utc::now(),
        });
    }

    /// Number of live (possibly stale) entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Hit/miss counters since construction
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn key(&self, request: SchemaRequest) -> GatewayResult<SchemaCacheKey> {
        let connection = self
            .manager
            .current_id()
            .await
            .ok_or_else(crate::error::GatewayError::no_active_connection)?;
        Ok(SchemaCacheKey {
            connection,
            request,
        })
    }

    /// Valid-entry lookup with lazy eviction of expired entries
    async fn lookup(&self, key: &SchemaCacheKey) -> Option<CachedPayload> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.payload.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn store(&self, key: SchemaCacheKey, payload: CachedPayload) {
        self.entries.write().await.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                payload,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DatabaseAdapter;
    use crate::error::GatewayError;
    use crate::types::{DatabaseType, PoolStatus, QueryOptions, QueryResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Adapter counting schema fetches
    struct CountingAdapter {
        schema_calls: AtomicUsize,
        table_calls: AtomicUsize,
    }

    impl CountingAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                schema_calls: AtomicUsize::new(0),
                table_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DatabaseAdapter for CountingAdapter {
        async fn connect(&self) -> GatewayResult<()> {
            Ok(())
        }

        async fn disconnect(&self) -> GatewayResult<()> {
            Ok(())
        }

        async fn execute_query(
            &self,
            _query: &str,
            _options: &QueryOptions,
        ) -> GatewayResult<QueryResult> {
            Ok(QueryResult::with_rows(Vec::new(), 0))
        }

        async fn get_tables(&self) -> GatewayResult<Vec<TableInfo>> {
            self.table_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![TableInfo::new("users")])
        }

        async fn get_table_info(&self, table: &str) -> GatewayResult<TableInfo> {
            if table == "ghost" {
                return Err(GatewayError::schema(format!("table '{}' not found", table)));
            }
            Ok(TableInfo::new(table))
        }

        async fn get_schema(&self, _include_details: bool) -> GatewayResult<SchemaInfo> {
            self.schema_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SchemaInfo {
                database: "appdb".into(),
                database_type: DatabaseType::Postgres,
                tables: vec![TableInfo::new("users")],
                collected_at: Utc::now(),
            })
        }

        async fn test_connection(&self) -> bool {
            true
        }

        fn database_type(&self) -> DatabaseType {
            DatabaseType::Postgres
        }

        fn pool_status(&self) -> PoolStatus {
            PoolStatus::default()
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    async fn cache_with_ttl(ttl: Duration) -> (SchemaCache, Arc<CountingAdapter>) {
        let events = EventBus::new(16);
        let manager = Arc::new(ConnectionManager::new(events.clone()));
        let adapter = CountingAdapter::new();
        manager
            .create_connection_with_adapter("main", Arc::clone(&adapter) as Arc<dyn DatabaseAdapter>)
            .await
            .unwrap();
        (
            SchemaCache::with_ttl(manager, ttl, events),
            adapter,
        )
    }

    #[tokio::test]
    async fn test_second_lookup_is_served_from_cache() {
        let (cache, adapter) = cache_with_ttl(Duration::from_secs(60)).await;

        let first = cache.get_statistics().await.unwrap();
        let second = cache.get_statistics().await.unwrap();

        assert_eq!(adapter.schema_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.table_count, second.table_count);
        assert_eq!(first.collected_at, second.collected_at);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_fresh_fetch() {
        let (cache, adapter) = cache_with_ttl(Duration::from_millis(20)).await;

        cache.get_tables().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.get_tables().await.unwrap();

        assert_eq!(adapter.table_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_drops_entries() {
        let (cache, adapter) = cache_with_ttl(Duration::from_secs(60)).await;

        cache.get_tables().await.unwrap();
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.is_empty().await);

        cache.get_tables().await.unwrap();
        assert_eq!(adapter.table_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_table_error_is_not_cached() {
        let (cache, _) = cache_with_ttl(Duration::from_secs(60)).await;

        let err = cache.get_table_info("ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::SchemaValidation { .. }));
        assert!(err.to_string().contains("ghost"));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_keys_differ_per_request_shape() {
        let (cache, _) = cache_with_ttl(Duration::from_secs(60)).await;

        cache.get_schema(false).await.unwrap();
        cache.get_schema(true).await.unwrap();
        cache.get_tables().await.unwrap();

        assert_eq!(cache.len().await, 3);
    }
}
