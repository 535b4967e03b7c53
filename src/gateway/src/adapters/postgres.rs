//! PostgreSQL adapter backed by a sqlx connection pool
//!
//! Placeholder syntax is `$1`, `$2`, ... Catalog discovery goes through
//! information_schema for tables, columns and foreign keys and through
//! pg_catalog for indexes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::{returns_rows, row_bool, row_str, row_u32, DatabaseAdapter};
use crate::config::DatabaseConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    ColumnInfo, DatabaseType, ForeignKeyAction, ForeignKeyInfo, IndexInfo, PoolStatus,
    QueryOptions, QueryResult, RowMap, SchemaInfo, TableInfo,
};

/// PostgreSQL adapter
pub struct PostgresAdapter {
    config: DatabaseConfig,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresAdapter {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> GatewayResult<PgPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::connection("postgres adapter is not connected"))
    }

    /// Execute one statement against the pool, translating driver failures
    /// into a failed `QueryResult` rather than an error.
    async fn run_statement(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        let pool = self.pool().await?;
        let timeout = Duration::from_millis(
            options
                .timeout_ms
                .unwrap_or(self.config.request_timeout_seconds * 1000),
        );
        let started = Instant::now();

        let outcome = if returns_rows(query) {
            let fetch = async {
                let mut q = sqlx::query(query);
                for param in &options.params {
                    q = bind_json_param(q, param);
                }
                q.fetch_all(&pool).await
            };
            match tokio::time::timeout(timeout, fetch).await {
                Ok(Ok(rows)) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    let mut mapped: Vec<RowMap> = rows.iter().map(pg_row_to_json).collect();
                    if let Some(max) = options.max_rows {
                        mapped.truncate(max);
                    }
                    Ok(QueryResult::with_rows(mapped, elapsed))
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("query timed out after {:?}", timeout)),
            }
        } else {
            let exec = async {
                let mut q = sqlx::query(query);
                for param in &options.params {
                    q = bind_json_param(q, param);
                }
                q.execute(&pool).await
            };
            match tokio::time::timeout(timeout, exec).await {
                Ok(Ok(done)) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    Ok(QueryResult::with_rows_affected(done.rows_affected(), elapsed))
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("statement timed out after {:?}", timeout)),
            }
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(message) => {
                debug!("postgres statement failed: {}", message);
                Ok(QueryResult::failed(
                    message,
                    started.elapsed().as_millis() as u64,
                ))
            }
        }
    }

    /// Catalog helper: run a metadata query and fail hard when the driver
    /// reports an error, since the caller cannot interpret a partial result.
    async fn catalog_query(
        &self,
        query: &str,
        params: Vec<serde_json::Value>,
    ) -> GatewayResult<Vec<RowMap>> {
        let result = self
            .run_statement(query, &QueryOptions::with_params(params))
            .await?;
        if !result.success {
            return Err(GatewayError::query(
                result
                    .error
                    .unwrap_or_else(|| "catalog query failed".to_string()),
            ));
        }
        Ok(result.rows)
    }

    async fn fetch_columns(&self, table: &str) -> GatewayResult<Vec<ColumnInfo>> {
        let rows = self
            .catalog_query(
                r#"SELECT
                    c.column_name::text AS column_name,
                    c.data_type::text AS data_type,
                    c.ordinal_position::int AS ordinal_position,
                    (c.is_nullable = 'YES') AS nullable,
                    (c.is_identity = 'YES'
                        OR COALESCE(c.column_default, '') LIKE 'nextval(%') AS is_identity,
                    c.character_maximum_length::int AS character_maximum_length,
                    c.numeric_precision::int AS numeric_precision,
                    c.numeric_scale::int AS numeric_scale,
                    c.column_default::text AS column_default,
                    EXISTS (
                        SELECT 1
                        FROM information_schema.table_constraints tc
                        JOIN information_schema.key_column_usage kcu
                            ON tc.constraint_name = kcu.constraint_name
                            AND tc.table_schema = kcu.table_schema
                        WHERE tc.constraint_type = 'PRIMARY KEY'
                            AND tc.table_schema = c.table_schema
                            AND tc.table_name = c.table_name
                            AND kcu.column_name = c.column_name
                    ) AS is_primary_key
                FROM information_schema.columns c
                WHERE c.table_schema = 'public' AND c.table_name = $1
                ORDER BY c.ordinal_position"#,
                vec![serde_json::json!(table)],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row_str(row, "column_name").unwrap_or_default(),
                data_type: row_str(row, "data_type").unwrap_or_default(),
                ordinal_position: row_u32(row, "ordinal_position").unwrap_or(0),
                nullable: row_bool(row, "nullable"),
                is_identity: row_bool(row, "is_identity"),
                is_primary_key: row_bool(row, "is_primary_key"),
                max_length: row_u32(row, "character_maximum_length"),
                precision: row_u32(row, "numeric_precision"),
                scale: row_u32(row, "numeric_scale"),
                default_value: row_str(row, "column_default"),
            })
            .collect())
    }

    async fn fetch_indexes(&self, table: &str) -> GatewayResult<Vec<IndexInfo>> {
        let rows = self
            .catalog_query(
                r#"SELECT
                    i.relname::text AS index_name,
                    a.attname::text AS column_name,
                    ix.indisunique AS is_unique,
                    ix.indisprimary AS is_primary,
                    am.amname::text AS index_type
                FROM pg_class t
                JOIN pg_namespace n ON t.relnamespace = n.oid
                JOIN pg_index ix ON t.oid = ix.indrelid
                JOIN pg_class i ON ix.indexrelid = i.oid
                JOIN pg_am am ON i.relam = am.oid
                JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
                WHERE n.nspname = 'public' AND t.relname = $1
                ORDER BY i.relname, a.attnum"#,
                vec![serde_json::json!(table)],
            )
            .await?;

        let mut indexes: HashMap<String, IndexInfo> = HashMap::new();
        for row in &rows {
            let name = row_str(row, "index_name").unwrap_or_default();
            let column = row_str(row, "column_name").unwrap_or_default();
            let entry = indexes.entry(name.clone()).or_insert_with(|| IndexInfo {
                name,
                columns: Vec::new(),
                unique: row_bool(row, "is_unique"),
                primary: row_bool(row, "is_primary"),
                index_type: row_str(row, "index_type"),
            });
            entry.columns.push(column);
        }

        let mut out: Vec<IndexInfo> = indexes.into_values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn fetch_foreign_keys(&self, table: &str) -> GatewayResult<Vec<ForeignKeyInfo>> {
        let rows = self
            .catalog_query(
                r#"SELECT
                    tc.constraint_name::text AS constraint_name,
                    kcu.column_name::text AS source_column,
                    ccu.table_name::text AS target_table,
                    ccu.column_name::text AS target_column,
                    rc.delete_rule::text AS delete_rule,
                    rc.update_rule::text AS update_rule
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage ccu
                    ON ccu.constraint_name = tc.constraint_name
                    AND ccu.table_schema = tc.table_schema
                JOIN information_schema.referential_constraints rc
                    ON tc.constraint_name = rc.constraint_name
                    AND tc.table_schema = rc.constraint_schema
                WHERE tc.constraint_type = 'FOREIGN KEY'
                    AND tc.table_schema = 'public'
                    AND tc.table_name = $1
                ORDER BY tc.constraint_name, kcu.ordinal_position"#,
                vec![serde_json::json!(table)],
            )
            .await?;

        let mut fks: HashMap<String, ForeignKeyInfo> = HashMap::new();
        for row in &rows {
            let name = row_str(row, "constraint_name").unwrap_or_default();
            let entry = fks.entry(name.clone()).or_insert_with(|| ForeignKeyInfo {
                name,
                columns: Vec::new(),
                referenced_table: row_str(row, "target_table").unwrap_or_default(),
                referenced_columns: Vec::new(),
                on_delete: ForeignKeyAction::parse(
                    &row_str(row, "delete_rule").unwrap_or_default(),
                ),
                on_update: ForeignKeyAction::parse(
                    &row_str(row, "update_rule").unwrap_or_default(),
                ),
            });
            entry
                .columns
                .push(row_str(row, "source_column").unwrap_or_default());
            entry
                .referenced_columns
                .push(row_str(row, "target_column").unwrap_or_default());
        }

        let mut out: Vec<ForeignKeyInfo> = fks.into_values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    async fn connect(&self) -> GatewayResult<()> {
        let url = self.config.connection_url(DatabaseType::Postgres)?;
        let pool = PgPoolOptions::new()
            .max_connections(self.config.pool.max_connections)
            .min_connections(self.config.pool.min_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(self.config.pool.idle_timeout_seconds))
            .connect(&url)
            .await
            .map_err(|e| {
                GatewayError::connection(format!("failed to create postgres pool: {}", e))
            })?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                GatewayError::connection(format!("postgres connection test failed: {}", e))
            })?;

        *self.pool.write().await = Some(pool);
        info!(
            host = %self.config.host,
            database = %self.config.database,
            "postgres connection pool created"
        );
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            info!("closing postgres connection pool");
            pool.close().await;
        }
        Ok(())
    }

    async fn execute_query(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        let result = self.run_statement(query, options).await?;
        Ok(result.with_metadata(query, &options.params))
    }

    async fn get_tables(&self) -> GatewayResult<Vec<TableInfo>> {
        let rows = self
            .catalog_query(
                "SELECT table_schema::text AS table_schema, table_name::text AS table_name \
                 FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 AND table_type = 'BASE TABLE' \
                 ORDER BY table_schema, table_name",
                Vec::new(),
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let mut table = TableInfo::new(row_str(row, "table_name").unwrap_or_default());
                table.schema = row_str(row, "table_schema");
                table
            })
            .collect())
    }

    async fn get_table_info(&self, table: &str) -> GatewayResult<TableInfo> {
        let columns = self.fetch_columns(table).await?;
        if columns.is_empty() {
            return Err(GatewayError::schema(format!(
                "table '{}' not found in database '{}'",
                table, self.config.database
            )));
        }

        let mut info = TableInfo::new(table);
        info.schema = Some("public".to_string());
        info.columns = columns;

        // index and key discovery is best-effort once the table is known
        match self.fetch_indexes(table).await {
            Ok(indexes) => info.indexes = indexes,
            Err(e) => warn!("index discovery failed for '{}': {}", table, e),
        }
        match self.fetch_foreign_keys(table).await {
            Ok(fks) => info.foreign_keys = fks,
            Err(e) => warn!("foreign key discovery failed for '{}': {}", table, e),
        }

        Ok(info)
    }

    async fn get_schema(&self, include_details: bool) -> GatewayResult<SchemaInfo> {
        let mut tables = self.get_tables().await?;

        if include_details {
            // one round trip per table; a failing table keeps empty detail
            // arrays instead of aborting the whole snapshot
            for table in &mut tables {
                match self.get_table_info(&table.name).await {
                    Ok(detailed) => *table = detailed,
                    Err(e) => {
                        warn!("skipping details for table '{}': {}", table.name, e);
                    }
                }
            }
        }

        Ok(SchemaInfo {
            database: self.config.database.clone(),
            database_type: DatabaseType::Postgres,
            tables,
            collected_at: Utc::now(),
        })
    }

    async fn test_connection(&self) -> bool {
        match self.pool.read().await.clone() {
            Some(pool) => sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok(),
            None => false,
        }
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn pool_status(&self) -> PoolStatus {
        match self.pool.try_read().ok().and_then(|guard| guard.clone()) {
            Some(pool) => PoolStatus::new(
                pool.size(),
                pool.num_idle() as u32,
                self.config.pool.max_connections,
            ),
            None => PoolStatus::default(),
        }
    }

    fn is_connected(&self) -> bool {
        self.pool
            .try_read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

/// Bind one JSON value in the postgres placeholder position
fn bind_json_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &serde_json::Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        serde_json::Value::Null => query.bind(None::<String>),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => query.bind(s.clone()),
        // arrays and objects travel as jsonb
        other => query.bind(other.clone()),
    }
}

/// Normalize one driver row into an ordered column -> JSON value mapping
fn pg_row_to_json(row: &PgRow) -> RowMap {
    let mut map = RowMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = pg_value_to_json(row, idx, column.type_info().name());
        map.insert(column.name().to_string(), value);
    }
    map
}

fn pg_value_to_json(row: &PgRow, idx: usize, type_name: &str) -> serde_json::Value {
    use serde_json::json;

    match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "NUMERIC" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(idx)
            .map(|v| match v {
                Some(d) => json!(d.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .map(|v| match v {
                Some(u) => json!(u.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .map(|v| v.unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| match v {
                Some(ts) => json!(ts.to_rfc3339()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| match v {
                Some(ts) => json!(ts.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| match v {
                Some(d) => json!(d.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .map(|v| match v {
                Some(t) => json!(t.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| match v {
                Some(bytes) => json!(hex_string(&bytes)),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        // text-ish and everything unrecognized: best-effort string decode
        _ => row
            .try_get::<Option<String>, _>(idx)
            .map(|v| match v {
                Some(s) => json!(s),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
