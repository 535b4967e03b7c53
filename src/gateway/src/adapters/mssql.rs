//! Microsoft SQL Server adapter backed by tiberius
//!
//! tiberius exposes a single TDS client per TCP stream, so pooling is
//! provided by a deadpool managed pool whose recycle probe is `SELECT 1`.
//! Placeholder syntax is `@P1`, `@P2`, ... Catalog discovery goes through
//! INFORMATION_SCHEMA and the sys catalog views.

use async_trait::async_trait;
use deadpool::managed::{self, Metrics, Pool, RecycleError, RecycleResult};
use deadpool::Runtime;
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tiberius::{AuthMethod, Client, ColumnData, Config as TdsConfig, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::adapters::{returns_rows, row_bool, row_str, row_u32, DatabaseAdapter};
use crate::config::DatabaseConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    ColumnInfo, DatabaseType, ForeignKeyAction, ForeignKeyInfo, IndexInfo, PoolStatus,
    QueryOptions, QueryResult, RowMap, SchemaInfo, TableInfo,
};
use chrono::Utc;

type MssqlClient = Client<Compat<TcpStream>>;
type MssqlPool = Pool<MssqlManager>;

/// deadpool manager creating authenticated TDS clients
pub struct MssqlManager {
    config: DatabaseConfig,
}

impl MssqlManager {
    fn tds_config(&self) -> TdsConfig {
        let mut tds = TdsConfig::new();
        tds.host(&self.config.host);
        tds.port(self.config.port);
        tds.database(&self.config.database);
        tds.authentication(AuthMethod::sql_server(
            &self.config.username,
            &self.config.password,
        ));
        tds.encryption(if self.config.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::NotSupported
        });
        if self.config.trust_server_certificate {
            tds.trust_cert();
        }
        tds
    }

    async fn open_client(&self) -> GatewayResult<MssqlClient> {
        let tds = self.tds_config();
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_seconds);

        let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(tds.get_addr()))
            .await
            .map_err(|_| {
                GatewayError::connection(format!(
                    "sql server connect timed out after {:?}",
                    connect_timeout
                ))
            })?
            .map_err(|e| GatewayError::connection(format!("failed to reach sql server: {}", e)))?;
        tcp.set_nodelay(true).ok();

        Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| GatewayError::connection(format!("sql server login failed: {}", e)))
    }
}

#[async_trait]
impl managed::Manager for MssqlManager {
    type Type = MssqlClient;
    type Error = GatewayError;

    async fn create(&self) -> Result<MssqlClient, GatewayError> {
        self.open_client().await
    }

    async fn recycle(
        &self,
        client: &mut MssqlClient,
        _metrics: &Metrics,
    ) -> RecycleResult<GatewayError> {
        client
            .execute("SELECT 1", &[])
            .await
            .map_err(|e| {
                RecycleError::Backend(GatewayError::connection(format!(
                    "sql server liveness probe failed: {}",
                    e
                )))
            })?;
        Ok(())
    }
}

/// SQL Server adapter
pub struct MssqlAdapter {
    config: DatabaseConfig,
    pool: RwLock<Option<MssqlPool>>,
}

impl MssqlAdapter {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> GatewayResult<MssqlPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::connection("mssql adapter is not connected"))
    }

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

        let params: Vec<MssqlParam> = options.params.iter().cloned().map(MssqlParam).collect();
        let refs: Vec<&dyn tiberius::ToSql> =
            params.iter().map(|p| p as &dyn tiberius::ToSql).collect();

        let run = async {
            let mut client = pool
                .get()
                .await
                .map_err(|e| format!("failed to acquire sql server connection: {}", e))?;

            if returns_rows(query) {
                let stream = client
                    .query(query, &refs)
                    .await
                    .map_err(|e| e.to_string())?;
                let rows = stream.into_first_result().await.map_err(|e| e.to_string())?;
                let mut mapped: Vec<RowMap> = rows.iter().map(mssql_row_to_json).collect();
                if let Some(max) = options.max_rows {
                    mapped.truncate(max);
                }
                Ok::<_, String>((mapped, 0u64))
            } else {
                let done = client
                    .execute(query, &refs)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok((Vec::new(), done.total()))
            }
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok((rows, affected))) => {
                let elapsed = started.elapsed().as_millis() as u64;
                if returns_rows(query) {
                    Ok(QueryResult::with_rows(rows, elapsed))
                } else {
                    Ok(QueryResult::with_rows_affected(affected, elapsed))
                }
            }
            Ok(Err(message)) => {
                debug!("sql server statement failed: {}", message);
                Ok(QueryResult::failed(
                    message,
                    started.elapsed().as_millis() as u64,
                ))
            }
            Err(_) => Ok(QueryResult::failed(
                format!("statement timed out after {:?}", timeout),
                started.elapsed().as_millis() as u64,
            )),
        }
    }

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
                    c.COLUMN_NAME AS column_name,
                    c.DATA_TYPE AS data_type,
                    c.ORDINAL_POSITION AS ordinal_position,
                    CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS nullable,
                    COLUMNPROPERTY(
                        OBJECT_ID(c.TABLE_SCHEMA + '.' + c.TABLE_NAME),
                        c.COLUMN_NAME,
                        'IsIdentity'
                    ) AS is_identity,
                    CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS is_primary_key,
                    c.CHARACTER_MAXIMUM_LENGTH AS character_maximum_length,
                    c.NUMERIC_PRECISION AS numeric_precision,
                    c.NUMERIC_SCALE AS numeric_scale,
                    c.COLUMN_DEFAULT AS column_default
                FROM INFORMATION_SCHEMA.COLUMNS c
                LEFT JOIN (
                    SELECT kcu.TABLE_SCHEMA, kcu.TABLE_NAME, kcu.COLUMN_NAME
                    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                        ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                        AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA
                    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                ) pk ON pk.TABLE_SCHEMA = c.TABLE_SCHEMA
                    AND pk.TABLE_NAME = c.TABLE_NAME
                    AND pk.COLUMN_NAME = c.COLUMN_NAME
                WHERE c.TABLE_NAME = @P1
                ORDER BY c.ORDINAL_POSITION"#,
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
                    i.name AS index_name,
                    c.name AS column_name,
                    i.is_unique AS is_unique,
                    i.is_primary_key AS is_primary,
                    i.type_desc AS index_type
                FROM sys.indexes i
                JOIN sys.index_columns ic
                    ON i.object_id = ic.object_id AND i.index_id = ic.index_id
                JOIN sys.columns c
                    ON ic.object_id = c.object_id AND ic.column_id = c.column_id
                WHERE i.object_id = OBJECT_ID(@P1) AND i.name IS NOT NULL
                ORDER BY i.name, ic.key_ordinal"#,
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
                    fk.name AS constraint_name,
                    pc.name AS source_column,
                    rt.name AS target_table,
                    rc.name AS target_column,
                    fk.delete_referential_action_desc AS delete_rule,
                    fk.update_referential_action_desc AS update_rule
                FROM sys.foreign_keys fk
                JOIN sys.foreign_key_columns fkc
                    ON fk.object_id = fkc.constraint_object_id
                JOIN sys.columns pc
                    ON fkc.parent_object_id = pc.object_id
                    AND fkc.parent_column_id = pc.column_id
                JOIN sys.columns rc
                    ON fkc.referenced_object_id = rc.object_id
                    AND fkc.referenced_column_id = rc.column_id
                JOIN sys.tables rt ON fkc.referenced_object_id = rt.object_id
                WHERE fk.parent_object_id = OBJECT_ID(@P1)
                ORDER BY fk.name, fkc.constraint_column_id"#,
                vec![serde_json::json!(table)],
            )
            .await?;

        let mut fks: HashMap<String, ForeignKeyInfo> = HashMap::new();
        for row in &rows {
            let name = row_str(row, "constraint_name").unwrap_or_default();
            // sys catalog action names use underscores (SET_NULL)
            let delete_rule = row_str(row, "delete_rule")
                .unwrap_or_default()
                .replace('_', " ");
            let update_rule = row_str(row, "update_rule")
                .unwrap_or_default()
                .replace('_', " ");
            let entry = fks.entry(name.clone()).or_insert_with(|| ForeignKeyInfo {
                name,
                columns: Vec::new(),
                referenced_table: row_str(row, "target_table").unwrap_or_default(),
                referenced_columns: Vec::new(),
                on_delete: ForeignKeyAction::parse(&delete_rule),
                on_update: ForeignKeyAction::parse(&update_rule),
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
impl DatabaseAdapter for MssqlAdapter {
    async fn connect(&self) -> GatewayResult<()> {
        let manager = MssqlManager {
            config: self.config.clone(),
        };
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_seconds);

        let pool = Pool::builder(manager)
            .max_size(self.config.pool.max_connections as usize)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(connect_timeout))
            .create_timeout(Some(connect_timeout))
            .build()
            .map_err(|e| {
                GatewayError::connection(format!("failed to build sql server pool: {}", e))
            })?;

        // establish and probe one client before declaring the adapter
        // connected, so a bad config never half-connects
        {
            let mut client: managed::Object<MssqlManager> = pool.get().await.map_err(|e| {
                GatewayError::connection(format!("sql server connection failed: {}", e))
            })?;
            client.execute("SELECT 1", &[]).await.map_err(|e| {
                GatewayError::connection(format!("sql server connection test failed: {}", e))
            })?;
        }

        *self.pool.write().await = Some(pool);
        info!(
            host = %self.config.host,
            database = %self.config.database,
            "sql server connection pool created"
        );
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            info!("closing sql server connection pool");
            pool.close();
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
                "SELECT TABLE_SCHEMA AS table_schema, TABLE_NAME AS table_name \
                 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_SCHEMA, TABLE_NAME",
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
        info.schema = Some("dbo".to_string());
        info.columns = columns;

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
            database_type: DatabaseType::SqlServer,
            tables,
            collected_at: Utc::now(),
        })
    }

    async fn test_connection(&self) -> bool {
        let pool = match self.pool.read().await.clone() {
            Some(pool) => pool,
            None => return false,
        };
        match pool.get().await {
            Ok(mut client) => client.execute("SELECT 1", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    fn pool_status(&self) -> PoolStatus {
        match self.pool.try_read().ok().and_then(|guard| guard.clone()) {
            Some(pool) => {
                let status = pool.status();
                PoolStatus::new(
                    status.size as u32,
                    status.available as u32,
                    status.max_size as u32,
                )
            }
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

/// Owned parameter wrapper binding JSON values as typed TDS parameters.
/// Values are never interpolated into SQL text.
struct MssqlParam(serde_json::Value);

impl tiberius::ToSql for MssqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match &self.0 {
            serde_json::Value::Null => ColumnData::String(None),
            serde_json::Value::Bool(b) => ColumnData::Bit(Some(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ColumnData::I64(Some(i))
                } else {
                    ColumnData::F64(n.as_f64())
                }
            }
            serde_json::Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            // arrays and objects travel as their JSON text
            other => ColumnData::String(Some(Cow::Owned(other.to_string()))),
        }
    }
}

/// Normalize one TDS row into an ordered column -> JSON value mapping.
/// Typed columns are probed most-specific-first so BIT does not surface as
/// raw bytes.
fn mssql_row_to_json(row: &tiberius::Row) -> RowMap {
    let mut map = RowMap::new();
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    for (idx, name) in names.into_iter().enumerate() {
        map.insert(name, mssql_value_to_json(row, idx));
    }
    map
}

fn mssql_value_to_json(row: &tiberius::Row, idx: usize) -> serde_json::Value {
    use serde_json::json;

    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
        return json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
        return json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
        return json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<uuid::Uuid, _>(idx) {
        return json!(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return json!(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDate, _>(idx) {
        return json!(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveTime, _>(idx) {
        return json!(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<&[u8], _>(idx) {
        let mut hex = String::with_capacity(2 + v.len() * 2);
        hex.push_str("0x");
        for b in v {
            hex.push_str(&format!("{:02x}", b));
        }
        return json!(hex);
    }

    serde_json::Value::Null
}
