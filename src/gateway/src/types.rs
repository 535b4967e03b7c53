//! Shared data model for the gateway core
//!
//! Result, schema-metadata and monitoring types exchanged between the
//! adapters, the execution services and the operation boundary. Everything
//! here is serde-serializable so the tool-invocation layer can pass payloads
//! through unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::GatewayError;

/// Backend discriminator for adapter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Microsoft SQL Server
    #[serde(rename = "mssql")]
    SqlServer,
    /// MySQL / MariaDB
    #[serde(rename = "mysql")]
    MySql,
    /// PostgreSQL
    #[serde(rename = "postgres")]
    Postgres,
}

impl DatabaseType {
    /// Statement that opens an explicit transaction in this dialect
    pub fn begin_statement(&self) -> &'static str {
        match self {
            Self::SqlServer => "BEGIN TRANSACTION",
            Self::MySql => "START TRANSACTION",
            Self::Postgres => "BEGIN",
        }
    }

    /// Statement that commits an explicit transaction
    pub fn commit_statement(&self) -> &'static str {
        match self {
            Self::SqlServer => "COMMIT TRANSACTION",
            Self::MySql | Self::Postgres => "COMMIT",
        }
    }

    /// Statement that rolls back an explicit transaction
    pub fn rollback_statement(&self) -> &'static str {
        match self {
            Self::SqlServer => "ROLLBACK TRANSACTION",
            Self::MySql | Self::Postgres => "ROLLBACK",
        }
    }

    /// Default server port for the backend
    pub fn default_port(&self) -> u16 {
        match self {
            Self::SqlServer => 1433,
            Self::MySql => 3306,
            Self::Postgres => 5432,
        }
    }
}

impl FromStr for DatabaseType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(Self::SqlServer),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(GatewayError::config(format!(
                "unknown backend type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlServer => write!(f, "mssql"),
            Self::MySql => write!(f, "mysql"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// Connection lifecycle status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Connection is registered but its last operation failed
    Error,
}

/// Registry entry describing one managed connection.
///
/// Owned exclusively by the connection manager; mutated only through
/// connect/disconnect transitions.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub database_type: DatabaseType,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ConnectionRecord {
    pub fn new(id: impl Into<String>, database_type: DatabaseType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            database_type,
            status: ConnectionStatus::Disconnected,
            created_at: now,
            last_used_at: now,
            error: None,
        }
    }
}

/// One row as an ordered column -> value mapping
pub type RowMap = serde_json::Map<String, serde_json::Value>;

/// Execution options for a single statement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Positional bind values, applied in the backend's placeholder syntax
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    /// Per-statement timeout override in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Truncate the result set after this many rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

impl QueryOptions {
    pub fn with_params(params: Vec<serde_json::Value>) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }
}

/// Context captured alongside a query result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub query: String,
    pub params: Vec<serde_json::Value>,
    pub executed_at: DateTime<Utc>,
}

/// Outcome of a single statement execution.
///
/// Produced once per execution call and never mutated after return. Driver
/// failures surface as `success = false` with the error text rather than a
/// propagated error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub rows: Vec<RowMap>,
    pub rows_affected: u64,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<QueryMetadata>,
}

impl QueryResult {
    /// Successful result carrying rows
    pub fn with_rows(rows: Vec<RowMap>, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            rows,
            rows_affected: 0,
            execution_time_ms,
            error: None,
            metadata: None,
        }
    }

    /// Successful result for a statement that modified rows
    pub fn with_rows_affected(rows_affected: u64, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            rows: Vec::new(),
            rows_affected,
            execution_time_ms,
            error: None,
            metadata: None,
        }
    }

    /// Failed result carrying the driver error text
    pub fn failed(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            rows_affected: 0,
            execution_time_ms,
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Attach the originating query text and parameters
    pub fn with_metadata(mut self, query: &str, params: &[serde_json::Value]) -> Self {
        self.metadata = Some(QueryMetadata {
            query: query.to_string(),
            params: params.to_vec(),
            executed_at: Utc::now(),
        });
        self
    }
}

/// Referential action on a foreign key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForeignKeyAction {
    Cascade,
    SetNull,
    SetDefault,
    #[default]
    NoAction,
}

impl ForeignKeyAction {
    /// Parse the catalog string form (`delete_rule` / `update_rule`).
    /// RESTRICT normalizes to NO ACTION.
    pub fn parse(action: &str) -> Self {
        match action.to_ascii_uppercase().as_str() {
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// Column metadata normalized across backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub ordinal_position: u32,
    pub nullable: bool,
    /// Identity / auto-increment flag
    pub is_identity: bool,
    pub is_primary_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// Index metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,
}

/// Foreign key metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

/// Table metadata. `get_tables` returns name/schema only; `get_table_info`
/// fills in columns, indexes and foreign keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Primary key columns in ordinal order
    pub fn primary_key_columns(&self) -> Vec<&ColumnInfo> {
        let mut cols: Vec<&ColumnInfo> =
            self.columns.iter().filter(|c| c.is_primary_key).collect();
        cols.sort_by_key(|c| c.ordinal_position);
        cols
    }
}

/// Full schema snapshot for one database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub database: String,
    pub database_type: DatabaseType,
    pub tables: Vec<TableInfo>,
    pub collected_at: DateTime<Utc>,
}

/// Aggregated schema statistics derived from a detailed schema snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaStatistics {
    pub database: String,
    pub table_count: usize,
    pub column_count: usize,
    pub index_count: usize,
    pub foreign_key_count: usize,
    /// Table with the most columns, if any tables exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widest_table: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl SchemaStatistics {
    /// Aggregate counts out of a detailed schema snapshot
    pub fn from_schema(schema: &SchemaInfo) -> Self {
        let widest_table = schema
            .tables
            .iter()
            .max_by_key(|t| t.columns.len())
            .filter(|t| !t.columns.is_empty())
            .map(|t| t.name.clone());

        Self {
            database: schema.database.clone(),
            table_count: schema.tables.len(),
            column_count: schema.tables.iter().map(|t| t.columns.len()).sum(),
            index_count: schema.tables.iter().map(|t| t.indexes.len()).sum(),
            foreign_key_count: schema.tables.iter().map(|t| t.foreign_keys.len()).sum(),
            widest_table,
            collected_at: schema.collected_at,
        }
    }
}

/// Point-in-time connection pool snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
    pub max_size: u32,
    pub utilization_percent: f64,
}

impl PoolStatus {
    pub fn new(total: u32, idle: u32, max_size: u32) -> Self {
        let active = total.saturating_sub(idle);
        let utilization = if max_size > 0 {
            f64::from(active) / f64::from(max_size) * 100.0
        } else {
            0.0
        };
        Self {
            total_connections: total,
            active_connections: active,
            idle_connections: idle,
            max_size,
            utilization_percent: utilization,
        }
    }
}

/// Query-timing snapshot over the rolling metrics window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerySnapshot {
    pub count: u64,
    pub slow_count: u64,
    pub failed_count: u64,
    pub avg_time_ms: f64,
    pub min_time_ms: u64,
    pub max_time_ms: u64,
    /// Queries per second across the window covered by the buffer
    pub per_second: f64,
}

/// Best-effort system resource snapshot. Advisory telemetry only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

/// Immutable point-in-time measurement produced by the metrics collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub timestamp: DateTime<Utc>,
    pub pool: PoolStatus,
    pub queries: QuerySnapshot,
    pub system: SystemSnapshot,
}

/// Alert classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    PoolUtilization,
    SlowQuery,
    HighCpu,
    HighMemory,
    HighDisk,
    ConnectionTimeout,
    QueryTimeout,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PoolUtilization => "pool-utilization",
            Self::SlowQuery => "slow-query",
            Self::HighCpu => "high-cpu",
            Self::HighMemory => "high-memory",
            Self::HighDisk => "high-disk",
            Self::ConnectionTimeout => "connection-timeout",
            Self::QueryTimeout => "query-timeout",
        };
        write!(f, "{}", s)
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert lifecycle status. Transitions only move forward:
/// active -> acknowledged -> resolved, or active -> resolved directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// One detected threshold breach and its lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    /// Measurement that triggered the alert
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub status: AlertStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PerformanceAlert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            message: message.into(),
            value,
            created_at: Utc::now(),
            status: AlertStatus::Active,
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    /// Age of the alert since creation
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Aggregated statistics over the bounded query history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub avg_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slowest: Option<QueryHistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest: Option<QueryHistoryEntry>,
}

/// One recorded execution in the bounded history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Alert counts grouped by lifecycle status and severity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertSummary {
    pub active: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Performance report aggregated from the monitor's metric history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,
    pub samples: usize,
    pub avg_pool_utilization_percent: f64,
    pub peak_pool_utilization_percent: f64,
    pub avg_cpu_percent: f64,
    pub peak_cpu_percent: f64,
    pub avg_memory_percent: f64,
    pub peak_memory_percent: f64,
    pub total_queries: u64,
    pub slow_queries: u64,
    pub alerts: AlertSummary,
}
