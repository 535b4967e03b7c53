//! Operation boundary consumed by the tool-invocation layer
//!
//! Requests arrive already validated as `{operation, parameters}` pairs and
//! leave as typed success payloads or a structured `{message}` failure.
//! Nothing here knows about message framing or transport.

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::types::{
    PerformanceReport, PoolStatus, QueryResult, QueryStats, SchemaInfo, SchemaStatistics,
    TableInfo,
};
use crate::DatabaseGateway;

/// Operation requests understood by the gateway core
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", content = "parameters", rename_all = "kebab-case")]
pub enum OperationRequest {
    ExecuteQuery {
        query: String,
        #[serde(default)]
        params: Vec<serde_json::Value>,
    },
    ExecuteBatch {
        statements: Vec<String>,
    },
    GetSchema {
        #[serde(default)]
        include_details: bool,
    },
    ListTables,
    DescribeTable {
        table: String,
    },
    GetSchemaStatistics,
    GetConnectionPoolStatus,
    StartPerformanceMonitoring {
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    GeneratePerformanceReport,
    GetQueryStats,
    ClearCaches,
}

/// Typed success payloads, one shape per operation
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OperationResponse {
    Query(QueryResult),
    Batch(Vec<QueryResult>),
    Schema(SchemaInfo),
    Tables(Vec<TableInfo>),
    Table(TableInfo),
    SchemaStatistics(SchemaStatistics),
    PoolStatus(PoolStatus),
    MonitoringStarted { started: bool, interval_ms: u64 },
    Report(PerformanceReport),
    QueryStats(QueryStats),
    CachesCleared { cleared: bool },
}

/// Structured failure payload: what failed, the underlying message, and a
/// remediation hint where the taxonomy has one. Never a stack trace.
#[derive(Debug, Clone, Serialize)]
pub struct OperationFailure {
    pub message: String,
}

impl From<GatewayError> for OperationFailure {
    fn from(error: GatewayError) -> Self {
        Self {
            message: error.user_message(),
        }
    }
}

impl DatabaseGateway {
    /// Dispatch one boundary operation to the owning component
    pub async fn handle_operation(
        &self,
        request: OperationRequest,
    ) -> Result<OperationResponse, OperationFailure> {
        match request {
            OperationRequest::ExecuteQuery { query, params } => {
                let options = crate::types::QueryOptions::with_params(params);
                let result = self.query().execute_query(&query, &options).await?;
                Ok(OperationResponse::Query(result))
            }
            OperationRequest::ExecuteBatch { statements } => {
                let results = self.query().execute_batch(&statements).await?;
                Ok(OperationResponse::Batch(results))
            }
            OperationRequest::GetSchema { include_details } => {
                let schema = self.schema_cache().get_schema(include_details).await?;
                Ok(OperationResponse::Schema(schema))
            }
            OperationRequest::ListTables => {
                let tables = self.schema_cache().get_tables().await?;
                Ok(OperationResponse::Tables(tables))
            }
            OperationRequest::DescribeTable { table } => {
                let info = self.schema_cache().get_table_info(&table).await?;
                Ok(OperationResponse::Table(info))
            }
            OperationRequest::GetSchemaStatistics => {
                let stats = self.schema_cache().get_statistics().await?;
                Ok(OperationResponse::SchemaStatistics(stats))
            }
            OperationRequest::GetConnectionPoolStatus => {
                let status = self.manager().pool_status().await?;
                Ok(OperationResponse::PoolStatus(status))
            }
            OperationRequest::StartPerformanceMonitoring { interval_ms } => {
                let started = std::sync::Arc::clone(self.monitor()).start(interval_ms).await;
                Ok(OperationResponse::MonitoringStarted {
                    started,
                    interval_ms: interval_ms.unwrap_or(self.config().monitoring.interval_ms),
                })
            }
            OperationRequest::GeneratePerformanceReport => {
                let report = self.monitor().generate_report().await;
                Ok(OperationResponse::Report(report))
            }
            OperationRequest::GetQueryStats => {
                let stats = self.query().get_query_stats().await;
                Ok(OperationResponse::QueryStats(stats))
            }
            OperationRequest::ClearCaches => {
                self.schema_cache().clear().await;
                Ok(OperationResponse::CachesCleared { cleared: true })
            }
        }
    }
}
