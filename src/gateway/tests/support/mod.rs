//! Shared test support: a scripted adapter with call counters

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use datagate_gateway::types::{
    ColumnInfo, PoolStatus, QueryOptions, QueryResult, RowMap, SchemaInfo, TableInfo,
};
use datagate_gateway::{DatabaseAdapter, DatabaseType, GatewayError, GatewayResult};

/// In-memory adapter driven by scripted responses.
///
/// Counts every contract call so tests can assert how many backend round
/// trips an operation actually issued.
pub struct MockAdapter {
    database_type: DatabaseType,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    pub execute_calls: AtomicUsize,
    pub tables_calls: AtomicUsize,
    pub table_info_calls: AtomicUsize,
    pub schema_calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
    scripted_rows: Mutex<HashMap<String, Vec<RowMap>>>,
    fail_matching: Mutex<Option<String>>,
    tables: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new(database_type: DatabaseType) -> Arc<Self> {
        Arc::new(Self {
            database_type,
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            execute_calls: AtomicUsize::new(0),
            tables_calls: AtomicUsize::new(0),
            table_info_calls: AtomicUsize::new(0),
            schema_calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            scripted_rows: Mutex::new(HashMap::new()),
            fail_matching: Mutex::new(None),
            tables: Mutex::new(vec!["users".to_string(), "orders".to_string()]),
        })
    }

    /// Queue rows to return for an exact query text
    pub fn script_rows(&self, query: &str, rows: Vec<serde_json::Value>) {
        let mapped = rows
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.scripted_rows
            .lock()
            .unwrap()
            .insert(query.to_string(), mapped);
    }

    /// Statements containing this pattern come back as failed results
    pub fn fail_queries_containing(&self, pattern: &str) {
        *self.fail_matching.lock().unwrap() = Some(pattern.to_string());
    }

    pub fn refuse_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Statements seen so far, in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn table_info_for(&self, table: &str) -> TableInfo {
        let mut info = TableInfo::new(table);
        info.schema = Some("public".to_string());
        info.columns = vec![ColumnInfo {
            name: "id".to_string(),
            data_type: "integer".to_string(),
            ordinal_position: 1,
            nullable: false,
            is_identity: true,
            is_primary_key: true,
            max_length: None,
            precision: None,
            scale: None,
            default_value: None,
        }];
        info
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    async fn connect(&self) -> GatewayResult<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("mock connect refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_query(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("mock adapter is not connected"));
        }
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(query.to_string());

        if let Some(pattern) = self.fail_matching.lock().unwrap().clone() {
            if query.contains(&pattern) {
                return Ok(QueryResult::failed(format!("mock failure for '{}'", query), 2)
                    .with_metadata(query, &options.params));
            }
        }

        let result = match self.scripted_rows.lock().unwrap().get(query).cloned() {
            Some(rows) => QueryResult::with_rows(rows, 1),
            None => QueryResult::with_rows(Vec::new(), 1),
        };
        Ok(result.with_metadata(query, &options.params))
    }

    async fn get_tables(&self) -> GatewayResult<Vec<TableInfo>> {
        self.tables_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tables
            .lock()
            .unwrap()
            .iter()
            .map(|name| {
                let mut table = TableInfo::new(name.clone());
                table.schema = Some("public".to_string());
                table
            })
            .collect())
    }

    async fn get_table_info(&self, table: &str) -> GatewayResult<TableInfo> {
        self.table_info_calls.fetch_add(1, Ordering::SeqCst);
        if !self.tables.lock().unwrap().iter().any(|t| t == table) {
            return Err(GatewayError::schema(format!(
                "table '{}' not found in database 'mockdb'",
                table
            )));
        }
        Ok(self.table_info_for(table))
    }

    async fn get_schema(&self, include_details: bool) -> GatewayResult<SchemaInfo> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        let names = self.tables.lock().unwrap().clone();
        let tables = names
            .iter()
            .map(|name| {
                if include_details {
                    self.table_info_for(name)
                } else {
                    TableInfo::new(name.clone())
                }
            })
            .collect();
        Ok(SchemaInfo {
            database: "mockdb".to_string(),
            database_type: self.database_type,
            tables,
            collected_at: Utc::now(),
        })
    }

    async fn test_connection(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    fn pool_status(&self) -> PoolStatus {
        if self.connected.load(Ordering::SeqCst) {
            PoolStatus::new(5, 3, 20)
        } else {
            PoolStatus::default()
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
