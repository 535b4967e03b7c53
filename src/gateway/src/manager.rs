//! Connection registry and lifecycle management
//!
//! Owns the mapping from connection identifier to adapter plus the single
//! "current" identifier. All mutation happens through this manager under a
//! write lock, preserving single-writer semantics per data structure.
//!
//! Invariant: at most one connection is current at any time, and the current
//! identifier is always either unset or present in the registry.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::adapters::{create_adapter, DatabaseAdapter};
use crate::config::DatabaseConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{EventBus, GatewayEvent};
use crate::types::{ConnectionRecord, ConnectionStatus, DatabaseType, PoolStatus};

struct ManagedConnection {
    adapter: Arc<dyn DatabaseAdapter>,
    record: ConnectionRecord,
}

/// Registry of named adapters with one designated current connection
pub struct ConnectionManager {
    connections: RwLock<HashMap<String, ManagedConnection>>,
    current: RwLock<Option<String>>,
    events: EventBus,
}

impl ConnectionManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            events,
        }
    }

    /// Instantiate the matching adapter variant, connect it and register it.
    /// The first registered connection becomes current. Nothing is
    /// registered when the connect fails.
    pub async fn create_connection(
        &self,
        id: impl Into<String>,
        config: DatabaseConfig,
        database_type: DatabaseType,
    ) -> GatewayResult<()> {
        let adapter = create_adapter(database_type, config);
        self.create_connection_with_adapter(id, adapter).await
    }

    /// Register a pre-built adapter under an identifier. This is the seam
    /// used by alternative backends and by tests that script an adapter.
    pub async fn create_connection_with_adapter(
        &self,
        id: impl Into<String>,
        adapter: Arc<dyn DatabaseAdapter>,
    ) -> GatewayResult<()> {
        let id = id.into();

        if self.connections.read().await.contains_key(&id) {
            return Err(GatewayError::config(format!(
                "connection '{}' already exists",
                id
            )));
        }

        let database_type = adapter.database_type();
        let mut record = ConnectionRecord::new(&id, database_type);
        record.status = ConnectionStatus::Connecting;

        adapter.connect().await.map_err(|e| {
            GatewayError::connection(format!("failed to create connection '{}': {}", id, e))
        })?;

        record.status = ConnectionStatus::Connected;

        {
            let mut connections = self.connections.write().await;
            connections.insert(id.clone(), ManagedConnection { adapter, record });
        }

        {
            let mut current = self.current.write().await;
            if current.is_none() {
                *current = Some(id.clone());
            }
        }

        info!(connection = %id, "connection registered");
        self.events.publish(GatewayEvent::ConnectionCreated {
            id,
            database_type,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    /// The adapter addressed by default when no identifier is given
    pub async fn get_current_connection(&self) -> GatewayResult<Arc<dyn DatabaseAdapter>> {
        let current = self.current.read().await.clone();
        let id = current.ok_or_else(GatewayError::no_active_connection)?;

        let connections = self.connections.read().await;
        connections
            .get(&id)
            .map(|managed| Arc::clone(&managed.adapter))
            .ok_or_else(GatewayError::no_active_connection)
    }

    /// Identifier of the current connection, if any
    pub async fn current_id(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// Adapter registered under an identifier
    pub async fn get_connection(&self, id: &str) -> GatewayResult<Arc<dyn DatabaseAdapter>> {
        let connections = self.connections.read().await;
        connections
            .get(id)
            .map(|managed| Arc::clone(&managed.adapter))
            .ok_or_else(|| {
                GatewayError::connection(format!("connection '{}' is not registered", id))
            })
    }

    /// Atomically repoint "current" at a registered connection
    pub async fn switch_connection(&self, id: &str) -> GatewayResult<()> {
        let connections = self.connections.read().await;
        if !connections.contains_key(id) {
            return Err(GatewayError::connection(format!(
                "connection '{}' is not registered",
                id
            )));
        }
        drop(connections);

        *self.current.write().await = Some(id.to_string());
        info!(connection = %id, "switched current connection");
        self.events.publish(GatewayEvent::ConnectionSwitched {
            id: id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Disconnect and deregister. When the removed connection was current,
    /// current moves to an arbitrary remaining connection or is cleared.
    pub async fn remove_connection(&self, id: &str) -> GatewayResult<()> {
        let removed = {
            let mut connections = self.connections.write().await;
            connections.remove(id).ok_or_else(|| {
                GatewayError::connection(format!("connection '{}' is not registered", id))
            })?
        };

        if let Err(e) = removed.adapter.disconnect().await {
            warn!(connection = %id, "disconnect during removal failed: {}", e);
        }

        {
            let mut current = self.current.write().await;
            if current.as_deref() == Some(id) {
                let connections = self.connections.read().await;
                *current = connections.keys().next().cloned();
            }
        }

        info!(connection = %id, "connection removed");
        self.events.publish(GatewayEvent::ConnectionRemoved {
            id: id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Best-effort disconnect of every registered connection. Individual
    /// failures are collected, not fatal.
    pub async fn disconnect_all(&self) -> Vec<(String, GatewayError)> {
        let drained: Vec<(String, ManagedConnection)> = {
            let mut connections = self.connections.write().await;
            connections.drain().collect()
        };
        *self.current.write().await = None;

        let mut failures = Vec::new();
        for (id, managed) in drained {
            if let Err(e) = managed.adapter.disconnect().await {
                warn!(connection = %id, "disconnect failed: {}", e);
                failures.push((id, e));
            }
        }
        failures
    }

    /// Disconnect then reconnect the target (default: current). Returns
    /// whether the reconnect succeeded; never propagates an error.
    pub async fn auto_reconnect(&self, id: Option<&str>) -> bool {
        let target = match id {
            Some(id) => Some(id.to_string()),
            None => self.current.read().await.clone(),
        };
        let target = match target {
            Some(t) => t,
            None => {
                warn!("auto-reconnect requested with no active connection");
                return false;
            }
        };

        let adapter = {
            let connections = self.connections.read().await;
            match connections.get(&target) {
                Some(managed) => Arc::clone(&managed.adapter),
                None => {
                    warn!(connection = %target, "auto-reconnect target is not registered");
                    return false;
                }
            }
        };

        if let Err(e) = adapter.disconnect().await {
            warn!(connection = %target, "disconnect before reconnect failed: {}", e);
        }

        match adapter.connect().await {
            Ok(()) => {
                self.set_status(&target, ConnectionStatus::Connected, None)
                    .await;
                info!(connection = %target, "auto-reconnect succeeded");
                true
            }
            Err(e) => {
                self.set_status(&target, ConnectionStatus::Error, Some(e.to_string()))
                    .await;
                warn!(connection = %target, "auto-reconnect failed: {}", e);
                false
            }
        }
    }

    /// Liveness probe for a registered connection (default: current)
    pub async fn test_connection(&self, id: Option<&str>) -> bool {
        let adapter = match id {
            Some(id) => match self.get_connection(id).await {
                Ok(adapter) => adapter,
                Err(_) => return false,
            },
            None => match self.get_current_connection().await {
                Ok(adapter) => adapter,
                Err(_) => return false,
            },
        };
        adapter.test_connection().await
    }

    /// Snapshot of every registry record
    pub async fn list_connections(&self) -> Vec<ConnectionRecord> {
        let connections = self.connections.read().await;
        let mut records: Vec<ConnectionRecord> = connections
            .values()
            .map(|managed| managed.record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Pool counters for the current connection
    pub async fn pool_status(&self) -> GatewayResult<PoolStatus> {
        let adapter = self.get_current_connection().await?;
        Ok(adapter.pool_status())
    }

    /// Mark a connection as recently used
    pub async fn touch(&self, id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(managed) = connections.get_mut(id) {
            managed.record.last_used_at = Utc::now();
        }
    }

    async fn set_status(&self, id: &str, status: ConnectionStatus, error: Option<String>) {
        let mut connections = self.connections.write().await;
        if let Some(managed) = connections.get_mut(id) {
            managed.record.status = status;
            managed.record.error = error;
            managed.record.last_used_at = Utc::now();
        }
    }
}
