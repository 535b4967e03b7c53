//! Process-wide publish/subscribe channel for gateway domain events
//!
//! A typed broadcast channel connecting query, schema, connection and
//! performance events to policy evaluators and loggers. The bus is
//! constructed once and handed to consumers by parameter; there is no
//! global accessor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{AlertSeverity, AlertType, DatabaseType};

/// Immutable event payloads published on the bus
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GatewayEvent {
    ConnectionCreated {
        id: String,
        database_type: DatabaseType,
        timestamp: DateTime<Utc>,
    },
    ConnectionRemoved {
        id: String,
        timestamp: DateTime<Utc>,
    },
    ConnectionSwitched {
        id: String,
        timestamp: DateTime<Utc>,
    },
    QueryExecuted {
        query: String,
        duration_ms: u64,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    SchemaRefreshed {
        scope: String,
        timestamp: DateTime<Utc>,
    },
    SchemaCacheCleared {
        timestamp: DateTime<Utc>,
    },
    AlertRaised {
        id: Uuid,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        timestamp: DateTime<Utc>,
    },
    AlertResolved {
        id: Uuid,
        timestamp: DateTime<Utc>,
    },
    MonitoringStarted {
        interval_ms: u64,
        timestamp: DateTime<Utc>,
    },
    MonitoringStopped {
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast-backed event bus.
///
/// Cloning is cheap; all clones publish into the same channel. Publishing
/// with no live subscriber is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: GatewayEvent) {
        // send only fails when there are no receivers, which is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Spawn a background task that writes every published event through
/// `tracing`. Returns the task handle; dropping the bus ends the task.
pub fn spawn_event_logger(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(GatewayEvent::AlertRaised {
                    severity, message, ..
                }) => {
                    warn!(?severity, "performance alert raised: {}", message);
                }
                Ok(GatewayEvent::QueryExecuted {
                    duration_ms,
                    success,
                    ..
                }) => {
                    debug!(duration_ms, success, "query executed");
                }
                Ok(event) => {
                    info!(?event, "gateway event");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event logger lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
