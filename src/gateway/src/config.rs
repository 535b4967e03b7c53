//! Configuration types for the gateway core
//!
//! Connection, monitoring and cache configuration with env-sourced loading.
//! A `DatabaseConfig` is treated as an opaque immutable value once an
//! adapter has been constructed from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::types::DatabaseType;

/// Connection pool bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub idle_timeout_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 5,
            max_connections: 20,
            idle_timeout_seconds: 600,
        }
    }
}

/// Per-connection database configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Request TLS on the wire
    pub encrypt: bool,
    /// Accept the server certificate without CA validation
    pub trust_server_certificate: bool,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "datagate".to_string(),
            username: "datagate".to_string(),
            password: String::new(),
            encrypt: false,
            trust_server_certificate: false,
            connect_timeout_seconds: 10,
            request_timeout_seconds: 30,
            pool: PoolConfig::default(),
        }
    }
}

// Redact the password so configs are safe to log.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("pool", &self.pool)
            .finish()
    }
}

impl DatabaseConfig {
    /// Assemble a driver connection URL for sqlx-backed adapters.
    ///
    /// Credentials go through `Url` setters so reserved characters are
    /// percent-encoded rather than corrupting the authority section.
    pub fn connection_url(&self, database_type: DatabaseType) -> GatewayResult<String> {
        let scheme = match database_type {
            DatabaseType::Postgres => "postgres",
            DatabaseType::MySql => "mysql",
            DatabaseType::SqlServer => {
                return Err(GatewayError::config(
                    "SQL Server connections are configured directly, not via URL",
                ))
            }
        };

        let mut url = Url::parse(&format!(
            "{}://{}:{}/{}",
            scheme, self.host, self.port, self.database
        ))
        .map_err(|e| GatewayError::config(format!("invalid host or database name: {}", e)))?;

        url.set_username(&self.username)
            .map_err(|_| GatewayError::config("invalid username for connection URL"))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| GatewayError::config("invalid password for connection URL"))?;
        }

        match database_type {
            DatabaseType::Postgres => {
                let sslmode = if self.encrypt { "require" } else { "prefer" };
                url.query_pairs_mut().append_pair("sslmode", sslmode);
            }
            DatabaseType::MySql => {
                let mode = if self.encrypt { "REQUIRED" } else { "PREFERRED" };
                url.query_pairs_mut().append_pair("ssl-mode", mode);
            }
            DatabaseType::SqlServer => unreachable!(),
        }

        Ok(url.to_string())
    }

    /// Load a database configuration from `DATAGATE_DB_*` environment
    /// variables (with `.env` support), falling back to defaults.
    pub fn from_env() -> GatewayResult<Self> {
        dotenvy::dotenv().ok();

        let loaded = config::Config::builder()
            .add_source(config::Environment::with_prefix("DATAGATE_DB"))
            .build()
            .map_err(|e| GatewayError::config(format!("failed to read environment: {}", e)))?;

        let defaults = Self::default();
        Ok(Self {
            host: loaded.get_string("host").unwrap_or(defaults.host),
            port: loaded
                .get_int("port")
                .ok()
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(defaults.port),
            database: loaded.get_string("database").unwrap_or(defaults.database),
            username: loaded.get_string("username").unwrap_or(defaults.username),
            password: loaded.get_string("password").unwrap_or(defaults.password),
            encrypt: loaded.get_bool("encrypt").unwrap_or(defaults.encrypt),
            trust_server_certificate: loaded
                .get_bool("trust_server_certificate")
                .unwrap_or(defaults.trust_server_certificate),
            connect_timeout_seconds: loaded
                .get_int("connect_timeout_seconds")
                .ok()
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(defaults.connect_timeout_seconds),
            request_timeout_seconds: loaded
                .get_int("request_timeout_seconds")
                .ok()
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(defaults.request_timeout_seconds),
            pool: PoolConfig {
                min_connections: loaded
                    .get_int("pool_min_connections")
                    .ok()
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(defaults.pool.min_connections),
                max_connections: loaded
                    .get_int("pool_max_connections")
                    .ok()
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(defaults.pool.max_connections),
                idle_timeout_seconds: loaded
                    .get_int("pool_idle_timeout_seconds")
                    .ok()
                    .and_then(|v| u64::try_from(v).ok())
                    .unwrap_or(defaults.pool.idle_timeout_seconds),
            },
        })
    }

    /// Backend type from `DATAGATE_DB_TYPE`, defaulting to postgres
    pub fn database_type_from_env() -> GatewayResult<DatabaseType> {
        match std::env::var("DATAGATE_DB_TYPE") {
            Ok(raw) => DatabaseType::from_str(&raw),
            Err(_) => Ok(DatabaseType::Postgres),
        }
    }
}

/// Warning/critical threshold pairs evaluated against each metric sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub pool_utilization_warning_percent: f64,
    pub pool_utilization_critical_percent: f64,
    pub cpu_warning_percent: f64,
    pub cpu_critical_percent: f64,
    pub memory_warning_percent: f64,
    pub memory_critical_percent: f64,
    pub disk_warning_percent: f64,
    pub disk_critical_percent: f64,
    pub error_rate_warning_percent: f64,
    pub error_rate_critical_percent: f64,
    /// Slow queries in the window before a slow-query alert is raised
    pub slow_query_count_warning: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            pool_utilization_warning_percent: 75.0,
            pool_utilization_critical_percent: 90.0,
            cpu_warning_percent: 80.0,
            cpu_critical_percent: 95.0,
            memory_warning_percent: 80.0,
            memory_critical_percent: 95.0,
            disk_warning_percent: 85.0,
            disk_critical_percent: 95.0,
            error_rate_warning_percent: 5.0,
            error_rate_critical_percent: 20.0,
            slow_query_count_warning: 1,
        }
    }
}

/// Monitoring loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Collection interval for the monitoring loop
    pub interval_ms: u64,
    /// Metric history cap; oldest entries evicted beyond this
    pub max_metrics_history: usize,
    pub slow_query_threshold_ms: u64,
    #[serde(default)]
    pub thresholds: AlertThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
            max_metrics_history: 1000,
            slow_query_threshold_ms: 1000,
            thresholds: AlertThresholds::default(),
        }
    }
}

/// Schema cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 300 }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Bounded query execution history size
    pub max_query_history: usize,
    /// Event bus channel capacity
    pub event_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            monitoring: MonitoringConfig::default(),
            cache: CacheConfig::default(),
            max_query_history: 1000,
            event_capacity: 256,
        }
    }
}

impl GatewayConfig {
    /// Load gateway tuning from `DATAGATE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> GatewayResult<Self> {
        dotenvy::dotenv().ok();

        let loaded = config::Config::builder()
            .add_source(config::Environment::with_prefix("DATAGATE"))
            .build()
            .map_err(|e| GatewayError::config(format!("failed to read environment: {}", e)))?;

        let defaults = Self::default();
        let mut cfg = defaults.clone();

        if let Ok(v) = loaded.get_int("monitoring_interval_ms") {
            cfg.monitoring.interval_ms = u64::try_from(v)
                .map_err(|_| GatewayError::config("monitoring_interval_ms must be positive"))?;
        }
        if let Ok(v) = loaded.get_int("slow_query_threshold_ms") {
            cfg.monitoring.slow_query_threshold_ms = u64::try_from(v)
                .map_err(|_| GatewayError::config("slow_query_threshold_ms must be positive"))?;
        }
        if let Ok(v) = loaded.get_int("cache_ttl_seconds") {
            cfg.cache.ttl_seconds = u64::try_from(v)
                .map_err(|_| GatewayError::config("cache_ttl_seconds must be positive"))?;
        }
        if let Ok(v) = loaded.get_int("max_query_history") {
            cfg.max_query_history = usize::try_from(v)
                .map_err(|_| GatewayError::config("max_query_history must be positive"))?;
        }

        Ok(cfg)
    }
}
