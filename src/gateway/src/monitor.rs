//! Performance monitoring and alert lifecycle
//!
//! A fixed-interval loop collects one metric per tick, appends it to a
//! capped history and evaluates it against the configured thresholds. Each
//! breach creates an alert whose lifecycle only moves forward:
//! active -> acknowledged -> resolved, or active -> resolved directly.
//! Escalation is a passive check; nothing re-raises automatically.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MonitoringConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{EventBus, GatewayEvent};
use crate::metrics::MetricsCollector;
use crate::types::{
    AlertSeverity, AlertStatus, AlertSummary, AlertType, PerformanceAlert, PerformanceMetric,
    PerformanceReport,
};

/// Interval monitor evaluating metrics into stateful alerts
pub struct PerformanceMonitor {
    collector: Arc<MetricsCollector>,
    config: MonitoringConfig,
    metrics_history: RwLock<VecDeque<PerformanceMetric>>,
    alerts: RwLock<Vec<PerformanceAlert>>,
    events: EventBus,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceMonitor {
    pub fn new(collector: Arc<MetricsCollector>, config: MonitoringConfig, events: EventBus) -> Self {
        Self {
            collector,
            config,
            metrics_history: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(Vec::new()),
            events,
            loop_handle: Mutex::new(None),
        }
    }

    /// Start the monitoring loop. Starting while already running is a soft
    /// failure: returns false without creating a second timer.
    pub async fn start(self: Arc<Self>, interval_ms: Option<u64>) -> bool {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            warn!("performance monitoring is already running");
            return false;
        }

        let interval_ms = interval_ms.unwrap_or(self.config.interval_ms);
        let monitor = Arc::clone(&self);
        *handle = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
            // the first tick of a tokio interval fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let metric = monitor.collector.collect().await;
                monitor.record_metric(metric.clone()).await;
                monitor.evaluate(&metric).await;
            }
        }));

        info!(interval_ms, "performance monitoring started");
        self.events.publish(GatewayEvent::MonitoringStarted {
            interval_ms,
            timestamp: Utc::now(),
        });
        true
    }

    /// Stop the loop. Stopping while not running is a soft no-op.
    pub async fn stop(&self) -> bool {
        let mut handle = self.loop_handle.lock().await;
        match handle.take() {
            Some(task) => {
                task.abort();
                info!("performance monitoring stopped");
                self.events.publish(GatewayEvent::MonitoringStopped {
                    timestamp: Utc::now(),
                });
                true
            }
            None => {
                debug!("performance monitoring was not running");
                false
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.loop_handle.lock().await.is_some()
    }

    /// Append one metric; the oldest entry falls off beyond the cap
    pub async fn record_metric(&self, metric: PerformanceMetric) {
        let mut history = self.metrics_history.write().await;
        if history.len() == self.config.max_metrics_history {
            history.pop_front();
        }
        history.push_back(metric);
    }

    /// Metric history, oldest first
    pub async fn metrics_history(&self) -> Vec<PerformanceMetric> {
        self.metrics_history.read().await.iter().cloned().collect()
    }

    /// Compare one metric against the thresholds, creating alerts for each
    /// breach. A type with an unresolved alert is not raised again.
    pub async fn evaluate(&self, metric: &PerformanceMetric) {
        let t = &self.config.thresholds;

        if let Some(severity) = graded(
            metric.pool.utilization_percent,
            t.pool_utilization_warning_percent,
            t.pool_utilization_critical_percent,
            AlertSeverity::High,
        ) {
            self.maybe_raise(
                AlertType::PoolUtilization,
                severity,
                format!(
                    "connection pool utilization at {:.1}%",
                    metric.pool.utilization_percent
                ),
                serde_json::json!({ "utilization_percent": metric.pool.utilization_percent }),
            )
            .await;
        }

        if let Some(severity) = graded(
            metric.system.cpu_percent,
            t.cpu_warning_percent,
            t.cpu_critical_percent,
            AlertSeverity::Medium,
        ) {
            self.maybe_raise(
                AlertType::HighCpu,
                severity,
                format!("cpu usage at {:.1}%", metric.system.cpu_percent),
                serde_json::json!({ "cpu_percent": metric.system.cpu_percent }),
            )
            .await;
        }

        if let Some(severity) = graded(
            metric.system.memory_percent,
            t.memory_warning_percent,
            t.memory_critical_percent,
            AlertSeverity::High,
        ) {
            self.maybe_raise(
                AlertType::HighMemory,
                severity,
                format!("memory usage at {:.1}%", metric.system.memory_percent),
                serde_json::json!({ "memory_percent": metric.system.memory_percent }),
            )
            .await;
        }

        if metric.system.disk_percent >= t.disk_critical_percent {
            self.maybe_raise(
                AlertType::HighDisk,
                AlertSeverity::High,
                format!("disk usage at {:.1}%", metric.system.disk_percent),
                serde_json::json!({ "disk_percent": metric.system.disk_percent }),
            )
            .await;
        } else if metric.system.disk_percent >= t.disk_warning_percent {
            self.maybe_raise(
                AlertType::HighDisk,
                AlertSeverity::Medium,
                format!("disk usage at {:.1}%", metric.system.disk_percent),
                serde_json::json!({ "disk_percent": metric.system.disk_percent }),
            )
            .await;
        }

        if metric.queries.slow_count >= t.slow_query_count_warning && metric.queries.count > 0 {
            self.maybe_raise(
                AlertType::SlowQuery,
                AlertSeverity::Medium,
                format!(
                    "{} slow queries in the current window (avg {:.0} ms)",
                    metric.queries.slow_count, metric.queries.avg_time_ms
                ),
                serde_json::json!({
                    "slow_count": metric.queries.slow_count,
                    "avg_time_ms": metric.queries.avg_time_ms,
                }),
            )
            .await;
        }

        if metric.queries.count > 0 {
            let error_rate =
                metric.queries.failed_count as f64 / metric.queries.count as f64 * 100.0;
            if let Some(severity) = graded(
                error_rate,
                t.error_rate_warning_percent,
                t.error_rate_critical_percent,
                AlertSeverity::High,
            ) {
                self.maybe_raise(
                    AlertType::QueryTimeout,
                    severity,
                    format!("query failure rate at {:.1}%", error_rate),
                    serde_json::json!({ "error_rate_percent": error_rate }),
                )
                .await;
            }
        }
    }

    /// Create an alert directly. Used for timeout-class alerts the threshold
    /// evaluator cannot see, and by the evaluator itself.
    pub async fn raise_alert(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        value: serde_json::Value,
    ) -> PerformanceAlert {
        let alert = PerformanceAlert::new(alert_type, severity, message, value);
        self.events.publish(GatewayEvent::AlertRaised {
            id: alert.id,
            alert_type,
            severity,
            message: alert.message.clone(),
            timestamp: alert.created_at,
        });
        self.alerts.write().await.push(alert.clone());
        alert
    }

    /// Mark an active alert as acknowledged. Fails when the alert is
    /// already resolved; re-acknowledging keeps the original timestamp.
    pub async fn acknowledge(&self, id: Uuid) -> GatewayResult<PerformanceAlert> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| GatewayError::monitoring(format!("alert {} not found", id)))?;

        match alert.status {
            AlertStatus::Resolved => Err(GatewayError::monitoring(format!(
                "alert {} is already resolved and cannot be acknowledged",
                id
            ))),
            AlertStatus::Acknowledged => Ok(alert.clone()),
            AlertStatus::Active => {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(Utc::now());
                Ok(alert.clone())
            }
        }
    }

    /// Mark an alert as resolved. Legal from any live state; resolving a
    /// resolved alert keeps the original timestamp.
    pub async fn resolve(&self, id: Uuid) -> GatewayResult<PerformanceAlert> {
        let resolved = {
            let mut alerts = self.alerts.write().await;
            let alert = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| GatewayError::monitoring(format!("alert {} not found", id)))?;

            if alert.status != AlertStatus::Resolved {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(Utc::now());
            }
            alert.clone()
        };

        self.events.publish(GatewayEvent::AlertResolved {
            id,
            timestamp: Utc::now(),
        });
        Ok(resolved)
    }

    /// Passive escalation check: true only for an active alert older than
    /// the threshold. The caller decides whether to re-notify.
    pub async fn should_escalate(&self, id: Uuid, threshold_minutes: i64) -> bool {
        let alerts = self.alerts.read().await;
        alerts
            .iter()
            .find(|a| a.id == id)
            .map(|a| {
                a.status == AlertStatus::Active && a.age() > chrono::Duration::minutes(threshold_minutes)
            })
            .unwrap_or(false)
    }

    /// Alerts still requiring attention
    pub async fn active_alerts(&self) -> Vec<PerformanceAlert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .cloned()
            .collect()
    }

    /// Every alert ever raised, oldest first
    pub async fn all_alerts(&self) -> Vec<PerformanceAlert> {
        self.alerts.read().await.clone()
    }

    /// Counts by lifecycle status and severity
    pub async fn alert_summary(&self) -> AlertSummary {
        let alerts = self.alerts.read().await;
        let mut summary = AlertSummary::default();
        for alert in alerts.iter() {
            match alert.status {
                AlertStatus::Active => summary.active += 1,
                AlertStatus::Acknowledged => summary.acknowledged += 1,
                AlertStatus::Resolved => summary.resolved += 1,
            }
            match alert.severity {
                AlertSeverity::Critical => summary.critical += 1,
                AlertSeverity::High => summary.high += 1,
                AlertSeverity::Medium => summary.medium += 1,
                AlertSeverity::Low => summary.low += 1,
            }
        }
        summary
    }

    /// Aggregate the metric history and alert counts into a report
    pub async fn generate_report(&self) -> PerformanceReport {
        let history = self.metrics_history.read().await;
        let samples = history.len();

        let mut report = PerformanceReport {
            generated_at: Utc::now(),
            window_start: history.front().map(|m| m.timestamp),
            window_end: history.back().map(|m| m.timestamp),
            samples,
            avg_pool_utilization_percent: 0.0,
            peak_pool_utilization_percent: 0.0,
            avg_cpu_percent: 0.0,
            peak_cpu_percent: 0.0,
            avg_memory_percent: 0.0,
            peak_memory_percent: 0.0,
            total_queries: 0,
            slow_queries: 0,
            alerts: AlertSummary::default(),
        };

        if samples > 0 {
            let n = samples as f64;
            for metric in history.iter() {
                report.avg_pool_utilization_percent += metric.pool.utilization_percent / n;
                report.peak_pool_utilization_percent = report
                    .peak_pool_utilization_percent
                    .max(metric.pool.utilization_percent);
                report.avg_cpu_percent += metric.system.cpu_percent / n;
                report.peak_cpu_percent = report.peak_cpu_percent.max(metric.system.cpu_percent);
                report.avg_memory_percent += metric.system.memory_percent / n;
                report.peak_memory_percent =
                    report.peak_memory_percent.max(metric.system.memory_percent);
            }
            if let Some(last) = history.back() {
                report.total_queries = last.queries.count;
                report.slow_queries = last.queries.slow_count;
            }
        }
        drop(history);

        report.alerts = self.alert_summary().await;
        report
    }

    /// Raise unless an unresolved alert of this type already exists
    async fn maybe_raise(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        value: serde_json::Value,
    ) {
        {
            let alerts = self.alerts.read().await;
            if alerts
                .iter()
                .any(|a| a.alert_type == alert_type && a.status != AlertStatus::Resolved)
            {
                return;
            }
        }
        warn!(%alert_type, ?severity, "{}", message);
        self.raise_alert(alert_type, severity, message, value).await;
    }
}

/// Grade a measurement against a warning/critical pair. Returns the
/// warning-level severity for the type, or Critical past the critical bar.
fn graded(
    value: f64,
    warning: f64,
    critical: f64,
    warning_severity: AlertSeverity,
) -> Option<AlertSeverity> {
    if value >= critical {
        Some(AlertSeverity::Critical)
    } else if value >= warning {
        Some(warning_severity)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ConnectionManager;
    use crate::types::{PoolStatus, QuerySnapshot, SystemSnapshot};

    fn test_metric() -> PerformanceMetric {
        PerformanceMetric {
            timestamp: Utc::now(),
            pool: PoolStatus::default(),
            queries: QuerySnapshot::default(),
            system: SystemSnapshot::default(),
        }
    }

    fn monitor_with(config: MonitoringConfig) -> Arc<PerformanceMonitor> {
        let events = EventBus::new(64);
        let manager = Arc::new(ConnectionManager::new(events.clone()));
        let collector = Arc::new(MetricsCollector::new(manager, 1000));
        Arc::new(PerformanceMonitor::new(collector, config, events))
    }

    fn monitor() -> Arc<PerformanceMonitor> {
        monitor_with(MonitoringConfig::default())
    }

    #[test]
    fn test_graded_thresholds() {
        assert_eq!(graded(50.0, 75.0, 90.0, AlertSeverity::High), None);
        assert_eq!(
            graded(80.0, 75.0, 90.0, AlertSeverity::High),
            Some(AlertSeverity::High)
        );
        assert_eq!(
            graded(95.0, 75.0, 90.0, AlertSeverity::High),
            Some(AlertSeverity::Critical)
        );
    }

    #[tokio::test]
    async fn test_breach_creates_active_alert() {
        let monitor = monitor();
        let mut metric = test_metric();
        metric.pool.utilization_percent = 95.0;

        monitor.evaluate(&metric).await;

        let alerts = monitor.active_alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::PoolUtilization);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn test_unresolved_alert_is_not_duplicated() {
        let monitor = monitor();
        let mut metric = test_metric();
        metric.system.cpu_percent = 99.0;

        monitor.evaluate(&metric).await;
        monitor.evaluate(&metric).await;
        assert_eq!(monitor.all_alerts().await.len(), 1);

        // resolving clears the way for a new alert of the same type
        let id = monitor.all_alerts().await[0].id;
        monitor.resolve(id).await.unwrap();
        monitor.evaluate(&metric).await;
        assert_eq!(monitor.all_alerts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_lifecycle_forward_only() {
        let monitor = monitor();
        let alert = monitor
            .raise_alert(
                AlertType::HighCpu,
                AlertSeverity::High,
                "cpu pegged",
                serde_json::json!({ "cpu_percent": 97.0 }),
            )
            .await;

        let acked = monitor.acknowledge(alert.id).await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert!(acked.acknowledged_at.is_some());

        let resolved = monitor.resolve(alert.id).await.unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(resolved.resolved_at.is_some());

        // acknowledge after resolve must fail
        let err = monitor.acknowledge(alert.id).await.unwrap_err();
        assert!(matches!(err, GatewayError::Monitoring { .. }));
    }

    #[tokio::test]
    async fn test_resolve_directly_from_active() {
        let monitor = monitor();
        let alert = monitor
            .raise_alert(
                AlertType::HighMemory,
                AlertSeverity::Medium,
                "memory pressure",
                serde_json::Value::Null,
            )
            .await;

        let resolved = monitor.resolve(alert.id).await.unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(resolved.acknowledged_at.is_none());
    }

    #[tokio::test]
    async fn test_should_escalate_only_for_old_active_alerts() {
        let monitor = monitor();
        let alert = monitor
            .raise_alert(
                AlertType::SlowQuery,
                AlertSeverity::Medium,
                "slow queries",
                serde_json::Value::Null,
            )
            .await;

        // fresh active alert: below the age threshold
        assert!(!monitor.should_escalate(alert.id, 30).await);
        // age threshold of zero makes any active alert escalatable
        assert!(monitor.should_escalate(alert.id, -1).await);

        monitor.resolve(alert.id).await.unwrap();
        assert!(!monitor.should_escalate(alert.id, -1).await);

        // unknown id never escalates
        assert!(!monitor.should_escalate(Uuid::new_v4(), -1).await);
    }

    #[tokio::test]
    async fn test_metric_history_is_capped() {
        let monitor = monitor_with(MonitoringConfig {
            max_metrics_history: 3,
            ..Default::default()
        });

        for _ in 0..5 {
            monitor.record_metric(test_metric()).await;
        }
        assert_eq!(monitor.metrics_history().await.len(), 3);
    }

    #[tokio::test]
    async fn test_double_start_is_soft_failure() {
        let monitor = monitor();
        assert!(monitor.clone().start(Some(60_000)).await);
        assert!(!monitor.clone().start(Some(60_000)).await);
        assert!(monitor.is_running().await);

        assert!(monitor.stop().await);
        assert!(!monitor.stop().await);
        assert!(!monitor.is_running().await);
    }

    #[tokio::test]
    async fn test_report_aggregates_history_and_alerts() {
        let monitor = monitor();
        let mut metric = test_metric();
        metric.pool.utilization_percent = 40.0;
        metric.system.cpu_percent = 10.0;
        monitor.record_metric(metric.clone()).await;
        metric.pool.utilization_percent = 60.0;
        metric.system.cpu_percent = 30.0;
        monitor.record_metric(metric).await;

        monitor
            .raise_alert(
                AlertType::HighDisk,
                AlertSeverity::Low,
                "disk filling",
                serde_json::Value::Null,
            )
            .await;

        let report = monitor.generate_report().await;
        assert_eq!(report.samples, 2);
        assert!((report.avg_pool_utilization_percent - 50.0).abs() < 1e-9);
        assert_eq!(report.peak_pool_utilization_percent, 60.0);
        assert_eq!(report.peak_cpu_percent, 30.0);
        assert_eq!(report.alerts.active, 1);
        assert_eq!(report.alerts.low, 1);
    }

    #[tokio::test]
    async fn test_alert_summary_counts() {
        let monitor = monitor();
        let a = monitor
            .raise_alert(
                AlertType::HighCpu,
                AlertSeverity::Critical,
                "a",
                serde_json::Value::Null,
            )
            .await;
        monitor
            .raise_alert(
                AlertType::HighMemory,
                AlertSeverity::High,
                "b",
                serde_json::Value::Null,
            )
            .await;
        monitor.resolve(a.id).await.unwrap();

        let summary = monitor.alert_summary().await;
        assert_eq!(summary.active, 1);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.high, 1);
    }
}
