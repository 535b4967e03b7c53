//! On-demand metric sampling
//!
//! Produces one immutable `PerformanceMetric` per call: connection-pool
//! counters from the manager, a query snapshot over a rolling buffer of
//! recent timings, and best-effort process/system figures via sysinfo.
//! System figures are advisory telemetry, not used for correctness.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::{Disks, System};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::manager::ConnectionManager;
use crate::types::{PerformanceMetric, QuerySnapshot, SystemSnapshot};

/// Rolling timing buffer capacity
const TIMING_BUFFER_CAP: usize = 1000;

#[derive(Debug, Clone)]
struct QueryTiming {
    at: DateTime<Utc>,
    duration_ms: u64,
    success: bool,
}

/// Collector for point-in-time performance measurements
pub struct MetricsCollector {
    manager: Arc<ConnectionManager>,
    slow_query_threshold_ms: u64,
    timings: RwLock<VecDeque<QueryTiming>>,
    system: Mutex<System>,
}

impl MetricsCollector {
    pub fn new(manager: Arc<ConnectionManager>, slow_query_threshold_ms: u64) -> Self {
        Self {
            manager,
            slow_query_threshold_ms,
            timings: RwLock::new(VecDeque::with_capacity(TIMING_BUFFER_CAP)),
            system: Mutex::new(System::new()),
        }
    }

    /// Record one executed query into the rolling buffer. A single atomic
    /// append under the write lock; the oldest entry falls off past the cap.
    pub async fn record_query(&self, duration_ms: u64, success: bool) {
        let mut timings = self.timings.write().await;
        if timings.len() == TIMING_BUFFER_CAP {
            timings.pop_front();
        }
        timings.push_back(QueryTiming {
            at: Utc::now(),
            duration_ms,
            success,
        });
    }

    /// Number of timings currently buffered
    pub async fn recorded_count(&self) -> usize {
        self.timings.read().await.len()
    }

    /// Sample everything into one immutable metric
    pub async fn collect(&self) -> PerformanceMetric {
        let pool = self.manager.pool_status().await.unwrap_or_default();
        let queries = self.query_snapshot().await;
        let system = self.system_snapshot().await;

        debug!(
            pool_utilization = pool.utilization_percent,
            query_count = queries.count,
            cpu = system.cpu_percent,
            "collected performance metric"
        );

        PerformanceMetric {
            timestamp: Utc::now(),
            pool,
            queries,
            system,
        }
    }

    async fn query_snapshot(&self) -> QuerySnapshot {
        let timings = self.timings.read().await;
        if timings.is_empty() {
            return QuerySnapshot::default();
        }

        let count = timings.len() as u64;
        let mut total: u64 = 0;
        let mut min = u64::MAX;
        let mut max = 0u64;
        let mut slow = 0u64;
        let mut failed = 0u64;

        for timing in timings.iter() {
            total += timing.duration_ms;
            min = min.min(timing.duration_ms);
            max = max.max(timing.duration_ms);
            if timing.duration_ms >= self.slow_query_threshold_ms {
                slow += 1;
            }
            if !timing.success {
                failed += 1;
            }
        }

        // throughput across the wall-clock span the buffer covers
        let span_seconds = match (timings.front(), timings.back()) {
            (Some(first), Some(last)) => {
                ((last.at - first.at).num_milliseconds().max(1000) as f64) / 1000.0
            }
            _ => 1.0,
        };

        QuerySnapshot {
            count,
            slow_count: slow,
            failed_count: failed,
            avg_time_ms: total as f64 / count as f64,
            min_time_ms: min,
            max_time_ms: max,
            per_second: count as f64 / span_seconds,
        }
    }

    async fn system_snapshot(&self) -> SystemSnapshot {
        let mut system = self.system.lock().await;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_percent = f64::from(system.global_cpu_usage());
        let memory_percent = if system.total_memory() > 0 {
            system.used_memory() as f64 / system.total_memory() as f64 * 100.0
        } else {
            0.0
        };

        // worst-case filesystem fill level across mounted disks
        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                let used = disk.total_space() - disk.available_space();
                used as f64 / disk.total_space() as f64 * 100.0
            })
            .fold(0.0_f64, f64::max);

        SystemSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent,
        }
    }
}
