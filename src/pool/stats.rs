//! Running pool counters and their point-in-time snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Cumulative counters, mutated only under the pool lock.
#[derive(Debug, Default)]
pub(super) struct Counters {
    pub total_runs: u64,
    pub error_count: u64,
    pub total_run_time: Duration,
    pub total_queue_wait: Duration,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Counters {
    /// Records one finished job.
    pub fn record_run(&mut self, elapsed: Duration, failed: bool) {
        self.total_runs += 1;
        self.total_run_time += elapsed;
        if failed {
            self.error_count += 1;
        }
        self.last_run_at = Some(Utc::now());
    }

    /// Builds a snapshot; averages are zero until the first job completes.
    pub fn snapshot(&self, pool_size: usize, active: usize, queued: usize) -> PoolStats {
        PoolStats {
            pool_size,
            active_workers: active,
            queue_length: queued,
            total_runs: self.total_runs,
            avg_run_ms: average_ms(self.total_run_time, self.total_runs),
            avg_queue_wait_ms: average_ms(self.total_queue_wait, self.total_runs),
            error_count: self.error_count,
            last_run_at: self.last_run_at,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    total.as_secs_f64() * 1000.0 / count as f64
}

/// Point-in-time view of pool load and latency.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub pool_size: usize,
    pub active_workers: usize,
    pub queue_length: usize,
    pub total_runs: u64,
    pub avg_run_ms: f64,
    pub avg_queue_wait_ms: f64,
    pub error_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_counters_average_to_zero() {
        let stats = Counters::default().snapshot(4, 0, 0);
        assert_eq!(stats.avg_run_ms, 0.0);
        assert_eq!(stats.avg_queue_wait_ms, 0.0);
        assert!(stats.last_run_at.is_none());
    }

    #[test]
    fn test_record_run_updates_averages() {
        let mut counters = Counters::default();
        counters.record_run(Duration::from_millis(100), false);
        counters.record_run(Duration::from_millis(300), true);
        counters.total_queue_wait = Duration::from_millis(50);

        let stats = counters.snapshot(2, 1, 3);
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.error_count, 1);
        assert!((stats.avg_run_ms - 200.0).abs() < 1e-9);
        assert!((stats.avg_queue_wait_ms - 25.0).abs() < 1e-9);
        assert_eq!(stats.active_workers, 1);
        assert_eq!(stats.queue_length, 3);
        assert!(stats.last_run_at.is_some());
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let json = serde_json::to_value(Counters::default().snapshot(2, 0, 0)).unwrap();
        assert_eq!(json["poolSize"], 2);
        assert_eq!(json["activeWorkers"], 0);
        assert_eq!(json["queueLength"], 0);
        assert_eq!(json["avgQueueWaitMs"], 0.0);
        assert!(json["lastRunAt"].is_null());
    }
}
