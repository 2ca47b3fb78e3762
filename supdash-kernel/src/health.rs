use crate::models::AggregateReport;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub daemons_tracked: u32,
    pub aggregations: u64,
    /// Démons injoignables lors de la dernière agrégation
    pub last_unreachable: u64,
    pub control_actions: u64,
    pub control_failures: u64,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    aggregations: Arc<AtomicU64>,
    last_unreachable: Arc<AtomicU64>,
    control_actions: Arc<AtomicU64>,
    control_failures: Arc<AtomicU64>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            aggregations: Arc::new(AtomicU64::new(0)),
            last_unreachable: Arc::new(AtomicU64::new(0)),
            control_actions: Arc::new(AtomicU64::new(0)),
            control_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_aggregation(&self, report: &AggregateReport) {
        let unreachable = report.daemons.iter().filter(|r| r.unreachable).count() as u64;
        self.aggregations.fetch_add(1, Ordering::Relaxed);
        self.last_unreachable.store(unreachable, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, ok: bool) {
        self.control_actions.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.control_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_health(&self, registry: &Registry) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            daemons_tracked: registry.len() as u32,
            aggregations: self.aggregations.load(Ordering::Relaxed),
            last_unreachable: self.last_unreachable.load(Ordering::Relaxed),
            control_actions: self.control_actions.load(Ordering::Relaxed),
            control_failures: self.control_failures.load(Ordering::Relaxed),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    // inconnu hors Linux
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Daemon, DaemonReport, ProcessEntry};
    use time::OffsetDateTime;
    use url::Url;

    fn daemon(host: &str) -> Daemon {
        Daemon::new(host, Url::parse(&format!("http://{host}:9001/RPC2")).unwrap(), vec!["web".into()])
    }

    #[test]
    fn test_counters() {
        let tracker = HealthTracker::new();
        let report = AggregateReport {
            generated_at: OffsetDateTime::now_utc(),
            daemons: vec![DaemonReport {
                daemon: daemon("a"),
                entries: vec![ProcessEntry::error("Failed to connect to http://a:9001/RPC2. connection refused")],
                unreachable: true,
            }],
        };
        tracker.record_aggregation(&report);
        tracker.record_dispatch(true);
        tracker.record_dispatch(false);

        let registry = Registry::in_memory();
        let health = tracker.get_health(&registry);
        assert_eq!(health.aggregations, 1);
        assert_eq!(health.last_unreachable, 1);
        assert_eq!(health.control_actions, 2);
        assert_eq!(health.control_failures, 1);
        assert_eq!(health.daemons_tracked, 0);
    }

    #[test]
    fn test_unreachable_uses_flag_not_message() {
        let tracker = HealthTracker::new();
        // fault distant dont le texte ressemble à une panne de connexion
        let report = AggregateReport {
            generated_at: OffsetDateTime::now_utc(),
            daemons: vec![
                DaemonReport {
                    daemon: daemon("a"),
                    entries: vec![ProcessEntry::error("Failed to connect to database")],
                    unreachable: false,
                },
                DaemonReport { daemon: daemon("b"), entries: vec![], unreachable: true },
            ],
        };
        tracker.record_aggregation(&report);
        assert_eq!(tracker.get_health(&Registry::in_memory()).last_unreachable, 1);
    }
}
