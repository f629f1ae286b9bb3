//! Metrics collection and export for expiring pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use expiring_pool::{ExpiringPool, PoolConfiguration};
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// let pool: ExpiringPool<String, usize, Infallible> =
///     ExpiringPool::new(|key: &String| Ok(key.len()), PoolConfiguration::default());
///
/// let key = "conn".to_string();
/// pool.acquire(&key).unwrap();
/// pool.release(&key, Duration::from_secs(30));
///
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.total_constructed, 1);
/// assert_eq!(metrics.idle_entries, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Successful acquisitions, including ones that revived an idle entry
    pub total_acquired: usize,

    /// Releases of tracked keys
    pub total_released: usize,

    /// Values produced by the constructor
    pub total_constructed: usize,

    /// Values handed to the destructor successfully
    pub total_destroyed: usize,

    /// Constructor calls that returned an error
    pub construction_failures: usize,

    /// Destructor calls that returned an error
    pub destruction_failures: usize,

    /// Keys currently tracked, in use or idle
    pub tracked_entries: usize,

    /// Keys with no references that are waiting for their deadline
    pub idle_entries: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_constructed".to_string(), self.total_constructed.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("construction_failures".to_string(), self.construction_failures.to_string());
        metrics.insert("destruction_failures".to_string(), self.destruction_failures.to_string());
        metrics.insert("tracked_entries".to_string(), self.tracked_entries.to_string());
        metrics.insert("idle_entries".to_string(), self.idle_entries.to_string());
        metrics
    }

    /// Entries currently referenced by at least one caller
    pub fn active_entries(&self) -> usize {
        self.tracked_entries.saturating_sub(self.idle_entries)
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use expiring_pool::{ExpiringPool, PoolConfiguration};
    /// use std::collections::HashMap;
    /// use std::convert::Infallible;
    ///
    /// let pool: ExpiringPool<u32, u32, Infallible> =
    ///     ExpiringPool::new(|key: &u32| Ok(*key), PoolConfiguration::default());
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("sessions", Some(&tags));
    /// assert!(output.contains("expiringpool_entries_tracked"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges = [
            ("expiringpool_entries_tracked", "Keys currently tracked", metrics.tracked_entries),
            ("expiringpool_entries_idle", "Idle keys awaiting expiry", metrics.idle_entries),
            ("expiringpool_entries_active", "Keys currently in use", metrics.active_entries()),
        ];
        for (name, help, value) in gauges {
            Self::push_metric(&mut output, name, help, "gauge", &labels, value);
        }

        let counters = [
            ("expiringpool_acquired_total", "Total acquisitions", metrics.total_acquired),
            ("expiringpool_released_total", "Total releases", metrics.total_released),
            ("expiringpool_constructed_total", "Total values constructed", metrics.total_constructed),
            ("expiringpool_destroyed_total", "Total values destroyed", metrics.total_destroyed),
            (
                "expiringpool_construction_failures_total",
                "Constructor failures",
                metrics.construction_failures,
            ),
            (
                "expiringpool_destruction_failures_total",
                "Destructor failures",
                metrics.destruction_failures,
            ),
        ];
        for (name, help, value) in counters {
            Self::push_metric(&mut output, name, help, "counter", &labels, value);
        }

        output
    }

    fn push_metric(output: &mut String, name: &str, help: &str, kind: &str, labels: &str, value: usize) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_constructed: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub construction_failures: AtomicUsize,
    pub destruction_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, tracked: usize, idle: usize) -> PoolMetrics {
        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_constructed: self.total_constructed.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            destruction_failures: self.destruction_failures.load(Ordering::Relaxed),
            tracked_entries: tracked,
            idle_entries: idle,
        }
    }
}
