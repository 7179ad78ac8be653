//! Runtime metrics recovered from the judge environment's log files.
//!
//! The runner home directory collects `<timestamp> <value>` samples for
//! CPU time and memory while the submission executes. When the judge
//! does not report its own metrics, the orchestrator derives them from
//! these logs after a successful run.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Aggregated resource usage of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_memory: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_anonymous_memory: Option<i64>,
}

impl RuntimeMetrics {
    pub fn is_empty(&self) -> bool {
        *self == RuntimeMetrics::default()
    }
}

/// One parsed log: ordered `(timestamp, value)` samples.
struct SampleLog {
    samples: Vec<(i64, i64)>,
}

impl SampleLog {
    fn parse(content: &str) -> Self {
        let samples = content
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let timestamp = parts.next()?.parse().ok()?;
                let value = parts.next()?.parse().ok()?;
                Some((timestamp, value))
            })
            .collect();
        Self { samples }
    }

    /// Difference between the largest and smallest logged value.
    fn value_range(&self) -> Option<i64> {
        let min = self.samples.iter().map(|(_, v)| *v).min()?;
        let max = self.samples.iter().map(|(_, v)| *v).max()?;
        Some(max - min)
    }

    fn last_timestamp(&self) -> Option<i64> {
        self.samples.last().map(|(t, _)| *t)
    }
}

async fn read_log(dir: &Path, name: &str) -> Option<SampleLog> {
    let path = dir.join(name);
    match fs::read_to_string(&path).await {
        Ok(content) => Some(SampleLog::parse(&content)),
        Err(e) => {
            debug!("No usable metrics log at {:?}: {}", path, e);
            None
        }
    }
}

/// Collect metrics from the log files under `resources_dir`.
///
/// Missing or malformed logs leave the corresponding fields unset; the
/// caller drops the whole object when nothing was measurable.
pub async fn collect(resources_dir: &Path) -> RuntimeMetrics {
    let mut metrics = RuntimeMetrics::default();

    if let Some(log) = read_log(resources_dir, "user_time.logs").await {
        // Timestamps are in milliseconds, CPU samples in jiffies.
        metrics.wall_time = log.last_timestamp().map(|t| t as f64 / 1000.0);
        metrics.user_time = log.value_range().map(|r| r as f64 / 100.0);
    }
    if let Some(log) = read_log(resources_dir, "system_time.logs").await {
        metrics.system_time = log.value_range().map(|r| r as f64 / 100.0);
    }
    if let Some(log) = read_log(resources_dir, "memory_usage.logs").await {
        metrics.peak_memory = log.value_range();
    }
    if let Some(log) = read_log(resources_dir, "anonymous_memory.logs").await {
        metrics.peak_anonymous_memory = log.value_range();
    }

    metrics
}
