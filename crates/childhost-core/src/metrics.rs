use crate::process::ProcessKind;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Health counters recorded when a child disconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ChildProcessMetric {
    Crashed,
    CrashedWasAlive,
    Killed,
    KilledWasAlive,
    DisconnectedAlive,
    Disconnected,
}

impl ChildProcessMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildProcessMetric::Crashed => "ChildProcess.Crashed",
            ChildProcessMetric::CrashedWasAlive => "ChildProcess.CrashedWasAlive",
            ChildProcessMetric::Killed => "ChildProcess.Killed",
            ChildProcessMetric::KilledWasAlive => "ChildProcess.KilledWasAlive",
            ChildProcessMetric::DisconnectedAlive => "ChildProcess.DisconnectedAlive",
            ChildProcessMetric::Disconnected => "ChildProcess.Disconnected",
        }
    }
}

/// Monotonic counters keyed by metric and process kind
#[derive(Debug, Default)]
pub struct ChildProcessMetrics {
    counters: BTreeMap<(ChildProcessMetric, ProcessKind), u64>,
}

impl ChildProcessMetrics {
    pub fn record(&mut self, metric: ChildProcessMetric, kind: ProcessKind) {
        let count = self.counters.entry((metric, kind)).or_insert(0);
        *count += 1;
        debug!(metric = metric.as_str(), %kind, count = *count, "Recorded child process metric");
    }

    pub fn count(&self, metric: ChildProcessMetric, kind: ProcessKind) -> u64 {
        self.counters.get(&(metric, kind)).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries: self
                .counters
                .iter()
                .map(|(&(metric, kind), &count)| MetricEntry {
                    metric,
                    kind,
                    count,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricEntry {
    pub metric: ChildProcessMetric,
    pub kind: ProcessKind,
    pub count: u64,
}

/// Point-in-time copy of the counters, ready for export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub entries: Vec<MetricEntry>,
}

impl MetricsSnapshot {
    pub fn count(&self, metric: ChildProcessMetric, kind: ProcessKind) -> u64 {
        self.entries
            .iter()
            .find(|e| e.metric == metric && e.kind == kind)
            .map_or(0, |e| e.count)
    }

    /// Sum over all process kinds
    pub fn total(&self, metric: ChildProcessMetric) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.metric == metric)
            .map(|e| e.count)
            .sum()
    }
}
