//! Named metric series and operation lifecycle tracking.
//!
//! Series keep a bounded ring of recent data points; the oldest points
//! fall off past the configured cap. Operation lifecycles produce a
//! duration timer keyed by operation type plus an overall success rate.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use strata_core::OperationType;
use uuid::Uuid;

/// What a metric series measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Timer,
    Rate,
}

/// One time-stamped sample.
#[derive(Debug, Clone, Serialize)]
pub struct MetricDataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Point-in-time aggregation over a window of samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMetrics {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Lifecycle record of one tracked operation.
#[derive(Debug, Clone)]
pub struct OperationMetadata {
    pub operation_id: Uuid,
    pub operation_type: OperationType,
    pub started_at: Instant,
    pub completed_at: Option<Instant>,
    pub succeeded: Option<bool>,
}

#[derive(Debug)]
struct MetricSeries {
    kind: MetricKind,
    points: VecDeque<MetricDataPoint>,
}

#[derive(Debug)]
struct MetricsInner {
    series: Mutex<HashMap<String, MetricSeries>>,
    in_flight: Mutex<HashMap<Uuid, OperationMetadata>>,
    completed: Mutex<VecDeque<OperationMetadata>>,
    retention_points: usize,
}

/// Shared metrics manager; cheap to clone.
#[derive(Debug, Clone)]
pub struct MetricsManager {
    inner: Arc<MetricsInner>,
}

impl MetricsManager {
    pub fn new(retention_points: usize) -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                series: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                completed: Mutex::new(VecDeque::new()),
                retention_points: retention_points.max(1),
            }),
        }
    }

    /// Record a sample into a named series, dropping the oldest point
    /// past the retention cap.
    pub fn record(&self, name: &str, kind: MetricKind, value: f64) {
        let mut series = self.inner.series.lock();
        let entry = series.entry(name.to_string()).or_insert_with(|| MetricSeries {
            kind,
            points: VecDeque::new(),
        });
        entry.points.push_back(MetricDataPoint {
            timestamp: Utc::now(),
            value,
        });
        while entry.points.len() > self.inner.retention_points {
            entry.points.pop_front();
        }
    }

    /// Begin tracking an operation's lifecycle.
    pub fn start_operation(&self, operation_id: Uuid, operation_type: OperationType) {
        self.inner.in_flight.lock().insert(
            operation_id,
            OperationMetadata {
                operation_id,
                operation_type,
                started_at: Instant::now(),
                completed_at: None,
                succeeded: None,
            },
        );
    }

    /// Finish tracking an operation, producing a duration timer keyed by
    /// its operation type.
    pub fn complete_operation(&self, operation_id: Uuid, succeeded: bool) {
        let Some(mut metadata) = self.inner.in_flight.lock().remove(&operation_id) else {
            return;
        };
        let now = Instant::now();
        metadata.completed_at = Some(now);
        metadata.succeeded = Some(succeeded);

        let duration_ms = now.duration_since(metadata.started_at).as_secs_f64() * 1000.0;
        self.record(
            &format!("operation.{}.duration_ms", metadata.operation_type),
            MetricKind::Timer,
            duration_ms,
        );

        let mut completed = self.inner.completed.lock();
        completed.push_back(metadata);
        while completed.len() > self.inner.retention_points {
            completed.pop_front();
        }
    }

    /// Aggregate a series over `[start, end)`. Returns `None` for an
    /// unknown series or an empty window.
    pub fn aggregate(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<AggregatedMetrics> {
        let series = self.inner.series.lock();
        let entry = series.get(name)?;

        let values: Vec<f64> = entry
            .points
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp < end)
            .map(|p| p.value)
            .collect();
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let sum: f64 = values.iter().sum();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(AggregatedMetrics {
            count,
            sum,
            min,
            max,
            avg: sum / count as f64,
        })
    }

    /// Fraction of completed operations that succeeded.
    pub fn success_rate(&self) -> f64 {
        let completed = self.inner.completed.lock();
        if completed.is_empty() {
            return 0.0;
        }
        let succeeded = completed
            .iter()
            .filter(|m| m.succeeded == Some(true))
            .count();
        succeeded as f64 / completed.len() as f64
    }

    /// Kind of a named series, if it exists.
    pub fn series_kind(&self, name: &str) -> Option<MetricKind> {
        self.inner.series.lock().get(name).map(|s| s.kind)
    }

    /// Number of retained points in a named series.
    pub fn series_len(&self, name: &str) -> usize {
        self.inner
            .series
            .lock()
            .get(name)
            .map_or(0, |s| s.points.len())
    }

    /// Currently tracked, unfinished operations.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn ring_drops_oldest_points() {
        let metrics = MetricsManager::new(3);
        for i in 0..5 {
            metrics.record("queue.length", MetricKind::Gauge, i as f64);
        }
        assert_eq!(metrics.series_len("queue.length"), 3);

        let now = Utc::now();
        let agg = metrics
            .aggregate("queue.length", now - ChronoDuration::minutes(1), now + ChronoDuration::minutes(1))
            .unwrap();
        // Points 0 and 1 fell off the ring.
        assert_eq!(agg.count, 3);
        assert_eq!(agg.min, 2.0);
        assert_eq!(agg.max, 4.0);
        assert!((agg.avg - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn aggregate_respects_the_window() {
        let metrics = MetricsManager::new(100);
        metrics.record("m", MetricKind::Counter, 1.0);

        let past_end = Utc::now() - ChronoDuration::minutes(5);
        assert!(metrics
            .aggregate("m", past_end - ChronoDuration::minutes(5), past_end)
            .is_none());
        assert!(metrics.aggregate("unknown", past_end, Utc::now()).is_none());
    }

    #[test]
    fn operation_lifecycle_produces_a_timer() {
        let metrics = MetricsManager::new(100);
        let id = Uuid::new_v4();

        metrics.start_operation(id, OperationType::Set);
        assert_eq!(metrics.in_flight_count(), 1);

        metrics.complete_operation(id, true);
        assert_eq!(metrics.in_flight_count(), 0);
        assert_eq!(
            metrics.series_kind("operation.set.duration_ms"),
            Some(MetricKind::Timer)
        );
        assert_eq!(metrics.series_len("operation.set.duration_ms"), 1);
    }

    #[test]
    fn success_rate_counts_completed_operations() {
        let metrics = MetricsManager::new(100);
        assert_eq!(metrics.success_rate(), 0.0);

        for succeeded in [true, true, false, true] {
            let id = Uuid::new_v4();
            metrics.start_operation(id, OperationType::Delete);
            metrics.complete_operation(id, succeeded);
        }
        assert!((metrics.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn completing_unknown_operation_is_a_noop() {
        let metrics = MetricsManager::new(10);
        metrics.complete_operation(Uuid::new_v4(), true);
        assert_eq!(metrics.success_rate(), 0.0);
    }
}
