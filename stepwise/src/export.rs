//! Publishing step values into the `metrics` facade
//!
//! A step meter's values are already per-step, so every series is published
//! as a gauge holding the value of the step that closed most recently.
//! Publish once per step. Which recorder receives the gauges, Prometheus or
//! anything else, is up to the caller.

use metrics::gauge;

use crate::meter::{Counter, DistributionSummary, Snapshot, Timer};

/// Publishes step meters under a fixed set of labels.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    labels: Vec<(String, String)>,
}

impl Exporter {
    /// Create a new `Exporter` attaching `labels` to every series.
    #[must_use]
    pub fn new(labels: Vec<(String, String)>) -> Self {
        Self { labels }
    }

    /// Publish `counter` as the gauge `name`, returning the value published.
    pub fn publish_counter<T>(&self, name: &str, counter: &T) -> f64
    where
        T: Counter + ?Sized,
    {
        let count = counter.count();
        gauge!(name.to_string(), &self.labels).set(count);
        count
    }

    /// Publish `timer` in its base time unit as `<name>_count`, `<name>_sum`,
    /// `<name>_max` and `<name>_mean`.
    pub fn publish_timer<T>(&self, name: &str, timer: &T) -> Snapshot
    where
        T: Timer + ?Sized,
    {
        let snapshot = timer.snapshot(timer.base_time_unit());
        self.publish_snapshot(name, snapshot);
        snapshot
    }

    /// Publish `summary` as `<name>_count`, `<name>_sum`, `<name>_max` and
    /// `<name>_mean`.
    pub fn publish_summary<T>(&self, name: &str, summary: &T) -> Snapshot
    where
        T: DistributionSummary + ?Sized,
    {
        let snapshot = summary.snapshot();
        self.publish_snapshot(name, snapshot);
        snapshot
    }

    fn publish_snapshot(&self, name: &str, snapshot: Snapshot) {
        gauge!(format!("{name}_count"), &self.labels).set(snapshot.count as f64);
        gauge!(format!("{name}_sum"), &self.labels).set(snapshot.total);
        gauge!(format!("{name}_max"), &self.labels).set(snapshot.max);
        gauge!(format!("{name}_mean"), &self.labels).set(snapshot.mean);
    }
}

#[cfg(all(test, not(loom)))]
#[allow(clippy::mutable_key_type)] // CompositeKey has interior mutability
mod tests {
    use std::num::NonZeroU64;

    use metrics::{Key, Label};
    use metrics_util::{
        CompositeKey, MetricKind,
        debugging::{DebugValue, DebuggingRecorder},
    };
    use stepwise_clock::MockClock;

    use super::Exporter;
    use crate::{
        config::Settings,
        meter::{StepCounter, StepDistributionSummary, StepTimer},
        time::TimeUnit,
    };

    const STEP: u64 = 10;

    fn gauge(
        snapshot: &std::collections::HashMap<
            CompositeKey,
            (
                Option<metrics::Unit>,
                Option<metrics::SharedString>,
                DebugValue,
            ),
        >,
        name: &'static str,
    ) -> f64 {
        let key = CompositeKey::new(
            MetricKind::Gauge,
            Key::from_parts(name, vec![Label::new("service", "checkout")]),
        );
        match snapshot.get(&key).expect("metric not found").2 {
            DebugValue::Gauge(value) => value.into_inner(),
            _ => panic!("unexpected metric type"),
        }
    }

    #[test]
    fn publishes_previous_step() {
        let clock = MockClock::new();
        let settings = Settings {
            base_time_unit: TimeUnit::Milliseconds,
            ..Settings::with_step_millis(STEP).unwrap()
        };
        let timer = StepTimer::new(clock.clone(), &settings);
        let summary = StepDistributionSummary::new(clock.clone(), &settings, 1.0).unwrap();
        let counter = StepCounter::new(clock.clone(), NonZeroU64::new(STEP).unwrap());

        timer.record(50, TimeUnit::Milliseconds);
        timer.record(100, TimeUnit::Milliseconds);
        summary.record(512.0);
        counter.increment_by(3.0);
        clock.add_millis(STEP);

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let exporter = Exporter::new(vec![("service".to_string(), "checkout".to_string())]);
        metrics::with_local_recorder(&recorder, || {
            let published = exporter.publish_timer("request_latency", &timer);
            assert_eq!(published.count, 2);
            exporter.publish_summary("payload_bytes", &summary);
            exporter.publish_counter("requests", &counter);
        });

        let snapshot = snapshotter.snapshot().into_hashmap();
        assert!((gauge(&snapshot, "request_latency_count") - 2.0).abs() < f64::EPSILON);
        assert!((gauge(&snapshot, "request_latency_sum") - 150.0).abs() < 1e-9);
        assert!((gauge(&snapshot, "request_latency_max") - 100.0).abs() < 1e-9);
        assert!((gauge(&snapshot, "request_latency_mean") - 75.0).abs() < 1e-9);
        assert!((gauge(&snapshot, "payload_bytes_sum") - 512.0).abs() < f64::EPSILON);
        assert!((gauge(&snapshot, "requests") - 3.0).abs() < f64::EPSILON);
    }
}
