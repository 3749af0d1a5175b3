use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;

use crate::{resources::Book, Error};

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub external_actions: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "bookstore_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &[],
        )
        .expect("metric options are static");
        let failures = IntCounterVec::new(
            opts!(
                "bookstore_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["instance", "error"],
        )
        .expect("metric options are static");
        let reconciliations = IntCounter::new(
            "bookstore_operator_reconciliations_total",
            "reconciliations",
        )
        .expect("metric options are static");
        let external_actions = IntCounterVec::new(
            opts!(
                "bookstore_operator_external_actions_total",
                "changes made in the bookstore",
            ),
            &["action"],
        )
        .expect("metric options are static");

        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            external_actions,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.external_actions.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, book: &Book, e: &Error) {
        self.failures
            .with_label_values(&[book.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    /// A create, update or delete made it through to the bookstore
    pub fn external_action(&self, action: &str) {
        self.external_actions.with_label_values(&[action]).inc()
    }

    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[]).observe(duration);
    }
}
