//! Prometheus export through `prometheus-client`.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::time::Duration;

use crate::error::Rejection;
use crate::metrics::MetricSink;
use crate::state::State;

type Labels = Vec<(String, String)>;

fn labels(key: &str, value: &str) -> Labels {
    vec![(key.to_owned(), value.to_owned())]
}

/// A [`MetricSink`] that updates Prometheus metric families.
///
/// Breaker metrics are labelled `service`, bulkhead metrics `pool`.
#[derive(Clone, Default)]
pub struct PrometheusSink {
    breaker_state: Family<Labels, Gauge>,
    breaker_failures: Family<Labels, Counter>,
    breaker_rejections: Family<Labels, Counter>,
    calls: Family<Labels, Counter>,
    bulkhead_active: Family<Labels, Gauge>,
    bulkhead_rejected: Family<Labels, Counter>,
}

impl PrometheusSink {
    /// Creates the metric families and registers them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let sink = Self::default();

        registry.register(
            "circuit_breaker_state",
            "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            sink.breaker_state.clone(),
        );
        registry.register(
            "circuit_breaker_failures",
            "Total number of failed calls seen by the circuit breaker",
            sink.breaker_failures.clone(),
        );
        registry.register(
            "circuit_breaker_rejections",
            "Total number of calls refused before they were attempted",
            sink.breaker_rejections.clone(),
        );
        registry.register(
            "guarded_calls",
            "Total number of attempted calls by outcome",
            sink.calls.clone(),
        );
        registry.register(
            "bulkhead_active",
            "Current number of active requests in bulkhead",
            sink.bulkhead_active.clone(),
        );
        registry.register(
            "bulkhead_rejected",
            "Total number of requests rejected by bulkhead",
            sink.bulkhead_rejected.clone(),
        );

        sink
    }
}

impl MetricSink for PrometheusSink {
    fn record_state_transition(&self, resource: &str, _from: State, to: State) {
        self.breaker_state
            .get_or_create(&labels("service", resource))
            .set(i64::from(to.code()));
    }

    fn record_call(&self, resource: &str, success: bool, _duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.calls
            .get_or_create(&vec![
                ("service".to_owned(), resource.to_owned()),
                ("outcome".to_owned(), outcome.to_owned()),
            ])
            .inc();

        if !success {
            self.breaker_failures
                .get_or_create(&labels("service", resource))
                .inc();
        }
    }

    fn record_rejection(&self, resource: &str, reason: Rejection) {
        // Only the breaker refuses with `CircuitOpen`; the rest come from bulkhead admission.
        let (family, key) = match reason {
            Rejection::CircuitOpen => (&self.breaker_rejections, "service"),
            Rejection::BulkheadFull | Rejection::Cancelled => (&self.bulkhead_rejected, "pool"),
        };
        family
            .get_or_create(&vec![
                (key.to_owned(), resource.to_owned()),
                ("reason".to_owned(), reason.as_str().to_owned()),
            ])
            .inc();
    }

    fn record_slot_acquired(&self, pool: &str) {
        self.bulkhead_active
            .get_or_create(&labels("pool", pool))
            .inc();
    }

    fn record_slot_released(&self, pool: &str) {
        self.bulkhead_active
            .get_or_create(&labels("pool", pool))
            .dec();
    }

    fn register_breaker(&self, resource: &str, initial: State) {
        self.breaker_state
            .get_or_create(&labels("service", resource))
            .set(i64::from(initial.code()));
    }

    fn register_bulkhead(&self, pool: &str, _capacity: usize) {
        self.bulkhead_active.get_or_create(&labels("pool", pool));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bulkhead, CancelToken, CircuitBreaker};
    use prometheus_client::encoding::text::encode;

    #[test]
    fn exports_breaker_and_bulkhead_metrics() {
        let mut registry = Registry::default();
        let sink = PrometheusSink::new(&mut registry);

        let breaker = CircuitBreaker::builder("payment")
            .failure_threshold(1)
            .metric_sink(sink.clone())
            .build()
            .unwrap();
        let bulkhead = Bulkhead::builder("payment")
            .capacity(1)
            .metric_sink(sink)
            .build()
            .unwrap();

        let _ = breaker.call(|| Err::<(), _>("down"));
        let _ = breaker.call(|| Ok::<_, &str>(()));
        let _ = bulkhead.try_execute(|| {
            let _ = bulkhead.try_execute(|| Ok::<_, &str>(()));
            Ok::<_, &str>(())
        });
        let cancelled = CancelToken::new();
        cancelled.cancel();
        let _ = bulkhead.execute(&cancelled, || Ok::<_, &str>(()));

        let mut text = String::new();
        encode(&mut text, &registry).unwrap();

        assert!(text.contains("circuit_breaker_state{service=\"payment\"} 1"));
        assert!(text.contains("circuit_breaker_failures_total{service=\"payment\"} 1"));
        assert!(text.contains(
            "circuit_breaker_rejections_total{service=\"payment\",reason=\"circuit_open\"} 1"
        ));
        assert!(text.contains(
            "bulkhead_rejected_total{pool=\"payment\",reason=\"bulkhead_full\"} 1"
        ));
        assert!(text.contains(
            "bulkhead_rejected_total{pool=\"payment\",reason=\"cancelled\"} 1"
        ));
        assert!(!text
            .lines()
            .any(|line| line.starts_with("circuit_breaker_rejections_total")
                && line.contains("cancelled")));
        assert!(text.contains("bulkhead_active{pool=\"payment\"} 0"));
    }
}
