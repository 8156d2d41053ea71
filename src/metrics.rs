//! Instrumentation sinks for guard events.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Rejection;
use crate::state::State;

/// Trait for metrics sinks that can receive guard events.
///
/// Every event carries the resource name the guard was built with. The
/// sink decides how (and whether) to store or export it.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a circuit breaker state transition.
    fn record_state_transition(&self, resource: &str, from: State, to: State);

    /// Records the outcome of an attempted call.
    fn record_call(&self, resource: &str, success: bool, duration: Duration);

    /// Records a call refused before it was attempted.
    fn record_rejection(&self, resource: &str, reason: Rejection);

    /// Records a bulkhead slot being taken.
    fn record_slot_acquired(&self, pool: &str);

    /// Records a bulkhead slot being given back.
    fn record_slot_released(&self, pool: &str);

    /// Called once when a circuit breaker is built.
    fn register_breaker(&self, _resource: &str, _initial: State) {}

    /// Called once when a bulkhead is built.
    fn register_bulkhead(&self, _pool: &str, _capacity: usize) {}
}

/// A null metrics sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state_transition(&self, _resource: &str, _from: State, _to: State) {}
    fn record_call(&self, _resource: &str, _success: bool, _duration: Duration) {}
    fn record_rejection(&self, _resource: &str, _reason: Rejection) {}
    fn record_slot_acquired(&self, _pool: &str) {}
    fn record_slot_released(&self, _pool: &str) {}
}

impl<M: MetricSink + ?Sized> MetricSink for Arc<M> {
    fn record_state_transition(&self, resource: &str, from: State, to: State) {
        (**self).record_state_transition(resource, from, to);
    }

    fn record_call(&self, resource: &str, success: bool, duration: Duration) {
        (**self).record_call(resource, success, duration);
    }

    fn record_rejection(&self, resource: &str, reason: Rejection) {
        (**self).record_rejection(resource, reason);
    }

    fn record_slot_acquired(&self, pool: &str) {
        (**self).record_slot_acquired(pool);
    }

    fn record_slot_released(&self, pool: &str) {
        (**self).record_slot_released(pool);
    }

    fn register_breaker(&self, resource: &str, initial: State) {
        (**self).register_breaker(resource, initial);
    }

    fn register_bulkhead(&self, pool: &str, capacity: usize) {
        (**self).register_bulkhead(pool, capacity);
    }
}

// Marks a resource whose breaker state has not been reported since it was (re)created.
const STATE_UNREPORTED: u8 = u8::MAX;

#[derive(Debug)]
struct ResourceCounters {
    state: AtomicU8,
    transitions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    circuit_open: AtomicU64,
    bulkhead_full: AtomicU64,
    cancelled: AtomicU64,
    in_flight: AtomicUsize,
    capacity: AtomicUsize,
}

impl Default for ResourceCounters {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(STATE_UNREPORTED),
            transitions: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            circuit_open: AtomicU64::new(0),
            bulkhead_full: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
        }
    }
}

/// Point-in-time view of the counters for one resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    /// Last reported circuit breaker state.
    ///
    /// `None` when no breaker registered under this name, or when the entry was
    /// removed and recreated by a later event before the breaker's next transition.
    pub state: Option<State>,
    /// Number of state transitions.
    pub transitions: u64,
    /// Attempted calls that succeeded.
    pub successes: u64,
    /// Attempted calls that failed.
    pub failures: u64,
    /// Calls refused by the circuit breaker.
    pub circuit_open_rejections: u64,
    /// Calls refused by the bulkhead.
    pub bulkhead_full_rejections: u64,
    /// Calls refused because the caller was cancelled.
    pub cancellations: u64,
    /// Calls currently holding a bulkhead slot.
    pub in_flight: usize,
    /// Bulkhead capacity, zero if no bulkhead registered under this name.
    pub capacity: usize,
}

impl ResourceSnapshot {
    /// Total rejections of any kind.
    pub fn rejections(&self) -> u64 {
        self.circuit_open_rejections + self.bulkhead_full_rejections + self.cancellations
    }
}

/// Process-wide counters keyed by resource name.
///
/// Build one at startup, hand clones of the `Arc` to every guard through its
/// builder, and read it from whatever exports diagnostics. Entries live
/// until [`remove`](Self::remove) or [`clear`](Self::clear) is called.
///
/// ```
/// use bulwark::{Bulkhead, MetricsRegistry};
/// use std::sync::Arc;
///
/// let registry = Arc::new(MetricsRegistry::new());
/// let bulkhead = Bulkhead::builder("payment")
///     .capacity(2)
///     .metric_sink(registry.clone())
///     .build()
///     .unwrap();
///
/// let _ = bulkhead.try_execute(|| Ok::<_, std::io::Error>(()));
/// let snapshot = registry.snapshot("payment").unwrap();
/// assert_eq!(snapshot.capacity, 2);
/// assert_eq!(snapshot.in_flight, 0);
/// ```
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    resources: RwLock<HashMap<String, Arc<ResourceCounters>, ahash::RandomState>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters for `resource`, if any event has been recorded for it.
    pub fn snapshot(&self, resource: &str) -> Option<ResourceSnapshot> {
        let resources = self.resources.read();
        resources.get(resource).map(|c| ResourceSnapshot {
            state: match c.state.load(Ordering::Relaxed) {
                STATE_UNREPORTED => None,
                code => Some(State::from(code)),
            },
            transitions: c.transitions.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            circuit_open_rejections: c.circuit_open.load(Ordering::Relaxed),
            bulkhead_full_rejections: c.bulkhead_full.load(Ordering::Relaxed),
            cancellations: c.cancelled.load(Ordering::Relaxed),
            in_flight: c.in_flight.load(Ordering::Relaxed),
            capacity: c.capacity.load(Ordering::Relaxed),
        })
    }

    /// Names of all tracked resources, sorted.
    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Drops the counters for one resource. Returns whether it was tracked.
    pub fn remove(&self, resource: &str) -> bool {
        self.resources.write().remove(resource).is_some()
    }

    /// Drops all counters.
    pub fn clear(&self) {
        self.resources.write().clear();
    }

    fn counters(&self, resource: &str) -> Arc<ResourceCounters> {
        if let Some(counters) = self.resources.read().get(resource) {
            return Arc::clone(counters);
        }

        let mut resources = self.resources.write();
        Arc::clone(resources.entry(resource.to_owned()).or_default())
    }
}

impl MetricSink for MetricsRegistry {
    fn record_state_transition(&self, resource: &str, _from: State, to: State) {
        let counters = self.counters(resource);
        counters.state.store(to.code(), Ordering::Relaxed);
        counters.transitions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_call(&self, resource: &str, success: bool, _duration: Duration) {
        let counters = self.counters(resource);
        if success {
            counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_rejection(&self, resource: &str, reason: Rejection) {
        let counters = self.counters(resource);
        let counter = match reason {
            Rejection::CircuitOpen => &counters.circuit_open,
            Rejection::BulkheadFull => &counters.bulkhead_full,
            Rejection::Cancelled => &counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_slot_acquired(&self, pool: &str) {
        self.counters(pool).in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn record_slot_released(&self, pool: &str) {
        let counters = self.counters(pool);
        // A registry cleared mid-call may see a release without its acquire.
        let _ = counters
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn register_breaker(&self, resource: &str, initial: State) {
        self.counters(resource)
            .state
            .store(initial.code(), Ordering::Relaxed);
    }

    fn register_bulkhead(&self, pool: &str, capacity: usize) {
        self.counters(pool)
            .capacity
            .store(capacity, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_kept_per_resource() {
        let registry = MetricsRegistry::new();
        registry.record_call("payment", false, Duration::ZERO);
        registry.record_call("payment", true, Duration::ZERO);
        registry.record_rejection("payment", Rejection::CircuitOpen);
        registry.record_rejection("order", Rejection::BulkheadFull);
        registry.record_state_transition("payment", State::Closed, State::Open);

        let payment = registry.snapshot("payment").unwrap();
        assert_eq!(payment.state, Some(State::Open));
        assert_eq!(payment.failures, 1);
        assert_eq!(payment.successes, 1);
        assert_eq!(payment.rejections(), 1);

        let order = registry.snapshot("order").unwrap();
        assert_eq!(order.bulkhead_full_rejections, 1);
        assert_eq!(order.state, None);

        assert_eq!(registry.resources(), vec!["order", "payment"]);
    }

    #[test]
    fn teardown_forgets_resources() {
        let registry = MetricsRegistry::new();
        registry.register_bulkhead("payment", 10);
        registry.register_breaker("order", State::Closed);

        assert!(registry.remove("payment"));
        assert!(!registry.remove("payment"));
        assert!(registry.snapshot("payment").is_none());

        registry.clear();
        assert!(registry.resources().is_empty());
    }

    #[test]
    fn recreated_entry_does_not_guess_the_state() {
        let registry = MetricsRegistry::new();
        registry.register_breaker("payment", State::Closed);
        registry.record_state_transition("payment", State::Closed, State::Open);
        assert_eq!(registry.snapshot("payment").unwrap().state, Some(State::Open));

        assert!(registry.remove("payment"));
        registry.record_rejection("payment", Rejection::CircuitOpen);

        let snapshot = registry.snapshot("payment").unwrap();
        assert_eq!(snapshot.state, None);
        assert_eq!(snapshot.circuit_open_rejections, 1);

        registry.record_state_transition("payment", State::Open, State::HalfOpen);
        assert_eq!(
            registry.snapshot("payment").unwrap().state,
            Some(State::HalfOpen)
        );
    }

    #[test]
    fn shared_registry_works_through_arc() {
        let registry = Arc::new(MetricsRegistry::new());
        let sink: Arc<dyn MetricSink> = registry.clone();
        sink.record_slot_acquired("payment");
        sink.record_slot_acquired("payment");
        sink.record_slot_released("payment");
        assert_eq!(registry.snapshot("payment").unwrap().in_flight, 1);
    }
}
