//! Configuration for guards.

use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::bulkhead::Bulkhead;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::guard::{Guard, Precedence};
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::telemetry;

/// Failures within the window that trip a breaker by default.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 5;

/// Default width of the trailing failure window.
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(10);

/// Default time a breaker stays open after the last failure.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of concurrent calls a bulkhead admits.
pub const DEFAULT_CAPACITY: usize = 10;

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder {
    name: String,
    failure_threshold: usize,
    failure_window: Duration,
    open_timeout: Duration,
    clock: Arc<dyn Clock>,
    metric_sink: Arc<dyn MetricSink>,
    hook_registry: Arc<HookRegistry>,
}

impl BreakerBuilder {
    /// Creates a new builder with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            clock: Arc::new(SystemClock),
            metric_sink: Arc::new(NullMetricSink),
            hook_registry: Arc::new(HookRegistry::new()),
        }
    }

    /// Sets the number of failures within the window that will trip the circuit.
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the width of the trailing window failures are counted in.
    pub fn failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    /// Sets how long the circuit stays open after the last failure.
    pub fn open_timeout(mut self, duration: Duration) -> Self {
        self.open_timeout = duration;
        self
    }

    /// Sets the time source.
    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sets a metric sink for the circuit breaker.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.metric_sink = Arc::new(sink);
        self
    }

    /// Sets a hook registry for the circuit breaker.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hook_registry = Arc::new(hooks);
        self
    }

    /// Shares a hook registry with other guards.
    pub fn shared_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hook_registry = hooks;
        self
    }

    /// Builds a new circuit breaker with the configured settings.
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let invalid = if self.failure_threshold == 0 {
            Some(ConfigError::ZeroFailureThreshold)
        } else if self.failure_window.is_zero() {
            Some(ConfigError::ZeroFailureWindow)
        } else if self.open_timeout.is_zero() {
            Some(ConfigError::ZeroOpenTimeout)
        } else {
            None
        };

        if let Some(error) = invalid {
            telemetry::invalid_config(&self.name, &error);
            return Err(error);
        }

        Ok(CircuitBreaker::from_parts(
            self.name,
            self.failure_threshold,
            self.failure_window,
            self.open_timeout,
            self.clock,
            self.metric_sink,
            self.hook_registry,
        ))
    }
}

/// Builder for creating bulkheads.
pub struct BulkheadBuilder {
    name: String,
    capacity: usize,
    metric_sink: Arc<dyn MetricSink>,
    hook_registry: Arc<HookRegistry>,
}

impl BulkheadBuilder {
    /// Creates a new builder with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: DEFAULT_CAPACITY,
            metric_sink: Arc::new(NullMetricSink),
            hook_registry: Arc::new(HookRegistry::new()),
        }
    }

    /// Sets the maximum number of concurrent calls.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets a metric sink for the bulkhead.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.metric_sink = Arc::new(sink);
        self
    }

    /// Sets a hook registry for the bulkhead.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hook_registry = Arc::new(hooks);
        self
    }

    /// Shares a hook registry with other guards.
    pub fn shared_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hook_registry = hooks;
        self
    }

    /// Builds a new bulkhead.
    pub fn build(self) -> Result<Bulkhead, ConfigError> {
        if self.capacity == 0 {
            let error = ConfigError::ZeroCapacity;
            telemetry::invalid_config(&self.name, &error);
            return Err(error);
        }

        Ok(Bulkhead::from_parts(
            self.name,
            self.capacity,
            self.metric_sink,
            self.hook_registry,
        ))
    }
}

/// Builder for a breaker and a bulkhead guarding the same downstream.
///
/// Both guards report under the same name and share the metric sink, clock
/// and hooks given here.
pub struct GuardBuilder {
    breaker: BreakerBuilder,
    bulkhead: BulkheadBuilder,
    precedence: Precedence,
}

impl GuardBuilder {
    /// Creates a new builder with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            breaker: BreakerBuilder::new(name.clone()),
            bulkhead: BulkheadBuilder::new(name),
            precedence: Precedence::default(),
        }
    }

    /// Sets the number of failures within the window that will trip the circuit.
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.breaker = self.breaker.failure_threshold(threshold);
        self
    }

    /// Sets the width of the trailing failure window.
    pub fn failure_window(mut self, window: Duration) -> Self {
        self.breaker = self.breaker.failure_window(window);
        self
    }

    /// Sets how long the circuit stays open after the last failure.
    pub fn open_timeout(mut self, duration: Duration) -> Self {
        self.breaker = self.breaker.open_timeout(duration);
        self
    }

    /// Sets the bulkhead capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.bulkhead = self.bulkhead.capacity(capacity);
        self
    }

    /// Sets which guard decides first.
    pub fn precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Sets the breaker's time source.
    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.breaker = self.breaker.clock(clock);
        self
    }

    /// Sets a metric sink shared by both guards.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        let sink: Arc<dyn MetricSink> = Arc::new(sink);
        self.breaker = self.breaker.metric_sink(Arc::clone(&sink));
        self.bulkhead = self.bulkhead.metric_sink(sink);
        self
    }

    /// Sets a hook registry shared by both guards.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        let hooks = Arc::new(hooks);
        self.breaker = self.breaker.shared_hooks(Arc::clone(&hooks));
        self.bulkhead = self.bulkhead.shared_hooks(hooks);
        self
    }

    /// Builds both guards.
    pub fn build(self) -> Result<Guard, ConfigError> {
        Ok(Guard::new(
            self.breaker.build()?,
            self.bulkhead.build()?,
            self.precedence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;

    #[test]
    fn defaults_match_reference_deployment() {
        let breaker = BreakerBuilder::new("payment").build().unwrap();
        assert_eq!(breaker.failure_threshold(), 5);
        assert_eq!(breaker.failure_window(), Duration::from_secs(10));
        assert_eq!(breaker.open_timeout(), Duration::from_secs(30));
        assert_eq!(breaker.current_state(), State::Closed);

        let bulkhead = BulkheadBuilder::new("payment").build().unwrap();
        assert_eq!(bulkhead.capacity(), 10);
    }

    #[test]
    fn non_positive_settings_are_rejected() {
        assert_eq!(
            BreakerBuilder::new("x").failure_threshold(0).build().unwrap_err(),
            ConfigError::ZeroFailureThreshold
        );
        assert_eq!(
            BreakerBuilder::new("x")
                .failure_window(Duration::ZERO)
                .build()
                .unwrap_err(),
            ConfigError::ZeroFailureWindow
        );
        assert_eq!(
            BreakerBuilder::new("x")
                .open_timeout(Duration::ZERO)
                .build()
                .unwrap_err(),
            ConfigError::ZeroOpenTimeout
        );
        assert_eq!(
            GuardBuilder::new("x").capacity(0).build().unwrap_err(),
            ConfigError::ZeroCapacity
        );
    }
}
