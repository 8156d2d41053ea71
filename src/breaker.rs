//! Core circuit breaker implementation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::BreakerBuilder;
use crate::error::{ConfigError, GuardError, GuardResult, Rejection};
use crate::hook::HookRegistry;
use crate::metrics::MetricSink;
use crate::state::State;
use crate::telemetry;
use crate::window::SlidingWindow;

/// Mutable breaker state. Only ever touched under `BreakerInner::core`.
#[derive(Debug)]
struct Core {
    state: State,
    failures: SlidingWindow,
    last_failure: Option<Instant>,
    // Id of the half-open trial currently running, if any.
    trial: Option<u64>,
    next_trial: u64,
}

impl Core {
    fn open_timeout_elapsed(&self, now: Instant, open_timeout: Duration) -> bool {
        self.last_failure
            .map_or(true, |at| now.saturating_duration_since(at) > open_timeout)
    }

    fn start_trial(&mut self) -> u64 {
        let id = self.next_trial;
        self.next_trial = self.next_trial.wrapping_add(1);
        self.trial = Some(id);
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    // Admitted, but no result that says anything about the downstream.
    Abandoned,
}

struct BreakerInner {
    name: String,
    core: RwLock<Core>,
    failure_threshold: usize,
    failure_window: Duration,
    open_timeout: Duration,
    failures_total: AtomicU64,
    rejections_total: AtomicU64,
    clock: Arc<dyn Clock>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

/// A circuit breaker that can wrap function calls to stop hammering a failing downstream.
///
/// The breaker counts failures inside a trailing window. Once `failure_threshold`
/// failures fall inside the window it opens and refuses calls with
/// [`GuardError::CircuitOpen`]. When `open_timeout` has passed since the last
/// failure, the next call is let through as a single half-open trial: success
/// closes the breaker and clears the history, failure opens it again.
///
/// Clones share the same state.
///
/// ```
/// use bulwark::{CircuitBreaker, GuardError, State};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::builder("payment")
///     .failure_threshold(2)
///     .open_timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
///
/// for _ in 0..2 {
///     let _ = breaker.call(|| Err::<(), _>(std::io::Error::other("down")));
/// }
/// assert_eq!(breaker.current_state(), State::Open);
///
/// let result = breaker.call(|| Ok::<_, std::io::Error>("never runs"));
/// assert!(matches!(result, Err(GuardError::CircuitOpen)));
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

/// An admitted call that has not reported its outcome yet.
///
/// Dropping it unsettled (panic, dropped future) frees the half-open trial
/// slot without recording anything.
struct Admission<'a> {
    breaker: &'a BreakerInner,
    trial: Option<u64>,
    started: Instant,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(self.trial, outcome, self.started);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.trial, Outcome::Abandoned, self.started);
        }
    }
}

impl CircuitBreaker {
    /// Creates a circuit breaker with the default clock, no metrics and no hooks.
    pub fn new(
        name: impl Into<String>,
        failure_threshold: usize,
        failure_window: Duration,
        open_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        Self::builder(name)
            .failure_threshold(failure_threshold)
            .failure_window(failure_window)
            .open_timeout(open_timeout)
            .build()
    }

    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder {
        BreakerBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        failure_threshold: usize,
        failure_window: Duration,
        open_timeout: Duration,
        clock: Arc<dyn Clock>,
        metric_sink: Arc<dyn MetricSink>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        metric_sink.register_breaker(&name, State::Closed);

        let inner = BreakerInner {
            name,
            core: RwLock::new(Core {
                state: State::Closed,
                failures: SlidingWindow::new(failure_window),
                last_failure: None,
                trial: None,
                next_trial: 0,
            }),
            failure_threshold,
            failure_window,
            open_timeout,
            failures_total: AtomicU64::new(0),
            rejections_total: AtomicU64::new(0),
            clock,
            metric_sink,
            hooks,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// The resource name this breaker reports under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the current state of the circuit breaker.
    ///
    /// This is a pure read: an open breaker whose timeout has passed still
    /// reports `Open` until the next call moves it to half-open.
    pub fn current_state(&self) -> State {
        self.inner.core.read().state
    }

    /// Failures currently inside the trailing window.
    pub fn failure_count(&self) -> usize {
        let now = self.inner.clock.now();
        self.inner.core.read().failures.live(now)
    }

    /// Failed calls recorded since the breaker was created.
    pub fn failures_total(&self) -> u64 {
        self.inner.failures_total.load(Ordering::Relaxed)
    }

    /// Calls refused because the circuit was open.
    pub fn rejections_total(&self) -> u64 {
        self.inner.rejections_total.load(Ordering::Relaxed)
    }

    /// Failures within the window that trip the breaker.
    pub fn failure_threshold(&self) -> usize {
        self.inner.failure_threshold
    }

    /// Width of the trailing failure window.
    pub fn failure_window(&self) -> Duration {
        self.inner.failure_window
    }

    /// How long the breaker stays open after the last failure.
    pub fn open_timeout(&self) -> Duration {
        self.inner.open_timeout
    }

    /// Executes a function wrapped by the circuit breaker.
    ///
    /// The function runs at most once. Any `Err` it returns counts as a
    /// failure and is handed back as [`GuardError::Operation`].
    pub fn call<F, T, E>(&self, f: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let admission = self.inner.admit()?;

        let result = f();
        admission.settle(if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        });

        result.map_err(GuardError::Operation)
    }

    /// Executes a function that is itself guarded, such as a bulkhead call.
    ///
    /// Rejections coming back from the function are returned as they are and
    /// never count as failures. Only [`GuardError::Operation`] does.
    pub fn call_guarded<F, T, E>(&self, f: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> GuardResult<T, E>,
    {
        let admission = self.inner.admit()?;

        let result = f();
        admission.settle(outcome_of(&result));

        result
    }

    /// Forces the circuit breaker to the open state.
    ///
    /// The open timeout is measured from this moment.
    pub fn force_open(&self) -> bool {
        let from = {
            let mut core = self.inner.core.write();
            if core.state == State::Open {
                return false;
            }
            let from = core.state;
            core.state = State::Open;
            core.last_failure = Some(self.inner.clock.now());
            core.trial = None;
            self.inner.publish(from, State::Open);
            from
        };

        self.inner.announce(from, State::Open);
        true
    }

    /// Forces the circuit breaker to the closed state and clears the failure history.
    pub fn force_closed(&self) -> bool {
        let from = {
            let mut core = self.inner.core.write();
            if core.state == State::Closed {
                return false;
            }
            let from = core.state;
            core.state = State::Closed;
            core.failures.clear();
            core.last_failure = None;
            core.trial = None;
            self.inner.publish(from, State::Closed);
            from
        };

        self.inner.announce(from, State::Closed);
        true
    }

    /// Clears the failure history and counters without changing the state.
    ///
    /// An open breaker stays open, but with no recorded failure the next call
    /// is let through as a half-open trial. A trial in flight is forgotten.
    pub fn reset(&self) {
        let mut core = self.inner.core.write();
        core.failures.clear();
        core.last_failure = None;
        core.trial = None;
        self.inner.failures_total.store(0, Ordering::Relaxed);
        self.inner.rejections_total.store(0, Ordering::Relaxed);
    }
}

fn outcome_of<T, E>(result: &GuardResult<T, E>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(e) if e.is_rejection() => Outcome::Abandoned,
        Err(_) => Outcome::Failure,
    }
}

impl BreakerInner {
    /// Decides whether a call may go ahead, moving Open to HalfOpen when due.
    fn admit(&self) -> Result<Admission<'_>, Rejection> {
        let (now, admitted, transition) = {
            let mut core = self.core.write();
            let now = self.clock.now();
            let state = core.state;
            let (admitted, transition) = match state {
                State::Closed => (Some(None), None),
                State::Open if core.open_timeout_elapsed(now, self.open_timeout) => {
                    core.state = State::HalfOpen;
                    let trial = core.start_trial();
                    self.publish(State::Open, State::HalfOpen);
                    (Some(Some(trial)), Some((State::Open, State::HalfOpen)))
                }
                State::Open => (None, None),
                State::HalfOpen if core.trial.is_none() => (Some(Some(core.start_trial())), None),
                State::HalfOpen => (None, None),
            };
            (now, admitted, transition)
        };

        if let Some((from, to)) = transition {
            self.announce(from, to);
        }

        match admitted {
            Some(trial) => Ok(Admission {
                breaker: self,
                trial,
                started: now,
                settled: false,
            }),
            None => {
                self.reject();
                Err(Rejection::CircuitOpen)
            }
        }
    }

    /// Records the outcome of an admitted call and applies any resulting transition.
    fn settle(&self, trial: Option<u64>, outcome: Outcome, started: Instant) {
        let (now, transition) = {
            let mut core = self.core.write();
            // Read under the lock so failures reach the window in time order.
            let now = self.clock.now();

            // Only the trial that is still current may move a half-open breaker.
            let current_trial = trial.is_some() && core.trial == trial;
            if current_trial {
                core.trial = None;
            }

            let transition = match outcome {
                Outcome::Success if current_trial && core.state == State::HalfOpen => {
                    core.state = State::Closed;
                    core.failures.clear();
                    core.last_failure = None;
                    Some((State::HalfOpen, State::Closed))
                }
                Outcome::Failure => {
                    let in_window = core.failures.record(now);
                    core.last_failure = Some(now);
                    let state = core.state;
                    match state {
                        State::Closed if in_window >= self.failure_threshold => {
                            core.state = State::Open;
                            Some((State::Closed, State::Open))
                        }
                        State::HalfOpen if current_trial => {
                            core.state = State::Open;
                            Some((State::HalfOpen, State::Open))
                        }
                        _ => None,
                    }
                }
                _ => None,
            };

            if let Some((from, to)) = transition {
                // Gauge updates stay under the lock so concurrent transitions publish in order.
                self.publish(from, to);
            }
            (now, transition)
        };

        match outcome {
            Outcome::Success => {
                self.metric_sink
                    .record_call(&self.name, true, now.saturating_duration_since(started));
            }
            Outcome::Failure => {
                self.failures_total.fetch_add(1, Ordering::Relaxed);
                self.metric_sink
                    .record_call(&self.name, false, now.saturating_duration_since(started));
            }
            Outcome::Abandoned => {}
        }

        if let Some((from, to)) = transition {
            self.announce(from, to);
        }
    }

    fn reject(&self) {
        self.rejections_total.fetch_add(1, Ordering::Relaxed);
        self.metric_sink
            .record_rejection(&self.name, Rejection::CircuitOpen);
        telemetry::rejected(&self.name, Rejection::CircuitOpen);
        self.hooks.execute_rejection_hook(Rejection::CircuitOpen);
    }

    fn publish(&self, from: State, to: State) {
        self.metric_sink.record_state_transition(&self.name, from, to);
    }

    // Runs outside the lock; hooks may call back into the breaker.
    fn announce(&self, from: State, to: State) {
        telemetry::transition(&self.name, from, to);
        self.hooks.execute_state_transition_hook(to);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("state", &self.current_state())
            .field("failure_threshold", &self.inner.failure_threshold)
            .field("failure_window", &self.inner.failure_window)
            .field("open_timeout", &self.inner.open_timeout)
            .finish()
    }
}

// Implement Async support when the feature is enabled
#[cfg(feature = "async")]
impl CircuitBreaker {
    /// Executes an async function wrapped by the circuit breaker.
    ///
    /// Dropping the returned future before it completes records nothing and
    /// frees the half-open trial slot if this call held it.
    pub async fn call_async<F, Fut, T, E>(&self, f: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let admission = self.inner.admit()?;

        let result = f().await;
        admission.settle(if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        });

        result.map_err(GuardError::Operation)
    }

    /// Async counterpart of [`call_guarded`](Self::call_guarded).
    pub async fn call_guarded_async<F, Fut, T, E>(&self, f: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = GuardResult<T, E>>,
    {
        let admission = self.inner.admit()?;

        let result = f().await;
        admission.settle(outcome_of(&result));

        result
    }
}
