//! A circuit breaker and a bulkhead composed around one downstream.

use crate::breaker::CircuitBreaker;
use crate::bulkhead::Bulkhead;
use crate::cancel::{Cancellation, NeverCancel};
use crate::config::GuardBuilder;
use crate::error::GuardResult;
use crate::state::State;

/// Which guard gets to refuse a call first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precedence {
    /// The breaker decides admission, then the bulkhead looks for a free slot.
    ///
    /// A bulkhead refusal is returned as is and never counts as a breaker failure.
    #[default]
    BreakerOuter,

    /// The bulkhead takes a slot first, then the breaker decides admission.
    ///
    /// A call refused by an open breaker holds its slot only for the admission check.
    BulkheadOuter,
}

/// Diagnostics for a [`Guard`], read without changing either guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardStatus {
    /// Breaker state.
    pub state: State,
    /// Failures inside the breaker's window.
    pub failures_in_window: usize,
    /// Calls currently holding a bulkhead slot.
    pub in_flight: usize,
    /// Bulkhead capacity.
    pub capacity: usize,
    /// Calls refused by the breaker.
    pub circuit_open_rejections: u64,
    /// Calls refused by the bulkhead.
    pub bulkhead_full_rejections: u64,
}

/// Wraps outbound calls to one downstream in both guards.
///
/// Only a call admitted by both guards runs, and only its own error is
/// counted against the breaker.
///
/// ```
/// use bulwark::{CancelToken, Guard, GuardError};
///
/// let guard = Guard::builder("payment").capacity(10).build().unwrap();
/// let token = CancelToken::new();
///
/// let charged = guard.call(&token, || Ok::<_, std::io::Error>(42));
/// assert_eq!(charged.unwrap(), 42);
///
/// token.cancel();
/// let refused = guard.call(&token, || Ok::<_, std::io::Error>(42));
/// assert!(matches!(refused, Err(GuardError::Cancelled)));
/// ```
#[derive(Debug, Clone)]
pub struct Guard {
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    precedence: Precedence,
}

impl Guard {
    /// Composes existing guards.
    pub fn new(breaker: CircuitBreaker, bulkhead: Bulkhead, precedence: Precedence) -> Self {
        Self {
            breaker,
            bulkhead,
            precedence,
        }
    }

    /// Creates a builder configuring both guards under one name.
    pub fn builder(name: impl Into<String>) -> GuardBuilder {
        GuardBuilder::new(name)
    }

    /// The circuit breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The bulkhead.
    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    /// Which guard decides first.
    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    /// Runs `f` if both guards admit it and `cancel` is not raised.
    pub fn call<C, F, T, E>(&self, cancel: &C, f: F) -> GuardResult<T, E>
    where
        C: Cancellation + ?Sized,
        F: FnOnce() -> Result<T, E>,
    {
        match self.precedence {
            Precedence::BreakerOuter => self
                .breaker
                .call_guarded(|| self.bulkhead.execute(cancel, f)),
            Precedence::BulkheadOuter => self
                .bulkhead
                .execute_guarded(cancel, || self.breaker.call(f)),
        }
    }

    /// Runs `f` if both guards admit it.
    pub fn try_call<F, T, E>(&self, f: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.call(&NeverCancel, f)
    }

    /// Current diagnostics.
    pub fn status(&self) -> GuardStatus {
        GuardStatus {
            state: self.breaker.current_state(),
            failures_in_window: self.breaker.failure_count(),
            in_flight: self.bulkhead.active_count(),
            capacity: self.bulkhead.capacity(),
            circuit_open_rejections: self.breaker.rejections_total(),
            bulkhead_full_rejections: self.bulkhead.rejections_total(),
        }
    }
}

#[cfg(feature = "async")]
impl Guard {
    /// Async counterpart of [`call`](Self::call).
    pub async fn call_async<C, F, Fut, T, E>(&self, cancel: &C, f: F) -> GuardResult<T, E>
    where
        C: Cancellation + ?Sized,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match self.precedence {
            Precedence::BreakerOuter => {
                self.breaker
                    .call_guarded_async(|| self.bulkhead.execute_async(cancel, f))
                    .await
            }
            Precedence::BulkheadOuter => {
                self.bulkhead
                    .execute_guarded_async(cancel, || self.breaker.call_async(f))
                    .await
            }
        }
    }
}
