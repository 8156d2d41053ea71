//! Fail-fast concurrency limiter.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cancel::Cancellation;
use crate::config::BulkheadBuilder;
use crate::error::{ConfigError, GuardError, GuardResult, Rejection};
use crate::hook::HookRegistry;
use crate::metrics::MetricSink;
use crate::telemetry;

struct BulkheadInner {
    name: String,
    capacity: usize,
    in_flight: AtomicUsize,
    rejections_total: AtomicU64,
    cancellations_total: AtomicU64,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

/// Caps the number of calls in flight to one resource pool.
///
/// Admission never waits: when every slot is taken the call is refused with
/// [`GuardError::BulkheadFull`] straight away. A slot is held for exactly as
/// long as the wrapped call runs and is given back on every exit path,
/// including unwinding.
///
/// Clones share the same slots.
///
/// ```
/// use bulwark::{Bulkhead, GuardError};
///
/// let bulkhead = Bulkhead::new("payment", 1).unwrap();
///
/// let nested = bulkhead.try_execute(|| {
///     // The only slot is ours, so a second call is shed.
///     let inner = bulkhead.try_execute(|| Ok::<_, std::io::Error>(()));
///     assert!(matches!(inner, Err(GuardError::BulkheadFull)));
///     Ok::<_, std::io::Error>(bulkhead.active_count())
/// });
///
/// assert_eq!(nested.unwrap(), 1);
/// assert_eq!(bulkhead.active_count(), 0);
/// ```
#[derive(Clone)]
pub struct Bulkhead {
    inner: Arc<BulkheadInner>,
}

/// A held bulkhead slot. Dropping it gives the slot back.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct BulkheadPermit<'a> {
    bulkhead: &'a BulkheadInner,
}

impl Drop for BulkheadPermit<'_> {
    fn drop(&mut self) {
        self.bulkhead.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.bulkhead.metric_sink.record_slot_released(&self.bulkhead.name);
    }
}

impl std::fmt::Debug for BulkheadPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadPermit")
            .field("pool", &self.bulkhead.name)
            .finish()
    }
}

impl Bulkhead {
    /// Creates a bulkhead with no metrics and no hooks.
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, ConfigError> {
        Self::builder(name).capacity(capacity).build()
    }

    /// Creates a new builder for customizing a bulkhead.
    pub fn builder(name: impl Into<String>) -> BulkheadBuilder {
        BulkheadBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        capacity: usize,
        metric_sink: Arc<dyn MetricSink>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        metric_sink.register_bulkhead(&name, capacity);

        Self {
            inner: Arc::new(BulkheadInner {
                name,
                capacity,
                in_flight: AtomicUsize::new(0),
                rejections_total: AtomicU64::new(0),
                cancellations_total: AtomicU64::new(0),
                metric_sink,
                hooks,
            }),
        }
    }

    /// The pool name this bulkhead reports under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Maximum number of concurrent calls.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Calls currently holding a slot.
    ///
    /// Advisory only: the value can change as soon as it is read.
    pub fn active_count(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Free slots right now. Advisory, like [`active_count`](Self::active_count).
    pub fn available(&self) -> usize {
        self.inner.capacity.saturating_sub(self.active_count())
    }

    /// Calls refused because the bulkhead was full.
    pub fn rejections_total(&self) -> u64 {
        self.inner.rejections_total.load(Ordering::Relaxed)
    }

    /// Calls refused because the caller was already cancelled.
    pub fn cancellations_total(&self) -> u64 {
        self.inner.cancellations_total.load(Ordering::Relaxed)
    }

    /// Takes a slot if one is free.
    ///
    /// A refusal is counted as a rejection, the same as in
    /// [`try_execute`](Self::try_execute).
    pub fn try_acquire(&self) -> Option<BulkheadPermit<'_>> {
        self.inner.acquire().ok()
    }

    /// Runs `f` in a slot, unless `cancel` is already raised or no slot is free.
    ///
    /// Cancellation is only checked here, at admission. A cancelled caller is
    /// never admitted, even when a slot is free.
    pub fn execute<C, F, T, E>(&self, cancel: &C, f: F) -> GuardResult<T, E>
    where
        C: Cancellation + ?Sized,
        F: FnOnce() -> Result<T, E>,
    {
        self.inner.check_cancelled(cancel)?;
        self.try_execute(f)
    }

    /// Runs `f` in a slot, or refuses immediately if none is free.
    pub fn try_execute<F, T, E>(&self, f: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let _permit = self.inner.acquire()?;
        f().map_err(GuardError::Operation)
    }

    /// Like [`execute`](Self::execute), for a function that is itself guarded.
    ///
    /// The function's rejections come back unchanged instead of being wrapped.
    pub fn execute_guarded<C, F, T, E>(&self, cancel: &C, f: F) -> GuardResult<T, E>
    where
        C: Cancellation + ?Sized,
        F: FnOnce() -> GuardResult<T, E>,
    {
        self.inner.check_cancelled(cancel)?;
        let _permit = self.inner.acquire()?;
        f()
    }
}

impl BulkheadInner {
    fn acquire(&self) -> Result<BulkheadPermit<'_>, Rejection> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                self.reject(Rejection::BulkheadFull);
                return Err(Rejection::BulkheadFull);
            }

            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.metric_sink.record_slot_acquired(&self.name);
        Ok(BulkheadPermit { bulkhead: self })
    }

    fn check_cancelled<C>(&self, cancel: &C) -> Result<(), Rejection>
    where
        C: Cancellation + ?Sized,
    {
        if cancel.is_cancelled() {
            self.reject(Rejection::Cancelled);
            return Err(Rejection::Cancelled);
        }
        Ok(())
    }

    fn reject(&self, reason: Rejection) {
        let counter = match reason {
            Rejection::Cancelled => &self.cancellations_total,
            _ => &self.rejections_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.metric_sink.record_rejection(&self.name, reason);
        telemetry::rejected(&self.name, reason);
        self.hooks.execute_rejection_hook(reason);
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(feature = "async")]
impl Bulkhead {
    /// Async counterpart of [`execute`](Self::execute).
    ///
    /// The slot is held until the future completes or is dropped.
    pub async fn execute_async<C, F, Fut, T, E>(&self, cancel: &C, f: F) -> GuardResult<T, E>
    where
        C: Cancellation + ?Sized,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.inner.check_cancelled(cancel)?;
        self.try_execute_async(f).await
    }

    /// Async counterpart of [`try_execute`](Self::try_execute).
    pub async fn try_execute_async<F, Fut, T, E>(&self, f: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let _permit = self.inner.acquire()?;
        f().await.map_err(GuardError::Operation)
    }

    /// Async counterpart of [`execute_guarded`](Self::execute_guarded).
    pub async fn execute_guarded_async<C, F, Fut, T, E>(
        &self,
        cancel: &C,
        f: F,
    ) -> GuardResult<T, E>
    where
        C: Cancellation + ?Sized,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = GuardResult<T, E>>,
    {
        self.inner.check_cancelled(cancel)?;
        let _permit = self.inner.acquire()?;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelToken, NeverCancel};
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    struct Down;

    #[test]
    fn slot_is_released_after_error() {
        let bulkhead = Bulkhead::new("payment", 2).unwrap();

        let result = bulkhead.try_execute(|| {
            assert_eq!(bulkhead.active_count(), 1);
            Err::<(), _>(Down)
        });

        assert!(matches!(result, Err(GuardError::Operation(Down))));
        assert_eq!(bulkhead.active_count(), 0);
    }

    #[test]
    fn slot_is_released_after_panic() {
        let bulkhead = Bulkhead::new("payment", 1).unwrap();

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = bulkhead.try_execute(|| -> Result<(), Down> { panic!("handler bug") });
        }));

        assert!(panicked.is_err());
        assert_eq!(bulkhead.active_count(), 0);
        assert!(bulkhead.try_execute(|| Ok::<_, Down>(())).is_ok());
    }

    #[test]
    fn cancelled_caller_is_not_admitted() {
        let bulkhead = Bulkhead::new("payment", 4).unwrap();
        let token = CancelToken::new();
        token.cancel();

        let invoked = Cell::new(false);
        let result = bulkhead.execute(&token, || {
            invoked.set(true);
            Ok::<_, Down>(())
        });

        assert!(matches!(result, Err(GuardError::Cancelled)));
        assert!(!invoked.get());
        assert_eq!(bulkhead.cancellations_total(), 1);
        assert_eq!(bulkhead.rejections_total(), 0);
    }

    #[test]
    fn full_bulkhead_rejects_without_invoking() {
        let bulkhead = Bulkhead::new("payment", 1).unwrap();
        let permit = bulkhead.try_acquire().unwrap();

        let invoked = Cell::new(false);
        let result = bulkhead.execute(&NeverCancel, || {
            invoked.set(true);
            Ok::<_, Down>(())
        });

        assert!(matches!(result, Err(GuardError::BulkheadFull)));
        assert!(!invoked.get());
        assert_eq!(bulkhead.rejections_total(), 1);

        drop(permit);
        assert_eq!(bulkhead.available(), 1);
    }

    #[test]
    fn guarded_inner_rejection_is_not_wrapped() {
        let bulkhead = Bulkhead::new("payment", 1).unwrap();
        let result: GuardResult<(), Down> =
            bulkhead.execute_guarded(&NeverCancel, || Err(GuardError::CircuitOpen));
        assert!(matches!(result, Err(GuardError::CircuitOpen)));
        assert_eq!(bulkhead.active_count(), 0);
    }

    #[test]
    fn zero_capacity_is_a_construction_error() {
        assert_eq!(
            Bulkhead::new("payment", 0).unwrap_err(),
            ConfigError::ZeroCapacity
        );
    }
}
