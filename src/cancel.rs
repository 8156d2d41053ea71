//! Cancellation signals honored at bulkhead admission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A signal telling a guard that the caller no longer wants the result.
///
/// Guards only look at it before admitting a call. Stopping a call that is
/// already running is up to the call itself.
pub trait Cancellation {
    /// Whether the caller has been cancelled.
    fn is_cancelled(&self) -> bool;
}

/// A cloneable cancellation flag.
///
/// All clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag for this token and all its clones.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Cancellation for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Cancellation for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// A signal that is never raised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl<C: Cancellation + ?Sized> Cancellation for &C {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}
