//! Hook registry for guard events.

use crate::error::Rejection;
use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;

type HookFn = Arc<dyn Fn() + Send + Sync + 'static>;
type RejectionHookFn = Arc<dyn Fn(Rejection) + Send + Sync + 'static>;

/// A registry for guard event hooks.
///
/// Hooks run on the calling thread, after the guard has released its own
/// lock, so a hook may safely query the guard that fired it.
pub struct HookRegistry {
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
    on_rejection: RwLock<Option<RejectionHookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("on_open", &self.on_open.read().is_some())
            .field("on_close", &self.on_close.read().is_some())
            .field("on_half_open", &self.on_half_open.read().is_some())
            .field("on_rejection", &self.on_rejection.read().is_some())
            .finish()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
            on_rejection: RwLock::new(None),
        }
    }

    /// Sets the hook to call when the circuit breaker opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker half-opens.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a guard refuses a call.
    pub fn set_on_rejection<F>(&self, f: F)
    where
        F: Fn(Rejection) + Send + Sync + 'static,
    {
        *self.on_rejection.write() = Some(Arc::new(f));
    }

    /// Executes the appropriate hook for a state transition.
    pub(crate) fn execute_state_transition_hook(&self, to: State) {
        let slot = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };

        // Clone out so a hook can replace hooks without deadlocking.
        let hook = slot.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Executes the rejection hook.
    pub(crate) fn execute_rejection_hook(&self, reason: Rejection) {
        let hook = self.on_rejection.read().clone();
        if let Some(hook) = hook {
            hook(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn transition_hooks_fire_by_target_state() {
        let hooks = HookRegistry::new();
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        hooks.set_on_open(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hooks.execute_state_transition_hook(State::Open);
        hooks.execute_state_transition_hook(State::Closed);
        hooks.execute_state_transition_hook(State::HalfOpen);

        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejection_hook_receives_reason() {
        let hooks = HookRegistry::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hooks.set_on_rejection(move |reason| sink.lock().push(reason));

        hooks.execute_rejection_hook(Rejection::BulkheadFull);
        hooks.execute_rejection_hook(Rejection::CircuitOpen);

        assert_eq!(
            *seen.lock(),
            vec![Rejection::BulkheadFull, Rejection::CircuitOpen]
        );
    }
}
