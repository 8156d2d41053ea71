//! Structured log events, emitted through `tracing` when the feature is on.

use crate::error::Rejection;
use crate::state::State;

pub(crate) fn transition(resource: &str, from: State, to: State) {
    #[cfg(feature = "tracing")]
    tracing::info!(
        resource,
        from = from.as_str(),
        to = to.as_str(),
        "circuit breaker state changed"
    );

    #[cfg(not(feature = "tracing"))]
    let _ = (resource, from, to);
}

pub(crate) fn rejected(resource: &str, reason: Rejection) {
    #[cfg(feature = "tracing")]
    tracing::debug!(resource, reason = reason.as_str(), "call rejected");

    #[cfg(not(feature = "tracing"))]
    let _ = (resource, reason);
}

pub(crate) fn invalid_config(resource: &str, error: &crate::error::ConfigError) {
    #[cfg(feature = "tracing")]
    tracing::warn!(resource, %error, "rejected guard configuration");

    #[cfg(not(feature = "tracing"))]
    let _ = (resource, error);
}
