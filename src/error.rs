//! Error types for guarded calls.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Result type for guarded operations.
pub type GuardResult<T, E> = Result<T, GuardError<E>>;

/// Error type for calls made through a circuit breaker, a bulkhead, or both.
///
/// Only [`GuardError::Operation`] means the wrapped call actually ran. The
/// other variants are rejections: the call was never attempted.
#[derive(Debug)]
pub enum GuardError<E> {
    /// The circuit is open, calls are not permitted.
    CircuitOpen,

    /// Every bulkhead slot is taken.
    BulkheadFull,

    /// The caller's cancellation signal was already raised at admission.
    Cancelled,

    /// The underlying operation failed. The error is passed through untouched.
    Operation(E),
}

/// The reason a call was rejected without being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Denied by an open (or busy half-open) circuit breaker.
    CircuitOpen,

    /// Denied by a bulkhead at capacity.
    BulkheadFull,

    /// Denied because the caller was cancelled.
    Cancelled,
}

impl Rejection {
    /// Label used for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::CircuitOpen => "circuit_open",
            Rejection::BulkheadFull => "bulkhead_full",
            Rejection::Cancelled => "cancelled",
        }
    }
}

impl<E> GuardError<E> {
    /// Returns the rejection kind, or `None` for an operation error.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            GuardError::CircuitOpen => Some(Rejection::CircuitOpen),
            GuardError::BulkheadFull => Some(Rejection::BulkheadFull),
            GuardError::Cancelled => Some(Rejection::Cancelled),
            GuardError::Operation(_) => None,
        }
    }

    /// Whether the call was refused before it was attempted.
    pub fn is_rejection(&self) -> bool {
        self.rejection().is_some()
    }

    /// Returns the operation error, if the call ran and failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            GuardError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the operation error, keeping rejections as they are.
    pub fn map_operation<F, O>(self, f: O) -> GuardError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            GuardError::CircuitOpen => GuardError::CircuitOpen,
            GuardError::BulkheadFull => GuardError::BulkheadFull,
            GuardError::Cancelled => GuardError::Cancelled,
            GuardError::Operation(e) => GuardError::Operation(f(e)),
        }
    }
}

impl<E> GuardError<GuardError<E>> {
    /// Collapses a rejection or error coming from a nested guard.
    pub fn flatten(self) -> GuardError<E> {
        match self {
            GuardError::CircuitOpen => GuardError::CircuitOpen,
            GuardError::BulkheadFull => GuardError::BulkheadFull,
            GuardError::Cancelled => GuardError::Cancelled,
            GuardError::Operation(inner) => inner,
        }
    }
}

impl<E> From<Rejection> for GuardError<E> {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::CircuitOpen => GuardError::CircuitOpen,
            Rejection::BulkheadFull => GuardError::BulkheadFull,
            Rejection::Cancelled => GuardError::Cancelled,
        }
    }
}

impl<E> Display for GuardError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::CircuitOpen => write!(f, "circuit breaker is open"),
            GuardError::BulkheadFull => write!(f, "bulkhead is full"),
            GuardError::Cancelled => write!(f, "call cancelled before admission"),
            GuardError::Operation(e) => write!(f, "operation error: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for GuardError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GuardError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid guard configuration, reported by the builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The failure threshold must be at least one.
    ZeroFailureThreshold,

    /// The failure window must be longer than zero.
    ZeroFailureWindow,

    /// The open timeout must be longer than zero.
    ZeroOpenTimeout,

    /// The bulkhead capacity must be at least one.
    ZeroCapacity,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroFailureThreshold => write!(f, "failure threshold must be positive"),
            ConfigError::ZeroFailureWindow => write!(f, "failure window must be positive"),
            ConfigError::ZeroOpenTimeout => write!(f, "open timeout must be positive"),
            ConfigError::ZeroCapacity => write!(f, "bulkhead capacity must be positive"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Boom;

    impl Display for Boom {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl Error for Boom {}

    #[test]
    fn rejections_are_classified() {
        assert_eq!(
            GuardError::<Boom>::CircuitOpen.rejection(),
            Some(Rejection::CircuitOpen)
        );
        assert!(GuardError::<Boom>::BulkheadFull.is_rejection());
        assert!(GuardError::<Boom>::Cancelled.is_rejection());
        assert!(!GuardError::Operation(Boom).is_rejection());
    }

    #[test]
    fn flatten_unwraps_nested_operation() {
        let nested: GuardError<GuardError<Boom>> = GuardError::Operation(GuardError::BulkheadFull);
        assert!(matches!(nested.flatten(), GuardError::BulkheadFull));

        let nested: GuardError<GuardError<Boom>> =
            GuardError::Operation(GuardError::Operation(Boom));
        assert_eq!(nested.flatten().into_operation(), Some(Boom));
    }

    #[test]
    fn source_points_at_operation_error() {
        let err = GuardError::Operation(Boom);
        assert_eq!(err.source().map(|e| e.to_string()), Some("boom".to_string()));
        assert!(GuardError::<Boom>::CircuitOpen.source().is_none());
        assert_eq!(err.to_string(), "operation error: boom");
    }
}
