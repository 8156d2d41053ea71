//! # bulwark
//!
//! Circuit breaking and bulkheading for synchronous calls to a downstream
//! service that may be failing or overloaded.
//!
//! Two independent guards wrap any zero-argument function returning a
//! `Result`:
//!
//! - [`CircuitBreaker`] stops calling a downstream after too many recent
//!   failures and only lets a single trial call through once a cooldown
//!   has passed.
//! - [`Bulkhead`] caps the number of calls in flight and sheds the excess
//!   immediately instead of queueing it.
//!
//! [`Guard`] composes the two. By default the breaker decides first and the
//! bulkhead second; only the wrapped call's own errors count against the
//! breaker.
//!
//! ## What is a Circuit Breaker?
//!
//! The breaker operates in three states:
//!
//! - **Closed**: Normal operation. Failures are timestamped and counted over a
//!   sliding window.
//! - **Open**: Calls are immediately rejected without attempting to reach the resource.
//! - **Half-Open**: After the open timeout, one trial call is permitted to check
//!   whether the downstream has recovered.
//!
//! ## Basic Usage
//!
//! ```rust
//! use bulwark::{CancelToken, Guard, GuardError};
//! use std::fmt;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct ServiceError(String);
//!
//! impl fmt::Display for ServiceError {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         write!(f, "Service error: {}", self.0)
//!     }
//! }
//!
//! impl std::error::Error for ServiceError {}
//!
//! let guard = Guard::builder("payment")
//!     .failure_threshold(5)
//!     .failure_window(Duration::from_secs(10))
//!     .open_timeout(Duration::from_secs(30))
//!     .capacity(10)
//!     .build()
//!     .expect("valid configuration");
//!
//! let cancel = CancelToken::new();
//! match guard.call(&cancel, || Ok::<_, ServiceError>("charged".to_string())) {
//!     Ok(receipt) => println!("Call succeeded: {}", receipt),
//!     Err(GuardError::CircuitOpen) | Err(GuardError::BulkheadFull) => {
//!         println!("Shed load, try again later")
//!     }
//!     Err(GuardError::Cancelled) => println!("Caller went away"),
//!     Err(GuardError::Operation(err)) => println!("Call failed: {}", err),
//! }
//! ```
//!
//! ## Features
//!
//! - `std` - Standard library support (default)
//! - `async` - Async variants of every call method
//! - `prometheus` - Prometheus metrics integration
//! - `tracing` - Tracing integration

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod bulkhead;
mod cancel;
mod clock;
mod config;
mod error;
mod guard;
mod hook;
mod metrics;
pub mod prelude;
#[cfg(feature = "prometheus")]
mod prometheus;
mod state;
mod telemetry;
mod window;

// Re-exports
pub use breaker::CircuitBreaker;
pub use bulkhead::{Bulkhead, BulkheadPermit};
pub use cancel::{CancelToken, Cancellation, NeverCancel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BreakerBuilder, BulkheadBuilder, GuardBuilder, DEFAULT_CAPACITY, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_FAILURE_WINDOW, DEFAULT_OPEN_TIMEOUT,
};
pub use error::{ConfigError, GuardError, GuardResult, Rejection};
pub use guard::{Guard, GuardStatus, Precedence};
pub use hook::HookRegistry;
pub use metrics::{MetricSink, MetricsRegistry, NullMetricSink, ResourceSnapshot};
#[cfg(feature = "prometheus")]
pub use prometheus::PrometheusSink;
pub use state::State;
