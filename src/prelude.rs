//! Re-exports the types needed to guard a call.
//!
//! # Example
//! ```rust,no_run
//! use bulwark::prelude::*;
//!
//! let guard = Guard::builder("payment").build().unwrap();
//! let _ = guard.call(&CancelToken::new(), || Ok::<_, std::io::Error>(()));
//! ```

pub use crate::{
    Bulkhead, CancelToken, Cancellation, CircuitBreaker, Guard, GuardError, GuardResult, State,
};
