//! Order service calling a slow, then failing, payment service.
//!
//! Run with `RUST_LOG=debug cargo run --example payment_client --features tracing`.

use bulwark::{CancelToken, Guard, GuardError, HookRegistry, MetricsRegistry};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct PaymentError(String);

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment failed: {}", self.0)
    }
}

impl Error for PaymentError {}

/// Stand-in for the HTTP call. Enforces its own deadline, like a client timeout would.
fn charge(order: u32, latency: Duration, failing: &AtomicBool) -> Result<String, PaymentError> {
    const DEADLINE: Duration = Duration::from_millis(300);

    thread::sleep(latency.min(DEADLINE));
    if latency > DEADLINE {
        return Err(PaymentError(format!("order {} timed out", order)));
    }
    if failing.load(Ordering::Relaxed) {
        return Err(PaymentError("payment service returned status 500".to_string()));
    }
    Ok(format!("receipt-{}", order))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let registry = Arc::new(MetricsRegistry::new());
    let hooks = HookRegistry::new();
    hooks.set_on_open(|| println!(">> payment circuit OPENED"));
    hooks.set_on_half_open(|| println!(">> payment circuit HALF-OPEN, probing"));
    hooks.set_on_close(|| println!(">> payment circuit CLOSED"));

    let guard = Guard::builder("payment")
        .failure_threshold(5)
        .failure_window(Duration::from_secs(10))
        .open_timeout(Duration::from_secs(2))
        .capacity(10)
        .metric_sink(Arc::clone(&registry))
        .hooks(hooks)
        .build()
        .expect("valid guard configuration");
    let failing = Arc::new(AtomicBool::new(false));

    println!("-- burst of 15 concurrent orders against a slow payment service");
    let handles: Vec<_> = (0..15)
        .map(|order| {
            let guard = guard.clone();
            let failing = Arc::clone(&failing);
            thread::spawn(move || {
                let cancel = CancelToken::new();
                let outcome = guard.call(&cancel, || {
                    charge(order, Duration::from_millis(200), &failing)
                });
                (order, outcome)
            })
        })
        .collect();
    for handle in handles {
        let (order, outcome) = handle.join().expect("order thread panicked");
        report(order, outcome);
    }

    println!("-- payment service starts failing");
    failing.store(true, Ordering::Relaxed);
    for order in 100..108 {
        report(order, guard.try_call(|| charge(order, Duration::ZERO, &failing)));
    }

    println!("-- payment service recovers");
    failing.store(false, Ordering::Relaxed);
    thread::sleep(Duration::from_millis(2100));
    for order in 200..203 {
        report(order, guard.try_call(|| charge(order, Duration::ZERO, &failing)));
    }

    println!("-- diagnostics: {:?}", guard.status());
    if let Some(snapshot) = registry.snapshot("payment") {
        println!("-- registry: {:?}", snapshot);
    }
}

fn report(order: u32, outcome: Result<String, GuardError<PaymentError>>) {
    match outcome {
        Ok(receipt) => println!("order {}: paid ({})", order, receipt),
        Err(GuardError::CircuitOpen) | Err(GuardError::BulkheadFull) => {
            println!("order {}: 503, payment service unavailable", order)
        }
        Err(GuardError::Cancelled) => println!("order {}: caller went away", order),
        Err(GuardError::Operation(err)) => println!("order {}: 500, {}", order, err),
    }
}
