use bulwark::{CircuitBreaker, GuardError};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

fn main() {
    let breaker = CircuitBreaker::builder("inventory")
        .failure_threshold(3) // 3 failures inside the window trip the circuit
        .failure_window(Duration::from_secs(10))
        .open_timeout(Duration::from_secs(2))
        .build()
        .expect("valid breaker configuration");

    println!("Circuit initial state: {}", breaker.current_state());

    let mut counter = 0u32;
    let mut call_service = || -> Result<String, ServiceError> {
        counter += 1;
        if (4..=8).contains(&counter) {
            Err(ServiceError("inventory lookup timed out".to_string()))
        } else {
            Ok(format!("stock level #{}", counter))
        }
    };

    for i in 1..=14 {
        match breaker.call(&mut call_service) {
            Ok(value) => println!("Call {}: succeeded: {}", i, value),
            Err(GuardError::CircuitOpen) => println!("Call {}: circuit open, not attempted", i),
            Err(GuardError::Operation(err)) => println!("Call {}: failed: {}", i, err),
            Err(err) => println!("Call {}: {}", i, err),
        }

        println!(
            "  state={}, failures in window={}",
            breaker.current_state(),
            breaker.failure_count()
        );

        thread::sleep(Duration::from_millis(400));
    }
}
