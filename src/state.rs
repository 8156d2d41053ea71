//! Circuit breaker states.

use std::fmt::{self, Display, Formatter};

/// Represents the possible states of a circuit breaker.
///
/// The discriminants are the values exported on the state gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    #[default]
    Closed = 0,

    /// Circuit is open and operations are rejected.
    Open = 1,

    /// Circuit is letting a single trial operation through to test recovery.
    HalfOpen = 2,
}

impl State {
    /// Label used for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }

    /// Numeric gauge value.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<u8> for State {
    fn from(value: u8) -> Self {
        match value {
            1 => State::Open,
            2 => State::HalfOpen,
            _ => State::Closed,
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_codes_round_trip() {
        for state in [State::Closed, State::Open, State::HalfOpen] {
            assert_eq!(State::from(state.code()), state);
        }
        assert_eq!(State::from(42), State::Closed);
    }
}
