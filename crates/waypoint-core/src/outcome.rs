//! Mediation outcomes: the sum type the HTTP mediator returns and the pool's
//! outcome handler translates into an ack/nack decision.
//!
//! Kept as data end to end (spec.md §9 "Sum-typed outcomes, not exceptions")
//! so the worker's cleanup path never has to distinguish a thrown error from
//! a negative result.

use std::fmt;

/// Default NACK visibility delay when no custom delay is supplied.
pub const DEFAULT_DELAY_SECONDS: u32 = 30;
/// Fast-fail visibility used for cascade-NACKs and rate-limit-adjacent
/// failures, so the broker retries sooner than the default.
pub const FAST_FAIL_DELAY_SECONDS: u32 = 10;
/// Maximum delay a downstream target or broker header may request.
pub const MAX_DELAY_SECONDS: u32 = 43_200;

/// Clamp a caller-supplied delay into `[1, MAX_DELAY_SECONDS]`, falling back
/// to [`DEFAULT_DELAY_SECONDS`] when absent or zero.
pub fn effective_delay(delay_seconds: Option<u32>) -> u32 {
    match delay_seconds {
        None | Some(0) => DEFAULT_DELAY_SECONDS,
        Some(n) => n.clamp(1, MAX_DELAY_SECONDS),
    }
}

/// The coarse classification of a mediation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeResult {
    Success,
    ErrorProcess,
    ErrorConfig,
    ErrorConnection,
}

/// The specific failure behind an `Error*` [`OutcomeResult`], used to drive
/// the mediator's own retry/circuit-breaker policy (never exposed to the
/// broker acknowledgement layer, which only sees [`OutcomeResult`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedError {
    Timeout,
    CircuitOpen,
    HttpError(u16),
    NetworkError,
    RateLimited(Option<u32>),
}

impl fmt::Display for TypedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedError::Timeout => write!(f, "timeout"),
            TypedError::CircuitOpen => write!(f, "circuit open"),
            TypedError::HttpError(status) => write!(f, "http {status}"),
            TypedError::NetworkError => write!(f, "network error"),
            TypedError::RateLimited(retry_after) => {
                write!(f, "rate limited (retry_after={retry_after:?})")
            }
        }
    }
}

impl TypedError {
    /// Whether the mediator's retry loop should attempt this call again.
    /// Matches spec.md §4.4: retryable = Timeout, NetworkError, HttpError(5xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            TypedError::Timeout | TypedError::NetworkError => true,
            TypedError::HttpError(status) => (500..600).contains(status),
            TypedError::CircuitOpen | TypedError::HttpError(_) | TypedError::RateLimited(_) => {
                false
            }
        }
    }

    /// Whether this failure should count against the circuit breaker's
    /// failure ratio. Per spec.md §4.4 the breaker "fails on timeout and
    /// network exceptions" only — HTTP status outcomes do not trip it.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, TypedError::Timeout | TypedError::NetworkError)
    }
}

/// The full outcome of a mediation attempt.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub result: OutcomeResult,
    pub delay_seconds: Option<u32>,
    pub typed_error: Option<TypedError>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            result: OutcomeResult::Success,
            delay_seconds: None,
            typed_error: None,
        }
    }

    pub fn error_config() -> Self {
        Self {
            result: OutcomeResult::ErrorConfig,
            delay_seconds: None,
            typed_error: None,
        }
    }

    pub fn error_process(delay_seconds: Option<u32>, typed_error: Option<TypedError>) -> Self {
        Self {
            result: OutcomeResult::ErrorProcess,
            delay_seconds,
            typed_error,
        }
    }

    pub fn error_connection(typed_error: TypedError) -> Self {
        Self {
            result: OutcomeResult::ErrorConnection,
            delay_seconds: None,
            typed_error: Some(typed_error),
        }
    }

    /// spec.md §4.3: "null outcome (defensive) -> treat as ERROR_PROCESS and
    /// emit a critical warning". Kept as a named constructor so callers can't
    /// accidentally construct a meaningless zero-value outcome.
    pub fn defensive_null() -> Self {
        Self {
            result: OutcomeResult::ErrorProcess,
            delay_seconds: None,
            typed_error: None,
        }
    }
}
