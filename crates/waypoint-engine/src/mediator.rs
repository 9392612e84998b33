//! HTTP delivery: circuit breaker, retries, response -> outcome mapping.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use waypoint_core::{effective_delay, Message, Outcome, TypedError, WarningCategory};

use crate::warning::SharedWarnings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAYS_SECONDS: [u64; 2] = [1, 2];

const BREAKER_WINDOW: usize = 10;
const BREAKER_FAILURE_RATIO: f64 = 0.5;
const BREAKER_OPEN_DURATION: Duration = Duration::from_secs(5);
const BREAKER_HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed,
    Open(Instant),
    HalfOpen { successes: u32 },
}

/// A sliding-window circuit breaker over the last [`BREAKER_WINDOW`] calls,
/// scoped to the calls that count against it (timeouts and network errors —
/// see [`TypedError::counts_against_breaker`]). HTTP status outcomes never
/// move the window, so a target that's merely returning application-level
/// 4xx/5xx doesn't trip delivery for every other message sharing the
/// mediator instance.
struct CircuitBreaker {
    state: Mutex<BreakerState>,
    window: Mutex<VecDeque<bool>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed),
            window: Mutex::new(VecDeque::with_capacity(BREAKER_WINDOW)),
        }
    }

    /// Returns `true` if a call may proceed. Transitions OPEN -> HALF_OPEN
    /// once [`BREAKER_OPEN_DURATION`] has elapsed.
    fn allow(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed => true,
            BreakerState::Open(since) => {
                if since.elapsed() >= BREAKER_OPEN_DURATION {
                    *state = BreakerState::HalfOpen { successes: 0 };
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen { .. } => true,
        }
    }

    fn record(&self, failed: bool) {
        let mut state = self.state.lock();
        match &mut *state {
            BreakerState::Closed => {
                let mut window = self.window.lock();
                if window.len() == BREAKER_WINDOW {
                    window.pop_front();
                }
                window.push_back(failed);
                if window.len() == BREAKER_WINDOW {
                    let failures = window.iter().filter(|f| **f).count();
                    if failures as f64 / BREAKER_WINDOW as f64 >= BREAKER_FAILURE_RATIO {
                        *state = BreakerState::Open(Instant::now());
                        window.clear();
                    }
                }
            }
            BreakerState::Open(_) => {}
            BreakerState::HalfOpen { successes } => {
                if failed {
                    *state = BreakerState::Open(Instant::now());
                } else {
                    *successes += 1;
                    if *successes >= BREAKER_HALF_OPEN_SUCCESS_THRESHOLD {
                        self.window.lock().clear();
                        *state = BreakerState::Closed;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct DeliveryResponse {
    #[serde(default)]
    ack: bool,
    #[serde(default, rename = "delaySeconds")]
    delay_seconds: Option<u32>,
}

/// Mediation as a trait so the process pool never depends on the concrete
/// HTTP client — a test double can substitute a canned outcome without a
/// live server.
#[async_trait]
pub trait Mediator: Send + Sync {
    async fn mediate(&self, message: &Message) -> Outcome;
}

pub struct HttpMediator {
    client: Client,
    breaker: CircuitBreaker,
    warnings: SharedWarnings,
}

impl HttpMediator {
    pub fn new(warnings: SharedWarnings) -> Self {
        Self::with_timeout(warnings, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(warnings: SharedWarnings, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self {
            client,
            breaker: CircuitBreaker::new(),
            warnings,
        }
    }

    async fn attempt(&self, message: &Message) -> Outcome {
        let body = serde_json::json!({ "messageId": message.id });
        let response = self
            .client
            .post(&message.mediation_target)
            .bearer_auth(&message.auth_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(err) if err.is_connect() => {
                return Outcome::error_connection(TypedError::NetworkError)
            }
            Err(err) if err.is_timeout() => {
                return Outcome::error_process(None, Some(TypedError::Timeout))
            }
            Err(_) => return Outcome::error_connection(TypedError::NetworkError),
        };

        self.classify(response).await
    }

    async fn classify(&self, response: reqwest::Response) -> Outcome {
        let status = response.status();
        match status {
            StatusCode::OK => match response.json::<DeliveryResponse>().await {
                Ok(body) if body.ack => Outcome::success(),
                Ok(body) => Outcome::error_process(body.delay_seconds, None),
                // A 200 with an unparseable body is treated as success for
                // backward compatibility with targets predating the JSON ack
                // contract.
                Err(_) => Outcome::success(),
            },
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u32>().ok());
                Outcome::error_process(retry_after, None)
            }
            StatusCode::NOT_IMPLEMENTED => {
                self.warnings.critical(
                    WarningCategory::Configuration,
                    format!("target {} returned 501 Not Implemented", response.url()),
                );
                Outcome::error_config()
            }
            s if s.is_client_error() => Outcome::error_config(),
            s if s.is_server_error() => {
                Outcome::error_process(None, Some(TypedError::HttpError(s.as_u16())))
            }
            _ => Outcome::error_process(None, Some(TypedError::HttpError(status.as_u16()))),
        }
    }
}

#[async_trait]
impl Mediator for HttpMediator {
    async fn mediate(&self, message: &Message) -> Outcome {
        let mut outcome = Outcome::error_connection(TypedError::NetworkError);
        for attempt_index in 0..MAX_ATTEMPTS {
            if !self.breaker.allow() {
                return Outcome::error_connection(TypedError::CircuitOpen);
            }

            outcome = self.attempt(message).await;

            let counts_as_failure = outcome
                .typed_error
                .as_ref()
                .map(TypedError::counts_against_breaker)
                .unwrap_or(false);
            self.breaker.record(counts_as_failure);

            use waypoint_core::OutcomeResult::*;
            if matches!(outcome.result, Success | ErrorConfig) {
                return outcome;
            }

            let retryable = outcome
                .typed_error
                .as_ref()
                .map(TypedError::is_retryable)
                .unwrap_or(false);
            if !retryable || attempt_index + 1 >= MAX_ATTEMPTS {
                return outcome;
            }

            let delay = RETRY_DELAYS_SECONDS[attempt_index as usize];
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        outcome
    }
}

/// A mediator double that returns a fixed [`Outcome`] without touching the
/// network, used by pool and manager tests that don't want to assert on
/// HTTP behavior.
pub struct FixedMediator {
    factory: Box<dyn Fn() -> Outcome + Send + Sync>,
}

impl FixedMediator {
    pub fn always(outcome: Outcome) -> Self {
        Self {
            factory: Box::new(move || outcome.clone()),
        }
    }

    pub fn from_fn(factory: impl Fn() -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
        }
    }
}

#[async_trait]
impl Mediator for FixedMediator {
    async fn mediate(&self, _message: &Message) -> Outcome {
        (self.factory)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_breaker_allows_calls() {
        let breaker = CircuitBreaker::new();
        assert!(breaker.allow());
    }

    #[test]
    fn opens_once_failure_ratio_reaches_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..4 {
            breaker.record(false);
        }
        for _ in 0..5 {
            breaker.record(true);
        }
        // Window isn't full yet (9/10), so the ratio hasn't been evaluated.
        assert!(breaker.allow());

        breaker.record(true); // 10th call: 6 failures / 10 >= 0.5.
        assert!(!breaker.allow());
    }

    #[tokio::test]
    async fn half_open_recovers_after_enough_successes() {
        let breaker = CircuitBreaker::new();
        for _ in 0..10 {
            breaker.record(true);
        }
        assert!(!breaker.allow());

        tokio::time::sleep(BREAKER_OPEN_DURATION + Duration::from_millis(100)).await;
        assert!(breaker.allow()); // Open -> HalfOpen.

        for _ in 0..BREAKER_HALF_OPEN_SUCCESS_THRESHOLD {
            breaker.record(false);
        }
        assert!(breaker.allow()); // HalfOpen -> Closed, window cleared.
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new();
        for _ in 0..10 {
            breaker.record(true);
        }
        tokio::time::sleep(BREAKER_OPEN_DURATION + Duration::from_millis(100)).await;
        assert!(breaker.allow());

        breaker.record(true);
        assert!(!breaker.allow());
    }
}
