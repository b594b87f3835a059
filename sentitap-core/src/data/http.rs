//! Shared blocking HTTP plumbing for window sources.
//!
//! One GET with retry, circuit breaker, and cancellation checks. The client
//! timeout applies per attempt.

use super::circuit_breaker::CircuitBreaker;
use super::provider::CancelToken;
use super::retry::RetryPolicy;
use crate::error::WindowFetchError;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

const USER_AGENT: &str = concat!("sentitap/", env!("CARGO_PKG_VERSION"));

/// Build the blocking client used by every provider.
pub fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// Sleep for `delay`, waking early if the token is cancelled.
///
/// Returns `false` when cancelled.
pub fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

fn classify(err: reqwest::Error) -> WindowFetchError {
    if err.is_timeout() {
        WindowFetchError::Timeout(err.to_string())
    } else if err.is_decode() {
        WindowFetchError::ResponseFormatChanged(err.to_string())
    } else {
        WindowFetchError::NetworkUnreachable(err.to_string())
    }
}

/// GET `url` with `query` and decode the JSON body as `T`.
///
/// 403 trips the breaker and stops. 429 backs off for `retry-after` when the
/// header is present. Network errors, timeouts and 5xx are retried per
/// `policy`; other statuses fail at once.
pub fn get_json<T: DeserializeOwned>(
    client: &reqwest::blocking::Client,
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    url: &str,
    query: &[(&str, String)],
    cancel: &CancelToken,
) -> Result<T, WindowFetchError> {
    let mut last_error = WindowFetchError::Cancelled;
    let mut wait = Duration::ZERO;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 && !sleep_unless_cancelled(wait, cancel) {
            return Err(WindowFetchError::Cancelled);
        }
        if cancel.is_cancelled() {
            return Err(WindowFetchError::Cancelled);
        }
        if !breaker.is_allowed() {
            return Err(WindowFetchError::CircuitBreakerTripped);
        }
        wait = policy.delay(attempt + 1);

        let resp = match client.get(url).query(query).send() {
            Ok(resp) => resp,
            Err(e) => {
                breaker.record_failure();
                last_error = classify(e);
                tracing::debug!(url, attempt, error = %last_error, "request failed");
                continue;
            }
        };

        let status = resp.status();
        if status == StatusCode::FORBIDDEN {
            breaker.trip();
            return Err(WindowFetchError::CircuitBreakerTripped);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            breaker.record_failure();
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            if let Some(secs) = retry_after {
                wait = Duration::from_secs(secs);
            }
            last_error = WindowFetchError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(wait.as_secs()),
            };
            tracing::debug!(url, attempt, wait_ms = wait.as_millis() as u64, "rate limited");
            continue;
        }
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            let err = WindowFetchError::Http {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            };
            if !err.is_retryable() {
                return Err(err);
            }
            breaker.record_failure();
            last_error = err;
            continue;
        }

        let body = resp.text().map_err(classify)?;
        let parsed = serde_json::from_str::<T>(&body)
            .map_err(|e| WindowFetchError::ResponseFormatChanged(format!("{url}: {e}")))?;
        breaker.record_success();
        return Ok(parsed);
    }

    Err(last_error)
}
