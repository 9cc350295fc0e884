//! Shared HTTP transport for the Google APIs
//!
//! Wraps a `ureq` agent with bearer auth, a global timeout, status
//! classification into [`SyncError`] and bounded retry with jitter.
//! Synchronous so the engine stays executor-agnostic.

use log::{debug, warn};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialSupplier;
use crate::config::RetryPolicy;
use crate::error::SyncError;

/// Longest provider error text carried into an error message
const MAX_ERROR_BODY: usize = 300;

/// Authenticated JSON transport shared by the mailbox and calendar clients
pub struct ApiTransport {
    agent: ureq::Agent,
    credentials: Arc<dyn CredentialSupplier>,
    retry: RetryPolicy,
}

impl ApiTransport {
    pub fn new(
        credentials: Arc<dyn CredentialSupplier>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            agent: build_agent(timeout),
            credentials,
            retry,
        }
    }

    /// GET `url` and decode the JSON response
    pub fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, SyncError> {
        with_retry(&self.retry, what, || {
            let token = self.credentials.access_token()?;
            let response = self
                .agent
                .get(url)
                .header("Authorization", &format!("Bearer {}", token))
                .call()
                .map_err(|e| map_transport_error(e, what))?;
            read_json_response(response, what)
        })
    }

    /// POST a JSON body to `url` and decode the JSON response
    pub fn post_json<B, T>(&self, url: &str, body: &B, what: &str) -> Result<T, SyncError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        with_retry(&self.retry, what, || {
            let token = self.credentials.access_token()?;
            let response = self
                .agent
                .post(url)
                .header("Authorization", &format!("Bearer {}", token))
                .send_json(body)
                .map_err(|e| map_transport_error(e, what))?;
            read_json_response(response, what)
        })
    }
}

/// Agent that reports HTTP error statuses as responses so they can be classified
pub(crate) fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    config.into()
}

/// Decode a 2xx body, or classify the failure status
pub(crate) fn read_json_response<T: DeserializeOwned>(
    mut response: ureq::http::Response<ureq::Body>,
    what: &str,
) -> Result<T, SyncError> {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);

    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| map_transport_error(e, what))?;

    if !(200..300).contains(&status) {
        return Err(classify_status(status, retry_after, error_message(&body)));
    }

    // Some endpoints answer 204 or an empty body
    let body = if body.trim().is_empty() { "{}" } else { &body };
    serde_json::from_str(body)
        .map_err(|e| SyncError::InvalidResponse(format!("{}: {}", what, e)))
}

/// Map an HTTP failure status onto the error taxonomy
pub fn classify_status(status: u16, retry_after: Option<Duration>, message: String) -> SyncError {
    match status {
        401 | 403 => SyncError::Auth(message),
        404 => SyncError::NotFound(message),
        408 | 429 | 500..=599 => SyncError::Transient {
            message: format!("HTTP {}: {}", status, message),
            retry_after,
        },
        _ => SyncError::Api { status, message },
    }
}

/// Map a `ureq` transport error; timeouts and connection problems are transient
pub(crate) fn map_transport_error(err: ureq::Error, what: &str) -> SyncError {
    match err {
        ureq::Error::StatusCode(status) => classify_status(status, None, what.to_string()),
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound => SyncError::transient(format!("{}: {}", what, err)),
        other => SyncError::InvalidResponse(format!("{}: {}", what, other)),
    }
}

/// `Retry-After` in delay-seconds form. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Google error bodies look like `{"error": {"code": 404, "message": "..."}}`
fn error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorEnvelope {
        error: ErrorDetail,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(message) = envelope.error.message
    {
        return message;
    }

    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt bound is reached.
///
/// The delay grows exponentially with jitter; a server `Retry-After` longer
/// than the computed delay wins.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    what: &str,
    mut op: impl FnMut() -> Result<T, SyncError>,
) -> Result<T, SyncError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let backoff = policy.backoff(attempt);
                let jitter = Duration::from_millis(rand_jitter(backoff.as_millis() as u64 / 2));
                let mut delay = backoff + jitter;
                if let SyncError::Transient {
                    retry_after: Some(retry_after),
                    ..
                } = &err
                {
                    delay = delay.max(*retry_after);
                }
                warn!(
                    "[HTTP] {} failed (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt + 1,
                    attempts,
                    err,
                    delay
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                debug!("[HTTP] {} failed permanently: {}", what, err);
                return Err(err);
            }
        }
    }
}

/// Random jitter in `0..=max_ms` milliseconds
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_ms)
}
