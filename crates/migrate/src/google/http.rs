//! HTTP plumbing shared by the Google clients
//!
//! Responses are inspected by status instead of letting ureq turn them into
//! errors, so quota and permission problems can be told apart.

use std::time::Duration;

use chrono::{DateTime, Utc};
use ureq::Body;
use ureq::http::Response;

use super::api::ErrorResponse;
use crate::error::ProviderError;

/// Error reasons Google uses for quota exhaustion on a 403
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
    "dailyLimitExceeded",
];

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Agent that reports non-2xx statuses as responses
pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Turn a ureq result into a successful response or a classified error
pub(crate) fn check(
    what: &str,
    result: Result<Response<Body>, ureq::Error>,
) -> Result<Response<Body>, ProviderError> {
    let mut response = result.map_err(|e| ProviderError::Transient(format!("{}: {}", what, e)))?;
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));
    let body = response.body_mut().read_to_string().unwrap_or_default();
    Err(classify(what, status, retry_after, &body))
}

/// Read a JSON body, treating a truncated or garbled body as transient
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(
    what: &str,
    mut response: Response<Body>,
) -> Result<T, ProviderError> {
    response
        .body_mut()
        .read_json()
        .map_err(|e| ProviderError::Transient(format!("{}: unreadable response: {}", what, e)))
}

/// Read a JSON body of up to `limit` bytes
///
/// A body over the limit is permanent: downloading it again cannot help.
pub(crate) fn read_json_limited<T: serde::de::DeserializeOwned>(
    what: &str,
    mut response: Response<Body>,
    limit: u64,
) -> Result<T, ProviderError> {
    let bytes = response
        .body_mut()
        .with_config()
        .limit(limit)
        .read_to_vec()
        .map_err(|e| match e {
            ureq::Error::BodyExceedsLimit(max) => ProviderError::InvalidArgument(format!(
                "{}: response is larger than {} bytes",
                what, max
            )),
            e => ProviderError::Transient(format!("{}: unreadable response: {}", what, e)),
        })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::Transient(format!("{}: unreadable response: {}", what, e)))
}

/// Map an HTTP error status to a provider error
pub(crate) fn classify(
    what: &str,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> ProviderError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let reasons: Vec<String> = parsed
        .as_ref()
        .map(|r| r.error.errors.iter().filter_map(|e| e.reason.clone()).collect())
        .unwrap_or_default();
    let detail = match &parsed {
        Some(r) if !r.error.message.is_empty() => r.error.message.clone(),
        _ => truncate(body.trim(), MAX_ERROR_BODY),
    };
    let message = format!("{} (HTTP {}): {}", what, status, detail);

    let quota = reasons
        .iter()
        .any(|r| RATE_LIMIT_REASONS.contains(&r.as_str()));

    match status {
        429 => ProviderError::RateLimited {
            message,
            retry_after,
        },
        403 if quota => ProviderError::RateLimited {
            message,
            retry_after,
        },
        401 | 403 => ProviderError::PermissionDenied(message),
        404 | 410 => ProviderError::NotFound(message),
        408 => ProviderError::Transient(message),
        500..=599 => ProviderError::Transient(message),
        _ => ProviderError::InvalidArgument(message),
    }
}

/// Parse a `Retry-After` header: delay seconds or an HTTP date
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
