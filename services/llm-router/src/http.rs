//! Response handling shared by the vendor adapters.

use std::time::Duration;

use ai_agent::LanguageModelError;
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

const RESET_HEADERS: [&str; 3] = [
    "retry-after",
    "x-ratelimit-reset-tokens",
    "x-ratelimit-reset-requests",
];

/// Decodes a successful JSON body, or classifies the failure.
pub(crate) async fn read_json(response: Response, vendor: &str) -> Result<Value, LanguageModelError> {
    let status = response.status();
    log_rate_limit_headers(response.headers(), vendor);

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_hint(response.headers());
        warn!(vendor, ?retry_after, "rate limited");
        return Err(LanguageModelError::RateLimited { retry_after });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(vendor, status = status.as_u16(), "request rejected");
        return Err(LanguageModelError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|err| LanguageModelError::transport(format!("{vendor} returned invalid JSON: {err}")))
}

pub(crate) fn transport_error(vendor: &str, err: reqwest::Error) -> LanguageModelError {
    LanguageModelError::transport(format!("error getting {vendor} response: {err}"))
}

fn log_rate_limit_headers(headers: &HeaderMap, vendor: &str) {
    for (name, value) in headers {
        if name.as_str().starts_with("x-ratelimit") {
            debug!(vendor, header = name.as_str(), value = ?value, "rate limit header");
        }
    }
}

/// The first reset hint the server sent, in header preference order.
pub fn retry_hint(headers: &HeaderMap) -> Option<Duration> {
    RESET_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_reset)
    })
}

/// Parses reset values such as `20`, `1.5s`, `250ms` or `6m0s`. A bare
/// number is seconds.
pub fn parse_reset(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<f64>() {
        return seconds_to_duration(seconds);
    }

    let mut total = 0.0_f64;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        total += match &rest[..unit_len] {
            "h" => amount * 3600.0,
            "m" => amount * 60.0,
            "s" => amount,
            "ms" => amount / 1000.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
    }
    seconds_to_duration(total)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}
