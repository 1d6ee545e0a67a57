use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;
use std::time::Duration;

use crate::core::RateLimitInfo;

/// Body of the 403 sent to blocked identities. Deliberately vague about the
/// threshold and duration.
pub const BLOCKED_MESSAGE: &str =
    "Your IP is temporarily blocked due to repeated abuse. Please try again later.";

/// A request refused by the admission layer
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The identity is blocked
    IpBlocked,
    /// The identity used up the quota of its window
    RateLimitExceeded(RateLimitInfo),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::IpBlocked => StatusCode::FORBIDDEN,
            Rejection::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::IpBlocked => f.write_str(BLOCKED_MESSAGE),
            Rejection::RateLimitExceeded(info) => write!(
                f,
                "Too many requests. Allowed {} per {}.",
                info.limit,
                describe_window(info.window)
            ),
        }
    }
}

impl std::error::Error for Rejection {}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        let mut response = (self.status(), body).into_response();

        if let Rejection::RateLimitExceeded(info) = &self {
            let headers = response.headers_mut();
            info.apply_headers(headers);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(info.reset_secs().max(1)));
        }

        response
    }
}

/// Human readable window length, e.g. "15 minutes" or "30 seconds"
pub fn describe_window(window: Duration) -> String {
    let millis = window.as_millis();
    let (amount, unit) = if millis >= 60_000 && millis % 60_000 == 0 {
        (millis / 60_000, "minute")
    } else if millis >= 1_000 && millis % 1_000 == 0 {
        (millis / 1_000, "second")
    } else {
        (millis, "millisecond")
    };

    if amount == 1 {
        format!("1 {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}
