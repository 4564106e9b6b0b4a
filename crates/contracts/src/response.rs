//! ApiResponse - transport output
//!
//! Carries the raw status, headers and body plus helpers to read the
//! quota snapshot and validator token the remote API returns.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying remaining quota
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the quota limit
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the reset time (epoch seconds)
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Response returned by a transport call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// HTTP-equivalent status code
    pub status: u16,

    /// Response headers, keys stored lower-case
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw body
    #[serde(default)]
    pub body: Bytes,
}

/// Quota state reported by the remote API for one credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Remaining calls in the current window
    pub remaining: u64,
    /// Calls allowed per window
    pub limit: u64,
    /// When the window resets
    pub reset_at: Option<DateTime<Utc>>,
}

impl ApiResponse {
    /// Create a response with the given status and body
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// 200 OK shorthand
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// 304 Not Modified shorthand
    pub fn not_modified() -> Self {
        Self::new(304, Bytes::new())
    }

    /// Add a header (key is lower-cased)
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Attach rate-limit headers
    pub fn with_quota(self, quota: QuotaSnapshot) -> Self {
        let reset = quota.reset_at.map(|t| t.timestamp().to_string());
        let response = self
            .with_header(HEADER_REMAINING, quota.remaining.to_string())
            .with_header(HEADER_LIMIT, quota.limit.to_string());
        match reset {
            Some(reset) => response.with_header(HEADER_RESET, reset),
            None => response,
        }
    }

    /// Get a header by case-insensitive name
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 304 status
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// ETag-equivalent validator token
    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    /// Last-Modified header
    pub fn last_modified(&self) -> Option<&str> {
        self.header("last-modified")
    }

    /// Body decoded as UTF-8 (lossy), for diagnostics
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the quota snapshot from rate-limit headers
    ///
    /// Returns `None` when remaining or limit are absent or malformed.
    pub fn quota(&self) -> Option<QuotaSnapshot> {
        let remaining = self.header(HEADER_REMAINING)?.trim().parse().ok()?;
        let limit = self.header(HEADER_LIMIT)?.trim().parse().ok()?;
        let reset_at = self
            .header(HEADER_RESET)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Some(QuotaSnapshot {
            remaining,
            limit,
            reset_at,
        })
    }
}
