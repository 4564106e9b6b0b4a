//! RequestDescriptor - opaque description of one remote API call
//!
//! Params and headers are kept in ordered maps so that equivalent requests
//! always serialize identically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Remote API request descriptor
///
/// Deserialization goes through the same normalization as the builders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRequest")]
pub struct RequestDescriptor {
    /// HTTP-style method, stored upper-case
    pub method: String,

    /// Endpoint path (e.g., "/repos/rust-lang/rust")
    pub endpoint: String,

    /// Query / body parameters
    pub params: BTreeMap<String, String>,

    /// Request headers, keys stored lower-case
    pub headers: BTreeMap<String, String>,
}

/// Wire form before normalization
#[derive(Deserialize)]
struct RawRequest {
    #[serde(default = "default_method")]
    method: String,
    endpoint: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl From<RawRequest> for RequestDescriptor {
    fn from(raw: RawRequest) -> Self {
        let mut request = Self::new(raw.method, raw.endpoint);
        request.params = raw.params;
        raw.headers
            .into_iter()
            .fold(request, |request, (key, value)| request.with_header(key, value))
    }
}

impl RequestDescriptor {
    /// Create a descriptor with the given method and endpoint
    pub fn new(method: impl AsRef<str>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }

    /// Shorthand for a GET request
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new("GET", endpoint)
    }

    /// Shorthand for a POST request
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new("POST", endpoint)
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a header (key is lower-cased)
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Get a header by case-insensitive name
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether a successful answer to this request may be cached
    pub fn is_cacheable(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET") || self.method.eq_ignore_ascii_case("HEAD")
    }
}
