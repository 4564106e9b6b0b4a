//! Request fingerprinting.

use std::collections::BTreeMap;
use std::fmt;

use contracts::RequestDescriptor;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 over the normalized request, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a request
    ///
    /// The method is hashed upper-case and header names lower-case, whatever
    /// the descriptor holds; params and headers are hashed in key order, so
    /// equivalent requests hash the same regardless of construction order.
    /// Every field is length-prefixed.
    pub fn of(request: &RequestDescriptor) -> Self {
        let headers: BTreeMap<String, &str> = request
            .headers
            .iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value.as_str()))
            .collect();

        let mut hasher = Sha256::new();
        feed(&mut hasher, &request.method.to_ascii_uppercase());
        feed(&mut hasher, &request.endpoint);

        hasher.update((request.params.len() as u64).to_le_bytes());
        for (key, value) in &request.params {
            feed(&mut hasher, key);
            feed(&mut hasher, value);
        }

        hasher.update((headers.len() as u64).to_le_bytes());
        for (key, value) in &headers {
            feed(&mut hasher, key);
            feed(&mut hasher, value);
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for logs
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn feed(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_order_does_not_matter() {
        let a = RequestDescriptor::get("/search")
            .with_param("q", "rust")
            .with_param("page", "2")
            .with_header("Accept", "json");
        let b = RequestDescriptor::new("get", "/search")
            .with_header("ACCEPT", "json")
            .with_param("page", "2")
            .with_param("q", "rust");
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_eq!(Fingerprint::of(&a).as_str().len(), 64);
    }

    #[test]
    fn test_raw_fields_are_normalized() {
        let built = RequestDescriptor::get("/user").with_header("Accept", "json");
        let mut raw = RequestDescriptor::get("/user");
        raw.method = "get".to_string();
        raw.headers.insert("Accept".to_string(), "json".to_string());
        assert_eq!(Fingerprint::of(&built), Fingerprint::of(&raw));
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = RequestDescriptor::get("/a").with_param("bc", "d");
        let b = RequestDescriptor::get("/a").with_param("b", "cd");
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));

        let get = RequestDescriptor::get("/a");
        let post = RequestDescriptor::post("/a");
        assert_ne!(Fingerprint::of(&get), Fingerprint::of(&post));
    }
}
