//! SecretHandle - opaque credential secret
//!
//! Never printed: `Debug` and `Display` redact the value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque secret handle (API key, token, ...)
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHandle(String);

impl SecretHandle {
    /// Wrap a raw secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Access the raw secret, for transports only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last four characters, for diagnostics
    pub fn hint(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let start = chars.len().saturating_sub(4);
        format!("…{}", chars[start..].iter().collect::<String>())
    }
}

impl fmt::Debug for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretHandle(****)")
    }
}

impl fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = SecretHandle::new("ghp_abcdef123456");
        assert_eq!(format!("{:?}", secret), "SecretHandle(****)");
        assert_eq!(secret.to_string(), "****");
        assert_eq!(secret.expose(), "ghp_abcdef123456");
        assert_eq!(secret.hint(), "…3456");
    }
}
