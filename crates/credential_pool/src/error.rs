//! Credential pool errors

use thiserror::Error;

use crate::CredentialId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every credential is inactive or at/below the minimum health
    #[error("no healthy credential available ({total} configured)")]
    NoHealthyCredential { total: usize },

    #[error("unknown credential: {0}")]
    UnknownCredential(CredentialId),

    /// A credential reached the pool without a resolved secret
    #[error("credential '{label}' has no secret")]
    MissingSecret { label: String },
}

impl PoolError {
    pub fn missing_secret(label: impl Into<String>) -> Self {
        Self::MissingSecret {
            label: label.into(),
        }
    }
}
