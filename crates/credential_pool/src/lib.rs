//! # Credential Pool
//!
//! Tracks a fixed set of API credentials, each with its own quota snapshot
//! and error history, and hands out the healthiest usable one per request.
//!
//! ## Usage
//!
//! ```ignore
//! use credential_pool::CredentialPool;
//!
//! let pool = CredentialPool::from_config(&blueprint.credentials, &blueprint.pool)?;
//! let lease = pool.select()?;
//! // ... perform the call with lease.secret ...
//! pool.update_usage(lease.id, quota)?;
//! ```

mod credential;
mod error;
mod pool;

pub use credential::{compute_health, CredentialId, CredentialStats};
pub use error::PoolError;
pub use pool::{
    CredentialLease, CredentialPool, PoolAggregate, PoolEvent, PoolStatus, Recommendation,
    RotationRecord,
};
