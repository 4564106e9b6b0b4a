//! Per-credential state and health scoring.

use std::fmt;

use chrono::{DateTime, Utc};
use contracts::{QuotaSnapshot, SecretHandle};
use serde::Serialize;

/// Health penalty per recorded error
const ERROR_PENALTY: f64 = 5.0;

/// Position of a credential in the pool, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CredentialId(usize);

impl CredentialId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cred-{}", self.0)
    }
}

/// `max(0, 100 * remaining / limit - 5 * errors)`, capped at 100
///
/// A zero limit counts as an exhausted quota.
pub fn compute_health(remaining: u64, limit: u64, error_count: u32) -> f64 {
    let base = if limit == 0 {
        0.0
    } else {
        100.0 * remaining as f64 / limit as f64
    };
    (base - ERROR_PENALTY * f64::from(error_count)).clamp(0.0, 100.0)
}

/// Mutable state of one credential, owned by the pool
#[derive(Debug)]
pub(crate) struct Credential {
    pub id: CredentialId,
    pub label: String,
    pub secret: SecretHandle,
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub error_count: u32,
    pub rotation_count: u64,
    pub health: f64,
    pub active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(id: CredentialId, label: String, secret: SecretHandle, initial_limit: u64) -> Self {
        Self {
            id,
            label,
            secret,
            remaining: initial_limit,
            limit: initial_limit,
            reset_at: None,
            request_count: 0,
            error_count: 0,
            rotation_count: 0,
            health: compute_health(initial_limit, initial_limit, 0),
            active: true,
            last_used: None,
            created_at: Utc::now(),
        }
    }

    pub fn refresh_health(&mut self) {
        self.health = compute_health(self.remaining, self.limit, self.error_count);
    }

    pub fn apply_quota(&mut self, quota: QuotaSnapshot, now: DateTime<Utc>) {
        self.remaining = quota.remaining;
        self.limit = quota.limit;
        self.reset_at = quota.reset_at;
        self.touch(now);
        self.refresh_health();
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used = Some(now);
        self.request_count += 1;
    }

    /// Quota window reset: full quota, reactivated
    pub fn reset_window(&mut self) {
        self.remaining = self.limit;
        self.reset_at = None;
        self.active = true;
        self.refresh_health();
    }

    pub fn is_selectable(&self, min_health: f64) -> bool {
        self.active && self.health > min_health
    }

    pub fn stats(&self) -> CredentialStats {
        let percentage_used = if self.limit == 0 {
            100.0
        } else {
            self.limit.saturating_sub(self.remaining) as f64 / self.limit as f64 * 100.0
        };

        CredentialStats {
            id: self.id,
            label: self.label.clone(),
            secret_hint: self.secret.hint(),
            health: self.health,
            remaining: self.remaining,
            limit: self.limit,
            percentage_used,
            request_count: self.request_count,
            error_count: self.error_count,
            rotation_count: self.rotation_count,
            active: self.active,
            reset_at: self.reset_at,
            last_used: self.last_used,
            created_at: self.created_at,
        }
    }
}

/// Read-only view of one credential
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialStats {
    pub id: CredentialId,
    pub label: String,
    /// Redacted tail of the secret
    pub secret_hint: String,
    pub health: f64,
    pub remaining: u64,
    pub limit: u64,
    pub percentage_used: f64,
    pub request_count: u64,
    pub error_count: u32,
    pub rotation_count: u64,
    pub active: bool,
    pub reset_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
