//! Credential pool: selection, usage accounting and recovery.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use contracts::{
    CredentialConfig, HealthStatus, PoolSettings, QuotaSnapshot, SecretHandle, StatusTransition,
    TransportErrorKind,
};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::credential::Credential;
use crate::{CredentialId, CredentialStats, PoolError};

const HEALTHY_ABOVE: f64 = 70.0;
const WARNING_ABOVE: f64 = 40.0;

/// A credential handed out for one call
#[derive(Debug, Clone)]
pub struct CredentialLease {
    pub id: CredentialId,
    pub label: String,
    pub secret: SecretHandle,
    /// Health at selection time
    pub health: f64,
}

/// One selection, kept in the rotation history ring
#[derive(Debug, Clone, Serialize)]
pub struct RotationRecord {
    pub credential: CredentialId,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub reason: &'static str,
    pub health: f64,
}

/// State change produced by a pool operation
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A quota-exhaustion error took the credential out of rotation
    CredentialDisabled {
        id: CredentialId,
        label: String,
        kind: TransportErrorKind,
    },
    /// A disabled credential was put back into rotation
    CredentialRecovered {
        id: CredentialId,
        label: String,
        health: f64,
    },
    /// Pool-wide health status moved
    StatusChanged {
        transition: StatusTransition,
        average_health: f64,
    },
}

/// Suggested operator action for the current pool state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    AddCredentialsNow,
    AddBackupCredentials,
    PlanForReset,
    Ok,
}

impl Recommendation {
    fn evaluate(average_health: f64, combined_remaining: u64) -> Self {
        if average_health < 20.0 {
            Recommendation::AddCredentialsNow
        } else if average_health < 50.0 {
            Recommendation::AddBackupCredentials
        } else if combined_remaining < 100 {
            Recommendation::PlanForReset
        } else {
            Recommendation::Ok
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Recommendation::AddCredentialsNow => "CRITICAL: add more credentials immediately",
            Recommendation::AddBackupCredentials => "WARNING: consider adding backup credentials",
            Recommendation::PlanForReset => "INFO: plan for the quota reset or add credentials",
            Recommendation::Ok => "OK: pool quota is healthy",
        }
    }
}

/// Pool-wide figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolAggregate {
    pub total_requests: u64,
    pub total_errors: u64,
    pub combined_remaining: u64,
    pub combined_limit: u64,
    pub average_health: f64,
    pub active: usize,
    pub total: usize,
    pub status: HealthStatus,
    pub recommendation: Recommendation,
}

/// Full pool report
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub credentials: Vec<CredentialStats>,
    pub aggregate: PoolAggregate,
}

struct PoolState {
    credentials: Vec<Credential>,
    rotations: HeapRb<RotationRecord>,
    aggregate: PoolAggregate,
}

impl PoolState {
    fn get_mut(&mut self, id: CredentialId) -> Result<&mut Credential, PoolError> {
        self.credentials
            .get_mut(id.index())
            .ok_or(PoolError::UnknownCredential(id))
    }

    /// Recompute aggregate figures, reporting a status change if any
    fn refresh_aggregate(&mut self, events: &mut Vec<PoolEvent>) {
        let next = aggregate_of(&self.credentials);
        if let Some(transition) = StatusTransition::between(self.aggregate.status, next.status) {
            info!(
                from = %transition.from,
                to = %transition.to,
                average_health = next.average_health,
                "Credential pool status changed"
            );
            events.push(PoolEvent::StatusChanged {
                transition,
                average_health: next.average_health,
            });
        }
        self.aggregate = next;
    }
}

fn aggregate_of(credentials: &[Credential]) -> PoolAggregate {
    let total = credentials.len();
    let total_requests = credentials.iter().map(|c| c.request_count).sum();
    let total_errors = credentials.iter().map(|c| u64::from(c.error_count)).sum();
    let combined_remaining = credentials.iter().map(|c| c.remaining).sum();
    let combined_limit = credentials.iter().map(|c| c.limit).sum();
    let average_health = if total == 0 {
        0.0
    } else {
        credentials.iter().map(|c| c.health).sum::<f64>() / total as f64
    };

    PoolAggregate {
        total_requests,
        total_errors,
        combined_remaining,
        combined_limit,
        average_health,
        active: credentials.iter().filter(|c| c.active).count(),
        total,
        status: HealthStatus::from_score_exclusive(average_health, HEALTHY_ABOVE, WARNING_ABOVE),
        recommendation: Recommendation::evaluate(average_health, combined_remaining),
    }
}

/// Greedy-max by health; ties go to the least rotated, then the lowest id
fn selection_order(a: &Credential, b: &Credential) -> Ordering {
    a.health
        .total_cmp(&b.health)
        .then_with(|| b.rotation_count.cmp(&a.rotation_count))
        .then_with(|| b.id.cmp(&a.id))
}

/// Fixed-size pool of credentials
///
/// All state sits behind one lock; every operation is atomic with respect
/// to the others, so two concurrent `select` calls never see the same
/// rotation count.
pub struct CredentialPool {
    state: Mutex<PoolState>,
    settings: PoolSettings,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CredentialPool")
            .field("total", &state.credentials.len())
            .field("status", &state.aggregate.status)
            .finish()
    }
}

impl CredentialPool {
    /// Create a pool from `(label, secret, initial_limit)` triples
    pub fn new<I, L>(credentials: I, settings: PoolSettings) -> Self
    where
        I: IntoIterator<Item = (L, SecretHandle, u64)>,
        L: Into<String>,
    {
        let credentials: Vec<Credential> = credentials
            .into_iter()
            .enumerate()
            .map(|(idx, (label, secret, limit))| {
                Credential::new(CredentialId::new(idx), label.into(), secret, limit)
            })
            .collect();

        let aggregate = aggregate_of(&credentials);
        let rotations = HeapRb::new(settings.rotation_history.max(1));

        info!(
            credentials = credentials.len(),
            min_health = settings.min_health,
            "Credential pool created"
        );

        Self {
            state: Mutex::new(PoolState {
                credentials,
                rotations,
                aggregate,
            }),
            settings,
        }
    }

    /// Create a pool from configuration with resolved secrets
    ///
    /// # Errors
    /// `MissingSecret` when a credential has no inline secret.
    pub fn from_config(
        credentials: &[CredentialConfig],
        settings: &PoolSettings,
    ) -> Result<Self, PoolError> {
        let entries = credentials
            .iter()
            .map(|c| {
                c.secret
                    .clone()
                    .map(|secret| (c.id.clone(), secret, c.initial_limit))
                    .ok_or_else(|| PoolError::missing_secret(&c.id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(entries, settings.clone()))
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.state.lock().credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the healthiest usable credential
    ///
    /// Only credentials that are active with `health > min_health` qualify.
    /// The winner's rotation count is incremented and the choice recorded.
    ///
    /// # Errors
    /// `NoHealthyCredential` when nothing qualifies.
    #[instrument(level = "trace", name = "credential_select", skip(self))]
    pub fn select(&self) -> Result<CredentialLease, PoolError> {
        let mut state = self.state.lock();
        let min_health = self.settings.min_health;
        let total = state.credentials.len();

        let chosen = state
            .credentials
            .iter_mut()
            .filter(|c| c.is_selectable(min_health))
            .max_by(|a, b| selection_order(a, b));

        let Some(cred) = chosen else {
            warn!(total, "No healthy credential available");
            return Err(PoolError::NoHealthyCredential { total });
        };

        cred.rotation_count += 1;
        let lease = CredentialLease {
            id: cred.id,
            label: cred.label.clone(),
            secret: cred.secret.clone(),
            health: cred.health,
        };

        state.rotations.push_overwrite(RotationRecord {
            credential: lease.id,
            label: lease.label.clone(),
            timestamp: Utc::now(),
            reason: "health_based_rotation",
            health: lease.health,
        });

        debug!(credential = %lease.id, health = lease.health, "Credential selected");
        Ok(lease)
    }

    /// Overwrite the quota snapshot after a completed call
    pub fn update_usage(
        &self,
        id: CredentialId,
        quota: QuotaSnapshot,
    ) -> Result<Vec<PoolEvent>, PoolError> {
        let mut state = self.state.lock();
        let cred = state.get_mut(id)?;
        cred.apply_quota(quota, Utc::now());
        debug!(
            credential = %id,
            remaining = quota.remaining,
            limit = quota.limit,
            health = cred.health,
            "Credential usage updated"
        );

        let mut events = Vec::new();
        state.refresh_aggregate(&mut events);
        Ok(events)
    }

    /// Count a completed call for which the API reported no quota
    pub fn mark_used(&self, id: CredentialId) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        state.get_mut(id)?.touch(Utc::now());
        Ok(())
    }

    /// Record a failed call
    ///
    /// A quota-exhaustion error takes the credential out of rotation.
    pub fn record_error(
        &self,
        id: CredentialId,
        kind: TransportErrorKind,
    ) -> Result<Vec<PoolEvent>, PoolError> {
        let mut state = self.state.lock();
        let cred = state.get_mut(id)?;
        cred.error_count += 1;
        cred.refresh_health();

        let mut events = Vec::new();
        if kind == TransportErrorKind::QuotaExceeded && cred.active {
            cred.active = false;
            warn!(
                credential = %id,
                errors = cred.error_count,
                "Credential quota exhausted, disabled"
            );
            events.push(PoolEvent::CredentialDisabled {
                id,
                label: cred.label.clone(),
                kind,
            });
        } else {
            debug!(credential = %id, kind = %kind, errors = cred.error_count, "Credential error recorded");
        }

        state.refresh_aggregate(&mut events);
        Ok(events)
    }

    /// Reactivate a disabled credential whose error count is below the threshold
    ///
    /// No-op for active credentials or those with too many errors.
    pub fn recover(&self, id: CredentialId) -> Result<Vec<PoolEvent>, PoolError> {
        let mut state = self.state.lock();
        let threshold = self.settings.recovery_error_threshold;
        let cred = state.get_mut(id)?;

        let mut events = Vec::new();
        if let Some(event) = try_recover(cred, threshold) {
            events.push(event);
        }
        state.refresh_aggregate(&mut events);
        Ok(events)
    }

    /// Run the recovery check over every credential
    pub fn recover_all(&self) -> Vec<PoolEvent> {
        let mut state = self.state.lock();
        let threshold = self.settings.recovery_error_threshold;

        let mut events: Vec<PoolEvent> = state
            .credentials
            .iter_mut()
            .filter_map(|cred| try_recover(cred, threshold))
            .collect();
        state.refresh_aggregate(&mut events);
        events
    }

    /// Quota window reset for every credential
    pub fn reset_all(&self) -> Vec<PoolEvent> {
        let mut state = self.state.lock();
        let mut events = Vec::new();
        for cred in state.credentials.iter_mut() {
            let was_active = cred.active;
            cred.reset_window();
            if !was_active {
                events.push(recovered(cred));
            }
        }
        info!(credentials = state.credentials.len(), "All credential quotas reset");
        state.refresh_aggregate(&mut events);
        events
    }

    /// Apply the quota window reset to credentials whose `reset_at` has passed
    pub fn refresh_expired(&self, now: DateTime<Utc>) -> Vec<PoolEvent> {
        let mut state = self.state.lock();
        let mut events = Vec::new();
        for cred in state.credentials.iter_mut() {
            if cred.reset_at.is_some_and(|reset_at| reset_at <= now) {
                let was_active = cred.active;
                cred.reset_window();
                debug!(credential = %cred.id, "Credential quota window reset");
                if !was_active {
                    events.push(recovered(cred));
                }
            }
        }
        state.refresh_aggregate(&mut events);
        events
    }

    /// Forget one recorded error per credential
    pub fn decay_errors(&self) -> Vec<PoolEvent> {
        let mut state = self.state.lock();
        for cred in state.credentials.iter_mut().filter(|c| c.error_count > 0) {
            cred.error_count -= 1;
            cred.refresh_health();
        }
        let mut events = Vec::new();
        state.refresh_aggregate(&mut events);
        events
    }

    pub fn aggregate(&self) -> PoolAggregate {
        self.state.lock().aggregate.clone()
    }

    pub fn stats(&self, id: CredentialId) -> Result<CredentialStats, PoolError> {
        let state = self.state.lock();
        state
            .credentials
            .get(id.index())
            .map(Credential::stats)
            .ok_or(PoolError::UnknownCredential(id))
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            credentials: state.credentials.iter().map(Credential::stats).collect(),
            aggregate: state.aggregate.clone(),
        }
    }

    /// Most recent selections, newest first
    pub fn rotation_history(&self, limit: usize) -> Vec<RotationRecord> {
        let state = self.state.lock();
        state.rotations.iter().rev().take(limit).cloned().collect()
    }
}

fn try_recover(cred: &mut Credential, threshold: u32) -> Option<PoolEvent> {
    if cred.active || cred.error_count >= threshold {
        return None;
    }
    cred.active = true;
    cred.refresh_health();
    info!(
        credential = %cred.id,
        errors = cred.error_count,
        health = cred.health,
        "Credential recovered"
    );
    Some(recovered(cred))
}

fn recovered(cred: &Credential) -> PoolEvent {
    PoolEvent::CredentialRecovered {
        id: cred.id,
        label: cred.label.clone(),
        health: cred.health,
    }
}
