//! Health events from the pool and the queue, and the alerts they raise

use contracts::{AlertSeverity, HealthStatus, StatusTransition};
use credential_pool::PoolEvent;
use serde_json::{json, Value};

/// State change forwarded to the notifier
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    Pool(PoolEvent),
    Queue {
        transition: StatusTransition,
        success_rate: f64,
    },
}

/// Alert raised by an event, if any
///
/// Degradations alert at the new level, a return to healthy is a reset,
/// and partial improvements stay silent.
pub fn alert_for(event: &HealthEvent) -> Option<(AlertSeverity, Value)> {
    match event {
        HealthEvent::Pool(PoolEvent::CredentialDisabled { label, kind, .. }) => Some((
            AlertSeverity::Error,
            json!({
                "source": "credential_pool",
                "credential": label,
                "reason": kind.as_str(),
                "message": "credential disabled",
            }),
        )),
        HealthEvent::Pool(PoolEvent::CredentialRecovered { label, health, .. }) => Some((
            AlertSeverity::Rotation,
            json!({
                "source": "credential_pool",
                "credential": label,
                "health": round1(*health),
                "message": "credential back in rotation",
            }),
        )),
        HealthEvent::Pool(PoolEvent::StatusChanged {
            transition,
            average_health,
        }) => severity_for(transition).map(|severity| {
            (
                severity,
                json!({
                    "source": "credential_pool",
                    "from": transition.from.as_str(),
                    "to": transition.to.as_str(),
                    "average_health": round1(*average_health),
                }),
            )
        }),
        HealthEvent::Queue {
            transition,
            success_rate,
        } => severity_for(transition).map(|severity| {
            (
                severity,
                json!({
                    "source": "dispatch_queue",
                    "from": transition.from.as_str(),
                    "to": transition.to.as_str(),
                    "success_rate": round1(*success_rate),
                }),
            )
        }),
    }
}

fn severity_for(transition: &StatusTransition) -> Option<AlertSeverity> {
    if transition.is_degradation() {
        return Some(match transition.to {
            HealthStatus::Critical => AlertSeverity::Critical,
            _ => AlertSeverity::Warning,
        });
    }
    (transition.to == HealthStatus::Healthy).then_some(AlertSeverity::Reset)
}

// Payload numbers feed the content hash; one decimal keeps near-equal
// readings deduplicating together.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
