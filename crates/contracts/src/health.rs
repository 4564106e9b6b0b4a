//! Health classification shared by the pool and the queue

use std::fmt;

use serde::{Deserialize, Serialize};

/// Three-level health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Classify a 0-100 score with strict lower bounds (`> healthy`, `> warning`)
    ///
    /// Used for pool mean health: healthy above 70, warning above 40.
    pub fn from_score_exclusive(score: f64, healthy: f64, warning: f64) -> Self {
        if score > healthy {
            HealthStatus::Healthy
        } else if score > warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }

    /// Classify a 0-100 score with inclusive lower bounds (`>= healthy`, `>= warning`)
    ///
    /// Used for queue success rate: healthy from 90, warning from 70.
    pub fn from_score_inclusive(score: f64, healthy: f64, warning: f64) -> Self {
        if score >= healthy {
            HealthStatus::Healthy
        } else if score >= warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }

    /// Lower-case name
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change between two health statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

impl StatusTransition {
    /// Returns a transition when `from != to`
    pub fn between(from: HealthStatus, to: HealthStatus) -> Option<Self> {
        (from != to).then_some(Self { from, to })
    }

    /// Status got worse
    pub fn is_degradation(&self) -> bool {
        self.to > self.from
    }
}
