//! Periodic maintenance pass

use serde::Serialize;

/// What one maintenance pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_entries: usize,
    pub stale_validators: usize,
    pub dedup_records: usize,
    pub alert_hashes: usize,
    /// Credentials put back into rotation
    pub recovered: usize,
    /// Whether one error per credential was forgiven
    pub errors_decayed: bool,
}
