//! Simulation statistics.

use std::time::Duration;

use dispatcher::{DispatcherStatus, SubmitResult};
use observability::SubmissionAggregator;

/// Statistics from a simulation run
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    /// Submissions generated
    pub submitted: u64,

    /// Stopped by a signal or the timeout
    pub interrupted: bool,

    /// Total duration of the run
    pub duration: Duration,

    /// Calls that reached the mock API
    pub api_calls: usize,

    /// Per-submission outcomes
    pub outcomes: SubmissionAggregator,

    /// Dispatcher report taken before shutdown
    pub status: Option<DispatcherStatus>,
}

impl SimulationStats {
    pub fn record(&mut self, result: &SubmitResult, latency_ms: f64) {
        match result {
            Ok(served) => {
                self.outcomes
                    .record_served(served.source.as_str(), served.attempts, latency_ms)
            }
            Err(e) => self.outcomes.record_rejected(e.reason(), latency_ms),
        }
    }

    /// Completed submissions per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.outcomes.total as f64 / secs
        } else {
            0.0
        }
    }

    /// Submissions answered without an API call, in percent
    pub fn api_savings(&self) -> f64 {
        let total = self.outcomes.total;
        if total == 0 {
            return 0.0;
        }
        let saved = total.saturating_sub(self.api_calls as u64);
        saved as f64 / total as f64 * 100.0
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                   Simulation Statistics                      ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Submitted: {}", self.submitted);
        println!("   ├─ Completed: {}", self.outcomes.total);
        println!("   ├─ Throughput: {:.2}/s", self.throughput());
        println!("   ├─ API calls: {}", self.api_calls);
        println!("   ├─ Saved by cache/dedup: {:.1}%", self.api_savings());
        println!("   └─ Interrupted: {}", self.interrupted);

        println!("\n{}", self.outcomes.summary());

        let Some(status) = &self.status else {
            return;
        };

        let pool = &status.pool.aggregate;
        println!("🔑 Credential Pool");
        println!("   ├─ Status: {}", pool.status);
        println!("   ├─ Active: {}/{}", pool.active, pool.total);
        println!("   ├─ Average health: {:.1}", pool.average_health);
        println!(
            "   ├─ Quota remaining: {}/{}",
            pool.combined_remaining, pool.combined_limit
        );
        println!("   └─ {}", pool.recommendation.message());

        let queue = &status.queue;
        println!("\n📥 Dispatch Queue");
        println!("   ├─ Status: {}", queue.health.status);
        println!("   ├─ Success rate: {:.1}%", queue.health.success_rate);
        println!("   ├─ Retries: {}", queue.stats.total_retries);
        println!("   ├─ Peak length: {}", queue.stats.peak_queue_length);
        println!("   └─ Average wait: {:.1}ms", queue.stats.average_wait_ms);

        let cache = &status.cache;
        println!("\n🗄️  Response Cache");
        println!("   ├─ Hit rate: {:.1}% ({:?})", cache.hit_rate, status.cache_health.status);
        println!("   ├─ Entries: {}/{}", cache.size, cache.max_size);
        println!("   ├─ Deduplicated: {}", cache.deduplicated);
        println!("   ├─ Revalidated: {}", cache.revalidated);
        println!("   └─ Evictions: {}", cache.evictions);

        let notifier = &status.notifier;
        println!("\n🔔 Alerts");
        println!("   ├─ Sent: {}", notifier.sent);
        println!("   └─ Deduped: {}", notifier.deduped);
        for alert in status.recent_alerts.iter().take(5) {
            println!("      • [{}] {}", alert.severity, alert.title);
        }

        println!();
    }
}
