//! Simulation driver - feeds a workload through the dispatcher.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::DispatchBlueprint;
use dispatcher::{DispatcherBuilder, MockConfig, MockTransport};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{SimulationStats, Workload};

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Dispatcher configuration with resolved secrets
    pub blueprint: DispatchBlueprint,

    /// Submissions to generate (None = until stopped)
    pub requests: Option<u64>,

    /// Submissions per second
    pub rate: f64,

    pub endpoints: usize,
    pub post_ratio: f64,
    pub seed: u64,

    /// Mock API behaviour
    pub mock: MockConfig,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,
}

/// Runs a workload against a dispatcher backed by the mock API
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run until the workload is exhausted, the timeout fires or `shutdown` resolves
    ///
    /// On interruption queued submissions are cancelled; in-flight ones
    /// still complete.
    pub async fn run<S>(self, shutdown: S) -> Result<SimulationStats>
    where
        S: Future<Output = ()>,
    {
        let config = self.config;
        let started = Instant::now();

        let transport = MockTransport::new(config.mock.clone());
        let dispatcher = Arc::new(
            DispatcherBuilder::new(config.blueprint, transport)
                .build()
                .await
                .context("Failed to build dispatcher")?,
        );

        let mut workload = Workload::new(config.seed, config.endpoints, config.post_ratio);
        let period = Duration::from_secs_f64(1.0 / config.rate.max(0.001));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let deadline = async {
            match config.timeout {
                Some(timeout) => sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(shutdown);
        tokio::pin!(deadline);

        info!(
            requests = ?config.requests,
            rate = config.rate,
            endpoints = config.endpoints,
            "Simulation running"
        );

        let mut stats = SimulationStats::default();
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping simulation...");
                    stats.interrupted = true;
                    break;
                }
                _ = &mut deadline => {
                    warn!("Simulation timed out");
                    stats.interrupted = true;
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok((result, latency_ms)) => stats.record(&result, latency_ms),
                        Err(e) => warn!(error = %e, "Submission task failed"),
                    }
                }
                _ = ticker.tick() => {
                    if config.requests.is_some_and(|max| workload.generated() >= max) {
                        break;
                    }
                    let (request, priority) = workload.next_request();
                    let dispatcher = Arc::clone(&dispatcher);
                    in_flight.spawn(async move {
                        let submitted = Instant::now();
                        let result = dispatcher.submit(request, priority).await;
                        (result, submitted.elapsed().as_secs_f64() * 1000.0)
                    });
                }
            }
        }

        if stats.interrupted {
            let cancelled = dispatcher.clear();
            debug!(cancelled, "Queued submissions cancelled");
        }
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((result, latency_ms)) => stats.record(&result, latency_ms),
                Err(e) => warn!(error = %e, "Submission task failed"),
            }
        }

        stats.submitted = workload.generated();
        stats.api_calls = dispatcher.transport().call_count();
        stats.status = Some(dispatcher.status());
        dispatcher.shutdown().await;
        stats.duration = started.elapsed();

        info!(
            submitted = stats.submitted,
            completed = stats.outcomes.total,
            api_calls = stats.api_calls,
            duration_secs = stats.duration.as_secs_f64(),
            "Simulation complete"
        );
        Ok(stats)
    }
}
