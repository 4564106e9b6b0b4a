//! MockTransport - in-process stand-in for a quota-limited remote API
//!
//! Every secret gets its own quota window. Responses carry rate-limit
//! headers and an ETag per endpoint version; a matching `if-none-match`
//! yields `304` without spending quota. Scripted answers take precedence
//! over the simulation.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{
    ApiResponse, QuotaSnapshot, RequestDescriptor, SecretHandle, Transport, TransportError,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Calls allowed per secret per window
    pub limit: u64,
    /// Window length
    pub window: Duration,
    /// Simulated network latency per call
    pub latency: Duration,
    /// Probability of a `503` answer, 0.0..=1.0
    pub failure_rate: f64,
    pub seed: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            limit: 5000,
            window: Duration::from_secs(3600),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            seed: 42,
        }
    }
}

/// Canned answer returned instead of the simulation
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(ApiResponse),
    Fail(TransportError),
}

/// One observed call
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub at: Instant,
    /// Masked secret of the credential used
    pub credential: String,
    pub request: RequestDescriptor,
}

struct Window {
    remaining: u64,
    reset_at: DateTime<Utc>,
}

struct MockState {
    windows: HashMap<String, Window>,
    versions: HashMap<String, u64>,
    scripted: VecDeque<Scripted>,
    calls: Vec<CallRecord>,
    rng: StdRng,
}

pub struct MockTransport {
    config: MockConfig,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new(config: MockConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            state: Mutex::new(MockState {
                windows: HashMap::new(),
                versions: HashMap::new(),
                scripted: VecDeque::new(),
                calls: Vec::new(),
                rng,
            }),
        }
    }

    /// Queue canned answers, consumed one per call in order
    pub fn script(&self, answers: impl IntoIterator<Item = Scripted>) {
        self.state.lock().scripted.extend(answers);
    }

    /// Change the representation behind `endpoint`, invalidating its ETag
    pub fn touch(&self, endpoint: &str) {
        *self
            .state
            .lock()
            .versions
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
    }

    /// Set the remaining quota of one secret
    pub fn set_remaining(&self, secret: &SecretHandle, remaining: u64) {
        let mut state = self.state.lock();
        let window = window_for(&mut state.windows, secret, &self.config, Utc::now());
        window.remaining = remaining.min(self.config.limit);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    fn answer(&self, secret: &SecretHandle, request: &RequestDescriptor) -> Result<ApiResponse, TransportError> {
        let now = Utc::now();
        let mut state = self.state.lock();
        state.calls.push(CallRecord {
            at: Instant::now(),
            credential: secret.hint(),
            request: request.clone(),
        });

        if let Some(scripted) = state.scripted.pop_front() {
            return match scripted {
                Scripted::Respond(response) => Ok(response),
                Scripted::Fail(err) => Err(err),
            };
        }

        let failure_rate = self.config.failure_rate.clamp(0.0, 1.0);
        if failure_rate > 0.0 && state.rng.random_bool(failure_rate) {
            return Ok(ApiResponse::new(503, "service unavailable"));
        }

        let version = state.versions.get(&request.endpoint).copied().unwrap_or(0);
        let etag = format!("\"{}:v{}\"", request.endpoint, version);
        let limit = self.config.limit;
        let window = window_for(&mut state.windows, secret, &self.config, now);

        if window.remaining == 0 {
            let quota = QuotaSnapshot {
                remaining: 0,
                limit,
                reset_at: Some(window.reset_at),
            };
            return Ok(ApiResponse::new(403, "API rate limit exceeded").with_quota(quota));
        }

        // conditional hits are free
        if request.header("if-none-match") == Some(etag.as_str()) {
            let quota = QuotaSnapshot {
                remaining: window.remaining,
                limit,
                reset_at: Some(window.reset_at),
            };
            return Ok(ApiResponse::not_modified()
                .with_header("etag", etag)
                .with_quota(quota));
        }

        window.remaining -= 1;
        let quota = QuotaSnapshot {
            remaining: window.remaining,
            limit,
            reset_at: Some(window.reset_at),
        };
        let body = json!({
            "endpoint": request.endpoint,
            "params": request.params,
            "version": version,
        });
        Ok(ApiResponse::ok(body.to_string())
            .with_header("content-type", "application/json")
            .with_header("etag", etag)
            .with_quota(quota))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

fn window_for<'a>(
    windows: &'a mut HashMap<String, Window>,
    secret: &SecretHandle,
    config: &MockConfig,
    now: DateTime<Utc>,
) -> &'a mut Window {
    let span = chrono::Duration::from_std(config.window).unwrap_or(chrono::Duration::hours(1));
    let window = windows
        .entry(secret.expose().to_string())
        .or_insert_with(|| Window {
            remaining: config.limit,
            reset_at: now + span,
        });
    if now >= window.reset_at {
        window.remaining = config.limit;
        window.reset_at = now + span;
    }
    window
}

impl Transport for MockTransport {
    #[instrument(
        name = "mock_transport_execute",
        skip(self, secret, request),
        fields(method = %request.method, endpoint = %request.endpoint)
    )]
    async fn execute(
        &self,
        secret: &SecretHandle,
        request: &RequestDescriptor,
    ) -> Result<ApiResponse, TransportError> {
        if !self.config.latency.is_zero() {
            sleep(self.config.latency).await;
        }
        let result = self.answer(secret, request);
        match &result {
            Ok(response) => debug!(status = response.status, "Mock answered"),
            Err(e) => debug!(error = %e, "Mock failed"),
        }
        result
    }
}
