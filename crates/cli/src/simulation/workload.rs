//! Deterministic request generator.

use contracts::{Priority, RequestDescriptor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seeded stream of `(request, priority)` pairs
///
/// GET requests cycle over a fixed endpoint set so the cache and the
/// dedup window see repeats; POST requests carry a unique body id.
pub struct Workload {
    rng: StdRng,
    endpoints: usize,
    post_ratio: f64,
    generated: u64,
}

impl Workload {
    pub fn new(seed: u64, endpoints: usize, post_ratio: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            endpoints: endpoints.max(1),
            post_ratio: post_ratio.clamp(0.0, 1.0),
            generated: 0,
        }
    }

    pub fn next_request(&mut self) -> (RequestDescriptor, Priority) {
        self.generated += 1;
        let priority = match self.rng.random_range(0..10) {
            0 => Priority::Critical,
            1 | 2 => Priority::High,
            3..=7 => Priority::Normal,
            _ => Priority::Low,
        };

        let request = if self.post_ratio > 0.0 && self.rng.random_bool(self.post_ratio) {
            RequestDescriptor::post("/graphql").with_param("query_id", self.generated.to_string())
        } else {
            let endpoint = self.rng.random_range(0..self.endpoints);
            RequestDescriptor::get(format!("/repos/demo/project-{endpoint}"))
        };
        (request, priority)
    }

    pub fn generated(&self) -> u64 {
        self.generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = Workload::new(7, 5, 0.2);
        let mut b = Workload::new(7, 5, 0.2);
        for _ in 0..50 {
            assert_eq!(a.next_request(), b.next_request());
        }
        assert_eq!(a.generated(), 50);
    }

    #[test]
    fn test_endpoint_bounds() {
        let mut workload = Workload::new(1, 3, 0.0);
        for _ in 0..100 {
            let (request, _) = workload.next_request();
            assert!(request.is_cacheable());
            let suffix = request.endpoint.trim_start_matches("/repos/demo/project-");
            assert!(suffix.parse::<usize>().unwrap() < 3);
        }
    }

    #[test]
    fn test_post_only() {
        let mut workload = Workload::new(1, 3, 1.0);
        let (first, _) = workload.next_request();
        let (second, _) = workload.next_request();
        assert!(!first.is_cacheable());
        assert_ne!(first, second);
    }
}
