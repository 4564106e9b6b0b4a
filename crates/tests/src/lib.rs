//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 经由 Dispatcher 门面的端到端场景 (MockTransport，无需真实 API)
//! - 各组件的关键性质：公平性、去重、缓存 TTL、LRU、退避上限、凭证选择、告警去重

#[cfg(test)]
mod support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use contracts::{
        AlertMessage, ContractError, CredentialConfig, DispatchBlueprint, NotificationChannel,
        NotificationSettings,
    };
    use dispatcher::{Dispatcher, DispatcherBuilder, MockConfig, MockTransport};
    use notifier::NotifierBuilder;

    /// Channel that only counts deliveries
    pub struct CountingChannel {
        pub sends: Arc<AtomicUsize>,
    }

    impl NotificationChannel for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&mut self, _message: &AlertMessage) -> Result<(), ContractError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    pub fn blueprint(credentials: &[&str]) -> DispatchBlueprint {
        let mut bp = DispatchBlueprint {
            credentials: credentials
                .iter()
                .map(|label| CredentialConfig::inline(*label, format!("secret-{label}")))
                .collect(),
            ..DispatchBlueprint::default()
        };
        bp.queue.base_backoff_ms = 100;
        bp.queue.max_backoff_ms = 250;
        bp
    }

    pub async fn dispatcher(
        blueprint: DispatchBlueprint,
        mock: MockConfig,
    ) -> (Dispatcher<MockTransport>, Arc<AtomicUsize>) {
        let sends = Arc::new(AtomicUsize::new(0));
        let notifier = NotifierBuilder::new(NotificationSettings::default())
            .with_channel(
                CountingChannel {
                    sends: Arc::clone(&sends),
                },
                16,
            )
            .build()
            .await
            .unwrap();
        let dispatcher = DispatcherBuilder::new(blueprint, MockTransport::new(mock))
            .with_notifier(notifier)
            .build()
            .await
            .unwrap();
        (dispatcher, sends)
    }
}

#[cfg(test)]
mod fairness_tests {
    use std::sync::Arc;

    use contracts::{Priority, RequestDescriptor};
    use dispatch_queue::DispatchQueue;
    use dispatcher::MockConfig;

    use crate::support;

    #[tokio::test]
    async fn test_critical_overtakes_waiting_low() {
        let mut bp = support::blueprint(&["a"]);
        bp.queue.max_concurrent = 1;
        let (dispatcher, _) = support::dispatcher(bp, MockConfig::default()).await;
        let dispatcher = Arc::new(dispatcher);
        dispatcher.pause();

        let mut waiting = Vec::new();
        for (endpoint, priority) in [("/low", Priority::Low), ("/critical", Priority::Critical)] {
            let submitter = Arc::clone(&dispatcher);
            waiting.push(tokio::spawn(async move {
                submitter
                    .submit(RequestDescriptor::get(endpoint), priority)
                    .await
            }));
            while dispatcher.queue_status().lanes.total < waiting.len() {
                tokio::task::yield_now().await;
            }
        }

        dispatcher.resume();
        for handle in waiting {
            handle.await.unwrap().unwrap();
        }

        let calls = dispatcher.transport().calls();
        assert_eq!(calls[0].request.endpoint, "/critical");
        assert_eq!(calls[1].request.endpoint, "/low");
        dispatcher.shutdown().await;
    }

    #[test]
    fn test_lane_order_is_strict() {
        let queue = DispatchQueue::new(contracts::QueueSettings {
            max_concurrent: 10,
            ..Default::default()
        });
        queue.enqueue("low-1", Priority::Low).unwrap();
        queue.enqueue("normal", Priority::Normal).unwrap();
        queue.enqueue("low-2", Priority::Low).unwrap();
        queue.enqueue("critical", Priority::Critical).unwrap();
        queue.enqueue("high", Priority::High).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue())
            .map(|active| *active.payload())
            .collect();
        assert_eq!(order, ["critical", "high", "normal", "low-1", "low-2"]);
    }
}

#[cfg(test)]
mod dedup_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{Priority, RequestDescriptor};
    use dispatcher::{MockConfig, ResponseSource, SubmitError};

    use crate::support;

    #[tokio::test(start_paused = true)]
    async fn test_identical_requests_inside_window_execute_once() {
        let (dispatcher, _) = support::dispatcher(support::blueprint(&["a"]), MockConfig::default()).await;
        let request = RequestDescriptor::post("/graphql").with_param("query", "viewer");

        dispatcher.submit(request.clone(), Priority::Normal).await.unwrap();
        tokio::time::advance(Duration::from_millis(4999)).await;
        let err = dispatcher.submit(request, Priority::Normal).await.unwrap_err();

        assert_eq!(err, SubmitError::Duplicate);
        assert_eq!(dispatcher.transport().call_count(), 1);
        assert_eq!(dispatcher.cache_stats().deduplicated, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_requests_after_window_execute_twice() {
        let (dispatcher, _) = support::dispatcher(support::blueprint(&["a"]), MockConfig::default()).await;
        let request = RequestDescriptor::post("/graphql").with_param("query", "viewer");

        dispatcher.submit(request.clone(), Priority::Normal).await.unwrap();
        tokio::time::advance(Duration::from_millis(5001)).await;
        dispatcher.submit(request, Priority::Normal).await.unwrap();

        assert_eq!(dispatcher.transport().call_count(), 2);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_submits_reach_network_once() {
        let mock = MockConfig {
            latency: Duration::from_millis(50),
            ..MockConfig::default()
        };
        let (dispatcher, _) = support::dispatcher(support::blueprint(&["a"]), mock).await;
        let request = RequestDescriptor::get("/users/octocat");

        let (a, b) = tokio::join!(
            dispatcher.submit(request.clone(), Priority::Normal),
            dispatcher.submit(request, Priority::Normal),
        );

        let mut outcomes = [a, b];
        outcomes.sort_by_key(|result| result.is_err());
        let [served, rejected] = outcomes;
        assert_eq!(served.unwrap().source, ResponseSource::Network);
        assert_eq!(rejected.unwrap_err(), SubmitError::Duplicate);
        assert_eq!(dispatcher.transport().call_count(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_surfaces_and_retry_proceeds() {
        let mut bp = support::blueprint(&["a"]);
        bp.queue.max_queue_length = 1;
        let (dispatcher, _) = support::dispatcher(bp, MockConfig::default()).await;
        let dispatcher = Arc::new(dispatcher);
        dispatcher.pause();

        let held = {
            let submitter = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                submitter
                    .submit(RequestDescriptor::post("/first"), Priority::Low)
                    .await
            })
        };
        while dispatcher.queue_status().lanes.total == 0 {
            tokio::task::yield_now().await;
        }

        let request = RequestDescriptor::post("/second").with_param("n", "2");
        let err = dispatcher
            .submit(request.clone(), Priority::Critical)
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::QueueFull { capacity: 1 });

        dispatcher.resume();
        held.await.unwrap().unwrap();
        let served = dispatcher.submit(request, Priority::Critical).await.unwrap();
        assert_eq!(served.source, ResponseSource::Network);
        assert_eq!(dispatcher.transport().call_count(), 2);
        dispatcher.shutdown().await;
    }
}

#[cfg(test)]
mod cache_tests {
    use std::time::Duration;

    use contracts::{ApiResponse, CacheSettings, Priority, RequestDescriptor};
    use dispatcher::{MockConfig, ResponseSource};
    use response_cache::{CacheLookup, Fingerprint, ResponseCache};

    use crate::support;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary_through_dispatcher() {
        let mut bp = support::blueprint(&["a"]);
        bp.cache.ttl_ms = 10_000;
        let (dispatcher, _) = support::dispatcher(bp, MockConfig::default()).await;
        let request = RequestDescriptor::get("/users/octocat");

        dispatcher.submit(request.clone(), Priority::Normal).await.unwrap();

        tokio::time::advance(Duration::from_millis(9_999)).await;
        let hit = dispatcher.submit(request.clone(), Priority::Normal).await.unwrap();
        assert_eq!(hit.source, ResponseSource::Cache);
        assert_eq!(dispatcher.transport().call_count(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        let after = dispatcher.submit(request, Priority::Normal).await.unwrap();
        assert_ne!(after.source, ResponseSource::Cache);
        assert_eq!(dispatcher.transport().call_count(), 2);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_evicts_least_recently_accessed() {
        let cache = ResponseCache::new(CacheSettings {
            max_size: 3,
            ..CacheSettings::default()
        });
        let requests: Vec<_> = ["/a", "/b", "/c", "/d"]
            .into_iter()
            .map(RequestDescriptor::get)
            .collect();

        for request in &requests[..3] {
            assert!(cache.insert(request, ApiResponse::ok("{}"), None, None).is_none());
        }
        // touch the oldest insertion so "/b" becomes least recently accessed
        assert!(cache.get(&requests[0]).is_hit());

        let evicted = cache.insert(&requests[3], ApiResponse::ok("{}"), None, None);
        assert_eq!(evicted, Some(Fingerprint::of(&requests[1])));
        assert!(matches!(cache.get(&requests[1]), CacheLookup::Miss { .. }));
        assert!(cache.get(&requests[0]).is_hit());
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
    }
}

#[cfg(test)]
mod backoff_tests {
    use std::time::Duration;

    use contracts::{BackoffPolicy, Priority, RequestDescriptor};
    use dispatcher::{MockConfig, SubmitError};

    use crate::support;

    #[test]
    fn test_delay_formula() {
        let policy = BackoffPolicy::from_millis(1000, 30_000, 3);
        let expected = [1000, 2000, 4000, 8000, 16_000, 30_000, 30_000];
        for (k, ms) in expected.into_iter().enumerate() {
            assert_eq!(policy.delay_for(k as u32 + 1), Duration::from_millis(ms));
        }
        assert_eq!(policy.max_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_and_spacing_through_dispatcher() {
        let mock = MockConfig {
            failure_rate: 1.0,
            ..MockConfig::default()
        };
        let (dispatcher, _) = support::dispatcher(support::blueprint(&["a", "b"]), mock).await;

        let err = dispatcher
            .submit(RequestDescriptor::get("/flaky"), Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::RetriesExhausted { attempts: 4, .. }));

        let calls = dispatcher.transport().calls();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<_> = calls
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect();
        assert_eq!(
            gaps,
            [
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250)
            ]
        );
        dispatcher.shutdown().await;
    }
}

#[cfg(test)]
mod credential_tests {
    use contracts::{
        Priority, PoolSettings, QuotaSnapshot, RequestDescriptor, SecretHandle, TransportErrorKind,
    };
    use credential_pool::{CredentialId, CredentialPool, PoolError};
    use dispatcher::MockConfig;

    use crate::support;

    fn quota(remaining: u64) -> QuotaSnapshot {
        QuotaSnapshot {
            remaining,
            limit: 100,
            reset_at: None,
        }
    }

    fn pool() -> CredentialPool {
        let pool = CredentialPool::new(
            ["c80", "c40", "c0"]
                .into_iter()
                .map(|label| (label, SecretHandle::new(label), 100)),
            PoolSettings::default(),
        );
        pool.update_usage(CredentialId::new(0), quota(80)).unwrap();
        pool.update_usage(CredentialId::new(1), quota(40)).unwrap();
        pool.update_usage(CredentialId::new(2), quota(0)).unwrap();
        pool.record_error(CredentialId::new(2), TransportErrorKind::QuotaExceeded)
            .unwrap();
        pool
    }

    #[test]
    fn test_selection_follows_health() {
        let pool = pool();
        for _ in 0..5 {
            assert_eq!(pool.select().unwrap().label, "c80");
        }

        pool.record_error(CredentialId::new(0), TransportErrorKind::QuotaExceeded)
            .unwrap();
        assert_eq!(pool.select().unwrap().label, "c40");

        pool.record_error(CredentialId::new(1), TransportErrorKind::QuotaExceeded)
            .unwrap();
        assert_eq!(
            pool.select().unwrap_err(),
            PoolError::NoHealthyCredential { total: 3 }
        );
    }

    #[test]
    fn test_low_health_is_not_selectable() {
        let pool = pool();
        pool.update_usage(CredentialId::new(0), quota(10)).unwrap();
        pool.update_usage(CredentialId::new(1), quota(5)).unwrap();
        assert!(matches!(
            pool.select(),
            Err(PoolError::NoHealthyCredential { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_fails_over_and_alerts() {
        let (dispatcher, sends) = support::dispatcher(support::blueprint(&["primary", "backup"]), MockConfig::default()).await;
        dispatcher
            .transport()
            .set_remaining(&SecretHandle::new("secret-primary"), 0);

        let served = dispatcher
            .submit(RequestDescriptor::get("/rate_limit"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(served.credential.as_deref(), Some("backup"));
        assert_eq!(served.attempts, 2);

        dispatcher.shutdown().await;
        let alerts = dispatcher.alert_history(10);
        assert!(alerts
            .iter()
            .any(|a| a.severity == contracts::AlertSeverity::Error
                && a.payload["credential"] == "primary"));
        assert!(sends.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }
}

#[cfg(test)]
mod notification_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{AlertSeverity, NotificationSettings};
    use notifier::NotifierBuilder;
    use serde_json::json;

    use crate::support::CountingChannel;

    #[tokio::test(start_paused = true)]
    async fn test_same_alert_inside_window_sent_once() {
        let sends = Arc::new(AtomicUsize::new(0));
        let notifier = NotifierBuilder::new(NotificationSettings::default())
            .with_channel(
                CountingChannel {
                    sends: Arc::clone(&sends),
                },
                8,
            )
            .build()
            .await
            .unwrap();
        let data = json!({ "credential": "primary", "health": 5.0 });

        assert!(!notifier.notify(AlertSeverity::Critical, data.clone()).await.is_deduped());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(notifier.notify(AlertSeverity::Critical, data.clone()).await.is_deduped());
        assert_eq!(sends.load(Ordering::SeqCst), 1);

        // different class, different hash
        assert!(!notifier.notify(AlertSeverity::Warning, data.clone()).await.is_deduped());

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(!notifier.notify(AlertSeverity::Critical, data).await.is_deduped());
        assert_eq!(sends.load(Ordering::SeqCst), 3);
        notifier.shutdown().await;
    }
}

#[cfg(test)]
mod config_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{Priority, RequestDescriptor};
    use dispatcher::{DispatcherBuilder, MockTransport, ResponseSource};

    const CONFIG: &str = r#"
[[credentials]]
id = "primary"
secret_env = "QD_TEST_PRIMARY"

[queue]
max_concurrent = 2

[cache]
ttl_ms = 60000
"#;

    #[tokio::test]
    async fn test_config_to_running_dispatcher() {
        let blueprint = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        let blueprint = ConfigLoader::resolve_secrets_with(blueprint, |_| Some("ghp_test".into())).unwrap();

        let dispatcher = DispatcherBuilder::new(blueprint, MockTransport::default())
            .build()
            .await
            .unwrap();
        let request = RequestDescriptor::get("/meta");
        let first = dispatcher.submit(request.clone(), Priority::High).await.unwrap();
        let second = dispatcher.submit(request, Priority::High).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(second.source, ResponseSource::Cache);

        let status = dispatcher.status();
        assert_eq!(status.pool.aggregate.total, 1);
        assert_eq!(status.queue.max_concurrent, 2);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_unresolved_secret_fails_build() {
        let blueprint = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        let result = DispatcherBuilder::new(blueprint, MockTransport::default())
            .build()
            .await;
        assert!(matches!(
            result,
            Err(dispatcher::DispatcherError::Pool(
                credential_pool::PoolError::MissingSecret { .. }
            ))
        ));
    }
}
