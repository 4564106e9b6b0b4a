//! Dispatcher 指标收集模块
//!
//! 记录缓存、队列、凭据池与告警的运行指标，并在内存中聚合提交结果。

use std::collections::HashMap;

use contracts::{AlertSeverity, HealthStatus, Priority};
use metrics::{counter, gauge, histogram};

/// 记录缓存查询结果
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("quota_dispatch_cache_lookups_total", "result" => result).increment(1);
}

/// 记录被去重窗口拦截的请求
pub fn record_dedup_rejected() {
    counter!("quota_dispatch_dedup_rejected_total").increment(1);
}

/// 记录 LRU 淘汰
pub fn record_cache_eviction() {
    counter!("quota_dispatch_cache_evictions_total").increment(1);
}

/// 记录缓存条目数
pub fn record_cache_size(size: usize) {
    gauge!("quota_dispatch_cache_entries").set(size as f64);
}

/// 记录提交结果 (served / duplicate / queue_full / ...)
pub fn record_submission(outcome: &str) {
    counter!(
        "quota_dispatch_submissions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次执行尝试；第二次及以后计为重试
pub fn record_dispatch_attempt(priority: Priority, attempt: u32) {
    counter!(
        "quota_dispatch_attempts_total",
        "priority" => priority.as_str()
    )
    .increment(1);

    if attempt > 1 {
        counter!(
            "quota_dispatch_retries_total",
            "priority" => priority.as_str()
        )
        .increment(1);
    }
}

/// 记录排队等待时间 (入队 -> 开始处理)
pub fn record_queue_wait_ms(priority: Priority, wait_ms: f64) {
    histogram!(
        "quota_dispatch_queue_wait_ms",
        "priority" => priority.as_str()
    )
    .record(wait_ms);
}

/// 记录各优先级队列深度
pub fn record_lane_depth(priority: Priority, depth: usize) {
    gauge!(
        "quota_dispatch_lane_depth",
        "priority" => priority.as_str()
    )
    .set(depth as f64);
}

/// 记录并发执行数
pub fn record_active_requests(active: usize) {
    gauge!("quota_dispatch_active_requests").set(active as f64);
}

/// 记录单个凭据健康度
pub fn record_credential_health(label: &str, health: f64, active: bool) {
    gauge!(
        "quota_dispatch_credential_health",
        "credential" => label.to_string()
    )
    .set(health);
    gauge!(
        "quota_dispatch_credential_active",
        "credential" => label.to_string()
    )
    .set(if active { 1.0 } else { 0.0 });
}

/// 记录凭据池整体状态
pub fn record_pool_status(status: HealthStatus, average_health: f64) {
    gauge!("quota_dispatch_pool_average_health").set(average_health);
    let level = match status {
        HealthStatus::Healthy => 0.0,
        HealthStatus::Warning => 1.0,
        HealthStatus::Critical => 2.0,
    };
    gauge!("quota_dispatch_pool_status").set(level);
}

/// 记录告警 (发送或去重)
pub fn record_alert(severity: AlertSeverity, deduped: bool) {
    let result = if deduped { "deduped" } else { "sent" };
    counter!(
        "quota_dispatch_alerts_total",
        "severity" => severity.as_str(),
        "result" => result
    )
    .increment(1);
}

/// 记录告警通道投递结果
pub fn record_channel_delivery(channel: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "quota_dispatch_channel_deliveries_total",
        "channel" => channel.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录端到端延迟 (提交 -> 结果)
pub fn record_request_latency_ms(source: &str, latency_ms: f64) {
    histogram!(
        "quota_dispatch_request_latency_ms",
        "source" => source.to_string()
    )
    .record(latency_ms);
}

/// 提交结果聚合器
///
/// 在内存中聚合每次提交的结果，便于运行结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct SubmissionAggregator {
    /// 总提交数
    pub total: u64,

    /// 成功返回数
    pub served: u64,

    /// 按来源统计 (network / cache / revalidated)
    pub by_source: HashMap<String, u64>,

    /// 按失败原因统计
    pub by_reason: HashMap<String, u64>,

    /// 端到端延迟统计
    pub latency_stats: RunningStats,

    /// 执行次数统计 (仅网络请求)
    pub attempt_stats: RunningStats,
}

impl SubmissionAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录成功提交
    pub fn record_served(&mut self, source: &str, attempts: u32, latency_ms: f64) {
        self.total += 1;
        self.served += 1;
        *self.by_source.entry(source.to_string()).or_insert(0) += 1;
        self.latency_stats.push(latency_ms);
        if attempts > 0 {
            self.attempt_stats.push(f64::from(attempts));
        }
    }

    /// 记录失败提交
    pub fn record_rejected(&mut self, reason: &str, latency_ms: f64) {
        self.total += 1;
        *self.by_reason.entry(reason.to_string()).or_insert(0) += 1;
        self.latency_stats.push(latency_ms);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> DispatchSummary {
        DispatchSummary {
            total: self.total,
            served: self.served,
            success_rate: if self.total > 0 {
                self.served as f64 / self.total as f64 * 100.0
            } else {
                0.0
            },
            by_source: self.by_source.clone(),
            by_reason: self.by_reason.clone(),
            latency_ms: StatsSummary::from(&self.latency_stats),
            attempts: StatsSummary::from(&self.attempt_stats),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 提交摘要
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub total: u64,
    pub served: u64,
    pub success_rate: f64,
    pub by_source: HashMap<String, u64>,
    pub by_reason: HashMap<String, u64>,
    pub latency_ms: StatsSummary,
    pub attempts: StatsSummary,
}

impl std::fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(f, "Total submissions: {}", self.total)?;
        writeln!(f, "Served: {} ({:.2}%)", self.served, self.success_rate)?;
        writeln!(f, "Latency (ms): {}", self.latency_ms)?;
        writeln!(f, "Attempts per network call: {}", self.attempts)?;

        if !self.by_source.is_empty() {
            writeln!(f, "Served by source:")?;
            let mut sources: Vec<_> = self.by_source.iter().collect();
            sources.sort();
            for (source, count) in sources {
                writeln!(f, "  {}: {}", source, count)?;
            }
        }

        if !self.by_reason.is_empty() {
            writeln!(f, "Rejected by reason:")?;
            let mut reasons: Vec<_> = self.by_reason.iter().collect();
            reasons.sort();
            for (reason, count) in reasons {
                writeln!(f, "  {}: {}", reason, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
