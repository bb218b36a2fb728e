//! 消息投递指标收集模块
//!
//! 全局 `metrics` 记录函数 + 内存中的运行统计（供 CLI 输出摘要）。

use std::collections::BTreeMap;

use contracts::NackReason;
use metrics::{counter, gauge, histogram};

/// 记录 Dispatcher 从 Broker 拉取到一条消息
pub fn record_envelope_received(destination: &str, redelivery_count: u32) {
    counter!(
        "mailbus_envelopes_received_total",
        "destination" => destination.to_string()
    )
    .increment(1);

    if redelivery_count > 0 {
        counter!(
            "mailbus_envelopes_redelivered_total",
            "destination" => destination.to_string()
        )
        .increment(1);
    }
}

/// 记录消息的最终结算
///
/// `outcome`: `ack` / `drop` / nack 原因字符串 (`decode-error`, `no-handler`, ...)
pub fn record_settlement(destination: &str, outcome: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "mailbus_settlements_total",
        "destination" => destination.to_string(),
        "outcome" => outcome.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录一次 handler 调用（含重试）
pub fn record_handler_attempt(destination: &str, handler: &str, success: bool, latency_ms: f64) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "mailbus_handler_attempts_total",
        "destination" => destination.to_string(),
        "handler" => handler.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        "mailbus_handler_latency_ms",
        "destination" => destination.to_string()
    )
    .record(latency_ms);
}

/// 记录重试前的退避时长
pub fn record_retry_delay_ms(destination: &str, delay_ms: f64) {
    counter!(
        "mailbus_handler_retries_total",
        "destination" => destination.to_string()
    )
    .increment(1);

    histogram!(
        "mailbus_retry_delay_ms",
        "destination" => destination.to_string()
    )
    .record(delay_ms);
}

/// 记录 Publisher 发送结果
pub fn record_published(destination: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "mailbus_published_total",
        "destination" => destination.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录目的地当前在途消息数
pub fn record_in_flight(destination: &str, in_flight: usize) {
    gauge!(
        "mailbus_in_flight",
        "destination" => destination.to_string()
    )
    .set(in_flight as f64);
}

/// 投递统计聚合器
///
/// 在内存中聚合一次运行的投递结果，便于输出摘要。
#[derive(Debug, Clone, Default)]
pub struct DeliveryStatsAggregator {
    /// 发送成功数
    pub published: u64,

    /// 发送失败数
    pub publish_failures: u64,

    /// Ack 数（不含 drop）
    pub acked: u64,

    /// 无 handler 时 ack 丢弃的数量
    pub dropped: u64,

    /// 各 nack 原因计数
    pub nacked: BTreeMap<&'static str, u64>,

    /// handler 耗时统计 (ms)
    pub handler_latency: RunningStats,

    /// 发送到结算的端到端延迟 (ms)
    pub end_to_end_latency: RunningStats,
}

impl DeliveryStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish(&mut self, success: bool) {
        if success {
            self.published += 1;
        } else {
            self.publish_failures += 1;
        }
    }

    pub fn record_ack(&mut self) {
        self.acked += 1;
    }

    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    pub fn record_nack(&mut self, reason: NackReason) {
        *self.nacked.entry(reason.as_str()).or_insert(0) += 1;
    }

    pub fn record_handler_latency_ms(&mut self, latency_ms: f64) {
        self.handler_latency.push(latency_ms);
    }

    pub fn record_end_to_end_ms(&mut self, latency_ms: f64) {
        self.end_to_end_latency.push(latency_ms);
    }

    /// 已结算总数
    pub fn settled(&self) -> u64 {
        self.acked + self.dropped + self.nacked.values().sum::<u64>()
    }

    /// 生成摘要报告
    pub fn summary(&self) -> DeliverySummary {
        let settled = self.settled();
        let nacked: u64 = self.nacked.values().sum();
        DeliverySummary {
            published: self.published,
            publish_failures: self.publish_failures,
            settled,
            acked: self.acked,
            dropped: self.dropped,
            nacked,
            nack_rate: if settled > 0 {
                nacked as f64 / settled as f64 * 100.0
            } else {
                0.0
            },
            nack_reasons: self.nacked.clone(),
            handler_latency_ms: StatsSummary::from(&self.handler_latency),
            end_to_end_latency_ms: StatsSummary::from(&self.end_to_end_latency),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 投递摘要
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    pub published: u64,
    pub publish_failures: u64,
    pub settled: u64,
    pub acked: u64,
    pub dropped: u64,
    pub nacked: u64,
    pub nack_rate: f64,
    pub nack_reasons: BTreeMap<&'static str, u64>,
    pub handler_latency_ms: StatsSummary,
    pub end_to_end_latency_ms: StatsSummary,
}

impl std::fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Delivery Summary ===")?;
        writeln!(
            f,
            "Published: {} ({} failed)",
            self.published, self.publish_failures
        )?;
        writeln!(f, "Settled: {}", self.settled)?;
        writeln!(f, "  acked: {}", self.acked)?;
        writeln!(f, "  dropped: {}", self.dropped)?;
        writeln!(f, "  nacked: {} ({:.2}%)", self.nacked, self.nack_rate)?;
        for (reason, count) in &self.nack_reasons {
            writeln!(f, "    {}: {}", reason, count)?;
        }
        writeln!(f, "Handler latency (ms): {}", self.handler_latency_ms)?;
        writeln!(f, "End-to-end latency (ms): {}", self.end_to_end_latency_ms)?;
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
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
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

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
