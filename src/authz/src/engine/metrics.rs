//! Decision metrics with Prometheus text export

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::decision::DecisionReason;

/// Engine metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of authorization requests
    pub total_requests: u64,

    pub allowed_decisions: u64,

    pub denied_decisions: u64,

    /// Denials keyed by reason kind
    pub denials_by_reason: BTreeMap<String, u64>,

    /// Allows granted through the lock-holder override
    pub lock_overrides: u64,

    /// Requests refused because the token was revoked
    pub revoked_rejections: u64,

    /// Latency percentiles (p50, p90, p95, p99, p99.9)
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub latency_p999_ms: f64,

    pub avg_latency_ms: f64,

    /// Infrastructure errors (store, audit sink)
    pub error_count: u64,
}

impl EngineMetrics {
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }

    pub fn denials(&self, kind: &str) -> u64 {
        self.denials_by_reason.get(kind).copied().unwrap_or(0)
    }
}

/// Metrics collector
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Recent latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    /// Record an authorization decision
    pub async fn record_decision(&self, reason: &DecisionReason) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;

        if reason.is_allow() {
            metrics.allowed_decisions += 1;
            if *reason == DecisionReason::LockHeldOverride {
                metrics.lock_overrides += 1;
            }
        } else {
            metrics.denied_decisions += 1;
            *metrics
                .denials_by_reason
                .entry(reason.kind().to_string())
                .or_insert(0) += 1;
        }
    }

    /// Record a request refused for a revoked token
    pub async fn record_revoked(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        metrics.revoked_rejections += 1;
    }

    /// Record request latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }

        let mut metrics = self.metrics.write().await;

        let sum: f64 = samples.iter().sum();
        metrics.avg_latency_ms = sum / samples.len() as f64;

        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);

        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p95_ms = Self::percentile(&sorted, 0.95);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
        metrics.latency_p999_ms = Self::percentile(&sorted, 0.999);
    }

    pub async fn record_error(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.error_count += 1;
    }

    /// Current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        let mut metrics = self.metrics.write().await;
        *metrics = EngineMetrics::default();

        let mut samples = self.latency_samples.write().await;
        samples.clear();
    }

    /// Export metrics in Prometheus text format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        let mut out = format!(
            r#"# HELP stategate_authz_requests_total Total number of authorization requests
# TYPE stategate_authz_requests_total counter
stategate_authz_requests_total {}

# HELP stategate_authz_allowed_total Number of allowed decisions
# TYPE stategate_authz_allowed_total counter
stategate_authz_allowed_total {}

# HELP stategate_authz_denied_total Number of denied decisions
# TYPE stategate_authz_denied_total counter
stategate_authz_denied_total {}

# HELP stategate_authz_lock_overrides_total Allows granted to lock holders outside scope
# TYPE stategate_authz_lock_overrides_total counter
stategate_authz_lock_overrides_total {}

# HELP stategate_authz_revoked_total Requests refused for revoked tokens
# TYPE stategate_authz_revoked_total counter
stategate_authz_revoked_total {}

# HELP stategate_authz_latency_seconds Request latency percentiles
# TYPE stategate_authz_latency_seconds summary
stategate_authz_latency_seconds{{quantile="0.5"}} {}
stategate_authz_latency_seconds{{quantile="0.9"}} {}
stategate_authz_latency_seconds{{quantile="0.95"}} {}
stategate_authz_latency_seconds{{quantile="0.99"}} {}
stategate_authz_latency_seconds{{quantile="0.999"}} {}

# HELP stategate_authz_errors_total Error count
# TYPE stategate_authz_errors_total counter
stategate_authz_errors_total {}

# HELP stategate_authz_denials_total Denied decisions by reason
# TYPE stategate_authz_denials_total counter
"#,
            metrics.total_requests,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.lock_overrides,
            metrics.revoked_rejections,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p95_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.latency_p999_ms / 1000.0,
            metrics.error_count,
        );

        for (reason, count) in &metrics.denials_by_reason {
            let _ = writeln!(out, "stategate_authz_denials_total{{reason=\"{}\"}} {}", reason, count);
        }

        out
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
