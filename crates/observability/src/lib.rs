use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Per-process turn counters. Every increment is mirrored to the `metrics`
/// facade so an installed exporter sees the same numbers.
#[derive(Debug, Default)]
pub struct AppMetrics {
    turns_total: AtomicU64,
    direct_routes_total: AtomicU64,
    verifications_total: AtomicU64,
    complex_routes_total: AtomicU64,
    fallback_total: AtomicU64,
    classifier_failures_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub turns_total: u64,
    pub direct_routes_total: u64,
    pub verifications_total: u64,
    pub complex_routes_total: u64,
    pub fallback_total: u64,
    pub classifier_failures_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_turn(&self) {
        self.turns_total.fetch_add(1, Ordering::Relaxed);
        counter!("concourse_turns_total").increment(1);
    }

    pub fn inc_direct_route(&self) {
        self.direct_routes_total.fetch_add(1, Ordering::Relaxed);
        counter!("concourse_direct_routes_total").increment(1);
    }

    pub fn inc_verification(&self) {
        self.verifications_total.fetch_add(1, Ordering::Relaxed);
        counter!("concourse_verifications_total").increment(1);
    }

    pub fn inc_complex_route(&self) {
        self.complex_routes_total.fetch_add(1, Ordering::Relaxed);
        counter!("concourse_complex_routes_total").increment(1);
    }

    pub fn inc_fallback(&self) {
        self.fallback_total.fetch_add(1, Ordering::Relaxed);
        counter!("concourse_fallback_total").increment(1);
    }

    pub fn inc_classifier_failure(&self) {
        self.classifier_failures_total
            .fetch_add(1, Ordering::Relaxed);
        counter!("concourse_classifier_failures_total").increment(1);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        histogram!("concourse_turn_latency_seconds").record(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let turns = self.turns_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            turns_total: turns,
            direct_routes_total: self.direct_routes_total.load(Ordering::Relaxed),
            verifications_total: self.verifications_total.load(Ordering::Relaxed),
            complex_routes_total: self.complex_routes_total.load(Ordering::Relaxed),
            fallback_total: self.fallback_total.load(Ordering::Relaxed),
            classifier_failures_total: self.classifier_failures_total.load(Ordering::Relaxed),
            avg_latency_millis: if turns == 0 {
                0.0
            } else {
                latency as f64 / turns as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,concourse_engine=info,concourse_handlers=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
