//! Request counters for the enhancement service

use crate::error::EnhanceError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Coarse failure classification for counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Client,
    Model,
    Internal,
}

impl From<&EnhanceError> for FailureKind {
    fn from(error: &EnhanceError) -> Self {
        if error.is_client_error() {
            FailureKind::Client
        } else if matches!(error, EnhanceError::Model(_)) {
            FailureKind::Model
        } else {
            FailureKind::Internal
        }
    }
}

/// Process-wide counters, shared through `Arc`
#[derive(Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Failure breakdown
    pub client_errors: AtomicU64,
    pub model_errors: AtomicU64,

    // Degraded-but-successful paths
    pub face_fallbacks: AtomicU64,
    pub storage_fallbacks: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_success(&self, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: FailureKind, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        match kind {
            FailureKind::Client => self.client_errors.fetch_add(1, Ordering::Relaxed),
            FailureKind::Model => self.model_errors.fetch_add(1, Ordering::Relaxed),
            FailureKind::Internal => 0,
        };
    }

    pub fn record_face_fallback(&self) {
        self.face_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_fallback(&self) {
        self.storage_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            failures: FailureMetrics {
                client_errors: self.client_errors.load(Ordering::Relaxed),
                model_errors: self.model_errors.load(Ordering::Relaxed),
            },
            fallbacks: FallbackMetrics {
                face_restoration: self.face_fallbacks.load(Ordering::Relaxed),
                storage: self.storage_fallbacks.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub failures: FailureMetrics,
    pub fallbacks: FallbackMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureMetrics {
    pub client_errors: u64,
    pub model_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackMetrics {
    pub face_restoration: u64,
    pub storage: u64,
}

/// Timer for tracking request latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
