//! Observability and Metrics
//!
//! This module provides metrics collection for monitoring session negotiation,
//! batch throughput and long-poll behaviour.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Total sessions opened
    pub sessions_total: AtomicU64,
    /// Currently open sessions
    pub sessions_active: AtomicU64,
    /// Successful handshakes
    pub handshakes_success: AtomicU64,
    /// Batches rejected for carrying the wrong identity
    pub identity_rejections: AtomicU64,
    /// Messages rejected because no handshake occurred yet
    pub handshake_missing: AtomicU64,
    /// Inbound payloads dropped as malformed
    pub decode_errors: AtomicU64,
    /// Batches fanned out
    pub batches_dispatched: AtomicU64,
    /// Sub-requests handed to the dispatcher
    pub sub_requests_dispatched: AtomicU64,
    /// Aggregated messages emitted
    pub responses_emitted: AtomicU64,
    /// Completions refused because their slot was already filled
    pub duplicate_completions: AtomicU64,
    /// Receives parked on the rendezvous
    pub long_poll_parked: AtomicU64,
    /// Parked receives resumed with a payload
    pub long_poll_resumed: AtomicU64,
    /// Payloads that found no parked receive
    pub long_poll_busy: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            identity_rejections: AtomicU64::new(0),
            handshake_missing: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            batches_dispatched: AtomicU64::new(0),
            sub_requests_dispatched: AtomicU64::new(0),
            responses_emitted: AtomicU64::new(0),
            duplicate_completions: AtomicU64::new(0),
            long_poll_parked: AtomicU64::new(0),
            long_poll_resumed: AtomicU64::new(0),
            long_poll_busy: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn session_opened(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        // Saturate so a stray double close cannot wrap the gauge
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn identity_rejected(&self) {
        self.identity_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_missing(&self) {
        self.handshake_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch of `size` sub-requests
    pub fn batch_dispatched(&self, size: usize) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.sub_requests_dispatched
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn response_emitted(&self) {
        self.responses_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_completion(&self) {
        self.duplicate_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn long_poll_parked(&self) {
        self.long_poll_parked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn long_poll_resumed(&self) {
        self.long_poll_resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn long_poll_busy(&self) {
        self.long_poll_busy.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            identity_rejections: self.identity_rejections.load(Ordering::Relaxed),
            handshake_missing: self.handshake_missing.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            sub_requests_dispatched: self.sub_requests_dispatched.load(Ordering::Relaxed),
            responses_emitted: self.responses_emitted.load(Ordering::Relaxed),
            duplicate_completions: self.duplicate_completions.load(Ordering::Relaxed),
            long_poll_parked: self.long_poll_parked.load(Ordering::Relaxed),
            long_poll_resumed: self.long_poll_resumed.load(Ordering::Relaxed),
            long_poll_busy: self.long_poll_busy.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            sessions_total = snapshot.sessions_total,
            sessions_active = snapshot.sessions_active,
            handshakes_success = snapshot.handshakes_success,
            identity_rejections = snapshot.identity_rejections,
            handshake_missing = snapshot.handshake_missing,
            decode_errors = snapshot.decode_errors,
            batches_dispatched = snapshot.batches_dispatched,
            sub_requests_dispatched = snapshot.sub_requests_dispatched,
            responses_emitted = snapshot.responses_emitted,
            duplicate_completions = snapshot.duplicate_completions,
            long_poll_parked = snapshot.long_poll_parked,
            long_poll_resumed = snapshot.long_poll_resumed,
            long_poll_busy = snapshot.long_poll_busy,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub sessions_total: u64,
    pub sessions_active: u64,
    pub handshakes_success: u64,
    pub identity_rejections: u64,
    pub handshake_missing: u64,
    pub decode_errors: u64,
    pub batches_dispatched: u64,
    pub sub_requests_dispatched: u64,
    pub responses_emitted: u64,
    pub duplicate_completions: u64,
    pub long_poll_parked: u64,
    pub long_poll_resumed: u64,
    pub long_poll_busy: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance (lazy static for simplicity)
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_counts_sub_requests() {
        let metrics = Metrics::new();
        metrics.batch_dispatched(3);
        metrics.batch_dispatched(1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_dispatched, 2);
        assert_eq!(snapshot.sub_requests_dispatched, 4);
    }

    #[test]
    fn test_active_sessions_never_underflow() {
        let metrics = Metrics::new();
        metrics.session_opened();
        metrics.session_closed();
        metrics.session_closed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_total, 1);
        assert_eq!(snapshot.sessions_active, 0);
    }
}
