/// Metrics Module - Prometheus Instrumentation
///
/// Mirrors the teacher's lazy_static + Registry pattern, scoped down to
/// the reader/handler core's own counters and gauges.
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use lazy_static::lazy_static;
use std::time::Instant;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total blocks the reader has delivered to the handler (forward or
    /// rolled-back re-delivery both count).
    pub static ref BLOCKS_PROCESSED: IntCounter = IntCounter::new(
        "chain_ingest_blocks_processed_total",
        "Total blocks delivered by the reader"
    ).unwrap();

    /// Forks detected by hash-chain mismatch during the advance loop.
    pub static ref FORKS_DETECTED: IntCounter = IntCounter::new(
        "chain_ingest_forks_detected_total",
        "Total forks detected via hash-chain mismatch"
    ).unwrap();

    /// Forks successfully resolved by walk-back.
    pub static ref FORKS_RESOLVED: IntCounter = IntCounter::new(
        "chain_ingest_forks_resolved_total",
        "Total forks resolved by rolling back cached history"
    ).unwrap();

    /// Rollbacks issued to the persistence binder, by cause.
    /// Labels: cause (fork, cold_start_replay)
    pub static ref ROLLBACKS: IntCounterVec = IntCounterVec::new(
        Opts::new("chain_ingest_rollbacks_total", "Total rollback_to calls issued to the binder"),
        &["cause"]
    ).unwrap();

    /// Handler-version switches, mid-block.
    pub static ref VERSION_SWITCHES: IntCounter = IntCounter::new(
        "chain_ingest_version_switches_total",
        "Total handler-version switches requested by an updater"
    ).unwrap();

    /// seek_to calls issued by the driver in response to a handler request.
    pub static ref SEEK_REQUESTS: IntCounter = IntCounter::new(
        "chain_ingest_seek_requests_total",
        "Total seek_to calls issued by the driver"
    ).unwrap();

    /// Depth (in blocks) of the cached rolling history at any given time.
    pub static ref BLOCK_HISTORY_DEPTH: IntGauge = IntGauge::new(
        "chain_ingest_block_history_depth",
        "Current depth of the reader's cached rolling history"
    ).unwrap();

    /// How far behind the chain head the reader's cursor currently sits.
    pub static ref BLOCKS_BEHIND_HEAD: IntGauge = IntGauge::new(
        "chain_ingest_blocks_behind_head",
        "Blocks between the reader's current position and the chain head"
    ).unwrap();
}

/// Registers all metrics with the global registry. Call once at startup.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(BLOCKS_PROCESSED.clone()))?;
    REGISTRY.register(Box::new(FORKS_DETECTED.clone()))?;
    REGISTRY.register(Box::new(FORKS_RESOLVED.clone()))?;
    REGISTRY.register(Box::new(ROLLBACKS.clone()))?;
    REGISTRY.register(Box::new(VERSION_SWITCHES.clone()))?;
    REGISTRY.register(Box::new(SEEK_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(BLOCK_HISTORY_DEPTH.clone()))?;
    REGISTRY.register(Box::new(BLOCKS_BEHIND_HEAD.clone()))?;
    Ok(())
}

/// Gather metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

pub fn increment_blocks_processed() {
    BLOCKS_PROCESSED.inc();
}

pub fn increment_forks_detected() {
    FORKS_DETECTED.inc();
}

pub fn increment_forks_resolved() {
    FORKS_RESOLVED.inc();
}

pub fn increment_rollbacks(cause: &str) {
    ROLLBACKS.with_label_values(&[cause]).inc();
}

pub fn increment_version_switches() {
    VERSION_SWITCHES.inc();
}

pub fn increment_seek_requests() {
    SEEK_REQUESTS.inc();
}

pub fn set_block_history_depth(depth: i64) {
    BLOCK_HISTORY_DEPTH.set(depth);
}

pub fn set_blocks_behind_head(count: i64) {
    BLOCKS_BEHIND_HEAD.set(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_names() {
        init_metrics().unwrap();
        increment_blocks_processed();
        set_blocks_behind_head(42);

        let output = gather_metrics();
        assert!(output.contains("chain_ingest_blocks_processed_total"));
        assert!(output.contains("chain_ingest_blocks_behind_head"));
    }

    #[test]
    fn timer_measures_elapsed() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_secs() >= 0.005);
    }
}
