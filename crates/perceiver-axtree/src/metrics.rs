//! Perceiver counters.
//!
//! Lightweight counters + latency aggregates so callers can surface basic
//! fetch/merge statistics without an external metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static FETCH_TOTAL: AtomicU64 = AtomicU64::new(0);
static FETCH_LAT_NS: AtomicU64 = AtomicU64::new(0);
static FETCH_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);
static AX_FRAME_FAILURES: AtomicU64 = AtomicU64::new(0);

static MERGE_TOTAL: AtomicU64 = AtomicU64::new(0);
static MERGE_NODES: AtomicU64 = AtomicU64::new(0);
static MERGE_LAT_NS: AtomicU64 = AtomicU64::new(0);
static MERGE_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static REFS_RESET_TOTAL: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricCounter {
    pub total: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSnapshot {
    pub fetch: MetricCounter,
    pub ax_frame_failures: u64,
    pub merge: MetricCounter,
    pub merged_nodes: u64,
    pub refs_resets: u64,
}

pub fn record_fetch(ax_failures: usize, duration: Duration) {
    FETCH_TOTAL.fetch_add(1, Ordering::Relaxed);
    AX_FRAME_FAILURES.fetch_add(ax_failures as u64, Ordering::Relaxed);
    record_latency(&FETCH_LAT_NS, &FETCH_LAT_SAMPLES, duration);
}

pub fn record_merge(nodes: usize, duration: Duration) {
    MERGE_TOTAL.fetch_add(1, Ordering::Relaxed);
    MERGE_NODES.fetch_add(nodes as u64, Ordering::Relaxed);
    record_latency(&MERGE_LAT_NS, &MERGE_LAT_SAMPLES, duration);
}

pub fn record_refs_reset() {
    REFS_RESET_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricSnapshot {
    MetricSnapshot {
        fetch: make_counter(
            FETCH_TOTAL.load(Ordering::Relaxed),
            FETCH_LAT_NS.load(Ordering::Relaxed),
            FETCH_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        ax_frame_failures: AX_FRAME_FAILURES.load(Ordering::Relaxed),
        merge: make_counter(
            MERGE_TOTAL.load(Ordering::Relaxed),
            MERGE_LAT_NS.load(Ordering::Relaxed),
            MERGE_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        merged_nodes: MERGE_NODES.load(Ordering::Relaxed),
        refs_resets: REFS_RESET_TOTAL.load(Ordering::Relaxed),
    }
}

fn make_counter(total: u64, nanos: u64, samples: u64) -> MetricCounter {
    let avg_ms = if samples == 0 {
        0.0
    } else {
        (nanos as f64 / samples as f64) / 1_000_000.0
    };
    MetricCounter { total, avg_ms }
}

fn record_latency(total_ns: &AtomicU64, samples: &AtomicU64, duration: Duration) {
    let nanos = duration_to_nanos(duration);
    total_ns.fetch_add(nanos, Ordering::Relaxed);
    samples.fetch_add(1, Ordering::Relaxed);
}

fn duration_to_nanos(duration: Duration) -> u64 {
    let nanos = duration.as_nanos();
    if nanos > u64::MAX as u128 {
        u64::MAX
    } else {
        nanos as u64
    }
}
