//! Bridge counters.
//!
//! Lightweight atomics so callers can surface attach/command statistics
//! without an external metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static ATTACH_TOTAL: AtomicU64 = AtomicU64::new(0);
static DETACH_TOTAL: AtomicU64 = AtomicU64::new(0);
static AUTO_RELEASE_TOTAL: AtomicU64 = AtomicU64::new(0);
static COMMAND_TOTAL: AtomicU64 = AtomicU64::new(0);
static COMMAND_ERRORS: AtomicU64 = AtomicU64::new(0);
static EVENTS_ROUTED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSnapshot {
    pub attaches: u64,
    pub detaches: u64,
    pub auto_releases: u64,
    pub commands: u64,
    pub command_errors: u64,
    pub events_routed: u64,
}

pub fn record_attach() {
    ATTACH_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_detach() {
    DETACH_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_auto_release() {
    AUTO_RELEASE_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_command() {
    COMMAND_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_command_error() {
    COMMAND_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_event_routed() {
    EVENTS_ROUTED.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricSnapshot {
    MetricSnapshot {
        attaches: ATTACH_TOTAL.load(Ordering::Relaxed),
        detaches: DETACH_TOTAL.load(Ordering::Relaxed),
        auto_releases: AUTO_RELEASE_TOTAL.load(Ordering::Relaxed),
        commands: COMMAND_TOTAL.load(Ordering::Relaxed),
        command_errors: COMMAND_ERRORS.load(Ordering::Relaxed),
        events_routed: EVENTS_ROUTED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    for counter in [
        &ATTACH_TOTAL,
        &DETACH_TOTAL,
        &AUTO_RELEASE_TOTAL,
        &COMMAND_TOTAL,
        &COMMAND_ERRORS,
        &EVENTS_ROUTED,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}
