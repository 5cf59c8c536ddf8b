use std::time::Duration;

use pagescope_core_types::TargetId;
use tracing::debug;

use crate::metrics;
use crate::model::FilterMode;

pub fn emit_fetch(target: &TargetId, frames: usize, ax_failures: usize, duration: Duration) {
    metrics::record_fetch(ax_failures, duration);
    debug!(
        target: "perceiver.events",
        target_id = %target,
        frames,
        ax_failures,
        "axtree.fetch.completed"
    );
}

pub fn emit_merge(nodes: usize, refs: usize, filter: FilterMode, duration: Duration) {
    metrics::record_merge(nodes, duration);
    debug!(
        target: "perceiver.events",
        nodes,
        refs,
        ?filter,
        "axtree.merge.completed"
    );
}

pub fn emit_refs_reset(reason: &str) {
    metrics::record_refs_reset();
    debug!(
        target: "perceiver.events",
        reason,
        "axtree.refs.reset"
    );
}
