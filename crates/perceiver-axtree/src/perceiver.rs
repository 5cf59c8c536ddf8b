//! The per-target perceiver: fetch + merge + reference bookkeeping behind
//! one handle.

use std::sync::Arc;

use cdp_bridge::{DebugTransport, SessionManager};
use pagescope_core_types::{FrameId, TargetId};

use crate::errors::PerceiverError;
use crate::events;
use crate::fetch::{FetchOptions, TreeFetcher};
use crate::merge::merge_trees;
use crate::model::{AxNode, Bounds, EnrichedElement, MergeOptions};
use crate::refs::{crosses_origin, RefRegistry};

/// Reads merged trees for one inspected target.
///
/// Owns that target's reference registry: references stay valid across reads
/// until the caller resets them (or navigation leaves the origin). One
/// perceiver per target; nothing is shared between pages.
pub struct TreePerceiver<T: DebugTransport + 'static> {
    target: TargetId,
    fetcher: TreeFetcher<T>,
    refs: Arc<RefRegistry>,
    last_url: parking_lot::Mutex<Option<String>>,
}

impl<T: DebugTransport + 'static> TreePerceiver<T> {
    pub fn new(sessions: Arc<SessionManager<T>>, target: TargetId) -> Self {
        Self {
            target,
            fetcher: TreeFetcher::new(sessions),
            refs: Arc::new(RefRegistry::new()),
            last_url: parking_lot::Mutex::new(None),
        }
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn refs(&self) -> Arc<RefRegistry> {
        Arc::clone(&self.refs)
    }

    /// Fetch all three trees and merge them into the enriched forest.
    pub async fn read_tree(
        &self,
        options: &MergeOptions,
    ) -> Result<Vec<EnrichedElement>, PerceiverError> {
        let fetch_options = FetchOptions {
            extended_styles: options.extended_styles,
        };
        let trees = self
            .fetcher
            .fetch_all_trees(&self.target, &fetch_options)
            .await?;
        merge_trees(&trees, &self.refs, options)
    }

    /// Accessibility data only, per frame; cheaper than a full read when the
    /// structural tree is known to be unchanged.
    pub async fn read_ax_trees(&self) -> Result<Vec<(FrameId, Vec<AxNode>)>, PerceiverError> {
        self.fetcher.fetch_ax_trees(&self.target).await
    }

    /// The current accessibility node behind a reference.
    pub async fn ax_for(&self, reference: &str) -> Result<Option<AxNode>, PerceiverError> {
        let id = self.refs.resolve(reference)?;
        self.fetcher.fetch_ax_node(&self.target, id).await
    }

    /// Fresh coordinates for a reference, without re-fetching anything else.
    pub async fn bounds_for(&self, reference: &str) -> Result<Bounds, PerceiverError> {
        let id = self.refs.resolve(reference)?;
        self.fetcher.fetch_node_bounds(&self.target, id).await
    }

    /// Tell the perceiver the page navigated. A same-origin navigation keeps
    /// the registry (backend ids may survive); leaving the origin clears it.
    pub fn note_navigation(&self, url: &str) {
        let mut last = self.last_url.lock();
        if let Some(previous) = last.as_deref() {
            if crosses_origin(previous, url) {
                self.refs.clear();
                events::emit_refs_reset("cross-origin navigation");
            }
        }
        *last = Some(url.to_string());
    }
}
