//! Parallel tree acquisition.
//!
//! One fetch cycle needs four protocol surfaces: the frame hierarchy (to
//! know how many accessibility trees exist), the pierced structural tree,
//! the layout snapshot and one accessibility tree per frame. Everything
//! after the frame query is fanned out concurrently; only per-frame
//! accessibility failures are survivable.
//!
//! Every command goes through the session manager, so each one refreshes the
//! session's inactivity timer.

use std::sync::Arc;
use std::time::Instant;

use cdp_bridge::{DebugTransport, SessionManager, TransportError};
use futures::future::join_all;
use pagescope_core_types::{BackendNodeId, FrameId, TargetId};
use serde_json::{json, Value};
use tracing::warn;

use crate::errors::PerceiverError;
use crate::events;
use crate::model::{AxNode, Bounds, DomNode, FetchedTrees, FrameTreeNode};

/// Computed styles the merge needs to decide visibility without a live
/// layout engine.
pub const BASE_COMPUTED_STYLES: &[&str] = &[
    "display",
    "visibility",
    "opacity",
    "cursor",
    "pointer-events",
    "overflow",
];

/// Additional capture for callers that want richer style context.
pub const EXTENDED_COMPUTED_STYLES: &[&str] = &[
    "position",
    "z-index",
    "color",
    "background-color",
    "font-size",
];

#[derive(Clone, Copy, Debug, Default)]
pub struct FetchOptions {
    pub extended_styles: bool,
}

impl FetchOptions {
    pub fn computed_style_names(&self) -> Vec<String> {
        let mut names: Vec<String> = BASE_COMPUTED_STYLES.iter().map(|s| s.to_string()).collect();
        if self.extended_styles {
            names.extend(EXTENDED_COMPUTED_STYLES.iter().map(|s| s.to_string()));
        }
        names
    }
}

pub struct TreeFetcher<T: DebugTransport + 'static> {
    sessions: Arc<SessionManager<T>>,
}

impl<T: DebugTransport + 'static> TreeFetcher<T> {
    pub fn new(sessions: Arc<SessionManager<T>>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> Arc<SessionManager<T>> {
        Arc::clone(&self.sessions)
    }

    /// Retrieve the structural tree, the layout snapshot and one
    /// accessibility tree per frame, plus the viewport, in one fan-out.
    pub async fn fetch_all_trees(
        &self,
        target: &TargetId,
        options: &FetchOptions,
    ) -> Result<FetchedTrees, PerceiverError> {
        let started = Instant::now();
        let frames = self.fetch_frame_ids(target).await?;
        let style_names = options.computed_style_names();

        let (document, snapshot, ax, viewport) = tokio::join!(
            self.fetch_document(target),
            self.fetch_snapshot(target, &style_names),
            self.fetch_ax_frames(target, &frames),
            self.fetch_viewport(target),
        );

        let structural_root = document?;
        let snapshot = snapshot?;
        let viewport = viewport?;
        let (ax_by_frame, ax_failures) = ax;

        events::emit_fetch(target, frames.len(), ax_failures, started.elapsed());

        Ok(FetchedTrees {
            structural_root,
            snapshot,
            computed_style_names: style_names,
            ax_by_frame,
            frames,
            viewport,
        })
    }

    /// Lighter-weight variant for callers that only need fresh
    /// accessibility data.
    pub async fn fetch_ax_trees(
        &self,
        target: &TargetId,
    ) -> Result<Vec<(FrameId, Vec<AxNode>)>, PerceiverError> {
        let frames = self.fetch_frame_ids(target).await?;
        let (ax_by_frame, _) = self.fetch_ax_frames(target, &frames).await;
        Ok(ax_by_frame)
    }

    /// The accessibility node describing one structural node, without a
    /// full-tree fetch.
    pub async fn fetch_ax_node(
        &self,
        target: &TargetId,
        id: BackendNodeId,
    ) -> Result<Option<AxNode>, PerceiverError> {
        let result = self
            .sessions
            .send(
                target,
                "Accessibility.getPartialAXTree",
                json!({ "backendNodeId": id.0, "fetchRelatives": false }),
            )
            .await?;
        let nodes: Vec<AxNode> = decode(
            result.get("nodes").cloned().unwrap_or(Value::Null),
            "Accessibility.getPartialAXTree nodes",
        )?;
        Ok(nodes
            .iter()
            .find(|n| n.backend_dom_node_id == Some(id.0))
            .or_else(|| nodes.first())
            .cloned())
    }

    /// Fresh coordinates for an already-known node.
    pub async fn fetch_node_bounds(
        &self,
        target: &TargetId,
        id: BackendNodeId,
    ) -> Result<Bounds, PerceiverError> {
        let result = self
            .sessions
            .send(target, "DOM.getBoxModel", json!({ "backendNodeId": id.0 }))
            .await
            .map_err(|err| match &err {
                TransportError::Protocol { message }
                    if message.to_ascii_lowercase().contains("box model") =>
                {
                    PerceiverError::NoBounds(id.to_string())
                }
                _ => PerceiverError::Transport(err),
            })?;

        let quad = result
            .get("model")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_array())
            .ok_or_else(|| PerceiverError::decode("DOM.getBoxModel missing content quad"))?;
        let points: Vec<f64> = quad.iter().filter_map(|v| v.as_f64()).collect();
        if points.len() < 8 {
            return Err(PerceiverError::decode("DOM.getBoxModel content quad too short"));
        }

        let xs = [points[0], points[2], points[4], points[6]];
        let ys = [points[1], points[3], points[5], points[7]];
        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        Ok(Bounds {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }

    async fn fetch_frame_ids(&self, target: &TargetId) -> Result<Vec<FrameId>, PerceiverError> {
        let result = self
            .sessions
            .send(target, "Page.getFrameTree", json!({}))
            .await?;
        let tree: FrameTreeNode = decode(
            result.get("frameTree").cloned().unwrap_or(Value::Null),
            "Page.getFrameTree frameTree",
        )?;
        Ok(tree.collect_frame_ids())
    }

    async fn fetch_document(&self, target: &TargetId) -> Result<DomNode, PerceiverError> {
        let result = self
            .sessions
            .send(
                target,
                "DOM.getDocument",
                json!({ "depth": -1, "pierce": true }),
            )
            .await?;
        decode(
            result.get("root").cloned().unwrap_or(Value::Null),
            "DOM.getDocument root",
        )
    }

    async fn fetch_snapshot(
        &self,
        target: &TargetId,
        style_names: &[String],
    ) -> Result<Value, PerceiverError> {
        let _ = self
            .sessions
            .send(target, "DOMSnapshot.enable", json!({}))
            .await;
        let result = self
            .sessions
            .send(
                target,
                "DOMSnapshot.captureSnapshot",
                json!({
                    "computedStyles": style_names,
                    "includePaintOrder": true,
                }),
            )
            .await?;

        if result.get("documents").and_then(|v| v.as_array()).is_none() {
            return Err(PerceiverError::decode(
                "DOMSnapshot.captureSnapshot missing 'documents' array",
            ));
        }
        if result.get("strings").and_then(|v| v.as_array()).is_none() {
            return Err(PerceiverError::decode(
                "DOMSnapshot.captureSnapshot missing 'strings' array",
            ));
        }
        Ok(result)
    }

    /// One accessibility tree per frame, concurrently. A failing frame
    /// contributes an empty set: a cross-origin iframe the protocol cannot
    /// introspect must not sink the whole read.
    async fn fetch_ax_frames(
        &self,
        target: &TargetId,
        frames: &[FrameId],
    ) -> (Vec<(FrameId, Vec<AxNode>)>, usize) {
        let _ = self
            .sessions
            .send(target, "Accessibility.enable", json!({}))
            .await;

        let fetches = frames.iter().map(|frame| async move {
            let result = self
                .sessions
                .send(
                    target,
                    "Accessibility.getFullAXTree",
                    json!({ "frameId": frame.0 }),
                )
                .await;
            match result {
                Ok(value) => {
                    match decode::<Vec<AxNode>>(
                        value.get("nodes").cloned().unwrap_or(Value::Null),
                        "Accessibility.getFullAXTree nodes",
                    ) {
                        Ok(nodes) => (frame.clone(), nodes, false),
                        Err(err) => {
                            warn!(
                                target: "perceiver-axtree",
                                frame_id = %frame,
                                ?err,
                                "malformed accessibility tree; frame contributes nothing"
                            );
                            (frame.clone(), Vec::new(), true)
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target: "perceiver-axtree",
                        frame_id = %frame,
                        ?err,
                        "accessibility tree unavailable for frame"
                    );
                    (frame.clone(), Vec::new(), true)
                }
            }
        });

        let mut ax_by_frame = Vec::with_capacity(frames.len());
        let mut failures = 0;
        for (frame, nodes, failed) in join_all(fetches).await {
            if failed {
                failures += 1;
            }
            ax_by_frame.push((frame, nodes));
        }
        (ax_by_frame, failures)
    }

    async fn fetch_viewport(&self, target: &TargetId) -> Result<Bounds, PerceiverError> {
        let result = self
            .sessions
            .send(target, "Page.getLayoutMetrics", json!({}))
            .await?;
        let viewport = result
            .get("cssLayoutViewport")
            .or_else(|| result.get("layoutViewport"))
            .ok_or_else(|| PerceiverError::decode("Page.getLayoutMetrics missing viewport"))?;
        Ok(Bounds {
            x: 0.0,
            y: 0.0,
            width: viewport
                .get("clientWidth")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            height: viewport
                .get("clientHeight")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
        })
    }
}

fn decode<D: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<D, PerceiverError> {
    serde_json::from_value(value).map_err(|err| PerceiverError::decode(format!("{what}: {err}")))
}
