//! Fetch orchestration against a scripted transport.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_bridge::transport::{EventHandler, ListenerId};
use cdp_bridge::{DebugTransport, SessionManager, TransportError};
use dashmap::DashSet;
use pagescope_core_types::{BackendNodeId, TargetId};
use perceiver_axtree::{FetchOptions, PerceiverError, TreeFetcher};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Scripted transport: responses are keyed by method (and frame id for the
/// per-frame accessibility query) and consumed in order.
struct ScriptedTransport {
    attach_calls: AtomicUsize,
    attached: DashSet<TargetId>,
    responses: parking_lot::Mutex<HashMap<String, VecDeque<Result<Value, TransportError>>>>,
    log: parking_lot::Mutex<Vec<String>>,
    detach_tx: broadcast::Sender<TargetId>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        let (detach_tx, _) = broadcast::channel(8);
        Arc::new(Self {
            attach_calls: AtomicUsize::new(0),
            attached: DashSet::new(),
            responses: parking_lot::Mutex::new(HashMap::new()),
            log: parking_lot::Mutex::new(Vec::new()),
            detach_tx,
        })
    }

    fn script(&self, key: &str, response: Result<Value, TransportError>) {
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(response);
    }

    fn key_for(method: &str, params: &Value) -> String {
        match params.get("frameId").and_then(|v| v.as_str()) {
            Some(frame) => format!("{method}:{frame}"),
            None => method.to_string(),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl DebugTransport for ScriptedTransport {
    async fn attach(&self, target: &TargetId) -> Result<(), TransportError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        self.attached.insert(target.clone());
        Ok(())
    }

    async fn detach(&self, target: &TargetId) -> Result<(), TransportError> {
        self.attached.remove(target);
        Ok(())
    }

    fn is_attached(&self, target: &TargetId) -> bool {
        self.attached.contains(target)
    }

    async fn send(
        &self,
        target: &TargetId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        if !self.attached.contains(target) {
            return Err(TransportError::NotAttached(target.0.clone()));
        }
        let key = Self::key_for(method, &params);
        self.log.lock().push(key.clone());
        self.responses
            .lock()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(TransportError::protocol(format!("unscripted method {key}"))))
    }

    async fn send_browser(&self, _method: &str, _params: Value) -> Result<Value, TransportError> {
        Ok(Value::Null)
    }

    fn on(&self, _target: &TargetId, _event: &str, _handler: EventHandler) -> ListenerId {
        ListenerId(0)
    }

    fn off(&self, _target: &TargetId, _listener: ListenerId) {}

    fn detach_events(&self) -> broadcast::Receiver<TargetId> {
        self.detach_tx.subscribe()
    }
}

fn script_page(transport: &ScriptedTransport) {
    transport.script(
        "Page.getFrameTree",
        Ok(json!({
            "frameTree": {
                "frame": { "id": "frame-1" },
                "childFrames": [ { "frame": { "id": "frame-2" } } ]
            }
        })),
    );
    transport.script(
        "DOM.getDocument",
        Ok(json!({
            "root": {
                "nodeId": 1, "backendNodeId": 1, "nodeType": 9,
                "nodeName": "#document", "localName": "",
                "children": [{
                    "nodeId": 2, "backendNodeId": 2, "nodeType": 1,
                    "nodeName": "HTML", "localName": "html",
                    "children": [{
                        "nodeId": 3, "backendNodeId": 3, "nodeType": 1,
                        "nodeName": "BODY", "localName": "body"
                    }]
                }]
            }
        })),
    );
    transport.script(
        "DOMSnapshot.captureSnapshot",
        Ok(json!({ "documents": [], "strings": [] })),
    );
    transport.script(
        "Accessibility.getFullAXTree:frame-1",
        Ok(json!({
            "nodes": [{
                "nodeId": "1",
                "role": { "value": "RootWebArea" },
                "backendDOMNodeId": 1
            }]
        })),
    );
    transport.script(
        "Accessibility.getFullAXTree:frame-2",
        Err(TransportError::protocol("Frame not found")),
    );
    transport.script(
        "Page.getLayoutMetrics",
        Ok(json!({
            "cssLayoutViewport": { "clientWidth": 1280, "clientHeight": 720 }
        })),
    );
}

#[tokio::test]
async fn fetch_all_trees_survives_one_frame_failure() {
    let transport = ScriptedTransport::new();
    script_page(&transport);

    let sessions = SessionManager::new(Arc::clone(&transport), Duration::from_secs(30));
    let fetcher = TreeFetcher::new(sessions);
    let target = TargetId::from("page-1");

    let trees = fetcher
        .fetch_all_trees(&target, &FetchOptions::default())
        .await
        .expect("fetch succeeds despite frame-2");

    assert_eq!(trees.frames.len(), 2);
    assert_eq!(trees.ax_by_frame.len(), 2);
    assert_eq!(trees.ax_by_frame[0].1.len(), 1);
    assert!(trees.ax_by_frame[1].1.is_empty(), "failed frame contributes nothing");
    assert_eq!(trees.viewport.width, 1280.0);
    assert_eq!(trees.structural_root.children.len(), 1);

    // One attach serves the whole fan-out.
    assert_eq!(transport.attach_calls.load(Ordering::SeqCst), 1);

    let commands = transport.commands();
    assert!(commands.iter().any(|c| c == "DOM.getDocument"));
    assert!(commands.iter().any(|c| c == "DOMSnapshot.captureSnapshot"));
    assert!(commands.iter().any(|c| c == "Accessibility.getFullAXTree:frame-2"));
}

#[tokio::test]
async fn structural_failure_aborts_the_read() {
    let transport = ScriptedTransport::new();
    script_page(&transport);
    // Replace the document response with a failure.
    transport.responses.lock().remove("DOM.getDocument");
    transport.script(
        "DOM.getDocument",
        Err(TransportError::protocol("Internal error")),
    );

    let sessions = SessionManager::new(Arc::clone(&transport), Duration::from_secs(30));
    let fetcher = TreeFetcher::new(sessions);
    let target = TargetId::from("page-1");

    let result = fetcher.fetch_all_trees(&target, &FetchOptions::default()).await;
    assert!(matches!(result, Err(PerceiverError::Transport(_))));
}

#[tokio::test]
async fn node_bounds_come_from_the_content_quad() {
    let transport = ScriptedTransport::new();
    transport.script(
        "DOM.getBoxModel",
        Ok(json!({
            "model": {
                "content": [10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0]
            }
        })),
    );

    let sessions = SessionManager::new(Arc::clone(&transport), Duration::from_secs(30));
    let fetcher = TreeFetcher::new(sessions);
    let target = TargetId::from("page-1");

    let bounds = fetcher
        .fetch_node_bounds(&target, BackendNodeId(5))
        .await
        .expect("bounds resolved");
    assert_eq!(bounds.x, 10.0);
    assert_eq!(bounds.y, 20.0);
    assert_eq!(bounds.width, 100.0);
    assert_eq!(bounds.height, 40.0);
}

#[tokio::test]
async fn missing_box_model_maps_to_no_bounds() {
    let transport = ScriptedTransport::new();
    transport.script(
        "DOM.getBoxModel",
        Err(TransportError::protocol("Could not compute box model.")),
    );

    let sessions = SessionManager::new(Arc::clone(&transport), Duration::from_secs(30));
    let fetcher = TreeFetcher::new(sessions);
    let target = TargetId::from("page-1");

    let result = fetcher.fetch_node_bounds(&target, BackendNodeId(5)).await;
    assert!(matches!(result, Err(PerceiverError::NoBounds(_))));
}

#[tokio::test]
async fn partial_ax_query_returns_the_matching_node() {
    let transport = ScriptedTransport::new();
    transport.script(
        "Accessibility.getPartialAXTree",
        Ok(json!({
            "nodes": [
                { "nodeId": "9", "role": { "value": "checkbox" }, "backendDOMNodeId": 42 }
            ]
        })),
    );

    let sessions = SessionManager::new(Arc::clone(&transport), Duration::from_secs(30));
    let fetcher = TreeFetcher::new(sessions);
    let target = TargetId::from("page-1");

    let node = fetcher
        .fetch_ax_node(&target, BackendNodeId(42))
        .await
        .expect("query succeeds")
        .expect("node present");
    assert_eq!(node.backend_dom_node_id, Some(42));
}
