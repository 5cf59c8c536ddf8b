//! Accessibility correlation.
//!
//! Every frame contributes its own accessibility tree with context-scoped
//! node ids. Those ids never leave this module: nodes are indexed by their
//! `backendDOMNodeId` back-reference, the identifier shared with the
//! structural tree, so the merge never walks an AX tree looking for a match.

use std::collections::HashMap;

use pagescope_core_types::{BackendNodeId, FrameId};
use serde_json::Value;

use crate::model::{AxFacet, AxNode, StateProperty};

/// Roles that make an element a target on their own, reflecting computed
/// page semantics (ARIA included).
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "textbox",
    "searchbox",
    "slider",
    "spinbutton",
    "switch",
    "tab",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "option",
];

pub fn is_interactive_role(role: &str) -> bool {
    INTERACTIVE_ROLES.contains(&role)
}

pub struct AxIndex {
    by_backend: HashMap<u64, AxNode>,
}

impl AxIndex {
    pub fn from_frames(frames: &[(FrameId, Vec<AxNode>)]) -> Self {
        let mut by_backend = HashMap::new();
        for (_, nodes) in frames {
            for node in nodes {
                if let Some(backend_id) = node.backend_dom_node_id {
                    by_backend.entry(backend_id).or_insert_with(|| node.clone());
                }
            }
        }
        Self { by_backend }
    }

    pub fn get(&self, id: BackendNodeId) -> Option<&AxNode> {
        self.by_backend.get(&id.0)
    }

    pub fn len(&self) -> usize {
        self.by_backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_backend.is_empty()
    }

    /// The normalized facet for one structural node, or `None` when the node
    /// has no accessibility representation or is explicitly ignored.
    pub fn facet_for(&self, id: BackendNodeId) -> Option<AxFacet> {
        self.get(id).and_then(facet_from_node)
    }
}

pub fn facet_from_node(node: &AxNode) -> Option<AxFacet> {
    if node.ignored {
        return None;
    }

    let role = node
        .role
        .as_ref()
        .and_then(|r| r.value.as_str())
        .unwrap_or("generic")
        .to_string();

    Some(AxFacet {
        role,
        name: non_empty_string(node.name.as_ref().map(|v| &v.value)),
        description: non_empty_string(node.description.as_ref().map(|v| &v.value)),
        properties: node
            .properties
            .iter()
            .map(|p| StateProperty {
                name: p.name.clone(),
                value: p.value.value.clone(),
            })
            .collect(),
    })
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ax_node(value: Value) -> AxNode {
        serde_json::from_value(value).expect("valid AXNode payload")
    }

    #[test]
    fn indexes_by_backend_reference_across_frames() {
        let main = vec![ax_node(json!({
            "nodeId": "1",
            "role": { "type": "role", "value": "button" },
            "backendDOMNodeId": 50
        }))];
        let iframe = vec![ax_node(json!({
            "nodeId": "1",
            "role": { "type": "role", "value": "link" },
            "backendDOMNodeId": 90
        }))];

        let index = AxIndex::from_frames(&[
            (FrameId("main".into()), main),
            (FrameId("child".into()), iframe),
        ]);

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.facet_for(BackendNodeId(90)).unwrap().role,
            "link"
        );
        assert!(index.get(BackendNodeId(999)).is_none());
    }

    #[test]
    fn ignored_nodes_have_no_facet() {
        let nodes = vec![ax_node(json!({
            "nodeId": "7",
            "ignored": true,
            "role": { "value": "generic" },
            "backendDOMNodeId": 12
        }))];
        let index = AxIndex::from_frames(&[(FrameId("main".into()), nodes)]);
        assert!(index.get(BackendNodeId(12)).is_some());
        assert!(index.facet_for(BackendNodeId(12)).is_none());
    }

    #[test]
    fn facet_normalizes_name_and_properties() {
        let node = ax_node(json!({
            "nodeId": "3",
            "role": { "value": "checkbox" },
            "name": { "value": "Accept terms" },
            "description": { "value": "" },
            "properties": [
                { "name": "checked", "value": { "type": "tristate", "value": "true" } },
                { "name": "focusable", "value": { "type": "booleanOrUndefined", "value": true } }
            ],
            "backendDOMNodeId": 5
        }));
        let facet = facet_from_node(&node).unwrap();
        assert_eq!(facet.role, "checkbox");
        assert_eq!(facet.name.as_deref(), Some("Accept terms"));
        assert_eq!(facet.description, None);
        assert!(facet.is_focusable());
        assert!(facet.has_toggle_state());
    }
}
