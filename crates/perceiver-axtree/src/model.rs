//! Wire-facing and merged data models.
//!
//! The `Dom*`/`Ax*`/`Frame*` structs mirror the protocol payloads and are
//! deserialized straight off the wire; `EnrichedElement` is the merged
//! entity this crate produces.

use std::collections::BTreeMap;

use pagescope_core_types::{BackendNodeId, FrameId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ELEMENT_NODE: i64 = 1;
pub const DOCUMENT_NODE: i64 = 9;

/// One node of the structural tree (`DOM.getDocument` with piercing).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomNode {
    pub node_id: i64,
    pub backend_node_id: u64,
    pub node_type: i64,
    pub node_name: String,
    #[serde(default)]
    pub local_name: String,
    #[serde(default)]
    pub node_value: String,
    /// Flat name/value pair list, as the protocol sends it.
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub children: Vec<DomNode>,
    #[serde(default)]
    pub shadow_roots: Vec<DomNode>,
    pub content_document: Option<Box<DomNode>>,
    pub frame_id: Option<String>,
}

impl DomNode {
    pub fn is_element(&self) -> bool {
        self.node_type == ELEMENT_NODE
    }

    pub fn is_document(&self) -> bool {
        self.node_type == DOCUMENT_NODE
    }

    pub fn tag(&self) -> &str {
        &self.local_name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .chunks_exact(2)
            .find(|pair| pair[0].eq_ignore_ascii_case(name))
            .map(|pair| pair[1].as_str())
    }

    pub fn backend_id(&self) -> BackendNodeId {
        BackendNodeId(self.backend_node_id)
    }
}

/// A typed accessibility value (`AXValue` on the wire).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxValue {
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxProperty {
    pub name: String,
    #[serde(default)]
    pub value: AxValue,
}

/// One node of a per-frame accessibility tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxNode {
    pub node_id: String,
    #[serde(default)]
    pub ignored: bool,
    pub role: Option<AxValue>,
    pub name: Option<AxValue>,
    pub description: Option<AxValue>,
    #[serde(default)]
    pub properties: Vec<AxProperty>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    /// Back-reference to the structural node this entry describes; the join
    /// key across all three trees.
    #[serde(rename = "backendDOMNodeId")]
    pub backend_dom_node_id: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTreeNode {
    pub frame: FrameInfo,
    #[serde(default)]
    pub child_frames: Vec<FrameTreeNode>,
}

impl FrameTreeNode {
    /// Every frame id in the hierarchy, depth-first, root included.
    pub fn collect_frame_ids(&self) -> Vec<FrameId> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut Vec<FrameId>) {
        out.push(FrameId(self.frame.id.clone()));
        for child in &self.child_frames {
            child.collect_into(out);
        }
    }
}

/// Axis-aligned rectangle in CSS pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }
}

/// Per-node layout/paint data joined out of the snapshot.
#[derive(Clone, Debug, Default)]
pub struct LayoutRecord {
    pub bounds: Option<Bounds>,
    pub paint_order: Option<i64>,
    pub styles: BTreeMap<String, String>,
}

impl LayoutRecord {
    /// Only explicit signals make a node invisible; a node the paint pass
    /// skipped entirely never gets a record and is handled by the caller.
    pub fn is_visible(&self) -> bool {
        if let Some(display) = self.styles.get("display") {
            if display == "none" {
                return false;
            }
        }
        if let Some(visibility) = self.styles.get("visibility") {
            if visibility == "hidden" || visibility == "collapse" {
                return false;
            }
        }
        if let Some(opacity) = self.styles.get("opacity") {
            if opacity.parse::<f64>().map(|o| o == 0.0).unwrap_or(false) {
                return false;
            }
        }
        true
    }
}

/// Normalized accessibility state attached to an enriched element.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateProperty {
    pub name: String,
    pub value: Value,
}

/// The accessibility facet of a merged element. Absent when the node has no
/// accessibility representation or is explicitly ignored.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AxFacet {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<StateProperty>,
}

impl AxFacet {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    fn bool_property(&self, name: &str) -> bool {
        self.property(name)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_disabled(&self) -> bool {
        self.bool_property("disabled")
    }

    pub fn is_hidden(&self) -> bool {
        self.bool_property("hidden")
    }

    pub fn is_focusable(&self) -> bool {
        self.bool_property("focusable")
    }

    /// `editable` carries a string kind ("plaintext", "richtext") when set.
    pub fn is_editable(&self) -> bool {
        self.property("editable")
            .map(|v| match v {
                Value::Bool(b) => *b,
                Value::String(s) => !s.is_empty(),
                _ => false,
            })
            .unwrap_or(false)
    }

    /// A checked/expanded/pressed/selected property present at all marks a
    /// stateful control, whatever its current value.
    pub fn has_toggle_state(&self) -> bool {
        self.properties
            .iter()
            .any(|p| matches!(p.name.as_str(), "checked" | "expanded" | "pressed" | "selected"))
    }
}

/// Synthetic sub-control of a composite input; has no structural node of its
/// own and addresses through the host element's reference.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompoundChild {
    pub role: String,
    pub name: String,
    #[serde(rename = "ref")]
    pub element_ref: String,
}

/// The merged output entity: one structural node enriched with layout,
/// accessibility and interactivity data, addressable by its reference.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedElement {
    pub backend_node_id: BackendNodeId,
    #[serde(rename = "ref")]
    pub element_ref: String,
    pub tag: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    pub visible: bool,
    pub in_viewport: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paint_order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ax: Option<AxFacet>,
    pub interactive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EnrichedElement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compound_children: Vec<CompoundChild>,
}

/// Which elements the merge emits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FilterMode {
    #[default]
    All,
    /// Emit only interactive elements; non-interactive wrappers are spliced
    /// out and their interactive descendants bubble up.
    Interactive,
}

#[derive(Clone, Debug)]
pub struct MergeOptions {
    pub max_depth: usize,
    pub filter: FilterMode,
    /// Empty the reference registry before walking, so a fresh full read
    /// starts numbering from ref_1 again.
    pub reset_refs: bool,
    /// Capture the extended computed-style set in the layout snapshot.
    pub extended_styles: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            max_depth: 15,
            filter: FilterMode::All,
            reset_refs: true,
            extended_styles: false,
        }
    }
}

/// Everything one fetch cycle produced, ready for merging.
#[derive(Clone, Debug)]
pub struct FetchedTrees {
    pub structural_root: DomNode,
    /// Raw `DOMSnapshot.captureSnapshot` payload (parallel arrays).
    pub snapshot: Value,
    /// The computed-style names the snapshot was asked for, in request order.
    pub computed_style_names: Vec<String>,
    /// Accessibility nodes per browsing context. A frame whose fetch failed
    /// is present with an empty list.
    pub ax_by_frame: Vec<(FrameId, Vec<AxNode>)>,
    /// Frame hierarchy flattened depth-first, root first.
    pub frames: Vec<FrameId>,
    pub viewport: Bounds,
}
