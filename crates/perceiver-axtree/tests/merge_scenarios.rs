//! End-to-end merge scenarios over hand-built protocol fixtures.
#![recursion_limit = "256"]

use pagescope_core_types::{BackendNodeId, FrameId};
use perceiver_axtree::model::{AxNode, DomNode, FetchedTrees};
use perceiver_axtree::{merge_trees, Bounds, EnrichedElement, FilterMode, MergeOptions, RefRegistry};
use serde_json::{json, Value};

fn dom(value: Value) -> DomNode {
    serde_json::from_value(value).expect("valid DOM.Node payload")
}

fn ax_nodes(value: Value) -> Vec<AxNode> {
    serde_json::from_value(value).expect("valid AXNode list")
}

/// A page with a wrapper div, a plain link, an ARIA button that is disabled,
/// a custom element hiding a button in its shadow root, a date input and an
/// iframe containing a button of its own.
fn structural_root() -> DomNode {
    dom(json!({
        "nodeId": 1, "backendNodeId": 1, "nodeType": 9,
        "nodeName": "#document", "localName": "",
        "children": [{
            "nodeId": 2, "backendNodeId": 2, "nodeType": 1,
            "nodeName": "HTML", "localName": "html",
            "children": [{
                "nodeId": 3, "backendNodeId": 3, "nodeType": 1,
                "nodeName": "BODY", "localName": "body",
                "children": [{
                    "nodeId": 4, "backendNodeId": 4, "nodeType": 1,
                    "nodeName": "DIV", "localName": "div",
                    "attributes": ["id", "main"],
                    "children": [
                        {
                            "nodeId": 5, "backendNodeId": 5, "nodeType": 1,
                            "nodeName": "A", "localName": "a",
                            "attributes": ["href", "/about"]
                        },
                        {
                            "nodeId": 6, "backendNodeId": 6, "nodeType": 1,
                            "nodeName": "DIV", "localName": "div",
                            "attributes": ["role", "button"]
                        },
                        {
                            "nodeId": 7, "backendNodeId": 7, "nodeType": 1,
                            "nodeName": "X-WIDGET", "localName": "x-widget",
                            "shadowRoots": [{
                                "nodeId": 70, "backendNodeId": 70, "nodeType": 11,
                                "nodeName": "#document-fragment", "localName": "",
                                "children": [{
                                    "nodeId": 8, "backendNodeId": 8, "nodeType": 1,
                                    "nodeName": "BUTTON", "localName": "button"
                                }]
                            }]
                        },
                        {
                            "nodeId": 9, "backendNodeId": 9, "nodeType": 1,
                            "nodeName": "INPUT", "localName": "input",
                            "attributes": ["type", "date"]
                        },
                        {
                            "nodeId": 90, "backendNodeId": 90, "nodeType": 1,
                            "nodeName": "SCRIPT", "localName": "script"
                        }
                    ]
                }, {
                    "nodeId": 10, "backendNodeId": 10, "nodeType": 1,
                    "nodeName": "IFRAME", "localName": "iframe",
                    "frameId": "frame-2",
                    "contentDocument": {
                        "nodeId": 11, "backendNodeId": 11, "nodeType": 9,
                        "nodeName": "#document", "localName": "",
                        "children": [{
                            "nodeId": 12, "backendNodeId": 12, "nodeType": 1,
                            "nodeName": "HTML", "localName": "html",
                            "children": [{
                                "nodeId": 13, "backendNodeId": 13, "nodeType": 1,
                                "nodeName": "BODY", "localName": "body",
                                "children": [{
                                    "nodeId": 14, "backendNodeId": 14, "nodeType": 1,
                                    "nodeName": "BUTTON", "localName": "button"
                                }]
                            }]
                        }]
                    }
                }]
            }]
        }]
    }))
}

fn main_frame_ax() -> Vec<AxNode> {
    ax_nodes(json!([
        {
            "nodeId": "6", "role": { "value": "button" },
            "name": { "value": "Disabled action" },
            "properties": [
                { "name": "disabled", "value": { "value": true } },
                { "name": "focusable", "value": { "value": true } }
            ],
            "backendDOMNodeId": 6
        },
        {
            "nodeId": "8", "role": { "value": "button" },
            "name": { "value": "Shadow action" },
            "properties": [ { "name": "focusable", "value": { "value": true } } ],
            "backendDOMNodeId": 8
        },
        {
            "nodeId": "9", "role": { "value": "textbox" },
            "name": { "value": "Date" },
            "properties": [ { "name": "focusable", "value": { "value": true } } ],
            "backendDOMNodeId": 9
        }
    ]))
}

fn child_frame_ax() -> Vec<AxNode> {
    ax_nodes(json!([
        {
            "nodeId": "1", "role": { "value": "button" },
            "name": { "value": "Frame action" },
            "properties": [ { "name": "focusable", "value": { "value": true } } ],
            "backendDOMNodeId": 14
        }
    ]))
}

fn trees(child_frame_failed: bool) -> FetchedTrees {
    FetchedTrees {
        structural_root: structural_root(),
        snapshot: json!({
            "strings": [],
            "documents": [{
                "nodes": { "backendNodeId": [3, 4, 5, 6, 7, 8, 9, 10, 14] },
                "layout": {
                    "nodeIndex": [0, 1, 2, 3, 4, 5, 6, 7, 8],
                    "bounds": [
                        [0.0, 0.0, 1280.0, 2000.0],
                        [0.0, 0.0, 1280.0, 400.0],
                        [10.0, 10.0, 100.0, 20.0],
                        [10.0, 40.0, 100.0, 20.0],
                        [10.0, 70.0, 100.0, 20.0],
                        [12.0, 72.0, 80.0, 16.0],
                        [10.0, 100.0, 100.0, 20.0],
                        [0.0, 500.0, 400.0, 300.0],
                        [10.0, 510.0, 80.0, 20.0]
                    ],
                    "styles": [[], [], [], [], [], [], [], [], []],
                    "paintOrders": [0, 1, 2, 3, 4, 5, 6, 7, 8]
                }
            }]
        }),
        computed_style_names: vec!["display".into(), "visibility".into(), "opacity".into()],
        ax_by_frame: vec![
            (FrameId("frame-1".into()), main_frame_ax()),
            (
                FrameId("frame-2".into()),
                if child_frame_failed { Vec::new() } else { child_frame_ax() },
            ),
        ],
        frames: vec![FrameId("frame-1".into()), FrameId("frame-2".into())],
        viewport: Bounds { x: 0.0, y: 0.0, width: 1280.0, height: 720.0 },
    }
}

fn flatten(elements: &[EnrichedElement]) -> Vec<&EnrichedElement> {
    let mut out = Vec::new();
    fn visit<'a>(el: &'a EnrichedElement, out: &mut Vec<&'a EnrichedElement>) {
        out.push(el);
        for child in &el.children {
            visit(child, out);
        }
    }
    for el in elements {
        visit(el, &mut out);
    }
    out
}

fn find<'a>(elements: &'a [EnrichedElement], id: u64) -> Option<&'a EnrichedElement> {
    flatten(elements)
        .into_iter()
        .find(|el| el.backend_node_id == BackendNodeId(id))
}

#[test]
fn full_merge_emits_expected_structure() {
    let refs = RefRegistry::new();
    let forest = merge_trees(&trees(false), &refs, &MergeOptions::default()).unwrap();

    assert_eq!(forest.len(), 1, "body is the single root");
    let body = &forest[0];
    assert_eq!(body.tag, "body");

    // The script child is never emitted.
    assert!(find(&forest, 90).is_none());

    // Simple link: no AX facet, still interactive by tag, href carried.
    let link = find(&forest, 5).expect("link emitted");
    assert!(link.ax.is_none());
    assert!(link.interactive);
    assert_eq!(link.href.as_deref(), Some("/about"));

    // ARIA button disabled: interactive role loses to disabled state.
    let disabled = find(&forest, 6).expect("aria button emitted");
    assert_eq!(disabled.ax.as_ref().unwrap().role, "button");
    assert!(!disabled.interactive);

    // Date input grows compound spin controls.
    let date = find(&forest, 9).expect("date input");
    assert_eq!(date.input_type.as_deref(), Some("date"));
    let names: Vec<&str> = date
        .compound_children
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(names, vec!["Month", "Day", "Year", "Show date picker"]);
}

#[test]
fn shadow_button_surfaces_as_normal_child() {
    let refs = RefRegistry::new();
    let forest = merge_trees(&trees(false), &refs, &MergeOptions::default()).unwrap();

    let widget = find(&forest, 7).expect("custom element");
    assert_eq!(widget.children.len(), 1);
    let button = &widget.children[0];
    assert_eq!(button.backend_node_id, BackendNodeId(8));
    assert_eq!(button.ax.as_ref().unwrap().name.as_deref(), Some("Shadow action"));
    assert!(button.interactive);
}

#[test]
fn iframe_content_splices_into_owner() {
    let refs = RefRegistry::new();
    let forest = merge_trees(&trees(false), &refs, &MergeOptions::default()).unwrap();

    let iframe = find(&forest, 10).expect("iframe element");
    assert_eq!(iframe.children.len(), 1);
    assert_eq!(iframe.children[0].backend_node_id, BackendNodeId(14));
}

#[test]
fn partial_ax_failure_degrades_to_null_facets() {
    let refs = RefRegistry::new();
    let forest = merge_trees(&trees(true), &refs, &MergeOptions::default()).unwrap();

    let frame_button = find(&forest, 14).expect("frame button still emitted");
    assert!(frame_button.ax.is_none(), "failed frame contributes no facets");
    assert!(frame_button.interactive, "tag fallback still applies");

    let shadow_button = find(&forest, 8).expect("main frame unaffected");
    assert!(shadow_button.ax.is_some());
}

#[test]
fn references_are_stable_across_merges_without_reset() {
    let refs = RefRegistry::new();
    let first = merge_trees(&trees(false), &refs, &MergeOptions::default()).unwrap();

    let again = MergeOptions {
        reset_refs: false,
        ..MergeOptions::default()
    };
    let second = merge_trees(&trees(false), &refs, &again).unwrap();

    for before in flatten(&first) {
        let after = find(&second, before.backend_node_id.0).expect("same node emitted");
        assert_eq!(before.element_ref, after.element_ref);
    }
}

#[test]
fn reset_restarts_the_sequence() {
    let refs = RefRegistry::new();
    let first = merge_trees(&trees(false), &refs, &MergeOptions::default()).unwrap();
    let first_body_ref = first[0].element_ref.clone();
    assert_eq!(first_body_ref, "ref_1");

    // reset_refs: true clears before walking, so numbering restarts.
    let second = merge_trees(&trees(false), &refs, &MergeOptions::default()).unwrap();
    assert_eq!(second[0].element_ref, "ref_1");
}

#[test]
fn interactive_filter_is_exactly_the_interactive_subset() {
    let refs = RefRegistry::new();
    let all = merge_trees(&trees(false), &refs, &MergeOptions::default()).unwrap();
    let expected: Vec<u64> = flatten(&all)
        .into_iter()
        .filter(|el| el.interactive)
        .map(|el| el.backend_node_id.0)
        .collect();

    let filtered = merge_trees(
        &trees(false),
        &refs,
        &MergeOptions {
            filter: FilterMode::Interactive,
            reset_refs: false,
            ..MergeOptions::default()
        },
    )
    .unwrap();
    let produced: Vec<u64> = flatten(&filtered)
        .into_iter()
        .map(|el| el.backend_node_id.0)
        .collect();

    assert_eq!(produced, expected, "same elements, traversal order preserved");

    // References agree with the unfiltered read.
    for el in flatten(&filtered) {
        let counterpart = find(&all, el.backend_node_id.0).unwrap();
        assert_eq!(el.element_ref, counterpart.element_ref);
    }
}

#[test]
fn depth_zero_emits_only_the_root() {
    let refs = RefRegistry::new();
    let forest = merge_trees(
        &trees(false),
        &refs,
        &MergeOptions {
            max_depth: 0,
            ..MergeOptions::default()
        },
    )
    .unwrap();

    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0].tag, "body");
    assert!(forest[0].children.is_empty());
}

#[test]
fn depth_limits_path_length() {
    let refs = RefRegistry::new();
    let forest = merge_trees(
        &trees(false),
        &refs,
        &MergeOptions {
            max_depth: 2,
            ..MergeOptions::default()
        },
    )
    .unwrap();

    // body(0) → div#main(1) → a(2) is kept…
    assert!(find(&forest, 5).is_some());
    // …but the shadow button at structural depth 3 is omitted.
    assert!(find(&forest, 8).is_none());

    fn max_depth(el: &EnrichedElement) -> usize {
        1 + el.children.iter().map(max_depth).max().unwrap_or(0)
    }
    assert!(max_depth(&forest[0]) <= 3, "no path longer than depth + 1");
}
