//! Tree merging and interactivity classification.
//!
//! The walk descends the structural tree from `<body>`, joining each element
//! against the layout and accessibility indices by backend node id. Both
//! indices are built before the walk starts, so every node sees a complete
//! view of the other two trees.

use std::time::Instant;

use crate::ax::{is_interactive_role, AxIndex};
use crate::compound;
use crate::errors::PerceiverError;
use crate::events;
use crate::layout::LayoutIndex;
use crate::model::{Bounds, DomNode, EnrichedElement, FetchedTrees, FilterMode, MergeOptions};
use crate::refs::RefRegistry;

/// Tags that never carry visual or interactive meaning.
const DENIED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Tags interactive by construction. An `<a>` without `href` is the
/// exception: it is not a navigation target and falls through to the
/// attribute heuristics.
const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "details", "summary",
];

/// Result of walking one structural node: either an element of its own, or
/// a list of descendant elements to splice into the caller's child list
/// (filtered-out wrappers, shadow roots, frame documents).
pub(crate) enum WalkOutcome {
    Element(Box<EnrichedElement>),
    Spliced(Vec<EnrichedElement>),
}

impl WalkOutcome {
    fn append_to(self, out: &mut Vec<EnrichedElement>) {
        match self {
            WalkOutcome::Element(el) => out.push(*el),
            WalkOutcome::Spliced(list) => out.extend(list),
        }
    }
}

/// Merge one fetch cycle into the enriched element forest.
pub fn merge_trees(
    trees: &FetchedTrees,
    refs: &RefRegistry,
    options: &MergeOptions,
) -> Result<Vec<EnrichedElement>, PerceiverError> {
    let started = Instant::now();
    if options.reset_refs {
        refs.clear();
    }

    let layout = LayoutIndex::from_snapshot(&trees.snapshot, &trees.computed_style_names);
    let ax = AxIndex::from_frames(&trees.ax_by_frame);
    let body = resolve_body(&trees.structural_root).ok_or(PerceiverError::MissingBody)?;

    let walker = Walker {
        layout: &layout,
        ax: &ax,
        refs,
        options,
        viewport: trees.viewport,
    };

    let mut out = Vec::new();
    walker.walk(body, 0).append_to(&mut out);

    let emitted = count_elements(&out);
    events::emit_merge(emitted, refs.len(), options.filter, started.elapsed());
    Ok(out)
}

/// Walk past the synthetic document/html wrappers down to `<body>`.
pub fn resolve_body(root: &DomNode) -> Option<&DomNode> {
    fn descend(node: &DomNode, levels: usize) -> Option<&DomNode> {
        if node.is_element() && node.tag() == "body" {
            return Some(node);
        }
        if levels == 0 {
            return None;
        }
        if node.is_document() || (node.is_element() && node.tag() == "html") {
            for child in &node.children {
                if let Some(body) = descend(child, levels - 1) {
                    return Some(body);
                }
            }
        }
        None
    }
    descend(root, 3)
}

fn count_elements(elements: &[EnrichedElement]) -> usize {
    elements
        .iter()
        .map(|el| 1 + count_elements(&el.children))
        .sum()
}

struct Walker<'a> {
    layout: &'a LayoutIndex,
    ax: &'a AxIndex,
    refs: &'a RefRegistry,
    options: &'a MergeOptions,
    viewport: Bounds,
}

impl<'a> Walker<'a> {
    fn walk(&self, node: &DomNode, depth: usize) -> WalkOutcome {
        if depth > self.options.max_depth {
            return WalkOutcome::Spliced(Vec::new());
        }
        if !node.is_element() || DENIED_TAGS.contains(&node.tag()) {
            return WalkOutcome::Spliced(Vec::new());
        }

        let record = self.layout.get(node.backend_id());
        // No layout record means the paint pass skipped the node: treat as
        // visible-but-unpositioned, not hidden.
        let visible = record.map(|r| r.is_visible()).unwrap_or(true);
        let bounds = record.and_then(|r| r.bounds);
        let facet = self.ax.facet_for(node.backend_id());
        let interactive = classify_interactive(node, visible, facet.as_ref());

        if self.options.filter == FilterMode::Interactive && !interactive {
            return WalkOutcome::Spliced(self.walk_children(node, depth));
        }

        let tag = node.tag().to_string();
        let input_type = (tag == "input")
            .then(|| node.attribute("type").unwrap_or("text").to_string());
        let element_ref = self.refs.assign(node.backend_id());
        let compound_children =
            compound::compound_children(&tag, input_type.as_deref(), &element_ref);

        let element = EnrichedElement {
            backend_node_id: node.backend_id(),
            element_ref,
            attributes: node
                .attributes
                .chunks_exact(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect(),
            bounds,
            visible,
            in_viewport: bounds
                .map(|b| b.intersects(&self.viewport))
                .unwrap_or(false),
            paint_order: record.and_then(|r| r.paint_order),
            ax: facet,
            interactive,
            value: matches!(tag.as_str(), "input" | "textarea" | "select")
                .then(|| node.attribute("value").map(|v| v.to_string()))
                .flatten(),
            placeholder: matches!(tag.as_str(), "input" | "textarea")
                .then(|| node.attribute("placeholder").map(|v| v.to_string()))
                .flatten(),
            input_type,
            href: matches!(tag.as_str(), "a" | "area")
                .then(|| node.attribute("href").map(|v| v.to_string()))
                .flatten(),
            tag,
            children: self.walk_children(node, depth),
            compound_children,
        };

        WalkOutcome::Element(Box::new(element))
    }

    /// Regular children, shadow-root children and embedded-frame content,
    /// flattened into one list: shadow and frame internals surface as
    /// ordinary children rather than under synthetic wrappers.
    fn walk_children(&self, node: &DomNode, depth: usize) -> Vec<EnrichedElement> {
        let mut out = Vec::new();
        for child in &node.children {
            self.walk(child, depth + 1).append_to(&mut out);
        }
        for shadow in &node.shadow_roots {
            for child in &shadow.children {
                self.walk(child, depth + 1).append_to(&mut out);
            }
        }
        if let Some(doc) = &node.content_document {
            if let Some(body) = resolve_body(doc) {
                out.extend(self.walk_children(body, depth));
            }
        }
        out
    }
}

/// The interactivity cascade. Accessibility-derived signals come first
/// because they reflect the page's computed semantics (ARIA included);
/// tag and attribute heuristics only apply to nodes the accessibility tree
/// says nothing about.
pub fn classify_interactive(
    node: &DomNode,
    visible: bool,
    facet: Option<&crate::model::AxFacet>,
) -> bool {
    if !visible {
        return false;
    }

    if let Some(facet) = facet {
        if facet.is_disabled() {
            return false;
        }
        if facet.is_hidden() {
            return false;
        }
        if facet.is_focusable() || facet.is_editable() || facet.has_toggle_state() {
            return true;
        }
        if is_interactive_role(&facet.role) {
            return true;
        }
    }

    let tag = node.tag();
    if INTERACTIVE_TAGS.contains(&tag) && !(tag == "a" && node.attribute("href").is_none()) {
        return true;
    }

    if node.attribute("onclick").is_some() || node.attribute("onmousedown").is_some() {
        return true;
    }
    if let Some(tabindex) = node.attribute("tabindex") {
        if tabindex.trim() != "-1" {
            return true;
        }
    }
    if node
        .attribute("contenteditable")
        .map(|v| v.eq_ignore_ascii_case("true") || v.is_empty())
        .unwrap_or(false)
    {
        return true;
    }

    false
}
