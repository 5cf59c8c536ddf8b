//! Output rendering for merged trees.
//!
//! Two shapes: JSON (the model serializes directly) and an indented text
//! format, one line per element:
//!
//! ```text
//! button "Submit" [ref_3] type="submit" disabled
//! ```
//!
//! Attributes render in a fixed priority order; accessibility state renders
//! as bare flags for boolean-true properties and `key="value"` for valued
//! state (ranges, text). Output-size budgeting is the caller's concern.

use serde_json::Value;

use crate::model::EnrichedElement;

/// Attribute rendering order. Entries not listed here are not rendered in
/// the text format (they remain available in the JSON shape).
const ATTR_PRIORITY: &[&str] = &[
    "href",
    "value",
    "placeholder",
    "type",
    "title",
    "aria-label",
    "alt",
    "id",
    "name",
];

/// Accessibility properties that are structural rather than descriptive;
/// the interactive flag already accounts for them.
const SUPPRESSED_PROPERTIES: &[&str] = &["focusable", "editable", "url"];

pub fn to_json(elements: &[EnrichedElement]) -> Value {
    serde_json::to_value(elements).unwrap_or(Value::Null)
}

pub fn to_text(elements: &[EnrichedElement]) -> String {
    let mut out = String::new();
    for element in elements {
        write_element(&mut out, element, 0);
    }
    out
}

fn write_element(out: &mut String, element: &EnrichedElement, indent: usize) {
    let pad = "  ".repeat(indent);
    out.push_str(&pad);

    let role = element
        .ax
        .as_ref()
        .map(|a| a.role.as_str())
        .filter(|r| !r.is_empty())
        .unwrap_or(element.tag.as_str());
    out.push_str(role);

    if let Some(name) = element.ax.as_ref().and_then(|a| a.name.as_deref()) {
        out.push_str(&format!(" \"{name}\""));
    }
    out.push_str(&format!(" [{}]", element.element_ref));

    for key in ATTR_PRIORITY {
        let value = match *key {
            "href" => element.href.as_deref(),
            "value" => element.value.as_deref(),
            "placeholder" => element.placeholder.as_deref(),
            "type" => element.input_type.as_deref(),
            other => element.attributes.get(other).map(String::as_str),
        };
        if let Some(value) = value {
            out.push_str(&format!(" {key}=\"{value}\""));
        }
    }

    if let Some(ax) = &element.ax {
        for property in &ax.properties {
            if SUPPRESSED_PROPERTIES.contains(&property.name.as_str()) {
                continue;
            }
            match &property.value {
                Value::Bool(true) => out.push_str(&format!(" {}", property.name)),
                Value::Bool(false) | Value::Null => {}
                Value::String(s) if s == "true" => out.push_str(&format!(" {}", property.name)),
                Value::String(s) if s == "false" => {}
                other => out.push_str(&format!(" {}=\"{}\"", property.name, render_value(other))),
            }
        }
    }

    out.push('\n');

    for compound in &element.compound_children {
        out.push_str(&"  ".repeat(indent + 1));
        out.push_str(&format!(
            "{} \"{}\" [{}]\n",
            compound.role, compound.name, compound.element_ref
        ));
    }

    for child in &element.children {
        write_element(out, child, indent + 1);
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
