//! Synthetic sub-controls for composite inputs.
//!
//! Some inputs are rendered by the browser as a cluster of internal controls
//! with no structural nodes of their own (a date field's spin buttons, a
//! file picker's button). Surfacing them as compound children lets a caller
//! target the sub-control while still addressing the real host element.

use crate::model::CompoundChild;

pub fn synthesize(tag: &str, input_type: Option<&str>) -> &'static [(&'static str, &'static str)] {
    if tag != "input" {
        return &[];
    }
    match input_type.unwrap_or("text") {
        "file" => &[
            ("button", "Choose file"),
            ("label", "Selected file"),
        ],
        "date" | "datetime-local" => &[
            ("spinbutton", "Month"),
            ("spinbutton", "Day"),
            ("spinbutton", "Year"),
            ("button", "Show date picker"),
        ],
        "time" => &[("spinbutton", "Hours"), ("spinbutton", "Minutes")],
        "color" => &[("button", "Open color picker")],
        "number" => &[
            ("textbox", "Value"),
            ("button", "Increment"),
            ("button", "Decrement"),
        ],
        _ => &[],
    }
}

/// Build the compound children for a host element. Sub-controls address
/// through the host's reference with a slot suffix.
pub fn compound_children(tag: &str, input_type: Option<&str>, host_ref: &str) -> Vec<CompoundChild> {
    synthesize(tag, input_type)
        .iter()
        .map(|(role, name)| CompoundChild {
            role: (*role).to_string(),
            name: (*name).to_string(),
            element_ref: format!("{host_ref}.{}", slot_suffix(name)),
        })
        .collect()
}

fn slot_suffix(name: &str) -> String {
    name.to_ascii_lowercase().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_input_gets_spinners_and_picker() {
        let children = compound_children("input", Some("date"), "ref_4");
        let labels: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(labels, vec!["Month", "Day", "Year", "Show date picker"]);
        assert_eq!(children[0].element_ref, "ref_4.month");
        assert_eq!(children[0].role, "spinbutton");
    }

    #[test]
    fn plain_text_input_has_no_compounds() {
        assert!(compound_children("input", Some("text"), "ref_1").is_empty());
        assert!(compound_children("input", None, "ref_1").is_empty());
        assert!(compound_children("div", Some("date"), "ref_1").is_empty());
    }

    #[test]
    fn number_input_gets_steppers() {
        let children = compound_children("input", Some("number"), "ref_9");
        assert_eq!(children.len(), 3);
        assert_eq!(children[1].element_ref, "ref_9.increment");
    }
}
