//! Layout correlation.
//!
//! `DOMSnapshot.captureSnapshot` returns parallel arrays per document:
//! `nodes.*` columns indexed by node, and a `layout` table whose
//! `nodeIndex` column points back into the node columns. Joining
//! `layout row → nodeIndex → backendNodeId` gives O(1) layout lookup by the
//! same backend id the structural and accessibility trees carry.

use std::collections::HashMap;

use pagescope_core_types::BackendNodeId;
use serde_json::Value;

use crate::model::{Bounds, LayoutRecord};

pub struct LayoutIndex {
    records: HashMap<u64, LayoutRecord>,
}

impl LayoutIndex {
    pub fn get(&self, id: BackendNodeId) -> Option<&LayoutRecord> {
        self.records.get(&id.0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_snapshot(snapshot: &Value, style_names: &[String]) -> Self {
        let mut records = HashMap::new();

        let strings = snapshot
            .get("strings")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        if let Some(documents) = snapshot.get("documents").and_then(|v| v.as_array()) {
            for document in documents {
                Self::extract_document(document, &strings, style_names, &mut records);
            }
        }

        Self { records }
    }

    fn extract_document(
        document: &Value,
        strings: &[Value],
        style_names: &[String],
        records: &mut HashMap<u64, LayoutRecord>,
    ) {
        let nodes_obj = match document.get("nodes").and_then(|v| v.as_object()) {
            Some(obj) => obj,
            None => return,
        };

        let backend_ids = match nodes_obj.get("backendNodeId").and_then(|v| v.as_array()) {
            Some(arr) => arr,
            None => return,
        };
        let backend_list: Vec<u64> = backend_ids.iter().filter_map(|v| v.as_u64()).collect();
        if backend_list.is_empty() {
            return;
        }

        let layout = match document.get("layout").and_then(|v| v.as_object()) {
            Some(obj) => obj,
            None => return,
        };
        let node_index = match layout.get("nodeIndex").and_then(|v| v.as_array()) {
            Some(arr) => arr,
            None => return,
        };
        let bounds = layout.get("bounds").and_then(|v| v.as_array());
        let styles = layout.get("styles").and_then(|v| v.as_array());
        let paint_orders = layout.get("paintOrders").and_then(|v| v.as_array());

        for (row, node_idx_val) in node_index.iter().enumerate() {
            let node_idx = match node_idx_val.as_u64().and_then(|v| usize::try_from(v).ok()) {
                Some(idx) => idx,
                None => continue,
            };
            let backend_id = match backend_list.get(node_idx) {
                Some(id) => *id,
                None => continue,
            };

            let mut record = LayoutRecord::default();

            if let Some(rect) = bounds.and_then(|b| b.get(row)).and_then(|v| v.as_array()) {
                if rect.len() >= 4 {
                    record.bounds = Some(Bounds {
                        x: rect[0].as_f64().unwrap_or(0.0),
                        y: rect[1].as_f64().unwrap_or(0.0),
                        width: rect[2].as_f64().unwrap_or(0.0),
                        height: rect[3].as_f64().unwrap_or(0.0),
                    });
                }
            }

            if let Some(order) = paint_orders.and_then(|p| p.get(row)).and_then(|v| v.as_i64()) {
                record.paint_order = Some(order);
            }

            if let Some(style_row) = styles.and_then(|s| s.get(row)).and_then(|v| v.as_array()) {
                for (col, style_val) in style_row.iter().enumerate() {
                    let Some(name) = style_names.get(col) else { break };
                    if let Some(value) = decode_indexed_string(strings, style_val) {
                        if !value.is_empty() {
                            record.styles.insert(name.clone(), value);
                        }
                    }
                }
            }

            records.insert(backend_id, record);
        }
    }
}

/// Snapshot string columns hold either inline strings or indices into the
/// top-level `strings` table; -1 marks absence.
fn decode_indexed_string(strings: &[Value], value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(num) => num.as_u64().and_then(|idx| {
            strings
                .get(idx as usize)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        }),
        _ => None,
    }
}
