//! Editor layout of a flow.
//!
//! Node positions and links live in a companion `<name>.ui.json` file next
//! to `<name>.flow.json`. When a flow is parsed its layout is merged back
//! into the nodes; nodes without a stored position are placed on a new row
//! below the lowest placed node.

use colloquy_core::FlowDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const FLOW_EXTENSION: &str = ".flow.json";
const UI_EXTENSION: &str = ".ui.json";

/// Position of a node on the editor canvas
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate
    #[serde(default)]
    pub x: f64,
    /// Vertical coordinate
    #[serde(default)]
    pub y: f64,
}

/// Stored position of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLayout {
    /// Node id
    pub id: String,
    /// Position, absent for nodes never placed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Contents of a `.ui.json` file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowLayout {
    /// Node positions
    #[serde(default)]
    pub nodes: Vec<NodeLayout>,
    /// Editor links, kept opaque
    #[serde(default)]
    pub links: Vec<Value>,
}

impl FlowLayout {
    /// Extract the layout of a flow
    pub fn from_flow(flow: &FlowDefinition) -> Self {
        Self {
            nodes: flow
                .nodes
                .iter()
                .map(|node| NodeLayout {
                    id: node.id.clone(),
                    position: match (node.x, node.y) {
                        (Some(x), Some(y)) => Some(Position { x, y }),
                        _ => None,
                    },
                })
                .collect(),
            links: flow.links.clone(),
        }
    }

    fn position_of(&self, id: &str) -> Option<Position> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .and_then(|n| n.position)
    }
}

/// Merge `layout` into `flow`, placing nodes that have no stored position.
///
/// Unplaced nodes get `x = min_pos_x + i * placing_step`, where `i` counts
/// unplaced nodes only, and `y = max placed y + placing_step`. Without a
/// layout every node is unplaced.
pub fn apply_layout(
    flow: &mut FlowDefinition,
    layout: Option<&FlowLayout>,
    placing_step: f64,
    min_pos_x: f64,
) {
    let positions: Vec<Option<Position>> = flow
        .nodes
        .iter()
        .map(|node| layout.and_then(|l| l.position_of(&node.id)))
        .collect();

    let max_placed_y = positions
        .iter()
        .flatten()
        .map(|p| p.y)
        .fold(None, |max: Option<f64>, y| Some(max.map_or(y, |m| m.max(y))));
    let row_y = max_placed_y.unwrap_or(0.0) + placing_step;

    let mut unplaced = 0;
    for (node, position) in flow.nodes.iter_mut().zip(positions) {
        let position = position.unwrap_or_else(|| {
            let placed = Position {
                x: min_pos_x + unplaced as f64 * placing_step,
                y: row_y,
            };
            unplaced += 1;
            placed
        });
        node.x = Some(position.x);
        node.y = Some(position.y);
    }

    if let Some(layout) = layout {
        flow.links = layout.links.clone();
    }
}

/// `name.flow.json` to `name.ui.json`
pub fn ui_file_name(flow_file: &str) -> String {
    match strip_suffix_ignore_case(flow_file, FLOW_EXTENSION) {
        Some(stem) => format!("{}{}", stem, UI_EXTENSION),
        None => flow_file.to_string(),
    }
}

/// `name.ui.json` to `name.flow.json`; flow files come back unchanged
pub fn flow_file_name(file: &str) -> String {
    match strip_suffix_ignore_case(file, UI_EXTENSION) {
        Some(stem) => format!("{}{}", stem, FLOW_EXTENSION),
        None => file.to_string(),
    }
}

/// Whether `file` is a flow or layout file
pub fn is_flow_related(file: &str) -> bool {
    strip_suffix_ignore_case(file, FLOW_EXTENSION).is_some()
        || strip_suffix_ignore_case(file, UI_EXTENSION).is_some()
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(split) {
        return None;
    }
    let (stem, tail) = name.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(stem)
}
