// Data-driven graph configuration.
//
// `GraphConfig` holds the handful of tunables the graph code would otherwise
// hard-code: the outside-cell grid resolution used when forcing cells to
// load, the graph file extension, and the prefix that turns an identifier
// into a valid section name. It loads from JSON with every field optional,
// so a partial config overrides only what it names.
//
// The registry owns one config and gives each graph it creates a copy.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::Identifier;

/// Edge length of one outside cell, in world units.
pub const DEFAULT_GRID_RESOLUTION: f32 = 100.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Outside-cell edge length. `load_all_cells` snaps node positions to the
    /// centre of their grid square before asking the mapping for a cell.
    pub grid_resolution: f32,

    /// Extension of per-graph files, without the dot.
    pub graph_file_extension: String,

    /// Prepended to node identifiers to form section names in graph files.
    /// Identifiers may start with a digit, which is not a valid tag name.
    pub node_section_prefix: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            grid_resolution: DEFAULT_GRID_RESOLUTION,
            graph_file_extension: "graph".into(),
            node_section_prefix: "id.".into(),
        }
    }
}

impl GraphConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// `<base>/<name>.<ext>`, lower-cased.
    pub fn graph_file_path(&self, base: &Path, name: Identifier) -> PathBuf {
        let file = format!("{name}.{}", self.graph_file_extension).to_lowercase();
        base.join(file)
    }

    pub fn node_section_name(&self, id: Identifier) -> String {
        format!("{}{id}", self.node_section_prefix)
    }

    /// Strip the node section prefix, if present.
    pub fn strip_node_section_name<'a>(&self, name: &'a str) -> &'a str {
        name.strip_prefix(self.node_section_prefix.as_str())
            .unwrap_or(name)
    }

    /// The identifier a graph-file section stands for, if its name is one.
    pub fn node_section_id(&self, name: &str) -> Option<Identifier> {
        self.strip_node_section_name(name).parse().ok()
    }
}
