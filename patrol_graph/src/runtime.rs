// Lightweight runtime nodes.
//
// A `RuntimeNode` is what traversal queries actually read: a world-space
// position, a label, and the ids this node can traverse to. It is a plain
// value type, independent of whether the waypoint node it mirrors is streamed
// in. Only outgoing traversable edges are stored, so the lists of two linked
// nodes need not agree.
//
// In a graph file each runtime node is one section named
// `<prefix><identifier>` holding `worldPosition`, `userString` and one `link`
// child (with a `to` field) per outgoing edge.

use cgmath::Matrix4;
use patrol_graph_data::DataSection;
use smallvec::SmallVec;
use tracing::warn;

use crate::config::GraphConfig;
use crate::math::{self, Position};
use crate::types::Identifier;

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeNode {
    pub id: Identifier,
    /// Already in graph world space.
    pub world_position: Position,
    pub user_string: String,
    links: SmallVec<[Identifier; 4]>,
}

impl RuntimeNode {
    pub fn new(id: Identifier, world_position: Position) -> Self {
        Self {
            id,
            world_position,
            user_string: String::new(),
            links: SmallVec::new(),
        }
    }

    /// Outgoing traversable neighbours, in insertion order.
    pub fn links(&self) -> &[Identifier] {
        &self.links
    }

    pub fn has_traversable_link_to(&self, id: Identifier) -> bool {
        self.links.contains(&id)
    }

    /// Add an outgoing edge. Duplicates are ignored.
    pub fn add_link(&mut self, id: Identifier) {
        if !self.has_traversable_link_to(id) {
            self.links.push(id);
        }
    }

    pub fn del_link(&mut self, id: Identifier) {
        if let Some(idx) = self.links.iter().position(|&l| l == id) {
            self.links.remove(idx);
        }
    }

    /// Replace every outgoing edge.
    pub fn set_links<I: IntoIterator<Item = Identifier>>(&mut self, links: I) {
        self.links.clear();
        for id in links {
            self.add_link(id);
        }
    }

    /// Read a node from its graph-file section, applying `transform` to the
    /// stored position. Returns `None` if the section name is not a node id.
    pub fn load(section: &DataSection, config: &GraphConfig, transform: &Matrix4<f32>) -> Option<Self> {
        let id = config.node_section_id(section.name())?;
        let stored = math::from_array(section.read_vector3("worldPosition", [0.0; 3]));
        let mut node = Self::new(id, math::apply_point(transform, stored));
        node.user_string = section.read_string("userString", "");
        for link in section.open_sections("link") {
            let to = link.read_string("to", "");
            match to.parse() {
                Ok(target) => node.add_link(target),
                Err(_) => warn!(node = %id, to = %to, "skipping graph link with an invalid target"),
            }
        }
        Some(node)
    }

    /// Write this node's fields into its graph-file section.
    pub fn save(&self, section: &mut DataSection) {
        section.write_vector3("worldPosition", math::to_array(self.world_position));
        section.write_string("userString", &self.user_string);
        for target in &self.links {
            section.new_section("link").write_string("to", &target.to_string());
        }
    }
}
