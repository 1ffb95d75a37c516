// Station graphs: the runtime view of one patrol network.
//
// A `StationGraph` is named by an `Identifier` and holds a `RuntimeNode` per
// node id. Runtime nodes are what traversal queries read, and they exist
// whether or not the waypoint nodes they mirror are streamed in. Editor builds
// also keep a weak map of the live `WaypointNode`s registered with the graph,
// which drives saving, merging and validation.
//
// Lifecycle: a graph starts `NotReady`. The first node to register activates
// it: the graph builds its file path from the registering cell's mapping,
// loads that file (with the mapping's transform applied to positions), and
// becomes `Ready` whether or not the load succeeded. Activation happens
// exactly once, under its own mutex, so concurrent first registrations do not
// load twice.
//
// Locking: node maps sit behind one `RwLock`; queries take it shared, edits
// exclusive. It is never held across file I/O or while calling into a
// waypoint node.
//
// On disk a graph is one document named `<graph id>.<ext>` (lower-cased) under
// the mapping's path. See `runtime.rs` for the per-node section format.

use cgmath::Matrix4;
use parking_lot::{Mutex, RwLock};
use patrol_graph_data::Document;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

#[cfg(feature = "editor")]
use std::collections::BTreeSet;
#[cfg(feature = "editor")]
use std::sync::Weak;
#[cfg(feature = "editor")]
use tracing::warn;

use crate::cell::CellRef;
#[cfg(feature = "editor")]
use crate::cell::CellMapping;
use crate::config::GraphConfig;
#[cfg(feature = "editor")]
use crate::error::ValidationError;
use crate::error::{GraphError, GraphResult};
use crate::math::{self, Position};
use crate::runtime::RuntimeNode;
use crate::types::Identifier;
use crate::waypoint::WaypointNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    NotReady,
    Ready,
}

#[derive(Default)]
struct Activation {
    ready: bool,
    file_path: Option<PathBuf>,
}

#[derive(Default)]
struct NodeMaps {
    runtime: BTreeMap<Identifier, RuntimeNode>,
    #[cfg(feature = "editor")]
    editable: BTreeMap<Identifier, Weak<WaypointNode>>,
}

pub struct StationGraph {
    name: Identifier,
    config: GraphConfig,
    activation: Mutex<Activation>,
    nodes: RwLock<NodeMaps>,
}

/// World position of a node in `cell`: the cell transform composed with the
/// node's local transform, applied to the origin.
#[cfg(feature = "editor")]
fn node_world_position(node: &WaypointNode, cell: &CellRef) -> Position {
    let world = cell.transform() * node.local_transform();
    math::apply_point(&world, math::from_array([0.0; 3]))
}

impl StationGraph {
    pub fn new(name: Identifier, config: GraphConfig) -> Self {
        Self {
            name,
            config,
            activation: Mutex::new(Activation::default()),
            nodes: RwLock::new(NodeMaps::default()),
        }
    }

    pub fn name(&self) -> Identifier {
        self.name
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.activation.lock().ready {
            ReadyState::Ready
        } else {
            ReadyState::NotReady
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready_state() == ReadyState::Ready
    }

    /// Set on activation.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.activation.lock().file_path.clone()
    }

    /// Point the graph at `<base>/<name>.<ext>`.
    pub fn construct_file_path(&self, base: &Path) -> PathBuf {
        let path = self.config.graph_file_path(base, self.name);
        self.activation.lock().file_path = Some(path.clone());
        path
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().runtime.len()
    }

    /// Snapshot of one runtime node.
    pub fn node(&self, id: Identifier) -> Option<RuntimeNode> {
        self.nodes.read().runtime.get(&id).cloned()
    }

    /// Snapshot of every runtime node, ordered by id.
    pub fn runtime_nodes(&self) -> Vec<RuntimeNode> {
        self.nodes.read().runtime.values().cloned().collect()
    }

    /// Insert or replace a runtime node directly.
    pub fn add_node(&self, node: RuntimeNode) {
        self.nodes.write().runtime.insert(node.id, node);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whether `src` has a traversable edge to `dst`. False if `src` is
    /// unknown.
    pub fn can_traverse_from(&self, src: Identifier, dst: Identifier) -> bool {
        self.nodes
            .read()
            .runtime
            .get(&src)
            .is_some_and(|n| n.has_traversable_link_to(dst))
    }

    /// The ids `src` can traverse to. Empty (and logged) if `src` is unknown.
    pub fn traversable_nodes(&self, src: Identifier) -> Vec<Identifier> {
        match self.nodes.read().runtime.get(&src) {
            Some(node) => node.links().to_vec(),
            None => {
                error!(graph = %self.name, node = %src, "traversable_nodes: no such node");
                Vec::new()
            }
        }
    }

    pub fn world_position(&self, id: Identifier) -> Option<Position> {
        self.nodes.read().runtime.get(&id).map(|n| n.world_position)
    }

    /// The runtime node closest to `position`, or `Identifier::ZERO` if the
    /// graph is empty. Ties between equidistant nodes go to any of them.
    pub fn nearest_node(&self, position: Position) -> Identifier {
        self.nodes
            .read()
            .runtime
            .values()
            .map(|n| (n.id, math::distance_squared(n.world_position, position)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(Identifier::ZERO, |(id, _)| id)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a waypoint node that lives in `cell`. Activates the graph on
    /// first use. In editor builds this also upserts the node's runtime
    /// mirror from its current position, label and traversable links, so
    /// registering twice leaves one entry.
    #[cfg_attr(not(feature = "editor"), allow(unused_variables))]
    pub fn register_node(&self, node: &Arc<WaypointNode>, cell: &CellRef) {
        self.activate(cell);

        #[cfg(feature = "editor")]
        {
            let id = node.id();
            let world_position = node_world_position(node, cell);
            let user_string = node.user_string();
            let outgoing: Vec<Identifier> = node
                .preload_links()
                .into_iter()
                .filter_map(|(other, traversable)| traversable.then_some(other))
                .collect();

            let mut nodes = self.nodes.write();
            nodes.editable.insert(id, Arc::downgrade(node));
            let runtime = nodes
                .runtime
                .entry(id)
                .or_insert_with(|| RuntimeNode::new(id, world_position));
            runtime.world_position = world_position;
            runtime.user_string = user_string;
            runtime.set_links(outgoing);
        }
    }

    /// Drop a node's editable entry and runtime mirror. A no-op for nodes
    /// that are not registered, and outside editor builds.
    #[cfg_attr(not(feature = "editor"), allow(unused_variables))]
    pub fn deregister_node(&self, node: &WaypointNode) {
        #[cfg(feature = "editor")]
        {
            let id = node.id();
            let mut nodes = self.nodes.write();
            if nodes.editable.remove(&id).is_some() {
                nodes.runtime.remove(&id);
            }
        }
    }

    /// A node registered under `id` was dropped without deregistering.
    /// Entries for a live node re-registered under the same id are kept.
    #[cfg_attr(not(feature = "editor"), allow(unused_variables))]
    pub(crate) fn forget_node(&self, id: Identifier) {
        #[cfg(feature = "editor")]
        {
            let mut nodes = self.nodes.write();
            let dead = nodes
                .editable
                .get(&id)
                .is_some_and(|weak| weak.strong_count() == 0);
            if dead {
                nodes.editable.remove(&id);
                nodes.runtime.remove(&id);
                debug!(graph = %self.name, node = %id, "forgot dropped node");
            }
        }
    }

    /// Mirror one node's traversal preference into its runtime node.
    pub(crate) fn set_traversal(&self, from: Identifier, to: Identifier, traversable: bool) {
        if let Some(node) = self.nodes.write().runtime.get_mut(&from) {
            if traversable {
                node.add_link(to);
            } else {
                node.del_link(to);
            }
        }
    }

    /// Drop the runtime edges between `a` and `b` in both directions.
    pub(crate) fn remove_traversal_pair(&self, a: Identifier, b: Identifier) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.runtime.get_mut(&a) {
            node.del_link(b);
        }
        if let Some(node) = nodes.runtime.get_mut(&b) {
            node.del_link(a);
        }
    }

    fn activate(&self, cell: &CellRef) {
        let mut activation = self.activation.lock();
        if activation.ready {
            return;
        }
        let mapping = cell.mapping();
        let path = self.config.graph_file_path(mapping.path(), self.name);
        activation.file_path = Some(path.clone());
        // A failed load still leaves the graph usable (and empty).
        let _ = self.load_file(&path, &mapping.transform());
        activation.ready = true;
        info!(graph = %self.name, path = %path.display(), "graph activated");
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load runtime nodes from the graph file, applying `transform` to every
    /// stored position. A missing file loads as empty. Returns how many nodes
    /// were read.
    pub fn load(&self, transform: &Matrix4<f32>) -> GraphResult<usize> {
        let path = self
            .file_path()
            .ok_or(GraphError::NoFilePath { graph: self.name })?;
        self.load_file(&path, transform)
    }

    fn load_file(&self, path: &Path, transform: &Matrix4<f32>) -> GraphResult<usize> {
        let doc = Document::open_or_create(path)
            .inspect_err(|err| error!(graph = %self.name, %err, "failed to open graph file"))?;
        let mut loaded = Vec::new();
        for section in doc.root().children() {
            match RuntimeNode::load(section, &self.config, transform) {
                Some(node) => loaded.push(node),
                None => debug!(graph = %self.name, section = section.name(), "skipping non-node section"),
            }
        }
        let count = loaded.len();
        let mut nodes = self.nodes.write();
        for node in loaded {
            nodes.runtime.insert(node.id, node);
        }
        debug!(graph = %self.name, count, "loaded graph nodes");
        Ok(count)
    }

    /// Write the graph file. Returns `Ok(false)` without touching disk if the
    /// graph was never activated.
    ///
    /// With no runtime nodes the file is deleted. Otherwise sections for ids
    /// the graph no longer knows are dropped, every live, celled waypoint
    /// node refreshes its runtime node (world position, label, outgoing
    /// links), and those runtime nodes are written out. Runtime nodes whose
    /// waypoint is streamed out keep whatever is already on disk.
    #[cfg(feature = "editor")]
    pub fn save(&self) -> GraphResult<bool> {
        let path = {
            let activation = self.activation.lock();
            if !activation.ready {
                return Ok(false);
            }
            activation.file_path.clone()
        };
        let path = path.ok_or(GraphError::NoFilePath { graph: self.name })?;

        let (known, editable): (BTreeSet<Identifier>, Vec<Weak<WaypointNode>>) = {
            let nodes = self.nodes.read();
            (
                nodes.runtime.keys().copied().collect(),
                nodes.editable.values().cloned().collect(),
            )
        };

        if known.is_empty() {
            Document::new(&path).remove()?;
            info!(graph = %self.name, "graph is empty, removed its file");
            return Ok(true);
        }

        let mut doc = Document::open_or_create(&path)?;
        let config = &self.config;
        doc.root_mut().retain_children(|section| {
            config
                .node_section_id(section.name())
                .is_none_or(|id| known.contains(&id))
        });

        let mut written = 0;
        for weak in editable {
            let Some(node) = weak.upgrade() else {
                continue;
            };
            let Some(cell) = node.cell() else {
                continue;
            };
            let id = node.id();
            let world_position = node_world_position(&node, &cell);
            let user_string = node.user_string();
            let preload = node.preload_links();

            let runtime = {
                let mut nodes = self.nodes.write();
                let Some(runtime) = nodes.runtime.get_mut(&id) else {
                    warn!(graph = %self.name, node = %id, "live node has no runtime node");
                    continue;
                };
                runtime.world_position = world_position;
                runtime.user_string = user_string;
                for (other, traversable) in preload {
                    if traversable {
                        runtime.add_link(other);
                    } else {
                        runtime.del_link(other);
                    }
                }
                runtime.clone()
            };

            if let Some(section) = doc.root_mut().open_section(&config.node_section_name(id), true) {
                section.del_children();
                runtime.save(section);
                written += 1;
            }
        }

        if doc.root().is_empty() {
            doc.remove()?;
        } else {
            doc.save()?;
        }
        info!(graph = %self.name, written, "saved graph");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Editor operations
    // -----------------------------------------------------------------------

    /// Replace a runtime node's outgoing links. False if the node is unknown.
    #[cfg(feature = "editor")]
    pub fn update_node_ids(&self, id: Identifier, links: &[Identifier]) -> bool {
        match self.nodes.write().runtime.get_mut(&id) {
            Some(node) => {
                node.set_links(links.iter().copied());
                true
            }
            None => false,
        }
    }

    /// The live waypoint node registered under `id`.
    #[cfg(feature = "editor")]
    pub fn get_node(&self, id: Identifier) -> Option<Arc<WaypointNode>> {
        self.nodes.read().editable.get(&id).and_then(Weak::upgrade)
    }

    /// Every live registered waypoint node, ordered by id.
    #[cfg(feature = "editor")]
    pub fn all_nodes(&self) -> Vec<Arc<WaypointNode>> {
        self.nodes
            .read()
            .editable
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Whether a node with `node`'s id is registered.
    #[cfg(feature = "editor")]
    pub fn is_registered(&self, node: &WaypointNode) -> bool {
        self.is_registered_id(node.id())
    }

    #[cfg(feature = "editor")]
    pub fn is_registered_id(&self, id: Identifier) -> bool {
        self.nodes.read().editable.contains_key(&id)
    }

    /// Force-load the outside cell under every runtime node, so all of the
    /// graph's waypoint nodes are in memory. Positions are snapped to the
    /// centre of their grid square; consecutive duplicates are requested
    /// once. Returns the cell identifiers requested, in order.
    #[cfg(feature = "editor")]
    pub fn load_all_cells(&self, mapping: &dyn CellMapping) -> Vec<String> {
        let positions: Vec<Position> = self
            .nodes
            .read()
            .runtime
            .values()
            .map(|n| n.world_position)
            .collect();

        let res = self.config.grid_resolution;
        let centre = |v: f32| (v / res).floor() * res + res / 2.0;
        let mut cells: Vec<String> = Vec::new();
        for pos in positions {
            let snapped = math::from_array([centre(pos.x), 0.0, centre(pos.z)]);
            let Some(name) = mapping.outside_cell_identifier(snapped) else {
                continue;
            };
            if cells.last() != Some(&name) {
                cells.push(name);
            }
        }
        for name in &cells {
            mapping.load_cell_now(name);
        }
        debug!(graph = %self.name, cells = cells.len(), "loaded cells for graph");
        cells
    }

    /// The live node count must match the runtime node count, and every
    /// live node must be valid.
    #[cfg(feature = "editor")]
    pub fn is_valid(&self) -> Result<(), ValidationError> {
        let (runtime, live) = {
            let nodes = self.nodes.read();
            let live: Vec<Arc<WaypointNode>> =
                nodes.editable.values().filter_map(Weak::upgrade).collect();
            (nodes.runtime.len(), live)
        };
        if live.len() != runtime {
            return Err(ValidationError::NodeCountMismatch {
                graph: self.name,
                editable: live.len(),
                runtime,
            });
        }
        live.iter().try_for_each(|node| node.is_valid())
    }
}

impl fmt::Debug for StationGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationGraph")
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellItem, MemoryCell, MemoryMapping};
    use cgmath::Point3;

    fn id(v: u128) -> Identifier {
        Identifier::from_u128(v)
    }

    fn runtime(v: u128, pos: [f32; 3], links: &[u128]) -> RuntimeNode {
        let mut node = RuntimeNode::new(id(v), math::from_array(pos));
        node.set_links(links.iter().map(|&l| id(l)));
        node
    }

    #[test]
    fn queries_read_runtime_nodes() {
        let graph = StationGraph::new(id(1), GraphConfig::default());
        graph.add_node(runtime(0xA, [0.0, 0.0, 0.0], &[0xB]));
        graph.add_node(runtime(0xB, [10.0, 0.0, 0.0], &[]));

        assert!(graph.can_traverse_from(id(0xA), id(0xB)));
        assert!(!graph.can_traverse_from(id(0xB), id(0xA)));
        assert!(!graph.can_traverse_from(id(0xC), id(0xA)));
        assert_eq!(graph.traversable_nodes(id(0xA)), vec![id(0xB)]);
        assert!(graph.traversable_nodes(id(0xC)).is_empty());
        assert_eq!(graph.world_position(id(0xB)), Some(Point3::new(10.0, 0.0, 0.0)));
        assert_eq!(graph.world_position(id(0xC)), None);
    }

    #[test]
    fn nearest_node_picks_the_closest() {
        let graph = StationGraph::new(id(1), GraphConfig::default());
        assert_eq!(graph.nearest_node(Point3::new(0.0, 0.0, 0.0)), Identifier::ZERO);

        graph.add_node(runtime(0xA, [0.0, 0.0, 0.0], &[]));
        graph.add_node(runtime(0xB, [10.0, 0.0, 0.0], &[]));
        assert_eq!(graph.nearest_node(Point3::new(7.0, 3.0, 0.0)), id(0xB));
        assert_eq!(graph.nearest_node(Point3::new(-1.0, 0.0, 0.0)), id(0xA));
        let tied = graph.nearest_node(Point3::new(5.0, 0.0, 0.0));
        assert!(tied == id(0xA) || tied == id(0xB));
    }

    #[test]
    fn first_registration_activates_once() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(StationGraph::new(id(0x6), GraphConfig::default()));
        assert_eq!(graph.ready_state(), ReadyState::NotReady);
        assert!(graph.file_path().is_none());

        let cell = MemoryCell::new("c", math::identity(), MemoryMapping::new(dir.path()));
        let cell: CellRef = cell;
        let a = WaypointNode::new(id(0xA));
        a.set_graph(Some(graph.clone()));
        cell.add_static_item(CellItem::Node(a.clone()));

        assert!(graph.is_ready());
        assert_eq!(
            graph.file_path(),
            Some(GraphConfig::default().graph_file_path(dir.path(), id(0x6)))
        );
    }

    #[test]
    fn load_without_a_path_fails() {
        let graph = StationGraph::new(id(1), GraphConfig::default());
        let err = graph.load(&math::identity()).unwrap_err();
        assert!(matches!(err, GraphError::NoFilePath { .. }));
    }

    #[test]
    fn load_applies_the_transform() {
        let dir = tempfile::tempdir().unwrap();
        let config = GraphConfig::default();
        let path = config.graph_file_path(dir.path(), id(1));
        let mut doc = Document::new(&path);
        runtime(0xA, [1.0, 0.0, 1.0], &[0xB])
            .save(doc.root_mut().new_section(&config.node_section_name(id(0xA))));
        doc.save().unwrap();

        let graph = StationGraph::new(id(1), config);
        graph.construct_file_path(dir.path());
        let shift = math::translation(Point3::new(100.0, 0.0, 0.0));
        assert_eq!(graph.load(&shift).unwrap(), 1);
        assert_eq!(graph.world_position(id(0xA)), Some(Point3::new(101.0, 0.0, 1.0)));
        assert!(graph.can_traverse_from(id(0xA), id(0xB)));
    }

    #[cfg(feature = "editor")]
    #[test]
    fn save_before_activation_is_a_no_op() {
        let graph = StationGraph::new(id(1), GraphConfig::default());
        assert!(!graph.save().unwrap());
    }

    #[cfg(feature = "editor")]
    #[test]
    fn update_node_ids_replaces_links() {
        let graph = StationGraph::new(id(1), GraphConfig::default());
        graph.add_node(runtime(0xA, [0.0; 3], &[0xB]));
        assert!(graph.update_node_ids(id(0xA), &[id(0xC), id(0xD)]));
        assert_eq!(graph.traversable_nodes(id(0xA)), vec![id(0xC), id(0xD)]);
        assert!(!graph.update_node_ids(id(0xF), &[]));
    }

    #[cfg(feature = "editor")]
    #[test]
    fn registration_uses_the_cell_transform() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(StationGraph::new(id(0x6), GraphConfig::default()));
        let shift = math::translation(Point3::new(100.0, 0.0, 200.0));
        let cell: CellRef = MemoryCell::new("c", shift, MemoryMapping::new(dir.path()));
        let a = WaypointNode::new(id(0xA));
        a.set_position(Point3::new(1.0, 2.0, 3.0));
        a.set_graph(Some(graph.clone()));
        cell.add_static_item(CellItem::Node(a.clone()));

        assert_eq!(graph.world_position(id(0xA)), Some(Point3::new(101.0, 2.0, 203.0)));
        assert!(graph.is_registered(&a));
        assert!(Arc::ptr_eq(&graph.get_node(id(0xA)).unwrap(), &a));
    }

    #[cfg(feature = "editor")]
    #[test]
    fn dropping_a_node_forgets_it() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(StationGraph::new(id(0x6), GraphConfig::default()));
        let cell: CellRef = MemoryCell::new("c", math::identity(), MemoryMapping::new(dir.path()));
        {
            let a = WaypointNode::new(id(0xA));
            a.set_graph(Some(graph.clone()));
            a.toss(Some(&cell));
            assert_eq!(graph.node_count(), 1);
        }
        assert_eq!(graph.node_count(), 0);
        assert!(!graph.is_registered_id(id(0xA)));
    }

    #[cfg(feature = "editor")]
    #[test]
    fn load_all_cells_requests_each_cell_once_in_a_row() {
        let mapping = MemoryMapping::new("space");
        let graph = StationGraph::new(id(1), GraphConfig::default());
        graph.add_node(runtime(0xA, [10.0, 0.0, 10.0], &[]));
        graph.add_node(runtime(0xB, [90.0, 5.0, 20.0], &[]));
        graph.add_node(runtime(0xC, [150.0, 0.0, -20.0], &[]));

        let cells = graph.load_all_cells(mapping.as_ref());
        assert_eq!(cells, vec!["00000000o", "0001ffffo"]);
        assert_eq!(mapping.requested_cells(), cells);
    }
}
