// Spatial containers ("cells") and the mappings that own them.
//
// The graph does not stream anything itself. It talks to two collaborator
// traits:
//
// - `SpatialCell`: one streaming unit. It owns waypoint nodes and the links
//   they materialise (as `CellItem`s), knows its local-to-world transform,
//   and notifies nodes through `WaypointNode::toss` as they stream in and out.
// - `CellMapping`: the space a cell belongs to. It supplies the base path for
//   graph files, the transform applied to graph files on load, and a way to
//   force the outside cell covering a world position into memory.
//
// `MemoryCell` and `MemoryMapping` are straightforward in-memory versions,
// enough for tools that build graphs directly and for the tests.
//
// `move_node` relocates a node between cells as one logical operation: the
// remove and re-add are bracketed by `begin_move`/`end_move` so the node does
// not deregister and re-register with its graph halfway through.

use cgmath::Matrix4;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::config::DEFAULT_GRID_RESOLUTION;
use crate::link::Link;
use crate::math::{self, Position};
use crate::waypoint::WaypointNode;

/// Something a cell holds.
#[derive(Clone, Debug)]
pub enum CellItem {
    Link(Arc<Link>),
    Node(Arc<WaypointNode>),
}

pub type CellRef = Arc<dyn SpatialCell>;

pub trait SpatialCell: Send + Sync {
    fn identifier(&self) -> &str;

    /// Cell-local to world transform.
    fn transform(&self) -> Matrix4<f32>;

    fn mapping(&self) -> Arc<dyn CellMapping>;

    fn add_static_item(&self, item: CellItem);

    fn del_static_item(&self, item: &CellItem);

    /// The cell's persisted contents are out of date.
    fn mark_dirty(&self);
}

pub trait CellMapping: Send + Sync {
    /// Directory holding this space's graph files.
    fn path(&self) -> &Path;

    /// Applied to every position read from a graph file.
    fn transform(&self) -> Matrix4<f32>;

    /// Identifier of the outside cell covering `world`, if any.
    fn outside_cell_identifier(&self, world: Position) -> Option<String>;

    /// Load the named cell synchronously.
    fn load_cell_now(&self, identifier: &str);
}

/// Move `node` from one cell to another without the graph seeing it leave.
pub fn move_node(node: &Arc<WaypointNode>, from: &CellRef, to: &CellRef) {
    node.begin_move();
    from.del_static_item(&CellItem::Node(node.clone()));
    to.add_static_item(CellItem::Node(node.clone()));
    node.end_move();
    node.update_registration(to);
    to.mark_dirty();
    from.mark_dirty();
}

// ---------------------------------------------------------------------------
// In-memory cell
// ---------------------------------------------------------------------------

pub struct MemoryCell {
    me: Weak<MemoryCell>,
    identifier: String,
    transform: Matrix4<f32>,
    mapping: Arc<dyn CellMapping>,
    nodes: Mutex<Vec<Arc<WaypointNode>>>,
    links: Mutex<Vec<Arc<Link>>>,
    dirty: AtomicBool,
}

impl MemoryCell {
    pub fn new(
        identifier: impl Into<String>,
        transform: Matrix4<f32>,
        mapping: Arc<dyn CellMapping>,
    ) -> Arc<Self> {
        let identifier = identifier.into();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            identifier,
            transform,
            mapping,
            nodes: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
        })
    }

    /// This cell as a trait object.
    pub fn cell_ref(&self) -> Option<CellRef> {
        self.me.upgrade().map(|cell| cell as CellRef)
    }

    pub fn nodes(&self) -> Vec<Arc<WaypointNode>> {
        self.nodes.lock().clone()
    }

    /// Links materialised in this cell.
    pub fn links(&self) -> Vec<Arc<Link>> {
        self.links.lock().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Stream the cell out: every node is tossed out for good and dropped.
    pub fn unload(&self) {
        let nodes = std::mem::take(&mut *self.nodes.lock());
        for node in &nodes {
            node.toss(None);
        }
        self.links.lock().clear();
    }
}

impl fmt::Debug for MemoryCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCell")
            .field("identifier", &self.identifier)
            .field("nodes", &self.nodes.lock().len())
            .field("links", &self.links.lock().len())
            .finish()
    }
}

impl SpatialCell for MemoryCell {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn transform(&self) -> Matrix4<f32> {
        self.transform
    }

    fn mapping(&self) -> Arc<dyn CellMapping> {
        self.mapping.clone()
    }

    fn add_static_item(&self, item: CellItem) {
        match item {
            CellItem::Link(link) => self.links.lock().push(link),
            CellItem::Node(node) => {
                self.nodes.lock().push(node.clone());
                let cell = self.cell_ref();
                node.toss(cell.as_ref());
            }
        }
    }

    fn del_static_item(&self, item: &CellItem) {
        match item {
            CellItem::Link(link) => self.links.lock().retain(|l| !Arc::ptr_eq(l, link)),
            CellItem::Node(node) => {
                self.nodes.lock().retain(|n| !Arc::ptr_eq(n, node));
                node.toss(None);
            }
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// In-memory mapping
// ---------------------------------------------------------------------------

type CellLoader = Arc<dyn Fn(&str) + Send + Sync>;

pub struct MemoryMapping {
    path: PathBuf,
    transform: Matrix4<f32>,
    grid_resolution: f32,
    loader: Mutex<Option<CellLoader>>,
    requested: Mutex<Vec<String>>,
}

impl MemoryMapping {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Self::with_transform(path, math::identity())
    }

    pub fn with_transform(path: impl Into<PathBuf>, transform: Matrix4<f32>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            transform,
            grid_resolution: DEFAULT_GRID_RESOLUTION,
            loader: Mutex::new(None),
            requested: Mutex::new(Vec::new()),
        })
    }

    /// Install the callback `load_cell_now` uses to bring a cell in.
    pub fn set_loader<F: Fn(&str) + Send + Sync + 'static>(&self, loader: F) {
        *self.loader.lock() = Some(Arc::new(loader));
    }

    /// Every cell identifier `load_cell_now` has been asked for, in order.
    pub fn requested_cells(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

impl fmt::Debug for MemoryMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMapping")
            .field("path", &self.path)
            .field("grid_resolution", &self.grid_resolution)
            .finish()
    }
}

impl CellMapping for MemoryMapping {
    fn path(&self) -> &Path {
        &self.path
    }

    fn transform(&self) -> Matrix4<f32> {
        self.transform
    }

    /// Outside cells are named by their grid coordinates, e.g. `0000ffffo`.
    fn outside_cell_identifier(&self, world: Position) -> Option<String> {
        if !world.x.is_finite() || !world.z.is_finite() {
            return None;
        }
        let gx = (world.x / self.grid_resolution).floor() as i16;
        let gz = (world.z / self.grid_resolution).floor() as i16;
        Some(format!("{:04x}{:04x}o", gx as u16, gz as u16))
    }

    fn load_cell_now(&self, identifier: &str) {
        self.requested.lock().push(identifier.to_string());
        let loader = self.loader.lock().clone();
        if let Some(loader) = loader {
            loader(identifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identifier;
    use cgmath::Point3;

    #[test]
    fn outside_cell_identifiers_follow_the_grid() {
        let mapping = MemoryMapping::new("space");
        assert_eq!(
            mapping.outside_cell_identifier(Point3::new(50.0, 0.0, 50.0)).as_deref(),
            Some("00000000o")
        );
        assert_eq!(
            mapping.outside_cell_identifier(Point3::new(150.0, 9.0, -50.0)).as_deref(),
            Some("0001ffffo")
        );
        assert_eq!(mapping.outside_cell_identifier(Point3::new(f32::NAN, 0.0, 0.0)), None);
    }

    #[test]
    fn load_cell_now_records_and_calls_loader() {
        let mapping = MemoryMapping::new("space");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        mapping.set_loader(move |id| sink.lock().push(id.to_string()));
        mapping.load_cell_now("00000000o");
        mapping.load_cell_now("00010000o");
        assert_eq!(mapping.requested_cells(), vec!["00000000o", "00010000o"]);
        assert_eq!(*seen.lock(), vec!["00000000o", "00010000o"]);
    }

    #[test]
    fn cell_tracks_links_and_dirtiness() {
        let mapping = MemoryMapping::new("space");
        let cell = MemoryCell::new("c", math::identity(), mapping);
        let a = WaypointNode::new(Identifier::from_u128(0xA));
        let b = WaypointNode::new(Identifier::from_u128(0xB));
        let link = Link::new(&a, &b);
        cell.add_static_item(CellItem::Link(link.clone()));
        assert_eq!(cell.links().len(), 1);
        cell.del_static_item(&CellItem::Link(link));
        assert!(cell.links().is_empty());

        assert!(!cell.is_dirty());
        cell.mark_dirty();
        assert!(cell.is_dirty());
        cell.clear_dirty();
        assert!(!cell.is_dirty());
    }

    #[test]
    fn adding_a_node_sets_its_cell() {
        let mapping = MemoryMapping::new("space");
        let cell = MemoryCell::new("c", math::identity(), mapping);
        let node = WaypointNode::new(Identifier::from_u128(0xA));
        cell.add_static_item(CellItem::Node(node.clone()));
        assert_eq!(node.cell().unwrap().identifier(), "c");
        assert_eq!(cell.nodes().len(), 1);

        cell.unload();
        assert!(cell.nodes().is_empty());
        assert!(node.cell().is_none());
    }
}
