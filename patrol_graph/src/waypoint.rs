// Waypoint nodes: the editable, streamable half of a patrol graph.
//
// A `WaypointNode` lives in a spatial cell and belongs to one `StationGraph`.
// It keeps two views of its connections:
//
// - `preload_links`: neighbour id -> "can I traverse to it". This is the
//   persisted, authoritative record and survives streaming.
// - `links`: the materialised `Link` objects shared with neighbours that are
//   currently in memory.
//
// Linking is asymmetric per call. `set_link` only sets this node's preference;
// the caller is expected to make the mirror call on the other node. The node
// with the smaller id owns the link (it is the link's start, and its cell holds
// the link as a static item).
//
// Registration follows cell membership. `toss` is the cell's notification
// that the node entered or left: entering registers with the graph, leaving
// detaches materialised links from both ends and deregisters. Between `begin_move` and
// `end_move` those side effects are suppressed so moving between cells is not
// seen as a leave plus a join.
//
// Locking: node state is one `parking_lot::Mutex`. When two nodes are locked
// together they are locked in address order. Graph and cell calls are always
// made with no node lock held, because graphs read node state back.
//
// See also: `link.rs` for the shared link object, `graph.rs` for the runtime
// mirror this node keeps in sync.

use cgmath::Matrix4;
use parking_lot::{Mutex, MutexGuard};
use patrol_graph_data::DataSection;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::cell::{CellItem, CellRef, SpatialCell};
#[cfg(feature = "editor")]
use crate::error::ValidationError;
use crate::error::{GraphError, GraphResult};
use crate::graph::StationGraph;
use crate::link::Link;
use crate::math::{self, Position};
use crate::registry::GraphRegistry;
use crate::types::{Direction, Identifier};

pub struct WaypointNode {
    state: Mutex<NodeState>,
}

struct NodeState {
    id: Identifier,
    graph: Option<Arc<StationGraph>>,
    /// Cell-local.
    position: Position,
    user_string: String,
    preload_links: BTreeMap<Identifier, bool>,
    links: Vec<Arc<Link>>,
    move_count: u32,
    cell: Option<Weak<dyn SpatialCell>>,
    dirty: bool,
}

impl NodeState {
    fn cell(&self) -> Option<CellRef> {
        self.cell.as_ref().and_then(Weak::upgrade)
    }

    fn find_link(&self, other: &WaypointNode) -> Option<Arc<Link>> {
        self.links.iter().find(|l| l.references(other)).cloned()
    }

    fn holds(&self, link: &Arc<Link>) -> bool {
        self.links.iter().any(|l| Arc::ptr_eq(l, link))
    }

    fn drop_link(&mut self, link: &Arc<Link>) {
        self.links.retain(|l| !Arc::ptr_eq(l, link));
    }
}

/// Lock two distinct nodes in address order. Guards come back in argument
/// order.
fn lock_pair<'a>(
    a: &'a WaypointNode,
    b: &'a WaypointNode,
) -> (MutexGuard<'a, NodeState>, MutexGuard<'a, NodeState>) {
    if (a as *const WaypointNode) < (b as *const WaypointNode) {
        let first = a.state.lock();
        let second = b.state.lock();
        (first, second)
    } else {
        let second = b.state.lock();
        let first = a.state.lock();
        (first, second)
    }
}

impl WaypointNode {
    /// A fresh node with no graph, cell or links.
    pub fn new(id: Identifier) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NodeState {
                id,
                graph: None,
                position: math::from_array([0.0; 3]),
                user_string: String::new(),
                preload_links: BTreeMap::new(),
                links: Vec::new(),
                move_count: 0,
                cell: None,
                dirty: false,
            }),
        })
    }

    pub fn id(&self) -> Identifier {
        self.state.lock().id
    }

    /// Does not re-register; call `update_registration` afterwards if the
    /// node is already in a graph.
    pub fn set_id(&self, id: Identifier) {
        self.state.lock().id = id;
    }

    pub fn graph(&self) -> Option<Arc<StationGraph>> {
        self.state.lock().graph.clone()
    }

    /// Attach to a graph without registering. Use `update_registration` to
    /// register once the node is in a cell.
    pub fn set_graph(&self, graph: Option<Arc<StationGraph>>) {
        self.state.lock().graph = graph;
    }

    pub fn position(&self) -> Position {
        self.state.lock().position
    }

    pub fn set_position(&self, position: Position) {
        self.state.lock().position = position;
    }

    pub fn user_string(&self) -> String {
        self.state.lock().user_string.clone()
    }

    pub fn set_user_string(&self, user_string: impl Into<String>) {
        self.state.lock().user_string = user_string.into();
    }

    pub fn cell(&self) -> Option<CellRef> {
        self.state.lock().cell()
    }

    pub fn set_cell(&self, cell: Option<&CellRef>) {
        self.state.lock().cell = cell.map(Arc::downgrade);
    }

    /// Translation to the node's cell-local position.
    pub fn local_transform(&self) -> Matrix4<f32> {
        math::translation(self.position())
    }

    /// Position in world space: the cell transform applied to the local
    /// position, or the local position if the node has no cell.
    pub fn world_position(&self) -> Position {
        let (position, cell) = {
            let state = self.state.lock();
            (state.position, state.cell())
        };
        match cell {
            Some(cell) => math::apply_point(&cell.transform(), position),
            None => position,
        }
    }

    // -----------------------------------------------------------------------
    // Link queries
    // -----------------------------------------------------------------------

    /// Snapshot of the persisted neighbour map.
    pub fn preload_links(&self) -> BTreeMap<Identifier, bool> {
        self.state.lock().preload_links.clone()
    }

    /// Number of neighbours in the preload map, loaded or not.
    pub fn number_links(&self) -> usize {
        self.state.lock().preload_links.len()
    }

    pub fn is_linked_to(&self, other: Identifier) -> bool {
        self.state.lock().preload_links.contains_key(&other)
    }

    /// Whether this node may traverse to `other`. False if not linked.
    pub fn can_traverse(&self, other: Identifier) -> bool {
        self.state
            .lock()
            .preload_links
            .get(&other)
            .copied()
            .unwrap_or(false)
    }

    /// Materialised links, in creation order.
    pub fn links(&self) -> Vec<Arc<Link>> {
        self.state.lock().links.clone()
    }

    pub fn link_at(&self, idx: usize) -> Option<Arc<Link>> {
        self.state.lock().links.get(idx).cloned()
    }

    pub fn find_link(&self, other: &WaypointNode) -> Option<Arc<Link>> {
        self.state.lock().find_link(other)
    }

    // -----------------------------------------------------------------------
    // Link mutation
    // -----------------------------------------------------------------------

    /// Record that this node can (or cannot) traverse to `other`, creating
    /// the shared link if there is none yet. Only this node's direction bit
    /// changes; make the mirror call on `other` to set its side.
    ///
    /// Returns `None` (and changes nothing) when asked to link a node to
    /// itself.
    pub fn set_link(self: &Arc<Self>, other: &Arc<WaypointNode>, can_traverse: bool) -> Option<Arc<Link>> {
        if Arc::ptr_eq(self, other) {
            warn!(node = %self.id(), "refusing to link a node to itself");
            return None;
        }

        let (mut me, mut them) = lock_pair(self, other);
        // Links whose far end was dropped while streamed out.
        me.links.retain(|l| !l.is_dead());
        them.links.retain(|l| !l.is_dead());

        me.preload_links.insert(them.id, can_traverse);
        let owns = me.id < them.id;

        let (link, created) = match me.find_link(other).or_else(|| them.find_link(self)) {
            Some(link) => {
                if !me.holds(&link) {
                    me.links.push(link.clone());
                }
                if !them.holds(&link) {
                    them.links.push(link.clone());
                }
                (link, false)
            }
            None => {
                let link = if owns {
                    Link::new(self, other)
                } else {
                    Link::new(other, self)
                };
                me.links.push(link.clone());
                them.links.push(link.clone());
                (link, true)
            }
        };

        let bit = if owns {
            Direction::START_END
        } else {
            Direction::END_START
        };
        link.update_direction(bit, can_traverse);

        let owner_cell = if owns { me.cell() } else { them.cell() };
        let (my_id, other_id, graph) = (me.id, them.id, me.graph.clone());
        drop(me);
        drop(them);

        if created {
            if let Some(cell) = owner_cell {
                cell.add_static_item(CellItem::Link(link.clone()));
            }
            debug!(from = %my_id, to = %other_id, "created link");
        }
        if let Some(graph) = graph {
            graph.set_traversal(my_id, other_id, can_traverse);
        }
        Some(link)
    }

    /// Tear down `link`: it leaves both endpoints' link lists, both preload
    /// entries go, the owner's cell drops it, and it is left dead. A link
    /// that no longer joins this node (already removed, or someone else's)
    /// is ignored.
    pub fn remove_link(self: &Arc<Self>, link: &Arc<Link>) {
        if !link.references(self) {
            self.state.lock().drop_link(link);
            return;
        }
        let Some(other) = link.other_end(self) else {
            // The far end is gone, so only our side is left to clean up.
            let owner_cell = link
                .start_node()
                .filter(|start| Arc::ptr_eq(start, self))
                .and_then(|start| start.cell());
            self.state.lock().drop_link(link);
            if let Some(cell) = owner_cell {
                cell.del_static_item(&CellItem::Link(link.clone()));
            }
            link.clear_ends();
            return;
        };

        let (mut me, mut them) = lock_pair(self, &other);
        me.drop_link(link);
        them.drop_link(link);
        let (my_id, other_id) = (me.id, them.id);
        me.preload_links.remove(&other_id);
        them.preload_links.remove(&my_id);
        let owner_cell = if my_id < other_id { me.cell() } else { them.cell() };
        let graphs = [me.graph.clone(), them.graph.clone()];
        drop(me);
        drop(them);

        if let Some(cell) = owner_cell {
            cell.del_static_item(&CellItem::Link(link.clone()));
        }
        link.clear_ends();
        for graph in graphs.into_iter().flatten() {
            graph.remove_traversal_pair(my_id, other_id);
        }
        debug!(from = %my_id, to = %other_id, "removed link");
    }

    /// Remove the link to `other`, if there is one.
    pub fn remove_link_to(self: &Arc<Self>, other: &Arc<WaypointNode>) {
        if let Some(link) = self.find_link(other) {
            self.remove_link(&link);
        }
    }

    /// Remove the link to the node with id `other`, resolved through this
    /// node's graph, from both sides.
    #[cfg(feature = "editor")]
    pub fn remove_link_id(self: &Arc<Self>, other: Identifier) {
        let Some(graph) = self.graph() else {
            return;
        };
        let Some(other) = graph.get_node(other) else {
            return;
        };
        self.remove_link_to(&other);
        other.remove_link_to(self);
    }

    /// Remove every materialised link.
    #[cfg(feature = "editor")]
    pub fn unlink(self: &Arc<Self>) {
        loop {
            let first = self.state.lock().links.first().cloned();
            let Some(link) = first else {
                break;
            };
            self.remove_link(&link);
        }
    }

    /// Materialise links to every preloaded neighbour that is registered in
    /// this node's graph and in a cell, setting both sides' directions from
    /// their preload maps. Returns how many links were resolved.
    #[cfg(feature = "editor")]
    pub fn resolve_links(self: &Arc<Self>) -> usize {
        let Some(graph) = self.graph() else {
            return 0;
        };
        let my_id = self.id();
        let mut resolved = 0;
        for (other_id, traversable) in self.preload_links() {
            let Some(other) = graph.get_node(other_id) else {
                continue;
            };
            if Arc::ptr_eq(&other, self) || other.cell().is_none() {
                continue;
            }
            let Some(theirs) = other.preload_links().get(&my_id).copied() else {
                warn!(node = %my_id, other = %other_id, "neighbour does not list this node; not linking");
                continue;
            };
            self.set_link(&other, traversable);
            other.set_link(self, theirs);
            resolved += 1;
        }
        resolved
    }

    // -----------------------------------------------------------------------
    // Cell membership and registration
    // -----------------------------------------------------------------------

    /// Cell notification: the node now lives in `cell` (or in none).
    /// Outside a move, leaving detaches all materialised links and deregisters,
    /// and entering registers with the node's graph.
    pub fn toss(self: &Arc<Self>, cell: Option<&CellRef>) {
        let (graph, dropped, old_cell) = {
            let mut state = self.state.lock();
            let old_cell = state.cell();
            state.cell = cell.map(Arc::downgrade);
            if state.move_count > 0 {
                return;
            }
            let dropped = if cell.is_none() {
                std::mem::take(&mut state.links)
            } else {
                Vec::new()
            };
            (state.graph.clone(), dropped, old_cell)
        };
        for link in &dropped {
            self.detach_link(link, old_cell.as_ref());
        }
        let Some(graph) = graph else {
            return;
        };
        match cell {
            Some(cell) => graph.register_node(self, cell),
            None => graph.deregister_node(self),
        }
    }

    /// Take `link` out of the far end's list and the owner's cell and leave
    /// it dead. Preload maps are untouched so the link can be resolved again
    /// when this node comes back.
    fn detach_link(self: &Arc<Self>, link: &Arc<Link>, my_cell: Option<&CellRef>) {
        let owner_cell = match link.start_node() {
            Some(start) if Arc::ptr_eq(&start, self) => my_cell.cloned(),
            Some(start) => start.cell(),
            None => None,
        };
        if let Some(other) = link.other_end(self) {
            other.state.lock().drop_link(link);
        }
        if let Some(cell) = owner_cell {
            cell.del_static_item(&CellItem::Link(link.clone()));
        }
        link.clear_ends();
    }

    pub fn begin_move(&self) {
        self.state.lock().move_count += 1;
    }

    pub fn end_move(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.move_count > 0, "end_move without begin_move");
        state.move_count = state.move_count.saturating_sub(1);
    }

    pub fn is_moving(&self) -> bool {
        self.state.lock().move_count > 0
    }

    /// Deregister and re-register with the node's graph so its runtime node
    /// reflects the current id, position and links.
    pub fn update_registration(self: &Arc<Self>, cell: &CellRef) {
        if let Some(graph) = self.graph() {
            graph.deregister_node(self);
            graph.register_node(self, cell);
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Read the node from its per-cell section: `id`, `graph`, `position`,
    /// `userString` and any number of `link { to traversable }` children.
    /// The node joins (and registers with) the named graph from `registry`.
    pub fn load(
        self: &Arc<Self>,
        section: &DataSection,
        cell: &CellRef,
        registry: &GraphRegistry,
    ) -> GraphResult<()> {
        let id = self.load_name(section, cell, registry)?;

        let mut preload = BTreeMap::new();
        for link in section.open_sections("link") {
            let to = link.read_string("to", "");
            let Ok(target) = to.parse::<Identifier>() else {
                warn!(node = %id, to = %to, "skipping link with an invalid target");
                continue;
            };
            if target == id {
                warn!(node = %id, "skipping link to itself");
                continue;
            }
            preload.insert(target, link.read_bool("traversable", false));
        }

        {
            let mut state = self.state.lock();
            state.cell = Some(Arc::downgrade(cell));
            state.position = math::from_array(section.read_vector3("position", [0.0; 3]));
            state.user_string = section.read_string("userString", "");
            state.preload_links = preload;
        }
        self.update_registration(cell);
        Ok(())
    }

    /// Id and graph first, so the node is registered under its real id.
    fn load_name(
        self: &Arc<Self>,
        section: &DataSection,
        cell: &CellRef,
        registry: &GraphRegistry,
    ) -> GraphResult<Identifier> {
        let id = section
            .read_string("id", "")
            .parse::<Identifier>()
            .ok()
            .filter(|id| !id.is_zero())
            .ok_or(GraphError::MissingField {
                field: "id",
                id: Identifier::ZERO,
            })?;
        let graph_name = section
            .read_string("graph", "")
            .parse::<Identifier>()
            .ok()
            .filter(|name| !name.is_zero())
            .ok_or(GraphError::MissingField { field: "graph", id })?;

        if let Some(previous) = self.graph() {
            previous.deregister_node(self);
        }
        let graph = registry.get_graph(graph_name);
        {
            let mut state = self.state.lock();
            state.id = id;
            state.graph = Some(graph.clone());
        }
        graph.register_node(self, cell);
        Ok(id)
    }

    /// Build a node from its section and add it to `cell`.
    pub fn create(
        section: &DataSection,
        cell: &CellRef,
        registry: &GraphRegistry,
    ) -> GraphResult<Arc<Self>> {
        let node = Self::new(Identifier::ZERO);
        node.load(section, cell, registry)?;
        cell.add_static_item(CellItem::Node(node.clone()));
        #[cfg(feature = "editor")]
        node.resolve_links();
        Ok(node)
    }

    /// Write the per-cell section. Only links to neighbours that are
    /// registered and in a cell are written.
    #[cfg(feature = "editor")]
    pub fn save(&self, section: &mut DataSection) {
        let (id, position, graph, user_string, preload) = {
            let state = self.state.lock();
            (
                state.id,
                state.position,
                state.graph.clone(),
                state.user_string.clone(),
                state.preload_links.clone(),
            )
        };
        section.write_string("id", &id.to_string());
        section.write_vector3("position", math::to_array(position));
        if let Some(graph) = &graph {
            section.write_string("graph", &graph.name().to_string());
        }
        section.write_string("userString", &user_string);

        while section.delete_section("link") {}
        for (other, traversable) in preload {
            let live = graph
                .as_ref()
                .and_then(|g| g.get_node(other))
                .is_some_and(|n| n.cell().is_some());
            if !live {
                continue;
            }
            let link = section.new_section("link");
            link.write_string("to", &other.to_string());
            link.write_bool("traversable", traversable);
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Consistency check. The first failing check is returned.
    #[cfg(feature = "editor")]
    pub fn is_valid(&self) -> Result<(), ValidationError> {
        let (id, graph, links, preload, cell) = {
            let state = self.state.lock();
            (
                state.id,
                state.graph.clone(),
                state.links.clone(),
                state.preload_links.clone(),
                state.cell(),
            )
        };

        if id.is_zero() {
            return Err(ValidationError::InvalidId);
        }
        let Some(graph) = graph else {
            return Err(ValidationError::NotConnectedToGraph { node: id });
        };
        if links.len() != preload.len() {
            return Err(ValidationError::LinkCountMismatch {
                node: id,
                links: links.len(),
                preload: preload.len(),
            });
        }

        for link in &links {
            link.is_valid(id)?;
            let Some(other) = link.other_end(self) else {
                return Err(ValidationError::LinkNotAttached { node: id });
            };
            let other_id = other.id();
            let mine = preload.get(&other_id).copied();
            let theirs = other.preload_links().get(&id).copied();
            let (Some(mine), Some(theirs)) = (mine, theirs) else {
                return Err(ValidationError::PreloadMissingLink { node: id, other: other_id });
            };
            let (my_bit, their_bit) = if id < other_id {
                (Direction::START_END, Direction::END_START)
            } else {
                (Direction::END_START, Direction::START_END)
            };
            let direction = link.direction();
            if direction.contains(my_bit) != mine || direction.contains(their_bit) != theirs {
                return Err(ValidationError::WrongDirection { node: id, other: other_id });
            }
        }

        for &other_id in preload.keys() {
            let linked = links
                .iter()
                .any(|l| l.other_end(self).is_some_and(|o| o.id() == other_id));
            if !linked {
                return Err(ValidationError::PreloadWithoutLink { node: id, other: other_id });
            }
        }

        if graph.get_node(id).is_none() {
            return Err(ValidationError::NotRegistered {
                node: id,
                graph: graph.name(),
            });
        }
        if cell.is_none() {
            return Err(ValidationError::NotInCell { node: id });
        }
        Ok(())
    }

    /// Flag the node (and its cell) as needing a save.
    pub fn make_dirty(&self) {
        let cell = {
            let mut state = self.state.lock();
            state.dirty = true;
            state.cell()
        };
        if let Some(cell) = cell {
            cell.mark_dirty();
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn clear_dirty(&self) {
        self.state.lock().dirty = false;
    }
}

impl fmt::Debug for WaypointNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Some(state) => f
                .debug_struct("WaypointNode")
                .field("id", &state.id)
                .field("graph", &state.graph.as_ref().map(|g| g.name()))
                .field("position", &state.position)
                .field("links", &state.links.len())
                .field("preload_links", &state.preload_links)
                .finish(),
            None => f.write_str("WaypointNode { <locked> }"),
        }
    }
}

impl Drop for WaypointNode {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(graph) = state.graph.take() {
            graph.forget_node(state.id);
        }
    }
}
