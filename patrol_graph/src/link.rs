// Materialised links between waypoint nodes.
//
// A `Link` is shared (`Arc`) by the two nodes it joins and by the cell of its
// owning node, which holds it as a static item. It refers back to its
// endpoints weakly, so a link never keeps a node alive. The start node is
// always the endpoint with the smaller identifier (the owner); `direction`
// records which ways the link may be traversed relative to start and end.
//
// Links are created and torn down only by `WaypointNode::set_link` and
// `WaypointNode::remove_link`. After removal both endpoints are cleared and
// the link is dead.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::error::ValidationError;
use crate::types::{Direction, Identifier};
use crate::waypoint::WaypointNode;

#[derive(Debug)]
pub struct Link {
    state: Mutex<LinkState>,
}

#[derive(Debug)]
struct LinkState {
    start: Weak<WaypointNode>,
    end: Weak<WaypointNode>,
    direction: Direction,
}

impl Link {
    /// A new link from `start` to `end`, traversable in neither direction.
    pub(crate) fn new(start: &Arc<WaypointNode>, end: &Arc<WaypointNode>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LinkState {
                start: Arc::downgrade(start),
                end: Arc::downgrade(end),
                direction: Direction::NONE,
            }),
        })
    }

    pub fn start_node(&self) -> Option<Arc<WaypointNode>> {
        self.state.lock().start.upgrade()
    }

    pub fn end_node(&self) -> Option<Arc<WaypointNode>> {
        self.state.lock().end.upgrade()
    }

    /// Both endpoints, start first.
    pub fn endpoints(&self) -> (Option<Arc<WaypointNode>>, Option<Arc<WaypointNode>>) {
        let state = self.state.lock();
        (state.start.upgrade(), state.end.upgrade())
    }

    pub fn direction(&self) -> Direction {
        self.state.lock().direction
    }

    pub fn set_direction(&self, direction: Direction) {
        self.state.lock().direction = direction;
    }

    /// Set or clear one direction bit.
    pub(crate) fn update_direction(&self, bit: Direction, traversable: bool) {
        let mut state = self.state.lock();
        state.direction = if traversable {
            state.direction.with(bit)
        } else {
            state.direction.without(bit)
        };
    }

    /// Whether `node` is one of this link's endpoints.
    pub fn references(&self, node: &WaypointNode) -> bool {
        let state = self.state.lock();
        std::ptr::eq(state.start.as_ptr(), node) || std::ptr::eq(state.end.as_ptr(), node)
    }

    /// The endpoint that is not `node`, if it is still alive.
    pub fn other_end(&self, node: &WaypointNode) -> Option<Arc<WaypointNode>> {
        let state = self.state.lock();
        if std::ptr::eq(state.start.as_ptr(), node) {
            state.end.upgrade()
        } else if std::ptr::eq(state.end.as_ptr(), node) {
            state.start.upgrade()
        } else {
            None
        }
    }

    /// A link is dead once either endpoint is gone.
    pub fn is_dead(&self) -> bool {
        let state = self.state.lock();
        state.start.strong_count() == 0 || state.end.strong_count() == 0
    }

    /// Detach both endpoints.
    pub(crate) fn clear_ends(&self) {
        let mut state = self.state.lock();
        state.start = Weak::new();
        state.end = Weak::new();
    }

    /// Both endpoints must still resolve. `node` is only used to name the
    /// failure.
    pub fn is_valid(&self, node: Identifier) -> Result<(), ValidationError> {
        if self.is_dead() {
            Err(ValidationError::DeadLink { node })
        } else {
            Ok(())
        }
    }
}
