// patrol_graph: patrol and navigation station graphs for a streaming world.
//
// Designers place waypoint nodes inside spatial cells and link them into
// named graphs. Each graph keeps a compact runtime view (positions plus
// outgoing traversable edges) that AI queries read, independent of which
// cells are currently streamed in. Editor builds additionally track the live
// waypoint nodes, persist graphs to disk, validate consistency, and merge
// graphs.
//
// Module overview:
// - `types.rs`:    Identifier (128-bit node/graph key) and Direction bits.
// - `math.rs`:     Position and transform helpers over `cgmath`.
// - `config.rs`:   GraphConfig: grid resolution, file extension, section prefix.
// - `error.rs`:    GraphError (load/save) and ValidationError (diagnostics).
// - `link.rs`:     Link, the materialised connection shared by two nodes.
// - `waypoint.rs`: WaypointNode, the editable node living in a cell.
// - `runtime.rs`:  RuntimeNode, the per-node record queries read.
// - `graph.rs`:    StationGraph: runtime nodes, activation, persistence.
// - `registry.rs`: GraphRegistry, graphs by identifier plus merging.
// - `cell.rs`:     SpatialCell / CellMapping seams and in-memory versions.
//
// Documents are read and written through the `patrol_graph_data` crate.
//
// Feature `editor` (on by default) enables everything that needs the live
// node map: saving, merging, validation, node lookup by id, and unlinking.
// Without it a graph is a read-only runtime view populated from its file.
//
// Everything here is `Send + Sync`. Node state, link state and graph maps
// each have their own `parking_lot` lock; see `waypoint.rs` and `graph.rs`
// for the lock order.

pub mod cell;
pub mod config;
pub mod error;
pub mod graph;
pub mod link;
pub mod math;
pub mod registry;
pub mod runtime;
pub mod types;
pub mod waypoint;

pub use cell::{CellItem, CellMapping, CellRef, MemoryCell, MemoryMapping, SpatialCell};
pub use config::GraphConfig;
pub use error::{GraphError, GraphResult, ValidationError};
pub use graph::{ReadyState, StationGraph};
pub use link::Link;
pub use math::Position;
pub use registry::GraphRegistry;
pub use runtime::RuntimeNode;
pub use types::{Direction, Identifier, ParseIdentifierError};
pub use waypoint::WaypointNode;
