// patrol_graph_data: hierarchical data sections for patrol graph files.
//
// This crate is the structured-data store the patrol graph reads and writes.
// A document is a tree of named sections; each section carries an optional
// text value and an ordered list of children. Several children may share a
// name (a node section has one `link` child per neighbour), so children are
// kept in a `Vec` rather than a map.
//
// Module overview:
// - `section.rs`:  `DataSection`, the tree node, with child management and
//                  typed field accessors (string, bool, 3-vector).
// - `document.rs`: `Document`, a `DataSection` bound to a path on disk, and
//                  `DataError` for I/O and parse failures.
//
// Typed values are stored as text (`"1 2 3"`, `"true"`), which keeps the
// on-disk JSON readable and lets a malformed value degrade to its default
// instead of failing the whole document. No dependency on the graph crate.

pub mod document;
pub mod section;

pub use document::{DataError, Document};
pub use section::DataSection;
