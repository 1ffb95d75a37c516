// Error types for graph loading, saving and validation.
//
// `GraphError` covers the recoverable failures: documents that cannot be
// read or written, and node sections missing a required field. Queries never
// produce errors; they return empty results instead.
//
// `ValidationError` is the diagnostic result of `is_valid()` on a node or a
// graph. Each variant names one consistency check; the `Display` text is the
// human-readable reason tooling shows to the user.

use patrol_graph_data::DataError;
use thiserror::Error;

use crate::types::Identifier;

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    /// The graph has not been given a file path (it has never been
    /// activated by a registering node).
    #[error("graph {graph} has no file path")]
    NoFilePath { graph: Identifier },

    #[error(transparent)]
    Data(#[from] DataError),

    /// A node section lacks `id` or `graph`, or has an unparsable one.
    #[error("node {id}: missing or invalid field `{field}`")]
    MissingField { field: &'static str, id: Identifier },
}

/// Why a node or graph failed its consistency check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("graph {graph} has {editable} live nodes but {runtime} runtime nodes")]
    NodeCountMismatch {
        graph: Identifier,
        editable: usize,
        runtime: usize,
    },

    #[error("node has an invalid id")]
    InvalidId,

    #[error("node {node} is not connected to a graph")]
    NotConnectedToGraph { node: Identifier },

    #[error("node {node} has {links} links but {preload} preload links")]
    LinkCountMismatch {
        node: Identifier,
        links: usize,
        preload: usize,
    },

    #[error("node {node} has a link with a missing endpoint")]
    DeadLink { node: Identifier },

    #[error("node {node} holds a link that does not reference it")]
    LinkNotAttached { node: Identifier },

    #[error("link between {node} and {other} is missing from a preload map")]
    PreloadMissingLink { node: Identifier, other: Identifier },

    #[error("link between {node} and {other} has a direction that disagrees with the preload map")]
    WrongDirection { node: Identifier, other: Identifier },

    #[error("node {node} has a preload entry for {other} with no link")]
    PreloadWithoutLink { node: Identifier, other: Identifier },

    #[error("node {node} is not registered with graph {graph}")]
    NotRegistered { node: Identifier, graph: Identifier },

    #[error("node {node} is not in a cell")]
    NotInCell { node: Identifier },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_nodes() {
        let err = ValidationError::PreloadWithoutLink {
            node: Identifier::from_u128(0xA),
            other: Identifier::from_u128(0xB),
        };
        let text = err.to_string();
        assert!(text.contains("0000000A"));
        assert!(text.contains("0000000B"));
    }

    #[test]
    fn data_errors_convert() {
        let data = patrol_graph_data::Document::from_json("x.graph", "nope").unwrap_err();
        let err: GraphError = data.into();
        assert!(matches!(err, GraphError::Data(_)));
    }
}
