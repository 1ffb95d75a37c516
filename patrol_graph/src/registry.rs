// The graph registry: one `StationGraph` per graph identifier.
//
// Graphs are created lazily by `get_graph` and live as long as the registry.
// Most code reaches the process-wide instance through `GraphRegistry::global()`,
// but a registry is an ordinary value, so tools and tests can run isolated
// ones side by side.
//
// Editor builds add the cross-graph operations: looking up a live node in a
// named graph, and merging one graph into another.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;
#[cfg(feature = "editor")]
use tracing::{error, info};

#[cfg(feature = "editor")]
use crate::cell::CellMapping;
use crate::config::GraphConfig;
use crate::graph::StationGraph;
use crate::types::Identifier;
#[cfg(feature = "editor")]
use crate::waypoint::WaypointNode;

pub struct GraphRegistry {
    config: GraphConfig,
    graphs: Mutex<BTreeMap<Identifier, Arc<StationGraph>>>,
}

impl Default for GraphRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Every graph this registry creates gets a copy of `config`.
    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            config,
            graphs: Mutex::new(BTreeMap::new()),
        }
    }

    /// The process-wide registry, created with the default config on first
    /// use.
    pub fn global() -> &'static GraphRegistry {
        static GLOBAL: OnceLock<GraphRegistry> = OnceLock::new();
        GLOBAL.get_or_init(GraphRegistry::new)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// The graph named `name`, created (not ready) if it does not exist.
    pub fn get_graph(&self, name: Identifier) -> Arc<StationGraph> {
        self.graphs
            .lock()
            .entry(name)
            .or_insert_with(|| {
                debug!(graph = %name, "creating graph");
                Arc::new(StationGraph::new(name, self.config.clone()))
            })
            .clone()
    }

    /// The graph named `name`, if it has been created.
    pub fn find_graph(&self, name: Identifier) -> Option<Arc<StationGraph>> {
        self.graphs.lock().get(&name).cloned()
    }

    /// Every graph, ordered by name.
    pub fn all_graphs(&self) -> Vec<Arc<StationGraph>> {
        self.graphs.lock().values().cloned().collect()
    }

    /// Save every activated graph. Failures are logged and skipped. Returns
    /// how many graphs were written.
    #[cfg(feature = "editor")]
    pub fn save_all(&self) -> usize {
        let mut saved = 0;
        for graph in self.all_graphs() {
            match graph.save() {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => error!(graph = %graph.name(), %err, "failed to save graph"),
            }
        }
        saved
    }

    /// The live node `id` in graph `graph`, without creating the graph.
    #[cfg(feature = "editor")]
    pub fn get_node(&self, graph: Identifier, id: Identifier) -> Option<Arc<WaypointNode>> {
        self.find_graph(graph)?.get_node(id)
    }

    /// Move every node of graph `from` into graph `into`. Both graphs' cells
    /// are force-loaded first so no node is left behind. Nodes are marked
    /// dirty only once all of them have moved. Returns how many nodes moved.
    #[cfg(feature = "editor")]
    pub fn merge_graphs(&self, into: Identifier, from: Identifier, mapping: &dyn CellMapping) -> usize {
        if into == from {
            return 0;
        }
        let target = self.get_graph(into);
        let source = self.get_graph(from);
        target.load_all_cells(mapping);
        source.load_all_cells(mapping);

        let moved = source.all_nodes();
        for node in &moved {
            source.deregister_node(node);
            node.set_graph(Some(target.clone()));
            if let Some(cell) = node.cell() {
                target.register_node(node, &cell);
            }
        }
        for node in &moved {
            node.make_dirty();
        }
        info!(into = %into, from = %from, nodes = moved.len(), "merged graphs");
        moved.len()
    }
}

impl std::fmt::Debug for GraphRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRegistry")
            .field("graphs", &self.graphs.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_graph_creates_once() {
        let registry = GraphRegistry::new();
        let name = Identifier::from_u128(7);
        assert!(registry.find_graph(name).is_none());
        let a = registry.get_graph(name);
        let b = registry.get_graph(name);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_ready());
        assert_eq!(registry.all_graphs().len(), 1);
    }

    #[test]
    fn graphs_inherit_the_registry_config() {
        let config = GraphConfig {
            graph_file_extension: "pgraph".into(),
            ..GraphConfig::default()
        };
        let registry = GraphRegistry::with_config(config.clone());
        assert_eq!(registry.get_graph(Identifier::from_u128(1)).config(), &config);
    }

    #[test]
    fn global_is_a_singleton() {
        assert!(std::ptr::eq(GraphRegistry::global(), GraphRegistry::global()));
    }

    #[cfg(feature = "editor")]
    #[test]
    fn merging_a_graph_into_itself_is_a_no_op() {
        let registry = GraphRegistry::new();
        let mapping = crate::cell::MemoryMapping::new("space");
        let name = Identifier::from_u128(7);
        assert_eq!(registry.merge_graphs(name, name, mapping.as_ref()), 0);
        assert!(mapping.requested_cells().is_empty());
    }
}
