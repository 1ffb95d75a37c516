// End-to-end tests for patrol graphs.
//
// Each test builds its own `GraphRegistry` and in-memory cells rooted in a
// temporary directory, so graph files written by one test never leak into
// another. The flow mirrors how a world editor drives the library: nodes are
// added to cells, linked from both sides, saved, streamed out and back in.

#![cfg(feature = "editor")]

use std::sync::Arc;
use std::thread;

use cgmath::Point3;
use patrol_graph::{
    CellItem, CellRef, Direction, GraphConfig, GraphRegistry, Identifier, MemoryCell,
    MemoryMapping, StationGraph, WaypointNode, math,
};
use patrol_graph_data::{DataSection, Document};

const G1: Identifier = Identifier::from_u128(0x61);
const G2: Identifier = Identifier::from_u128(0x62);
const A: Identifier = Identifier::from_u128(0xA);
const B: Identifier = Identifier::from_u128(0xB);
const C: Identifier = Identifier::from_u128(0xC);

struct World {
    dir: tempfile::TempDir,
    mapping: Arc<MemoryMapping>,
    registry: GraphRegistry,
}

impl World {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mapping = MemoryMapping::new(dir.path());
        Self {
            dir,
            mapping,
            registry: GraphRegistry::new(),
        }
    }

    fn cell(&self, name: &str) -> (Arc<MemoryCell>, CellRef) {
        let cell = MemoryCell::new(name, math::identity(), self.mapping.clone());
        let cell_ref = cell.cell_ref().unwrap();
        (cell, cell_ref)
    }

    /// A node at `pos` in graph `graph`, added to `cell`.
    fn node(&self, id: Identifier, graph: Identifier, pos: [f32; 3], cell: &CellRef) -> Arc<WaypointNode> {
        let node = WaypointNode::new(id);
        node.set_position(math::from_array(pos));
        node.set_graph(Some(self.registry.get_graph(graph)));
        cell.add_static_item(CellItem::Node(node.clone()));
        node
    }
}

/// Nodes A at the origin and B at (10, 0, 0) in g1, A -> B traversable only.
fn scenario_one(world: &World, cell: &CellRef) -> (Arc<WaypointNode>, Arc<WaypointNode>) {
    let a = world.node(A, G1, [0.0, 0.0, 0.0], cell);
    let b = world.node(B, G1, [10.0, 0.0, 0.0], cell);
    a.set_link(&b, true).unwrap();
    b.set_link(&a, false).unwrap();
    (a, b)
}

#[test]
fn one_way_link_between_two_nodes() {
    let world = World::new();
    let (cell, c) = world.cell("c");
    let (a, b) = scenario_one(&world, &c);

    assert_eq!(cell.links().len(), 1);
    let link = a.find_link(&b).unwrap();
    assert_eq!(link.start_node().unwrap().id(), A);
    assert_eq!(link.end_node().unwrap().id(), B);
    assert_eq!(link.direction(), Direction::START_END);

    let graph = world.registry.get_graph(G1);
    assert!(graph.can_traverse_from(A, B));
    assert!(!graph.can_traverse_from(B, A));
}

#[test]
fn nearest_node_after_linking() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let _nodes = scenario_one(&world, &c);
    let graph = world.registry.get_graph(G1);
    assert_eq!(graph.nearest_node(Point3::new(9.0, 0.0, 0.0)), B);
}

#[test]
fn equidistant_nearest_returns_one_of_the_candidates() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let _nodes = scenario_one(&world, &c);
    let graph = world.registry.get_graph(G1);
    let nearest = graph.nearest_node(Point3::new(5.0, 0.0, 0.0));
    assert!(nearest == A || nearest == B);
}

#[test]
fn saved_graph_loads_into_a_fresh_graph() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let (a, _b) = scenario_one(&world, &c);
    a.set_user_string("gatehouse");
    a.update_registration(&c);

    let graph = world.registry.get_graph(G1);
    assert!(graph.save().unwrap());

    let fresh = StationGraph::new(G1, GraphConfig::default());
    fresh.construct_file_path(world.dir.path());
    assert_eq!(fresh.load(&math::identity()).unwrap(), 2);
    assert_eq!(fresh.world_position(A), Some(Point3::new(0.0, 0.0, 0.0)));
    assert_eq!(fresh.world_position(B), Some(Point3::new(10.0, 0.0, 0.0)));
    assert_eq!(fresh.traversable_nodes(A), vec![B]);
    assert!(fresh.traversable_nodes(B).is_empty());
    assert_eq!(fresh.node(A).unwrap().user_string, "gatehouse");
    assert_eq!(fresh.runtime_nodes(), graph.runtime_nodes());
}

#[test]
fn removing_a_link_leaves_both_nodes_valid() {
    let world = World::new();
    let (cell, c) = world.cell("c");
    let (a, b) = scenario_one(&world, &c);
    let link = a.find_link(&b).unwrap();

    a.remove_link(&link);
    assert_eq!(a.is_valid(), Ok(()));
    assert_eq!(b.is_valid(), Ok(()));
    assert!(a.links().is_empty());
    assert!(b.links().is_empty());
    assert!(cell.links().is_empty());
    assert!(!world.registry.get_graph(G1).can_traverse_from(A, B));
}

#[test]
fn linked_nodes_share_one_link_and_mirror_preload() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let (a, b) = scenario_one(&world, &c);

    assert!(a.is_linked_to(B));
    assert!(b.is_linked_to(A));
    assert!(Arc::ptr_eq(&a.find_link(&b).unwrap(), &b.find_link(&a).unwrap()));
    assert_eq!(a.number_links(), 1);
    assert_eq!(b.number_links(), 1);
    assert_eq!(world.registry.get_graph(G1).is_valid(), Ok(()));
}

#[test]
fn link_start_is_the_smaller_id_whoever_calls_first() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let a = world.node(A, G1, [0.0; 3], &c);
    let b = world.node(B, G1, [1.0, 0.0, 0.0], &c);

    b.set_link(&a, true);
    a.set_link(&b, true);
    let link = a.find_link(&b).unwrap();
    assert!(Arc::ptr_eq(&link.start_node().unwrap(), &a));
    assert_eq!(link.direction(), Direction::BOTH);
}

#[test]
fn unlinking_from_the_far_side_is_symmetric() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let (a, b) = scenario_one(&world, &c);

    b.remove_link_id(A);
    assert!(!a.is_linked_to(B));
    assert!(!b.is_linked_to(A));
    assert!(a.links().is_empty());
    assert!(b.links().is_empty());
}

#[test]
fn unlink_removes_every_link() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let (a, b) = scenario_one(&world, &c);
    let n = world.node(C, G1, [0.0, 0.0, 5.0], &c);
    a.set_link(&n, true);
    n.set_link(&a, true);
    assert_eq!(a.links().len(), 2);

    a.unlink();
    assert!(a.links().is_empty());
    assert!(a.preload_links().is_empty());
    assert!(!b.is_linked_to(A));
    assert!(!n.is_linked_to(A));
    assert_eq!(world.registry.get_graph(G1).is_valid(), Ok(()));
}

#[test]
fn registering_twice_keeps_one_entry() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let a = world.node(A, G1, [0.0; 3], &c);
    let graph = world.registry.get_graph(G1);

    graph.register_node(&a, &c);
    graph.register_node(&a, &c);
    assert_eq!(graph.all_nodes().len(), 1);
    assert_eq!(graph.node_count(), 1);
}

#[test]
fn deregistering_the_only_node_empties_nearest() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let a = world.node(A, G1, [3.0, 0.0, 0.0], &c);
    let graph = world.registry.get_graph(G1);
    assert_eq!(graph.nearest_node(Point3::new(0.0, 0.0, 0.0)), A);

    graph.deregister_node(&a);
    assert_eq!(graph.nearest_node(Point3::new(0.0, 0.0, 0.0)), Identifier::ZERO);
}

#[test]
fn empty_graph_save_removes_the_file() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let (a, b) = scenario_one(&world, &c);
    let graph = world.registry.get_graph(G1);
    graph.save().unwrap();
    let path = graph.file_path().unwrap();
    assert!(path.exists());

    graph.deregister_node(&a);
    graph.deregister_node(&b);
    assert!(graph.save().unwrap());
    assert!(!path.exists());
}

#[test]
fn save_drops_sections_for_unknown_nodes() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let (_a, b) = scenario_one(&world, &c);
    let graph = world.registry.get_graph(G1);
    graph.save().unwrap();

    graph.deregister_node(&b);
    graph.save().unwrap();
    let doc = Document::open(graph.file_path().unwrap()).unwrap();
    let config = GraphConfig::default();
    let ids: Vec<_> = doc
        .root()
        .children()
        .iter()
        .filter_map(|s| config.node_section_id(s.name()))
        .collect();
    assert_eq!(ids, vec![A]);
}

#[test]
fn merge_moves_every_node_into_the_target() {
    let world = World::new();
    let (cell, c) = world.cell("c");
    let (_a, _b) = scenario_one(&world, &c);
    let n = world.node(C, G2, [50.0, 0.0, 50.0], &c);
    cell.clear_dirty();

    let moved = world.registry.merge_graphs(G1, G2, world.mapping.as_ref());
    assert_eq!(moved, 1);
    let g1 = world.registry.get_graph(G1);
    let g2 = world.registry.get_graph(G2);
    assert!(Arc::ptr_eq(&n.graph().unwrap(), &g1));
    assert!(g1.is_registered_id(C));
    assert_eq!(g1.node_count(), 3);
    assert_eq!(g2.node_count(), 0);
    assert!(n.is_dirty());
    assert!(cell.is_dirty());
    assert_eq!(g1.is_valid(), Ok(()));
    assert!(!world.mapping.requested_cells().is_empty());
}

#[test]
fn moving_a_node_between_cells_keeps_its_registration() {
    let world = World::new();
    let (first, c1) = world.cell("c1");
    let (second, c2) = world.cell("c2");
    let a = world.node(A, G1, [0.0; 3], &c1);

    patrol_graph::cell::move_node(&a, &c1, &c2);
    assert!(first.nodes().is_empty());
    assert_eq!(second.nodes().len(), 1);
    assert_eq!(a.cell().unwrap().identifier(), "c2");
    assert!(world.registry.get_graph(G1).is_registered_id(A));
    assert!(first.is_dirty());
    assert!(second.is_dirty());
}

/// Write a cell's nodes as per-cell sections, the way a cell file holds them.
fn save_cell(cell: &MemoryCell) -> Vec<DataSection> {
    cell.nodes()
        .iter()
        .map(|node| {
            let mut section = DataSection::new("patrolNode");
            node.save(&mut section);
            section
        })
        .collect()
}

#[test]
fn cell_stream_out_and_back_in_restores_links() {
    let world = World::new();
    let (cell, c) = world.cell("c");
    let (a, b) = scenario_one(&world, &c);
    let sections = save_cell(&cell);
    assert_eq!(sections.len(), 2);
    drop((a, b));

    cell.unload();
    let graph = world.registry.get_graph(G1);
    assert_eq!(graph.all_nodes().len(), 0);

    let (reloaded, c2) = world.cell("c");
    let nodes: Vec<_> = sections
        .iter()
        .map(|s| WaypointNode::create(s, &c2, &world.registry).unwrap())
        .collect();
    assert_eq!(reloaded.nodes().len(), 2);
    assert_eq!(reloaded.links().len(), 1);
    for node in &nodes {
        assert_eq!(node.is_valid(), Ok(()));
    }
    assert!(graph.can_traverse_from(A, B));
    assert!(!graph.can_traverse_from(B, A));
    assert_eq!(graph.is_valid(), Ok(()));
}

#[test]
fn concurrent_linking_and_queries() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let nodes: Vec<_> = (1..=32u128)
        .map(|i| world.node(Identifier::from_u128(i), G1, [i as f32, 0.0, 0.0], &c))
        .collect();
    let graph = world.registry.get_graph(G1);

    thread::scope(|s| {
        for t in 0..4 {
            let nodes = &nodes;
            s.spawn(move || {
                for i in (t..nodes.len() - 1).step_by(4) {
                    // Alternate which side calls first to exercise lock order.
                    let (x, y) = if i % 2 == 0 {
                        (&nodes[i], &nodes[i + 1])
                    } else {
                        (&nodes[i + 1], &nodes[i])
                    };
                    x.set_link(y, true);
                    y.set_link(x, true);
                }
            });
        }
        for _ in 0..2 {
            let graph = &graph;
            s.spawn(move || {
                for i in 0..200 {
                    let _ = graph.nearest_node(Point3::new(i as f32 % 32.0, 0.0, 0.0));
                    let _ = graph.can_traverse_from(Identifier::from_u128(1), Identifier::from_u128(2));
                }
            });
        }
    });

    assert_eq!(graph.node_count(), 32);
    for pair in nodes.windows(2) {
        assert!(graph.can_traverse_from(pair[0].id(), pair[1].id()));
        assert!(graph.can_traverse_from(pair[1].id(), pair[0].id()));
    }
    assert_eq!(graph.is_valid(), Ok(()));
}

#[test]
fn save_all_writes_every_active_graph() {
    let world = World::new();
    let (_cell, c) = world.cell("c");
    let _nodes = scenario_one(&world, &c);
    let _other = world.node(C, G2, [0.0; 3], &c);
    // Created but never activated.
    world.registry.get_graph(Identifier::from_u128(0x63));

    assert_eq!(world.registry.save_all(), 2);
}
