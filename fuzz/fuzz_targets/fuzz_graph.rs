#![no_main]

//! Fuzz target for the dependency graph
//!
//! Draining roots either empties the graph or leaves a cycle that
//! `find_cycle_slow` must be able to name.

use arbitrary::Arbitrary;
use instantiation_service::Graph;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Edge {
    from: u8,
    to: u8,
}

fuzz_target!(|edges: Vec<Edge>| {
    let mut graph: Graph<u8> = Graph::new(|n: &u8| n.to_string());

    // Keep node count small so cycles are common
    for edge in edges.into_iter().take(64) {
        graph.insert_edge(edge.from % 16, edge.to % 16);
    }

    let had_cycle = graph.find_cycle_slow();

    loop {
        let roots: Vec<u8> = graph.roots().iter().map(|n| *n.data()).collect();
        if roots.is_empty() {
            break;
        }
        for root in &roots {
            graph.remove_node(root);
        }
    }

    if graph.is_empty() {
        assert!(had_cycle.is_none(), "acyclic graph reported {had_cycle:?}");
    } else {
        let cycle = graph.find_cycle_slow().expect("rootless graph must contain a cycle");
        let path: Vec<&str> = cycle.split(" -> ").collect();
        assert!(path.len() >= 2);
        assert_eq!(path.first(), path.last());
        assert!(had_cycle.is_some());
    }
});
