use graphdex::{Direction, Element, ElementKind, Graph, GraphError, PropertyValue, Vertex};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

const WRITERS: usize = 4;
const PER_WRITER: usize = 25;

fn owner(writer: usize) -> String {
    format!("writer-{}", writer)
}

/// Each writer builds a chain of vertices tagged with its name
fn write_chain(graph: &Graph, start: &Barrier, writer: usize) -> Vec<Vertex> {
    start.wait();
    let mut chain: Vec<Vertex> = Vec::with_capacity(PER_WRITER);
    for n in 0..PER_WRITER {
        let v = graph.add_vertex(None).unwrap();
        v.set_property("owner", "pending").unwrap();
        v.set_property("owner", owner(writer)).unwrap();
        v.set_property("seq", n as i64).unwrap();
        if let Some(prev) = chain.last() {
            let e = prev.add_edge("next", &v).unwrap();
            e.set_property("owner", owner(writer)).unwrap();
        }
        chain.push(v);
    }
    chain
}

#[test]
fn test_concurrent_writers_keep_graph_consistent() {
    let graph = Graph::memory().unwrap();
    graph.create_key_index("owner", ElementKind::Vertex).unwrap();
    graph.create_key_index("owner", ElementKind::Edge).unwrap();
    let done = AtomicBool::new(false);
    let start = Barrier::new(WRITERS);

    let chains: Vec<Vec<Vertex>> = thread::scope(|s| {
        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let (graph, start) = (&graph, &start);
                s.spawn(move || write_chain(graph, start, w))
            })
            .collect();

        // User index churn alongside the key-indexed writes
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                let scratch = graph.create_index::<Vertex>("scratch").unwrap();
                if let Some(v) = graph.vertices().unwrap().first() {
                    match scratch.put("seen", true, v) {
                        Ok(_) | Err(GraphError::IndexNotFound(_)) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                match graph.drop_index(ElementKind::Vertex, "scratch") {
                    Ok(_) | Err(GraphError::IndexNotFound(_)) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        });

        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                assert!(graph.wait_for_generation(graph.last_generation()));
            }
        });

        let chains = writers.into_iter().map(|h| h.join().unwrap()).collect();
        done.store(true, Ordering::Release);
        chains
    });

    // Unique ids
    let vertices = graph.vertices().unwrap();
    assert_eq!(vertices.len(), WRITERS * PER_WRITER);
    let ids: HashSet<_> = vertices.iter().map(Vertex::id).collect();
    assert_eq!(ids.len(), vertices.len());
    let edges = graph.edges().unwrap();
    assert_eq!(edges.len(), WRITERS * (PER_WRITER - 1));
    let edge_ids: HashSet<_> = edges.iter().map(|e| e.id()).collect();
    assert_eq!(edge_ids.len(), edges.len());

    // Every edge is listed by both endpoints
    for e in &edges {
        let out = e.vertex(Direction::Out).unwrap();
        let inn = e.vertex(Direction::In).unwrap();
        assert!(out.edges(Direction::Out, &[]).unwrap().contains(e));
        assert!(inn.edges(Direction::In, &[]).unwrap().contains(e));
    }
    for chain in &chains {
        for pair in chain.windows(2) {
            assert_eq!(pair[0].vertices(Direction::Out, &["next"]).unwrap(), vec![pair[1].clone()]);
        }
    }

    // Key indices agree with a full scan
    assert!(graph.vertices_by("owner", "pending").unwrap().is_empty());
    for w in 0..WRITERS {
        let mut scanned: Vec<_> = vertices
            .iter()
            .filter(|v| v.property("owner").unwrap() == Some(PropertyValue::from(owner(w))))
            .map(Vertex::id)
            .collect();
        scanned.sort();
        let mut indexed: Vec<_> = graph.vertices_by("owner", owner(w)).unwrap().iter().map(Vertex::id).collect();
        indexed.sort();
        assert_eq!(indexed, scanned);
        assert_eq!(indexed.len(), PER_WRITER);

        let mut chain_ids: Vec<_> = chains[w].iter().map(Vertex::id).collect();
        chain_ids.sort();
        assert_eq!(indexed, chain_ids);

        assert_eq!(graph.edges_by("owner", owner(w)).unwrap().len(), PER_WRITER - 1);
    }

    // The churn loop always ends on a drop
    assert!(graph.index::<Vertex>("scratch").is_none());
}
