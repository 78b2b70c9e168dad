use graphdex::index::{IndexManager, IndexingService};
use graphdex::{
    CompareOp, Element, ElementKind, Graph, GraphConfig, GraphError, IndexColumn, PropertyValue, QueryElement,
    RefreshPolicy, Vertex,
};
use std::collections::HashMap;
use std::time::Duration;

#[test]
fn test_key_index_on_age() {
    let graph = Graph::memory().unwrap();
    graph.create_key_index("age", ElementKind::Vertex).unwrap();
    let a = graph.add_vertex(None).unwrap();
    let b = graph.add_vertex(None).unwrap();
    a.set_property("age", 29i64).unwrap();
    b.set_property("age", 27i64).unwrap();

    assert!(graph.wait_for_generation(graph.last_generation()));
    let found = graph.query::<Vertex>(&[QueryElement::eq("age", 29i64)], 1000).unwrap();
    assert_eq!(found, vec![a.clone()]);
    assert_eq!(graph.vertices_by("age", 29i64).unwrap(), vec![a]);
}

#[test]
fn test_user_index_lifecycle() {
    let graph = Graph::memory().unwrap();
    let a = graph.add_vertex(None).unwrap();
    let age_idx = graph.create_index::<Vertex>("ageIdx").unwrap();
    age_idx.put("age", 29i64, &a).unwrap();
    assert_eq!(age_idx.get("age", 29i64).unwrap(), vec![a]);

    graph.drop_index(ElementKind::Vertex, "ageIdx").unwrap();
    assert!(matches!(age_idx.get("age", 29i64), Err(GraphError::IndexNotFound(_))));
    assert!(matches!(
        graph.drop_index(ElementKind::Vertex, "ageIdx"),
        Err(GraphError::IndexNotFound(_))
    ));
}

#[test]
fn test_create_index_is_idempotent() {
    let graph = Graph::memory().unwrap();
    graph.create_index::<Vertex>("people").unwrap();
    graph.create_index::<Vertex>("people").unwrap();
    assert_eq!(graph.indices(ElementKind::Vertex), vec!["people".to_string()]);

    assert!(graph.create_key_index("name", ElementKind::Edge).unwrap());
    assert!(!graph.create_key_index("name", ElementKind::Edge).unwrap());
    assert_eq!(graph.indexed_keys(ElementKind::Edge), vec!["name".to_string()]);
    assert!(graph.indexed_keys(ElementKind::Vertex).is_empty());
}

#[test]
fn test_key_index_backfills_existing_elements() {
    let graph = Graph::memory().unwrap();
    let a = graph.add_vertex(None).unwrap();
    let b = graph.add_vertex(None).unwrap();
    let e = a.add_edge("knows", &b).unwrap();
    e.set_property("since", 2020i64).unwrap();

    graph.create_key_index("since", ElementKind::Edge).unwrap();
    assert_eq!(graph.edges_by("since", 2020i64).unwrap(), vec![e]);
}

#[test]
fn test_drop_key_index_stops_tracking() {
    let graph = Graph::memory().unwrap();
    graph.create_key_index("name", ElementKind::Vertex).unwrap();
    let v = graph.add_vertex(None).unwrap();
    v.set_property("name", "x").unwrap();
    graph.drop_key_index("name", ElementKind::Vertex).unwrap();

    // Falls back to a scan
    assert_eq!(graph.vertices_by("name", "x").unwrap(), vec![v]);
    assert!(matches!(
        graph.query::<Vertex>(&[QueryElement::eq("name", "x")], 10),
        Err(GraphError::IndexNotFound(_))
    ));
}

#[test]
fn test_conjunctive_key_query() {
    let graph = Graph::memory().unwrap();
    graph.create_key_index("age", ElementKind::Vertex).unwrap();
    graph.create_key_index("city", ElementKind::Vertex).unwrap();
    let mut people = Vec::new();
    for (age, city) in [(25i64, "Paris"), (35, "Paris"), (45, "Lyon"), (55, "Paris")] {
        let v = graph.add_vertex(None).unwrap();
        v.set_property("age", age).unwrap();
        v.set_property("city", city).unwrap();
        people.push(v);
    }

    let found = graph
        .query::<Vertex>(
            &[
                QueryElement::compare("age", CompareOp::Gt, 30i64),
                QueryElement::eq("city", "Paris"),
            ],
            100,
        )
        .unwrap();
    assert_eq!(found, vec![people[1].clone(), people[3].clone()]);

    let found = graph
        .query::<Vertex>(&[QueryElement::interval("age", 25i64, 45i64)], 100)
        .unwrap();
    assert_eq!(found, people[..2].to_vec());

    let found = graph
        .query::<Vertex>(&[QueryElement::compare("city", CompareOp::Ne, "Paris")], 100)
        .unwrap();
    assert_eq!(found, vec![people[2].clone()]);
}

#[test]
fn test_map_and_list_properties_are_expanded() {
    let graph = Graph::memory().unwrap();
    graph.create_key_index("address", ElementKind::Vertex).unwrap();
    graph.create_key_index("tags", ElementKind::Vertex).unwrap();

    let v = graph.add_vertex(None).unwrap();
    let mut address = HashMap::new();
    address.insert("city".to_string(), PropertyValue::from("Lyon"));
    v.set_property("address", address).unwrap();
    v.set_property(
        "tags",
        vec![PropertyValue::from("a"), PropertyValue::from("b"), PropertyValue::from("a")],
    )
    .unwrap();

    let found = graph
        .query::<Vertex>(&[QueryElement::eq("address.city", "Lyon")], 10)
        .unwrap();
    assert_eq!(found, vec![v.clone()]);
    assert_eq!(graph.vertices_by("tags", "b").unwrap(), vec![v]);
}

#[test]
fn test_key_index_does_not_change_lookup_results() {
    let graph = Graph::memory().unwrap();
    let mut address = HashMap::new();
    address.insert("city".to_string(), PropertyValue::from("Santa Fe"));

    let tagged = graph.add_vertex(None).unwrap();
    tagged
        .set_property("tags", vec![PropertyValue::from("x"), PropertyValue::from("y")])
        .unwrap();
    tagged.set_property("addr", address.clone()).unwrap();
    let wider = graph.add_vertex(None).unwrap();
    wider
        .set_property(
            "tags",
            vec![PropertyValue::from("x"), PropertyValue::from("y"), PropertyValue::from("z")],
        )
        .unwrap();
    let raw = graph.add_vertex(None).unwrap();
    raw.set_property("tags", vec![1u8, 2]).unwrap();

    let lookups: Vec<(&str, PropertyValue)> = vec![
        ("tags", PropertyValue::Array(vec!["x".into(), "y".into()])),
        ("tags", PropertyValue::Array(vec!["y".into(), "x".into()])),
        ("tags", PropertyValue::Array(vec![])),
        ("tags", "x".into()),
        ("tags", "z".into()),
        ("tags", PropertyValue::Blob(vec![1, 2])),
        ("addr", PropertyValue::Map(address)),
    ];
    let run = |graph: &Graph| -> Vec<Vec<Vertex>> {
        lookups
            .iter()
            .map(|(key, value)| graph.vertices_by(key, value.clone()).unwrap())
            .collect()
    };

    let scanned = run(&graph);
    assert_eq!(scanned[0], vec![tagged.clone()]);
    assert!(scanned[1].is_empty());
    assert_eq!(scanned[3], vec![tagged.clone(), wider.clone()]);
    assert_eq!(scanned[4], vec![wider]);
    assert_eq!(scanned[5], vec![raw]);
    assert_eq!(scanned[6], vec![tagged]);

    graph.create_key_index("tags", ElementKind::Vertex).unwrap();
    graph.create_key_index("addr", ElementKind::Vertex).unwrap();
    assert_eq!(run(&graph), scanned);
}

#[test]
fn test_unindexable_values_are_skipped_not_raised() {
    let graph = Graph::memory().unwrap();
    graph.create_key_index("payload", ElementKind::Vertex).unwrap();
    let v = graph.add_vertex(None).unwrap();
    v.set_property("payload", vec![1u8, 2, 3]).unwrap();
    assert_eq!(v.property("payload").unwrap(), Some(PropertyValue::Blob(vec![1, 2, 3])));

    let skipped: u64 = graph
        .stats()
        .unwrap()
        .indices
        .iter()
        .filter(|(column, _)| *column == IndexColumn::SystemVertex)
        .map(|(_, stats)| stats.skipped_writes)
        .sum();
    assert_eq!(skipped, 1);
}

#[test]
fn test_generation_consistency() {
    let manager = IndexManager::in_memory().unwrap();
    manager.create_index(IndexColumn::UserVertex, "people").unwrap();
    let value = PropertyValue::from("alice");

    let mut last = 0;
    for id in 1..=20u64 {
        let generation = manager
            .set(IndexColumn::UserVertex, id, "people", "name", &value)
            .unwrap();
        assert!(generation > last);
        last = generation;
        assert!(manager.wait_for_generation(generation));
        let ids = manager
            .get(IndexColumn::UserVertex, "people", "name", &value, usize::MAX)
            .unwrap();
        assert!(ids.contains(&id));
    }
}

#[test]
fn test_delete_documents_cleans_every_index() {
    let manager = IndexManager::in_memory().unwrap();
    manager.create_index(IndexColumn::UserVertex, "a").unwrap();
    manager.create_index(IndexColumn::UserVertex, "b").unwrap();
    manager.create_index(IndexColumn::SystemVertex, "name").unwrap();
    let value = PropertyValue::from("x");
    for id in [7u64, 8] {
        manager.set(IndexColumn::UserVertex, id, "a", "k", &value).unwrap();
        manager.set(IndexColumn::UserVertex, id, "b", "k", &value).unwrap();
        manager.set(IndexColumn::SystemVertex, id, "name", "name", &value).unwrap();
    }

    let generation = manager.delete_documents(ElementKind::Vertex, 7).unwrap();
    assert!(manager.wait_for_generation(generation));
    for (column, index, key) in [
        (IndexColumn::UserVertex, "a", "k"),
        (IndexColumn::UserVertex, "b", "k"),
        (IndexColumn::SystemVertex, "name", "name"),
    ] {
        assert_eq!(manager.get(column, index, key, &value, 100).unwrap(), vec![8]);
    }
}

#[test]
fn test_background_refresh_becomes_visible() {
    let config = GraphConfig::memory().with_refresh(RefreshPolicy::Background {
        min_stale_ms: 1,
        max_stale_ms: 20,
    });
    let graph = Graph::open(config).unwrap();
    graph.create_key_index("name", ElementKind::Vertex).unwrap();
    let v = graph.add_vertex(None).unwrap();
    v.set_property("name", "late").unwrap();

    assert!(graph.wait_for_generation(graph.last_generation()));
    assert_eq!(graph.vertices_by("name", "late").unwrap(), vec![v]);
}

#[test]
fn test_wait_returns_after_timeout() {
    let config = GraphConfig::memory()
        .with_refresh(RefreshPolicy::Background {
            min_stale_ms: 60_000,
            max_stale_ms: 60_000,
        })
        .with_wait_timeout(Duration::from_millis(50));
    let graph = Graph::open(config).unwrap();
    graph.create_key_index("name", ElementKind::Vertex).unwrap();
    graph.add_vertex(None).unwrap().set_property("name", "x").unwrap();

    // The refresher will not run within the timeout; the wait gives up
    assert!(!graph.wait_for_generation(graph.last_generation()));
}

#[tokio::test]
async fn test_async_commit_and_wait() {
    let graph = Graph::memory().unwrap();
    graph.create_key_index("name", ElementKind::Vertex).unwrap();
    graph.add_vertex(None).unwrap().set_property("name", "x").unwrap();

    let indexing = graph.indexing().clone();
    let generation = graph.last_generation();
    assert!(indexing.clone().wait_for_generation_async(generation).await.unwrap());
    indexing.commit_async().await.unwrap();
}
