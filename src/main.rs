use graphdex::{Direction, Element, ElementKind, Graph, GraphConfig, GraphResult, QueryElement, Vertex};
use std::process::ExitCode;

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Graphdex v{}", graphdex::version());
    println!("==========================================");

    // Optional YAML configuration as the only argument
    let config = match std::env::args().nth(1) {
        Some(path) => match GraphConfig::from_yaml_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Cannot load {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => GraphConfig::memory(),
    };

    match demo(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Demo failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn person(graph: &Graph, name: &str, age: i64) -> GraphResult<Vertex> {
    let vertex = graph.add_vertex(None)?;
    vertex.set_property("name", name)?;
    vertex.set_property("age", age)?;
    println!("✓ Created {} (age {})", name, age);
    Ok(vertex)
}

fn demo(config: GraphConfig) -> GraphResult<()> {
    let graph = Graph::open(config)?;
    graph.create_key_index("age", ElementKind::Vertex)?;

    let alice = person(&graph, "Alice", 30)?;
    let bob = person(&graph, "Bob", 25)?;
    let charlie = person(&graph, "Charlie", 35)?;

    alice.add_edge("knows", &bob)?.set_property("since", 2020i64)?;
    bob.add_edge("knows", &charlie)?.set_property("since", 2019i64)?;
    alice.add_edge("follows", &charlie)?;
    println!("✓ Alice -[knows]-> Bob -[knows]-> Charlie, Alice -[follows]-> Charlie");

    println!("\nAlice's outgoing neighbours:");
    for vertex in alice.vertices(Direction::Out, &[])? {
        println!("  → {}", vertex.property("name")?.map(|v| v.to_string()).unwrap_or_default());
    }

    println!("\nPeople aged 28 to 40:");
    for vertex in graph.query::<Vertex>(&[QueryElement::interval("age", 28i64, 40i64)], 100)? {
        println!("  → {}", vertex.property("name")?.map(|v| v.to_string()).unwrap_or_default());
    }

    let stats = graph.stats()?;
    println!("\nGraph Statistics:");
    println!("  Total vertices: {}", stats.vertices);
    println!("  Total edges: {}", stats.edges);
    match serde_json::to_string_pretty(&stats.indices) {
        Ok(json) => println!("  Indices: {}", json),
        Err(e) => eprintln!("Cannot render index statistics: {}", e),
    }
    if let Ok(json) = serde_json::to_string(&graph.features()) {
        println!("  Features: {}", json);
    }
    graph.flush()
}
