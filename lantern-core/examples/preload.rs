//! What would happen if the web font was preloaded?
//!
//! Builds a small page by hand, simulates it, then simulates a copy where
//! the font only depends on the document and compares both timelines.

use anyhow::{Context as _, Result};
use lantern_core::{
    Graph, NetworkRecord, NodeId, ResourceType, SimulationOptions, SimulationResult, Simulator,
    defaults::MOBILE_SLOW_4G,
};

fn record(id: &str, url: &str, start: f64, end: f64, size: u64) -> Result<NetworkRecord> {
    let mut record = NetworkRecord::new(id, url)?;
    record.network_request_time = start;
    record.network_end_time = end;
    record.transfer_size = size;
    record.resource_size = size;
    Ok(record)
}

fn print(graph: &Graph, result: &SimulationResult) {
    for (id, timing) in result.timeline() {
        let url = graph
            .node(id)
            .and_then(|node| node.record())
            .map_or("<cpu>", |record| record.url.as_str());
        println!(
            "  {id:>2} {:>8.1}ms -> {:>8.1}ms  {url}",
            timing.start_time, timing.end_time
        );
    }
    println!("  total: {:.1}ms", result.time_in_ms);
}

fn main() -> Result<()> {
    let mut graph = Graph::new();

    let mut document = record("1", "https://example.com/", 0.0, 300.0, 30_000)?;
    document.resource_type = ResourceType::Document;
    let document: NodeId = graph
        .new_network_node(document)
        .set_main_document(true)
        .build();
    let style = graph
        .new_network_node(record("2", "https://example.com/site.css", 310.0, 600.0, 20_000)?)
        .build();
    let font = graph
        .new_network_node(record("3", "https://fonts.example/font.woff2", 610.0, 900.0, 60_000)?)
        .build();
    graph.add_dependency(style, document)?;
    graph.add_dependency(font, style)?;

    let simulator = Simulator::new(
        SimulationOptions::builder()
            .set_preset(MOBILE_SLOW_4G)
            .build(),
    )?;

    let before = simulator.simulate(&graph)?;
    println!("as recorded:");
    print(&graph, &before);

    let mut preloaded = graph.clone_with_relationships(|_| true);
    let main_document = preloaded
        .main_document()
        .context("the page has no main document")?;
    preloaded.remove_all_dependencies(font)?;
    preloaded.add_dependency(font, main_document)?;

    let after = simulator.simulate(&preloaded)?;
    println!("with the font preloaded:");
    print(&preloaded, &after);

    Ok(())
}
