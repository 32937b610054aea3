use criterion::{
    BenchmarkGroup, Criterion, Throughput, black_box, criterion_group, criterion_main,
    measurement::WallTime,
};
use lantern_core::{Graph, NetworkRecord, NodeId, SimulationOptions, Simulator};

const ORIGINS: usize = 8;

fn record(id: usize, start: f64) -> NetworkRecord {
    let url = format!("https://origin-{}.example/resource-{id}", id % ORIGINS);
    let mut record = NetworkRecord::new(id.to_string(), url).unwrap();
    record.network_request_time = start;
    record.network_end_time = start + 50.0;
    record.transfer_size = 20_000 + (id as u64 % 7) * 10_000;
    record
}

/// A document and `size` resources all requested by it.
fn wide(size: usize) -> Graph {
    let mut graph = Graph::new();
    let root = graph
        .new_network_node(record(0, 0.0))
        .set_main_document(true)
        .build();
    for id in 1..=size {
        let node = graph.new_network_node(record(id, 100.0)).build();
        graph.add_dependency(node, root).unwrap();
    }
    graph
}

/// A chain of `size` resources, each requested by the previous one.
fn deep(size: usize) -> Graph {
    let mut graph = Graph::new();
    let mut previous: NodeId = graph
        .new_network_node(record(0, 0.0))
        .set_main_document(true)
        .build();
    for id in 1..=size {
        let node = graph
            .new_network_node(record(id, id as f64 * 100.0))
            .build();
        graph.add_dependency(node, previous).unwrap();
        previous = node;
    }
    graph
}

fn bench_graph(group: &mut BenchmarkGroup<'_, WallTime>, name: &str, graph: &Graph) {
    let simulator = Simulator::new(SimulationOptions::default()).unwrap();

    group.throughput(Throughput::Elements(graph.len() as u64));
    group.bench_function(format!("{name} {} nodes", graph.len()), |b| {
        b.iter(|| simulator.simulate(black_box(graph)).unwrap())
    });
}

fn simulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulate");

    for size in [10, 50, 100, 200] {
        bench_graph(&mut group, "wide", &wide(size));
        bench_graph(&mut group, "deep", &deep(size));
    }

    group.finish();
}

fn clone(c: &mut Criterion) {
    let graph = wide(200);

    c.bench_function("clone_with_relationships", |b| {
        b.iter(|| graph.clone_with_relationships(|node| node.id().to_string().ends_with('7')))
    });
}

criterion_group!(benches, simulate, clone);
criterion_main!(benches);
