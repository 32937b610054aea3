/*!
# Lantern core

Page-load dependency graphs and the simulator that replays them.

A page load is modelled as a [`Graph`] of network fetches and main-thread
CPU tasks. An edge says that a node cannot start before another one has
completed. The [`Simulator`] plays such a graph forward under a throttling
profile ([`SimulationOptions`]: round trip, throughput, CPU slowdown...) and
predicts when every node would start and finish.

```
use lantern_core::{
    Graph, NetworkRecord, SimulationOptions, Simulator,
    defaults::DESKTOP_DENSE_4G,
};

let mut graph = Graph::new();
let document = graph
    .new_network_node(NetworkRecord::new("1", "https://example.com/").unwrap())
    .set_main_document(true)
    .build();
let script = graph
    .new_network_node(NetworkRecord::new("2", "https://example.com/app.js").unwrap())
    .build();
graph.add_dependency(script, document).unwrap();

let options = SimulationOptions::builder().set_preset(DESKTOP_DENSE_4G).build();
let result = Simulator::new(options).unwrap().simulate(&graph).unwrap();

let document = result.timing(document).unwrap();
let script = result.timing(script).unwrap();
assert!(script.start_time >= document.end_time);
```

Graphs are cheap to clone and to edit, which is how "what if" questions
are answered: clone the graph, move a dependency (preload a resource,
defer a script...), simulate again and compare.
*/

pub mod defaults;
pub mod graph;
pub mod measure;
pub mod node;
pub mod record;
pub mod simulator;
pub mod task;

pub use self::{
    graph::{Graph, GraphError, NodeBuilder},
    measure::{Rtt, Throughput},
    node::{CpuNode, NetworkNode, Node, NodeId, NodeKind, NodeType},
    record::{
        CallFrame, CallStack, Initiator, InitiatorType, NetworkRecord, RecordError,
        ResourcePriority, ResourceTiming, ResourceType,
    },
    simulator::{
        NodeTiming, SimulateOptions, SimulationError, SimulationOptions, SimulationResult,
        Simulator,
    },
    task::{CpuTask, TraceEvent, TraceEventArgs, TraceEventData},
};
