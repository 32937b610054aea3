mod id;

pub use self::id::NodeId;
use crate::{record::NetworkRecord, task::CpuTask};
use std::{fmt, sync::Arc};

/// The two flavours of work a page load is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    Network,
    Cpu,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

/// A vertex of the page-load [`Graph`].
///
/// A `Node` is never constructed directly: use [`Graph::new_network_node`]
/// or [`Graph::new_cpu_node`] to get a [`NodeBuilder`] which registers the
/// node and returns its [`NodeId`]. Edges are only ever edited through the
/// [`Graph`] so that [`dependents`](Node::dependents) always is the exact
/// inverse of the [`dependencies`](Node::dependencies) of the other nodes.
///
/// ## Times
///
/// [`start_time`](Node::start_time) and [`end_time`](Node::end_time) are the
/// *observed* times of the recording, in microseconds. The simulator only
/// uses them to order nodes that are ready at the same time.
///
/// [`Graph`]: crate::graph::Graph
/// [`Graph::new_network_node`]: crate::graph::Graph::new_network_node
/// [`Graph::new_cpu_node`]: crate::graph::Graph::new_cpu_node
/// [`NodeBuilder`]: crate::graph::NodeBuilder
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    is_main_document: bool,

    pub(crate) dependencies: Vec<NodeId>,
    pub(crate) dependents: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Network(NetworkNode),
    Cpu(CpuNode),
}

/// A node wrapping exactly one [`NetworkRecord`].
///
/// The record is shared with every clone of the graph: cloning a graph
/// never copies the records themselves.
#[derive(Debug, Clone)]
pub struct NetworkNode {
    record: Arc<NetworkRecord>,
}

/// A node wrapping one top-level [`CpuTask`] of the main thread.
#[derive(Debug, Clone)]
pub struct CpuNode {
    task: Arc<CpuTask>,
}

impl NetworkNode {
    pub fn new(record: Arc<NetworkRecord>) -> Self {
        Self { record }
    }

    #[inline]
    pub fn record(&self) -> &NetworkRecord {
        &self.record
    }

    pub fn shared_record(&self) -> &Arc<NetworkRecord> {
        &self.record
    }

    /// `true` when the resource is loaded without opening a connection:
    /// served from a browser cache or from a non-network scheme such as
    /// `data:`.
    pub fn is_connectionless(&self) -> bool {
        self.record.is_connectionless()
    }

    pub fn start_time(&self) -> f64 {
        self.record.network_request_time * 1_000.0
    }

    pub fn end_time(&self) -> f64 {
        self.record.network_end_time * 1_000.0
    }
}

impl CpuNode {
    pub fn new(task: Arc<CpuTask>) -> Self {
        Self { task }
    }

    #[inline]
    pub fn task(&self) -> &CpuTask {
        &self.task
    }

    pub fn did_perform_layout(&self) -> bool {
        self.task.did_perform_layout()
    }

    pub fn start_time(&self) -> f64 {
        self.task.start_time() as f64
    }

    pub fn end_time(&self) -> f64 {
        self.task.end_time() as f64
    }
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            is_main_document: false,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Network(_) => NodeType::Network,
            NodeKind::Cpu(_) => NodeType::Cpu,
        }
    }

    pub fn as_network(&self) -> Option<&NetworkNode> {
        match &self.kind {
            NodeKind::Network(network) => Some(network),
            NodeKind::Cpu(_) => None,
        }
    }

    pub fn as_cpu(&self) -> Option<&CpuNode> {
        match &self.kind {
            NodeKind::Cpu(cpu) => Some(cpu),
            NodeKind::Network(_) => None,
        }
    }

    /// The wrapped record, for network nodes.
    pub fn record(&self) -> Option<&NetworkRecord> {
        self.as_network().map(NetworkNode::record)
    }

    /// `true` only for the network node of the page's primary document,
    /// after following every redirect.
    #[inline]
    pub fn is_main_document(&self) -> bool {
        self.is_main_document
    }

    pub(crate) fn set_main_document(&mut self, is_main_document: bool) {
        self.is_main_document = is_main_document;
    }

    /// The nodes that must complete before this one may start.
    #[inline]
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    /// The nodes that wait on this one.
    #[inline]
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    /// Observed start, in microseconds.
    pub fn start_time(&self) -> f64 {
        match &self.kind {
            NodeKind::Network(network) => network.start_time(),
            NodeKind::Cpu(cpu) => cpu.start_time(),
        }
    }

    /// Observed end, in microseconds.
    pub fn end_time(&self) -> f64 {
        match &self.kind {
            NodeKind::Network(network) => network.end_time(),
            NodeKind::Cpu(cpu) => cpu.end_time(),
        }
    }

    /// A new node wrapping the same record or task, with the same id and
    /// flags, but without any edge.
    pub fn clone_without_relationships(&self) -> Self {
        let mut node = Self::new(self.id, self.kind.clone());
        node.is_main_document = self.is_main_document;
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TraceEvent;

    #[test]
    fn network_times_are_in_microseconds() {
        let mut record = NetworkRecord::new("1", "https://example.com/").unwrap();
        record.network_request_time = 10.0;
        record.network_end_time = 25.5;
        let node = Node::new(NodeId::ONE, NodeKind::Network(NetworkNode::new(Arc::new(record))));

        assert_eq!(node.node_type(), NodeType::Network);
        assert_eq!(node.start_time(), 10_000.0);
        assert_eq!(node.end_time(), 25_500.0);
        assert!(node.as_cpu().is_none());
    }

    #[test]
    fn connectionless() {
        let mut cached = NetworkRecord::new("1", "https://example.com/a.css").unwrap();
        cached.from_disk_cache = true;
        let data = NetworkRecord::new("2", "data:text/plain,hello").unwrap();
        let live = NetworkRecord::new("3", "https://example.com/b.css").unwrap();

        assert!(NetworkNode::new(Arc::new(cached)).is_connectionless());
        assert!(NetworkNode::new(Arc::new(data)).is_connectionless());
        assert!(!NetworkNode::new(Arc::new(live)).is_connectionless());
    }

    #[test]
    fn clone_drops_edges_but_keeps_flags() {
        let task = CpuTask::new(TraceEvent::new("RunTask", 100, Some(50)), Vec::new());
        let mut node = Node::new(NodeId::new(7), NodeKind::Cpu(CpuNode::new(Arc::new(task))));
        node.set_main_document(true);
        node.dependencies.push(NodeId::ONE);
        node.dependents.push(NodeId::new(9));

        let clone = node.clone_without_relationships();

        assert_eq!(clone.id(), NodeId::new(7));
        assert!(clone.is_main_document());
        assert!(clone.dependencies().is_empty());
        assert!(clone.dependents().is_empty());
        assert_eq!(clone.end_time(), 150.0);
    }
}
