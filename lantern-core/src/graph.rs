//! The page-load dependency graph.
//!
//! Nodes live in an arena keyed by [`NodeId`]; edges are sets of ids on both
//! ends. All edge edits go through [`Graph`] so that the dependents of a node
//! are always the exact inverse of the dependencies declared on it.

use crate::{
    node::{CpuNode, NetworkNode, Node, NodeId, NodeKind, NodeType},
    record::NetworkRecord,
    task::CpuTask,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node ({node}) Not Found")]
    NodeNotFound { node: NodeId },
    #[error("Node ({node}) cannot depend on itself")]
    SelfDependency { node: NodeId },
    #[error("The graph has no node")]
    EmptyGraph,
    /// Every graph must have exactly one node without dependencies.
    #[error("The graph has more than one root: {roots:?}")]
    MultipleRoots { roots: Vec<NodeId> },
    #[error("The graph has a cycle going through node ({node})")]
    CycleDetected { node: NodeId },
}

/// A directed acyclic graph of network fetches and main-thread CPU tasks.
///
/// An edge `a -> b` means `a` depends on `b`: `b` must complete before `a`
/// may start. A well formed graph has a single root (the request for the
/// page) that every other node transitively depends on.
///
/// # Example
///
/// ```
/// use lantern_core::{graph::Graph, record::NetworkRecord};
///
/// let mut graph = Graph::new();
/// let document = graph
///     .new_network_node(NetworkRecord::new("1", "https://example.com/").unwrap())
///     .set_main_document(true)
///     .build();
/// let script = graph
///     .new_network_node(NetworkRecord::new("2", "https://example.com/app.js").unwrap())
///     .build();
/// graph.add_dependency(script, document).unwrap();
///
/// assert_eq!(graph.root().unwrap(), document);
/// assert_eq!(graph.main_document(), Some(document));
/// assert!(graph.is_dependent_on(script, document));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,

    /// the last assigned ID
    ///
    /// ID 0 is never given to a node
    id: NodeId,
}

/// Builder for a new node before registering it in the [`Graph`].
///
/// Obtained via [`Graph::new_network_node`] or [`Graph::new_cpu_node`].
pub struct NodeBuilder<'a> {
    kind: NodeKind,
    is_main_document: bool,

    graph: &'a mut Graph,
}

impl NodeBuilder<'_> {
    /// Flag the node as the page's main document. Any node previously
    /// flagged loses the flag.
    pub fn set_main_document(mut self, is_main_document: bool) -> Self {
        self.is_main_document = is_main_document;
        self
    }

    /// Register the node and return its identifier.
    pub fn build(self) -> NodeId {
        let Self {
            kind,
            is_main_document,
            graph,
        } = self;

        let id = graph.id.next();
        graph.id = id;

        if is_main_document {
            graph.clear_main_document();
        }
        let mut node = Node::new(id, kind);
        node.set_main_document(is_main_document);
        graph.nodes.insert(id, node);

        id
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            id: NodeId::ZERO,
        }
    }

    pub fn new_network_node(&mut self, record: impl Into<Arc<NetworkRecord>>) -> NodeBuilder<'_> {
        self.new_node(NodeKind::Network(NetworkNode::new(record.into())))
    }

    pub fn new_cpu_node(&mut self, task: impl Into<Arc<CpuTask>>) -> NodeBuilder<'_> {
        self.new_node(NodeKind::Cpu(CpuNode::new(task.into())))
    }

    fn new_node(&mut self, kind: NodeKind) -> NodeBuilder<'_> {
        NodeBuilder {
            kind,
            is_main_document: false,
            graph: self,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Like [`Graph::node`] but fails with [`GraphError::NodeNotFound`].
    pub fn get(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(&id)
            .ok_or(GraphError::NodeNotFound { node: id })
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(&id)
            .ok_or(GraphError::NodeNotFound { node: id })
    }

    /// Every node, in identifier order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node_ids_by_type(&self, node_type: NodeType) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.node_type() == node_type)
            .map(Node::id)
            .collect()
    }

    /// The records of every network node, in identifier order.
    pub fn network_records(&self) -> impl Iterator<Item = &NetworkRecord> {
        self.nodes.values().filter_map(Node::record)
    }

    /// Make `node` depend on `dependency`.
    ///
    /// Adding an edge that already exists is a no-op. Cycles are not
    /// rejected here, callers that must not create one check
    /// [`Graph::is_dependent_on`] first.
    pub fn add_dependency(&mut self, node: NodeId, dependency: NodeId) -> Result<(), GraphError> {
        if node == dependency {
            return Err(GraphError::SelfDependency { node });
        }
        self.get(dependency)?;

        let n = self.get_mut(node)?;
        if n.dependencies.contains(&dependency) {
            return Ok(());
        }
        n.dependencies.push(dependency);
        self.get_mut(dependency)?.dependents.push(node);

        Ok(())
    }

    /// Remove the edge `node -> dependency`, returns `false` if there was
    /// no such edge.
    pub fn remove_dependency(
        &mut self,
        node: NodeId,
        dependency: NodeId,
    ) -> Result<bool, GraphError> {
        self.get(dependency)?;

        let n = self.get_mut(node)?;
        let Some(index) = n.dependencies.iter().position(|id| *id == dependency) else {
            return Ok(false);
        };
        n.dependencies.remove(index);
        self.get_mut(dependency)?
            .dependents
            .retain(|dependent| *dependent != node);

        Ok(true)
    }

    pub fn remove_all_dependencies(&mut self, node: NodeId) -> Result<(), GraphError> {
        let dependencies = std::mem::take(&mut self.get_mut(node)?.dependencies);
        for dependency in dependencies {
            if let Some(d) = self.nodes.get_mut(&dependency) {
                d.dependents.retain(|dependent| *dependent != node);
            }
        }
        Ok(())
    }

    /// Remove a node from the graph. Every dependent of the node inherits
    /// the node's dependencies so the ordering constraints it carried are
    /// preserved.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or(GraphError::NodeNotFound { node: id })?;

        for dependency in &node.dependencies {
            if let Some(d) = self.nodes.get_mut(dependency) {
                d.dependents.retain(|dependent| *dependent != id);
            }
        }
        for dependent in &node.dependents {
            if let Some(d) = self.nodes.get_mut(dependent) {
                d.dependencies.retain(|dependency| *dependency != id);
            }
        }
        for &dependent in &node.dependents {
            for &dependency in &node.dependencies {
                if dependent != dependency {
                    self.add_dependency(dependent, dependency)?;
                }
            }
        }

        Ok(node)
    }

    /// Flag `id` as the main document, clearing the flag everywhere else.
    pub fn set_main_document(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.get(id)?;
        self.clear_main_document();
        self.get_mut(id)?.set_main_document(true);
        Ok(())
    }

    fn clear_main_document(&mut self) {
        for node in self.nodes.values_mut() {
            node.set_main_document(false);
        }
    }

    pub fn main_document(&self) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| node.is_main_document())
            .map(Node::id)
    }

    /// The unique node without dependencies.
    pub fn root(&self) -> Result<NodeId, GraphError> {
        let roots: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| node.dependencies.is_empty())
            .map(Node::id)
            .collect();

        match roots.as_slice() {
            [] if self.nodes.is_empty() => Err(GraphError::EmptyGraph),
            // every node has a dependency: there must be a cycle
            [] => Err(self
                .find_cycle()
                .map_or(GraphError::EmptyGraph, |node| GraphError::CycleDetected {
                    node,
                })),
            [root] => Ok(*root),
            _ => Err(GraphError::MultipleRoots { roots }),
        }
    }

    /// Depth-first visit of `start` and of every node reachable through
    /// dependents. Each node is visited exactly once.
    pub fn traverse<V>(&self, start: NodeId, visit: V) -> Result<(), GraphError>
    where
        V: FnMut(&Node),
    {
        self.traverse_with(start, |_, _| true, visit)
    }

    /// Like [`Graph::traverse`] but an edge from a node to one of its
    /// dependents is only followed when `follow(node, dependent)` holds.
    pub fn traverse_with<F, V>(
        &self,
        start: NodeId,
        mut follow: F,
        mut visit: V,
    ) -> Result<(), GraphError>
    where
        F: FnMut(&Node, &Node) -> bool,
        V: FnMut(&Node),
    {
        self.get(start)?;

        let mut visited = BTreeSet::new();
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let node = self.get(id)?;
            visit(node);

            for dependent in node.dependents.iter().rev() {
                if visited.contains(dependent) {
                    continue;
                }
                let next = self.get(*dependent)?;
                if follow(node, next) {
                    stack.push(*dependent);
                }
            }
        }

        Ok(())
    }

    /// `true` if `node` transitively depends on `target`.
    pub fn is_dependent_on(&self, node: NodeId, target: NodeId) -> bool {
        let mut visited = BTreeSet::new();
        let mut stack = vec![node];

        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(n) = self.nodes.get(&id) {
                stack.extend(n.dependencies.iter().copied());
            }
        }

        false
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    pub fn ensure_acyclic(&self) -> Result<(), GraphError> {
        match self.find_cycle() {
            Some(node) => Err(GraphError::CycleDetected { node }),
            None => Ok(()),
        }
    }

    /// Colour based depth-first search over the dependencies of every node.
    /// Returns a node on the first cycle found.
    fn find_cycle(&self) -> Option<NodeId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<NodeId, Mark> = BTreeMap::new();

        for &start in self.nodes.keys() {
            if marks.contains_key(&start) {
                continue;
            }

            // (node, index of the next dependency to explore)
            let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::InProgress);

            while let Some((id, index)) = stack.pop() {
                let dependencies = self
                    .nodes
                    .get(&id)
                    .map(|node| node.dependencies.as_slice())
                    .unwrap_or_default();

                let Some(&next) = dependencies.get(index) else {
                    marks.insert(id, Mark::Done);
                    continue;
                };
                stack.push((id, index + 1));

                match marks.get(&next) {
                    Some(Mark::InProgress) => return Some(next),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::InProgress);
                        stack.push((next, 0));
                    }
                }
            }
        }

        None
    }

    /// A new graph made of fresh copies of the nodes matching `predicate`,
    /// plus every node they transitively depend on. Edges between retained
    /// nodes are preserved; node ids are kept.
    ///
    /// The original graph is left untouched.
    pub fn clone_with_relationships<P>(&self, mut predicate: P) -> Graph
    where
        P: FnMut(&Node) -> bool,
    {
        let mut included = BTreeSet::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| predicate(node))
            .map(Node::id)
            .collect();
        while let Some(id) = stack.pop() {
            if !included.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.dependencies.iter().copied());
            }
        }

        self.rebuild(&included, |_, _| true)
    }

    /// A new graph holding the nodes reachable from the root when only the
    /// edges accepted by `keep(dependency, dependent)` are followed. Edges
    /// refused by `keep` are dropped from the clone.
    ///
    /// This is how a node is deferred out of a page load: refuse every edge
    /// leading to it and it, and everything only it unlocks, disappears.
    pub fn clone_with_edges<K>(&self, mut keep: K) -> Result<Graph, GraphError>
    where
        K: FnMut(&Node, &Node) -> bool,
    {
        let root = self.root()?;
        let mut included = BTreeSet::new();
        self.traverse_with(root, &mut keep, |node| {
            included.insert(node.id());
        })?;

        Ok(self.rebuild(&included, keep))
    }

    fn rebuild<K>(&self, included: &BTreeSet<NodeId>, mut keep: K) -> Graph
    where
        K: FnMut(&Node, &Node) -> bool,
    {
        let mut graph = Graph {
            nodes: BTreeMap::new(),
            id: self.id,
        };

        for id in included {
            if let Some(node) = self.nodes.get(id) {
                graph.nodes.insert(*id, node.clone_without_relationships());
            }
        }

        for node in self.nodes.values() {
            if !included.contains(&node.id()) {
                continue;
            }
            for dependency in &node.dependencies {
                let Some(d) = self.nodes.get(dependency) else {
                    continue;
                };
                if included.contains(dependency) && keep(d, node) {
                    // both ends exist in the clone and the edge was valid
                    // in the original
                    let added = graph.add_dependency(node.id(), *dependency);
                    debug_assert!(added.is_ok(), "rebuilding edge failed: {added:?}");
                }
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TraceEvent;

    #[test]
    fn dependencies_and_dependents_are_symmetric() {
        let mut graph = Graph::new();
        let a = network(&mut graph, "https://a/");
        let b = network(&mut graph, "https://a/b.js");

        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(b, a).unwrap();

        assert_eq!(graph.get(b).unwrap().dependencies(), &[a]);
        assert_eq!(graph.get(a).unwrap().dependents(), &[b]);

        assert!(graph.remove_dependency(b, a).unwrap());
        assert!(!graph.remove_dependency(b, a).unwrap());
        assert!(graph.get(a).unwrap().dependents().is_empty());
    }

    #[test]
    fn ids_start_at_one() {
        let mut graph = Graph::new();
        assert_eq!(network(&mut graph, "https://a/"), NodeId::ONE);
        assert_eq!(network(&mut graph, "https://a/b"), NodeId::ONE.next());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut graph = Graph::new();
        let a = network(&mut graph, "https://a/");

        assert_eq!(
            graph.add_dependency(a, a),
            Err(GraphError::SelfDependency { node: a })
        );
        assert_eq!(
            graph.add_dependency(a, NodeId::new(42)),
            Err(GraphError::NodeNotFound {
                node: NodeId::new(42)
            })
        );
    }

    #[test]
    fn root() {
        let mut graph = Graph::new();
        assert_eq!(graph.root(), Err(GraphError::EmptyGraph));

        let a = network(&mut graph, "https://a/");
        let b = network(&mut graph, "https://a/b.js");
        assert_eq!(
            graph.root(),
            Err(GraphError::MultipleRoots { roots: vec![a, b] })
        );

        graph.add_dependency(b, a).unwrap();
        assert_eq!(graph.root(), Ok(a));
    }

    #[test]
    fn main_document_is_unique() {
        let mut graph = Graph::new();
        let a = graph
            .new_network_node(record("1", "https://a/"))
            .set_main_document(true)
            .build();
        let b = network(&mut graph, "https://b/");

        assert_eq!(graph.main_document(), Some(a));
        graph.set_main_document(b).unwrap();
        assert_eq!(graph.main_document(), Some(b));
        assert!(!graph.get(a).unwrap().is_main_document());
    }

    #[test]
    fn traverse_visits_each_node_once() {
        // a <- b <- d
        // a <- c <- d
        let (graph, [a, b, c, d]) = diamond();

        let mut visited = Vec::new();
        graph.traverse(a, |node| visited.push(node.id())).unwrap();

        assert_eq!(visited, vec![a, b, d, c]);
    }

    #[test]
    fn traverse_with_skips_refused_edges() {
        let (graph, [a, b, c, d]) = diamond();

        let mut visited = Vec::new();
        graph
            .traverse_with(a, |_, next| next.id() != b, |node| visited.push(node.id()))
            .unwrap();

        assert_eq!(visited, vec![a, c, d]);
    }

    #[test]
    fn is_dependent_on() {
        let (graph, [a, b, c, d]) = diamond();

        assert!(graph.is_dependent_on(d, a));
        assert!(graph.is_dependent_on(d, b));
        assert!(!graph.is_dependent_on(b, c));
        assert!(!graph.is_dependent_on(a, d));
    }

    #[test]
    fn cycle() {
        let (mut graph, [a, _, _, d]) = diamond();
        assert!(!graph.has_cycle());
        assert!(graph.ensure_acyclic().is_ok());

        graph.add_dependency(a, d).unwrap();

        assert!(graph.has_cycle());
        assert!(matches!(
            graph.ensure_acyclic(),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(matches!(
            graph.root(),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn remove_node_rewires_dependents() {
        let mut graph = Graph::new();
        let a = network(&mut graph, "https://a/");
        let b = cpu(&mut graph, 0, 5);
        let c = network(&mut graph, "https://a/c.js");
        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(c, b).unwrap();

        let removed = graph.remove_node(b).unwrap();

        assert_eq!(removed.id(), b);
        assert!(!graph.contains(b));
        assert_eq!(graph.get(c).unwrap().dependencies(), &[a]);
        assert_eq!(graph.get(a).unwrap().dependents(), &[c]);
    }

    #[test]
    fn clone_with_relationships_keeps_dependency_closure() {
        let (graph, [a, b, c, d]) = diamond();

        let clone = graph.clone_with_relationships(|node| node.id() == b);

        assert_eq!(clone.node_ids().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(clone.get(b).unwrap().dependencies(), &[a]);
        assert_eq!(clone.get(a).unwrap().dependents(), &[b]);

        // the original is untouched
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.get(a).unwrap().dependents(), &[b, c]);
        assert_eq!(graph.get(d).unwrap().dependencies(), &[b, c]);
    }

    #[test]
    fn clone_preserves_every_edge() {
        let (graph, _) = diamond();

        let clone = graph.clone_with_relationships(|_| true);

        for node in graph.nodes() {
            let cloned = clone.get(node.id()).unwrap();
            assert_eq!(cloned.dependencies(), node.dependencies());
            assert_eq!(cloned.dependents(), node.dependents());
        }
    }

    #[test]
    fn clone_is_independent() {
        let (graph, [a, _, _, d]) = diamond();

        let mut clone = graph.clone_with_relationships(|_| true);
        clone.remove_all_dependencies(d).unwrap();
        clone.add_dependency(d, a).unwrap();

        assert_eq!(clone.get(d).unwrap().dependencies(), &[a]);
        assert_eq!(graph.get(d).unwrap().dependencies().len(), 2);

        let e = network(&mut clone, "https://a/e");
        assert!(!graph.contains(e));
        assert!(e > d);
    }

    #[test]
    fn clone_with_edges_defers_nodes() {
        let mut graph = Graph::new();
        let a = network(&mut graph, "https://a/");
        let b = network(&mut graph, "https://a/deferred.js");
        let c = network(&mut graph, "https://a/only-after-deferred.js");
        let d = network(&mut graph, "https://a/other.js");
        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(c, b).unwrap();
        graph.add_dependency(d, a).unwrap();

        let clone = graph
            .clone_with_edges(|_, dependent| dependent.id() != b)
            .unwrap();

        assert_eq!(clone.node_ids().collect::<Vec<_>>(), vec![a, d]);
        assert_eq!(clone.root(), Ok(a));
    }

    #[test]
    fn node_ids_by_type() {
        let mut graph = Graph::new();
        let a = network(&mut graph, "https://a/");
        let b = cpu(&mut graph, 0, 5);

        assert_eq!(graph.node_ids_by_type(NodeType::Network), vec![a]);
        assert_eq!(graph.node_ids_by_type(NodeType::Cpu), vec![b]);
        assert_eq!(graph.network_records().count(), 1);
    }

    fn diamond() -> (Graph, [NodeId; 4]) {
        let mut graph = Graph::new();
        let a = network(&mut graph, "https://a/");
        let b = network(&mut graph, "https://a/b.js");
        let c = network(&mut graph, "https://a/c.js");
        let d = network(&mut graph, "https://a/d.js");
        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(c, a).unwrap();
        graph.add_dependency(d, b).unwrap();
        graph.add_dependency(d, c).unwrap();
        (graph, [a, b, c, d])
    }

    fn record(id: &str, url: &str) -> NetworkRecord {
        NetworkRecord::new(id, url).unwrap()
    }

    fn network(graph: &mut Graph, url: &str) -> NodeId {
        let id = (graph.len() + 1).to_string();
        graph.new_network_node(record(&id, url)).build()
    }

    fn cpu(graph: &mut Graph, ts: i64, dur: i64) -> NodeId {
        graph
            .new_cpu_node(CpuTask::new(TraceEvent::new("RunTask", ts, Some(dur)), Vec::new()))
            .build()
    }
}
