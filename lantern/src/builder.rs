//! Build the dependency [`Graph`] of a recorded page load.
//!
//! Network records become network nodes and main-thread tasks become CPU
//! nodes. Edges are inferred from what the recording tells about causality:
//!
//! * redirect hops depend on the hop before them;
//! * a request depends on the request for the script or document that
//!   initiated it, when that request can be told apart unambiguously;
//! * a task depends on the requests for the scripts it ran, the stylesheets
//!   it parsed and the document of the frame it worked on;
//! * a request depends on the task that sent it;
//! * a timer task depends on the task that installed the timer.
//!
//! Anything left without a dependency depends on the root request.

use crate::PageUrls;
use lantern_core::{
    defaults::SIGNIFICANT_TASK_DURATION_MS,
    graph::{Graph, GraphError},
    node::{NodeId, NodeType},
    record::{NetworkRecord, ResourceType, strip_fragment},
    task::{CpuTask, TraceEventData},
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, trace};

/// A script may still be running the end of its download when it starts
/// being evaluated.
const URL_DEPENDENCY_TOLERANCE_US: f64 = 100_000.0;

/// Requests a task can send on its own.
const TASK_INITIATED_TYPES: &[ResourceType] =
    &[ResourceType::Xhr, ResourceType::Fetch, ResourceType::Script];

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("No network record for the requested URL ({url})")]
    RootRequestNotFound { url: String },
    #[error("No document record for the main document URL ({url})")]
    MainDocumentNotFound { url: String },
    #[error("The main document ({main_document}) was not redirected from the root request ({root})")]
    RootNotInRedirectChain { root: String, main_document: String },
    #[error("The graph built has a cycle")]
    Cycle,
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Kinds of task kept in the graph the first time they occur, however
/// short they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalTaskKinds(Vec<String>);

impl Default for CriticalTaskKinds {
    fn default() -> Self {
        Self::new(["Layout", "Paint", "ParseHTML"])
    }
}

impl CriticalTaskKinds {
    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(kinds.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.0.iter().any(|k| k == kind)
    }
}

/// Builder of the [`Graph`] of a page load.
///
/// ```
/// use lantern::{NetworkRecord, PageGraphBuilder, PageUrls, ResourceType};
///
/// let mut document = NetworkRecord::new("1", "https://example.com/").unwrap();
/// document.resource_type = ResourceType::Document;
/// let graph = PageGraphBuilder::new(PageUrls::new("https://example.com/"))
///     .set_records([document])
///     .build()
///     .unwrap();
///
/// assert_eq!(graph.len(), 1);
/// assert_eq!(graph.main_document(), Some(graph.root().unwrap()));
/// ```
pub struct PageGraphBuilder {
    urls: PageUrls,
    records: Vec<NetworkRecord>,
    tasks: Vec<CpuTask>,
    critical_task_kinds: CriticalTaskKinds,
    significant_task_duration_ms: f64,
}

impl PageGraphBuilder {
    pub fn new(urls: PageUrls) -> Self {
        Self {
            urls,
            records: Vec::new(),
            tasks: Vec::new(),
            critical_task_kinds: CriticalTaskKinds::default(),
            significant_task_duration_ms: SIGNIFICANT_TASK_DURATION_MS,
        }
    }

    pub fn set_records<I>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = NetworkRecord>,
    {
        self.records = records.into_iter().collect();
        self
    }

    /// Main-thread top-level tasks, see [`MainThreadTasks`](crate::MainThreadTasks).
    pub fn set_tasks<I>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = CpuTask>,
    {
        self.tasks = tasks.into_iter().collect();
        self
    }

    pub fn set_critical_task_kinds(mut self, kinds: CriticalTaskKinds) -> Self {
        self.critical_task_kinds = kinds;
        self
    }

    /// Tasks shorter than this are dropped from the graph unless they are
    /// critical or bridge two requests.
    pub fn set_significant_task_duration(mut self, duration_ms: f64) -> Self {
        self.significant_task_duration_ms = duration_ms;
        self
    }

    pub fn build(self) -> Result<Graph, BuildError> {
        let Self {
            urls,
            records,
            tasks,
            critical_task_kinds,
            significant_task_duration_ms,
        } = self;

        let mut assembly = Assembly::new(records);
        let root = assembly.find_root(&urls.requested_url)?;
        let main_document = assembly.find_main_document(&urls.main_document_url)?;
        assembly.check_redirect_chain(root, main_document)?;
        assembly.root = root;

        assembly.link_network_nodes()?;
        assembly.add_cpu_nodes(tasks);
        assembly.link_cpu_nodes()?;
        assembly.prune_cpu_nodes(&critical_task_kinds, significant_task_duration_ms * 1_000.0)?;
        assembly.attach_orphans()?;

        let Assembly { mut graph, .. } = assembly;
        graph.set_main_document(main_document)?;
        if graph.has_cycle() {
            return Err(BuildError::Cycle);
        }

        debug!(
            network = graph.node_ids_by_type(NodeType::Network).len(),
            cpu = graph.node_ids_by_type(NodeType::Cpu).len(),
            root = %root,
            main_document = %main_document,
            "page graph built"
        );

        Ok(graph)
    }
}

struct NetworkEntry {
    id: NodeId,
    record: Arc<NetworkRecord>,
}

/// Observed position of a node: start and end in microseconds, and the
/// order it was added in to break ties.
#[derive(Clone, Copy)]
struct Span {
    start: f64,
    end: f64,
    order: usize,
}

impl Span {
    fn precedes(&self, other: &Span) -> bool {
        (self.start, self.order) < (other.start, other.order)
    }
}

struct Assembly {
    graph: Graph,
    root: NodeId,

    network: Vec<NetworkEntry>,
    cpu: Vec<(NodeId, Arc<CpuTask>)>,
    spans: BTreeMap<NodeId, Span>,

    by_request_id: HashMap<String, NodeId>,
    by_url: HashMap<String, Vec<NodeId>>,
    /// document of each frame, first one wins
    by_frame: HashMap<String, NodeId>,
}

impl Assembly {
    fn new(records: Vec<NetworkRecord>) -> Self {
        let mut assembly = Self {
            graph: Graph::new(),
            root: NodeId::ZERO,
            network: Vec::with_capacity(records.len()),
            cpu: Vec::new(),
            spans: BTreeMap::new(),
            by_request_id: HashMap::new(),
            by_url: HashMap::new(),
            by_frame: HashMap::new(),
        };

        for mut record in records {
            if record.from_worker || record.mime_type.starts_with("video/") {
                trace!(request_id = %record.request_id, "skipping record");
                continue;
            }
            while assembly.by_request_id.contains_key(&record.request_id) {
                record.request_id.push_str(":duplicate");
            }

            let record = Arc::new(record);
            let id = assembly.graph.new_network_node(Arc::clone(&record)).build();
            let span = Span {
                start: record.network_request_time * 1_000.0,
                end: record.network_end_time * 1_000.0,
                order: assembly.spans.len(),
            };
            assembly.spans.insert(id, span);

            assembly
                .by_request_id
                .insert(record.request_id.clone(), id);
            assembly
                .by_url
                .entry(record.url.clone())
                .or_default()
                .push(id);
            if let Some(frame) = record.frame_id.as_ref()
                && record.resource_type == ResourceType::Document
                && record.document_url.as_deref() == Some(record.url.as_str())
            {
                assembly.by_frame.entry(frame.clone()).or_insert(id);
            }

            assembly.network.push(NetworkEntry { id, record });
        }

        assembly
    }

    fn find_root(&self, requested_url: &str) -> Result<NodeId, BuildError> {
        let url = strip_fragment(requested_url);
        self.network
            .iter()
            .find(|entry| entry.record.url_without_fragment() == url)
            .map(|entry| entry.id)
            .ok_or_else(|| BuildError::RootRequestNotFound {
                url: requested_url.to_owned(),
            })
    }

    fn find_main_document(&self, main_document_url: &str) -> Result<NodeId, BuildError> {
        let url = strip_fragment(main_document_url);
        self.network
            .iter()
            .rev()
            .find(|entry| {
                entry.record.resource_type == ResourceType::Document
                    && !entry.record.failed
                    && entry.record.url_without_fragment() == url
            })
            .map(|entry| entry.id)
            .ok_or_else(|| BuildError::MainDocumentNotFound {
                url: main_document_url.to_owned(),
            })
    }

    fn check_redirect_chain(&self, root: NodeId, main_document: NodeId) -> Result<(), BuildError> {
        if root == main_document {
            return Ok(());
        }
        let (Some(root), Some(main_document)) = (self.record(root), self.record(main_document))
        else {
            return Ok(());
        };
        if main_document.redirects.contains(&root.request_id) {
            Ok(())
        } else {
            Err(BuildError::RootNotInRedirectChain {
                root: root.request_id.clone(),
                main_document: main_document.request_id.clone(),
            })
        }
    }

    fn record(&self, id: NodeId) -> Option<&NetworkRecord> {
        self.network
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.record.as_ref())
    }

    fn span(&self, id: NodeId) -> Option<Span> {
        self.spans.get(&id).copied()
    }

    /// Make `node` depend on `dependency` unless that would make the root
    /// depend on something or close a cycle. Returns whether the edge was
    /// added.
    fn link(&mut self, node: NodeId, dependency: NodeId) -> Result<bool, GraphError> {
        if node == dependency
            || node == self.root
            || self.graph.is_dependent_on(dependency, node)
        {
            return Ok(false);
        }
        self.graph.add_dependency(node, dependency)?;
        Ok(true)
    }

    fn link_network_nodes(&mut self) -> Result<(), GraphError> {
        let entries: Vec<(NodeId, Arc<NetworkRecord>)> = self
            .network
            .iter()
            .map(|entry| (entry.id, Arc::clone(&entry.record)))
            .collect();

        for (id, record) in &entries {
            let id = *id;
            if id == self.root {
                continue;
            }

            self.link_initiator(id, record)?;

            if let Some(source) = record
                .redirect_source
                .as_ref()
                .and_then(|source| self.by_request_id.get(source))
                .copied()
            {
                self.link(id, source)?;
            }
            let mut previous: Option<NodeId> = None;
            for hop in record.redirects.iter().map(String::as_str) {
                let hop = self.by_request_id.get(hop).copied();
                if let (Some(previous), Some(hop)) = (previous, hop) {
                    self.link(hop, previous)?;
                }
                previous = hop.or(previous);
            }
            if let Some(previous) = previous {
                self.link(id, previous)?;
            }

            if self.graph.get(id)?.dependencies().is_empty() {
                self.link(id, self.root)?;
            }
        }

        Ok(())
    }

    /// Depend on the request that initiated `record`: the request for the
    /// most specific initiator URL fetched by a single request which ended
    /// before this one started, or else the recorded initiator request.
    fn link_initiator(&mut self, id: NodeId, record: &NetworkRecord) -> Result<(), GraphError> {
        let Some(span) = self.span(id) else {
            return Ok(());
        };

        for url in record.initiator.urls() {
            let candidate = match self.by_url.get(url).map(Vec::as_slice) {
                Some(&[candidate]) => candidate,
                _ => continue,
            };
            let Some(candidate_span) = self.span(candidate) else {
                continue;
            };
            if candidate_span.end <= span.start
                && candidate_span.precedes(&span)
                && self.link(id, candidate)?
            {
                return Ok(());
            }
        }

        let hint = record
            .initiator_request
            .as_ref()
            .and_then(|request_id| self.by_request_id.get(request_id))
            .copied();
        if let Some(hint) = hint
            && self.span(hint).is_some_and(|hint| hint.precedes(&span))
        {
            self.link(id, hint)?;
        }

        Ok(())
    }

    fn add_cpu_nodes(&mut self, mut tasks: Vec<CpuTask>) {
        tasks.sort_by_key(CpuTask::start_time);

        for task in tasks {
            if task.duration() <= 0 {
                continue;
            }
            let task = Arc::new(task);
            let id = self.graph.new_cpu_node(Arc::clone(&task)).build();
            self.spans.insert(
                id,
                Span {
                    start: task.start_time() as f64,
                    end: task.end_time() as f64,
                    order: self.spans.len(),
                },
            );
            self.cpu.push((id, task));
        }
    }

    fn link_cpu_nodes(&mut self) -> Result<(), GraphError> {
        let mut timers: HashMap<u64, NodeId> = HashMap::new();
        let cpu = self.cpu.clone();

        for (id, task) in &cpu {
            let id = *id;

            for event in task.children() {
                let Some(data) = event.data() else {
                    continue;
                };

                match event.name.as_str() {
                    "TimerInstall" => {
                        if let Some(timer) = data.timer_id {
                            timers.insert(timer, id);
                        }
                        self.depend_on_stack(id, data)?;
                    }
                    "TimerFire" => {
                        let installer = data.timer_id.and_then(|timer| timers.get(&timer)).copied();
                        if let Some(installer) = installer
                            && installer != id
                            && self
                                .span(installer)
                                .zip(self.span(id))
                                .is_some_and(|(installer, task)| installer.end <= task.start)
                        {
                            self.link(id, installer)?;
                        }
                    }
                    "InvalidateLayout" | "ScheduleStyleRecalculation" => {
                        self.depend_on_frame(id, data.frame.as_deref())?;
                        self.depend_on_stack(id, data)?;
                    }
                    "EvaluateScript" => {
                        self.depend_on_frame(id, data.frame.as_deref())?;
                        self.depend_on_url(id, data.url.as_deref())?;
                        self.depend_on_stack(id, data)?;
                    }
                    "XHRReadyStateChange" => {
                        // only a completed request unblocks its handlers
                        if data.ready_state == Some(4) {
                            self.depend_on_url(id, data.url.as_deref())?;
                            self.depend_on_stack(id, data)?;
                        }
                    }
                    "FunctionCall" | "v8.compile" => {
                        self.depend_on_frame(id, data.frame.as_deref())?;
                        self.depend_on_url(id, data.url.as_deref())?;
                    }
                    "ParseAuthorStyleSheet" => {
                        self.depend_on_frame(id, data.frame.as_deref())?;
                        self.depend_on_url(id, data.style_sheet_url.as_deref())?;
                    }
                    "ResourceSendRequest" => {
                        self.depend_on_frame(id, data.frame.as_deref())?;
                        self.add_dependent_request(id, data.request_id.as_deref())?;
                        self.depend_on_stack(id, data)?;
                    }
                    _ => {}
                }
            }

            if self.graph.get(id)?.dependencies().is_empty() {
                self.link(id, self.root)?;
            }
        }

        Ok(())
    }

    fn depend_on_stack(&mut self, id: NodeId, data: &TraceEventData) -> Result<(), GraphError> {
        for url in data.stack_trace_urls() {
            self.depend_on_url(id, Some(url))?;
        }
        Ok(())
    }

    /// Depend on the request for `url` that ended closest to the task
    /// start, among those that started before the task.
    fn depend_on_url(&mut self, id: NodeId, url: Option<&str>) -> Result<(), GraphError> {
        let (Some(url), Some(task)) = (url, self.span(id)) else {
            return Ok(());
        };
        let Some(candidates) = self.by_url.get(url) else {
            return Ok(());
        };

        let mut closest: Option<(NodeId, f64)> = None;
        for candidate in candidates {
            let Some(span) = self.spans.get(candidate) else {
                continue;
            };
            if span.start >= task.start {
                continue;
            }
            let distance = task.start - span.end;
            if distance >= -URL_DEPENDENCY_TOLERANCE_US
                && closest.is_none_or(|(_, closest)| distance < closest)
            {
                closest = Some((*candidate, distance));
            }
        }

        if let Some((candidate, _)) = closest {
            self.link(id, candidate)?;
        }
        Ok(())
    }

    fn depend_on_frame(&mut self, id: NodeId, frame: Option<&str>) -> Result<(), GraphError> {
        let Some(document) = frame.and_then(|frame| self.by_frame.get(frame)).copied() else {
            return Ok(());
        };
        let started_before = self
            .span(document)
            .zip(self.span(id))
            .is_some_and(|(document, task)| document.start < task.start);
        if started_before {
            self.link(id, document)?;
        }
        Ok(())
    }

    fn add_dependent_request(
        &mut self,
        id: NodeId,
        request_id: Option<&str>,
    ) -> Result<(), GraphError> {
        let Some(request) = request_id
            .and_then(|request_id| self.by_request_id.get(request_id))
            .copied()
        else {
            return Ok(());
        };
        let initiable = self
            .record(request)
            .is_some_and(|record| TASK_INITIATED_TYPES.contains(&record.resource_type));
        let started_after = self
            .span(request)
            .zip(self.span(id))
            .is_some_and(|(request, task)| request.start > task.start);

        if initiable && started_after {
            self.link(request, id)?;
        }
        Ok(())
    }

    /// Remove the short tasks that neither are the first of a critical kind
    /// nor sit between a request they depend on and a request they sent.
    fn prune_cpu_nodes(
        &mut self,
        critical: &CriticalTaskKinds,
        significant_duration_us: f64,
    ) -> Result<(), GraphError> {
        let mut found: HashSet<&str> = HashSet::new();
        let cpu = std::mem::take(&mut self.cpu);
        let mut kept = Vec::with_capacity(cpu.len());

        for (id, task) in cpu {
            let mut first_of_kind = false;
            for kind in critical.iter() {
                if !found.contains(kind) && task.has_event(kind) {
                    found.insert(kind);
                    first_of_kind = true;
                }
            }

            if first_of_kind
                || task.duration() as f64 >= significant_duration_us
                || self.is_highly_connected(id)?
            {
                kept.push((id, task));
                continue;
            }

            trace!(node = %id, duration = task.duration(), "pruning short task");
            self.graph.remove_node(id)?;
            self.spans.remove(&id);
        }

        self.cpu = kept;
        Ok(())
    }

    fn is_highly_connected(&self, id: NodeId) -> Result<bool, GraphError> {
        let node = self.graph.get(id)?;
        let is_network = |other: &NodeId| {
            self.graph
                .node(*other)
                .is_some_and(|other| other.node_type() == NodeType::Network)
        };

        Ok(node.dependencies().iter().any(is_network) && node.dependents().iter().any(is_network))
    }

    fn attach_orphans(&mut self) -> Result<(), GraphError> {
        let orphans: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|node| node.id() != self.root && node.dependencies().is_empty())
            .map(|node| node.id())
            .collect();

        for orphan in orphans {
            self.link(orphan, self.root)?;
        }
        Ok(())
    }
}
