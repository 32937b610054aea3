//! Discrete-event simulation of a page-load [`Graph`].
//!
//! The [`Simulator`] replays a graph under a throttling profile: it
//! advances a virtual clock from one node completion to the next, starting
//! nodes as soon as their dependencies are complete and resources (the main
//! thread, connections, request slots) allow.

mod connection;
mod dns;
mod options;
mod pool;
mod timing;

pub use self::{
    connection::{
        DownloadOptions, DownloadResult, INITIAL_CONGESTION_WINDOW, TCP_SEGMENT_SIZE,
        TcpConnection,
    },
    dns::DnsCache,
    options::{SimulationOptions, SimulationOptionsBuilder},
    pool::{ConnectionKey, ConnectionPool},
    timing::{NodeTiming, SimulationResult},
};
use self::timing::NodeProgress;
use crate::{
    defaults::{DEFAULT_MAXIMUM_CPU_TASK_DURATION_MS, MAXIMUM_ITERATIONS},
    graph::{Graph, GraphError},
    node::{NodeId, NodeKind},
    record::NetworkRecord,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Cannot simulate a graph with a cycle")]
    Cycle,
    /// Nothing could be started even when ignoring the connection reuse
    /// observed in the recording.
    #[error("Failed to start a node, {ready} node(s) ready but none could start")]
    FailedToStartNode { ready: usize },
    /// The clock stopped making progress, this is always a bug.
    #[error("Simulation failed, depth exceeded after {iterations} iterations")]
    DepthExceeded { iterations: usize },
    #[error("Invalid simulation options: {reason}")]
    InvalidOptions { reason: String },
    #[error("Could not find an active connection for request ({request_id})")]
    MissingConnection { request_id: String },
    #[error("Request ({request_id}) already holds a connection")]
    ConnectionAlreadyAcquired { request_id: String },
    /// Connections are tracked by request id, which must be unique across
    /// the simulated graph.
    #[error("Request id ({request_id}) is used by more than one node")]
    DuplicateRequestId { request_id: String },
    #[error("{0}")]
    Graph(#[from] GraphError),
}

/// Per-call simulation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulateOptions {
    /// Ignore whether requests reused a connection in the recording. The
    /// simulator switches to this mode on its own when replaying the
    /// observed reuse would deadlock.
    pub flexible_ordering: bool,
    /// Clock steps allowed before giving up with
    /// [`SimulationError::DepthExceeded`].
    pub maximum_iterations: usize,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            flexible_ordering: false,
            maximum_iterations: MAXIMUM_ITERATIONS,
        }
    }
}

/// Where a node is in its lifecycle during a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    NotReadyToStart,
    ReadyToStart,
    InProgress,
    Complete,
}

/// Replays page-load graphs under a throttling profile.
///
/// A `Simulator` holds no state between calls: every call to
/// [`simulate`](Simulator::simulate) builds its own connection pool, DNS
/// cache and timings, so the same simulator may be used for any number of
/// graphs and the same graph always yields the same result.
///
/// # Example
///
/// ```
/// use lantern_core::{
///     graph::Graph,
///     record::NetworkRecord,
///     simulator::{SimulationOptions, Simulator},
/// };
///
/// let mut graph = Graph::new();
/// let mut record = NetworkRecord::new("1", "http://example.com/").unwrap();
/// record.transfer_size = 1_000;
/// let root = graph.new_network_node(record).build();
///
/// let options = SimulationOptions::builder()
///     .set_rtt("100ms".parse().unwrap())
///     .set_throughput("10mbps".parse().unwrap())
///     .build();
/// let simulator = Simulator::new(options).unwrap();
/// let result = simulator.simulate(&graph).unwrap();
///
/// // DNS (2 round trips), TCP handshake, server response, first byte
/// assert_eq!(result.time_in_ms, 200.0 + 150.0 + 30.0 + 50.0);
/// assert_eq!(result.timing(root).unwrap().end_time, result.time_in_ms);
/// ```
#[derive(Debug, Clone)]
pub struct Simulator {
    options: SimulationOptions,
    maximum_concurrent_requests: usize,
}

impl Simulator {
    pub fn new(options: SimulationOptions) -> Result<Self, SimulationError> {
        options.validate()?;

        let saturated = TcpConnection::maximum_saturated_connections(
            options.rtt.as_millis_f64(),
            options.throughput.bits_per_sec() as f64,
        );
        let maximum_concurrent_requests = saturated
            .min(options.maximum_concurrent_requests)
            .max(1);

        Ok(Self {
            options,
            maximum_concurrent_requests,
        })
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    /// The effective bound on network requests in flight: the configured
    /// one, lowered to what the throughput can saturate.
    pub fn maximum_concurrent_requests(&self) -> usize {
        self.maximum_concurrent_requests
    }

    pub fn simulate(&self, graph: &Graph) -> Result<SimulationResult, SimulationError> {
        self.simulate_with(graph, SimulateOptions::default())
    }

    pub fn simulate_with(
        &self,
        graph: &Graph,
        options: SimulateOptions,
    ) -> Result<SimulationResult, SimulationError> {
        if graph.has_cycle() {
            return Err(SimulationError::Cycle);
        }
        let root = graph.root()?;

        let mut state = SimulationState::new(self, graph, root, options)?;
        let time_in_ms = state.run(root)?;

        Ok(SimulationResult {
            time_in_ms,
            node_timings: state.into_node_timings(),
        })
    }
}

/// Everything mutable about one simulation run.
struct SimulationState<'a> {
    graph: &'a Graph,
    options: &'a SimulationOptions,
    maximum_concurrent_requests: usize,
    maximum_iterations: usize,
    flexible_ordering: bool,

    pool: ConnectionPool,
    dns: DnsCache,

    states: BTreeMap<NodeId, NodeState>,
    /// ready nodes, sorted by start position then id
    ready: Vec<(f64, NodeId)>,
    in_progress: BTreeSet<NodeId>,
    cpu_in_progress: usize,
    network_in_progress: usize,

    progress: BTreeMap<NodeId, NodeProgress>,
}

impl<'a> SimulationState<'a> {
    fn new(
        simulator: &'a Simulator,
        graph: &'a Graph,
        root: NodeId,
        options: SimulateOptions,
    ) -> Result<Self, SimulationError> {
        let mut states = BTreeMap::new();
        graph.traverse(root, |node| {
            states.insert(node.id(), NodeState::NotReadyToStart);
        })?;

        let records: Vec<&NetworkRecord> = states
            .keys()
            .filter_map(|id| graph.node(*id))
            .filter_map(|node| node.as_network())
            .map(|network| network.record())
            .collect();
        let mut request_ids = HashSet::with_capacity(records.len());
        for record in &records {
            if !request_ids.insert(record.request_id.as_str()) {
                return Err(SimulationError::DuplicateRequestId {
                    request_id: record.request_id.clone(),
                });
            }
        }
        let pool = ConnectionPool::new(records, &simulator.options);

        Ok(Self {
            graph,
            options: &simulator.options,
            maximum_concurrent_requests: simulator.maximum_concurrent_requests,
            maximum_iterations: options.maximum_iterations,
            flexible_ordering: options.flexible_ordering,
            pool,
            dns: DnsCache::new(simulator.options.rtt.as_millis_f64()),
            states,
            ready: Vec::new(),
            in_progress: BTreeSet::new(),
            cpu_in_progress: 0,
            network_in_progress: 0,
            progress: BTreeMap::new(),
        })
    }

    fn run(&mut self, root: NodeId) -> Result<f64, SimulationError> {
        debug!(
            nodes = self.states.len(),
            rtt = %self.options.rtt,
            throughput = %self.options.throughput,
            maximum_concurrent_requests = self.maximum_concurrent_requests,
            "starting simulation"
        );

        let mut total_elapsed_time = 0.0;
        let mut iteration = 0;

        self.mark_ready(root, total_elapsed_time)?;

        while !self.ready.is_empty() || !self.in_progress.is_empty() {
            let candidates: Vec<NodeId> = self.ready.iter().map(|(_, id)| *id).collect();
            for id in candidates {
                self.start_node_if_possible(id, total_elapsed_time)?;
            }

            if self.in_progress.is_empty() {
                // with a pool built from this graph every origin has an idle
                // connection once nothing is in progress, so this only
                // guards against a broken admission loop
                if self.flexible_ordering {
                    return Err(SimulationError::FailedToStartNode {
                        ready: self.ready.len(),
                    });
                }
                warn!(
                    ready = self.ready.len(),
                    "no node could start, ignoring observed connection reuse"
                );
                self.flexible_ordering = true;
                continue;
            }

            self.pool
                .distribute_throughput(self.options.throughput.bits_per_sec() as f64);

            let minimum_time = self.find_next_node_completion_time()?;
            total_elapsed_time += minimum_time;

            if !total_elapsed_time.is_finite() || iteration > self.maximum_iterations {
                return Err(SimulationError::DepthExceeded {
                    iterations: iteration,
                });
            }
            iteration += 1;
            trace!(
                iteration,
                step = minimum_time,
                elapsed = total_elapsed_time,
                in_progress = self.in_progress.len(),
                "advancing clock"
            );

            let in_progress: Vec<NodeId> = self.in_progress.iter().copied().collect();
            for id in in_progress {
                self.update_progress_made_in_time_period(id, minimum_time, total_elapsed_time)?;
            }
        }

        debug!(
            time_in_ms = total_elapsed_time,
            iterations = iteration,
            "simulation complete"
        );

        Ok(total_elapsed_time)
    }

    fn into_node_timings(self) -> BTreeMap<NodeId, NodeTiming> {
        self.progress
            .into_iter()
            .filter_map(|(id, progress)| progress.timing().map(|timing| (id, timing)))
            .collect()
    }

    fn progress_mut(&mut self, id: NodeId) -> Result<&mut NodeProgress, SimulationError> {
        self.progress
            .get_mut(&id)
            .ok_or(SimulationError::Graph(GraphError::NodeNotFound { node: id }))
    }

    fn start_position(&self, id: NodeId) -> Result<f64, SimulationError> {
        let node = self.graph.get(id)?;
        Ok(match node.kind() {
            NodeKind::Cpu(cpu) => cpu.start_time(),
            NodeKind::Network(network) => {
                network.start_time() + network.record().priority.start_penalty_us()
            }
        })
    }

    fn mark_ready(&mut self, id: NodeId, queued_time: f64) -> Result<(), SimulationError> {
        // ordered by start position and priority rather than by node id
        // alone, the id only breaks ties
        let position = self.start_position(id)?;
        let index = self.ready.partition_point(|(p, other)| {
            p.total_cmp(&position).then_with(|| other.cmp(&id)).is_lt()
        });
        self.ready.insert(index, (position, id));

        self.states.insert(id, NodeState::ReadyToStart);
        self.progress.insert(id, NodeProgress::queued(queued_time));
        Ok(())
    }

    fn mark_in_progress(&mut self, id: NodeId, start_time: f64) -> Result<(), SimulationError> {
        self.ready.retain(|(_, other)| *other != id);
        self.in_progress.insert(id);
        self.states.insert(id, NodeState::InProgress);

        match self.graph.get(id)?.kind() {
            NodeKind::Cpu(_) => self.cpu_in_progress += 1,
            NodeKind::Network(_) => self.network_in_progress += 1,
        }

        self.progress_mut(id)?.start_time = Some(start_time);
        Ok(())
    }

    fn mark_complete(&mut self, id: NodeId, end_time: f64) -> Result<(), SimulationError> {
        let graph = self.graph;
        let node = graph.get(id)?;

        self.in_progress.remove(&id);
        self.states.insert(id, NodeState::Complete);
        match node.kind() {
            NodeKind::Cpu(_) => self.cpu_in_progress -= 1,
            NodeKind::Network(_) => self.network_in_progress -= 1,
        }
        self.progress_mut(id)?.end_time = Some(end_time);

        for dependent in node.dependents() {
            if self.states.get(dependent) != Some(&NodeState::NotReadyToStart) {
                continue;
            }
            let dependencies_complete = graph
                .get(*dependent)?
                .dependencies()
                .iter()
                .all(|dependency| self.states.get(dependency) == Some(&NodeState::Complete));
            if dependencies_complete {
                self.mark_ready(*dependent, end_time)?;
            }
        }

        Ok(())
    }

    fn start_node_if_possible(
        &mut self,
        id: NodeId,
        total_elapsed_time: f64,
    ) -> Result<(), SimulationError> {
        let graph = self.graph;
        match graph.get(id)?.kind() {
            NodeKind::Cpu(_) => {
                // a single main thread
                if self.cpu_in_progress == 0 {
                    self.mark_in_progress(id, total_elapsed_time)?;
                }
            }
            NodeKind::Network(network) if network.is_connectionless() => {
                self.mark_in_progress(id, total_elapsed_time)?;
            }
            NodeKind::Network(network) => {
                if self.network_in_progress >= self.maximum_concurrent_requests {
                    return Ok(());
                }
                if self
                    .pool
                    .acquire(network.record(), self.flexible_ordering)?
                    .is_some()
                {
                    self.mark_in_progress(id, total_elapsed_time)?;
                }
            }
        }
        Ok(())
    }

    fn find_next_node_completion_time(&mut self) -> Result<f64, SimulationError> {
        let mut minimum_time = f64::INFINITY;
        let in_progress: Vec<NodeId> = self.in_progress.iter().copied().collect();
        for id in in_progress {
            let estimate = self.estimate_time_remaining(id)?;
            self.progress_mut(id)?.estimated_time_elapsed = estimate;
            minimum_time = minimum_time.min(estimate);
        }
        Ok(minimum_time)
    }

    fn estimate_time_remaining(&mut self, id: NodeId) -> Result<f64, SimulationError> {
        let graph = self.graph;
        let progress = self.progress_mut(id)?.clone();

        match graph.get(id)?.kind() {
            NodeKind::Cpu(cpu) => {
                let multiplier = if cpu.did_perform_layout() {
                    self.options.layout_slowdown_multiplier()
                } else {
                    self.options.cpu_slowdown_multiplier
                };
                let total_duration = (cpu.task().duration() as f64 / 1_000.0 * multiplier)
                    .round()
                    .min(DEFAULT_MAXIMUM_CPU_TASK_DURATION_MS);
                Ok(total_duration - progress.time_elapsed)
            }
            NodeKind::Network(network) => {
                let record = network.record();
                let size_in_mb = record.resource_size as f64 / 1_024.0 / 1_024.0;

                let time_elapsed = if record.from_disk_cache || record.from_memory_cache {
                    // seek then read from disk
                    8.0 + 20.0 * size_in_mb - progress.time_elapsed
                } else if record.is_non_network_protocol() {
                    // decoding of the inlined data
                    2.0 + 10.0 * size_in_mb - progress.time_elapsed
                } else {
                    let dns_resolution_time = self.dns.time_until_resolution(
                        &record.host,
                        progress.start_time.unwrap_or_default(),
                        true,
                    );
                    let connection = self.pool.active_connection(record)?;
                    connection
                        .simulate_download_until(
                            record.transfer_size as f64 - progress.bytes_downloaded,
                            DownloadOptions {
                                time_already_elapsed: progress.time_elapsed,
                                maximum_time_to_elapse: f64::INFINITY,
                                dns_resolution_time,
                            },
                        )
                        .time_elapsed
                };

                Ok(time_elapsed + progress.time_elapsed_overshoot)
            }
        }
    }

    fn update_progress_made_in_time_period(
        &mut self,
        id: NodeId,
        time_period: f64,
        total_elapsed_time: f64,
    ) -> Result<(), SimulationError> {
        let graph = self.graph;
        let progress = self.progress_mut(id)?.clone();
        let is_finished = progress.estimated_time_elapsed == time_period;

        let network = match graph.get(id)?.kind() {
            NodeKind::Network(network) if !network.is_connectionless() => network,
            _ => {
                if is_finished {
                    return self.mark_complete(id, total_elapsed_time);
                }
                self.progress_mut(id)?.time_elapsed += time_period;
                return Ok(());
            }
        };

        let record = network.record();
        let dns_resolution_time = self.dns.time_until_resolution(
            &record.host,
            progress.start_time.unwrap_or_default(),
            true,
        );
        let connection = self.pool.active_connection(record)?;
        let calculation = connection.simulate_download_until(
            record.transfer_size as f64 - progress.bytes_downloaded,
            DownloadOptions {
                time_already_elapsed: progress.time_elapsed,
                maximum_time_to_elapse: time_period - progress.time_elapsed_overshoot,
                dns_resolution_time,
            },
        );

        connection.set_congestion_window(calculation.congestion_window);
        connection.set_h2_overflow_bytes_downloaded(calculation.extra_bytes_downloaded);

        if is_finished {
            connection.set_warmed(true);
            self.pool.release(record);
            return self.mark_complete(id, total_elapsed_time);
        }

        let progress = self.progress_mut(id)?;
        progress.time_elapsed += calculation.time_elapsed;
        progress.time_elapsed_overshoot += calculation.time_elapsed - time_period;
        progress.bytes_downloaded += calculation.bytes_downloaded;
        Ok(())
    }
}
