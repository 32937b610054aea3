use crate::node::NodeId;
use serde::Serialize;
use std::collections::BTreeMap;

/// When a node was queued, started and finished in the simulation, in
/// milliseconds since the start of the simulated page load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeTiming {
    pub queued_time: f64,
    pub start_time: f64,
    pub end_time: f64,
}

impl NodeTiming {
    #[inline]
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// The outcome of [`Simulator::simulate`].
///
/// [`Simulator::simulate`]: crate::simulator::Simulator::simulate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    /// Total duration of the simulated page load, in milliseconds.
    pub time_in_ms: f64,
    /// Timing of every node that ran, by node id.
    pub node_timings: BTreeMap<NodeId, NodeTiming>,
}

impl SimulationResult {
    pub fn timing(&self, id: NodeId) -> Option<&NodeTiming> {
        self.node_timings.get(&id)
    }

    /// Node timings ordered by start time, ties broken by node id.
    pub fn timeline(&self) -> Vec<(NodeId, NodeTiming)> {
        let mut timeline: Vec<(NodeId, NodeTiming)> = self
            .node_timings
            .iter()
            .map(|(id, timing)| (*id, *timing))
            .collect();
        timeline.sort_by(|(a_id, a), (b_id, b)| {
            a.start_time
                .total_cmp(&b.start_time)
                .then_with(|| a_id.cmp(b_id))
        });
        timeline
    }
}

/// Progress of one node through a simulation run.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeProgress {
    pub queued_time: f64,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,

    pub time_elapsed: f64,
    pub time_elapsed_overshoot: f64,
    pub bytes_downloaded: f64,
    pub estimated_time_elapsed: f64,
}

impl NodeProgress {
    pub fn queued(queued_time: f64) -> Self {
        Self {
            queued_time,
            ..Self::default()
        }
    }

    pub fn timing(&self) -> Option<NodeTiming> {
        Some(NodeTiming {
            queued_time: self.queued_time,
            start_time: self.start_time?,
            end_time: self.end_time?,
        })
    }
}
