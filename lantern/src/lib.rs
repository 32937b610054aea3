/*!
# Lantern

Estimate how long a recorded page load would take under a different
network and CPU.

The recording is made of the devtools protocol log of the load and the
trace of the renderer main thread:

1. [`NetworkRecorder`] turns the protocol log into [`NetworkRecord`]s;
2. [`MainThreadTasks`] groups the trace events into [`CpuTask`]s;
3. [`PageGraphBuilder`] links both into a dependency [`Graph`];
4. the [`Simulator`] replays the graph under [`SimulationOptions`],
   optionally tuned per origin by a [`NetworkAnalysis`] of the recording.

The low level primitives live in [`lantern_core`] and the most used ones
are re-exported here.
*/

mod analysis;
mod builder;
mod recorder;
mod trace;

// convenient re-export of `lantern_core` core objects
pub use lantern_core::{
    CpuTask, Graph, GraphError, NetworkRecord, NodeId, NodeTiming, NodeType, RecordError,
    ResourceType, Rtt, SimulateOptions, SimulationError, SimulationOptions, SimulationResult,
    Simulator, Throughput, TraceEvent, TraceEventData, defaults,
};

pub use self::{
    analysis::NetworkAnalysis,
    builder::{BuildError, CriticalTaskKinds, PageGraphBuilder},
    recorder::{
        DataReceived, DevtoolsMessage, Frame, FrameNavigated, LoadingFailed, LoadingFinished,
        NetworkLog, NetworkRecorder, ProtocolEvent, RecorderError, Request,
        RequestServedFromCache, RequestWillBeSent, ResourceChangedPriority, Response,
        ResponseReceived,
    },
    trace::{MainThreadTasks, TOP_LEVEL_TASK_NAMES, parse_trace},
};

/// The URL a page load was asked for and the URL of the document it ended
/// up displaying, after redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrls {
    pub requested_url: String,
    pub main_document_url: String,
}

impl PageUrls {
    /// A load that was not redirected.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            requested_url: url.clone(),
            main_document_url: url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recorded_page_load() {
        let messages: Vec<DevtoolsMessage> = serde_json::from_value(json!([
            {
                "method": "Network.requestWillBeSent",
                "params": {
                    "requestId": "1",
                    "timestamp": 1.0,
                    "type": "Document",
                    "request": {"url": "https://example.com/", "initialPriority": "VeryHigh"},
                    "initiator": {"type": "other"}
                }
            },
            {
                "method": "Network.responseReceived",
                "params": {
                    "requestId": "1",
                    "timestamp": 1.1,
                    "response": {"status": 200, "protocol": "http/1.1", "mimeType": "text/html"}
                }
            },
            {
                "method": "Network.loadingFinished",
                "params": {"requestId": "1", "timestamp": 1.2, "encodedDataLength": 10000}
            },
            {
                "method": "Network.requestWillBeSent",
                "params": {
                    "requestId": "2",
                    "timestamp": 1.25,
                    "type": "Script",
                    "request": {"url": "https://example.com/app.js", "initialPriority": "High"},
                    "initiator": {"type": "parser", "url": "https://example.com/"}
                }
            },
            {
                "method": "Network.loadingFinished",
                "params": {"requestId": "2", "timestamp": 1.5, "encodedDataLength": 20000}
            },
            {
                "method": "Page.frameNavigated",
                "params": {"frame": {"id": "F", "url": "https://example.com/"}}
            }
        ]))
        .unwrap();
        let log = NetworkLog::from_messages(&messages);
        let urls = log.page_urls().unwrap();

        let tasks = MainThreadTasks::from_events(vec![
            TraceEvent::new("RunTask", 1_510_000, Some(50_000)),
            TraceEvent::new("EvaluateScript", 1_511_000, Some(40_000)).with_data(
                TraceEventData {
                    url: Some("https://example.com/app.js".to_owned()),
                    ..Default::default()
                },
            ),
        ]);

        let graph = PageGraphBuilder::new(urls)
            .set_records(log.records.iter().cloned())
            .set_tasks(tasks.into_tasks())
            .build()
            .unwrap();
        assert_eq!(graph.len(), 3);

        let mut options = SimulationOptions::default();
        NetworkAnalysis::analyze(&log.records).apply_to(&mut options);
        let simulator = Simulator::new(options).unwrap();
        let result = simulator.simulate(&graph).unwrap();

        let cpu = graph.node_ids_by_type(NodeType::Cpu)[0];
        let script = graph
            .nodes()
            .find(|node| node.record().is_some_and(|r| r.request_id == "2"))
            .map(|node| node.id())
            .unwrap();

        let cpu_timing = result.timing(cpu).unwrap();
        assert!(cpu_timing.start_time >= result.timing(script).unwrap().end_time);
        assert!(
            (cpu_timing.duration() - 200.0).abs() < 1e-6,
            "50ms at 4x slowdown, got {}",
            cpu_timing.duration()
        );
        assert_eq!(result.time_in_ms, cpu_timing.end_time);
    }
}
