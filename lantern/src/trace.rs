//! Aggregate main-thread trace events into top-level CPU tasks.

use lantern_core::task::{CpuTask, TraceEvent};
use serde::Deserialize;
use tracing::debug;

/// Spans the renderer schedules as a unit of main-thread work.
pub const TOP_LEVEL_TASK_NAMES: &[&str] = &[
    "RunTask",
    "ThreadControllerImpl::RunTask",
    "ThreadControllerImpl::DoWork",
    "TaskQueueManager::ProcessTaskFromWorkQueue",
];

/// Thread name of the renderer main thread in `thread_name` metadata.
const MAIN_THREAD_NAME: &str = "CrRendererMain";

#[derive(Deserialize)]
#[serde(untagged)]
enum TraceFile {
    Object {
        #[serde(rename = "traceEvents")]
        trace_events: Vec<serde_json::Value>,
    },
    Array(Vec<serde_json::Value>),
}

/// Parse a trace file, either `{"traceEvents": [..]}` or a bare array.
///
/// Events that do not fit [`TraceEvent`] are skipped.
pub fn parse_trace(json: &str) -> Result<Vec<TraceEvent>, serde_json::Error> {
    let values = match serde_json::from_str(json)? {
        TraceFile::Object { trace_events } => trace_events,
        TraceFile::Array(events) => events,
    };

    let mut events = Vec::with_capacity(values.len());
    for value in values {
        match TraceEvent::deserialize(&value) {
            Ok(event) => events.push(event),
            Err(error) => debug!(%error, "skipping trace event"),
        }
    }
    Ok(events)
}

/// The top-level tasks of the renderer main thread.
#[derive(Debug, Clone, Default)]
pub struct MainThreadTasks {
    tasks: Vec<CpuTask>,
}

impl MainThreadTasks {
    /// Group `events` into tasks.
    ///
    /// When the events carry thread ids and a `CrRendererMain` thread name,
    /// only that thread is kept; otherwise every event is assumed to come
    /// from the main thread.
    pub fn from_events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = TraceEvent>,
    {
        let events: Vec<TraceEvent> = events.into_iter().collect();

        let main_thread = events
            .iter()
            .find(|event| {
                event.name == "thread_name"
                    && event.args.name.as_deref() == Some(MAIN_THREAD_NAME)
            })
            .map(|event| (event.pid, event.tid));

        let mut events: Vec<TraceEvent> = events
            .into_iter()
            .filter(|event| main_thread.is_none_or(|thread| (event.pid, event.tid) == thread))
            .filter(|event| event.name != "thread_name")
            .collect();
        // parents first when two spans start together
        events.sort_by(|a, b| {
            a.ts.cmp(&b.ts)
                .then_with(|| b.dur.unwrap_or(0).cmp(&a.dur.unwrap_or(0)))
        });

        let mut tasks = Vec::new();
        let mut current: Option<(TraceEvent, Vec<TraceEvent>)> = None;

        for event in events {
            if event.ts < 0 || event.dur.is_some_and(|dur| dur < 0) {
                debug!(name = %event.name, ts = event.ts, dur = ?event.dur, "dropping malformed span");
                continue;
            }

            if let Some((task, children)) = current.as_mut()
                && event.ts < task.end()
            {
                if event.end() > task.end() {
                    debug!(
                        name = %event.name,
                        ts = event.ts,
                        task = %task.name,
                        "dropping span overlapping the end of its task"
                    );
                } else {
                    children.push(event);
                }
                continue;
            }

            if is_top_level(&event) {
                if let Some((task, children)) = current.take() {
                    tasks.push(CpuTask::new(task, children));
                }
                current = Some((event, Vec::new()));
            }
        }
        if let Some((task, children)) = current {
            tasks.push(CpuTask::new(task, children));
        }

        Self { tasks }
    }

    pub fn tasks(&self) -> &[CpuTask] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<CpuTask> {
        self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn is_top_level(event: &TraceEvent) -> bool {
    event.dur.is_some_and(|dur| dur > 0) && TOP_LEVEL_TASK_NAMES.contains(&event.name.as_str())
}
