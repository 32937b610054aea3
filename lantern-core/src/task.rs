//! Main-thread CPU work.
//!
//! A [`CpuTask`] is one top-level span of main-thread execution together
//! with the finer grained events that happened inside it. Only the top-level
//! span is simulated; the children are kept so the graph builder can tell
//! which scripts and requests the task is attributable to.

use crate::record::CallFrame;
use serde::Deserialize;

/// Event names that mark a task as having performed layout.
const LAYOUT_EVENTS: &[&str] = &["Layout"];

/// Child events whose `url` names the script being run.
const SCRIPT_EVENTS: &[&str] = &["EvaluateScript", "FunctionCall", "v8.compile"];

/// The `args.data` payload of a trace event. Only the fields used to link
/// tasks to requests are kept.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEventData {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub frame: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub timer_id: Option<u64>,
    #[serde(default)]
    pub ready_state: Option<u8>,
    #[serde(default)]
    pub style_sheet_url: Option<String>,
    #[serde(default)]
    pub stack_trace: Vec<CallFrame>,
}

impl TraceEventData {
    /// Non-empty URLs of the stack trace, innermost first.
    pub fn stack_trace_urls(&self) -> impl Iterator<Item = &str> {
        self.stack_trace
            .iter()
            .map(|frame| frame.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TraceEventArgs {
    #[serde(default)]
    pub data: Option<TraceEventData>,
    /// Set on `thread_name` metadata events.
    #[serde(default)]
    pub name: Option<String>,
}

/// A single main-thread trace event. Timestamps and durations are in
/// microseconds.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TraceEvent {
    pub name: String,
    pub ts: i64,
    #[serde(default)]
    pub dur: Option<i64>,
    #[serde(default)]
    pub pid: Option<u64>,
    #[serde(default)]
    pub tid: Option<u64>,
    #[serde(default)]
    pub args: TraceEventArgs,
}

impl TraceEvent {
    pub fn new(name: impl Into<String>, ts: i64, dur: Option<i64>) -> Self {
        Self {
            name: name.into(),
            ts,
            dur,
            pid: None,
            tid: None,
            args: TraceEventArgs::default(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: TraceEventData) -> Self {
        self.args.data = Some(data);
        self
    }

    #[must_use]
    pub fn on_thread(mut self, pid: u64, tid: u64) -> Self {
        self.pid = Some(pid);
        self.tid = Some(tid);
        self
    }

    pub fn data(&self) -> Option<&TraceEventData> {
        self.args.data.as_ref()
    }

    /// End of the event, equal to its start for instant events.
    pub fn end(&self) -> i64 {
        self.ts + self.dur.unwrap_or(0)
    }
}

/// One contiguous span of main-thread execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTask {
    event: TraceEvent,
    children: Vec<TraceEvent>,
}

impl CpuTask {
    pub fn new(event: TraceEvent, children: Vec<TraceEvent>) -> Self {
        Self { event, children }
    }

    /// The top-level span.
    pub fn event(&self) -> &TraceEvent {
        &self.event
    }

    /// Every event observed inside the span, in trace order.
    pub fn children(&self) -> &[TraceEvent] {
        &self.children
    }

    /// Start of the task, in microseconds.
    pub fn start_time(&self) -> i64 {
        self.event.ts
    }

    /// Observed (unthrottled) duration of the task, in microseconds.
    pub fn duration(&self) -> i64 {
        self.event.dur.unwrap_or(0)
    }

    pub fn end_time(&self) -> i64 {
        self.event.end()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.children.iter().any(|child| child.name == name)
    }

    pub fn did_perform_layout(&self) -> bool {
        self.children
            .iter()
            .any(|child| LAYOUT_EVENTS.contains(&child.name.as_str()))
    }

    /// The scripts responsible for the work of this task, outermost first.
    ///
    /// Stack traces are recorded innermost first so they are walked
    /// backwards; the `url` of script evaluations and function calls is
    /// the outermost frame of its own event.
    pub fn attributable_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();

        for child in &self.children {
            let Some(data) = child.data() else {
                continue;
            };
            if SCRIPT_EVENTS.contains(&child.name.as_str())
                && let Some(url) = data.url.as_deref()
            {
                push_unique(&mut urls, url);
            }
            let stack: Vec<&str> = data.stack_trace_urls().collect();
            for url in stack.into_iter().rev() {
                push_unique(&mut urls, url);
            }
        }

        urls
    }
}

fn push_unique<'a>(urls: &mut Vec<&'a str>, url: &'a str) {
    if !url.is_empty() && !urls.contains(&url) {
        urls.push(url);
    }
}
