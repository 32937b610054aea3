//! Devtools protocol log ingestion.
//!
//! A recorded page load comes as a log of `{ "method", "params" }` messages
//! emitted by the browser. The [`NetworkRecorder`] replays the `Network.*`
//! and `Page.frameNavigated` messages of that log into one
//! [`NetworkRecord`] per request (one per redirect hop).

use crate::PageUrls;
use lantern_core::record::{
    Initiator, InitiatorType, NetworkRecord, RecordError, ResourcePriority, ResourceTiming,
    ResourceType,
};
use serde::{Deserialize, de::DeserializeOwned};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Invalid parameters for {method}: {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// One message of a devtools log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DevtoolsMessage {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl DevtoolsMessage {
    /// Parse a devtools log, a JSON array of messages.
    pub fn parse_log(json: &str) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub url: String,
    #[serde(default = "get")]
    pub method: String,
    #[serde(default)]
    pub initial_priority: Option<ResourcePriority>,
}

fn get() -> String {
    "GET".to_owned()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub connection_id: Option<f64>,
    #[serde(default)]
    pub connection_reused: bool,
    #[serde(default)]
    pub from_disk_cache: bool,
    #[serde(default = "unknown_length")]
    pub encoded_data_length: f64,
    #[serde(default)]
    pub timing: Option<ResourceTiming>,
}

fn unknown_length() -> f64 {
    -1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    pub request: Request,
    /// Monotonic time, in seconds.
    pub timestamp: f64,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub initiator: Initiator,
    #[serde(default)]
    pub redirect_response: Option<Response>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServedFromCache {
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
    pub response: Response,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataReceived {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(default)]
    pub data_length: u64,
    #[serde(default)]
    pub encoded_data_length: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(default = "unknown_length")]
    pub encoded_data_length: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChangedPriority {
    pub request_id: String,
    pub new_priority: ResourcePriority,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameNavigated {
    pub frame: Frame,
}

/// The protocol messages the recorder understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    RequestWillBeSent(RequestWillBeSent),
    RequestServedFromCache(RequestServedFromCache),
    ResponseReceived(ResponseReceived),
    DataReceived(DataReceived),
    LoadingFinished(LoadingFinished),
    LoadingFailed(LoadingFailed),
    ResourceChangedPriority(ResourceChangedPriority),
    FrameNavigated(FrameNavigated),
}

impl ProtocolEvent {
    /// Decode a message. Messages of any other method yield `None`.
    pub fn from_message(message: &DevtoolsMessage) -> Result<Option<Self>, RecorderError> {
        let event = match message.method.as_str() {
            "Network.requestWillBeSent" => Self::RequestWillBeSent(params(message)?),
            "Network.requestServedFromCache" => Self::RequestServedFromCache(params(message)?),
            "Network.responseReceived" => Self::ResponseReceived(params(message)?),
            "Network.dataReceived" => Self::DataReceived(params(message)?),
            "Network.loadingFinished" => Self::LoadingFinished(params(message)?),
            "Network.loadingFailed" => Self::LoadingFailed(params(message)?),
            "Network.resourceChangedPriority" => Self::ResourceChangedPriority(params(message)?),
            "Page.frameNavigated" => Self::FrameNavigated(params(message)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn params<T: DeserializeOwned>(message: &DevtoolsMessage) -> Result<T, RecorderError> {
    T::deserialize(&message.params).map_err(|source| RecorderError::InvalidParams {
        method: message.method.clone(),
        source,
    })
}

/// The records of a page load and the URLs the load was about.
#[derive(Debug, Clone, Default)]
pub struct NetworkLog {
    pub records: Vec<NetworkRecord>,
    /// URL of the first document request.
    pub requested_url: Option<String>,
    /// URL of the last navigation of the main frame.
    pub main_document_url: Option<String>,
}

impl NetworkLog {
    /// Replay a whole devtools log. Messages with malformed parameters or
    /// an unparsable URL are skipped.
    pub fn from_messages<'a, I>(messages: I) -> Self
    where
        I: IntoIterator<Item = &'a DevtoolsMessage>,
    {
        let mut recorder = NetworkRecorder::new();
        for message in messages {
            if let Err(error) = recorder.dispatch_message(message) {
                debug!(method = %message.method, %error, "skipping devtools message");
            }
        }
        recorder.finish()
    }

    pub fn page_urls(&self) -> Option<PageUrls> {
        let requested_url = self.requested_url.clone()?;
        let main_document_url = self
            .main_document_url
            .clone()
            .unwrap_or_else(|| requested_url.clone());
        Some(PageUrls {
            requested_url,
            main_document_url,
        })
    }
}

/// Assemble [`NetworkRecord`]s out of protocol events.
#[derive(Debug, Default)]
pub struct NetworkRecorder {
    records: Vec<NetworkRecord>,
    /// protocol request id to the latest hop of its redirect chain
    latest: HashMap<String, usize>,
    main_document_url: Option<String>,
}

impl NetworkRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch_message(&mut self, message: &DevtoolsMessage) -> Result<(), RecorderError> {
        match ProtocolEvent::from_message(message)? {
            Some(event) => self.dispatch(event),
            None => Ok(()),
        }
    }

    pub fn dispatch(&mut self, event: ProtocolEvent) -> Result<(), RecorderError> {
        match event {
            ProtocolEvent::RequestWillBeSent(event) => self.on_request_will_be_sent(event)?,
            ProtocolEvent::RequestServedFromCache(event) => {
                if let Some(record) = self.record_mut(&event.request_id) {
                    record.from_memory_cache = true;
                }
            }
            ProtocolEvent::ResponseReceived(event) => {
                if let Some(record) = self.record_mut(&event.request_id) {
                    apply_response(record, &event.response, event.timestamp);
                    if let Some(resource_type) = event.resource_type {
                        record.resource_type = resource_type;
                    }
                }
            }
            ProtocolEvent::DataReceived(event) => {
                if let Some(record) = self.record_mut(&event.request_id) {
                    record.resource_size += event.data_length;
                    if let Ok(encoded) = u64::try_from(event.encoded_data_length) {
                        record.transfer_size += encoded;
                    }
                }
            }
            ProtocolEvent::LoadingFinished(event) => {
                if let Some(record) = self.record_mut(&event.request_id) {
                    record.finished = true;
                    record.network_end_time = event.timestamp * 1_000.0;
                    if event.encoded_data_length >= 0.0 {
                        record.transfer_size = event.encoded_data_length as u64;
                    }
                }
            }
            ProtocolEvent::LoadingFailed(event) => {
                if let Some(record) = self.record_mut(&event.request_id) {
                    debug!(
                        request_id = %record.request_id,
                        error = %event.error_text,
                        canceled = event.canceled,
                        "request failed"
                    );
                    record.failed = true;
                    record.finished = true;
                    record.network_end_time = event.timestamp * 1_000.0;
                    if let Some(resource_type) = event.resource_type {
                        record.resource_type = resource_type;
                    }
                }
            }
            ProtocolEvent::ResourceChangedPriority(event) => {
                if let Some(record) = self.record_mut(&event.request_id) {
                    record.priority = event.new_priority;
                }
            }
            ProtocolEvent::FrameNavigated(event) => {
                if event.frame.parent_id.is_none() {
                    self.main_document_url = Some(event.frame.url);
                }
            }
        }
        Ok(())
    }

    fn on_request_will_be_sent(&mut self, event: RequestWillBeSent) -> Result<(), RecorderError> {
        let Some(&previous) = self.latest.get(&event.request_id) else {
            let record = new_record(&event, event.request_id.clone(), event.initiator.clone())?;
            self.latest.insert(event.request_id, self.records.len());
            self.records.push(record);
            return Ok(());
        };

        let Some(redirect_response) = event.redirect_response.as_ref() else {
            trace!(request_id = %event.request_id, "request sent again without a redirect");
            return Ok(());
        };

        let source = &self.records[previous];
        let id = format!("{}:redirect", source.request_id);
        let mut record = new_record(&event, id.clone(), source.initiator.clone())?;

        let source = &mut self.records[previous];
        apply_response(source, redirect_response, event.timestamp);
        source.finished = true;
        source.network_end_time = event.timestamp * 1_000.0;
        record.redirect_source = Some(source.request_id.clone());
        source.redirect_destination = Some(id);

        self.latest.insert(event.request_id, self.records.len());
        self.records.push(record);
        Ok(())
    }

    fn record_mut(&mut self, request_id: &str) -> Option<&mut NetworkRecord> {
        let Some(&index) = self.latest.get(request_id) else {
            trace!(request_id, "event for an unknown request");
            return None;
        };
        self.records.get_mut(index)
    }

    /// Resolve the relationships between records and return them in the
    /// order their requests were sent.
    pub fn finish(self) -> NetworkLog {
        let Self {
            mut records,
            latest: _,
            main_document_url,
        } = self;

        let index: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.request_id.clone(), i))
            .collect();

        let initiator_requests: Vec<Option<String>> = records
            .iter()
            .map(|record| choose_initiator_request(&records, record))
            .collect();
        let redirects: Vec<Vec<String>> = records
            .iter()
            .map(|record| redirect_chain(&records, &index, record))
            .collect();

        for ((record, initiator_request), redirects) in
            records.iter_mut().zip(initiator_requests).zip(redirects)
        {
            record.initiator_request = initiator_request;
            record.redirects = redirects;
        }

        let requested = records
            .iter()
            .find(|record| record.resource_type == ResourceType::Document);
        let requested_url = requested.map(|record| record.url.clone());
        let main_document_url = main_document_url.or_else(|| {
            let mut record = requested?;
            while let Some(next) = record.redirect_destination.as_ref() {
                record = &records[*index.get(next)?];
            }
            Some(record.url.clone())
        });

        debug!(
            records = records.len(),
            requested_url = ?requested_url,
            main_document_url = ?main_document_url,
            "network log recorded"
        );

        NetworkLog {
            records,
            requested_url,
            main_document_url,
        }
    }
}

fn new_record(
    event: &RequestWillBeSent,
    request_id: String,
    initiator: Initiator,
) -> Result<NetworkRecord, RecordError> {
    let mut record = NetworkRecord::new(request_id, event.request.url.clone())?;

    record.method = event.request.method.clone();
    record.priority = event.request.initial_priority.unwrap_or_default();
    record.resource_type = event.resource_type.unwrap_or_default();
    record.frame_id = event.frame_id.clone();
    record.document_url = event.document_url.clone();
    record.initiator = initiator;

    let time = event.timestamp * 1_000.0;
    record.network_request_time = time;
    record.response_headers_end_time = time;
    record.network_end_time = time;

    Ok(record)
}

fn apply_response(record: &mut NetworkRecord, response: &Response, timestamp: f64) {
    record.status_code = response.status;
    record.mime_type = response.mime_type.clone();
    if let Some(protocol) = response.protocol.as_ref().filter(|p| !p.is_empty()) {
        record.protocol = protocol.clone();
    }
    record.connection_id = response
        .connection_id
        .filter(|id| *id >= 0.0)
        .map(|id| id as u64);
    record.connection_reused = response.connection_reused;
    if response.from_disk_cache {
        record.from_disk_cache = true;
    }
    if response.encoded_data_length >= 0.0 {
        record.transfer_size = response.encoded_data_length as u64;
    }

    record.timing = response.timing;
    record.response_headers_end_time = match response.timing {
        Some(timing) if timing.receive_headers_end >= 0.0 => {
            timing.request_time * 1_000.0 + timing.receive_headers_end
        }
        _ => timestamp * 1_000.0,
    };
}

/// The request that most plausibly caused `record`: its redirect source,
/// or a finished request for the first URL its initiator names.
fn choose_initiator_request(records: &[NetworkRecord], record: &NetworkRecord) -> Option<String> {
    if let Some(source) = record.redirect_source.as_ref() {
        return Some(source.clone());
    }
    let url = record.initiator.first_url()?;

    let mut candidates: Vec<&NetworkRecord> = records
        .iter()
        .filter(|candidate| {
            candidate.url == url
                && candidate.request_id != record.request_id
                && candidate.finished
                && !candidate.failed
                && candidate.response_headers_end_time <= record.network_request_time
        })
        .collect();

    narrow(&mut candidates, |c| c.resource_type != ResourceType::Other);
    narrow(&mut candidates, |c| c.frame_id == record.frame_id);
    if record.initiator.kind == InitiatorType::Parser {
        narrow(&mut candidates, |c| c.resource_type == ResourceType::Document);
    }

    candidates.first().map(|c| c.request_id.clone())
}

/// Keep only the candidates matching `keep`, unless none does.
fn narrow(candidates: &mut Vec<&NetworkRecord>, keep: impl Fn(&NetworkRecord) -> bool) {
    if candidates.len() < 2 {
        return;
    }
    let kept: Vec<&NetworkRecord> = candidates.iter().copied().filter(|c| keep(c)).collect();
    if !kept.is_empty() {
        *candidates = kept;
    }
}

/// Every hop that led to `record`, first hop first. Empty unless `record`
/// ends a redirect chain.
fn redirect_chain(
    records: &[NetworkRecord],
    index: &HashMap<String, usize>,
    record: &NetworkRecord,
) -> Vec<String> {
    if record.redirect_destination.is_some() {
        return Vec::new();
    }

    let mut chain = Vec::new();
    let mut source = record.redirect_source.as_ref();
    while let Some(id) = source {
        if chain.contains(id) {
            break;
        }
        chain.push(id.clone());
        source = index
            .get(id)
            .and_then(|&i| records[i].redirect_source.as_ref());
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_lifecycle() {
        let log = record(vec![
            will_be_sent("1", "https://example.com/", 1.0, json!({"type": "other"}))
                .with("type", json!("Document"))
                .with("frameId", json!("F")),
            message(
                "Network.responseReceived",
                json!({
                    "requestId": "1",
                    "timestamp": 1.2,
                    "type": "Document",
                    "response": {
                        "url": "https://example.com/",
                        "status": 200,
                        "mimeType": "text/html",
                        "protocol": "h2",
                        "connectionId": 7,
                        "connectionReused": false,
                        "encodedDataLength": 300,
                        "timing": {
                            "requestTime": 1.0,
                            "connectStart": 10.0,
                            "connectEnd": 60.0,
                            "sendStart": 60.0,
                            "sendEnd": 61.0,
                            "receiveHeadersEnd": 150.0
                        }
                    }
                }),
            ),
            message(
                "Network.dataReceived",
                json!({"requestId": "1", "timestamp": 1.3, "dataLength": 4000, "encodedDataLength": 1000}),
            ),
            message(
                "Network.loadingFinished",
                json!({"requestId": "1", "timestamp": 1.5, "encodedDataLength": 1500}),
            ),
        ]);

        assert_eq!(log.records.len(), 1);
        let record = &log.records[0];
        assert_eq!(record.request_id, "1");
        assert_eq!(record.resource_type, ResourceType::Document);
        assert_eq!(record.protocol, "h2");
        assert_eq!(record.status_code, 200);
        assert_eq!(record.connection_id, Some(7));
        assert_eq!(record.network_request_time, 1_000.0);
        assert_eq!(record.response_headers_end_time, 1_150.0);
        assert_eq!(record.network_end_time, 1_500.0);
        assert_eq!(record.resource_size, 4_000);
        assert_eq!(record.transfer_size, 1_500);
        assert!(record.finished);
        assert!(!record.failed);

        assert_eq!(
            log.page_urls(),
            Some(PageUrls {
                requested_url: "https://example.com/".to_owned(),
                main_document_url: "https://example.com/".to_owned(),
            })
        );
    }

    #[test]
    fn redirects() {
        let log = record(vec![
            will_be_sent("1", "http://example.com/", 1.0, json!({"type": "other"}))
                .with("type", json!("Document")),
            will_be_sent("1", "https://example.com/", 1.1, json!({"type": "other"}))
                .with("type", json!("Document"))
                .with("redirectResponse", json!({"status": 301, "url": "http://example.com/"})),
            will_be_sent("1", "https://www.example.com/", 1.2, json!({"type": "other"}))
                .with("type", json!("Document"))
                .with("redirectResponse", json!({"status": 302, "url": "https://example.com/"})),
            message(
                "Network.loadingFinished",
                json!({"requestId": "1", "timestamp": 1.5}),
            ),
        ]);

        let ids: Vec<&str> = log.records.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1:redirect", "1:redirect:redirect"]);

        let first = &log.records[0];
        assert_eq!(first.status_code, 301);
        assert!(first.finished);
        assert_eq!(first.network_end_time, 1_100.0);
        assert_eq!(first.redirect_destination.as_deref(), Some("1:redirect"));
        assert!(first.redirects.is_empty());

        let last = &log.records[2];
        assert_eq!(last.redirect_source.as_deref(), Some("1:redirect"));
        assert_eq!(last.initiator_request.as_deref(), Some("1:redirect"));
        assert_eq!(last.redirects, vec!["1".to_owned(), "1:redirect".to_owned()]);
        assert_eq!(last.network_end_time, 1_500.0, "later events go to the last hop");

        assert_eq!(log.requested_url.as_deref(), Some("http://example.com/"));
        assert_eq!(
            log.main_document_url.as_deref(),
            Some("https://www.example.com/"),
            "without navigation events the end of the redirect chain is the main document"
        );
    }

    #[test]
    fn main_frame_navigation_wins() {
        let log = record(vec![
            will_be_sent("1", "https://example.com/", 1.0, json!({"type": "other"}))
                .with("type", json!("Document")),
            message(
                "Page.frameNavigated",
                json!({"frame": {"id": "F", "url": "https://example.com/home"}}),
            ),
            message(
                "Page.frameNavigated",
                json!({"frame": {"id": "C", "parentId": "F", "url": "https://ads.example/"}}),
            ),
        ]);

        assert_eq!(
            log.main_document_url.as_deref(),
            Some("https://example.com/home")
        );
    }

    #[test]
    fn cache_and_priority() {
        let log = record(vec![
            will_be_sent("1", "https://example.com/a.js", 1.0, json!({"type": "other"})),
            message("Network.requestServedFromCache", json!({"requestId": "1"})),
            message(
                "Network.resourceChangedPriority",
                json!({"requestId": "1", "newPriority": "VeryHigh", "timestamp": 1.1}),
            ),
            message(
                "Network.responseReceived",
                json!({
                    "requestId": "1",
                    "timestamp": 1.2,
                    "response": {"status": 200, "fromDiskCache": true}
                }),
            ),
            message(
                "Network.loadingFailed",
                json!({"requestId": "1", "timestamp": 1.3, "errorText": "net::ERR_ABORTED"}),
            ),
        ]);

        let record = &log.records[0];
        assert!(record.from_memory_cache);
        assert!(record.from_disk_cache);
        assert_eq!(record.priority, ResourcePriority::VeryHigh);
        assert!(record.failed);
        assert!(record.finished);
        assert_eq!(log.requested_url, None);
        assert_eq!(log.page_urls(), None);
    }

    #[test]
    fn initiator_request_from_parser() {
        let log = record(vec![
            will_be_sent("1", "https://example.com/", 1.0, json!({"type": "other"}))
                .with("type", json!("Document")),
            message(
                "Network.responseReceived",
                json!({"requestId": "1", "timestamp": 1.1, "response": {"status": 200}}),
            ),
            will_be_sent(
                "2",
                "https://example.com/style.css",
                1.2,
                json!({"type": "parser", "url": "https://example.com/"}),
            ),
            will_be_sent(
                "3",
                "https://example.com/app.js",
                1.05,
                json!({"type": "parser", "url": "https://example.com/"}),
            ),
            message(
                "Network.loadingFinished",
                json!({"requestId": "1", "timestamp": 1.3}),
            ),
        ]);

        assert_eq!(log.records[1].initiator_request.as_deref(), Some("1"));
        assert_eq!(
            log.records[2].initiator_request, None,
            "requested before the document responded"
        );
    }

    #[test]
    fn unknown_and_foreign_messages_are_ignored() {
        let log = record(vec![
            message("Network.dataReceived", json!({"requestId": "9", "timestamp": 1.0})),
            message("Runtime.consoleAPICalled", json!({"type": "log"})),
            will_be_sent("1", "https://example.com/", 1.0, json!({"type": "other"})),
            will_be_sent("1", "https://example.com/", 1.1, json!({"type": "other"})),
        ]);

        assert_eq!(log.records.len(), 1);
        assert_eq!(log.records[0].network_request_time, 1_000.0);
    }

    #[test]
    fn malformed_messages() {
        let mut recorder = NetworkRecorder::new();

        let error = recorder
            .dispatch_message(&message(
                "Network.loadingFinished",
                json!({"timestamp": 1.0}),
            ))
            .unwrap_err();
        assert!(matches!(error, RecorderError::InvalidParams { .. }));

        let error = recorder
            .dispatch_message(&will_be_sent("1", "not a url", 1.0, json!({})))
            .unwrap_err();
        assert!(matches!(error, RecorderError::Record(_)));
    }

    #[test]
    fn malformed_messages_are_skipped_in_a_log() {
        let log = record(vec![
            will_be_sent("1", "https://example.com/", 1.0, json!({"type": "other"})),
            message("Network.loadingFinished", json!({"timestamp": 1.2})),
            will_be_sent("2", "not a url", 1.3, json!({"type": "other"})),
            will_be_sent("3", "https://example.com/app.js", 1.4, json!({"type": "other"})),
            message(
                "Network.loadingFinished",
                json!({"requestId": "1", "timestamp": 1.5, "encodedDataLength": 100}),
            ),
        ]);

        let ids: Vec<&str> = log.records.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, ["1", "3"]);
        assert!(log.records[0].finished);
        assert_eq!(log.records[0].network_end_time, 1_500.0);
    }

    #[test]
    fn redirect_to_an_invalid_url_leaves_the_source_untouched() {
        let mut recorder = NetworkRecorder::new();
        let document = will_be_sent("1", "https://example.com/", 1.0, json!({"type": "other"}));
        recorder.dispatch_message(&document).unwrap();
        let mut redirect = will_be_sent("1", "not a url", 1.2, json!({"type": "other"}));
        redirect.params["redirectResponse"] = json!({"status": 302});

        assert!(recorder.dispatch_message(&redirect).is_err());

        let log = recorder.finish();
        assert_eq!(log.records.len(), 1);
        assert!(!log.records[0].finished);
        assert_eq!(log.records[0].redirect_destination, None);
    }

    #[test]
    fn parse_log() {
        let messages = DevtoolsMessage::parse_log(
            r#"[{"method": "Network.requestServedFromCache", "params": {"requestId": "1"}}, {"method": "Page.loadEventFired"}]"#,
        )
        .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].params, serde_json::Value::Null);
    }

    fn record(messages: Vec<DevtoolsMessage>) -> NetworkLog {
        NetworkLog::from_messages(&messages)
    }

    fn message(method: &str, params: serde_json::Value) -> DevtoolsMessage {
        DevtoolsMessage {
            method: method.to_owned(),
            params,
        }
    }

    fn will_be_sent(
        id: &str,
        url: &str,
        timestamp: f64,
        initiator: serde_json::Value,
    ) -> DevtoolsMessage {
        message(
            "Network.requestWillBeSent",
            json!({
                "requestId": id,
                "timestamp": timestamp,
                "request": {"url": url, "method": "GET", "initialPriority": "High"},
                "initiator": initiator,
            }),
        )
    }

    trait With {
        fn with(self, key: &str, value: serde_json::Value) -> Self;
    }

    impl With for DevtoolsMessage {
        fn with(mut self, key: &str, value: serde_json::Value) -> Self {
            if let Some(params) = self.params.as_object_mut() {
                params.insert(key.to_owned(), value);
            }
            self
        }
    }
}
