//! Network request records.
//!
//! A [`NetworkRecord`] is the stable, normalized view of one HTTP(S) request
//! and its response as observed during the recorded page load. Records are
//! assembled once (see the `lantern` crate's recorder) and are then shared,
//! read-only, between every graph that wraps them.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Schemes whose resources never touch the network.
const NON_NETWORK_SCHEMES: &[&str] = &[
    "blob",
    "data",
    "intent",
    "file",
    "filesystem",
    "chrome-extension",
];

/// Schemes that pay a TLS handshake on connection.
const SECURE_SCHEMES: &[&str] = &["https", "wss"];

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Invalid URL ({url}): {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// The kind of resource a request fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    #[serde(rename = "XHR")]
    Xhr,
    Fetch,
    #[default]
    #[serde(other)]
    Other,
}

/// The priority the browser assigned to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
pub enum ResourcePriority {
    VeryLow,
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

impl ResourcePriority {
    /// Delay, in microseconds, added to a request's observed start time when
    /// ordering ready requests for admission. Lower priority requests lose
    /// ties for connections against higher priority ones.
    pub fn start_penalty_us(self) -> f64 {
        let seconds = match self {
            Self::VeryHigh => 0.0,
            Self::High => 0.25,
            Self::Medium => 0.5,
            Self::Low => 1.0,
            Self::VeryLow => 2.0,
        };
        seconds * 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorType {
    Parser,
    Script,
    Preload,
    #[serde(rename = "SignedExchange")]
    SignedExchange,
    Preflight,
    Redirect,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
}

/// A JavaScript call stack, innermost frame first, optionally chained to the
/// stack that asynchronously scheduled it.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStack {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub parent: Option<Box<CallStack>>,
}

/// What caused a request to be issued.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    #[serde(rename = "type", default)]
    pub kind: InitiatorType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub stack: Option<CallStack>,
}

impl Initiator {
    pub fn parser(url: impl Into<String>) -> Self {
        Self {
            kind: InitiatorType::Parser,
            url: Some(url.into()),
            stack: None,
        }
    }

    /// A script initiator whose stack holds the given URLs, innermost first.
    pub fn script<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let call_frames = urls
            .into_iter()
            .map(|url| CallFrame {
                url: url.into(),
                ..CallFrame::default()
            })
            .collect();
        Self {
            kind: InitiatorType::Script,
            url: None,
            stack: Some(CallStack {
                call_frames,
                parent: None,
            }),
        }
    }

    /// The URLs this initiator attributes the request to, most specific
    /// first.
    ///
    /// An explicit `url` wins outright. A script initiator yields every
    /// distinct URL of its stack, innermost frame first, then the frames of
    /// the async parents.
    pub fn urls(&self) -> Vec<&str> {
        if let Some(url) = self.url.as_deref() {
            return vec![url];
        }
        if self.kind != InitiatorType::Script {
            return Vec::new();
        }

        let mut urls: Vec<&str> = Vec::new();
        let mut stack = self.stack.as_ref();
        while let Some(current) = stack {
            for frame in &current.call_frames {
                if !frame.url.is_empty() && !urls.contains(&frame.url.as_str()) {
                    urls.push(&frame.url);
                }
            }
            stack = current.parent.as_deref();
        }
        urls
    }

    /// The first URL the initiator names, if any.
    pub fn first_url(&self) -> Option<&str> {
        self.url.as_deref().or_else(|| {
            self.stack
                .as_ref()
                .and_then(|stack| stack.call_frames.first())
                .map(|frame| frame.url.as_str())
                .filter(|url| !url.is_empty())
        })
    }
}

/// Connection level timings reported with a response, in milliseconds
/// relative to `request_time` (itself in seconds). Absent phases are `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    pub request_time: f64,
    #[serde(default = "absent")]
    pub dns_start: f64,
    #[serde(default = "absent")]
    pub dns_end: f64,
    #[serde(default = "absent")]
    pub connect_start: f64,
    #[serde(default = "absent")]
    pub connect_end: f64,
    #[serde(default = "absent")]
    pub ssl_start: f64,
    #[serde(default = "absent")]
    pub ssl_end: f64,
    #[serde(default = "absent")]
    pub send_start: f64,
    #[serde(default = "absent")]
    pub send_end: f64,
    #[serde(default = "absent")]
    pub receive_headers_end: f64,
}

fn absent() -> f64 {
    -1.0
}

impl Default for ResourceTiming {
    fn default() -> Self {
        Self {
            request_time: 0.0,
            dns_start: -1.0,
            dns_end: -1.0,
            connect_start: -1.0,
            connect_end: -1.0,
            ssl_start: -1.0,
            ssl_end: -1.0,
            send_start: -1.0,
            send_end: -1.0,
            receive_headers_end: -1.0,
        }
    }
}

/// One HTTP(S) request/response lifecycle.
///
/// All times are in milliseconds on the monotonic clock of the recording.
/// Records are identified by [`request_id`](Self::request_id) only: several
/// records may share the same URL.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRecord {
    pub request_id: String,
    pub url: String,
    /// `scheme://host[:port]` of the URL, `"null"` for opaque origins.
    pub origin: String,
    pub host: String,
    pub scheme: String,
    /// Application protocol, e.g. `h2`, `http/1.1` or `data`.
    pub protocol: String,
    pub resource_type: ResourceType,
    pub mime_type: String,
    pub method: String,
    pub priority: ResourcePriority,
    pub status_code: u16,

    pub from_disk_cache: bool,
    pub from_memory_cache: bool,
    pub from_worker: bool,

    /// Bytes on the wire, headers and compression included.
    pub transfer_size: u64,
    /// Decoded body size.
    pub resource_size: u64,

    pub network_request_time: f64,
    pub response_headers_end_time: f64,
    pub network_end_time: f64,

    pub connection_id: Option<u64>,
    pub connection_reused: bool,
    pub frame_id: Option<String>,
    pub document_url: Option<String>,

    pub initiator: Initiator,
    /// Request id of the request deemed to have caused this one.
    pub initiator_request: Option<String>,
    pub redirect_source: Option<String>,
    pub redirect_destination: Option<String>,
    /// Request ids of every hop that redirected to this record, in order.
    /// Only set on the final record of a chain.
    pub redirects: Vec<String>,

    pub timing: Option<ResourceTiming>,
    pub finished: bool,
    pub failed: bool,
}

impl NetworkRecord {
    pub fn new(request_id: impl Into<String>, url: impl Into<String>) -> Result<Self, RecordError> {
        let mut record = Self {
            request_id: request_id.into(),
            url: String::new(),
            origin: String::new(),
            host: String::new(),
            scheme: String::new(),
            protocol: String::new(),
            resource_type: ResourceType::default(),
            mime_type: String::new(),
            method: "GET".to_owned(),
            priority: ResourcePriority::default(),
            status_code: 0,
            from_disk_cache: false,
            from_memory_cache: false,
            from_worker: false,
            transfer_size: 0,
            resource_size: 0,
            network_request_time: 0.0,
            response_headers_end_time: 0.0,
            network_end_time: 0.0,
            connection_id: None,
            connection_reused: false,
            frame_id: None,
            document_url: None,
            initiator: Initiator::default(),
            initiator_request: None,
            redirect_source: None,
            redirect_destination: None,
            redirects: Vec::new(),
            timing: None,
            finished: false,
            failed: false,
        };
        record.set_url(url.into())?;
        Ok(record)
    }

    /// Replace the URL and recompute the origin, host and scheme from it.
    pub fn set_url(&mut self, url: String) -> Result<(), RecordError> {
        let parsed = Url::parse(&url).map_err(|source| RecordError::InvalidUrl {
            url: url.clone(),
            source,
        })?;

        self.origin = parsed.origin().ascii_serialization();
        self.host = parsed.host_str().unwrap_or_default().to_owned();
        self.scheme = parsed.scheme().to_owned();
        if self.protocol.is_empty() && self.scheme == "data" {
            self.protocol = "data".to_owned();
        }
        self.url = url;
        Ok(())
    }

    /// `true` for `data:`, `blob:` and other resources that never hit the
    /// network.
    pub fn is_non_network_protocol(&self) -> bool {
        NON_NETWORK_SCHEMES.contains(&self.scheme.as_str())
    }

    /// `true` for records served from a browser cache or from a non-network
    /// scheme, which never hold a connection.
    pub fn is_connectionless(&self) -> bool {
        self.from_disk_cache || self.from_memory_cache || self.is_non_network_protocol()
    }

    pub fn is_secure(&self) -> bool {
        SECURE_SCHEMES.contains(&self.scheme.as_str())
    }

    pub fn is_h2(&self) -> bool {
        self.protocol == "h2"
    }

    /// The URL without its `#fragment`.
    pub fn url_without_fragment(&self) -> &str {
        strip_fragment(&self.url)
    }
}

/// Strip the `#fragment` off a URL.
pub fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}
