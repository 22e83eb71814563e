use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::hls::sequence::SequenceOrdering;

pub const DEFAULT_USER_AGENT: &str = concat!("latencer/", env!("CARGO_PKG_VERSION"));

/// Default length of a probe run.
pub const DEFAULT_RUN_DURATION: Duration = Duration::from_secs(10);

/// HTTP version preference for connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpVersionPreference {
    /// Let ALPN negotiate the best version (default)
    #[default]
    Auto,
    /// Force HTTP/1.1 only (disable HTTP/2)
    Http1Only,
}

/// Options for the single HTTP client shared by every request of a run.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Overall timeout for one HTTP request. Zero disables it.
    ///
    /// Blocking reloads are held by the origin until the requested part exists,
    /// so a non-zero value must exceed the part hold-back of the stream.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection). Zero disables it.
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// HTTP version preference (Auto, Http1Only)
    pub http_version: HttpVersionPreference,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: ClientConfig::get_default_headers(),
            http_version: HttpVersionPreference::Auto,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl ClientConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers
    }

    /// Merges `headers` over the defaults; custom values win for the same name.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

/// Everything a probe run needs. Passed by value into [`crate::hls::LatencyProbe`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// URL of the master (multivariant) manifest.
    pub source: String,

    /// Wall-clock budget of the polling phase.
    pub duration: Duration,

    /// Destination of the JSON report. `None` keeps samples in memory only.
    pub output: Option<PathBuf>,

    /// Rendition to probe by name. `None` picks the first one listed.
    pub rendition: Option<String>,

    /// Comparison used to validate playlist progression.
    pub ordering: SequenceOrdering,

    pub client: ClientConfig,
}

impl ProbeConfig {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            duration: DEFAULT_RUN_DURATION,
            output: None,
            rendition: None,
            ordering: SequenceOrdering::default(),
            client: ClientConfig::default(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_rendition(mut self, name: impl Into<String>) -> Self {
        self.rendition = Some(name.into());
        self
    }

    pub fn with_ordering(mut self, ordering: SequenceOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }
}
