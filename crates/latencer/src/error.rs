use std::path::PathBuf;

use reqwest::StatusCode;

use crate::hls::sequence::SequenceNumber;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid URL `{input}`: {reason}")]
    Construction { input: String, reason: String },

    #[error("failed to build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("failed to parse manifest from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("cannot plan blocking reload for {url}: {reason}")]
    Planning { url: String, reason: String },

    #[error(
        "playlist {url} did not advance: expected at least {expected}, last item is {observed}"
    )]
    Consistency {
        expected: SequenceNumber,
        observed: SequenceNumber,
        url: String,
    },

    #[error("request trace read before the response body was downloaded")]
    TraceNotComplete,

    #[error("master manifest {url} lists no renditions")]
    NoRenditions { url: String },

    #[error("rendition `{name}` not found in master manifest")]
    RenditionNotFound { name: String },

    #[error("failed to serialize latency report: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProbeError {
    pub fn construction(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Construction {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn parse(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn planning(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Planning {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status code carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Network { source, .. } => source.status(),
            _ => None,
        }
    }
}
