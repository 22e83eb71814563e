//! Latency aggregation.
//!
//! [`TraceRecorder`] keeps every [`TraceResult`] of a run in arrival order,
//! tagged with a category label, and renders them together with per-label
//! means into the JSON report written at the end of a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProbeError;
use crate::hls::trace::TraceResult;

/// Label of blocking playlist reload samples.
pub const MANIFEST_LABEL: &str = "manifest";
/// Label of part payload samples.
pub const MEDIA_SEGMENT_LABEL: &str = "mediaSegment";

/// One recorded exchange. Durations are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSample {
    pub label: String,
    pub url: String,
    pub status: u16,
    pub started_at: DateTime<Utc>,
    pub new_connection: bool,
    pub body_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_time: Option<f64>,
    pub server_waiting_time: f64,
    pub body_download_time: f64,
    pub total_duration: f64,
}

impl TraceSample {
    pub fn new(label: impl Into<String>, result: &TraceResult) -> Self {
        Self {
            label: label.into(),
            url: result.url.clone(),
            status: result.status,
            started_at: result.started_at,
            new_connection: result.new_connection,
            body_bytes: result.body_bytes,
            connect_time: result.connect_time.map(|d| d.as_secs_f64()),
            server_waiting_time: result.server_waiting_time.as_secs_f64(),
            body_download_time: result.body_download_time.as_secs_f64(),
            total_duration: result.total_duration.as_secs_f64(),
        }
    }
}

/// Mean phase durations of every sample sharing a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub avg_server_waiting_time: f64,
    pub avg_body_download_time: f64,
    pub avg_total_duration: f64,
    pub samples: usize,
}

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceReport {
    pub entries: Vec<TraceSample>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub summaries: BTreeMap<String, Summary>,
}

impl TraceReport {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProbeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Default)]
pub struct TraceRecorder {
    entries: Vec<TraceSample>,
    summaries: Option<BTreeMap<String, Summary>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, label: &str, result: &TraceResult) {
        debug!(
            label,
            url = %result.url,
            status = result.status,
            new_connection = result.new_connection,
            server_waiting_ms = millis(result.server_waiting_time),
            body_download_ms = millis(result.body_download_time),
            total_ms = millis(result.total_duration),
            "Recorded trace"
        );
        self.entries.push(TraceSample::new(label, result));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TraceSample] {
        &self.entries
    }

    /// Groups samples by label and stores the mean of each duration field.
    pub fn calculate_summaries(&mut self) -> &BTreeMap<String, Summary> {
        let mut grouped: BTreeMap<&str, Vec<&TraceSample>> = BTreeMap::new();
        for sample in &self.entries {
            grouped.entry(sample.label.as_str()).or_default().push(sample);
        }

        let summaries = grouped
            .into_iter()
            .map(|(label, samples)| {
                let count = samples.len() as f64;
                let (wait, body, total) = samples.iter().fold((0.0_f64, 0.0_f64, 0.0_f64), |acc, s| {
                    (
                        acc.0 + s.server_waiting_time,
                        acc.1 + s.body_download_time,
                        acc.2 + s.total_duration,
                    )
                });
                let summary = Summary {
                    avg_server_waiting_time: wait / count,
                    avg_body_download_time: body / count,
                    avg_total_duration: total / count,
                    samples: samples.len(),
                };
                (label.to_string(), summary)
            })
            .collect();

        self.summaries.insert(summaries)
    }

    pub fn report(&self) -> TraceReport {
        TraceReport {
            entries: self.entries.clone(),
            summaries: self.summaries.clone().unwrap_or_default(),
        }
    }

    /// Renders the samples and any computed summaries as pretty-printed JSON.
    pub fn serialize(&self) -> Result<Vec<u8>, ProbeError> {
        Ok(serde_json::to_vec_pretty(&self.report())?)
    }

    /// Computes summaries and writes the report to `path`.
    ///
    /// The file is written to `<path>.tmp` first and renamed into place.
    pub async fn persist(&mut self, path: &Path) -> Result<TraceReport, ProbeError> {
        self.calculate_summaries();
        let json = self.serialize()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProbeError::io(parent, e))?;
        }

        let temp_path = temp_path_for(path);
        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|e| ProbeError::io(&temp_path, e))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| ProbeError::io(path, e))?;

        debug!(path = %path.display(), samples = self.len(), "Latency report written");
        Ok(self.report())
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// `latency.json` -> `latency.json.tmp`.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
