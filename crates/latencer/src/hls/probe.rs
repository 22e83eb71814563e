// Polling controller: bootstraps a rendition, then chases its live edge with
// blocking reloads until the run ends.

use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::hls::playlist::{MediaItem, Playlist, Rendition};
use crate::hls::recorder::{MANIFEST_LABEL, MEDIA_SEGMENT_LABEL, TraceRecorder, TraceReport};
use crate::hls::reload;
use crate::hls::sequence::SequenceNumber;
use crate::hls::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Bootstrapping,
    Polling,
    Terminated,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    EndOfStream,
    Cancelled,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub stop_reason: StopReason,
    /// `None` when the run stopped before a rendition was selected.
    pub rendition: Option<Rendition>,
    pub report: TraceReport,
    /// Where the report was written, if it was.
    pub output: Option<PathBuf>,
}

pub struct LatencyProbe {
    config: ProbeConfig,
    source: Url,
    transport: Transport,
    recorder: TraceRecorder,
    rendition: Option<Rendition>,
    state: ProbeState,
}

impl LatencyProbe {
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        let source = Url::parse(&config.source)
            .map_err(|e| ProbeError::construction(&config.source, e.to_string()))?;
        if !matches!(source.scheme(), "http" | "https") {
            return Err(ProbeError::construction(
                &config.source,
                format!("unsupported scheme `{}`", source.scheme()),
            ));
        }
        let transport = Transport::new(&config.client)?;

        Ok(Self {
            config,
            source,
            transport,
            recorder: TraceRecorder::new(),
            rendition: None,
            state: ProbeState::Bootstrapping,
        })
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    /// Runs until the configured duration elapses, the stream ends, `token`
    /// is cancelled, or an error occurs.
    ///
    /// Samples recorded before a failure are still written to the output path.
    pub async fn run(&mut self, token: CancellationToken) -> Result<ProbeReport, ProbeError> {
        let started = Instant::now();
        info!(
            source = %self.source,
            duration_secs = self.config.duration.as_secs_f64(),
            "Starting latency probe"
        );

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Ok(StopReason::Cancelled),
            outcome = self.drive(started) => outcome,
        };
        self.state = ProbeState::Terminated;

        match outcome {
            Ok(stop_reason) => {
                let output = self.finish().await?;
                info!(
                    reason = ?stop_reason,
                    samples = self.recorder.len(),
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Latency probe finished"
                );
                Ok(ProbeReport {
                    stop_reason,
                    rendition: self.rendition.clone(),
                    report: self.recorder.report(),
                    output,
                })
            }
            Err(err) => {
                error!(error = %err, samples = self.recorder.len(), "Latency probe failed");
                if let Err(persist_err) = self.finish().await {
                    warn!(error = %persist_err, "Failed to write partial latency report");
                }
                Err(err)
            }
        }
    }

    async fn drive(&mut self, started: Instant) -> Result<StopReason, ProbeError> {
        let mut playlist = self.bootstrap().await?;
        self.state = ProbeState::Polling;

        loop {
            if playlist.end_list {
                info!(url = %playlist.url, "Playlist ended");
                return Ok(StopReason::EndOfStream);
            }
            if started.elapsed() >= self.config.duration {
                return Ok(StopReason::DurationElapsed);
            }
            playlist = self.poll(&playlist).await?;
        }
    }

    async fn bootstrap(&mut self) -> Result<Playlist, ProbeError> {
        let (renditions, _) = self.transport.fetch_master_manifest(&self.source).await?;

        let (rendition, playlist) = match self.config.rendition.as_deref() {
            Some(name) => {
                let (rendition, playlist, _) = self
                    .transport
                    .fetch_playlist_by_name(&self.source, &renditions, name)
                    .await?;
                (rendition, playlist)
            }
            None => {
                let rendition = renditions.first().cloned().ok_or_else(|| {
                    ProbeError::NoRenditions {
                        url: self.source.to_string(),
                    }
                })?;
                let (playlist, _) = self.transport.fetch_rendition(&self.source, &rendition).await?;
                (rendition, playlist)
            }
        };

        info!(
            rendition = %rendition.name,
            bandwidth = rendition.bandwidth,
            url = %playlist.url,
            last = %playlist.last_item().sequence(),
            can_block_reload = playlist.can_block_reload,
            "Selected rendition"
        );
        self.rendition = Some(rendition);
        Ok(playlist)
    }

    /// One blocking reload cycle. Returns the new snapshot.
    ///
    /// A trailing part must reach the expected sequence number under the
    /// configured ordering. A trailing full segment is checked on msn alone,
    /// whatever the ordering: the segment carries part -1, and it closes every
    /// part of its msn, so an answer of `(n, -1)` to a request for `(n, k)`
    /// is the origin finishing segment `n` and is accepted.
    async fn poll(&mut self, current: &Playlist) -> Result<Playlist, ProbeError> {
        let expected = current.next_expected();
        let request = reload::plan_reload(current)?;
        debug!(
            url = %request.url,
            msn = request.target.msn,
            part = request.target.part,
            "Requesting blocking reload"
        );

        let (playlist, trace) = self.transport.fetch_rendition_playlist(&request.url).await?;
        self.recorder.write(MANIFEST_LABEL, &trace);

        let observed = playlist.last_item().sequence();
        match playlist.last_item() {
            // A full segment closes every part of its msn.
            MediaItem::Segment(_) => {
                if observed.msn < expected.msn {
                    return Err(inconsistent(expected, observed, &playlist));
                }
            }
            MediaItem::Part(part) => {
                if !observed.greater_or_equal(&expected, self.config.ordering) {
                    return Err(inconsistent(expected, observed, &playlist));
                }
                let (_, trace) = self.transport.fetch_media_payload(&playlist, &part.uri).await?;
                self.recorder.write(MEDIA_SEGMENT_LABEL, &trace);
            }
        }

        debug!(
            msn = observed.msn,
            part = observed.part,
            samples = self.recorder.len(),
            "Reload cycle complete"
        );
        Ok(playlist)
    }

    /// Writes the report when there is something to write and somewhere to write it.
    async fn finish(&mut self) -> Result<Option<PathBuf>, ProbeError> {
        if self.recorder.is_empty() {
            info!("No samples recorded, skipping latency report");
            return Ok(None);
        }

        match self.config.output.clone() {
            Some(path) => {
                self.recorder.persist(&path).await?;
                info!(path = %path.display(), samples = self.recorder.len(), "Latency report saved");
                Ok(Some(path))
            }
            None => {
                self.recorder.calculate_summaries();
                Ok(None)
            }
        }
    }
}

fn inconsistent(
    expected: SequenceNumber,
    observed: SequenceNumber,
    playlist: &Playlist,
) -> ProbeError {
    ProbeError::Consistency {
        expected,
        observed,
        url: playlist.url.to_string(),
    }
}

/// Runs a probe described by `config` to completion.
pub async fn run(config: ProbeConfig, token: CancellationToken) -> Result<ProbeReport, ProbeError> {
    LatencyProbe::new(config)?.run(token).await
}
