// HLS Transport: GET fetches of manifests and media with a request trace attached.

use std::sync::OnceLock;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, trace};
use url::Url;

use crate::config::{ClientConfig, HttpVersionPreference};
use crate::error::ProbeError;
use crate::hls::playlist::{self, Playlist, Rendition};
use crate::hls::trace::{ConnectionObserver, RequestTrace, TraceResult};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Create a reqwest Client with the provided configuration and connection observer.
pub fn create_client(
    config: &ClientConfig,
    observer: &ConnectionObserver,
) -> Result<Client, ProbeError> {
    install_rustls_provider();

    let mut client_builder = Client::builder()
        .connector_layer(observer.clone())
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .pool_idle_timeout(config.pool_idle_timeout)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if config.http_version == HttpVersionPreference::Http1Only {
        client_builder = client_builder.http1_only();
    }

    client_builder
        .build()
        .map_err(|source| ProbeError::Client { source })
}

/// Fetches manifests and media over one long-lived client.
///
/// Every fetch drains the whole body, even for an error status, so the
/// download phase of the trace is always measured.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    observer: ConnectionObserver,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self, ProbeError> {
        let observer = ConnectionObserver::new();
        let client = create_client(config, &observer)?;
        Ok(Self { client, observer })
    }

    /// Fetches the master manifest and parses its renditions. At least one is returned.
    pub async fn fetch_master_manifest(
        &self,
        url: &Url,
    ) -> Result<(Vec<Rendition>, TraceResult), ProbeError> {
        let (body, trace) = self.fetch(url).await?;
        let content = decode_text(url, &body)?;
        let renditions = playlist::parse_renditions(content)
            .map_err(|e| ProbeError::parse(url.as_str(), e.to_string()))?;
        if renditions.is_empty() {
            return Err(ProbeError::NoRenditions {
                url: url.to_string(),
            });
        }
        debug!(url = %url, renditions = renditions.len(), "Parsed master manifest");
        Ok((renditions, trace))
    }

    /// Fetches a media playlist. Its canonical URL is `url` without query.
    pub async fn fetch_rendition_playlist(
        &self,
        url: &Url,
    ) -> Result<(Playlist, TraceResult), ProbeError> {
        let (body, trace) = self.fetch(url).await?;
        let content = decode_text(url, &body)?;
        let playlist = Playlist::parse(content, url)
            .map_err(|e| ProbeError::parse(url.as_str(), e.to_string()))?;
        trace!(
            url = %url,
            items = playlist.items().len(),
            last = %playlist.last_item().sequence(),
            "Parsed media playlist"
        );
        Ok((playlist, trace))
    }

    /// Resolves `rendition` against the master URL and fetches its playlist.
    pub async fn fetch_rendition(
        &self,
        master_url: &Url,
        rendition: &Rendition,
    ) -> Result<(Playlist, TraceResult), ProbeError> {
        let url = resolve(master_url, &rendition.url)?;
        self.fetch_rendition_playlist(&url).await
    }

    /// Looks up the rendition called `name` and fetches its playlist.
    pub async fn fetch_playlist_by_name(
        &self,
        master_url: &Url,
        renditions: &[Rendition],
        name: &str,
    ) -> Result<(Rendition, Playlist, TraceResult), ProbeError> {
        let rendition = playlist::find_rendition(renditions, name).ok_or_else(|| {
            ProbeError::RenditionNotFound {
                name: name.to_string(),
            }
        })?;
        let (playlist, trace) = self.fetch_rendition(master_url, &rendition).await?;
        Ok((rendition, playlist, trace))
    }

    /// Fetches a segment or part listed in `playlist`.
    pub async fn fetch_media_payload(
        &self,
        playlist: &Playlist,
        uri: &str,
    ) -> Result<(Bytes, TraceResult), ProbeError> {
        let url = resolve(&playlist.url, uri)?;
        self.fetch(&url).await
    }

    #[instrument(level = "trace", skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<(Bytes, TraceResult), ProbeError> {
        let mut trace = RequestTrace::begin(url.as_str(), &self.observer);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ProbeError::network(url.as_str(), e))?;
        let status = response.status();
        trace.mark_first_byte(status);

        let body = response
            .bytes()
            .await
            .map_err(|e| ProbeError::network(url.as_str(), e))?;
        trace.mark_downloaded(body.len() as u64);
        let result = trace.finish()?;

        if status != StatusCode::OK {
            debug!(
                url = %url,
                status = status.as_u16(),
                total_ms = result.total_duration.as_secs_f64() * 1000.0,
                "Fetch returned non-200 status"
            );
            return Err(ProbeError::http_status(status, url.as_str()));
        }

        Ok((body, result))
    }
}

/// Joins `uri` onto the directory of `base`; absolute URIs are kept as-is.
pub fn resolve(base: &Url, uri: &str) -> Result<Url, ProbeError> {
    base.join(uri)
        .map_err(|e| ProbeError::construction(uri, format!("cannot resolve against {base}: {e}")))
}

fn decode_text<'a>(url: &Url, body: &'a [u8]) -> Result<&'a str, ProbeError> {
    std::str::from_utf8(body)
        .map_err(|e| ProbeError::parse(url.as_str(), format!("manifest is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_strips_final_path_segment() {
        let base = Url::parse("https://cdn.example.com/live/720p/index.m3u8").unwrap();

        assert_eq!(
            resolve(&base, "part12.3.mp4").unwrap().as_str(),
            "https://cdn.example.com/live/720p/part12.3.mp4"
        );
        assert_eq!(
            resolve(&base, "../1080p/index.m3u8").unwrap().as_str(),
            "https://cdn.example.com/live/1080p/index.m3u8"
        );
        assert_eq!(
            resolve(&base, "https://other.example.com/seg.ts").unwrap().as_str(),
            "https://other.example.com/seg.ts"
        );
    }

    #[test]
    fn non_utf8_manifest_is_a_parse_error() {
        let url = Url::parse("https://cdn.example.com/index.m3u8").unwrap();
        let err = decode_text(&url, &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ProbeError::Parse { .. }));
    }

    #[test]
    fn client_builds_with_defaults() {
        assert!(Transport::new(&ClientConfig::default()).is_ok());
    }
}
