//! In-process LL-HLS origin for end-to-end probe tests.
//!
//! The media playlist honours blocking reloads: a request carrying
//! `_HLS_msn`/`_HLS_part` is answered with a playlist whose live edge is
//! exactly the requested part. Every segment has [`PARTS_PER_SEGMENT`] parts;
//! asking for the part past the last one closes the segment.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use url::Url;

pub const PARTS_PER_SEGMENT: i64 = 3;

pub const MASTER: &str = "#EXTM3U
#EXT-X-INDEPENDENT-SEGMENTS
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720,NAME=\"720p\"
720p/playlist.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080,NAME=\"1080p\"
1080p/playlist.m3u8
";

/// How the origin misbehaves, if at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fault {
    #[default]
    None,
    /// Master manifest answers 404.
    MissingMaster,
    /// Blocking reloads ignore the requested part and return the initial playlist.
    StaleReload,
    /// Part payloads answer 500.
    BrokenMedia,
    /// Every playlist carries `EXT-X-ENDLIST`.
    Ended,
    /// Blocking reloads are answered with a playlist closed at msn 0.
    ClosedBehind,
    /// Asking for the part past the last one of a segment returns part 0 of
    /// the next segment instead of the closed segment.
    PartJump,
    /// Media playlist requests after the given count answer 404.
    ReloadGoneAfter(usize),
}

#[derive(Debug, Default)]
pub struct OriginStats {
    pub playlist_requests: AtomicUsize,
    pub media_requests: AtomicUsize,
}

#[derive(Clone)]
struct Origin {
    fault: Fault,
    stats: Arc<OriginStats>,
}

/// Lightweight HTTP test server wrapper.
pub struct TestHttpServer {
    base_url: Url,
    pub stats: Arc<OriginStats>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestHttpServer {
    pub async fn new(fault: Fault) -> Self {
        let stats = Arc::new(OriginStats::default());
        let origin = Origin {
            fault,
            stats: stats.clone(),
        };
        let router = Router::new()
            .route("/live/master.m3u8", get(master))
            .route("/live/{rendition}/playlist.m3u8", get(media_playlist))
            .route("/live/{rendition}/{file}", get(media))
            .with_state(origin);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test HTTP listener");
        let addr = listener
            .local_addr()
            .expect("read test listener local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });
        tokio::spawn(async move {
            server.await.expect("run test HTTP server");
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}")).expect("parse base URL"),
            stats,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("join server URL path")
    }

    pub fn master_url(&self) -> String {
        self.url("/live/master.m3u8").to_string()
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

async fn master(State(origin): State<Origin>) -> Response {
    if origin.fault == Fault::MissingMaster {
        return (StatusCode::NOT_FOUND, "no such stream").into_response();
    }
    playlist_response(MASTER.to_string())
}

async fn media_playlist(
    State(origin): State<Origin>,
    Path(_rendition): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let served = origin.stats.playlist_requests.fetch_add(1, Ordering::SeqCst) + 1;
    if let Fault::ReloadGoneAfter(limit) = origin.fault
        && served > limit
    {
        return (StatusCode::NOT_FOUND, "stream went away").into_response();
    }

    let reload = query.contains_key("_HLS_msn");
    let (msn, part) = match (query.get("_HLS_msn"), query.get("_HLS_part")) {
        (Some(msn), Some(part)) if origin.fault != Fault::StaleReload => {
            match (msn.parse::<u64>(), part.parse::<i64>()) {
                (Ok(msn), Ok(part)) => (msn, part),
                _ => return (StatusCode::BAD_REQUEST, "bad reload parameters").into_response(),
            }
        }
        _ => (1, 1),
    };

    let body = match origin.fault {
        Fault::ClosedBehind if reload => render_media_playlist(0, PARTS_PER_SEGMENT, false),
        Fault::PartJump if part >= PARTS_PER_SEGMENT => render_media_playlist(msn + 1, 0, false),
        fault => render_media_playlist(msn, part, fault == Fault::Ended),
    };
    playlist_response(body)
}

async fn media(
    State(origin): State<Origin>,
    Path((_rendition, file)): Path<(String, String)>,
) -> Response {
    origin.stats.media_requests.fetch_add(1, Ordering::SeqCst);
    if origin.fault == Fault::BrokenMedia {
        return (StatusCode::INTERNAL_SERVER_ERROR, "encoder crashed").into_response();
    }
    let payload = vec![0x47u8; 188 * 8];
    (
        [(header::CONTENT_TYPE, "video/mp2t")],
        [file.as_bytes(), &payload[..]].concat(),
    )
        .into_response()
}

fn playlist_response(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        body,
    )
        .into_response()
}

/// Media playlist whose live edge is part `part` of segment `msn`.
///
/// A `part` past the last part of a segment renders that segment closed.
pub fn render_media_playlist(msn: u64, part: i64, ended: bool) -> String {
    let mut out = String::from(
        "#EXTM3U
#EXT-X-VERSION:9
#EXT-X-TARGETDURATION:3
#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK=3.0
#EXT-X-PART-INF:PART-TARGET=1.0
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-PROGRAM-DATE-TIME:2024-05-01T12:00:00.000Z
",
    );

    let closed = part >= PARTS_PER_SEGMENT;
    for k in 0..msn {
        let _ = writeln!(out, "#EXTINF:3.0,\nseg{k}.ts");
    }

    let last_part = part.min(PARTS_PER_SEGMENT - 1);
    for p in 0..=last_part {
        let independent = if p == 0 { ",INDEPENDENT=YES" } else { "" };
        let _ = writeln!(
            out,
            "#EXT-X-PART:DURATION=1.0,URI=\"part{msn}.{p}.ts\"{independent}"
        );
    }
    if closed {
        let _ = writeln!(out, "#EXTINF:3.0,\nseg{msn}.ts");
    }
    if ended {
        out.push_str("#EXT-X-ENDLIST\n");
    }
    out
}
