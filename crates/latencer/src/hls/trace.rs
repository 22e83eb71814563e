//! Per-request phase clock.
//!
//! `reqwest` has no client-trace callbacks, so connection establishment is
//! observed from inside the connector: [`ConnectionObserver`] is a `tower`
//! layer installed with `ClientBuilder::connector_layer`. Every time the pool
//! has to dial a new connection the layer stamps the instant into a shared
//! slot, which the live [`RequestTrace`] collects when response headers
//! arrive. Requests of a run are strictly sequential, so one slot suffices.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tracing::trace;

use crate::error::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectEvent {
    started: Instant,
    established: Option<Instant>,
}

/// Records when the HTTP client opens a new connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionObserver {
    slot: Arc<Mutex<Option<ConnectEvent>>>,
}

impl ConnectionObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect_started(&self) -> Instant {
        let started = Instant::now();
        *self.slot.lock() = Some(ConnectEvent {
            started,
            established: None,
        });
        started
    }

    fn connect_established(&self, started: Instant) {
        let mut slot = self.slot.lock();
        if let Some(event) = slot.as_mut()
            && event.started == started
        {
            event.established = Some(Instant::now());
        }
    }

    fn reset(&self) {
        *self.slot.lock() = None;
    }

    fn take(&self) -> Option<ConnectEvent> {
        self.slot.lock().take()
    }
}

impl<S> tower::Layer<S> for ConnectionObserver {
    type Service = ObservedConnector<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ObservedConnector {
            inner,
            observer: self.clone(),
        }
    }
}

/// Connector service wrapped by [`ConnectionObserver`].
#[derive(Debug, Clone)]
pub struct ObservedConnector<S> {
    inner: S,
    observer: ConnectionObserver,
}

impl<S, R> tower::Service<R> for ObservedConnector<S>
where
    S: tower::Service<R>,
    S::Future: Send + 'static,
    S::Response: 'static,
    S::Error: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        let started = self.observer.connect_started();
        trace!("Dialing new connection");

        let observer = self.observer.clone();
        let future = self.inner.call(request);
        Box::pin(async move {
            let result = future.await;
            if result.is_ok() {
                observer.connect_established(started);
                trace!(
                    connect_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Connection established"
                );
            }
            result
        })
    }
}

/// Timestamps of one HTTP exchange. Consumed by [`RequestTrace::finish`].
#[derive(Debug)]
pub struct RequestTrace {
    url: String,
    observer: ConnectionObserver,
    started_at: DateTime<Utc>,
    request_start: Instant,
    connect: Option<ConnectEvent>,
    first_byte: Option<Instant>,
    downloaded: Option<Instant>,
    status: Option<StatusCode>,
    body_bytes: u64,
}

/// Phase durations of a completed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceResult {
    pub url: String,
    pub status: u16,
    /// Wall-clock time the request was issued.
    pub started_at: DateTime<Utc>,
    /// Whether the exchange had to open a new connection.
    pub new_connection: bool,
    pub body_bytes: u64,
    /// Time to establish the new connection, when one was opened.
    pub connect_time: Option<Duration>,
    pub server_waiting_time: Duration,
    pub body_download_time: Duration,
    pub total_duration: Duration,
}

impl RequestTrace {
    /// Starts the clock for a request about to be sent.
    pub fn begin(url: impl Into<String>, observer: &ConnectionObserver) -> Self {
        observer.reset();
        Self {
            url: url.into(),
            observer: observer.clone(),
            started_at: Utc::now(),
            request_start: Instant::now(),
            connect: None,
            first_byte: None,
            downloaded: None,
            status: None,
            body_bytes: 0,
        }
    }

    /// Response headers arrived.
    pub fn mark_first_byte(&mut self, status: StatusCode) {
        self.first_byte = Some(Instant::now());
        self.status = Some(status);
        self.connect = self.observer.take();
    }

    /// The response body has been drained.
    pub fn mark_downloaded(&mut self, body_bytes: u64) {
        self.downloaded = Some(Instant::now());
        self.body_bytes = body_bytes;
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn origin(&self) -> Instant {
        self.connect
            .map(|event| event.started)
            .unwrap_or(self.request_start)
    }

    /// Dial-to-established time, only when the exchange opened a new connection.
    pub fn connect_time(&self) -> Option<Duration> {
        let event = self.connect?;
        event
            .established
            .map(|established| established.saturating_duration_since(event.started))
    }

    pub fn server_waiting_time(&self) -> Option<Duration> {
        self.first_byte
            .map(|first_byte| first_byte.saturating_duration_since(self.origin()))
    }

    pub fn body_download_time(&self) -> Option<Duration> {
        match (self.first_byte, self.downloaded) {
            (Some(first_byte), Some(downloaded)) => {
                Some(downloaded.saturating_duration_since(first_byte))
            }
            _ => None,
        }
    }

    pub fn total_duration(&self) -> Option<Duration> {
        self.downloaded
            .map(|downloaded| downloaded.saturating_duration_since(self.origin()))
    }

    /// Consumes the trace. Fails unless both the first byte and the end of the
    /// body were recorded.
    pub fn finish(self) -> Result<TraceResult, ProbeError> {
        let (Some(server_waiting_time), Some(body_download_time), Some(total_duration)) = (
            self.server_waiting_time(),
            self.body_download_time(),
            self.total_duration(),
        ) else {
            return Err(ProbeError::TraceNotComplete);
        };

        Ok(TraceResult {
            status: self.status.map_or(0, |status| status.as_u16()),
            started_at: self.started_at,
            new_connection: self.connect.is_some(),
            body_bytes: self.body_bytes,
            connect_time: self.connect_time(),
            server_waiting_time,
            body_download_time,
            total_duration,
            url: self.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::{Layer, Service, ServiceExt};

    fn trace_at(
        origin: Instant,
        connect_ms: Option<u64>,
        first_ms: u64,
        done_ms: u64,
    ) -> RequestTrace {
        let at = |ms: u64| origin + Duration::from_millis(ms);
        RequestTrace {
            url: "https://example.com/a.m3u8".to_string(),
            observer: ConnectionObserver::new(),
            started_at: Utc::now(),
            request_start: origin,
            connect: connect_ms.map(|ms| ConnectEvent {
                started: at(ms),
                established: Some(at(ms + 5)),
            }),
            first_byte: Some(at(first_ms)),
            downloaded: Some(at(done_ms)),
            status: Some(StatusCode::OK),
            body_bytes: 10,
        }
    }

    #[test]
    fn phases_on_reused_connection_start_at_request() {
        let result = trace_at(Instant::now(), None, 120, 150).finish().unwrap();

        assert_eq!(result.server_waiting_time, Duration::from_millis(120));
        assert_eq!(result.body_download_time, Duration::from_millis(30));
        assert_eq!(result.total_duration, Duration::from_millis(150));
        assert!(!result.new_connection);
        assert_eq!(result.status, 200);
    }

    #[test]
    fn phases_on_new_connection_start_at_connect() {
        let result = trace_at(Instant::now(), Some(2), 120, 150).finish().unwrap();

        assert_eq!(result.server_waiting_time, Duration::from_millis(118));
        assert_eq!(result.body_download_time, Duration::from_millis(30));
        assert_eq!(result.total_duration, Duration::from_millis(148));
        assert_eq!(result.connect_time, Some(Duration::from_millis(5)));
        assert!(result.new_connection);
    }

    #[test]
    fn unfinished_trace_is_an_error() {
        let observer = ConnectionObserver::new();
        let trace = RequestTrace::begin("https://example.com/a.ts", &observer);
        assert!(matches!(trace.finish(), Err(ProbeError::TraceNotComplete)));

        let mut trace = RequestTrace::begin("https://example.com/a.ts", &observer);
        trace.mark_first_byte(StatusCode::OK);
        assert!(matches!(trace.finish(), Err(ProbeError::TraceNotComplete)));
    }

    #[test]
    fn completed_trace_yields_result() {
        let observer = ConnectionObserver::new();
        let mut trace = RequestTrace::begin("https://example.com/a.ts", &observer);
        trace.mark_first_byte(StatusCode::NOT_FOUND);
        trace.mark_downloaded(42);

        let result = trace.finish().unwrap();

        assert_eq!(result.url, "https://example.com/a.ts");
        assert_eq!(result.status, 404);
        assert_eq!(result.body_bytes, 42);
        assert!(result.total_duration >= result.server_waiting_time);
    }

    #[tokio::test]
    async fn connector_layer_reports_new_connections_to_live_trace() {
        let observer = ConnectionObserver::new();
        let mut connector = observer.layer(tower::service_fn(|_: ()| async {
            Ok::<_, Infallible>("conn")
        }));

        let mut trace = RequestTrace::begin("https://example.com/a.ts", &observer);
        let conn = connector.ready().await.unwrap().call(()).await.unwrap();
        assert_eq!(conn, "conn");
        trace.mark_first_byte(StatusCode::OK);
        trace.mark_downloaded(0);

        assert!(trace.finish().unwrap().new_connection);

        // The next request reuses the pooled connection: the connector is not called.
        let mut trace = RequestTrace::begin("https://example.com/b.ts", &observer);
        trace.mark_first_byte(StatusCode::OK);
        trace.mark_downloaded(0);
        assert!(!trace.finish().unwrap().new_connection);
    }
}
