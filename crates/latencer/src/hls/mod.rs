// LL-HLS latency probing: playlist model, blocking reload planning, request
// tracing and the polling controller that ties them together.

pub mod manifest;
pub mod playlist;
mod probe;
pub mod recorder;
pub mod reload;
pub mod sequence;
pub mod trace;
pub mod transport;

// Re-exports for easier access
pub use playlist::{MediaItem, Part, Playlist, Rendition, Segment};
pub use probe::{LatencyProbe, ProbeReport, ProbeState, StopReason, run};
pub use recorder::{Summary, TraceRecorder, TraceReport, TraceSample};
pub use reload::{ReloadRequest, plan_reload};
pub use sequence::{SequenceNumber, SequenceOrdering};
pub use trace::{ConnectionObserver, RequestTrace, TraceResult};
pub use transport::Transport;
