//! Measures how long an LL-HLS origin takes to answer blocking playlist
//! reloads and to serve the parts those reloads announce.
//!
//! ```no_run
//! use latencer_engine::{ProbeConfig, hls};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn probe() -> Result<(), latencer_engine::ProbeError> {
//! let config = ProbeConfig::new("https://example.com/live/master.m3u8")
//!     .with_output("latency.json");
//! let outcome = hls::run(config, CancellationToken::new()).await?;
//! println!("{} samples", outcome.report.entries.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hls;

pub use config::{ClientConfig, HttpVersionPreference, ProbeConfig};
pub use error::ProbeError;
