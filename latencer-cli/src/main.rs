mod cli;
mod error;

use std::process;
use std::time::Duration;

use clap::Parser;
use latencer_engine::hls::{self, SequenceOrdering};
use latencer_engine::{ClientConfig, HttpVersionPreference, ProbeConfig};
use mimalloc::MiMalloc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands, HlsArgs};
use crate::error::{AppError, Result};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    match args.command {
        Commands::Hls(hls_args) => run_hls(hls_args).await,
    }
}

async fn run_hls(args: HlsArgs) -> Result<()> {
    let config = probe_config(args)?;
    let output_requested = config.output.is_some();

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping probe");
            ctrl_c_token.cancel();
        }
    });

    let outcome = hls::run(config, token).await?;

    for (label, summary) in &outcome.report.summaries {
        info!(
            label = %label,
            samples = summary.samples,
            avg_server_waiting_ms = summary.avg_server_waiting_time * 1000.0,
            avg_body_download_ms = summary.avg_body_download_time * 1000.0,
            avg_total_ms = summary.avg_total_duration * 1000.0,
            "Latency summary"
        );
    }

    if !output_requested && !outcome.report.entries.is_empty() {
        let json = serde_json::to_string_pretty(&outcome.report)
            .map_err(latencer_engine::ProbeError::from)?;
        println!("{json}");
    }

    Ok(())
}

fn probe_config(args: HlsArgs) -> Result<ProbeConfig> {
    let mut client = ClientConfig::default().with_headers(parse_headers(&args.headers)?);
    if let Some(user_agent) = args.user_agent {
        client.user_agent = user_agent;
    }
    client.timeout = Duration::from_secs(args.timeout);
    client.connect_timeout = Duration::from_secs(args.connect_timeout);
    if args.http1 {
        client.http_version = HttpVersionPreference::Http1Only;
    }

    let ordering = if args.legacy_ordering {
        SequenceOrdering::Legacy
    } else {
        SequenceOrdering::Lexicographic
    };

    let mut config = ProbeConfig::new(args.src)
        .with_duration(Duration::from_secs(args.duration))
        .with_ordering(ordering)
        .with_client(client);
    if let Some(output) = args.output {
        config = config.with_output(output);
    }
    if let Some(rendition) = args.rendition {
        config = config.with_rendition(rendition);
    }
    Ok(config)
}

/// Parses repeated `Name: value` arguments.
fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| AppError::InvalidInput(format!("header `{entry}` is not `Name: value`")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| AppError::InvalidInput(format!("header value for `{name}`: {e}")))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_split_on_first_colon() {
        let headers = parse_headers(&[
            "Authorization: Bearer abc".to_string(),
            "X-Origin:https://example.com".to_string(),
        ])
        .unwrap();

        assert_eq!(headers["authorization"], "Bearer abc");
        assert_eq!(headers["x-origin"], "https://example.com");
    }

    #[test]
    fn header_without_colon_is_rejected() {
        let err = parse_headers(&["NoColonHere".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn probe_config_maps_flags() {
        let args = Args::parse_from([
            "latencer",
            "hls",
            "-s",
            "https://example.com/master.m3u8",
            "-d",
            "5",
            "--legacy-ordering",
            "--http1",
            "--user-agent",
            "probe/1",
            "--timeout",
            "30",
        ]);
        let Commands::Hls(hls_args) = args.command;

        let config = probe_config(hls_args).unwrap();

        assert_eq!(config.source, "https://example.com/master.m3u8");
        assert_eq!(config.duration, Duration::from_secs(5));
        assert_eq!(config.ordering, SequenceOrdering::Legacy);
        assert_eq!(config.client.http_version, HttpVersionPreference::Http1Only);
        assert_eq!(config.client.user_agent, "probe/1");
        assert_eq!(config.client.timeout, Duration::from_secs(30));
        assert!(config.output.is_none());
    }
}
