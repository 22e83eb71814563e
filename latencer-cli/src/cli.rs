use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Measure latency of video streaming protocols", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Measure latency of an LL-HLS stream
    Hls(HlsArgs),
}

#[derive(ClapArgs, Debug)]
pub struct HlsArgs {
    /// Source URL of the master manifest
    #[arg(short, long = "src")]
    pub src: String,

    /// Run duration in seconds
    #[arg(short, long, default_value_t = 10)]
    pub duration: u64,

    /// Write the latency report to this JSON file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Probe the rendition with this name instead of the first listed one
    #[arg(long)]
    pub rendition: Option<String>,

    /// Require msn and part to both be at least the expected ones
    #[arg(long)]
    pub legacy_ordering: bool,

    /// User-Agent header sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Extra request header, `Name: value`. May be repeated.
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Overall request timeout in seconds, 0 disables it
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Restrict the client to HTTP/1.1
    #[arg(long)]
    pub http1: bool,
}
