//! CLI argument definitions for flowgate-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// The flowgate utility processes network flows through configurable
/// pipelines of segments.
#[derive(Parser, Debug)]
#[command(name = "flowgate")]
#[command(about, long_about = None, disable_version_flag = true)]
pub struct DaemonCli {
    /// Location of the config file in YAML format.
    #[arg(short = 'c', long = "config", default_value = "config.yml")]
    pub config: PathBuf,

    /// Loglevel: one of 'debug', 'info', 'warning' or 'error'.
    #[arg(short = 'l', long = "loglevel", default_value = "warning")]
    pub log_level: String,

    /// Log format (json, pretty).
    #[arg(long = "logformat", default_value = "pretty")]
    pub log_format: String,

    /// Print version and exit.
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    /// Path to load segment plugins from, can be specified multiple times.
    #[arg(short = 'p', long = "plugin")]
    pub plugins: Vec<PathBuf>,

    /// How many concurrent pipelines to spawn. Set to 0 to match the
    /// available parallelism. Only the default value 1 guarantees a stable
    /// order of the flows in and out of flowgate.
    #[arg(short = 'j', long = "jobs", default_value_t = 1)]
    pub jobs: usize,

    /// Listen address for the Prometheus metrics endpoint
    /// (e.g. 0.0.0.0:9090). Metrics are disabled when unset.
    #[arg(long = "metrics-listen")]
    pub metrics_listen: Option<String>,

    /// Non-flag arguments, exposed to config expansion as $1, $2, ...
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}
