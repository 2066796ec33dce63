//! Daemon building blocks for flowgate: CLI definitions, logging setup and
//! the Prometheus metrics recorder. The binary in `main.rs` wires these
//! together with the pipeline runtime from `flowgate-pipeline`.

pub mod cli;
pub mod logging;
pub mod metrics_server;
