//! The flowgate daemon: loads a pipeline configuration, spawns the
//! requested number of pipeline replicas and runs them until a shutdown
//! signal arrives.

use anyhow::Result;
use clap::Parser;

use flowgate_core::metrics as m;
use flowgate_daemon::cli::DaemonCli;
use flowgate_daemon::{logging, metrics_server};
use flowgate_pipeline::{Pipeline, PipelineBuilder, SegmentRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    logging::init_tracing(&cli.log_level, &cli.log_format)?;

    // A statically linked binary has no dynamic loading facility, so any
    // plugin request is a startup failure rather than a silent ignore.
    if !cli.plugins.is_empty() {
        anyhow::bail!(
            "loading segment plugins is unsupported in a statically linked build: {:?}",
            cli.plugins
        );
    }

    if let Some(listen) = &cli.metrics_listen {
        metrics_server::install_metrics_recorder(listen)?;
    }

    let document = std::fs::read_to_string(&cli.config).map_err(|e| {
        anyhow::anyhow!("reading config file {}: {}", cli.config.display(), e)
    })?;
    let decls = flowgate_core::parse_declarations(&document)?;

    let replicas = if cli.jobs == 0 {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    } else {
        cli.jobs
    };
    if replicas != 1 {
        tracing::warn!(
            replicas,
            "running multiple pipeline replicas, end-to-end flow order is not guaranteed"
        );
    }

    let registry = SegmentRegistry::with_defaults();
    let builder = PipelineBuilder::new(&registry).args(&cli.args);

    let mut pipelines: Vec<Pipeline> = Vec::with_capacity(replicas);
    for _ in 0..replicas {
        let mut pipeline = builder.build(&decls)?;
        pipeline.start();
        pipeline.auto_drain();
        pipelines.push(pipeline);
    }

    if cli.metrics_listen.is_some() {
        metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
        metrics::gauge!(m::DAEMON_PIPELINES_RUNNING).set(replicas as f64);
    }
    let uptime_task = cli.metrics_listen.is_some().then(spawn_uptime_updater);

    tracing::info!(
        config = %cli.config.display(),
        replicas,
        segments = decls.len(),
        "flowgate running"
    );

    let signal = wait_for_shutdown_signal().await?;
    tracing::info!(signal, "shutdown signal received");

    for mut pipeline in pipelines {
        pipeline.close().await;
    }
    if let Some(task) = uptime_task {
        task.abort();
    }

    tracing::info!("flowgate shut down");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Spawn a background task that periodically refreshes the uptime gauge.
fn spawn_uptime_updater() -> tokio::task::JoinHandle<()> {
    let start = std::time::Instant::now();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start.elapsed().as_secs() as f64);
        }
    })
}
