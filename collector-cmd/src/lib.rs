use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use collector_core::config::ConfigSource;
use collector_core::supervisor::Supervisor;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_log::LogTracer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// `program [config_path]`, per §6 — a single optional positional argument.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(default_value = "config.yaml")]
    config: String,
}

/// Installs the process-wide `tracing` subscriber: stdout at INFO, a
/// daily-rolling file appender, and an `EnvFilter` seeded from `RUST_LOG`.
/// Returns the appender's guard, which must stay alive for the life of the
/// process or buffered log lines are lost on exit.
pub fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let _ = LogTracer::builder().init();
    let file_appender = tracing_appender::rolling::daily("logs", "collector");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(fmt::time::ChronoLocal::rfc_3339())
        .with_level(true)
        .with_writer(std::io::stdout)
        .with_filter(LevelFilter::INFO);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(LevelFilter::INFO);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let collector = Registry::default()
        .with(ErrorLayer::default())
        .with(env_filter)
        .with(file_layer)
        .with(fmt_layer);
    tracing::subscriber::set_global_default(collector).expect("tracing subscriber already set");
    guard
}

/// Loads the configuration, starts every enabled collector, spawns the
/// command intake, and waits for `SIGINT`/`SIGTERM` before shutting down
/// cleanly. Returns the process exit code (§6): 0 on clean shutdown, 1 on a
/// fatal init error.
pub async fn cmd() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_source = ConfigSource::load(&args.config)
        .await
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let settings = config_source.settings().clone();
    let mqtt_settings = settings.mqtt.clone();
    let devices = settings.production_lines.clone();

    let supervisor = Arc::new(Mutex::new(Supervisor::new(settings)));
    supervisor.lock().await.create(&devices).await;
    info!(
        "started {} collector(s)",
        devices.iter().filter(|d| d.enabled).count()
    );

    let intake_supervisor = Arc::clone(&supervisor);
    let intake = tokio::spawn(collector_core::command::run_command_intake(
        mqtt_settings,
        intake_supervisor,
    ));

    let watcher_supervisor = Arc::clone(&supervisor);
    let watcher = tokio::spawn(watch_config(config_source, watcher_supervisor));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping collectors");

    intake.abort();
    watcher.abort();
    supervisor.lock().await.shutdown().await;
    Ok(())
}

/// Polls the configuration source every second for an mtime bump (§4.7/§5)
/// and, on a change, reloads it and replaces the Supervisor's snapshot.
/// Per §9's config-reload semantics, this never reconciles already-running
/// collectors: only an explicit `restart_line` command picks up a changed
/// device definition.
async fn watch_config(mut config_source: ConfigSource, supervisor: Arc<Mutex<Supervisor>>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        interval.tick().await;
        if !config_source.has_changed().await {
            continue;
        }
        match config_source.reload().await {
            Ok(()) => {
                info!("configuration file changed, reloaded snapshot");
                supervisor
                    .lock()
                    .await
                    .replace_settings(config_source.settings().clone());
            }
            Err(err) => {
                error!("failed to reload configuration: {}", err);
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            error!("failed to install SIGTERM handler: {}", err);
            let _ = ctrl_c.await;
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate.recv() => {}
    }
}
