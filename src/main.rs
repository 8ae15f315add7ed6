use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scan_progress_rs::replay::{self, ReplayConfig};
use scan_progress_rs::server::{self, AppState};
use scan_progress_rs::types::{LogLevel, ScanStatus};
use scan_progress_rs::{BackendConfig, HttpBackend, ScanProgress, ScanProgressController};

/// scan-progress-rs: follow a multi-step penetration test scan live from its event stream.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scan-progress-rs",
    version,
    about = "Follow a multi-step penetration test scan live from its event stream.",
    long_about = None
)]
struct Cli {
    /// Base URL of the scan API.
    #[arg(long = "base-url", default_value = "http://127.0.0.1:8000")]
    base_url: Url,

    /// Scan identifier to watch. Defaults to `replay` when --replay is given.
    #[arg(long = "scan-id")]
    scan_id: Option<String>,

    /// Replay a recorded JSON-lines frame file through a local server instead of a live scan.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Delay between replayed frames in milliseconds.
    #[arg(long = "frame-delay-ms", default_value_t = 150)]
    frame_delay_ms: u64,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "connect-timeout-ms", default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Write the final progress snapshot as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the dashboard JSON API while watching.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Bind address for the dashboard API.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scan_progress_rs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut base_url = cli.base_url.clone();
    if let Some(path) = cli.replay.as_deref() {
        let frames = replay::load_frames_from_path(path)?;
        let config = ReplayConfig {
            frames,
            delay: Duration::from_millis(cli.frame_delay_ms),
            ..ReplayConfig::default()
        };
        let addr = replay::spawn_replay_server("127.0.0.1:0", config).await?;
        base_url = Url::parse(&format!("http://{addr}")).context("replay server URL")?;
    }
    let scan_id = match (&cli.scan_id, &cli.replay) {
        (Some(id), _) => id.clone(),
        (None, Some(_)) => "replay".to_string(),
        (None, None) => anyhow::bail!("--scan-id is required unless --replay is given"),
    };

    println!("scan-progress-rs configuration:");
    println!("  base_url     : {}", base_url);
    println!("  scan_id      : {}", scan_id);
    println!(
        "  replay       : {}",
        cli.replay
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("  serve_ui     : {}", cli.serve_ui);

    let mut config = BackendConfig::new(base_url);
    config.connect_timeout = Duration::from_millis(cli.connect_timeout_ms);
    let backend = HttpBackend::new(config).context("failed to build HTTP client")?;

    let controller = ScanProgressController::new(Arc::new(backend))
        .on_log(|entry| {
            let tag = match entry.level {
                LogLevel::Info => "    ",
                LogLevel::Success => " OK ",
                LogLevel::Error => "FAIL",
            };
            println!("[{tag}] {}", entry.message);
        })
        .on_complete(|status| tracing::info!(?status, "scan finished"))
        .on_cancel(|| tracing::info!("scan cancelled"));
    let mut view = controller.subscribe();
    let controller = Arc::new(Mutex::new(controller));

    // Start embedded dashboard API if requested (non-blocking background task)
    if cli.serve_ui {
        let state = AppState::new(controller.clone(), controller.lock().await.subscribe());
        let bind = cli.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, state).await {
                tracing::error!(error = %e, "dashboard server error");
            }
        });
        println!("Dashboard API at http://{}/api/status", cli.bind);
    }

    controller.lock().await.start(&scan_id);

    // Run until the session closes; Ctrl+C requests a remote cancel.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nCancelling scan {scan_id}...");
            let mut ctl = controller.lock().await;
            if let Err(e) = ctl.cancel().await {
                eprintln!("Cancel failed: {e}");
                ctl.stop();
            }
        }
        res = view.wait_for(ScanProgress::is_closed) => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "progress channel closed");
            }
        }
    }
    controller.lock().await.wait().await;

    let final_view = controller.lock().await.snapshot();
    print_steps_table(&final_view);
    if let Some(path) = cli.output.as_deref() {
        if let Err(e) = write_progress_json(path, &final_view) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON progress to {}", path.display());
        }
    }

    Ok(match final_view.status {
        ScanStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn print_steps_table(progress: &ScanProgress) {
    let idx_w = 2usize.max("#".len());
    let mut name_w = 4usize.max("name".len());
    for s in progress.steps() {
        name_w = name_w.max(s.name.chars().count().min(40));
    }
    let status_w = 7usize.max("status".len());
    let logs_w = 4usize.max("logs".len());

    println!(
        "\nScan {}: {:?} ({} of {} steps finished, {} log lines, {} dropped frames)",
        progress.scan_id.as_deref().unwrap_or("-"),
        progress.status,
        progress.table.finished(),
        progress.steps().len(),
        progress.log().len(),
        progress.dropped_frames
    );
    println!(
        "{:>idx_w$}  {:<name_w$}  {:<status_w$}  {:>logs_w$}",
        "#",
        "name",
        "status",
        "logs",
        idx_w = idx_w,
        name_w = name_w,
        status_w = status_w,
        logs_w = logs_w
    );
    println!(
        "{:-<idx_w$}  {:-<name_w$}  {:-<status_w$}  {:-<logs_w$}",
        "",
        "",
        "",
        "",
        idx_w = idx_w,
        name_w = name_w,
        status_w = status_w,
        logs_w = logs_w
    );
    for s in progress.steps() {
        let name: String = s.name.chars().take(40).collect();
        println!(
            "{:>idx_w$}  {:<name_w$}  {:<status_w$}  {:>logs_w$}",
            s.index,
            name,
            s.status.label(),
            s.logs.len(),
            idx_w = idx_w,
            name_w = name_w,
            status_w = status_w,
            logs_w = logs_w
        );
    }
}

fn write_progress_json(path: &std::path::Path, progress: &ScanProgress) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, progress)?;
    Ok(())
}
