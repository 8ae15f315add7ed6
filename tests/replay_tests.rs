mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{counter, wait_until, SCENARIO};
use reqwest::Url;
use scan_progress_rs::error::CancelError;
use scan_progress_rs::replay::{spawn_replay_server, ReplayConfig};
use scan_progress_rs::types::{ScanStatus, SessionState, StepStatus};
use scan_progress_rs::{BackendConfig, HttpBackend, ScanProgressController};

async fn controller_for(config: ReplayConfig) -> ScanProgressController {
    let addr = spawn_replay_server("127.0.0.1:0", config).await.unwrap();
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let backend = HttpBackend::new(BackendConfig::new(base)).unwrap();
    ScanProgressController::new(Arc::new(backend))
}

fn frames(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn scenario_over_http() {
    let mut ctl = controller_for(ReplayConfig {
        frames: frames(SCENARIO),
        ..ReplayConfig::default()
    })
    .await;
    let mut view = ctl.subscribe();

    ctl.start("scan-42");
    let p = wait_until(&mut view, |p| p.is_closed()).await;

    assert_eq!(p.status, ScanStatus::Failed);
    assert_eq!(p.dropped_frames, 0);
    assert_eq!(p.steps()[0].name, "Recon");
    assert_eq!(p.steps()[0].status, StepStatus::Success);
    assert_eq!(p.steps()[1].name, "Exploit");
    assert_eq!(p.steps()[1].status, StepStatus::Error);
    assert_eq!(p.steps()[1].logs[0].message, "denied");
}

#[tokio::test]
async fn replaying_twice_gives_identical_tables() {
    let config = ReplayConfig {
        frames: frames(SCENARIO),
        ..ReplayConfig::default()
    };
    let mut tables = Vec::new();
    for _ in 0..2 {
        let mut ctl = controller_for(config.clone()).await;
        let mut view = ctl.subscribe();
        ctl.start("scan-42");
        let p = wait_until(&mut view, |p| p.is_closed()).await;
        tables.push(serde_json::to_string(&p.table).unwrap());
    }
    assert_eq!(tables[0], tables[1]);
}

#[tokio::test]
async fn server_closing_stream_early_fails_the_scan() {
    let mut ctl = controller_for(ReplayConfig {
        frames: frames(&SCENARIO[..4]),
        ..ReplayConfig::default()
    })
    .await;
    let mut view = ctl.subscribe();

    ctl.start("scan-42");
    let p = wait_until(&mut view, |p| p.is_closed()).await;
    assert_eq!(p.status, ScanStatus::Failed);
    assert!(!p.connected);
    assert_eq!(p.steps()[0].status, StepStatus::Success);
}

#[tokio::test]
async fn cancel_over_http_is_acknowledged() {
    let cancels = counter();
    let hook_calls = cancels.clone();
    let mut ctl = controller_for(ReplayConfig {
        frames: frames(&SCENARIO[..2]),
        hold_open: true,
        ..ReplayConfig::default()
    })
    .await
    .on_cancel(move || {
        hook_calls.fetch_add(1, Ordering::SeqCst);
    });
    let mut view = ctl.subscribe();

    ctl.start("scan-42");
    wait_until(&mut view, |p| p.current_step == Some(1)).await;

    ctl.cancel().await.unwrap();
    let p = ctl.snapshot();
    assert_eq!(p.status, ScanStatus::Cancelled);
    assert_eq!(p.session, SessionState::Closed);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    tokio::time::timeout(Duration::from_secs(5), ctl.wait())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_over_http_wins_against_the_closing_stream() {
    let addr = spawn_replay_server(
        "127.0.0.1:0",
        ReplayConfig {
            frames: frames(&SCENARIO[..2]),
            hold_open: true,
            ..ReplayConfig::default()
        },
    )
    .await
    .unwrap();
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let backend = Arc::new(HttpBackend::new(BackendConfig::new(base)).unwrap());

    for round in 0..50 {
        let cancels = counter();
        let hook_calls = cancels.clone();
        let mut ctl = ScanProgressController::new(backend.clone()).on_cancel(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        });
        let mut view = ctl.subscribe();

        ctl.start("scan-42");
        wait_until(&mut view, |p| p.current_step == Some(1)).await;
        ctl.cancel().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), ctl.wait())
            .await
            .unwrap();

        let p = ctl.snapshot();
        assert_eq!(p.status, ScanStatus::Cancelled, "round {round}");
        assert!(p.is_closed(), "round {round}");
        assert_eq!(cancels.load(Ordering::SeqCst), 1, "round {round}");
    }
}

#[tokio::test]
async fn rejected_cancel_over_http_leaves_scan_running() {
    let mut ctl = controller_for(ReplayConfig {
        frames: frames(&SCENARIO[..2]),
        hold_open: true,
        reject_cancel: true,
        ..ReplayConfig::default()
    })
    .await;
    let mut view = ctl.subscribe();

    ctl.start("scan-42");
    wait_until(&mut view, |p| p.current_step == Some(1)).await;

    let err = ctl.cancel().await.unwrap_err();
    assert!(matches!(err, CancelError::Rejected { status: 500 }));
    let p = ctl.snapshot();
    assert_eq!(p.status, ScanStatus::Running);
    assert_eq!(p.session, SessionState::Open);
    assert!(p.connected);
    ctl.stop();
}

#[tokio::test]
async fn unreachable_server_fails_the_scan() {
    // Bind then drop a listener to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let backend = HttpBackend::new(BackendConfig::new(base)).unwrap();
    let mut ctl = ScanProgressController::new(Arc::new(backend));
    let mut view = ctl.subscribe();

    ctl.start("scan-42");
    let p = wait_until(&mut view, |p| p.is_closed()).await;
    assert_eq!(p.status, ScanStatus::Failed);
    assert!(ctl.cancel().await.is_err());
    assert_eq!(ctl.snapshot().status, ScanStatus::Failed);
}

#[tokio::test]
async fn bundled_demo_replays_to_completion() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/recon_exploit.jsonl");
    let frames = scan_progress_rs::replay::load_frames_from_path(path).unwrap();
    let mut ctl = controller_for(ReplayConfig {
        frames,
        ..ReplayConfig::default()
    })
    .await;
    let mut view = ctl.subscribe();

    ctl.start("demo");
    let p = wait_until(&mut view, |p| p.is_closed()).await;
    assert_eq!(p.status, ScanStatus::Failed);
    // The `[STEP_START]` control line is not content.
    assert_eq!(p.log().len(), 4);
    assert_eq!(p.steps()[0].logs.len(), 2);
    assert_eq!(p.steps()[0].logs[1].source.as_deref(), Some("nmap"));
    assert_eq!(p.steps()[1].logs.len(), 2);
}
