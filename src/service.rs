//! Service lifecycle.
//!
//! Wires the pieces together for `ctxcache run`:
//!
//! ```text
//! notify ──paths──▶ detector task ──FileEvent──▶ scheduler ──▶ engine
//!                                                    │
//!                                                    └──▶ status ◀── server
//! ```
//!
//! Startup order matters: the watcher starts before the initial scan so that
//! edits made while scanning are buffered rather than lost. Replaying them
//! is harmless because unchanged fingerprints are no-ops.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::detector::Detector;
use crate::engine::{wait_until_healthy, InferenceEngine, OpenAiEngine};
use crate::manager::{ContextCacheManager, RefreshOutcome};
use crate::scheduler::{Scheduler, SharedStatus};
use crate::server::run_status_server;
use crate::watcher::WorkspaceWatcher;

/// Capacity of the detector → scheduler channel.
const EVENT_QUEUE: usize = 1024;

/// Scan the workspace once and assemble a document with the configured
/// budget. Used by the one-shot CLI commands.
pub fn scan_workspace(config: &Config) -> Result<(ContextCacheManager, RefreshOutcome)> {
    let mut detector = Detector::from_config(config)?;
    let mut manager = ContextCacheManager::new(config)?;
    let outcome = manager.initial_scan(&mut detector, Utc::now());
    Ok((manager, outcome))
}

/// Run until Ctrl-C: watch, debounce, refresh, deliver.
pub async fn run_service(config: &Config) -> Result<()> {
    let engine: Arc<dyn InferenceEngine> = Arc::new(OpenAiEngine::new(&config.engine)?);
    run_service_with_engine(config, engine, shutdown_signal()).await
}

/// [`run_service`] with an injected engine and shutdown future.
pub async fn run_service_with_engine(
    config: &Config,
    engine: Arc<dyn InferenceEngine>,
    shutdown: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let mut detector = Detector::from_config(config)?;
    let mut manager = ContextCacheManager::new(config)?;

    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathBuf>();
    let watcher = WorkspaceWatcher::start(detector.root(), raw_tx)?;

    if config.engine.wait_for_health {
        wait_until_healthy(
            engine.as_ref(),
            Duration::from_secs(config.engine.health_interval_secs),
        )
        .await;
    }
    let discovered = match engine.model_info().await {
        Ok(model) => {
            manager.clamp_to_model_window(model.max_model_len, config.engine.reserve_tokens);
            true
        }
        Err(e) => {
            warn!(error = %e, "model discovery failed; using configured budget until it succeeds");
            false
        }
    };

    let (detector, manager, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = manager.initial_scan(&mut detector, Utc::now());
        (detector, manager, outcome)
    })
    .await
    .context("Initial scan panicked")?;

    let status = SharedStatus::default();
    let mut scheduler = Scheduler::new(
        manager,
        engine,
        Duration::from_millis(config.scheduler.cooldown_ms),
        status.clone(),
    );
    if !discovered {
        scheduler = scheduler.clamp_after_discovery(config.engine.reserve_tokens);
    }
    scheduler.publish(outcome).await;

    if let Some(server) = &config.server {
        let bind = server.bind.clone();
        let status = status.clone();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(&bind, status).await {
                warn!(bind = %bind, error = %e, "status server stopped");
            }
        });
    }

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let detector_task = tokio::task::spawn_blocking(move || detect(detector, raw_rx, event_tx));
    let scheduler_task = tokio::spawn(scheduler.run(event_rx));

    info!(root = %watcher.root().display(), "watching for changes");
    shutdown.await?;
    info!("shutting down");

    // closing the raw channel ends the detector, which closes the event
    // channel and lets the scheduler flush
    drop(watcher);
    detector_task.await.context("Detector task panicked")?;
    let manager = scheduler_task
        .await
        .context("Scheduler task panicked")??;
    manager.shutdown();
    Ok(())
}

/// Detector loop: raw paths in, fingerprinted events out.
fn detect(
    mut detector: Detector,
    mut raw_rx: mpsc::UnboundedReceiver<PathBuf>,
    event_tx: mpsc::Sender<crate::models::FileEvent>,
) {
    while let Some(path) = raw_rx.blocking_recv() {
        for event in detector.observe(&path) {
            debug!(path = event.path(), kind = event.kind(), "file event");
            if event_tx.blocking_send(event).is_err() {
                return;
            }
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ContextDocument;
    use crate::engine::{ModelInfo, PrimeReport};
    use crate::error::{DeliveryError, DeliveryResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        primed: Mutex<Vec<String>>,
        discovery_down_once: AtomicBool,
    }

    #[async_trait]
    impl InferenceEngine for RecordingEngine {
        fn endpoint(&self) -> &str {
            "memory"
        }

        async fn health(&self) -> DeliveryResult<()> {
            Ok(())
        }

        async fn model_info(&self) -> DeliveryResult<ModelInfo> {
            if self.discovery_down_once.swap(false, Ordering::SeqCst) {
                return Err(DeliveryError::Unreachable("connection refused".to_string()));
            }
            Ok(ModelInfo {
                id: "test".to_string(),
                max_model_len: 100,
            })
        }

        async fn prime(&self, document: &ContextDocument) -> DeliveryResult<PrimeReport> {
            self.primed.lock().unwrap().push(document.text.clone());
            Ok(PrimeReport {
                model: "test".to_string(),
                prompt_tokens: None,
                elapsed: Duration::ZERO,
            })
        }
    }

    fn config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.workspace.root = root.to_path_buf();
        config.context.preamble = "P\n".to_string();
        config.engine.reserve_tokens = 0;
        config.scheduler.cooldown_ms = 100;
        config
    }

    #[test]
    fn scan_workspace_lists_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.py"), "print('hi')\n").unwrap();
        std::fs::write(tmp.path().join("logo.png"), [0u8, 1, 2]).unwrap();

        let (manager, outcome) = scan_workspace(&config(tmp.path())).unwrap();
        assert_eq!(manager.len(), 2);
        assert_eq!(outcome.document.files, vec!["main.py"]);
        assert_eq!(outcome.excluded, 1);
    }

    #[test]
    fn scan_workspace_rejects_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(scan_workspace(&config(&tmp.path().join("nope"))).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn service_primes_on_start_and_after_edit() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.py"), "v = 1\n").unwrap();
        let engine = Arc::new(RecordingEngine::default());

        let root = tmp.path().to_path_buf();
        let edit = async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            std::fs::write(root.join("main.py"), "v = 2\n").unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            Ok(())
        };

        run_service_with_engine(&config(tmp.path()), engine.clone(), edit)
            .await
            .unwrap();

        let primed = engine.primed.lock().unwrap().clone();
        assert!(primed.len() >= 2, "primed {} times", primed.len());
        assert!(primed[0].contains("v = 1"));
        assert!(primed.last().unwrap().contains("v = 2"));
        // 100-token window clamps the budget to 400 bytes
        assert!(primed.iter().all(|d| d.len() <= 400));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn budget_clamps_once_discovery_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.py"), "v = 1\n").unwrap();
        std::fs::write(tmp.path().join("data.py"), format!("rows = '{}'\n", "x".repeat(1000))).unwrap();
        let engine = Arc::new(RecordingEngine::default());
        engine.discovery_down_once.store(true, Ordering::SeqCst);

        let root = tmp.path().to_path_buf();
        let edit = async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            std::fs::write(root.join("main.py"), "v = 2\n").unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            Ok(())
        };

        run_service_with_engine(&config(tmp.path()), engine.clone(), edit)
            .await
            .unwrap();

        let primed = engine.primed.lock().unwrap().clone();
        assert!(primed.len() >= 2, "primed {} times", primed.len());
        assert!(primed[0].len() > 400);
        assert!(primed.last().unwrap().len() <= 400);
    }
}
