//! Refresh scheduler.
//!
//! A single loop consumes [`FileEvent`]s from one channel and debounces them:
//!
//! 1. The first event opens a cooldown window.
//! 2. Every further event restarts the window.
//! 3. When the window expires, pending events (last event per path wins) are
//!    applied and exactly one refresh runs on a blocking worker.
//! 4. The document is delivered to the engine unless it matches the last
//!    successful delivery.
//!
//! Events that arrive while a refresh runs wait in the channel and open the
//! next window. When the channel closes, pending events are flushed in a
//! final refresh and [`Scheduler::run`] returns the manager.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::assembler::{BudgetWarning, ContextDocument};
use crate::engine::InferenceEngine;
use crate::manager::{ContextCacheManager, RefreshOutcome, TierEntry};
use crate::models::{FileEvent, Fingerprint};

/// What the last refresh and delivery looked like; read by the status server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub refreshes: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub budget: usize,
    pub document_bytes: usize,
    pub document_fingerprint: Option<Fingerprint>,
    pub dropped: Vec<String>,
    pub warning: Option<BudgetWarning>,
    pub files: Vec<TierEntry>,
    pub delivery: DeliveryStatus,
    #[serde(skip)]
    pub document: Option<ContextDocument>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStatus {
    pub delivered: u64,
    pub failures: u64,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

pub struct Scheduler {
    manager: Option<ContextCacheManager>,
    engine: Arc<dyn InferenceEngine>,
    cooldown: Duration,
    status: SharedStatus,
    last_delivered: Option<Fingerprint>,
    delivery_failed: bool,
    /// Reserve tokens for a model-window clamp still owed from a failed
    /// startup discovery.
    pending_clamp: Option<usize>,
}

impl Scheduler {
    pub fn new(
        manager: ContextCacheManager,
        engine: Arc<dyn InferenceEngine>,
        cooldown: Duration,
        status: SharedStatus,
    ) -> Self {
        Self {
            manager: Some(manager),
            engine,
            cooldown,
            status,
            last_delivered: None,
            delivery_failed: false,
            pending_clamp: None,
        }
    }

    /// Retry model discovery before each refresh until it succeeds, then
    /// clamp the budget to the model window once.
    pub fn clamp_after_discovery(mut self, reserve_tokens: usize) -> Self {
        self.pending_clamp = Some(reserve_tokens);
        self
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Deliver and publish an outcome produced outside the loop (the
    /// startup refresh).
    pub async fn publish(&mut self, outcome: RefreshOutcome) {
        self.deliver(&outcome).await;
        self.update_status(&outcome).await;
    }

    /// Consume events until the channel closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<FileEvent>) -> Result<ContextCacheManager> {
        info!(cooldown_ms = self.cooldown.as_millis() as u64, "refresh scheduler started");

        let mut pending: BTreeMap<String, FileEvent> = BTreeMap::new();
        loop {
            let Some(first) = rx.recv().await else {
                break;
            };
            pending.insert(first.path().to_string(), first);

            let deadline = tokio::time::sleep(self.cooldown);
            tokio::pin!(deadline);
            let closed = loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => {
                            debug!(path = event.path(), kind = event.kind(), "queued");
                            pending.insert(event.path().to_string(), event);
                            deadline.as_mut().reset(Instant::now() + self.cooldown);
                        }
                        None => break true,
                    },
                    _ = &mut deadline => break false,
                }
            };

            let batch = std::mem::take(&mut pending);
            self.refresh_with(batch.into_values().collect()).await?;

            if closed {
                break;
            }
        }

        info!("refresh scheduler stopped");
        self.manager
            .take()
            .ok_or_else(|| anyhow!("context cache manager lost during refresh"))
    }

    /// Apply `events`, refresh, and deliver. Skips the refresh when nothing
    /// changed and the last delivery succeeded.
    async fn refresh_with(&mut self, events: Vec<FileEvent>) -> Result<()> {
        let mut manager = self
            .manager
            .take()
            .ok_or_else(|| anyhow!("context cache manager lost during refresh"))?;
        let now = Utc::now();
        let mut retry = self.delivery_failed;

        if let Some(reserve_tokens) = self.pending_clamp {
            match self.engine.model_info().await {
                Ok(model) => {
                    let before = manager.budget();
                    let after = manager.clamp_to_model_window(model.max_model_len, reserve_tokens);
                    retry |= after != before;
                    self.pending_clamp = None;
                }
                Err(e) => debug!(error = %e, "model discovery still failing"),
            }
        }

        let (manager, outcome) = tokio::task::spawn_blocking(move || {
            let changed = manager.apply(events);
            let outcome = (changed > 0 || retry).then(|| manager.refresh(now));
            (manager, outcome)
        })
        .await?;
        self.manager = Some(manager);

        match outcome {
            Some(outcome) => {
                self.deliver(&outcome).await;
                self.update_status(&outcome).await;
            }
            None => debug!("no effective changes; refresh skipped"),
        }
        Ok(())
    }

    async fn deliver(&mut self, outcome: &RefreshOutcome) {
        let document = &outcome.document;
        if self.last_delivered.as_ref() == Some(&document.fingerprint) {
            debug!(
                fingerprint = document.fingerprint.short(),
                "document unchanged; delivery skipped"
            );
            self.delivery_failed = false;
            return;
        }

        match self.engine.prime(document).await {
            Ok(report) => {
                info!(
                    model = %report.model,
                    bytes = document.len(),
                    prompt_tokens = report.prompt_tokens,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "context delivered"
                );
                self.last_delivered = Some(document.fingerprint.clone());
                self.delivery_failed = false;
                let mut status = self.status.write().await;
                status.delivery.delivered += 1;
                status.delivery.last_delivered_at = Some(Utc::now());
                status.delivery.last_error = None;
            }
            Err(e) => {
                warn!(
                    endpoint = self.engine.endpoint(),
                    error = %e,
                    "context delivery failed; retrying on next refresh"
                );
                self.delivery_failed = true;
                let mut status = self.status.write().await;
                status.delivery.failures += 1;
                status.delivery.last_error = Some(e.to_string());
            }
        }
    }

    async fn update_status(&self, outcome: &RefreshOutcome) {
        let Some(manager) = &self.manager else {
            return;
        };
        let mut status = self.status.write().await;
        status.refreshes = outcome.sequence;
        status.last_refresh_at = Some(Utc::now());
        status.budget = manager.budget();
        status.document_bytes = outcome.document.len();
        status.document_fingerprint = Some(outcome.document.fingerprint.clone());
        status.dropped = outcome.dropped.clone();
        status.warning = outcome.warning.clone();
        status.files = manager.listing();
        status.document = Some(outcome.document.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{ModelInfo, PrimeReport};
    use crate::error::{DeliveryError, DeliveryResult};
    use crate::models::FileSnapshot;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        primed: Mutex<Vec<String>>,
        failing: AtomicBool,
        small_window: AtomicBool,
    }

    impl RecordingEngine {
        fn documents(&self) -> Vec<String> {
            self.primed.lock().unwrap().clone()
        }
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
            let max_model_len = if self.small_window.load(Ordering::SeqCst) {
                100
            } else {
                8192
            };
            Ok(ModelInfo {
                id: "test".to_string(),
                max_model_len,
            })
        }

        async fn prime(&self, document: &ContextDocument) -> DeliveryResult<PrimeReport> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DeliveryError::Unreachable("connection refused".to_string()));
            }
            self.primed.lock().unwrap().push(document.text.clone());
            Ok(PrimeReport {
                model: "test".to_string(),
                prompt_tokens: None,
                elapsed: Duration::ZERO,
            })
        }
    }

    fn snapshot(path: &str, body: &str) -> FileSnapshot {
        FileSnapshot {
            path: path.to_string(),
            fingerprint: Fingerprint::of(body.as_bytes()),
            size_bytes: body.len() as u64,
            modified_at: Utc::now(),
            content: Some(body.to_string()),
        }
    }

    fn scheduler(engine: Arc<RecordingEngine>) -> Scheduler {
        let mut config = Config::default();
        config.context.preamble = String::new();
        let manager = ContextCacheManager::new(&config).unwrap();
        Scheduler::new(
            manager,
            engine,
            Duration::from_millis(1000),
            SharedStatus::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn two_edits_in_one_window_refresh_once() {
        let engine = Arc::new(RecordingEngine::default());
        let scheduler = scheduler(engine.clone());
        let status = scheduler.status();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(scheduler.run(rx));

        tx.send(FileEvent::Added(snapshot("main.py", "v1"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        tx.send(FileEvent::Changed(snapshot("main.py", "v2"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let primed = engine.documents();
        assert_eq!(primed.len(), 1);
        assert!(primed[0].contains("v2"));
        assert!(!primed[0].contains("v1"));
        assert_eq!(status.read().await.refreshes, 1);

        drop(tx);
        let manager = task.await.unwrap().unwrap();
        assert_eq!(manager.refreshes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_event_restarts_the_window() {
        let engine = Arc::new(RecordingEngine::default());
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(scheduler(engine.clone()).run(rx));

        for i in 0..5 {
            tx.send(FileEvent::Added(snapshot(&format!("f{}.py", i), "x")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(800)).await;
        }
        assert!(engine.documents().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.documents().len(), 1);

        drop(tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_document_is_not_resent() {
        let engine = Arc::new(RecordingEngine::default());
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(scheduler(engine.clone()).run(rx));

        tx.send(FileEvent::Added(snapshot("a.py", "x"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // same content again: no effective change
        tx.send(FileEvent::Changed(snapshot("a.py", "x"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // add then remove inside one window: last event wins, nothing changes
        tx.send(FileEvent::Added(snapshot("b.py", "y"))).await.unwrap();
        tx.send(FileEvent::Removed("b.py".to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(engine.documents().len(), 1);
        drop(tx);
        let manager = task.await.unwrap().unwrap();
        assert_eq!(manager.refreshes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_is_retried_on_next_refresh() {
        let engine = Arc::new(RecordingEngine::default());
        engine.failing.store(true, Ordering::SeqCst);
        let scheduler = scheduler(engine.clone());
        let status = scheduler.status();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(scheduler.run(rx));

        tx.send(FileEvent::Added(snapshot("a.py", "x"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(engine.documents().is_empty());
        assert_eq!(status.read().await.delivery.failures, 1);

        engine.failing.store(false, Ordering::SeqCst);
        // a no-op event still triggers a retry of the same document
        tx.send(FileEvent::Changed(snapshot("a.py", "x"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(engine.documents().len(), 1);
        let snapshot = status.read().await.clone();
        assert_eq!(snapshot.delivery.delivered, 1);
        assert!(snapshot.delivery.last_error.is_none());

        drop(tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_channel_flushes_pending_events() {
        let engine = Arc::new(RecordingEngine::default());
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(scheduler(engine.clone()).run(rx));

        tx.send(FileEvent::Added(snapshot("late.py", "bye"))).await.unwrap();
        drop(tx);

        let manager = task.await.unwrap().unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(engine.documents().len(), 1);
        assert!(engine.documents()[0].contains("late.py"));
    }

    #[tokio::test]
    async fn publish_delivers_startup_document() {
        let engine = Arc::new(RecordingEngine::default());
        let mut config = Config::default();
        config.context.preamble = "P".to_string();
        let mut manager = ContextCacheManager::new(&config).unwrap();
        manager.apply([FileEvent::Added(snapshot("main.rs", "fn main() {}"))]);
        let outcome = manager.refresh(Utc::now());

        let mut scheduler = Scheduler::new(
            manager,
            engine.clone(),
            Duration::from_secs(1),
            SharedStatus::default(),
        );
        scheduler.publish(outcome).await;

        let status = scheduler.status();
        let status = status.read().await;
        assert_eq!(status.refreshes, 1);
        assert_eq!(status.files.len(), 1);
        assert!(status.document.as_ref().unwrap().text.starts_with("P=== File: main.rs"));
        assert_eq!(engine.documents().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_model_discovery_clamps_budget() {
        let engine = Arc::new(RecordingEngine::default());
        engine.small_window.store(true, Ordering::SeqCst);
        let scheduler = scheduler(engine.clone()).clamp_after_discovery(20);
        let status = scheduler.status();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(scheduler.run(rx));

        tx.send(FileEvent::Added(snapshot("a.py", &"x".repeat(500))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let window = (100 - 20) * crate::config::CHARS_PER_TOKEN;
        let snapshot = status.read().await.clone();
        assert_eq!(snapshot.budget, window);
        assert!(snapshot.document_bytes <= window);
        assert_eq!(snapshot.dropped, ["a.py"]);

        drop(tx);
        let manager = task.await.unwrap().unwrap();
        assert_eq!(manager.budget(), window);
    }
}
