//! Filesystem notifications.
//!
//! Bridges `notify`'s callback thread onto a tokio channel of raw paths. The
//! [`Detector`](crate::detector::Detector) turns those paths into
//! fingerprinted change events; nothing here looks at file contents.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Owns the OS watch. Dropping it stops notifications and closes the channel.
pub struct WorkspaceWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl WorkspaceWatcher {
    /// Watch `root` recursively, sending every touched path to `tx`.
    pub fn start(root: &Path, tx: mpsc::UnboundedSender<PathBuf>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => forward(event, &tx),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            }
        })
        .context("Failed to create filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        debug!(root = %root.display(), "watching workspace");
        Ok(Self {
            _watcher: watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn forward(event: Event, tx: &mpsc::UnboundedSender<PathBuf>) {
    if !is_relevant(&event.kind) {
        return;
    }
    for path in event.paths {
        // receiver gone means the service is shutting down
        if tx.send(path).is_err() {
            return;
        }
    }
}

/// Reads and metadata-only opens never change content.
fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}
