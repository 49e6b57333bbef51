//! The context cache manager.
//!
//! [`ContextCacheManager`] exclusively owns the index: tracked files, their
//! outbound references, and the tiers. It is built explicitly from a
//! [`Config`], seeded by [`initial_scan`](ContextCacheManager::initial_scan),
//! fed change events with [`apply`](ContextCacheManager::apply), and turned
//! into a document by [`refresh`](ContextCacheManager::refresh):
//!
//! ```text
//! FileEvent* ──apply──▶ files ──refresh──▶ score ─▶ rebalance ─▶ assemble
//! ```
//!
//! All methods are synchronous. The scheduler runs them on a blocking worker.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::assembler::{assemble, BudgetWarning, ContextDocument};
use crate::config::{Config, CHARS_PER_TOKEN};
use crate::detector::Detector;
use crate::models::{FileEvent, FileSnapshot, Tier, TrackedFile};
use crate::references::{count_inbound, referenced_names};
use crate::scorer::Scorer;
use crate::tiers::{TierChanges, TieredIndex};

/// Result of one refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// 1-based refresh counter.
    pub sequence: u64,
    pub document: ContextDocument,
    /// Tiered files that did not fit the budget.
    pub dropped: Vec<String>,
    pub warning: Option<BudgetWarning>,
    pub changes: TierChanges,
    pub tracked: usize,
    pub excluded: usize,
}

/// One row of the tier listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierEntry {
    pub path: String,
    pub tier: Tier,
    /// `None` for ineligible files.
    pub score: Option<f64>,
    pub size_bytes: u64,
    pub fingerprint: String,
}

pub struct ContextCacheManager {
    scorer: Scorer,
    tiers: TieredIndex,
    files: BTreeMap<String, TrackedFile>,
    outbound: BTreeMap<String, BTreeSet<String>>,
    preamble: String,
    budget: usize,
    refreshes: u64,
}

impl ContextCacheManager {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            scorer: Scorer::new(&config.scoring)?,
            tiers: TieredIndex::new(config.tiers.clone()),
            files: BTreeMap::new(),
            outbound: BTreeMap::new(),
            preamble: config.context.preamble.clone(),
            budget: config.context.byte_budget(),
            refreshes: 0,
        })
    }

    /// Walk the workspace and build the first document.
    pub fn initial_scan(&mut self, detector: &mut Detector, now: DateTime<Utc>) -> RefreshOutcome {
        let events = detector.scan();
        info!(
            root = %detector.root().display(),
            files = events.len(),
            "initial scan complete"
        );
        self.apply(events);
        self.refresh(now)
    }

    /// Apply change events to the index. Returns how many actually changed
    /// it; an `Added`/`Changed` whose fingerprint matches the tracked file,
    /// or a `Removed` for an unknown path, is a no-op.
    pub fn apply(&mut self, events: impl IntoIterator<Item = FileEvent>) -> usize {
        let mut changed = 0;
        for event in events {
            let applied = match event {
                FileEvent::Added(snapshot) | FileEvent::Changed(snapshot) => self.upsert(snapshot),
                FileEvent::Removed(path) => self.remove(&path),
            };
            if applied {
                changed += 1;
            }
        }
        changed
    }

    fn upsert(&mut self, snapshot: FileSnapshot) -> bool {
        if let Some(existing) = self.files.get(&snapshot.path) {
            if existing.fingerprint == snapshot.fingerprint {
                return false;
            }
        }

        let refs = snapshot
            .content
            .as_deref()
            .map(referenced_names)
            .unwrap_or_default();
        self.outbound.insert(snapshot.path.clone(), refs);

        debug!(path = %snapshot.path, fingerprint = snapshot.fingerprint.short(), "indexed");
        match self.files.get_mut(&snapshot.path) {
            Some(file) => file.update(snapshot),
            None => {
                self.files
                    .insert(snapshot.path.clone(), TrackedFile::from_snapshot(snapshot));
            }
        }
        true
    }

    fn remove(&mut self, path: &str) -> bool {
        self.outbound.remove(path);
        let removed = self.files.remove(path).is_some();
        if removed {
            debug!(path, "dropped from index");
        }
        removed
    }

    /// Rescore every file, rebalance the tiers and assemble the document.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> RefreshOutcome {
        let inbound = count_inbound(self.files.keys().map(String::as_str), &self.outbound);
        for file in self.files.values_mut() {
            let refs = inbound.get(&file.path).copied().unwrap_or(0);
            file.score = self.scorer.score(file, refs, now);
        }

        let changes = self.tiers.rebalance(&mut self.files);
        for (path, tier) in &changes.moved {
            debug!(path = %path, tier = %tier, "tier change");
        }
        for path in &changes.evicted {
            debug!(path = %path, "left rendered tiers");
        }

        let members = self
            .tiers
            .ordered()
            .filter_map(|(tier, path)| self.files.get(path).map(|f| (tier, f)));
        let assembly = assemble(&self.preamble, members, self.budget);

        self.refreshes += 1;
        let excluded = self
            .files
            .values()
            .filter(|f| f.tier == Tier::Excluded)
            .count();

        if let Some(warning) = &assembly.warning {
            warn!(
                budget = warning.budget,
                core_total = warning.core_total,
                core_included = warning.core_included,
                "{}",
                warning
            );
        }
        info!(
            refresh = self.refreshes,
            tracked = self.files.len(),
            core = self.tiers.members(Tier::Core).len(),
            frequent = self.tiers.members(Tier::Frequent).len(),
            recent = self.tiers.members(Tier::Recent).len(),
            excluded,
            dropped = assembly.dropped.len(),
            bytes = assembly.document.len(),
            fingerprint = assembly.document.fingerprint.short(),
            "context refreshed"
        );

        RefreshOutcome {
            sequence: self.refreshes,
            document: assembly.document,
            dropped: assembly.dropped,
            warning: assembly.warning,
            changes,
            tracked: self.files.len(),
            excluded,
        }
    }

    /// Shrink the byte budget to fit a model window of `max_model_len`
    /// tokens, keeping `reserve_tokens` free. Returns the new budget.
    pub fn clamp_to_model_window(&mut self, max_model_len: usize, reserve_tokens: usize) -> usize {
        let window = max_model_len
            .saturating_sub(reserve_tokens)
            .saturating_mul(CHARS_PER_TOKEN);
        if window < self.budget {
            info!(
                configured = self.budget,
                clamped = window,
                max_model_len,
                "context budget clamped to model window"
            );
            self.budget = window;
        }
        self.budget
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&TrackedFile> {
        self.files.get(path)
    }

    pub fn tiers(&self) -> &TieredIndex {
        &self.tiers
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    /// Rendered members in document order, then excluded files by path.
    pub fn listing(&self) -> Vec<TierEntry> {
        let entry = |tier: Tier, file: &TrackedFile| TierEntry {
            path: file.path.clone(),
            tier,
            score: file.is_eligible().then_some(file.score),
            size_bytes: file.size_bytes,
            fingerprint: file.fingerprint.to_string(),
        };

        let mut rows: Vec<TierEntry> = self
            .tiers
            .ordered()
            .filter_map(|(tier, path)| self.files.get(path).map(|f| entry(tier, f)))
            .collect();
        rows.extend(
            self.files
                .values()
                .filter(|f| f.tier == Tier::Excluded)
                .map(|f| entry(Tier::Excluded, f)),
        );
        rows
    }

    /// Tear down the index.
    pub fn shutdown(self) {
        info!(
            tracked = self.files.len(),
            refreshes = self.refreshes,
            "context cache manager stopped"
        );
    }
}
