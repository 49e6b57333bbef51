//! Relevance scoring.
//!
//! A file's score is the sum of independent, bounded signals:
//!
//! | Signal | Contribution |
//! |--------|--------------|
//! | primary-language extension | `+primary_weight` |
//! | secondary extension or well-known name | `+secondary_weight` |
//! | file name matches an entry-point glob | `+entry_point_weight` |
//! | inbound references (capped) | `+reference_weight` each |
//! | directory depth beyond the threshold | `-depth_penalty` per level |
//! | recency | `recency_max / (1 + age_hours)` |
//!
//! Files outside every allow-list, larger than `max_file_bytes`, or without a
//! text body are ineligible and score `f64::NEG_INFINITY`. Scoring is a pure
//! function of the file, its inbound count, and the supplied clock, so the
//! same workspace always ranks the same way.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;

use crate::config::ScoringConfig;
use crate::models::TrackedFile;

pub const INELIGIBLE: f64 = f64::NEG_INFINITY;

/// Which allow-list a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageClass {
    Primary,
    Secondary,
    Unlisted,
}

pub struct Scorer {
    config: ScoringConfig,
    primary: HashSet<String>,
    secondary: HashSet<String>,
    secondary_names: HashSet<String>,
    entry_points: GlobSet,
}

impl Scorer {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        let lower = |items: &[String]| -> HashSet<String> {
            items
                .iter()
                .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        };

        Ok(Self {
            primary: lower(&config.primary_extensions),
            secondary: lower(&config.secondary_extensions),
            secondary_names: lower(&config.secondary_names),
            entry_points: build_globset(&config.entry_points)
                .context("Invalid scoring.entry_points pattern")?,
            config: config.clone(),
        })
    }

    pub fn classify(&self, file: &TrackedFile) -> LanguageClass {
        match file.extension() {
            Some(ext) if self.primary.contains(&ext) => LanguageClass::Primary,
            Some(ext) if self.secondary.contains(&ext) => LanguageClass::Secondary,
            _ if self
                .secondary_names
                .contains(&file.file_name().to_ascii_lowercase()) =>
            {
                LanguageClass::Secondary
            }
            _ => LanguageClass::Unlisted,
        }
    }

    pub fn is_entry_point(&self, file: &TrackedFile) -> bool {
        self.entry_points.is_match(file.file_name())
    }

    /// Score `file`. `inbound` is the number of other files referencing it.
    pub fn score(&self, file: &TrackedFile, inbound: usize, now: DateTime<Utc>) -> f64 {
        let cfg = &self.config;

        if file.size_bytes > cfg.max_file_bytes || file.content.is_none() {
            return INELIGIBLE;
        }

        let mut score = match self.classify(file) {
            LanguageClass::Primary => cfg.primary_weight,
            LanguageClass::Secondary => cfg.secondary_weight,
            LanguageClass::Unlisted => return INELIGIBLE,
        };

        if self.is_entry_point(file) {
            score += cfg.entry_point_weight;
        }

        score += inbound.min(cfg.reference_cap) as f64 * cfg.reference_weight;

        let depth = file.path.matches('/').count();
        score -= depth.saturating_sub(cfg.depth_threshold) as f64 * cfg.depth_penalty;

        score += recency_bonus(cfg.recency_max, file.last_modified_at, now);

        score
    }
}

/// `max / (1 + whole hours since modification)`; future timestamps count as age 0.
pub fn recency_bonus(max: f64, modified: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - modified).num_hours().max(0);
    max / (1.0 + age_hours as f64)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
