//! # Context Cache
//!
//! Keeps an OpenAI-compatible inference engine's prefix cache warm with the
//! most relevant files of a workspace.
//!
//! The cache watches a directory tree, fingerprints every file that passes
//! the ignore rules, scores files by language, entry-point status, inbound
//! references, depth and recency, and sorts them into fixed-capacity tiers.
//! The tiers render into one context document whose prefix stays
//! byte-identical while scores drift, so the engine can reuse its KV cache
//! across refreshes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  paths  ┌──────────┐ FileEvent ┌───────────┐
//! │ watcher  │────────▶│ detector │──────────▶│ scheduler │
//! │ (notify) │         │ (sha256) │           │ debounce  │
//! └──────────┘         └──────────┘           └─────┬─────┘
//!                                                   │ refresh
//!                       ┌───────────────────────────┤
//!                       ▼                           ▼
//!                 ┌───────────┐              ┌────────────┐
//!                 │  manager  │              │   engine   │
//!                 │ score+tier│──document───▶│ (vLLM API) │
//!                 └───────────┘              └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctxcache scan                 # show what would be cached
//! ctxcache render > ctx.txt     # dump the document
//! ctxcache health               # check the engine
//! ctxcache --config ctxcache.toml run
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`ignore_rules`] | Gitignore-style filtering |
//! | [`detector`] | Fingerprinting and change detection |
//! | [`watcher`] | Filesystem notifications |
//! | [`references`] | Import/include scanning |
//! | [`scorer`] | Relevance scoring |
//! | [`tiers`] | Tiered index with stable ordering |
//! | [`assembler`] | Context document rendering |
//! | [`manager`] | Index owner and refresh pipeline |
//! | [`scheduler`] | Debounced refresh loop and delivery |
//! | [`engine`] | Inference engine client |
//! | [`server`] | Status HTTP API |
//! | [`service`] | `run` lifecycle |

pub mod assembler;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod ignore_rules;
pub mod logging;
pub mod manager;
pub mod models;
pub mod references;
pub mod report;
pub mod scheduler;
pub mod scorer;
pub mod server;
pub mod service;
pub mod tiers;
pub mod watcher;
