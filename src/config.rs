//! TOML configuration parsing.
//!
//! Every section is optional and falls back to defaults, so the cache can run
//! with no file at all. Environment variables used by container deployments
//! (`WATCH_DIR`, `VLLM_ENDPOINT`, ...) override file values; see
//! [`apply_env_overrides`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Approximate bytes per token, used to convert token budgets.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub tiers: TierConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Ignore file, relative to `root` unless absolute.
    #[serde(default = "default_ignore_file")]
    pub ignore_file: PathBuf,
    #[serde(default)]
    pub extra_ignore_dirs: Vec<String>,
    #[serde(default = "default_true")]
    pub follow_symlinks: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            ignore_file: default_ignore_file(),
            extra_ignore_dirs: Vec::new(),
            follow_symlinks: true,
        }
    }
}

impl WorkspaceConfig {
    pub fn ignore_file_path(&self) -> PathBuf {
        if self.ignore_file.is_absolute() {
            self.ignore_file.clone()
        } else {
            self.root.join(&self.ignore_file)
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_ignore_file() -> PathBuf {
    PathBuf::from(".gitignore")
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_primary_extensions")]
    pub primary_extensions: Vec<String>,
    #[serde(default = "default_secondary_extensions")]
    pub secondary_extensions: Vec<String>,
    /// Extension-less file names scored as secondary (matched case-insensitively).
    #[serde(default = "default_secondary_names")]
    pub secondary_names: Vec<String>,
    /// Glob patterns matched against the file name.
    #[serde(default = "default_entry_points")]
    pub entry_points: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_primary_weight")]
    pub primary_weight: f64,
    #[serde(default = "default_secondary_weight")]
    pub secondary_weight: f64,
    #[serde(default = "default_entry_point_weight")]
    pub entry_point_weight: f64,
    #[serde(default = "default_reference_weight")]
    pub reference_weight: f64,
    #[serde(default = "default_reference_cap")]
    pub reference_cap: usize,
    #[serde(default = "default_depth_threshold")]
    pub depth_threshold: usize,
    #[serde(default = "default_depth_penalty")]
    pub depth_penalty: f64,
    #[serde(default = "default_recency_max")]
    pub recency_max: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            primary_extensions: default_primary_extensions(),
            secondary_extensions: default_secondary_extensions(),
            secondary_names: default_secondary_names(),
            entry_points: default_entry_points(),
            max_file_bytes: default_max_file_bytes(),
            primary_weight: default_primary_weight(),
            secondary_weight: default_secondary_weight(),
            entry_point_weight: default_entry_point_weight(),
            reference_weight: default_reference_weight(),
            reference_cap: default_reference_cap(),
            depth_threshold: default_depth_threshold(),
            depth_penalty: default_depth_penalty(),
            recency_max: default_recency_max(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_primary_extensions() -> Vec<String> {
    strings(&[
        "py", "rs", "go", "js", "jsx", "ts", "tsx", "java", "c", "h", "cpp", "cc", "hpp", "cs",
        "rb", "php", "swift", "kt", "scala",
    ])
}
fn default_secondary_extensions() -> Vec<String> {
    strings(&[
        "md", "rst", "txt", "toml", "yaml", "yml", "json", "xml", "ini", "cfg", "conf", "sh",
        "sql", "mk",
    ])
}
fn default_secondary_names() -> Vec<String> {
    strings(&["Dockerfile", "Makefile", "Caddyfile"])
}
fn default_entry_points() -> Vec<String> {
    strings(&[
        "main.*",
        "index.*",
        "app.*",
        "server.*",
        "lib.rs",
        "mod.rs",
        "__init__.py",
    ])
}
fn default_max_file_bytes() -> u64 {
    100_000
}
fn default_primary_weight() -> f64 {
    10.0
}
fn default_secondary_weight() -> f64 {
    5.0
}
fn default_entry_point_weight() -> f64 {
    15.0
}
fn default_reference_weight() -> f64 {
    1.0
}
fn default_reference_cap() -> usize {
    10
}
fn default_depth_threshold() -> usize {
    2
}
fn default_depth_penalty() -> f64 {
    1.0
}
fn default_recency_max() -> f64 {
    5.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct TierConfig {
    #[serde(default = "default_core")]
    pub core: usize,
    #[serde(default = "default_frequent")]
    pub frequent: usize,
    #[serde(default = "default_recent")]
    pub recent: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            core: default_core(),
            frequent: default_frequent(),
            recent: default_recent(),
        }
    }
}

impl TierConfig {
    pub fn total(&self) -> usize {
        self.core
            .saturating_add(self.frequent)
            .saturating_add(self.recent)
    }
}

fn default_core() -> usize {
    8
}
fn default_frequent() -> usize {
    16
}
fn default_recent() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Optional token budget, converted at [`CHARS_PER_TOKEN`] bytes per token.
    #[serde(default)]
    pub max_tokens: Option<usize>,
    /// Fixed text at the start of every document.
    #[serde(default = "default_preamble")]
    pub preamble: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_tokens: None,
            preamble: default_preamble(),
        }
    }
}

impl ContextConfig {
    /// Effective byte budget: the tighter of `max_bytes` and `max_tokens`.
    pub fn byte_budget(&self) -> usize {
        match self.max_tokens {
            Some(tokens) => self.max_bytes.min(tokens.saturating_mul(CHARS_PER_TOKEN)),
            None => self.max_bytes,
        }
    }
}

fn default_max_bytes() -> usize {
    256 * 1024
}
fn default_preamble() -> String {
    "You are a code assistant. The following files are part of the codebase:\n\n".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_cooldown_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub url: String,
    /// Model id; discovered from `/v1/models` when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Name of an environment variable holding a bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Completion tokens requested by a priming call.
    #[serde(default = "default_prime_max_tokens")]
    pub max_tokens: u32,
    /// Tokens kept free in the model window when clamping the budget.
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: usize,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_true")]
    pub wait_for_health: bool,
    #[serde(default = "default_priming_prompt")]
    pub priming_prompt: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            model: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_prime_max_tokens(),
            reserve_tokens: default_reserve_tokens(),
            health_interval_secs: default_health_interval_secs(),
            wait_for_health: true,
            priming_prompt: default_priming_prompt(),
        }
    }
}

fn default_engine_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_prime_max_tokens() -> u32 {
    10
}
fn default_reserve_tokens() -> usize {
    200
}
fn default_health_interval_secs() -> u64 {
    5
}
fn default_priming_prompt() -> String {
    "Analyze this codebase and be ready to answer questions about it.".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from `path` (or defaults when `None`), apply
/// environment overrides, and validate.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            parse_config(&content)?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Apply the watcher's environment variables on top of file values.
///
/// `lookup` abstracts `std::env::var` so overrides can be tested without
/// touching the process environment.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(root) = get("WATCH_DIR") {
        config.workspace.root = PathBuf::from(root);
    }
    if let Some(file) = get("IGNORE_FILE") {
        config.workspace.ignore_file = PathBuf::from(file);
    }
    if let Some(dirs) = get("EXTRA_IGNORE_DIRS") {
        config.workspace.extra_ignore_dirs = split_list(&dirs);
    }
    if let Some(url) = get("VLLM_ENDPOINT") {
        config.engine.url = url;
    }
    if let Some(secs) = get("WATCH_INTERVAL").and_then(|v| v.trim().parse::<u64>().ok()) {
        config.scheduler.cooldown_ms = secs.saturating_mul(1000);
    }
    if let Some(bytes) = get("CACHE_MAX_FILE_SIZE").and_then(|v| v.trim().parse::<u64>().ok()) {
        config.scoring.max_file_bytes = bytes;
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.logging.level = level.to_ascii_lowercase();
    }
}

/// Split a comma-separated list, dropping blanks and surrounding slashes.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().trim_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn validate(config: &Config) -> Result<()> {
    if config.tiers.core == 0 {
        bail!("tiers.core must be > 0");
    }

    let tiers = &config.tiers;
    if tiers
        .core
        .checked_add(tiers.frequent)
        .and_then(|sum| sum.checked_add(tiers.recent))
        .is_none()
    {
        bail!(
            "tiers capacities are too large (core={}, frequent={}, recent={})",
            tiers.core,
            tiers.frequent,
            tiers.recent
        );
    }

    for dir in &config.workspace.extra_ignore_dirs {
        if dir.trim_matches('/').is_empty() || dir.contains(['*', '?', '[', ']', '\\']) {
            bail!(
                "workspace.extra_ignore_dirs entry '{}' must be a plain directory name",
                dir
            );
        }
    }

    if config.scheduler.cooldown_ms == 0 {
        bail!("scheduler.cooldown_ms must be > 0");
    }

    if config.scoring.primary_extensions.is_empty() {
        bail!("scoring.primary_extensions must not be empty");
    }

    if config.scoring.max_file_bytes == 0 {
        bail!("scoring.max_file_bytes must be > 0");
    }

    let weights = [
        ("primary_weight", config.scoring.primary_weight),
        ("secondary_weight", config.scoring.secondary_weight),
        ("entry_point_weight", config.scoring.entry_point_weight),
        ("reference_weight", config.scoring.reference_weight),
        ("depth_penalty", config.scoring.depth_penalty),
        ("recency_max", config.scoring.recency_max),
    ];
    for (name, value) in weights {
        if !value.is_finite() || value < 0.0 {
            bail!("scoring.{} must be a finite, non-negative number", name);
        }
    }

    let budget = config.context.byte_budget();
    if budget <= config.context.preamble.len() {
        bail!(
            "context budget ({} bytes) must exceed the preamble length ({} bytes)",
            budget,
            config.context.preamble.len()
        );
    }

    if config.engine.timeout_secs == 0 {
        bail!("engine.timeout_secs must be > 0");
    }

    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => bail!(
            "Unknown log level: '{}'. Must be trace, debug, info, warn, or error.",
            other
        ),
    }

    Ok(())
}
