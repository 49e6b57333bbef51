//! Core data models used throughout the context cache.
//!
//! These types represent the tracked files, the change events that flow from
//! the detector to the scheduler, and the tiers that order files inside the
//! assembled context document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Hex-encoded SHA-256 digest of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Priority bucket controlling inclusion and position in the context document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Core,
    Frequent,
    Recent,
    /// Tracked but not rendered: ineligible, or ranked past total capacity.
    Excluded,
}

impl Tier {
    /// Rendered tiers in document order.
    pub const RENDERED: [Tier; 3] = [Tier::Core, Tier::Frequent, Tier::Recent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Core => "core",
            Tier::Frequent => "frequent",
            Tier::Recent => "recent",
            Tier::Excluded => "excluded",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content and metadata captured by the detector when a file is read.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSnapshot {
    /// Workspace-relative path with `/` separators.
    pub path: String,
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    /// File body. `None` when the file is not valid UTF-8 text.
    pub content: Option<String>,
}

/// Change notification emitted by the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum FileEvent {
    Added(FileSnapshot),
    Changed(FileSnapshot),
    Removed(String),
}

impl FileEvent {
    pub fn path(&self) -> &str {
        match self {
            FileEvent::Added(s) | FileEvent::Changed(s) => &s.path,
            FileEvent::Removed(p) => p,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FileEvent::Added(_) => "added",
            FileEvent::Changed(_) => "changed",
            FileEvent::Removed(_) => "removed",
        }
    }
}

/// A file known to the index.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub path: String,
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    pub last_modified_at: DateTime<Utc>,
    pub content: Option<String>,
    /// Fence language used when rendering (empty when unknown).
    pub language: &'static str,
    pub score: f64,
    pub tier: Tier,
}

impl TrackedFile {
    pub fn from_snapshot(snapshot: FileSnapshot) -> Self {
        let language = language_for(&snapshot.path);
        Self {
            path: snapshot.path,
            fingerprint: snapshot.fingerprint,
            size_bytes: snapshot.size_bytes,
            last_modified_at: snapshot.modified_at,
            content: snapshot.content,
            language,
            score: 0.0,
            tier: Tier::Excluded,
        }
    }

    /// Replace content-derived fields, keeping score and tier until the next rescore.
    pub fn update(&mut self, snapshot: FileSnapshot) {
        self.fingerprint = snapshot.fingerprint;
        self.size_bytes = snapshot.size_bytes;
        self.last_modified_at = snapshot.modified_at;
        self.content = snapshot.content;
    }

    /// `true` unless the scorer marked the file as ineligible.
    pub fn is_eligible(&self) -> bool {
        self.score.is_finite()
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lowercased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }
}

pub(crate) fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        // dotfiles such as `.env` have no extension
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Markdown fence language for a path, by extension or well-known file name.
pub fn language_for(path: &str) -> &'static str {
    if let Some(ext) = extension_of(path) {
        let lang = match ext.as_str() {
            "py" => "python",
            "js" | "mjs" | "cjs" => "javascript",
            "jsx" => "jsx",
            "ts" => "typescript",
            "tsx" => "tsx",
            "go" => "go",
            "rs" => "rust",
            "java" => "java",
            "c" | "h" => "c",
            "cpp" | "cc" | "hpp" => "cpp",
            "cs" => "csharp",
            "rb" => "ruby",
            "php" => "php",
            "swift" => "swift",
            "kt" => "kotlin",
            "scala" => "scala",
            "r" => "r",
            "m" => "objc",
            "sh" | "bash" => "bash",
            "yml" | "yaml" => "yaml",
            "json" => "json",
            "xml" => "xml",
            "md" => "markdown",
            "rst" => "rst",
            "txt" => "text",
            "toml" => "toml",
            "ini" | "cfg" => "ini",
            "conf" => "conf",
            "sql" => "sql",
            "mk" => "makefile",
            _ => "",
        };
        if !lang.is_empty() {
            return lang;
        }
    }
    let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
    match name.as_str() {
        "dockerfile" => "dockerfile",
        "makefile" => "makefile",
        "caddyfile" => "caddyfile",
        _ => "",
    }
}
