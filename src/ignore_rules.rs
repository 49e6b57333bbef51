//! Ignore rules with gitignore semantics.
//!
//! The rule set is built from three ordered sources:
//!
//! 1. Built-in entries that never belong in a prompt (`.git/`, caches, ...).
//! 2. The workspace ignore file (default `.gitignore`), line by line.
//! 3. Extra directory names from configuration (`EXTRA_IGNORE_DIRS`).
//!
//! Matching is last-match-wins, so a `!pattern` in the ignore file can
//! re-include something a built-in entry excluded. Paths are matched relative
//! to the workspace root together with all their parent directories.

use anyhow::{anyhow, Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};

use crate::models::Fingerprint;

const BUILTIN_PATTERNS: &[&str] = &[
    ".git/",
    "__pycache__/",
    "node_modules/",
    ".venv/",
    "*.pyc",
    "*.pyo",
    "*.swp",
    ".DS_Store",
];

pub struct IgnoreRuleSet {
    root: PathBuf,
    ignore_file: PathBuf,
    extra_dirs: Vec<String>,
    matcher: Gitignore,
    /// Fingerprint of the ignore file content the matcher was built from.
    source: Option<Fingerprint>,
}

impl IgnoreRuleSet {
    /// Build the rule set. A missing ignore file contributes no rules; an
    /// unparseable one is an error.
    pub fn load(root: &Path, ignore_file: &Path, extra_dirs: &[String]) -> Result<Self> {
        let content = read_ignore_file(ignore_file)?;
        let matcher = build_matcher(root, ignore_file, content.as_deref(), extra_dirs)?;
        Ok(Self {
            root: root.to_path_buf(),
            ignore_file: ignore_file.to_path_buf(),
            extra_dirs: extra_dirs.to_vec(),
            matcher,
            source: content.as_deref().map(|c| Fingerprint::of(c.as_bytes())),
        })
    }

    /// Re-read the ignore file. Returns `Ok(true)` when the rules changed.
    ///
    /// On a parse error the previous rules stay in effect.
    pub fn reload(&mut self) -> Result<bool> {
        let content = read_ignore_file(&self.ignore_file)?;
        let source = content.as_deref().map(|c| Fingerprint::of(c.as_bytes()));
        if source == self.source {
            return Ok(false);
        }
        self.matcher = build_matcher(
            &self.root,
            &self.ignore_file,
            content.as_deref(),
            &self.extra_dirs,
        )?;
        self.source = source;
        Ok(true)
    }

    /// Whether `relative` (to the workspace root) or any of its parents is ignored.
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        if relative.as_os_str().is_empty() || relative.is_absolute() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }

    pub fn is_ignore_file(&self, path: &Path) -> bool {
        path == self.ignore_file
    }

    pub fn ignore_file(&self) -> &Path {
        &self.ignore_file
    }

    /// Number of user-supplied rules (ignore file plus extra directories).
    pub fn len(&self) -> usize {
        self.matcher.num_ignores() as usize + self.matcher.num_whitelists() as usize
            - BUILTIN_PATTERNS.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read_ignore_file(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read ignore file: {}", path.display()))
        }
    }
}

fn build_matcher(
    root: &Path,
    ignore_file: &Path,
    content: Option<&str>,
    extra_dirs: &[String],
) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);

    for pattern in BUILTIN_PATTERNS {
        builder
            .add_line(None, pattern)
            .map_err(|e| anyhow!("invalid built-in ignore pattern '{}': {}", pattern, e))?;
    }

    if let Some(content) = content {
        for (lineno, line) in content.lines().enumerate() {
            builder
                .add_line(Some(ignore_file.to_path_buf()), line)
                .map_err(|e| {
                    anyhow!(
                        "{}:{}: invalid ignore pattern '{}': {}",
                        ignore_file.display(),
                        lineno + 1,
                        line,
                        e
                    )
                })?;
        }
    }

    for dir in extra_dirs {
        let name = dir.trim_matches('/');
        // a leading '!' or '#' is part of the name, not gitignore syntax
        let escape = if name.starts_with(['!', '#']) { "\\" } else { "" };
        let line = format!("{}{}/", escape, name);
        builder
            .add_line(None, &line)
            .map_err(|e| anyhow!("invalid extra ignore directory '{}': {}", dir, e))?;
    }

    builder
        .build()
        .with_context(|| format!("Failed to build ignore rules for {}", root.display()))
}
