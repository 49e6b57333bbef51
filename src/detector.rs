//! File change detection.
//!
//! The [`Detector`] turns raw filesystem paths (from `notify` or from the
//! startup walk) into [`FileEvent`]s. It owns the last known fingerprint of
//! every tracked file and only reports a change when the content hash
//! actually differs, so editor saves and `touch` without edits are silent.
//!
//! Failures are never propagated per path: a file that disappears between the
//! notification and the read degrades to [`FileEvent::Removed`].

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::ignore_rules::IgnoreRuleSet;
use crate::models::{FileEvent, FileSnapshot, Fingerprint};

pub struct Detector {
    root: PathBuf,
    rules: IgnoreRuleSet,
    known: BTreeMap<String, Fingerprint>,
    follow_symlinks: bool,
    max_file_bytes: u64,
}

impl Detector {
    /// Create a detector for the configured workspace. The root must exist
    /// and be a directory; the ignore file must parse.
    pub fn from_config(config: &Config) -> Result<Self> {
        let ws = &config.workspace;
        if !ws.root.is_dir() {
            bail!(
                "Workspace root does not exist or is not a directory: {}",
                ws.root.display()
            );
        }
        let root = ws
            .root
            .canonicalize()
            .with_context(|| format!("Failed to resolve workspace root: {}", ws.root.display()))?;

        let ignore_file = if ws.ignore_file.is_absolute() {
            ws.ignore_file.clone()
        } else {
            root.join(&ws.ignore_file)
        };
        let rules = IgnoreRuleSet::load(&root, &ignore_file, &ws.extra_ignore_dirs)?;
        if rules.is_empty() {
            info!(path = %ignore_file.display(), "no ignore rules loaded");
        } else {
            info!(path = %ignore_file.display(), rules = rules.len(), "loaded ignore rules");
        }

        Ok(Self::new(
            root,
            rules,
            ws.follow_symlinks,
            config.scoring.max_file_bytes,
        ))
    }

    /// `root` must already be canonical.
    pub fn new(root: PathBuf, rules: IgnoreRuleSet, follow_symlinks: bool, max_file_bytes: u64) -> Self {
        Self {
            root,
            rules,
            known: BTreeMap::new(),
            follow_symlinks,
            max_file_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tracked(&self) -> usize {
        self.known.len()
    }

    /// Walk the whole workspace. Returns `Added` for every new file and
    /// `Changed` for known files whose content differs.
    pub fn scan(&mut self) -> Vec<FileEvent> {
        let root = self.root.clone();
        self.scan_dir(&root)
    }

    /// Process one notification path.
    pub fn observe(&mut self, path: &Path) -> Vec<FileEvent> {
        if self.rules.is_ignore_file(path) {
            return self.reload_rules();
        }

        let Some(relative) = self.relative(path) else {
            return Vec::new();
        };

        let metadata = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(_) => return self.forget_under(&relative),
        };

        if self.escapes_root(path) {
            return self.forget_under(&relative);
        }

        let is_dir = if metadata.file_type().is_symlink() {
            match self.resolve_symlink(path) {
                Some(target_is_dir) => target_is_dir,
                None => return self.forget_under(&relative),
            }
        } else {
            metadata.is_dir()
        };

        if self.rules.is_ignored(Path::new(&relative), is_dir) {
            return self.forget_under(&relative);
        }

        if is_dir {
            // A new or renamed-in directory; known directories are covered by
            // per-file notifications.
            if self.has_files_under(&relative) {
                return Vec::new();
            }
            return self.scan_dir(path);
        }

        self.observe_file(path, relative)
    }

    fn observe_file(&mut self, path: &Path, relative: String) -> Vec<FileEvent> {
        let snapshot = match self.read_snapshot(path, &relative) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(path = %relative, error = %e, "unreadable file");
                return self.forget(&relative).into_iter().collect();
            }
        };

        match self.known.get(&relative) {
            Some(previous) if *previous == snapshot.fingerprint => Vec::new(),
            Some(_) => {
                self.known.insert(relative, snapshot.fingerprint.clone());
                vec![FileEvent::Changed(snapshot)]
            }
            None => {
                self.known.insert(relative, snapshot.fingerprint.clone());
                vec![FileEvent::Added(snapshot)]
            }
        }
    }

    fn scan_dir(&mut self, dir: &Path) -> Vec<FileEvent> {
        let mut events = Vec::new();
        let root = self.root.clone();

        let walker = WalkDir::new(dir)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    return false;
                };
                if entry.path_is_symlink() && self.resolve_symlink(entry.path()).is_none() {
                    return false;
                }
                !self
                    .rules
                    .is_ignored(relative, entry.file_type().is_dir())
            });

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => {
                    // symlink loops and races with deletion land here
                    debug!(error = %e, "skipping entry during scan");
                }
            }
        }

        for path in files {
            if self.rules.is_ignore_file(&path) {
                continue;
            }
            if let Some(relative) = self.relative(&path) {
                if self.follow_symlinks && path.is_symlink() && self.resolve_symlink(&path).is_none() {
                    continue;
                }
                events.extend(self.observe_file(&path, relative));
            }
        }
        events
    }

    /// Re-read the ignore file and reconcile tracked files against the new rules.
    fn reload_rules(&mut self) -> Vec<FileEvent> {
        match self.rules.reload() {
            Ok(false) => Vec::new(),
            Ok(true) => {
                info!(path = %self.rules.ignore_file().display(), "ignore rules changed");
                let now_ignored: Vec<String> = self
                    .known
                    .keys()
                    .filter(|p| self.rules.is_ignored(Path::new(p.as_str()), false))
                    .cloned()
                    .collect();
                let mut events: Vec<FileEvent> = now_ignored
                    .into_iter()
                    .filter_map(|p| self.forget(&p))
                    .collect();
                events.extend(self.scan());
                events
            }
            Err(e) => {
                warn!(error = %e, "keeping previous ignore rules");
                Vec::new()
            }
        }
    }

    fn read_snapshot(&self, path: &Path, relative: &str) -> std::io::Result<FileSnapshot> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        let modified_at: DateTime<Utc> = metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            .into();
        let size_bytes = metadata.len();

        // Oversized files are never rendered; track them by size alone.
        if size_bytes > self.max_file_bytes {
            return Ok(FileSnapshot {
                path: relative.to_string(),
                fingerprint: Fingerprint::of(format!("size:{}", size_bytes).as_bytes()),
                size_bytes,
                modified_at,
                content: None,
            });
        }

        let bytes = std::fs::read(path)?;
        let fingerprint = Fingerprint::of(&bytes);
        let content = if bytes.contains(&0) {
            None
        } else {
            String::from_utf8(bytes).ok()
        };

        Ok(FileSnapshot {
            path: relative.to_string(),
            fingerprint,
            size_bytes,
            modified_at,
            content,
        })
    }

    /// For a symlink, `Some(is_dir)` of its target when the target is inside
    /// the workspace and is not an ancestor of the link; `None` otherwise.
    fn resolve_symlink(&self, path: &Path) -> Option<bool> {
        if !self.follow_symlinks {
            return None;
        }
        let target = path.canonicalize().ok()?;
        if !target.starts_with(&self.root) {
            return None;
        }
        if target.is_dir() && path.starts_with(&target) {
            debug!(path = %path.display(), "skipping symlink cycle");
            return None;
        }
        Some(target.is_dir())
    }

    /// Whether `path` resolves, through a symlinked ancestor, to a location
    /// outside the workspace.
    fn escapes_root(&self, path: &Path) -> bool {
        path.canonicalize().is_ok_and(|real| !real.starts_with(&self.root))
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<_>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    fn forget(&mut self, relative: &str) -> Option<FileEvent> {
        self.known
            .remove(relative)
            .map(|_| FileEvent::Removed(relative.to_string()))
    }

    /// Forget `relative` and, if it was a directory, every file below it.
    fn forget_under(&mut self, relative: &str) -> Vec<FileEvent> {
        let prefix = format!("{}/", relative);
        let mut doomed: Vec<String> = self
            .known
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .map(|(p, _)| p.clone())
            .collect();
        if self.known.contains_key(relative) {
            doomed.push(relative.to_string());
        }
        doomed.into_iter().filter_map(|p| self.forget(&p)).collect()
    }

    fn has_files_under(&self, relative: &str) -> bool {
        let prefix = format!("{}/", relative);
        self.known
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(p, _)| p.starts_with(&prefix))
    }
}
