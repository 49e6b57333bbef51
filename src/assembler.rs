//! Context document assembly.
//!
//! Renders the tiered index into one byte sequence:
//!
//! ~~~text
//! <preamble>
//! === File: src/main.rs ===
//! ```rust
//! <content>
//! ```
//!
//! === File: ... ===
//! ~~~
//!
//! The document is always the longest prefix of the ordered member list
//! (Core, Frequent, Recent) that fits the byte budget. Truncation therefore
//! happens only at file boundaries and drops Recent tail files first, and
//! identical inputs always produce identical bytes.

use serde::Serialize;

use crate::models::{Fingerprint, Tier, TrackedFile};

/// Rendered context, ready to hand to the inference engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextDocument {
    pub text: String,
    pub fingerprint: Fingerprint,
    /// Included paths in document order.
    pub files: Vec<String>,
}

impl ContextDocument {
    pub fn new(text: String, files: Vec<String>) -> Self {
        let fingerprint = Fingerprint::of(text.as_bytes());
        Self {
            text,
            fingerprint,
            files,
        }
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Reported when the budget cannot hold every Core file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetWarning {
    pub budget: usize,
    pub core_total: usize,
    pub core_included: usize,
}

impl std::fmt::Display for BudgetWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "context budget of {} bytes holds only {} of {} core files",
            self.budget, self.core_included, self.core_total
        )
    }
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub document: ContextDocument,
    /// Files that were tiered but did not fit, in document order.
    pub dropped: Vec<String>,
    pub warning: Option<BudgetWarning>,
}

/// Render one file block.
pub fn render_file(path: &str, language: &str, content: &str) -> String {
    let mut block = String::with_capacity(content.len() + path.len() + language.len() + 32);
    block.push_str("=== File: ");
    block.push_str(path);
    block.push_str(" ===\n```");
    block.push_str(language);
    block.push('\n');
    block.push_str(content);
    if !content.ends_with('\n') {
        block.push('\n');
    }
    block.push_str("```\n\n");
    block
}

/// Assemble `members` (already in document order) under `budget` bytes.
pub fn assemble<'a>(
    preamble: &str,
    members: impl IntoIterator<Item = (Tier, &'a TrackedFile)>,
    budget: usize,
) -> Assembly {
    let members: Vec<(Tier, &TrackedFile)> = members.into_iter().collect();
    let core_total = members.iter().filter(|(t, _)| *t == Tier::Core).count();

    let mut text = String::new();
    let mut files = Vec::new();
    let mut dropped = Vec::new();
    let mut full = preamble.len() > budget;

    if !full {
        text.push_str(preamble);
    }

    for (_, file) in &members {
        if full {
            dropped.push(file.path.clone());
            continue;
        }
        let block = render_file(
            &file.path,
            file.language,
            file.content.as_deref().unwrap_or_default(),
        );
        if text.len() + block.len() > budget {
            full = true;
            dropped.push(file.path.clone());
            continue;
        }
        text.push_str(&block);
        files.push(file.path.clone());
    }

    let core_included = members
        .iter()
        .filter(|(t, f)| *t == Tier::Core && files.contains(&f.path))
        .count();
    let warning = (core_included < core_total).then_some(BudgetWarning {
        budget,
        core_total,
        core_included,
    });

    Assembly {
        document: ContextDocument::new(text, files),
        dropped,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileSnapshot;
    use chrono::Utc;

    fn tracked(path: &str, body: &str) -> TrackedFile {
        TrackedFile::from_snapshot(FileSnapshot {
            path: path.to_string(),
            fingerprint: Fingerprint::of(body.as_bytes()),
            size_bytes: body.len() as u64,
            modified_at: Utc::now(),
            content: Some(body.to_string()),
        })
    }

    #[test]
    fn renders_header_fence_and_separator() {
        assert_eq!(
            render_file("main.py", "python", "print(1)"),
            "=== File: main.py ===\n```python\nprint(1)\n```\n\n"
        );
        assert_eq!(
            render_file("a.txt", "text", "line\n"),
            "=== File: a.txt ===\n```text\nline\n```\n\n"
        );
    }

    #[test]
    fn everything_fits() {
        let a = tracked("a.py", "aaa");
        let b = tracked("b.py", "bbb");
        let out = assemble("P\n", [(Tier::Core, &a), (Tier::Recent, &b)], 10_000);
        assert!(out.dropped.is_empty());
        assert!(out.warning.is_none());
        assert!(out.document.text.starts_with("P\n=== File: a.py"));
        assert_eq!(out.document.files, vec!["a.py", "b.py"]);
    }

    #[test]
    fn drops_tail_first_and_never_splits_files() {
        let core = tracked("core.py", &"c".repeat(100));
        let freq = tracked("freq.py", &"f".repeat(100));
        let recent = tracked("recent.py", &"r".repeat(100));
        let core_len = render_file("core.py", "python", &"c".repeat(100)).len();
        let freq_len = render_file("freq.py", "python", &"f".repeat(100)).len();
        let budget = core_len + freq_len + 50;

        let out = assemble(
            "",
            [
                (Tier::Core, &core),
                (Tier::Frequent, &freq),
                (Tier::Recent, &recent),
            ],
            budget,
        );
        assert_eq!(out.document.files, vec!["core.py", "freq.py"]);
        assert_eq!(out.dropped, vec!["recent.py"]);
        assert!(out.document.len() <= budget);
        assert!(out.warning.is_none());
        assert!(out.document.text.ends_with("```\n\n"));
    }

    #[test]
    fn later_small_file_does_not_jump_the_queue() {
        let big = tracked("big.py", &"x".repeat(500));
        let small = tracked("small.py", "y");
        let out = assemble("", [(Tier::Frequent, &big), (Tier::Recent, &small)], 100);
        assert!(out.document.files.is_empty());
        assert_eq!(out.dropped, vec!["big.py", "small.py"]);
    }

    #[test]
    fn oversized_core_is_reported() {
        let a = tracked("a.py", &"a".repeat(40));
        let b = tracked("b.py", &"b".repeat(400));
        let out = assemble("", [(Tier::Core, &a), (Tier::Core, &b)], 200);
        assert_eq!(out.document.files, vec!["a.py"]);
        assert_eq!(
            out.warning,
            Some(BudgetWarning {
                budget: 200,
                core_total: 2,
                core_included: 1
            })
        );
    }

    #[test]
    fn preamble_over_budget_yields_empty_document() {
        let a = tracked("a.py", "a");
        let out = assemble("a long preamble", [(Tier::Core, &a)], 4);
        assert!(out.document.is_empty());
        assert_eq!(out.dropped, vec!["a.py"]);
        assert!(out.warning.is_some());
    }

    #[test]
    fn identical_inputs_produce_identical_bytes() {
        let a = tracked("a.py", "alpha");
        let b = tracked("b.py", "beta");
        let one = assemble("P", [(Tier::Core, &a), (Tier::Frequent, &b)], 1000);
        let two = assemble("P", [(Tier::Core, &a), (Tier::Frequent, &b)], 1000);
        assert_eq!(one.document, two.document);
        assert_eq!(one.document.fingerprint, two.document.fingerprint);
    }
}
