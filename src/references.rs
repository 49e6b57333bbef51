//! Lightweight import/include scanner.
//!
//! Extracts the module names a file refers to, without parsing. The scorer
//! only needs a rough inbound-reference count per file, so a handful of
//! line-anchored patterns covering the common languages is enough:
//!
//! | Language | Statement |
//! |----------|-----------|
//! | Python / Java | `import a.b`, `from a.b import c` |
//! | Rust | `use a::b`, `mod a;` |
//! | C / C++ | `#include "a/b.h"` |
//! | JS / TS | `import x from "./a"`, `import "./a"`, `require("./a")` |
//! | Go | `import "a/b"` |
//!
//! Names are lowercased and matched against file stems (see [`module_names`]).

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(?:static\s+)?([\w.]+(?:\s*,\s*[\w.]+)*)").unwrap());
static PY_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+([\w.]+)\s+import\s+\(?([\w\s,]+)").unwrap());
static RS_USE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:pub(?:\([\w\s]+\))?\s+)?use\s+([\w:]+)").unwrap());
static RS_MOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:pub(?:\([\w\s]+\))?\s+)?mod\s+(\w+)\s*;").unwrap());
static C_INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*#\s*include\s*"([^"]+)""#).unwrap());
static JS_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:import|export)\b[^'"]*\bfrom\s*['"]([^'"]+)['"]"#).unwrap());
static JS_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*import\s*['"]([^'"]+)['"]"#).unwrap());
static JS_REQUIRE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static GO_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*import\s+(?:\w+\s+)?"([^"]+)""#).unwrap());

/// Path-like keywords that never name a file.
const SKIP: &[&str] = &["crate", "self", "super", "std", "core", "alloc"];

/// Stems that stand for their parent directory (`pkg/__init__.py` is `pkg`).
const PACKAGE_STEMS: &[&str] = &["__init__", "index", "mod", "lib", "main"];

/// Module names referenced by `content`.
pub fn referenced_names(content: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();

    for line in content.lines() {
        if let Some(caps) = PY_FROM.captures(line) {
            push_dotted(&mut names, &caps[1]);
            for item in caps[2].split(',') {
                if let Some(word) = item.split_whitespace().next() {
                    push_name(&mut names, word);
                }
            }
        } else if let Some(caps) = RS_USE.captures(line) {
            for segment in caps[1].split("::") {
                push_name(&mut names, segment);
            }
        } else if let Some(caps) = RS_MOD.captures(line) {
            push_name(&mut names, &caps[1]);
        } else if let Some(caps) = C_INCLUDE.captures(line) {
            push_path(&mut names, &caps[1]);
        } else if let Some(caps) = JS_FROM.captures(line).or_else(|| JS_BARE.captures(line)) {
            push_path(&mut names, &caps[1]);
        } else if let Some(caps) = GO_IMPORT.captures(line) {
            push_path(&mut names, &caps[1]);
        } else if let Some(caps) = PY_IMPORT.captures(line) {
            for module in caps[1].split(',') {
                push_dotted(&mut names, module.trim());
            }
        }

        for caps in JS_REQUIRE.captures_iter(line) {
            push_path(&mut names, &caps[1]);
        }
    }

    names
}

/// Names under which other files may refer to `path`.
///
/// Always the lowercased file stem; for package-style stems such as
/// `__init__` or `index`, also the parent directory name.
pub fn module_names(path: &str) -> Vec<String> {
    let mut parts = path.rsplit('/');
    let file = parts.next().unwrap_or(path);
    let stem = file.split('.').next().unwrap_or(file).to_ascii_lowercase();

    let mut names = Vec::with_capacity(2);
    if PACKAGE_STEMS.contains(&stem.as_str()) {
        if let Some(parent) = parts.next() {
            names.push(parent.to_ascii_lowercase());
        }
    }
    if !stem.is_empty() {
        names.push(stem);
    }
    names
}

/// Count, for every path in `paths`, how many *other* files reference it.
///
/// `outbound` maps a file path to the names it references (as returned by
/// [`referenced_names`]). Each referencing file counts at most once per target.
pub fn count_inbound<'a>(
    paths: impl IntoIterator<Item = &'a str>,
    outbound: &BTreeMap<String, BTreeSet<String>>,
) -> HashMap<String, usize> {
    let mut by_name: HashMap<String, Vec<&'a str>> = HashMap::new();
    for path in paths {
        for name in module_names(path) {
            by_name.entry(name).or_default().push(path);
        }
    }

    let mut inbound: HashMap<String, usize> = HashMap::new();
    for (source, names) in outbound {
        let mut targets: BTreeSet<&str> = BTreeSet::new();
        for name in names {
            if let Some(candidates) = by_name.get(name) {
                targets.extend(candidates.iter().copied().filter(|t| *t != source));
            }
        }
        for target in targets {
            *inbound.entry(target.to_string()).or_insert(0) += 1;
        }
    }
    inbound
}

fn push_name(names: &mut BTreeSet<String>, word: &str) {
    let word = word.trim();
    if word.is_empty() || word == "*" || SKIP.contains(&word) {
        return;
    }
    if word.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        names.insert(word.to_ascii_lowercase());
    }
}

fn push_dotted(names: &mut BTreeSet<String>, module: &str) {
    for segment in module.split('.') {
        push_name(names, segment);
    }
}

fn push_path(names: &mut BTreeSet<String>, specifier: &str) {
    let last = specifier.trim_end_matches('/').rsplit('/').next().unwrap_or(specifier);
    let stem = last.split('.').next().unwrap_or(last);
    push_name(names, stem);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(content: &str) -> Vec<String> {
        referenced_names(content).into_iter().collect()
    }

    #[test]
    fn python_imports() {
        let found = names("import os, sys\nfrom app.utils import helper, other\n  import config\n");
        for expected in ["os", "sys", "app", "utils", "helper", "other", "config"] {
            assert!(found.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn rust_use_and_mod() {
        let found = names("use crate::scorer::Scorer;\npub mod tiers;\npub(crate) use super::models;\n");
        assert!(found.contains(&"scorer".to_string()));
        assert!(found.contains(&"tiers".to_string()));
        assert!(found.contains(&"models".to_string()));
        assert!(!found.contains(&"crate".to_string()));
        assert!(!found.contains(&"super".to_string()));
    }

    #[test]
    fn c_js_and_go() {
        let found = names(
            "#include \"net/socket.h\"\n#include <stdio.h>\nimport React from 'react';\nimport './styles.css';\nconst x = require(\"../lib/db.js\");\nimport \"github.com/x/y/store\"\n",
        );
        for expected in ["socket", "react", "styles", "db", "store"] {
            assert!(found.contains(&expected.to_string()), "missing {}", expected);
        }
        assert!(!found.contains(&"stdio".to_string()));
    }

    #[test]
    fn plain_text_has_no_references() {
        assert!(names("This module is important.\nWe import nothing here, really").is_empty());
    }

    #[test]
    fn package_stems_map_to_parent() {
        assert_eq!(module_names("pkg/__init__.py"), vec!["pkg", "__init__"]);
        assert_eq!(module_names("src/Utils.ts"), vec!["utils"]);
        assert_eq!(module_names("main.py"), vec!["main"]);
    }

    #[test]
    fn inbound_counts_each_source_once() {
        let mut outbound = BTreeMap::new();
        outbound.insert(
            "main.py".to_string(),
            referenced_names("from utils import a\nimport utils\n"),
        );
        outbound.insert("app.py".to_string(), referenced_names("import utils\n"));
        outbound.insert("utils.py".to_string(), referenced_names("import utils\n"));

        let paths = ["main.py", "app.py", "utils.py"];
        let inbound = count_inbound(paths.iter().copied(), &outbound);
        assert_eq!(inbound.get("utils.py"), Some(&2));
        assert_eq!(inbound.get("main.py"), None);
    }
}
