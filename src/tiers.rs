//! Tiered index with stable in-tier ordering.
//!
//! # Algorithm
//!
//! 1. Rank every eligible file by score (descending), breaking ties by path
//!    (ascending).
//! 2. Assign the first `core` ranks to Core, the next `frequent` to Frequent,
//!    the next `recent` to Recent. Everything else is `Excluded`.
//! 3. Within each tier, members that were already in that tier keep their
//!    previous relative order. Members that just arrived (new files, or files
//!    promoted/demoted across a boundary) are appended at the tail in rank
//!    order.
//!
//! Step 3 keeps the rendered document's prefix intact while scores drift
//! inside a tier, which is what lets the inference engine reuse its prefix
//! cache.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::TierConfig;
use crate::models::{Tier, TrackedFile};

/// Tier transitions observed by one [`TieredIndex::rebalance`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TierChanges {
    /// Files that entered a rendered tier or moved between tiers.
    pub moved: Vec<(String, Tier)>,
    /// Files that left every rendered tier.
    pub evicted: Vec<String>,
}

impl TierChanges {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.evicted.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TieredIndex {
    capacities: TierConfig,
    core: Vec<String>,
    frequent: Vec<String>,
    recent: Vec<String>,
}

impl TieredIndex {
    pub fn new(capacities: TierConfig) -> Self {
        Self {
            capacities,
            core: Vec::new(),
            frequent: Vec::new(),
            recent: Vec::new(),
        }
    }

    pub fn capacity(&self, tier: Tier) -> usize {
        match tier {
            Tier::Core => self.capacities.core,
            Tier::Frequent => self.capacities.frequent,
            Tier::Recent => self.capacities.recent,
            Tier::Excluded => 0,
        }
    }

    pub fn members(&self, tier: Tier) -> &[String] {
        match tier {
            Tier::Core => &self.core,
            Tier::Frequent => &self.frequent,
            Tier::Recent => &self.recent,
            Tier::Excluded => &[],
        }
    }

    fn members_mut(&mut self, tier: Tier) -> &mut Vec<String> {
        match tier {
            Tier::Core => &mut self.core,
            Tier::Frequent => &mut self.frequent,
            Tier::Recent => &mut self.recent,
            Tier::Excluded => unreachable!("excluded tier has no member list"),
        }
    }

    /// Rendered members in document order: Core, then Frequent, then Recent.
    pub fn ordered(&self) -> impl Iterator<Item = (Tier, &str)> {
        Tier::RENDERED
            .into_iter()
            .flat_map(move |tier| self.members(tier).iter().map(move |p| (tier, p.as_str())))
    }

    pub fn len(&self) -> usize {
        self.core.len() + self.frequent.len() + self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-partition `files` by their current scores and write each file's tier.
    pub fn rebalance(&mut self, files: &mut BTreeMap<String, TrackedFile>) -> TierChanges {
        let mut ranked: Vec<&TrackedFile> = files.values().filter(|f| f.is_eligible()).collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));

        let core_end = self.capacities.core;
        let frequent_end = core_end.saturating_add(self.capacities.frequent);
        let recent_end = frequent_end.saturating_add(self.capacities.recent);

        let mut assigned: HashMap<String, Tier> = HashMap::with_capacity(ranked.len());
        let mut by_rank: [Vec<String>; 3] = Default::default();
        for (rank, file) in ranked.iter().enumerate() {
            let (tier, slot) = if rank < core_end {
                (Tier::Core, 0)
            } else if rank < frequent_end {
                (Tier::Frequent, 1)
            } else if rank < recent_end {
                (Tier::Recent, 2)
            } else {
                break;
            };
            assigned.insert(file.path.clone(), tier);
            by_rank[slot].push(file.path.clone());
        }

        let previous: HashMap<String, Tier> = self
            .ordered()
            .map(|(tier, path)| (path.to_string(), tier))
            .collect();

        let mut changes = TierChanges::default();
        for (slot, tier) in Tier::RENDERED.into_iter().enumerate() {
            let kept: Vec<String> = self
                .members(tier)
                .iter()
                .filter(|p| assigned.get(p.as_str()) == Some(&tier))
                .cloned()
                .collect();
            let kept_set: HashSet<&str> = kept.iter().map(String::as_str).collect();

            let mut next = kept.clone();
            for path in &by_rank[slot] {
                if !kept_set.contains(path.as_str()) {
                    changes.moved.push((path.clone(), tier));
                    next.push(path.clone());
                }
            }
            *self.members_mut(tier) = next;
        }

        for path in previous.keys() {
            if !assigned.contains_key(path) {
                changes.evicted.push(path.clone());
            }
        }
        changes.evicted.sort();

        for file in files.values_mut() {
            file.tier = assigned.get(&file.path).copied().unwrap_or(Tier::Excluded);
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileSnapshot, Fingerprint};
    use chrono::Utc;

    fn tracked(path: &str, score: f64) -> TrackedFile {
        let mut f = TrackedFile::from_snapshot(FileSnapshot {
            path: path.to_string(),
            fingerprint: Fingerprint::of(path.as_bytes()),
            size_bytes: 1,
            modified_at: Utc::now(),
            content: Some(String::new()),
        });
        f.score = score;
        f
    }

    fn files(entries: &[(&str, f64)]) -> BTreeMap<String, TrackedFile> {
        entries
            .iter()
            .map(|(p, s)| (p.to_string(), tracked(p, *s)))
            .collect()
    }

    fn caps(core: usize, frequent: usize, recent: usize) -> TierConfig {
        TierConfig {
            core,
            frequent,
            recent,
        }
    }

    #[test]
    fn initial_partition_by_rank() {
        let mut index = TieredIndex::new(caps(1, 1, 1));
        let mut f = files(&[("a", 5.0), ("b", 9.0), ("c", 7.0), ("d", 1.0)]);
        index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Core), ["b"]);
        assert_eq!(index.members(Tier::Frequent), ["c"]);
        assert_eq!(index.members(Tier::Recent), ["a"]);
        assert_eq!(f["d"].tier, Tier::Excluded);
        assert_eq!(f["b"].tier, Tier::Core);
    }

    #[test]
    fn ties_break_by_path() {
        let mut index = TieredIndex::new(caps(2, 0, 0));
        let mut f = files(&[("z.py", 3.0), ("a.py", 3.0), ("m.py", 3.0)]);
        index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Core), ["a.py", "m.py"]);
    }

    #[test]
    fn ineligible_files_never_enter_a_tier() {
        let mut index = TieredIndex::new(caps(5, 5, 5));
        let mut f = files(&[("a", 1.0), ("img.png", f64::NEG_INFINITY)]);
        index.rebalance(&mut f);
        assert_eq!(index.len(), 1);
        assert_eq!(f["img.png"].tier, Tier::Excluded);
    }

    #[test]
    fn newcomer_displaces_lowest_core_member() {
        let mut index = TieredIndex::new(caps(2, 2, 0));
        let mut f = files(&[("a", 20.0), ("b", 18.0)]);
        index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Core), ["a", "b"]);

        f.insert("c".to_string(), tracked("c", 25.0));
        let changes = index.rebalance(&mut f);

        assert_eq!(index.members(Tier::Core), ["a", "c"]);
        assert_eq!(index.members(Tier::Frequent), ["b"]);
        assert_eq!(f["b"].tier, Tier::Frequent);
        assert!(changes.moved.contains(&("c".to_string(), Tier::Core)));
        assert!(changes.moved.contains(&("b".to_string(), Tier::Frequent)));
    }

    #[test]
    fn score_drift_inside_a_tier_keeps_order() {
        let mut index = TieredIndex::new(caps(3, 0, 0));
        let mut f = files(&[("a", 10.0), ("b", 9.0), ("c", 8.0)]);
        index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Core), ["a", "b", "c"]);

        f.get_mut("c").unwrap().score = 50.0;
        let changes = index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Core), ["a", "b", "c"]);
        assert!(changes.is_empty());
    }

    #[test]
    fn deleted_core_member_promotes_best_frequent() {
        let mut index = TieredIndex::new(caps(2, 2, 0));
        let mut f = files(&[("a", 10.0), ("b", 9.0), ("c", 8.0), ("d", 7.0)]);
        index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Frequent), ["c", "d"]);

        f.remove("a");
        let changes = index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Core), ["b", "c"]);
        assert_eq!(index.members(Tier::Frequent), ["d"]);
        assert_eq!(changes.evicted, vec!["a".to_string()]);
    }

    #[test]
    fn capacities_are_never_exceeded() {
        let mut index = TieredIndex::new(caps(2, 3, 4));
        let entries: Vec<(String, f64)> = (0..20).map(|i| (format!("f{:02}", i), i as f64)).collect();
        let mut f: BTreeMap<String, TrackedFile> = entries
            .iter()
            .map(|(p, s)| (p.clone(), tracked(p, *s)))
            .collect();
        for round in 0..5 {
            for (i, file) in f.values_mut().enumerate() {
                file.score = ((i * 7 + round * 3) % 20) as f64;
            }
            index.rebalance(&mut f);
            assert!(index.members(Tier::Core).len() <= 2);
            assert!(index.members(Tier::Frequent).len() <= 3);
            assert!(index.members(Tier::Recent).len() <= 4);
        }
    }

    #[test]
    fn fewer_files_than_capacity() {
        let mut index = TieredIndex::new(caps(2, 2, 2));
        let mut f = files(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Core).len(), 2);
        assert_eq!(index.members(Tier::Frequent), ["a"]);
        assert!(index.members(Tier::Recent).is_empty());
        let ordered: Vec<_> = index.ordered().map(|(_, p)| p).collect();
        assert_eq!(ordered, ["c", "b", "a"]);
    }

    #[test]
    fn huge_capacities_saturate() {
        let mut index = TieredIndex::new(caps(usize::MAX, usize::MAX, usize::MAX));
        let mut empty = BTreeMap::new();
        index.rebalance(&mut empty);
        assert!(index.is_empty());

        let mut f = files(&[("a", 1.0), ("b", 2.0)]);
        index.rebalance(&mut f);
        assert_eq!(index.members(Tier::Core), ["b", "a"]);
    }
}
