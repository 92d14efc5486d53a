//! Deduplication and clustering: exact-match collapse, then single-link
//! semantic clustering over an injectable similarity measure.
//!
//! Deterministic by construction: all grouping walks input order, never
//! HashMap iteration order.

use std::collections::HashMap;

use reviewpulse_common::types::{CanonicalItem, ItemKey, ReviewItem};

/// Pairwise text similarity. Implementations must be symmetric and
/// range-normalized to [0, 1]; the engine assumes nothing else.
pub trait Similarity: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Default similarity: Jaccard overlap over lowercased alphanumeric tokens.
pub struct TokenOverlap;

impl Similarity for TokenOverlap {
    fn score(&self, a: &str, b: &str) -> f64 {
        let ta = tokens(a);
        let tb = tokens(b);
        if ta.is_empty() && tb.is_empty() {
            return 1.0;
        }
        if ta.is_empty() || tb.is_empty() {
            return 0.0;
        }
        let intersection = ta.iter().filter(|t| tb.contains(*t)).count();
        let union = ta.len() + tb.len() - intersection;
        intersection as f64 / union as f64
    }
}

fn tokens(text: &str) -> std::collections::BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Case-folded, whitespace-collapsed text used by the exact pass.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// Union-find over item indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Attach the higher root to the lower so the representative index
            // is stable regardless of union order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

pub struct DedupEngine {
    threshold: f64,
}

impl DedupEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Merge near-duplicates into canonical items. Every input item lands in
    /// exactly one output cluster.
    pub fn dedup(&self, items: &[ReviewItem], sim: &dyn Similarity) -> Vec<CanonicalItem> {
        if items.is_empty() {
            return Vec::new();
        }

        let mut sets = DisjointSet::new(items.len());

        // Pass 1: exact matches, identical normalized text or identical
        // (source, source_key).
        let mut by_text: HashMap<String, usize> = HashMap::new();
        let mut by_key: HashMap<ItemKey, usize> = HashMap::new();
        for (idx, item) in items.iter().enumerate() {
            let norm = normalize_text(&item.text);
            match by_text.get(&norm) {
                Some(&first) => sets.union(first, idx),
                None => {
                    by_text.insert(norm, idx);
                }
            }
            let key = item.identity();
            match by_key.get(&key) {
                Some(&first) => sets.union(first, idx),
                None => {
                    by_key.insert(key, idx);
                }
            }
        }

        // Pass 2: single-link semantic clustering between the groups that
        // survived the exact pass. Each group is represented by its
        // lowest-index member; transitive closure of the threshold relation.
        let mut group_reps: Vec<usize> = Vec::new();
        for idx in 0..items.len() {
            if sets.find(idx) == idx {
                group_reps.push(idx);
            }
        }
        for i in 0..group_reps.len() {
            for j in (i + 1)..group_reps.len() {
                let a = group_reps[i];
                let b = group_reps[j];
                if sim.score(&items[a].text, &items[b].text) >= self.threshold {
                    sets.union(a, b);
                }
            }
        }

        // Collect final clusters in input order of their lowest member.
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        let mut cluster_of_root: HashMap<usize, usize> = HashMap::new();
        for idx in 0..items.len() {
            let root = sets.find(idx);
            match cluster_of_root.get(&root) {
                Some(&c) => clusters[c].push(idx),
                None => {
                    cluster_of_root.insert(root, clusters.len());
                    clusters.push(vec![idx]);
                }
            }
        }

        clusters
            .into_iter()
            .map(|member_idxs| self.build_canonical(items, &member_idxs, sim))
            .collect()
    }

    fn build_canonical(
        &self,
        items: &[ReviewItem],
        member_idxs: &[usize],
        sim: &dyn Similarity,
    ) -> CanonicalItem {
        // Representative: longest text, ties by earliest timestamp (missing
        // timestamps last), then lowest input index.
        let rep_idx = *member_idxs
            .iter()
            .min_by(|&&a, &&b| {
                let ia = &items[a];
                let ib = &items[b];
                ib.text
                    .chars()
                    .count()
                    .cmp(&ia.text.chars().count())
                    .then_with(|| match (ia.posted_at, ib.posted_at) {
                        (Some(x), Some(y)) => x.cmp(&y),
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    })
                    .then(a.cmp(&b))
            })
            .expect("cluster is never empty");
        let rep = &items[rep_idx];

        let engagement = member_idxs.iter().map(|&i| items[i].engagement).sum();
        let first_seen = member_idxs.iter().filter_map(|&i| items[i].posted_at).min();

        // Representative identity first, remaining members in input order.
        let mut members = vec![rep.identity()];
        members.extend(
            member_idxs
                .iter()
                .filter(|&&i| i != rep_idx)
                .map(|&i| items[i].identity()),
        );

        let cluster_confidence = if member_idxs.len() < 2 {
            1.0
        } else {
            let mut sum = 0.0;
            let mut pairs = 0u32;
            for (pos, &a) in member_idxs.iter().enumerate() {
                for &b in &member_idxs[pos + 1..] {
                    sum += sim.score(&items[a].text, &items[b].text);
                    pairs += 1;
                }
            }
            sum / pairs as f64
        };

        CanonicalItem {
            text: rep.text.clone(),
            source: rep.source,
            engagement,
            members,
            cluster_confidence,
            first_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use reviewpulse_common::types::SourceId;
    use std::collections::HashSet;

    fn item(source: SourceId, key: &str, text: &str, engagement: u32) -> ReviewItem {
        ReviewItem {
            source,
            source_key: key.to_string(),
            text: text.to_string(),
            posted_at: None,
            engagement,
            author: None,
            platform: source.to_string(),
        }
    }

    fn engine() -> DedupEngine {
        DedupEngine::new(0.85)
    }

    #[test]
    fn every_item_in_exactly_one_cluster() {
        let items = vec![
            item(SourceId::Reddit, "a", "The sync keeps failing on large files", 3),
            item(SourceId::Reddit, "b", "the sync keeps   failing on large FILES", 2),
            item(SourceId::HackerNews, "c", "Pricing doubled overnight with no notice", 10),
            item(SourceId::WebSearch, "d", "completely unrelated praise for the editor", 0),
        ];
        let clusters = engine().dedup(&items, &TokenOverlap);

        let mut seen: HashSet<(SourceId, String)> = HashSet::new();
        let mut total = 0usize;
        for cluster in &clusters {
            for member in &cluster.members {
                assert!(
                    seen.insert((member.source, member.source_key.clone())),
                    "item appears in two clusters: {member:?}"
                );
                total += 1;
            }
        }
        assert_eq!(total, items.len());
    }

    #[test]
    fn exact_text_duplicates_collapse_with_summed_engagement() {
        // 10 items across 3 unique texts: 4x text one, 4x text two, 2x text
        // three (one of those differing only in case and spacing).
        let mut items = Vec::new();
        for i in 0..4 {
            items.push(item(
                SourceId::Reddit,
                &format!("a{i}"),
                "App crashes every time I open a big project",
                2,
            ));
        }
        for i in 0..4 {
            items.push(item(
                SourceId::HackerNews,
                &format!("b{i}"),
                "Support never answers billing tickets",
                3,
            ));
        }
        items.push(item(SourceId::WebSearch, "c0", "zzz unique grumble", 1));
        items.push(item(SourceId::WebSearch, "c1", "ZZZ  unique   grumble", 5));

        let clusters = engine().dedup(&items, &TokenOverlap);
        assert_eq!(clusters.len(), 3);

        let crash = clusters
            .iter()
            .find(|c| c.text.contains("crashes"))
            .unwrap();
        assert_eq!(crash.member_count(), 4);
        assert_eq!(crash.engagement, 8);

        let support = clusters
            .iter()
            .find(|c| c.text.contains("Support"))
            .unwrap();
        assert_eq!(support.engagement, 12);

        let grumble = clusters
            .iter()
            .find(|c| c.text.to_lowercase().contains("grumble"))
            .unwrap();
        assert_eq!(grumble.member_count(), 2);
        assert_eq!(grumble.engagement, 6);
    }

    #[test]
    fn same_source_key_collapses_even_with_different_text() {
        let items = vec![
            item(SourceId::Reddit, "same", "first snapshot of the thread", 1),
            item(SourceId::Reddit, "same", "edited snapshot of the thread with more words", 2),
        ];
        let clusters = engine().dedup(&items, &TokenOverlap);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].engagement, 3);
    }

    #[test]
    fn near_duplicates_merge_transitively() {
        // a~b and b~c above threshold; a~c may fall below. Single-link pulls
        // all three together.
        let items = vec![
            item(SourceId::Reddit, "a", "export to csv silently drops rows", 1),
            item(SourceId::Reddit, "b", "export to csv silently drops many rows", 1),
            item(SourceId::Reddit, "c", "the export to csv silently drops many rows today", 1),
        ];
        let clusters = DedupEngine::new(0.7).dedup(&items, &TokenOverlap);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_count(), 3);
        assert!(clusters[0].cluster_confidence > 0.0);
        assert!(clusters[0].cluster_confidence <= 1.0);
    }

    #[test]
    fn dedup_is_idempotent_on_representatives() {
        let items = vec![
            item(SourceId::Reddit, "a", "search indexing lags behind by hours", 1),
            item(SourceId::Reddit, "b", "search indexing lags behind by hours", 4),
            item(SourceId::HackerNews, "c", "mobile app logs me out every day", 2),
        ];
        let first = engine().dedup(&items, &TokenOverlap);

        let reps: Vec<ReviewItem> = first
            .iter()
            .map(|c| ReviewItem {
                source: c.source,
                source_key: c.members[0].source_key.clone(),
                text: c.text.clone(),
                posted_at: c.first_seen,
                engagement: c.engagement,
                author: None,
                platform: c.source.to_string(),
            })
            .collect();
        let second = engine().dedup(&reps, &TokenOverlap);

        assert_eq!(second.len(), first.len());
        assert!(second.iter().all(|c| c.member_count() == 1));
        assert!(second.iter().all(|c| c.cluster_confidence == 1.0));
    }

    #[test]
    fn singleton_confidence_is_one() {
        let items = vec![item(SourceId::Reddit, "a", "lone remark", 0)];
        let clusters = engine().dedup(&items, &TokenOverlap);
        assert_eq!(clusters[0].cluster_confidence, 1.0);
    }

    #[test]
    fn representative_is_longest_then_earliest() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        let mut a = item(SourceId::Reddit, "a", "dashboard charts wrong since the update", 1);
        a.posted_at = Some(late);
        let mut b = item(SourceId::Reddit, "b", "dashboard charts have been wrong since the update", 1);
        b.posted_at = Some(late);
        let mut c = item(SourceId::Reddit, "c", "dashboard charts have been wrong since the update", 1);
        c.posted_at = Some(early);

        let clusters = DedupEngine::new(0.6).dedup(&[a, b, c], &TokenOverlap);
        assert_eq!(clusters.len(), 1);
        // Longest text wins; among the two equal-length texts the earlier one.
        assert_eq!(clusters[0].members[0].source_key, "c");
        assert_eq!(clusters[0].first_seen, Some(early));
    }

    #[test]
    fn repeated_runs_produce_identical_clusters() {
        let items: Vec<ReviewItem> = (0..12)
            .map(|i| {
                item(
                    SourceId::Reddit,
                    &format!("k{i}"),
                    &format!("notification spam issue number {} keeps happening", i % 3),
                    i,
                )
            })
            .collect();
        let a = engine().dedup(&items, &TokenOverlap);
        let b = engine().dedup(&items, &TokenOverlap);
        let keys_a: Vec<Vec<String>> = a
            .iter()
            .map(|c| c.members.iter().map(|m| m.source_key.clone()).collect())
            .collect();
        let keys_b: Vec<Vec<String>> = b
            .iter()
            .map(|c| c.members.iter().map(|m| m.source_key.clone()).collect())
            .collect();
        assert_eq!(keys_a, keys_b);
    }

    #[test]
    fn token_overlap_is_symmetric_and_bounded() {
        let sim = TokenOverlap;
        let pairs = [
            ("the quick brown fox", "the quick red fox"),
            ("", "nonempty"),
            ("same words here", "same words here"),
        ];
        for (a, b) in pairs {
            let ab = sim.score(a, b);
            let ba = sim.score(b, a);
            assert_eq!(ab, ba);
            assert!((0.0..=1.0).contains(&ab));
        }
        assert_eq!(sim.score("identical text", "identical text"), 1.0);
    }
}
