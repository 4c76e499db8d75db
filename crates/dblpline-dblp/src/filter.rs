//! Incremental filter chain over a [`RecordTree`]
//!
//! Every filter builds a new tree and leaves its input alone. Filters are
//! intersective, so the chain result does not depend on order; the order
//! only decides how many records later filters have to look at.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::record::{AccessClassification, Record, RecordTree};

/// Categories that never carry a crawlable document
pub const DEFAULT_DENYLIST: &[&str] = &["www", "note"];

/// Lower bound meaning "all time"
pub fn default_since() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Keep records modified strictly after the instant
    ModifiedSince(NaiveDateTime),
    /// Keep records whose access classification is in the set
    Access(BTreeSet<AccessClassification>),
}

impl Filter {
    /// Wildcard access sets match everything and are skipped.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::ModifiedSince(_) => false,
            Self::Access(allowed) => allowed.contains(&AccessClassification::All),
        }
    }

    pub fn keep(&self, record: &Record) -> bool {
        match self {
            Self::ModifiedSince(since) => record.modified > *since,
            Self::Access(allowed) => {
                let access = record.access();
                allowed.iter().any(|a| a.matches(access))
            }
        }
    }

    pub fn apply(&self, tree: &RecordTree) -> RecordTree {
        if self.is_noop() {
            return tree.clone();
        }
        tree.filtered(|r| self.keep(r))
    }
}

pub fn timestamp_filter(tree: &RecordTree, since: NaiveDateTime) -> RecordTree {
    Filter::ModifiedSince(since).apply(tree)
}

pub fn access_filter(tree: &RecordTree, allowed: &BTreeSet<AccessClassification>) -> RecordTree {
    Filter::Access(allowed.clone()).apply(tree)
}

/// Apply `filters` left to right, skipping no-ops.
pub fn apply_chain(tree: RecordTree, filters: &[Filter]) -> RecordTree {
    filters
        .iter()
        .filter(|f| !f.is_noop())
        .fold(tree, |acc, f| {
            let before = acc.len();
            let next = acc.filtered(|r| f.keep(r));
            log::debug!("{f:?}: {before} -> {} records", next.len());
            next
        })
}

/// Filter settings for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// `false` passes the whole release through
    pub use_filters: bool,
    pub since: NaiveDateTime,
    pub access: BTreeSet<AccessClassification>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            use_filters: true,
            since: default_since(),
            access: BTreeSet::from([AccessClassification::Closed]),
        }
    }
}

impl FilterOptions {
    /// Timestamp first: across releases most records are old.
    pub fn chain(&self) -> Vec<Filter> {
        if !self.use_filters {
            return Vec::new();
        }
        vec![
            Filter::ModifiedSince(self.since),
            Filter::Access(self.access.clone()),
        ]
    }
}

/// One record the crawler should fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalTarget {
    pub key: String,
    pub url: String,
}

/// Flatten a filtered tree into crawl targets, skipping denylisted
/// categories and records without any link.
pub fn extract_retrieval_targets(tree: &RecordTree, denylist: &[String]) -> Vec<RetrievalTarget> {
    let per_category: Vec<Vec<RetrievalTarget>> = tree
        .categories()
        .filter(|c| !denylist.iter().any(|d| d == c))
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|category| {
            tree.get(category)
                .iter()
                .filter_map(|r| {
                    r.retrieval_url().map(|url| RetrievalTarget {
                        key: r.key.clone(),
                        url: url.to_string(),
                    })
                })
                .collect()
        })
        .collect();
    per_category.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExternalLink;
    use chrono::TimeDelta;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn record(key: &str, modified: NaiveDateTime, links: &[(&str, Option<&str>)]) -> Record {
        let mut r = Record::new(key, modified);
        r.external_links = links
            .iter()
            .map(|(url, ty)| ExternalLink {
                text: url.to_string(),
                access_type: ty.and_then(AccessClassification::from_link_type),
            })
            .collect();
        r
    }

    fn open() -> BTreeSet<AccessClassification> {
        BTreeSet::from([AccessClassification::Open])
    }

    fn closed() -> BTreeSet<AccessClassification> {
        BTreeSet::from([AccessClassification::Closed])
    }

    /// Mix of old/new, open/closed/unlinked across categories
    fn mixed_tree() -> RecordTree {
        RecordTree::from_records([
            ("article", record("a/old-open", day(2019, 5, 1), &[("https://x/1", Some("oa"))])),
            ("article", record("a/new-open", day(2021, 11, 2), &[("https://x/2", Some("oa"))])),
            ("article", record("a/new-closed", day(2021, 11, 3), &[("https://x/3", None)])),
            ("inproceedings", record("c/old-closed", day(2018, 1, 1), &[("https://y/1", None)])),
            ("inproceedings", record("c/new-nolink", day(2021, 12, 1), &[])),
            ("www", record("homepages/z", day(2021, 12, 1), &[("https://z", Some("oa"))])),
        ])
    }

    #[test]
    fn timestamp_boundary_is_strict() {
        let since = day(2021, 10, 15);
        let tree = RecordTree::from_records([
            ("article", record("a/equal", since, &[])),
            ("article", record("a/after", since + TimeDelta::microseconds(1), &[])),
        ]);
        let kept = timestamp_filter(&tree, since);
        let keys: Vec<_> = kept.iter().map(|(_, r)| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a/after"]);
    }

    #[test]
    fn untagged_link_defaults_to_closed() {
        let tree = RecordTree::from_records([(
            "article",
            record("a/1", day(2021, 1, 1), &[("https://doi.org/10.1/x", None)]),
        )]);
        assert_eq!(access_filter(&tree, &closed()).len(), 1);
        assert!(access_filter(&tree, &open()).is_empty());
    }

    #[test]
    fn wildcard_access_is_noop() {
        let all = BTreeSet::from([AccessClassification::All]);
        assert!(Filter::Access(all.clone()).is_noop());
        let tree = mixed_tree();
        assert_eq!(access_filter(&tree, &all), tree);
        assert_eq!(apply_chain(tree.clone(), &[Filter::Access(all)]), tree);
    }

    #[test]
    fn chain_is_order_independent() {
        let tree = mixed_tree();
        let since = [day(1980, 1, 1), day(2021, 1, 1), day(2021, 11, 2), day(2030, 1, 1)];
        let sets = [
            open(),
            closed(),
            BTreeSet::from([AccessClassification::Open, AccessClassification::Closed]),
            BTreeSet::from([AccessClassification::All]),
            BTreeSet::new(),
        ];
        for s in since {
            for set in &sets {
                let t = Filter::ModifiedSince(s);
                let a = Filter::Access(set.clone());
                let ta = apply_chain(tree.clone(), &[t.clone(), a.clone()]);
                let at = apply_chain(tree.clone(), &[a, t]);
                assert_eq!(ta, at, "since={s} access={set:?}");
            }
        }
    }

    #[test]
    fn filters_leave_input_untouched() {
        let tree = mixed_tree();
        let before = tree.clone();
        let _ = timestamp_filter(&tree, day(2021, 1, 1));
        let _ = access_filter(&tree, &open());
        assert_eq!(tree, before);
    }

    #[test]
    fn options_chain_order_and_toggle() {
        let opts = FilterOptions::default();
        let chain = opts.chain();
        assert!(matches!(chain[0], Filter::ModifiedSince(_)));
        assert!(matches!(chain[1], Filter::Access(_)));
        assert_eq!(opts.since, day(1980, 1, 1));

        let off = FilterOptions {
            use_filters: false,
            ..FilterOptions::default()
        };
        assert!(off.chain().is_empty());
    }

    #[test]
    fn targets_skip_denylist_and_unlinked() {
        let denylist: Vec<String> = DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect();
        let targets = extract_retrieval_targets(&mixed_tree(), &denylist);
        let keys: Vec<_> = targets.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["a/old-open", "a/new-open", "a/new-closed", "c/old-closed"]
        );
    }

    #[test]
    fn target_prefers_open_link() {
        let tree = RecordTree::from_records([(
            "article",
            record(
                "a/1",
                day(2021, 1, 1),
                &[("https://doi.org/10.1/x", None), ("https://arxiv.org/abs/1", Some("oa"))],
            ),
        )]);
        let targets = extract_retrieval_targets(&tree, &[]);
        assert_eq!(targets[0].url, "https://arxiv.org/abs/1");
    }
}
