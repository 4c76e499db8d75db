//! Parsed release content: records grouped by category

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Access classification of a record's document link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessClassification {
    Open,
    Closed,
    /// Wildcard, matches every record
    All,
}

impl AccessClassification {
    /// Explicit classification carried by an `ee` element's `type` attribute.
    ///
    /// `type` is a whitespace-separated token list (`"oa"`, `"oa archive"`).
    pub fn from_link_type(raw: &str) -> Option<Self> {
        let mut tokens = raw.split_whitespace();
        if tokens.clone().any(|t| t == "oa") {
            Some(Self::Open)
        } else if tokens.any(|t| t == "closed") {
            Some(Self::Closed)
        } else {
            None
        }
    }

    pub fn matches(self, other: AccessClassification) -> bool {
        self == Self::All || other == Self::All || self == other
    }
}

impl fmt::Display for AccessClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        })
    }
}

impl FromStr for AccessClassification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "oa" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "all" => Ok(Self::All),
            other => Err(format!("unknown access type '{other}' (open, closed, all)")),
        }
    }
}

/// Parse `"open,closed"` style lists.
pub fn parse_access_set(s: &str) -> Result<BTreeSet<AccessClassification>, String> {
    s.split(',')
        .filter(|t| !t.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// One `ee` element: a link to the electronic edition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<AccessClassification>,
}

/// One bibliographic entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub modified: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publtype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// `journal` or `booktitle`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    /// dblp-internal table-of-contents link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_links: Vec<ExternalLink>,
    /// Every other child element, in document order per name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl Record {
    pub fn new(key: impl Into<String>, modified: NaiveDateTime) -> Self {
        Self {
            key: key.into(),
            modified,
            publtype: None,
            authors: Vec::new(),
            editors: Vec::new(),
            title: None,
            year: None,
            venue: None,
            pages: None,
            volume: None,
            number: None,
            url: None,
            external_links: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// OPEN only with an explicit `oa` tag on some link; everything else is CLOSED.
    pub fn access(&self) -> AccessClassification {
        if self
            .external_links
            .iter()
            .any(|l| l.access_type == Some(AccessClassification::Open))
        {
            AccessClassification::Open
        } else {
            AccessClassification::Closed
        }
    }

    /// Link the crawler should follow: first open link, else the first link.
    pub fn retrieval_url(&self) -> Option<&str> {
        self.external_links
            .iter()
            .find(|l| l.access_type == Some(AccessClassification::Open))
            .or_else(|| self.external_links.first())
            .map(|l| l.text.as_str())
    }

    pub fn doi(&self) -> Option<&str> {
        self.external_links.iter().find_map(|l| {
            l.text
                .strip_prefix("https://doi.org/")
                .or_else(|| l.text.strip_prefix("http://doi.org/"))
        })
    }
}

/// Records grouped by category key (`article`, `inproceedings`, ...).
///
/// Categories with no records are never stored, so two trees holding the
/// same records compare equal regardless of how they were built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordTree {
    categories: BTreeMap<String, Vec<Record>>,
}

impl RecordTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category: &str, record: Record) {
        match self.categories.get_mut(category) {
            Some(records) => records.push(record),
            None => {
                self.categories.insert(category.to_string(), vec![record]);
            }
        }
    }

    pub fn from_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, Record)>,
        S: AsRef<str>,
    {
        let mut tree = Self::new();
        for (category, record) in records {
            tree.push(category.as_ref(), record);
        }
        tree
    }

    pub fn get(&self, category: &str) -> &[Record] {
        self.categories.get(category).map_or(&[], Vec::as_slice)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// `(category, record)` pairs in category order, then document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.categories
            .iter()
            .flat_map(|(c, rs)| rs.iter().map(move |r| (c.as_str(), r)))
    }

    /// Total records across categories.
    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// New tree keeping the records `keep` accepts; categories are scanned in parallel.
    pub fn filtered(&self, keep: impl Fn(&Record) -> bool + Sync) -> Self {
        let categories = self
            .categories
            .par_iter()
            .filter_map(|(category, records)| {
                let kept: Vec<Record> = records.iter().filter(|r| keep(r)).cloned().collect();
                (!kept.is_empty()).then(|| (category.clone(), kept))
            })
            .collect();
        Self { categories }
    }

    /// Latest modification date in the tree.
    pub fn newest_modified(&self) -> Option<NaiveDateTime> {
        self.iter().map(|(_, r)| r.modified).max()
    }
}
