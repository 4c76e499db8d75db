//! Dataset assembly and storage
//!
//! A [`Dataset`] is the flat, storage-shaped form of a filtered record tree
//! with the abstracts recovered by extraction attached.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use dblpline_core::PipelineError;
use dblpline_dblp::{AccessClassification, RecordTree};
use serde::{Deserialize, Serialize};

use crate::abstracts::tei_abstract;
use crate::fetcher::FetchResult;
use crate::grobid::tei_path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub key: String,
    pub category: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub doi: Option<String>,
    pub access: AccessClassification,
    /// Link the document was (or would be) retrieved from
    pub url: Option<String>,
    pub modified: NaiveDateTime,
    pub abstract_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub generated_at: DateTime<Utc>,
    /// Release file the publications come from
    pub release: String,
    pub publications: Vec<Publication>,
}

impl Dataset {
    pub fn from_tree(tree: &RecordTree, release: &str) -> Self {
        let publications = tree
            .iter()
            .map(|(category, record)| Publication {
                key: record.key.clone(),
                category: category.to_string(),
                title: record.title.clone(),
                authors: record.authors.clone(),
                year: record.year,
                venue: record.venue.clone(),
                doi: record.doi().map(str::to_string),
                access: record.access(),
                url: record.retrieval_url().map(str::to_string),
                modified: record.modified,
                abstract_text: None,
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            release: release.to_string(),
            publications,
        }
    }

    /// Attach abstracts keyed by record key; returns how many were attached.
    pub fn attach_abstracts(&mut self, abstracts: &HashMap<String, String>) -> usize {
        let mut attached = 0;
        for publication in &mut self.publications {
            if let Some(text) = abstracts.get(&publication.key) {
                publication.abstract_text = Some(text.clone());
                attached += 1;
            }
        }
        attached
    }

    pub fn len(&self) -> usize {
        self.publications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publications.is_empty()
    }
}

/// Read the TEI sibling of every fetched document and pull out its abstract.
///
/// Records whose document was never fetched, never extracted, or has no
/// recognisable abstract are absent from the map.
pub fn collect_abstracts(results: &[FetchResult]) -> HashMap<String, String> {
    results
        .iter()
        .filter_map(|result| {
            let tei = tei_path(result.local_path.as_deref()?);
            let xml = match std::fs::read_to_string(&tei) {
                Ok(xml) => xml,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
                Err(e) => {
                    log::warn!("{}: {e}", tei.display());
                    return None;
                }
            };
            tei_abstract(&xml).map(|text| (result.key.clone(), text))
        })
        .collect()
}

/// Persistence target for an assembled dataset
pub trait DatasetStore {
    fn store(&self, dataset: &Dataset) -> Result<(), PipelineError>;
}

/// `dataset.json` under the cache root, for debugging and offline use
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join("dataset.json")
    }
}

impl DatasetStore for LocalStore {
    fn store(&self, dataset: &Dataset) -> Result<(), PipelineError> {
        let dest = self.path();
        let tmp = dest.with_extension("json.tmp");
        let write = |path: &Path| -> std::io::Result<()> {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, dataset)?;
            writer.flush()?;
            writer.get_ref().sync_all()
        };
        if let Err(e) = write(&tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        std::fs::rename(&tmp, &dest)?;
        log::info!(
            "Stored {} publications in {}",
            dataset.len(),
            dest.display()
        );
        Ok(())
    }
}

/// Remote persistence is not available; asking for it is a setup error.
pub fn backend_store(url: &str) -> Result<Box<dyn DatasetStore>, PipelineError> {
    Err(PipelineError::UnsupportedFeature(format!(
        "backend store at {url} is not implemented; use the local store"
    )))
}
