//! Fast-reload form of a parsed release
//!
//! `dblp-2021-11-01.xml.gz` is cached as `dblp-2021-11-01.xml.json` with a
//! `dblp-2021-11-01.xml.json.manifest` sidecar. The manifest pins the source
//! URL, record count and blake3 of the JSON; a cache that fails any check is
//! ignored and rebuilt.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fetcher::CacheEntry;
use crate::record::RecordTree;

/// Bump when the serialized `Record` layout changes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeManifest {
    pub format_version: u32,
    pub source_url: String,
    pub record_count: usize,
    /// blake3 of the serialized tree
    pub blake3: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Where a loaded tree came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSource {
    Cache,
    Parsed,
}

pub fn serialized_path(archive: &Path) -> PathBuf {
    archive.with_extension("json")
}

fn manifest_path(serialized: &Path) -> PathBuf {
    let mut name = serialized.file_name().unwrap_or_default().to_os_string();
    name.push(".manifest");
    serialized.with_file_name(name)
}

fn hash_file(path: &Path) -> std::io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap(path)?;
    Ok(hasher.finalize())
}

/// Load the tree for `archive`, parsing with `parse` only when no valid cache exists.
pub fn load_record_tree<F>(archive: &CacheEntry, parse: F) -> Result<(RecordTree, TreeSource)>
where
    F: FnOnce() -> Result<RecordTree>,
{
    if let Some(tree) = read_cached(archive) {
        return Ok((tree, TreeSource::Cache));
    }
    let tree = parse()?;
    if let Err(e) = write_cache(archive, &tree) {
        // The parsed tree is still good; only the next run pays for the parse again
        log::warn!("Failed to write tree cache: {e:#}");
    }
    Ok((tree, TreeSource::Parsed))
}

/// Validated cached tree, or `None` when absent, stale or corrupt.
pub fn read_cached(archive: &CacheEntry) -> Option<RecordTree> {
    let path = serialized_path(&archive.local_path);
    if !path.is_file() {
        return None;
    }
    match try_read(archive, &path) {
        Ok(tree) => {
            log::info!("Loaded {} records from {}", tree.len(), path.display());
            Some(tree)
        }
        Err(e) => {
            log::warn!("Ignoring tree cache {}: {e:#}", path.display());
            None
        }
    }
}

fn try_read(archive: &CacheEntry, path: &Path) -> Result<RecordTree> {
    let manifest_file = manifest_path(path);
    let json = std::fs::read_to_string(&manifest_file)
        .with_context(|| format!("failed to read {}", manifest_file.display()))?;
    let manifest: TreeManifest =
        serde_json::from_str(&json).context("failed to parse tree manifest")?;

    anyhow::ensure!(
        manifest.format_version == FORMAT_VERSION,
        "format version {} (expected {FORMAT_VERSION})",
        manifest.format_version
    );
    anyhow::ensure!(
        manifest.source_url == archive.source_url,
        "built from {}",
        manifest.source_url
    );
    let actual = hash_file(path)?.to_hex().to_string();
    anyhow::ensure!(actual == manifest.blake3, "content hash mismatch");

    let reader = BufReader::new(File::open(path)?);
    let tree: RecordTree = serde_json::from_reader(reader).context("failed to decode tree")?;
    anyhow::ensure!(
        tree.len() == manifest.record_count,
        "{} records (manifest says {})",
        tree.len(),
        manifest.record_count
    );
    Ok(tree)
}

/// Serialize `tree` next to `archive` (tmp then rename) and write its manifest.
pub fn write_cache(archive: &CacheEntry, tree: &RecordTree) -> Result<TreeManifest> {
    let path = serialized_path(&archive.local_path);
    let tmp = path.with_extension("json.tmp");

    {
        let mut out = BufWriter::new(
            File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?,
        );
        serde_json::to_writer(&mut out, tree).context("failed to serialize tree")?;
        out.flush()?;
    }
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("failed to rename {}", tmp.display()))?;

    let manifest = TreeManifest {
        format_version: FORMAT_VERSION,
        source_url: archive.source_url.clone(),
        record_count: tree.len(),
        blake3: hash_file(&path)?.to_hex().to_string(),
        created_at: chrono::Utc::now(),
    };
    let manifest_file = manifest_path(&path);
    let json = serde_json::to_string_pretty(&manifest).context("failed to serialize manifest")?;
    std::fs::write(&manifest_file, json)
        .with_context(|| format!("failed to write {}", manifest_file.display()))?;

    log::info!("Cached {} records to {}", manifest.record_count, path.display());
    Ok(manifest)
}
