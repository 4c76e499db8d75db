//! Release pipeline: resolve, fetch, verify, load, filter

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use dblpline_core::{SHARED_RUNTIME, SharedProgress, fmt_num};

use crate::catalog::ReleaseCatalog;
use crate::config::Config;
use crate::fetcher::{FetchCounts, PreparedRelease, ReleaseFetcher};
use crate::filter::{RetrievalTarget, apply_chain, extract_retrieval_targets};
use crate::parser::parse_release_file;
use crate::record::RecordTree;
use crate::tree_cache::{TreeSource, load_record_tree};

/// Outcome of one release pass
#[derive(Debug)]
pub struct ReleaseRun {
    pub release: PreparedRelease,
    pub tree_source: TreeSource,
    /// Records in the release before filtering
    pub total_records: usize,
    /// Working subset after the filter chain
    pub tree: RecordTree,
    pub targets: Vec<RetrievalTarget>,
    /// Newest `mdate` in the whole release
    pub newest_modified: Option<NaiveDateTime>,
    pub fetch: FetchCounts,
    pub elapsed: Duration,
}

/// Run the release pipeline once.
pub fn run(config: &Config, progress: SharedProgress) -> Result<ReleaseRun> {
    let start = Instant::now();
    config.validate()?;

    let fetcher = ReleaseFetcher::new(&config.cache_dir, progress).with_context(|| {
        format!(
            "Failed to create cache directory {}",
            config.cache_dir.display()
        )
    })?;
    let catalog = ReleaseCatalog::with_suffixes(&config.base_url, config.suffixes.clone());

    let release = SHARED_RUNTIME
        .handle()
        .block_on(fetcher.ensure_release(&catalog, config.skip))
        .context("Failed to prepare release")?;

    let (full, tree_source) = load_record_tree(&release.archive, || {
        let schema = release.schema.as_ref().map(|s| s.local_path.as_path());
        Ok(parse_release_file(&release.xml_path, schema)?.tree)
    })?;
    let total_records = full.len();
    let newest_modified = full.newest_modified();
    log::info!(
        "{}: {} records ({:?})",
        release.release.filename(),
        fmt_num(total_records),
        tree_source
    );

    let tree = apply_chain(full, &config.filter.chain());
    let targets = extract_retrieval_targets(&tree, &config.denylist);
    log::info!(
        "After filters: {} records, {} retrieval targets",
        fmt_num(tree.len()),
        fmt_num(targets.len())
    );

    Ok(ReleaseRun {
        fetch: fetcher.stats(),
        release,
        tree_source,
        total_records,
        tree,
        targets,
        newest_modified,
        elapsed: start.elapsed(),
    })
}
