//! Crawl pipeline: partition, fetch, extract, collect abstracts

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use dblpline_core::{SHARED_RUNTIME, SharedProgress, fmt_num};
use dblpline_dblp::RetrievalTarget;

use crate::config::CrawlConfig;
use crate::dataset::collect_abstracts;
use crate::fetcher::DocumentFetcher;
use crate::grobid::{ExtractStats, Extractor};
use crate::scheduler::{
    CrawlReport, partition, prepare_chunk_dirs, run_pipeline, shuffle_targets,
};

/// Outcome of one crawl pass
#[derive(Debug)]
pub struct CrawlRun {
    pub report: CrawlReport,
    /// Summed over every chunk whose process stage returned
    pub extract: ExtractStats,
    /// Abstracts recovered from extraction output, by record key
    pub abstracts: HashMap<String, String>,
    pub elapsed: Duration,
}

/// Crawl `targets` chunk by chunk, extracting each chunk with `extractor`.
///
/// Fails only on setup (chunk directories); fetch and process failures are
/// reported per chunk in [`CrawlRun::report`].
pub fn run_crawl(
    mut targets: Vec<RetrievalTarget>,
    config: &CrawlConfig,
    fetcher: &DocumentFetcher,
    extractor: &dyn Extractor,
    progress: SharedProgress,
) -> Result<CrawlRun> {
    let start = Instant::now();
    if config.shuffle {
        shuffle_targets(&mut targets, config.shuffle_seed);
    }
    let chunks = partition(targets, config.chunk_size);
    let dirs = prepare_chunk_dirs(&config.pdf_dir, chunks.len(), config.overwrite_pdf_cache)?;
    log::info!(
        "Crawling {} chunks of up to {} records into {}",
        fmt_num(chunks.len()),
        fmt_num(config.chunk_size),
        config.pdf_dir.display()
    );

    let total = chunks.len();
    let fetch_line = progress.stage_line("fetch");
    let process_line = progress.stage_line("process");
    let mut extract = ExtractStats::default();

    let report = run_pipeline(
        &chunks,
        &dirs,
        |chunk, dir| {
            fetch_line.set_message(format!("chunk {}/{total}", chunk.index + 1));
            let results = SHARED_RUNTIME.handle().block_on(fetcher.fetch_chunk(
                chunk,
                dir,
                config.max_concurrent_requests,
            ));
            let hits = results.iter().filter(|r| r.is_hit()).count();
            log::info!(
                "chunk {}: fetched {}/{} documents",
                chunk.index,
                hits,
                results.len()
            );
            Ok(results)
        },
        |chunk, dir| {
            process_line.set_message(format!("chunk {}/{total}", chunk.index + 1));
            let stats = extractor.process_directory(dir)?;
            log::info!(
                "chunk {}: extracted {}, skipped {}, failed {}",
                chunk.index,
                stats.processed,
                stats.skipped,
                stats.failed
            );
            extract.processed += stats.processed;
            extract.skipped += stats.skipped;
            extract.failed += stats.failed;
            Ok(())
        },
    )?;
    fetch_line.finish_and_clear();
    process_line.finish_and_clear();

    for failure in &report.failures {
        log::warn!(
            "chunk {} {:?} stage failed: {}",
            failure.index,
            failure.stage,
            failure.message
        );
    }

    let abstracts = collect_abstracts(&report.results);
    log::info!(
        "Crawl finished: {} fetched, {} missed, {} abstracts",
        fmt_num(report.fetched()),
        fmt_num(report.missed()),
        fmt_num(abstracts.len())
    );

    Ok(CrawlRun {
        report,
        extract,
        abstracts,
        elapsed: start.elapsed(),
    })
}
