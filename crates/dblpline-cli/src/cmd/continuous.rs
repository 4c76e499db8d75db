//! `dblpline continuous` - release → filter → crawl → extract → store, repeated

use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Args;
use dblpline_core::{SHARED_RUNTIME, SharedProgress, fmt_num, is_shutdown_requested};
use dblpline_crawl::{
    CrawlConfig, CrawlRun, Dataset, DatasetStore, DocumentFetcher, GrobidClient, GrobidConfig,
    GrobidService, LocalStore, backend_store, run_crawl,
};
use dblpline_dblp::{AccessClassification, FilterOptions, ReleaseRun};

use super::print_summary;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ContinuousArgs {
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between cycles
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Mirror each dataset to <cache-dir>/dataset.json
    #[arg(long, overrides_with = "no_store_local")]
    pub store_local: bool,

    #[arg(long, hide = true)]
    pub no_store_local: bool,

    /// Backend API persisting the dataset (not supported)
    #[arg(long)]
    pub backend_url: Option<String>,

    /// DBLP base URL (the listing lives at <base>/release)
    #[arg(long)]
    pub dblp_base_url: Option<String>,

    /// Access types to keep (comma-separated: open, closed, all)
    #[arg(long, value_delimiter = ',')]
    pub access_types: Option<Vec<AccessClassification>>,

    /// Pass the whole release through without filtering
    #[arg(long)]
    pub no_filters: bool,

    /// Only records modified after this date (YYYY-MM-DD), first cycle only
    #[arg(long)]
    pub since: Option<NaiveDate>,

    /// Records per crawl chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Concurrent document requests per chunk
    #[arg(long)]
    pub max_concurrent_requests: Option<usize>,

    /// Keep release order instead of shuffling targets
    #[arg(long)]
    pub no_shuffle: bool,

    /// Seed for a reproducible shuffle
    #[arg(long)]
    pub shuffle_seed: Option<u64>,

    /// Replace an existing crawl cache instead of refusing to start
    #[arg(long)]
    pub overwrite_pdf_cache: bool,

    /// GROBID endpoint (processHeaderDocument, processFulltextDocument, processReferences)
    #[arg(long)]
    pub grobid_service: Option<GrobidService>,

    #[arg(long)]
    pub grobid_server: Option<String>,

    #[arg(long)]
    pub grobid_port: Option<u16>,

    /// Concurrent GROBID requests
    #[arg(long)]
    pub grobid_threads: Option<usize>,

    #[arg(long)]
    pub grobid_batch_size: Option<usize>,

    #[arg(long)]
    pub grobid_generate_ids: bool,

    #[arg(long)]
    pub grobid_consolidate_header: bool,

    #[arg(long)]
    pub grobid_consolidate_citations: bool,

    #[arg(long)]
    pub grobid_include_raw_citations: bool,

    #[arg(long)]
    pub grobid_include_raw_affiliations: bool,

    #[arg(long)]
    pub grobid_tei_coordinates: bool,

    #[arg(long)]
    pub grobid_segment_sentences: bool,

    /// Re-extract documents that already have TEI output
    #[arg(long)]
    pub grobid_force: bool,
}

/// Everything one run needs, validated before any network activity
struct Settings {
    dblp: dblpline_dblp::Config,
    crawl: CrawlConfig,
    grobid: GrobidConfig,
    store_local: bool,
    interval: Duration,
    once: bool,
}

fn settings(args: &ContinuousArgs, config: &Config, cache_dir: &Path) -> Result<Settings> {
    if let Some(url) = args.backend_url.as_ref().or(config.output.backend_url.as_ref()) {
        backend_store(url)?;
    }

    let dblp = dblpline_dblp::Config {
        base_url: args
            .dblp_base_url
            .clone()
            .unwrap_or_else(|| config.dblp.base_url.clone()),
        cache_dir: cache_dir.to_path_buf(),
        filter: FilterOptions {
            use_filters: config.dblp.use_filters && !args.no_filters,
            since: args
                .since
                .or(config.dblp.since)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_else(dblpline_dblp::filter::default_since),
            access: args
                .access_types
                .as_ref()
                .map(|v| v.iter().copied().collect::<BTreeSet<_>>())
                .unwrap_or_else(|| config.dblp.access_types.clone()),
        },
        denylist: config.dblp.denylist.clone(),
        ..Default::default()
    };
    dblp.validate()?;

    let crawl = CrawlConfig {
        pdf_dir: cache_dir.join("pdf"),
        chunk_size: args.chunk_size.unwrap_or(config.crawl.chunk_size),
        max_concurrent_requests: args
            .max_concurrent_requests
            .unwrap_or(config.crawl.max_concurrent_requests),
        shuffle: config.crawl.shuffle && !args.no_shuffle,
        shuffle_seed: args.shuffle_seed.or(config.crawl.shuffle_seed),
        request_timeout: Duration::from_secs(config.crawl.request_timeout_secs),
        overwrite_pdf_cache: args.overwrite_pdf_cache || config.crawl.overwrite_pdf_cache,
    };
    anyhow::ensure!(crawl.chunk_size >= 1, "chunk size must be at least 1");

    let g = &config.grobid;
    let grobid = GrobidConfig {
        server: args.grobid_server.clone().unwrap_or_else(|| g.server.clone()),
        port: args.grobid_port.or(g.port),
        service: args.grobid_service.unwrap_or(g.service),
        threads: args.grobid_threads.unwrap_or(g.threads),
        batch_size: args.grobid_batch_size.unwrap_or(g.batch_size),
        generate_ids: args.grobid_generate_ids || g.generate_ids,
        consolidate_header: args.grobid_consolidate_header || g.consolidate_header,
        consolidate_citations: args.grobid_consolidate_citations || g.consolidate_citations,
        include_raw_citations: args.grobid_include_raw_citations || g.include_raw_citations,
        include_raw_affiliations: args.grobid_include_raw_affiliations
            || g.include_raw_affiliations,
        tei_coordinates: args.grobid_tei_coordinates || g.tei_coordinates,
        segment_sentences: args.grobid_segment_sentences || g.segment_sentences,
        sleep: Duration::from_secs(g.sleep_secs),
        timeout: Duration::from_secs(g.timeout_secs),
        force: args.grobid_force || g.force,
        ..Default::default()
    };
    grobid.validate()?;

    let store_local = if args.no_store_local {
        false
    } else {
        args.store_local || config.output.store_local
    };

    Ok(Settings {
        dblp,
        crawl,
        grobid,
        store_local,
        interval: Duration::from_secs(args.interval_secs.unwrap_or(config.schedule.interval_secs)),
        once: args.once || config.schedule.once,
    })
}

/// Next cycle's lower bound: never moves backwards.
fn next_since(current: NaiveDateTime, newest: Option<NaiveDateTime>) -> NaiveDateTime {
    newest.map_or(current, |n| n.max(current))
}

/// Counts an operator needs to tell "nothing new" from "something broke"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RunSummary {
    release: String,
    artifacts_downloaded: usize,
    cached_hits: usize,
    verify_failed: usize,
    records_after_filter: usize,
    fetched: usize,
    missed: usize,
    processed: usize,
    process_failures: usize,
    abstracts: usize,
    elapsed: Duration,
}

impl RunSummary {
    fn new(release: &ReleaseRun, crawl: &CrawlRun, abstracts: usize, elapsed: Duration) -> Self {
        Self {
            release: release.release.release.filename().to_string(),
            artifacts_downloaded: release.fetch.downloaded,
            cached_hits: release.fetch.cached_hits,
            verify_failed: release.fetch.verify_failed,
            records_after_filter: release.tree.len(),
            fetched: crawl.report.fetched(),
            missed: crawl.report.missed(),
            processed: crawl.extract.processed,
            process_failures: crawl.report.failures.len(),
            abstracts,
            elapsed,
        }
    }

    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Release", self.release.clone()),
            (
                "Artifacts",
                format!(
                    "{} downloaded, {} cached, {} failed verification",
                    self.artifacts_downloaded, self.cached_hits, self.verify_failed
                ),
            ),
            ("Records after filter", fmt_num(self.records_after_filter)),
            (
                "Documents",
                format!("{} fetched, {} missed", fmt_num(self.fetched), fmt_num(self.missed)),
            ),
            (
                "Extraction",
                format!(
                    "{} processed, {} chunk failures",
                    fmt_num(self.processed),
                    self.process_failures
                ),
            ),
            ("Abstracts", fmt_num(self.abstracts)),
            ("Elapsed", format!("{:.1}s", self.elapsed.as_secs_f64())),
        ]
    }

    fn report(&self, tty: bool) {
        if tty {
            print_summary("Cycle", &self.rows());
        } else {
            for (label, value) in self.rows() {
                log::info!("{label}: {value}");
            }
        }
    }
}

pub fn run(
    args: ContinuousArgs,
    config: &Config,
    cache_dir: &Path,
    progress: &SharedProgress,
) -> Result<()> {
    let mut settings = settings(&args, config, cache_dir)?;
    let grobid = GrobidClient::new(settings.grobid.clone());
    SHARED_RUNTIME
        .handle()
        .block_on(grobid.check_alive())
        .context("GROBID is not reachable")?;
    let fetcher = DocumentFetcher::new(settings.crawl.request_timeout);
    let local_store = LocalStore::new(cache_dir);

    log::info!(
        "Cache {}; filters from {}",
        cache_dir.display(),
        settings.dblp.filter.since
    );

    let mut cycle = 0usize;
    loop {
        cycle += 1;
        let start = Instant::now();
        log::info!("Cycle {cycle}");

        let release = dblpline_dblp::run(&settings.dblp, progress.clone())?;
        let release_name = release.release.release.filename().to_string();

        let crawl = run_crawl(
            release.targets.clone(),
            &settings.crawl,
            &fetcher,
            &grobid,
            progress.clone(),
        )?;

        let mut dataset = Dataset::from_tree(&release.tree, &release_name);
        let abstracts = dataset.attach_abstracts(&crawl.abstracts);
        if settings.store_local {
            local_store
                .store(&dataset)
                .context("Failed to store dataset locally")?;
        }

        RunSummary::new(&release, &crawl, abstracts, start.elapsed()).report(progress.is_tty());

        settings.dblp.filter.since = next_since(settings.dblp.filter.since, release.newest_modified);
        // The crawl cache now holds this process's own output
        settings.crawl.overwrite_pdf_cache = true;

        if settings.once || is_shutdown_requested() {
            break;
        }
        log::info!(
            "Next cycle in {}s (records after {})",
            settings.interval.as_secs(),
            settings.dblp.filter.since
        );
        if !sleep_unless_shutdown(settings.interval) {
            break;
        }
    }
    Ok(())
}

/// Sleep in short steps; `false` if shutdown was requested meanwhile.
fn sleep_unless_shutdown(total: Duration) -> bool {
    let step = Duration::from_millis(500);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if is_shutdown_requested() {
            return false;
        }
        std::thread::sleep(step.min(deadline.saturating_duration_since(Instant::now())));
    }
    !is_shutdown_requested()
}
