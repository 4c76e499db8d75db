//! `dblpline config` - show the effective configuration

use std::path::Path;

use dblpline_core::http_config;

use super::print_summary;
use crate::config::Config;

fn on_off(flag: bool) -> String {
    if flag { "on" } else { "off" }.to_string()
}

pub fn run(config: &Config, cache_dir: &Path) {
    let http = http_config();
    let access = config
        .dblp
        .access_types
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let grobid_flags = [
        ("generate_ids", config.grobid.generate_ids),
        ("consolidate_header", config.grobid.consolidate_header),
        ("consolidate_citations", config.grobid.consolidate_citations),
        ("include_raw_citations", config.grobid.include_raw_citations),
        ("include_raw_affiliations", config.grobid.include_raw_affiliations),
        ("tei_coordinates", config.grobid.tei_coordinates),
        ("segment_sentences", config.grobid.segment_sentences),
    ]
    .iter()
    .filter(|(_, on)| *on)
    .map(|(name, _)| *name)
    .collect::<Vec<_>>();

    print_summary(
        "Setting",
        &[
            ("Cache directory", cache_dir.display().to_string()),
            ("DBLP base URL", config.dblp.base_url.clone()),
            ("Filters", on_off(config.dblp.use_filters)),
            ("Access types", access),
            (
                "Since",
                config
                    .dblp
                    .since
                    .map_or_else(|| "all time".to_string(), |d| d.to_string()),
            ),
            ("Denylist", config.dblp.denylist.join(", ")),
            ("Chunk size", config.crawl.chunk_size.to_string()),
            (
                "Concurrent requests",
                config.crawl.max_concurrent_requests.to_string(),
            ),
            (
                "Shuffle",
                match (config.crawl.shuffle, config.crawl.shuffle_seed) {
                    (false, _) => "off".to_string(),
                    (true, None) => "on".to_string(),
                    (true, Some(seed)) => format!("on (seed {seed})"),
                },
            ),
            (
                "Overwrite PDF cache",
                on_off(config.crawl.overwrite_pdf_cache),
            ),
            (
                "GROBID",
                match config.grobid.port {
                    Some(port) => format!("{}:{port}", config.grobid.server),
                    None => config.grobid.server.clone(),
                },
            ),
            ("GROBID service", config.grobid.service.to_string()),
            (
                "GROBID workers",
                format!(
                    "{} threads, batches of {}",
                    config.grobid.threads, config.grobid.batch_size
                ),
            ),
            (
                "GROBID options",
                if grobid_flags.is_empty() {
                    "none".to_string()
                } else {
                    grobid_flags.join(", ")
                },
            ),
            ("Store local", on_off(config.output.store_local)),
            (
                "Backend",
                if config.output.backend_url.is_some() {
                    "configured (not supported)".to_string()
                } else {
                    "not set".to_string()
                },
            ),
            ("Read timeout", format!("{}s", http.read_timeout.as_secs())),
            ("Max retries", http.max_retries.to_string()),
            (
                "Loop",
                if config.schedule.once {
                    "once".to_string()
                } else {
                    format!("every {}s", config.schedule.interval_secs)
                },
            ),
        ],
    );
}
