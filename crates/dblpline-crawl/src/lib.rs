//! dblpline crawl - document retrieval and extraction
//!
//! Takes the retrieval targets of a filtered release, downloads their
//! documents chunk by chunk while the previous chunk is being extracted, and
//! assembles the publications (with recovered abstracts) into a [`Dataset`].
//!
//! # Example
//!
//! ```ignore
//! use dblpline_crawl::{CrawlConfig, DocumentFetcher, GrobidClient, GrobidConfig, run_crawl};
//!
//! let config = CrawlConfig::default();
//! let fetcher = DocumentFetcher::new(config.request_timeout);
//! let grobid = GrobidClient::new(GrobidConfig::default());
//! let crawl = run_crawl(targets, &config, &fetcher, &grobid, progress)?;
//! println!("{} documents fetched", crawl.report.fetched());
//! ```

pub mod abstracts;
pub mod config;
pub mod dataset;
pub mod fetcher;
pub mod grobid;
pub mod matcher;
pub mod runner;
pub mod scheduler;

// Re-exports
pub use abstracts::{DEFAULT_MARKERS, MarkerPair, extract_abstract, locate_abstract, tei_abstract};
pub use config::CrawlConfig;
pub use dataset::{Dataset, DatasetStore, LocalStore, Publication, backend_store, collect_abstracts};
pub use fetcher::{DocumentFetcher, FetchResult};
pub use grobid::{ExtractStats, Extractor, GrobidClient, GrobidConfig, GrobidService};
pub use matcher::{LinkMatcher, select_document_link};
pub use runner::{CrawlRun, run_crawl};
pub use scheduler::{ChunkFailure, CrawlChunk, CrawlReport, Stage, partition, run_pipeline};
