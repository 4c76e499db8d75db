//! dblpline DBLP - release acquisition and incremental filtering
//!
//! Resolves the latest DBLP XML release, keeps a checksum-verified local
//! copy, parses it into a [`RecordTree`] (cached in a fast-reload form) and
//! narrows it to the records a crawl cycle should fetch.
//!
//! # Example
//!
//! ```ignore
//! use dblpline_dblp::{Config, run};
//!
//! let config = Config {
//!     cache_dir: "cache".into(),
//!     ..Default::default()
//! };
//!
//! let result = run(&config, progress)?;
//! println!("{} retrieval targets", result.targets.len());
//! ```

pub mod catalog;
pub mod config;
pub mod dtd;
pub mod fetcher;
pub mod filter;
pub mod parser;
pub mod record;
pub mod runner;
pub mod tree_cache;

// Re-exports
pub use catalog::{ArtifactKind, ReleaseArtifact, ReleaseCatalog};
pub use config::Config;
pub use fetcher::{CacheEntry, FetchCounts, PreparedRelease, ReleaseFetcher};
pub use filter::{
    Filter, FilterOptions, RetrievalTarget, access_filter, apply_chain,
    extract_retrieval_targets, timestamp_filter,
};
pub use record::{AccessClassification, ExternalLink, Record, RecordTree};
pub use runner::{ReleaseRun, run};
pub use tree_cache::{TreeSource, load_record_tree};
