//! Crawl configuration

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the crawl stage
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Root holding `chunk########` directories
    pub pdf_dir: PathBuf,
    /// Records per chunk
    pub chunk_size: usize,
    /// Concurrent document requests per chunk
    pub max_concurrent_requests: usize,
    /// Spread records of one host across chunks
    pub shuffle: bool,
    /// Fixed seed for reproducible shuffles
    pub shuffle_seed: Option<u64>,
    /// Bound on any single document request
    pub request_timeout: Duration,
    /// Wipe an existing `pdf_dir` instead of refusing to start
    pub overwrite_pdf_cache: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            pdf_dir: PathBuf::from("cache/pdf"),
            chunk_size: 1000,
            max_concurrent_requests: 50,
            shuffle: true,
            shuffle_seed: None,
            request_timeout: Duration::from_secs(60),
            overwrite_pdf_cache: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CrawlConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.max_concurrent_requests, 50);
        assert!(config.shuffle);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert!(!config.overwrite_pdf_cache);
    }
}
