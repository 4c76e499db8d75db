//! Configuration loading from TOML files

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dblpline_crawl::GrobidService;
use dblpline_dblp::AccessClassification;
use serde::Deserialize;

/// Global configuration for dblpline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub dblp: DblpConfig,
    pub crawl: CrawlConfig,
    pub grobid: GrobidConfig,
    pub http: HttpConfig,
    pub output: OutputConfig,
    #[serde(rename = "loop")]
    pub schedule: LoopConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DblpConfig {
    pub base_url: String,
    pub access_types: BTreeSet<AccessClassification>,
    pub use_filters: bool,
    /// First cycle only; later cycles continue from the newest record seen
    pub since: Option<NaiveDate>,
    pub denylist: Vec<String>,
}

impl Default for DblpConfig {
    fn default() -> Self {
        let filter = dblpline_dblp::FilterOptions::default();
        Self {
            base_url: dblpline_dblp::config::DEFAULT_BASE_URL.to_string(),
            access_types: filter.access,
            use_filters: filter.use_filters,
            since: None,
            denylist: dblpline_dblp::filter::DEFAULT_DENYLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub chunk_size: usize,
    pub max_concurrent_requests: usize,
    pub shuffle: bool,
    pub shuffle_seed: Option<u64>,
    pub request_timeout_secs: u64,
    pub overwrite_pdf_cache: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        let crawl = dblpline_crawl::CrawlConfig::default();
        Self {
            chunk_size: crawl.chunk_size,
            max_concurrent_requests: crawl.max_concurrent_requests,
            shuffle: crawl.shuffle,
            shuffle_seed: crawl.shuffle_seed,
            request_timeout_secs: crawl.request_timeout.as_secs(),
            overwrite_pdf_cache: crawl.overwrite_pdf_cache,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrobidConfig {
    #[serde(deserialize_with = "deserialize_env_string")]
    pub server: String,
    pub port: Option<u16>,
    pub service: GrobidService,
    pub threads: usize,
    pub batch_size: usize,
    pub generate_ids: bool,
    pub consolidate_header: bool,
    pub consolidate_citations: bool,
    pub include_raw_citations: bool,
    pub include_raw_affiliations: bool,
    pub tei_coordinates: bool,
    pub segment_sentences: bool,
    pub sleep_secs: u64,
    pub timeout_secs: u64,
    pub force: bool,
}

impl Default for GrobidConfig {
    fn default() -> Self {
        let grobid = dblpline_crawl::GrobidConfig::default();
        Self {
            server: grobid.server,
            port: grobid.port,
            service: grobid.service,
            threads: grobid.threads,
            batch_size: grobid.batch_size,
            generate_ids: grobid.generate_ids,
            consolidate_header: grobid.consolidate_header,
            consolidate_citations: grobid.consolidate_citations,
            include_raw_citations: grobid.include_raw_citations,
            include_raw_affiliations: grobid.include_raw_affiliations,
            tei_coordinates: grobid.tei_coordinates,
            segment_sentences: grobid.segment_sentences,
            sleep_secs: grobid.sleep.as_secs(),
            timeout_secs: grobid.timeout.as_secs(),
            force: grobid.force,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout: u64,
    pub read_timeout: u64,
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let http = dblpline_core::HttpConfig::default();
        Self {
            request_timeout: http.request_timeout.as_secs(),
            read_timeout: http.read_timeout.as_secs(),
            max_retries: http.max_retries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Unset: the platform cache directory
    pub cache_dir: Option<PathBuf>,
    /// Mirror each assembled dataset to `<cache_dir>/dataset.json`
    pub store_local: bool,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub backend_url: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            store_local: true,
            backend_url: std::env::var("DBLPLINE_BACKEND_URL").ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub interval_secs: u64,
    pub once: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        // dblp publishes monthly releases; daily checks pick them up promptly
        Self {
            interval_secs: 24 * 60 * 60,
            once: false,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

fn deserialize_env_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    expand_env_var(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("environment variable in '{raw}' is not set"))
    })
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./dblpline.toml (current directory)
    /// 2. ~/.config/dblpline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("dblpline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "dblpline") {
            let user_config = dirs.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Cache root: `--cache-dir`, then `[output] cache_dir`, then the platform
    /// cache directory. Created here so an unusable root fails before any I/O.
    pub fn resolve_cache_dir(&self, cli: Option<&Path>) -> Result<PathBuf> {
        let dir = match cli.or(self.output.cache_dir.as_deref()) {
            Some(dir) => dir.to_path_buf(),
            None => directories::ProjectDirs::from("", "", "dblpline")
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .context("Could not determine a cache directory; pass --cache-dir")?,
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cache directory {} is not writable", dir.display()))?;
        Ok(dir)
    }
}
