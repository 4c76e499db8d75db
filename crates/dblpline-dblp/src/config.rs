//! Release pipeline configuration

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::catalog::DEFAULT_SUFFIXES;
use crate::filter::{DEFAULT_DENYLIST, FilterOptions};

pub const DEFAULT_BASE_URL: &str = "https://dblp.org/xml";

/// Runtime configuration for the release pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL; the listing lives at `<base_url>/release`
    pub base_url: String,
    /// Cache root for artifacts and the serialized tree
    pub cache_dir: PathBuf,
    pub suffixes: Vec<String>,
    /// 1 = latest release, 2 = the one before, ...
    pub skip: usize,
    pub filter: FilterOptions,
    /// Categories excluded from crawl targets
    pub denylist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_dir: PathBuf::from("cache"),
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            skip: 1,
            filter: FilterOptions::default(),
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Reject settings that would only fail after network I/O has started.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("invalid DBLP base URL '{}'", self.base_url))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "DBLP base URL must be http(s): {}",
            self.base_url
        );
        anyhow::ensure!(self.skip >= 1, "skip must be at least 1");
        anyhow::ensure!(!self.suffixes.is_empty(), "no release suffixes configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.base_url, "https://dblp.org/xml");
        assert_eq!(config.skip, 1);
        assert_eq!(config.denylist, vec!["www", "note"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_base_url_rejected() {
        let config = Config {
            base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let ftp = Config {
            base_url: "ftp://dblp.org/xml".into(),
            ..Default::default()
        };
        assert!(ftp.validate().is_err());
    }
}
