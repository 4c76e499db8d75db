//! DBLP release index
//!
//! Lists the artifacts published under `<base>/release/` and resolves the
//! latest (or Nth-latest) one per file extension.

use dblpline_core::{PipelineError, StreamError, TokioSleeper, fetch_text, retry_with_backoff};
use scraper::{Html, Selector};
use tokio::sync::OnceCell;

/// Suffixes recognised in the release listing by default
pub const DEFAULT_SUFFIXES: &[&str] = &[".md5", ".gz", ".dtd"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Checksum,
    Archive,
    Schema,
}

impl ArtifactKind {
    pub fn from_filename(name: &str) -> Self {
        if name.ends_with(".md5") {
            Self::Checksum
        } else if name.ends_with(".dtd") {
            Self::Schema
        } else {
            Self::Archive
        }
    }
}

/// One file in the release listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseArtifact {
    pub url: String,
    pub kind: ArtifactKind,
    /// Filename; embeds the release date so it sorts chronologically
    pub order_key: String,
}

impl ReleaseArtifact {
    pub fn filename(&self) -> &str {
        &self.order_key
    }

    /// `dblp-2021-11-01.xml.gz` → `2021-11-01`
    pub fn release_date(&self) -> Option<&str> {
        let date = self.order_key.strip_prefix("dblp-")?.get(..10)?;
        let b = date.as_bytes();
        let shaped = b.iter().enumerate().all(|(i, c)| match i {
            4 | 7 => *c == b'-',
            _ => c.is_ascii_digit(),
        });
        shaped.then_some(date)
    }
}

/// Release listing, fetched at most once per catalog.
pub struct ReleaseCatalog {
    index_url: String,
    suffixes: Vec<String>,
    releases: OnceCell<Vec<ReleaseArtifact>>,
}

impl ReleaseCatalog {
    pub fn new(base_url: &str) -> Self {
        Self::with_suffixes(base_url, DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_suffixes(base_url: &str, suffixes: Vec<String>) -> Self {
        Self {
            index_url: format!("{}/release", base_url.trim_end_matches('/')),
            suffixes,
            releases: OnceCell::new(),
        }
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    /// All recognised artifacts, most recent first. Memoized.
    pub async fn list_releases(&self) -> Result<&[ReleaseArtifact], PipelineError> {
        let releases = self
            .releases
            .get_or_try_init(|| async {
                log::info!("Fetching release index {}", self.index_url);
                let html = retry_with_backoff("release index", &TokioSleeper, || {
                    fetch_text(&self.index_url)
                })
                .await?;
                let releases = parse_release_index(&html, &self.index_url, &self.suffixes);
                log::info!("Found {} release artifacts", releases.len());
                Ok::<_, StreamError>(releases)
            })
            .await?;
        Ok(releases)
    }

    /// The `skip`-th (1-based) artifact whose URL ends with `extension`.
    pub async fn resolve_latest(
        &self,
        extension: &str,
        skip: usize,
    ) -> Result<ReleaseArtifact, PipelineError> {
        let releases = self.list_releases().await?;
        select_latest(releases, extension, skip)
    }

    pub async fn resolve_latest_archive(&self) -> Result<ReleaseArtifact, PipelineError> {
        self.resolve_latest(".xml.gz", 1).await
    }

    pub async fn resolve_latest_schema(&self) -> Result<ReleaseArtifact, PipelineError> {
        self.resolve_latest(".dtd", 1).await
    }
}

/// Pick from an already sorted (descending) listing.
pub fn select_latest(
    releases: &[ReleaseArtifact],
    extension: &str,
    skip: usize,
) -> Result<ReleaseArtifact, PipelineError> {
    if skip == 0 {
        return Err(PipelineError::NotFound(format!(
            "skip must be >= 1 (got 0) for '{extension}'"
        )));
    }
    let matching: Vec<&ReleaseArtifact> = releases
        .iter()
        .filter(|a| a.url.ends_with(extension))
        .collect();
    matching.get(skip - 1).map(|a| (*a).clone()).ok_or_else(|| {
        PipelineError::NotFound(format!(
            "release #{skip} with extension '{extension}' ({} available)",
            matching.len()
        ))
    })
}

/// Extract `<a href>` targets ending in a recognised suffix, newest first.
pub fn parse_release_index(html: &str, index_url: &str, suffixes: &[String]) -> Vec<ReleaseArtifact> {
    let document = Html::parse_document(html);
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = index_url.trim_end_matches('/');

    let mut artifacts: Vec<ReleaseArtifact> = document
        .select(&anchor)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| suffixes.iter().any(|s| href.ends_with(s.as_str())))
        .filter_map(|href| {
            // Listings may carry absolute or nested hrefs; only the basename matters
            let filename = href.rsplit('/').next().filter(|f| !f.is_empty())?;
            Some(ReleaseArtifact {
                url: format!("{base}/{filename}"),
                kind: ArtifactKind::from_filename(filename),
                order_key: filename.to_string(),
            })
        })
        .collect();

    artifacts.sort_by(|a, b| b.order_key.cmp(&a.order_key));
    artifacts.dedup_by(|a, b| a.order_key == b.order_key);
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE_HTML: &str = r#"<html><body><pre>
<a href="../">Parent Directory</a>
<a href="dblp-2021-10-01.xml.gz">dblp-2021-10-01.xml.gz</a>      2021-10-02 04:12  620M
<a href="dblp-2021-10-01.xml.gz.md5">dblp-2021-10-01.xml.gz.md5</a>  2021-10-02 04:12   57
<a href="dblp-2021-11-01.xml.gz">dblp-2021-11-01.xml.gz</a>      2021-11-02 04:10  625M
<a href="dblp-2021-11-01.xml.gz.md5">dblp-2021-11-01.xml.gz.md5</a>  2021-11-02 04:10   57
<a href="dblp-2021-11-01.dtd">dblp-2021-11-01.dtd</a>         2021-11-02 04:10   12K
<a href="README.txt">README.txt</a>
</pre></body></html>"#;

    fn suffixes() -> Vec<String> {
        DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_listing_sorted_descending() {
        let artifacts = parse_release_index(SAMPLE_HTML, "https://dblp.org/xml/release", &suffixes());
        let names: Vec<_> = artifacts.iter().map(|a| a.filename()).collect();
        assert_eq!(
            names,
            vec![
                "dblp-2021-11-01.xml.gz.md5",
                "dblp-2021-11-01.xml.gz",
                "dblp-2021-11-01.dtd",
                "dblp-2021-10-01.xml.gz.md5",
                "dblp-2021-10-01.xml.gz",
            ]
        );
        assert_eq!(
            artifacts[1].url,
            "https://dblp.org/xml/release/dblp-2021-11-01.xml.gz"
        );
    }

    #[test]
    fn artifact_kinds() {
        assert_eq!(ArtifactKind::from_filename("x.xml.gz.md5"), ArtifactKind::Checksum);
        assert_eq!(ArtifactKind::from_filename("x.dtd"), ArtifactKind::Schema);
        assert_eq!(ArtifactKind::from_filename("x.xml.gz"), ArtifactKind::Archive);
    }

    #[test]
    fn select_nth_latest() {
        let artifacts = parse_release_index(SAMPLE_HTML, "https://dblp.org/xml/release", &suffixes());
        let latest = select_latest(&artifacts, ".xml.gz", 1).unwrap();
        assert_eq!(latest.filename(), "dblp-2021-11-01.xml.gz");
        let previous = select_latest(&artifacts, ".xml.gz", 2).unwrap();
        assert_eq!(previous.filename(), "dblp-2021-10-01.xml.gz");
        assert!(matches!(
            select_latest(&artifacts, ".xml.gz", 3),
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            select_latest(&artifacts, ".xml.gz", 0),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn release_date_from_filename() {
        let a = ReleaseArtifact {
            url: String::new(),
            kind: ArtifactKind::Archive,
            order_key: "dblp-2021-11-01.xml.gz".into(),
        };
        assert_eq!(a.release_date(), Some("2021-11-01"));
        let b = ReleaseArtifact {
            order_key: "dblp.dtd".into(),
            ..a
        };
        assert_eq!(b.release_date(), None);
    }

    #[tokio::test]
    async fn listing_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xml/release"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_HTML))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = ReleaseCatalog::new(&format!("{}/xml/", server.uri()));
        let first = catalog.list_releases().await.unwrap().len();
        let second = catalog.list_releases().await.unwrap().len();
        assert_eq!(first, 5);
        assert_eq!(first, second);
        let schema = catalog.resolve_latest_schema().await.unwrap();
        assert_eq!(schema.kind, ArtifactKind::Schema);
    }
}
