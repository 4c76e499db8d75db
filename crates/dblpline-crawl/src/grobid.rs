//! GROBID extraction client
//!
//! Posts every downloaded PDF of a chunk directory to a GROBID server and
//! writes the returned TEI next to it as `<stem>.tei.xml`. A 503 means the
//! server queue is full: the same request is retried after `sleep`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dblpline_core::{
    PipelineError, SHARED_RUNTIME, Sleeper, StreamError, TokioSleeper, http_client,
    is_shutdown_requested,
};
use futures_util::{StreamExt, stream};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// GROBID endpoint, named as in its REST API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrobidService {
    #[serde(rename = "processFulltextDocument")]
    FulltextDocument,
    #[serde(rename = "processHeaderDocument")]
    HeaderDocument,
    #[serde(rename = "processReferences")]
    References,
    #[serde(rename = "processCitationList")]
    CitationList,
}

impl GrobidService {
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::FulltextDocument => "processFulltextDocument",
            Self::HeaderDocument => "processHeaderDocument",
            Self::References => "processReferences",
            Self::CitationList => "processCitationList",
        }
    }
}

impl std::fmt::Display for GrobidService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.endpoint())
    }
}

impl FromStr for GrobidService {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processFulltextDocument" | "fulltext" => Ok(Self::FulltextDocument),
            "processHeaderDocument" | "header" => Ok(Self::HeaderDocument),
            "processReferences" | "references" => Ok(Self::References),
            "processCitationList" | "citations" => Ok(Self::CitationList),
            other => Err(format!("unknown GROBID service '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GrobidConfig {
    /// Scheme and host, e.g. `http://localhost`
    pub server: String,
    pub port: Option<u16>,
    pub service: GrobidService,
    /// Concurrent requests within one batch
    pub threads: usize,
    pub batch_size: usize,
    pub generate_ids: bool,
    pub consolidate_header: bool,
    pub consolidate_citations: bool,
    pub include_raw_citations: bool,
    pub include_raw_affiliations: bool,
    pub tei_coordinates: bool,
    pub segment_sentences: bool,
    /// Wait before re-sending a request answered with 503
    pub sleep: Duration,
    pub timeout: Duration,
    /// Re-extract PDFs that already have a TEI sibling
    pub force: bool,
    /// Elements GROBID annotates with coordinates when `tei_coordinates` is set
    pub coordinate_elements: Vec<String>,
}

impl Default for GrobidConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost".into(),
            port: Some(8070),
            service: GrobidService::HeaderDocument,
            threads: num_cpus(),
            batch_size: 100,
            generate_ids: false,
            consolidate_header: false,
            consolidate_citations: false,
            include_raw_citations: false,
            include_raw_affiliations: false,
            tei_coordinates: false,
            segment_sentences: false,
            sleep: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            force: false,
            coordinate_elements: ["persName", "figure", "ref", "biblStruct", "formula", "s"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl GrobidConfig {
    /// Reject configurations that cannot run, before any network activity.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.service == GrobidService::CitationList {
            return Err(PipelineError::UnsupportedFeature(
                "GROBID processCitationList takes plain-text citations, not crawled PDFs".into(),
            ));
        }
        if self.batch_size == 0 || self.threads == 0 {
            return Err(PipelineError::UnsupportedFeature(
                "GROBID batch_size and threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        let server = self.server.trim_end_matches('/');
        match self.port {
            Some(port) => format!("{server}:{port}"),
            None => server.to_string(),
        }
    }

    fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        let flags = [
            ("generateIDs", self.generate_ids),
            ("consolidateHeader", self.consolidate_header),
            ("consolidateCitations", self.consolidate_citations),
            ("includeRawCitations", self.include_raw_citations),
            ("includeRawAffiliations", self.include_raw_affiliations),
            ("segmentSentences", self.segment_sentences),
        ];
        for (name, on) in flags {
            if on {
                fields.push((name, "1".to_string()));
            }
        }
        if self.tei_coordinates {
            for element in &self.coordinate_elements {
                fields.push(("teiCoordinates", element.clone()));
            }
        }
        fields
    }
}

/// Per-directory extraction counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Process stage of the crawl: turn the documents in `dir` into extracted files.
pub trait Extractor: Send + Sync {
    fn process_directory(&self, dir: &Path) -> Result<ExtractStats, PipelineError>;
}

/// `paper.pdf` → `paper.tei.xml`
pub fn tei_path(pdf: &Path) -> PathBuf {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    pdf.with_file_name(format!("{stem}.tei.xml"))
}

fn list_pdfs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    Ok(pdfs)
}

pub struct GrobidClient {
    config: GrobidConfig,
    client: reqwest::Client,
    sleeper: Arc<dyn Sleeper>,
}

impl GrobidClient {
    pub fn new(config: GrobidConfig) -> Self {
        Self {
            config,
            client: http_client().clone(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &GrobidConfig {
        &self.config
    }

    /// `GET /api/isalive`; anything but 200 means the server cannot take work.
    pub async fn check_alive(&self) -> Result<(), PipelineError> {
        let url = format!("{}/api/isalive", self.config.base_url());
        let response = tokio::time::timeout(self.config.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| PipelineError::Connection(format!("{url}: timed out")))?
            .map_err(|e| PipelineError::Connection(format!("GROBID at {url}: {e}")))?;
        if response.status() != StatusCode::OK {
            return Err(PipelineError::Connection(format!(
                "GROBID at {url} answered HTTP {}",
                response.status().as_u16()
            )));
        }
        log::debug!("GROBID server at {} is up", self.config.base_url());
        Ok(())
    }

    fn build_form(&self, pdf: &Path, bytes: Bytes) -> Result<Form, PipelineError> {
        let name = pdf
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.pdf".into());
        let len = bytes.len() as u64;
        let part = Part::stream_with_length(bytes, len)
            .file_name(name)
            .mime_str("application/pdf")
            .map_err(|e| PipelineError::Stream(StreamError::from_reqwest(&e)))?;
        let mut form = Form::new().part("input", part);
        for (name, value) in self.config.form_fields() {
            form = form.text(name, value);
        }
        Ok(form)
    }

    /// Extract one PDF and write its TEI sibling, retrying 503 after `sleep`.
    pub async fn process_pdf(&self, pdf: &Path) -> Result<PathBuf, PipelineError> {
        let url = format!("{}/api/{}", self.config.base_url(), self.config.service);
        // read once; every 503 retry shares the buffer
        let bytes = Bytes::from(tokio::fs::read(pdf).await?);

        let response = loop {
            let form = self.build_form(pdf, bytes.clone())?;
            let sent = tokio::time::timeout(
                self.config.timeout,
                self.client.post(&url).multipart(form).send(),
            )
            .await;
            let response = match sent {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => return Err(PipelineError::Connection(e.to_string())),
                Err(_) => {
                    return Err(PipelineError::Connection(format!(
                        "{url}: timed out after {:?}",
                        self.config.timeout
                    )));
                }
            };

            if response.status() != StatusCode::SERVICE_UNAVAILABLE {
                break response;
            }
            if is_shutdown_requested() {
                return Err(PipelineError::TransientService {
                    status: 503,
                    retry_after: Some(self.config.sleep),
                });
            }
            log::debug!(
                "{}: GROBID busy, retrying in {:?}",
                pdf.display(),
                self.config.sleep
            );
            self.sleeper.sleep(self.config.sleep).await;
        };

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Stream(StreamError::Http {
                status: Some(status.as_u16()),
                message: format!("GROBID rejected {}", pdf.display()),
            }));
        }
        let tei = tokio::time::timeout(self.config.timeout, response.text())
            .await
            .map_err(|_| PipelineError::Connection(format!("{url}: body timed out")))?
            .map_err(|e| PipelineError::Connection(e.to_string()))?;

        let dest = tei_path(pdf);
        let tmp = dest.with_extension("xml.tmp");
        tokio::fs::write(&tmp, tei.as_bytes()).await?;
        tokio::fs::rename(&tmp, &dest).await?;
        Ok(dest)
    }

    /// Extract every PDF in `dir` in batches of `batch_size`, `threads` at a time.
    ///
    /// Individual failures are counted, not returned. The call fails only
    /// when the directory cannot be read or the server was unreachable for
    /// every document it was sent.
    pub async fn extract_directory(&self, dir: &Path) -> Result<ExtractStats, PipelineError> {
        let mut stats = ExtractStats::default();
        let mut pending = Vec::new();
        for pdf in list_pdfs(dir)? {
            if !self.config.force && tei_path(&pdf).exists() {
                log::debug!("{}: TEI exists, skipping", pdf.display());
                stats.skipped += 1;
            } else {
                pending.push(pdf);
            }
        }

        let mut unreachable = 0;
        for batch in pending.chunks(self.config.batch_size.max(1)) {
            let outcomes: Vec<_> = stream::iter(batch)
                .map(|pdf| async move { (pdf, self.process_pdf(pdf).await) })
                .buffer_unordered(self.config.threads.max(1))
                .collect()
                .await;

            for (pdf, outcome) in outcomes {
                match outcome {
                    Ok(_) => stats.processed += 1,
                    Err(e) => {
                        if matches!(e, PipelineError::Connection(_)) {
                            unreachable += 1;
                        }
                        log::warn!("{}: extraction failed: {e}", pdf.display());
                        stats.failed += 1;
                    }
                }
            }
        }

        if unreachable > 0 && unreachable == pending.len() {
            return Err(PipelineError::Connection(format!(
                "GROBID at {} unreachable for all {unreachable} documents",
                self.config.base_url()
            )));
        }
        Ok(stats)
    }
}

impl Extractor for GrobidClient {
    fn process_directory(&self, dir: &Path) -> Result<ExtractStats, PipelineError> {
        SHARED_RUNTIME.handle().block_on(self.extract_directory(dir))
    }
}
