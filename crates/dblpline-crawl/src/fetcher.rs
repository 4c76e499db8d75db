//! Per-record document download
//!
//! Each record is one task. A task holds a semaphore permit only while a
//! request is on the wire; rate-limit sleeps and HTML parsing happen after
//! the permit is released.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dblpline_core::{
    PipelineError, Sleeper, TokioSleeper, http_client, is_shutdown_requested, save_response,
};
use futures_util::future::join_all;
use indicatif::ProgressBar;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use tokio::sync::Semaphore;

use crate::matcher::select_document_link;
use crate::scheduler::CrawlChunk;

/// Outcome for one record; `local_path` is `None` for a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub key: String,
    pub local_path: Option<PathBuf>,
}

impl FetchResult {
    pub fn hit(key: &str, path: PathBuf) -> Self {
        Self {
            key: key.to_string(),
            local_path: Some(path),
        }
    }

    pub fn miss(key: &str) -> Self {
        Self {
            key: key.to_string(),
            local_path: None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.local_path.is_some()
    }
}

/// `conf/acl/Chen21` → `conf_acl_Chen21`
///
/// The mapping is one-to-one: `/` becomes `_`, while `_`, `%` and any other
/// byte outside `[A-Za-z0-9.-]` is percent-encoded.
pub fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'/' => out.push('_'),
            b if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' => out.push(char::from(b)),
            b => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Delta-seconds `Retry-After`; anything else waits one second.
pub fn parse_retry_after(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(Duration::from_secs(1), Duration::from_secs)
}

enum Body {
    Document,
    Landing,
    Other(String),
}

fn classify(content_type: Option<&str>) -> Body {
    let mime = content_type
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "application/pdf" | "application/x-pdf" | "application/octet-stream" => Body::Document,
        "text/html" | "application/xhtml+xml" => Body::Landing,
        _ => Body::Other(mime),
    }
}

#[derive(Clone)]
pub struct DocumentFetcher {
    client: reqwest::Client,
    sleeper: Arc<dyn Sleeper>,
    timeout: Duration,
    cancelled: fn() -> bool,
}

impl DocumentFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client().clone(),
            sleeper: Arc::new(TokioSleeper),
            timeout,
            cancelled: is_shutdown_requested,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the run-level cancellation check (defaults to the shutdown flag).
    pub fn with_cancel_check(mut self, cancelled: fn() -> bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Fetch every target of `chunk` into `dir`, at most `max_concurrent` at a time.
    pub async fn fetch_chunk(
        &self,
        chunk: &CrawlChunk,
        dir: &Path,
        max_concurrent: usize,
    ) -> Vec<FetchResult> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let handles: Vec<_> = chunk
            .targets
            .iter()
            .map(|target| {
                let fetcher = self.clone();
                let semaphore = Arc::clone(&semaphore);
                let (url, key, dir) = (target.url.clone(), target.key.clone(), dir.to_path_buf());
                tokio::spawn(async move { fetcher.fetch_one(&url, &key, &dir, &semaphore).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(&chunk.targets)
            .map(|(joined, target)| {
                joined.unwrap_or_else(|e| {
                    log::error!("{}: fetch task failed: {e}", target.key);
                    FetchResult::miss(&target.key)
                })
            })
            .collect()
    }

    /// Fetch one record. Every failure is logged and becomes a miss.
    pub async fn fetch_one(
        &self,
        url: &str,
        key: &str,
        dir: &Path,
        semaphore: &Semaphore,
    ) -> FetchResult {
        match self.try_fetch(url, key, dir, semaphore).await {
            Ok(path) => FetchResult::hit(key, path),
            Err(PipelineError::Connection(msg)) => {
                log::warn!("{key}: {url}: {msg}");
                FetchResult::miss(key)
            }
            Err(e) => {
                log::info!("{key}: {url}: {e}");
                FetchResult::miss(key)
            }
        }
    }

    async fn try_fetch(
        &self,
        url: &str,
        key: &str,
        dir: &Path,
        semaphore: &Semaphore,
    ) -> Result<PathBuf, PipelineError> {
        let mut current = Url::parse(url)
            .map_err(|e| PipelineError::NotFound(format!("invalid url {url}: {e}")))?;
        let mut followed_landing = false;

        loop {
            if (self.cancelled)() {
                return Err(PipelineError::Connection("cancelled".into()));
            }

            let permit = semaphore
                .acquire()
                .await
                .map_err(|_| PipelineError::Connection("semaphore closed".into()))?;

            let response = match tokio::time::timeout(
                self.timeout,
                self.client.get(current.clone()).send(),
            )
            .await
            {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => return Err(PipelineError::Connection(e.to_string())),
                Err(_) => {
                    return Err(PipelineError::Connection(format!(
                        "timed out after {:?}",
                        self.timeout
                    )));
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = parse_retry_after(
                    response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                );
                drop(response);
                drop(permit);
                log::debug!("{key}: 429 from {current}, retrying in {wait:?}");
                self.sleeper.sleep(wait).await;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Err(PipelineError::NotFound(current.to_string()));
            }
            if !status.is_success() {
                return Err(PipelineError::Stream(dblpline_core::StreamError::Http {
                    status: Some(status.as_u16()),
                    message: format!("{current}"),
                }));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            match classify(content_type.as_deref()) {
                Body::Document => {
                    let dest = dir.join(format!("{}.pdf", sanitize_key(key)));
                    let saved = tokio::time::timeout(
                        self.timeout,
                        save_response(response, &dest, &ProgressBar::hidden()),
                    )
                    .await;
                    drop(permit);
                    return match saved {
                        Ok(Ok(_)) => Ok(dest),
                        Ok(Err(e)) => Err(PipelineError::Connection(e.to_string())),
                        Err(_) => Err(PipelineError::Connection(format!(
                            "body timed out after {:?}",
                            self.timeout
                        ))),
                    };
                }
                Body::Landing if !followed_landing => {
                    let html = tokio::time::timeout(self.timeout, response.text()).await;
                    drop(permit);
                    let html = match html {
                        Ok(Ok(html)) => html,
                        Ok(Err(e)) => return Err(PipelineError::Connection(e.to_string())),
                        Err(_) => {
                            return Err(PipelineError::Connection("landing page timed out".into()));
                        }
                    };
                    current = select_document_link(&html, &current).ok_or_else(|| {
                        PipelineError::NotFound(format!("no document link on {current}"))
                    })?;
                    followed_landing = true;
                }
                Body::Landing => {
                    return Err(PipelineError::NotFound(format!(
                        "document link {current} served another HTML page"
                    )));
                }
                Body::Other(mime) => {
                    return Err(PipelineError::NotFound(format!(
                        "{current} served unsupported content type '{mime}'"
                    )));
                }
            }
        }
    }
}
