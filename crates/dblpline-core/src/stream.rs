//! Shared HTTP client, runtime, and streamed downloads.
//!
//! Network calls are async (reqwest on tokio). Sync call sites bridge through
//! [`SHARED_RUNTIME`] so rayon workers and scoped threads can drive them.

use std::path::{Path, PathBuf};
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::ProgressBar;
use tokio::io::AsyncWriteExt;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error types for stream operations
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // Missing releases and auth failures won't fix themselves
            Self::Http { status, .. } => {
                !matches!(status, Some(s) if (400..500).contains(s) && *s != 429)
            }
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            Self::Io(_) => None,
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// HTTP tuning shared by every component.
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    /// Upper bound for a single request (connect + full body)
    pub request_timeout: Duration,
    /// Stall detection: no bytes within this window aborts a streamed body
    pub read_timeout: Duration,
    /// Retry budget for transient release-index / artifact failures
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install the process-wide HTTP config. Only the first call has an effect.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP config already set, ignoring override");
    }
}

/// Effective HTTP config (defaults until [`set_http_config`] runs).
pub fn http_config() -> HttpConfig {
    HTTP_CONFIG.get().copied().unwrap_or_default()
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .user_agent(concat!("dblpline/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// GET a small text resource (index pages, checksum side-files).
pub async fn fetch_text(url: &str) -> Result<String, StreamError> {
    let timeout = http_config().request_timeout;
    let request = async {
        http_client()
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamError::from_reqwest(&e))?
            .text()
            .await
            .map_err(|e| StreamError::from_reqwest(&e))
    };
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(StreamError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("request timed out after {timeout:?}"),
        ))),
    }
}

/// Path of the in-progress sibling used while streaming `dest`.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Stream `url` to `dest` in chunks, never buffering the whole body.
///
/// Bytes land in `<dest>.part` and are renamed into place only after the
/// body ends, so an interrupted transfer never looks complete.
/// Returns the number of bytes written.
pub async fn download_to_file(
    url: &str,
    dest: &Path,
    pb: &ProgressBar,
) -> Result<u64, StreamError> {
    let response = http_client()
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| StreamError::from_reqwest(&e))?;
    save_response(response, dest, pb).await
}

/// Write an already-received response body to `dest` via `<dest>.part`.
pub async fn save_response(
    response: reqwest::Response,
    dest: &Path,
    pb: &ProgressBar,
) -> Result<u64, StreamError> {
    let read_timeout = http_config().read_timeout;
    if let Some(total) = response.content_length() {
        crate::progress::upgrade_to_bar(pb, total);
    }

    let tmp = part_path(dest);
    let mut file = tokio::fs::File::create(&tmp).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let next = match tokio::time::timeout(read_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                return Err(StreamError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("read timeout ({read_timeout:?} with no data)"),
                )));
            }
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| StreamError::from_reqwest(&e))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&tmp, dest).await?;
    Ok(written)
}
