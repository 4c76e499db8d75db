//! Error taxonomy for the release and crawl pipelines

use std::path::PathBuf;
use std::time::Duration;

use crate::stream::StreamError;

/// Failure of one pipeline step.
///
/// Integrity, not-found, and unsupported-feature errors are fatal for the
/// call that produced them. Transient and connection errors are recovered by
/// the component that observes them and only surface when retries are cut
/// short.
#[derive(Debug)]
pub enum PipelineError {
    /// Checksum mismatch after download
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    /// Requested release or record does not exist
    NotFound(String),
    /// 429 from a document host or 503 from the extraction service
    TransientService {
        status: u16,
        retry_after: Option<Duration>,
    },
    /// DNS / refused / timeout while fetching a document
    Connection(String),
    /// Configuration asks for something that has no implementation
    UnsupportedFeature(String),
    Stream(StreamError),
    Io(std::io::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integrity {
                path,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            ),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::TransientService {
                status,
                retry_after: Some(d),
            } => write!(f, "service unavailable (HTTP {status}), retry after {d:?}"),
            Self::TransientService {
                status,
                retry_after: None,
            } => write!(f, "service unavailable (HTTP {status})"),
            Self::Connection(msg) => write!(f, "connection failed: {msg}"),
            Self::UnsupportedFeature(what) => write!(f, "unsupported: {what}"),
            Self::Stream(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "IO: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stream(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StreamError> for PipelineError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl PipelineError {
    /// Whether the run must stop rather than record a miss and carry on.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Integrity { .. } | Self::NotFound(_) | Self::UnsupportedFeature(_) => true,
            Self::TransientService { .. } | Self::Connection(_) => false,
            Self::Stream(e) => !e.is_retryable(),
            Self::Io(e) => e.kind() == std::io::ErrorKind::StorageFull,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService { .. })
    }
}
