//! dblpline core - shared infrastructure for the DBLP release and crawl pipelines
//!
//! HTTP plumbing with a shared runtime, streamed downloads, MD5 integrity
//! checks, the error taxonomy, retry/back-off, logging, and progress.

pub mod error;
pub mod integrity;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod stream;

// Re-exports for convenience
pub use error::PipelineError;
pub use logging::{IndicatifLogger, LogConfig, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{RecordingSleeper, Sleeper, TokioSleeper, backoff_duration, retry_with_backoff};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use stream::{
    HttpConfig, SHARED_RUNTIME, StreamError, download_to_file, fetch_text, http_client,
    http_config, part_path, save_response, set_http_config,
};
