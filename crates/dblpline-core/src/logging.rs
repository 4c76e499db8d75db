//! Process-wide logging, configured once at startup.
//!
//! Components only use the `log` macros; nothing below the binary touches
//! logger state.

use indicatif::MultiProgress;

/// Logging choices derived from CLI flags, built once in `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub level: log::LevelFilter,
    /// Route lines through the progress-bar manager
    pub tty: bool,
}

impl LogConfig {
    /// TTY: warn unless verbose (bars show activity).
    /// Non-TTY: info unless verbose (logs are the only progress indicator).
    pub fn from_flags(verbose: bool, tty: bool) -> Self {
        let level = match (verbose, tty) {
            (true, _) => log::LevelFilter::Debug,
            (false, true) => log::LevelFilter::Warn,
            (false, false) => log::LevelFilter::Info,
        };
        Self { level, tty }
    }

    fn default_filter(&self) -> &'static str {
        match self.level {
            log::LevelFilter::Off => "off",
            log::LevelFilter::Error => "error",
            log::LevelFilter::Warn => "warn",
            log::LevelFilter::Info => "info",
            log::LevelFilter::Debug => "debug",
            log::LevelFilter::Trace => "trace",
        }
    }
}

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints through indicatif MultiProgress to avoid mixing with progress bars.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let (pre, label, post) = level_style(record.level(), true);
            let line = format!("[{pre}{label}{post}] {}", record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the global logger. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LogConfig, multi: Option<&MultiProgress>) {
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or(config.default_filter());

    match multi {
        Some(multi) if config.tty => {
            let logger = env_logger::Builder::from_env(env)
                .format_timestamp_millis()
                .build();
            let max_level = logger.filter();

            if log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone()))).is_ok()
            {
                log::set_max_level(max_level);
            }
        }
        _ => {
            // Non-TTY: no ANSI colors, plain labels for log aggregation
            let _ = env_logger::Builder::from_env(env)
                .format(|buf, record| {
                    let (_, label, _) = level_style(record.level(), false);
                    writeln!(buf, "[{label}] {}", record.args())
                })
                .try_init();
        }
    }
}
