//! Logging setup: env_logger, routed through indicatif when a spinner is live

use indicatif::MultiProgress;

/// Padded label and (optional) ANSI color for a log level.
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

/// Default filter when `RUST_LOG` is unset.
fn default_filter(quiet: bool, debug: bool) -> &'static str {
    if debug {
        "signpipe_core=debug,signpipe=debug,info"
    } else if quiet {
        "warn"
    } else {
        "info"
    }
}

/// Prints through `MultiProgress` so log lines don't tear the spinner.
pub struct SpinnerLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl SpinnerLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for SpinnerLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.enabled(record.metadata()) {
            return;
        }
        let (pre, label, post) = level_style(record.level(), true);
        let line = if record.level() >= log::Level::Debug {
            format!("[{pre}{label}{post}] {}: {}", record.target(), record.args())
        } else {
            format!("[{pre}{label}{post}] {}", record.args())
        };
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the global logger.
///
/// With `multi` (TTY mode) lines go through indicatif; otherwise plain
/// `[LEVEL] message` lines without color for log collectors. `RUST_LOG`
/// overrides the default level. Calling this twice is a no-op.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or(default_filter(quiet, debug));

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env).build();
        let max_level = logger.filter();
        if log::set_boxed_logger(Box::new(SpinnerLogger::new(logger, multi.clone()))).is_ok() {
            log::set_max_level(max_level);
        }
    } else {
        let _ = env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let (_, label, _) = level_style(record.level(), false);
                writeln!(buf, "[{label}] {}", record.args())
            })
            .try_init();
    }
}
