//! Structured logging utilities for fsverify components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use fsverify_config::log_file_warn;
//!
//! log_file_warn!("File smaller than expected", path = display(path.display()), expected = 4096u64);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const FILE: &'static str = "FILE";
    pub const DIR: &'static str = "DIR";
    pub const DRIVER: &'static str = "DRIVER";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

// === FILE logging macros ===

#[macro_export]
macro_rules! log_file_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "FILE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_file_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "FILE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_file_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "FILE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_file_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FILE", $($key = $value,)* $msg)
    };
}

// === DIR logging macros ===

#[macro_export]
macro_rules! log_dir_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "DIR", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_dir_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "DIR", $($key = $value,)* $msg)
    };
}

// === DRIVER logging macros ===

#[macro_export]
macro_rules! log_driver_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "DRIVER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_driver_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "DRIVER", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `FSVERIFY_LOG` wins over `RUST_LOG`, which wins over `level`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("FSVERIFY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
