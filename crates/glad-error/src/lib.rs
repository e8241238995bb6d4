use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Primary error type for Global LAD operations.
///
/// Binary-format and markup failures abort the operation that hit them.
/// Query failures are transient and may be retried by the wait engine.
#[derive(Error, Debug)]
pub enum GladError {
    // === Binary record errors ===
    /// A LAD record is malformed (bad length, short buffer, inconsistent header).
    #[error("malformed LAD record: {detail}")]
    Format { detail: String },

    /// Input ended partway through a record during a whole-file scan.
    #[error(
        "truncated LAD record #{record_index} at byte offset {offset}: expected {expected} bytes, got {actual}"
    )]
    TruncatedRecord {
        record_index: u64,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// Adding the delta to a session id left the 32-bit field range.
    #[error("session id {session_id} + delta {delta} overflows the 4-byte session field")]
    SessionIdOverflow { session_id: u32, delta: i64 },

    // === Markup errors ===
    /// Query response markup is malformed or a row cannot be decoded.
    #[error("parse error at line {line}, column {column}: {detail}")]
    Parse {
        line: u64,
        column: u64,
        detail: String,
    },

    // === Wait errors ===
    /// A wait condition was never satisfied within its budget.
    #[error("condition not satisfied within {} seconds", display_seconds(.timeout))]
    Timeout { timeout: Duration, attempts: u64 },

    /// A wait was cancelled through its cancellation handle.
    #[error("wait cancelled after {attempts} poll attempts")]
    Cancelled { attempts: u64 },

    /// A single query round failed (endpoint error, non-zero exit).
    #[error("telemetry query failed: {detail}")]
    Query { detail: String },

    // === Configuration errors ===
    /// Missing or invalid session/endpoint parameters.
    #[error("configuration error: {detail}")]
    Configuration { detail: String },

    /// Input file does not exist.
    #[error("backup file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    // === I/O errors ===
    /// File or pipe I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Internal errors ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error classification.
///
/// The discriminant doubles as the process exit code used by the `glad` CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    /// Generic failure.
    Error = 1,
    /// Binary record malformed or truncated.
    Format = 3,
    /// Markup malformed.
    Parse = 4,
    /// Condition not satisfied in time.
    Timeout = 5,
    /// Wait cancelled by the caller.
    Cancelled = 6,
    /// Query endpoint failure.
    Query = 7,
    /// Missing or invalid configuration.
    Configuration = 8,
    /// I/O failure.
    Io = 9,
    /// Internal logic error.
    Internal = 10,
}

impl GladError {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Format { .. } | Self::TruncatedRecord { .. } => ErrorKind::Format,
            Self::SessionIdOverflow { .. } => ErrorKind::Error,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Query { .. } => ErrorKind::Query,
            Self::Configuration { .. } | Self::FileNotFound { .. } => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a poll round failing with this error may simply be retried.
    ///
    /// Format and parse errors mean the server contract itself is broken, so
    /// they are never transient.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::Io(_))
    }

    /// Whether this error violates the record or response protocol.
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::Format { .. } | Self::TruncatedRecord { .. } | Self::Parse { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::TruncatedRecord { .. } => {
                Some("The backup file ends mid-record; restore it from the original source")
            }
            Self::SessionIdOverflow { .. } => {
                Some("Choose a delta that keeps every session id within 0..=4294967295")
            }
            Self::Timeout { .. } => {
                Some("Increase the timeout or lookback, or check that the session is live")
            }
            Self::Configuration { .. } => {
                Some("Check the session id and query command in the wait configuration")
            }
            Self::FileNotFound { .. } => Some("Check the backup file path"),
            _ => None,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        self.kind() as i32
    }

    /// Create a record format error.
    pub fn format(detail: impl Into<String>) -> Self {
        Self::Format {
            detail: detail.into(),
        }
    }

    /// Create a markup parse error.
    pub fn parse(line: u64, column: u64, detail: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            detail: detail.into(),
        }
    }

    /// Create a query error.
    pub fn query(detail: impl Into<String>) -> Self {
        Self::Query {
            detail: detail.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Render a duration as seconds without a trailing `.0` for whole values.
fn display_seconds(timeout: &Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        timeout.as_secs().to_string()
    } else {
        format!("{:.3}", timeout.as_secs_f64())
    }
}

/// Result type alias using `GladError`.
pub type Result<T> = std::result::Result<T, GladError>;
