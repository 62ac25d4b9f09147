//! Error types for the tunnel agent core.
//!
//! Following the teacher's split between typed boundary errors
//! (`thiserror`, used where callers branch on the failure kind) and
//! swallow-and-log failures (nothing further up the stack needs to see
//! per-request I/O errors — see `spec.md` §7).

use thiserror::Error;

/// Errors raised while loading or validating persisted configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid routing rule {pattern:?}: {reason}")]
    InvalidRule { pattern: String, reason: String },
}

/// Errors raised by the HTTP head parser (routing mode only).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum HeadParseError {
    #[error("connection closed before a complete request line was read")]
    Eof,

    #[error("request line exceeded the {0}-byte head buffer")]
    BufferFull(usize),

    #[error("request line did not tokenize into method/path/version")]
    MalformedRequestLine,

    #[error("request line was not valid UTF-8")]
    NotUtf8,
}
