//! Error types shared by the rule manager components.
//!
//! Nothing here crosses the [`crate::manager::RuleManager`] boundary: the
//! manager logs every `RuleError` and falls back to a safe default.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::rule::RuleKey;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid rule JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A script rule threw while being evaluated.
    #[error("script rule '{label}' failed: {message}")]
    Script { label: String, message: String },

    /// The style sheet service refused a sheet.
    #[error("style rule '{label}' could not be registered: {message}")]
    Style { label: String, message: String },

    #[error("unknown rule {0}")]
    UnknownRule(RuleKey),

    /// A dependency path resolved outside the directory it must stay in.
    #[error("path {path} escapes {root}")]
    PathEscape { path: PathBuf, root: PathBuf },
}

impl RuleError {
    /// Wraps an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
