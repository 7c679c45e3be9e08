//! Error taxonomy for the ingestion and answering pipeline.
//!
//! Every fallible library operation returns [`Result`]. Variants map onto
//! how callers are expected to react:
//!
//! | Variant | Scope | Reaction |
//! |---------|-------|----------|
//! | [`Error::Configuration`] | startup | refuse to start |
//! | [`Error::UnreadableSource`] | one document | log, skip, keep ingesting |
//! | [`Error::EmbeddingUnavailable`] | one batch / query | already retried; surface |
//! | [`Error::GenerationUnavailable`] | one query | already retried; surface |
//! | [`Error::IndexUnavailable`] | one store operation | surface, no retry |
//! | [`Error::InvalidQuery`] | one request | reject the request |

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unreadable source {}: {reason}", path.display())]
    UnreadableSource { path: PathBuf, reason: String },

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::UnreadableSource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures of a backing service rather than of the request.
    ///
    /// Used by transports to tell "could not answer right now" apart from
    /// "the request was wrong".
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingUnavailable(_)
                | Error::GenerationUnavailable(_)
                | Error::IndexUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::IndexUnavailable(e.to_string())
    }
}
