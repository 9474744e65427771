//! Error types for corpus loading and model training.

use std::path::PathBuf;

/// Errors raised while validating or reading a line corpus.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    /// The corpus file could not be opened, read or seeked.
    #[error("I/O error on corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two records produce the same tag.
    #[error("prefixes non-unique: tag {tag} appears on lines {first_line} and {line}")]
    Validation {
        tag: String,
        first_line: usize,
        line: usize,
    },

    /// A line without an identifier separated from its text by whitespace.
    #[error("malformed record on line {line}: {content:?}")]
    MalformedRecord { line: usize, content: String },

    /// A line that is not valid UTF-8.
    #[error("line {line} is not valid UTF-8")]
    Encoding { line: usize },

    /// A re-read line no longer carries the tag recorded at construction.
    #[error("corpus changed on disk: line {line} was {expected}, now {found}")]
    CorpusChanged {
        line: usize,
        expected: String,
        found: String,
    },

    #[error("unknown cleaning transform: {name}")]
    UnknownTransform { name: String },
}

impl CorpusError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CorpusError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the trainer and model persistence.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("vocabulary has not been built; call build_vocab first")]
    VocabularyNotBuilt,

    #[error("vocabulary is empty after applying min_count = {min_count}")]
    EmptyVocabulary { min_count: u64 },

    /// A pass produced a tag the model has no vector for.
    #[error("tag {tag} is not known to the model")]
    UnknownTag { tag: String },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model serialization failed: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl ModelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        ModelError::InvalidConfig {
            message: message.into(),
        }
    }
}
