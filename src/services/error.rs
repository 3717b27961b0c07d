use crate::services::{backend::BackendError, options::OptionsError};
use thiserror::Error;

/// Errors surfaced at the repository boundary.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage backend unavailable while {context}: {source}")]
    BackendUnavailable {
        context: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to create container `{name}`: {source}")]
    ContainerCreationFailed {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("copy source `{0}` does not exist")]
    SourceNotFound(String),

    #[error("no active container set")]
    NoActiveContainer,

    #[error("uri `{0}` does not address a blob of this account")]
    InvalidUri(String),

    #[error("invalid SAS configuration: {0}")]
    InvalidSasConfiguration(String),

    #[error("invalid storage configuration: {0}")]
    Configuration(#[from] OptionsError),

    #[error("copy into `{target}` failed: {reason}")]
    CopyFailed { target: String, reason: String },

    #[error("invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn backend(context: impl Into<String>, source: BackendError) -> Self {
        RepositoryError::BackendUnavailable {
            context: context.into(),
            source,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
