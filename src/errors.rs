use crate::models::RecordId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("CONFIGURATION: {0}")]
    Configuration(String),
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),
    #[error("RECORD_NOT_FOUND: {type_tag} #{id}")]
    RecordNotFound { type_tag: String, id: RecordId },
    #[error("DECODE: {0}")]
    Decode(String),
    #[error("STORE: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("SERIALIZATION: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO_FAILURE: {0}")]
    Io(#[from] std::io::Error),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

pub type MergeResult<T> = Result<T, MergeError>;
