use crate::encoding::EncodingError;

/// Default labels carried by the not-found and exists errors.
///
/// Definitions fall back to these unless a caller overrides them, so an
/// error can be matched by variant and label without string inspection.
pub mod sentinel {
    pub const KEY: &str = "key";
    pub const VALUE: &str = "value";
    pub const LEFT: &str = "left";
    pub const RIGHT: &str = "right";
    pub const ASSOCIATION: &str = "association";
    pub const COLLECTION: &str = "collection";
    pub const LIST: &str = "list";
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for every structure in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    KeyExists(&'static str),
    #[error("{0} already exists")]
    ValueExists(&'static str),
    #[error("{0} already exists")]
    LeftExists(&'static str),
    #[error("{0} already exists")]
    RightExists(&'static str),
    #[error("invalid page number {0}: pages are numbered from 1")]
    InvalidPageNumber(i64),
    #[error("{context}: {source}")]
    Encode {
        context: &'static str,
        source: EncodingError,
    },
    #[error("{context}: {source}")]
    Decode {
        context: &'static str,
        source: EncodingError,
    },
    /// An index entry without its counterpart. The stored structure was
    /// modified outside of this crate and can no longer be trusted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an error raised by the storage backend.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Store(Box::new(err))
    }

    pub(crate) fn corrupted(message: impl Into<String>) -> Self {
        let message = message.into();
        log::warn!("consistency violation: {message}");
        Error::Corrupted(message)
    }

    /// Returns true for the not-found variant, whatever its label.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
