use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Initialization,
    OutOfRange,
    Busy,
    PageFetch,
    Closed,
    Network,
    Service,
    NotInitialized,
    AlreadyOpen,
}

impl ErrorKind {
    /// Whether the reader can keep going after this error.
    pub fn is_recoverable(self) -> bool {
        !matches!(
            self,
            ErrorKind::Initialization | ErrorKind::Closed | ErrorKind::NotInitialized
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReaderError {
    #[error("failed to open document: {message}")]
    Initialization { message: String },

    #[error("page {page} is outside 1..={total}")]
    OutOfRange { page: usize, total: usize },

    #[error("a navigation is already in flight")]
    Busy,

    #[error("failed to load page {page}: {message}")]
    PageFetch { page: usize, message: String },

    #[error("reader is closed")]
    Closed,

    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected the request: {message}")]
    Service { message: String },

    #[error("no document has been opened")]
    NotInitialized,

    #[error("document {document} is already open")]
    AlreadyOpen { document: String },
}

impl ReaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReaderError::Initialization { .. } => ErrorKind::Initialization,
            ReaderError::OutOfRange { .. } => ErrorKind::OutOfRange,
            ReaderError::Busy => ErrorKind::Busy,
            ReaderError::PageFetch { .. } => ErrorKind::PageFetch,
            ReaderError::Closed => ErrorKind::Closed,
            ReaderError::Network(_) => ErrorKind::Network,
            ReaderError::Service { .. } => ErrorKind::Service,
            ReaderError::NotInitialized => ErrorKind::NotInitialized,
            ReaderError::AlreadyOpen { .. } => ErrorKind::AlreadyOpen,
        }
    }

    pub(crate) fn from_initialize(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(message) => ReaderError::Network(message),
            other => ReaderError::Initialization {
                message: other.to_string(),
            },
        }
    }

    pub(crate) fn from_navigation(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(message) => ReaderError::Network(message),
            RemoteError::Service { message, .. } => ReaderError::Service { message },
            RemoteError::Decode(message) => ReaderError::Service { message },
        }
    }
}
