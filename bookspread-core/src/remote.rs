//! Interface of the remote paging service the controller drives.

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::ImagePayload;
use crate::DocumentId;

/// Marker the service puts in the error message when a next/prev request
/// would move past either end of the book.
pub const BOUNDARY_MARKER: &str = "Cannot navigate";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("{message} (status {status})")]
    Service { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// True for the no-op failure reported at the first/last spread.
    pub fn is_boundary(&self) -> bool {
        matches!(self, RemoteError::Service { message, .. } if message.contains(BOUNDARY_MARKER))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub page_number: usize,
    /// `None` when the server could not render the page.
    pub image: Option<ImagePayload>,
}

/// Server-confirmed state after a navigation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadSnapshot {
    pub current_page: usize,
    pub total_pages: Option<usize>,
    pub left: Option<RemotePage>,
    pub right: Option<RemotePage>,
}

impl SpreadSnapshot {
    pub fn pages(&self) -> impl Iterator<Item = &RemotePage> {
        self.left.iter().chain(self.right.iter())
    }
}

#[async_trait]
pub trait PagingService: Send + Sync {
    /// Opens a server-side session and reports the page count.
    async fn initialize(&self, document: &DocumentId) -> Result<usize, RemoteError>;

    async fn current_spread(&self, document: &DocumentId) -> Result<SpreadSnapshot, RemoteError>;

    async fn navigate_next(&self, document: &DocumentId) -> Result<SpreadSnapshot, RemoteError>;

    async fn navigate_prev(&self, document: &DocumentId) -> Result<SpreadSnapshot, RemoteError>;

    async fn goto(&self, document: &DocumentId, page: usize)
        -> Result<SpreadSnapshot, RemoteError>;

    async fn fetch_page(
        &self,
        document: &DocumentId,
        page: usize,
    ) -> Result<ImagePayload, RemoteError>;

    /// Drops the server-side session. Duplicate calls must be harmless.
    async fn cleanup(&self, document: &DocumentId) -> Result<(), RemoteError>;
}
