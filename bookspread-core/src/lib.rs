//! Navigation-and-cache engine for reading a remotely rendered book two
//! pages at a time.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod remote;
pub mod spread;

pub use cache::{ImagePayload, PageCache, PageRecord};
pub use config::{ConfigError, NavigationPolicy, ReaderConfig};
pub use controller::{
    BookSession, Navigation, NavigationController, PageSlot, Phase, SpreadView, UnloadGuard,
};
pub use error::{ErrorKind, ReaderError};
pub use events::{EventQueue, PresentationHooks, ReaderEvent};
pub use remote::{PagingService, RemoteError, RemotePage, SpreadSnapshot};
pub use spread::{Spread, SpreadModel};

/// Identifier of a document on the remote paging service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NextSpread,
    PrevSpread,
    GoTo { page: usize },
    Refresh,
    Close,
}
