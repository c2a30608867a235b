use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque, directly displayable image reference (a data URI on the
/// reference server). Clones share the underlying text.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload(Arc<str>);

impl ImagePayload {
    pub fn new(reference: impl Into<Arc<str>>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Payloads are large base64 blobs; keep them out of debug output and logs.
impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImagePayload({} bytes)", self.0.len())
    }
}

impl From<String> for ImagePayload {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<&str> for ImagePayload {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub page_number: usize,
    pub payload: ImagePayload,
}

/// Page payloads fetched during one reading session, keyed by page number.
/// Unbounded: everything fetched stays resident until `clear`.
#[derive(Debug, Default)]
pub struct PageCache {
    pages: HashMap<usize, PageRecord>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, page_number: usize) -> Option<PageRecord> {
        self.pages.get(&page_number).cloned()
    }

    pub fn put(&mut self, page_number: usize, payload: ImagePayload) {
        self.pages.insert(
            page_number,
            PageRecord {
                page_number,
                payload,
            },
        );
    }

    pub fn has(&self, page_number: usize) -> bool {
        self.pages.contains_key(&page_number)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Cached page numbers in ascending order.
    pub fn pages(&self) -> Vec<usize> {
        let mut pages: Vec<_> = self.pages.keys().copied().collect();
        pages.sort_unstable();
        pages
    }
}
