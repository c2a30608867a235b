//! Position and bounds arithmetic for two-page spreads.

/// The pair of pages shown side by side. `right` is `None` on the last page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Spread {
    pub left: usize,
    pub right: Option<usize>,
}

impl Spread {
    pub fn pages(&self) -> impl Iterator<Item = usize> {
        std::iter::once(self.left).chain(self.right)
    }
}

/// Pure view over a position within a document of `total_pages` pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpreadModel {
    position: usize,
    total_pages: usize,
}

impl SpreadModel {
    /// Builds a model, clamping `position` into `1..=total_pages`.
    pub fn new(position: usize, total_pages: usize) -> Self {
        let total_pages = total_pages.max(1);
        Self {
            position: position.clamp(1, total_pages),
            total_pages,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn spread(&self) -> Spread {
        let right = (self.position < self.total_pages).then_some(self.position + 1);
        Spread {
            left: self.position,
            right,
        }
    }

    /// A further spread exists only when the first page of the next one
    /// would not already be the last page.
    pub fn can_go_next(&self) -> bool {
        self.position + 1 < self.total_pages
    }

    pub fn can_go_prev(&self) -> bool {
        self.position > 1
    }

    pub fn contains(&self, page: usize) -> bool {
        (1..=self.total_pages).contains(&page)
    }

    pub fn predicted_next(&self) -> usize {
        (self.position + 2).min(self.total_pages)
    }

    pub fn predicted_prev(&self) -> usize {
        self.position.saturating_sub(2).max(1)
    }
}
