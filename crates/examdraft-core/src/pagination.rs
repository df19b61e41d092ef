//! Splitting an attempt's questions into pages.
//!
//! Positions here are indices into the display order, not authoring indices.
//! Pages are numbered from 1.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationController {
    question_count: usize,
    page_size: usize,
}

impl PaginationController {
    /// A page size of 0 is treated as 1.
    pub fn new(question_count: usize, page_size: usize) -> Self {
        Self {
            question_count,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// `ceil(question_count / page_size)`, and at least one page.
    pub fn total_pages(&self) -> usize {
        self.question_count.div_ceil(self.page_size).max(1)
    }

    /// Clamp a page number into `[1, total_pages]`.
    pub fn clamp(&self, page: usize) -> usize {
        page.clamp(1, self.total_pages())
    }

    /// The page containing display position `position`.
    pub fn page_of(&self, position: usize) -> usize {
        self.clamp(position / self.page_size + 1)
    }

    /// First display position on `page`.
    pub fn first_index(&self, page: usize) -> usize {
        (self.clamp(page) - 1) * self.page_size
    }

    /// Display positions on `page`.
    pub fn page_range(&self, page: usize) -> Range<usize> {
        let start = self.first_index(page).min(self.question_count);
        let end = (start + self.page_size).min(self.question_count);
        start..end
    }

    /// Position to land on after moving one page forward from `position`.
    pub fn next(&self, position: usize) -> usize {
        self.first_index(self.page_of(position) + 1)
    }

    /// Position to land on after moving one page back from `position`.
    pub fn prev(&self, position: usize) -> usize {
        self.first_index(self.page_of(position).saturating_sub(1))
    }
}
