//! Page-number pagination shared by every feed.

use std::num::NonZeroU32;

use crate::application::repos::PageWindow;

/// Page number requested by a client, always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageNumber(u64);

impl PageNumber {
    pub const FIRST: PageNumber = PageNumber(1);

    /// Missing or malformed values fall back to the first page. Zero and
    /// negative numbers clamp to the first page as well; numbers too large to
    /// represent saturate so they clamp to the last page.
    pub fn parse(raw: Option<&str>) -> Self {
        let digits = raw
            .map(str::trim)
            .map(|value| value.strip_prefix('+').unwrap_or(value))
            .filter(|value| !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit()));
        match digits {
            Some(value) => PageNumber(value.parse::<u64>().unwrap_or(u64::MAX).max(1)),
            None => Self::FIRST,
        }
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for PageNumber {
    fn default() -> Self {
        Self::FIRST
    }
}

/// Resolved position of a page within a result set of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlot {
    pub number: u64,
    pub total_pages: u64,
    pub total_items: u64,
    pub window: PageWindow,
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    page_size: NonZeroU32,
}

impl Paginator {
    pub fn new(page_size: NonZeroU32) -> Self {
        Self { page_size }
    }

    pub fn page_size(&self) -> u64 {
        u64::from(self.page_size.get())
    }

    /// Clamp `requested` into the valid page range for `total_items`.
    /// An empty result set still has one (empty) page.
    pub fn slot(&self, total_items: u64, requested: PageNumber) -> PageSlot {
        let size = self.page_size();
        let total_pages = total_items.div_ceil(size).max(1);
        let number = requested.get().clamp(1, total_pages);

        PageSlot {
            number,
            total_pages,
            total_items,
            window: PageWindow {
                offset: (number - 1) * size,
                limit: size,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u64,
    pub total_pages: u64,
    pub total_items: u64,
}

impl<T> Page<T> {
    pub fn new(slot: PageSlot, items: Vec<T>) -> Self {
        Self {
            items,
            number: slot.number,
            total_pages: slot.total_pages,
            total_items: slot.total_items,
        }
    }

    pub fn has_next(&self) -> bool {
        self.number < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn next_number(&self) -> Option<u64> {
        self.has_next().then_some(self.number + 1)
    }

    pub fn previous_number(&self) -> Option<u64> {
        self.has_previous().then_some(self.number - 1)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            total_pages: self.total_pages,
            total_items: self.total_items,
        }
    }
}
