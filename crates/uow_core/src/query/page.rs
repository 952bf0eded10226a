//! Paging primitives.
//!
//! # Invariants
//! - `total_count` is the size of the filtered, unordered query.
//! - `items` is the `[index * size, index * size + size)` slice of the
//!   ordered query; an index past the end yields no items, never an error.
//! - `total_pages = ceil(total_count / page_size)`.

use crate::config::{ConfigError, CoreConfig, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::model::entity::Entity;
use crate::query::compose::Filtered;
use crate::query::order::OrderBy;
use serde::Serialize;

/// Zero-based page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    index: usize,
    size: usize,
}

impl PageRequest {
    /// Validates `size` against [`MAX_PAGE_SIZE`].
    pub fn new(index: usize, size: usize) -> Result<Self, ConfigError> {
        Self::with_limit(index, size, MAX_PAGE_SIZE)
    }

    /// Validates `size` against a caller-supplied maximum.
    pub fn with_limit(index: usize, size: usize, max: usize) -> Result<Self, ConfigError> {
        if size == 0 || size > max {
            return Err(ConfigError::InvalidPageSize { size, max });
        }
        Ok(Self { index, size })
    }

    /// Page `index` at the configured default size, validated against the
    /// configured maximum.
    pub fn from_config(config: &CoreConfig, index: usize) -> Result<Self, ConfigError> {
        Self::with_limit(index, config.default_page_size, config.max_page_size)
    }

    /// First page of the given size.
    pub fn first(size: usize) -> Result<Self, ConfigError> {
        Self::new(0, size)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of elements before this page.
    pub fn offset(&self) -> usize {
        self.index.saturating_mul(self.size)
    }

    pub fn next(&self) -> Self {
        Self {
            index: self.index.saturating_add(1),
            size: self.size,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            index: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of a larger result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagedResult<T> {
    pub page_index: usize,
    pub page_size: usize,
    /// Offset of the first page index, for hosts that number pages from 1.
    pub index_from: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub has_previous: bool,
    pub has_next: bool,
    pub items: Vec<T>,
}

impl<T> PagedResult<T> {
    /// Page with no items for an empty source.
    pub fn empty(request: PageRequest) -> Self {
        Self::from_parts(request, 0, Vec::new())
    }

    pub(crate) fn from_parts(request: PageRequest, total_count: usize, items: Vec<T>) -> Self {
        let mut page = Self {
            page_index: request.index,
            page_size: request.size,
            index_from: 0,
            total_count,
            total_pages: total_count.div_ceil(request.size),
            has_previous: false,
            has_next: false,
            items,
        };
        page.refresh_navigation();
        page
    }

    /// Renumbers pages from `index_from` (`page_index` shifts accordingly).
    pub fn with_index_from(mut self, index_from: usize) -> Self {
        self.page_index = self.page_index.saturating_sub(self.index_from) + index_from;
        self.index_from = index_from;
        self.refresh_navigation();
        self
    }

    pub fn has_previous_page(&self) -> bool {
        self.has_previous
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next
    }

    fn refresh_navigation(&mut self) {
        let position = self.page_index.saturating_sub(self.index_from);
        self.has_previous = position > 0;
        self.has_next = position.saturating_add(1) < self.total_pages;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Converts items while keeping page metadata.
    pub fn map<U, F>(self, convert: F) -> PagedResult<U>
    where
        F: FnMut(T) -> U,
    {
        PagedResult {
            page_index: self.page_index,
            page_size: self.page_size,
            index_from: self.index_from,
            total_count: self.total_count,
            total_pages: self.total_pages,
            has_previous: self.has_previous,
            has_next: self.has_next,
            items: self.items.into_iter().map(convert).collect(),
        }
    }
}

/// Pages an arbitrary, already ordered source.
pub fn paginate<T, I>(source: I, request: PageRequest) -> PagedResult<T>
where
    I: IntoIterator<Item = T>,
{
    let all: Vec<T> = source.into_iter().collect();
    let total_count = all.len();
    let items = all
        .into_iter()
        .skip(request.offset())
        .take(request.size)
        .collect();
    PagedResult::from_parts(request, total_count, items)
}

/// Counts the filtered query, then orders and slices it.
pub(crate) fn page_filtered<E: Entity>(
    filtered: Filtered<E>,
    order: Option<&OrderBy<E>>,
    request: PageRequest,
) -> PagedResult<E> {
    let total_count = filtered.count();
    let items = filtered
        .into_ordered(order)
        .into_iter()
        .skip(request.offset())
        .take(request.size)
        .collect();
    PagedResult::from_parts(request, total_count, items)
}
