//! Pagination, sorting and search parameters shared by every list endpoint

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

/// Rejected pagination input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaginationError {
    #[error("Page must be greater than 0")]
    InvalidPage,
    #[error("Size must be between 1 and 100")]
    InvalidSize,
}

/// Query string parameters accepted by list endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            size: DEFAULT_PAGE_SIZE,
            search: None,
            sort_by: None,
            sort_order: SortOrder::default(),
        }
    }
}

impl QueryParams {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_sort(mut self, sort_by: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(sort_by.into());
        self.sort_order = order;
        self
    }

    pub fn validate(&self) -> Result<(), PaginationError> {
        if self.page < 1 {
            return Err(PaginationError::InvalidPage);
        }
        if self.size < 1 || self.size > MAX_PAGE_SIZE {
            return Err(PaginationError::InvalidSize);
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.size as i64
    }

    pub fn limit(&self) -> i64 {
        self.size as i64
    }

    /// Search term with surrounding whitespace removed, if any is left
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Page position and totals returned next to every list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: u32,
    pub size: u32,
    pub total: i64,
    pub pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageMeta {
    pub fn new(page: u32, size: u32, total: i64) -> Self {
        let pages = if total <= 0 || size == 0 {
            0
        } else {
            (total + size as i64 - 1) / size as i64
        };
        Self {
            page,
            size,
            total: total.max(0),
            pages,
            has_next: (page as i64) < pages,
            has_prev: page > 1,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, meta: PageMeta) -> Self {
        Self { items, meta }
    }

    pub fn empty(page: u32, size: u32) -> Self {
        Self::new(Vec::new(), PageMeta::new(page, size, 0))
    }

    /// Convert the items while keeping the metadata
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = QueryParams::default();
        assert_eq!(params.page, 1);
        assert_eq!(params.size, 10);
        assert_eq!(params.sort_order, SortOrder::Desc);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_bounds() {
        assert_eq!(
            QueryParams::new(0, 10).validate(),
            Err(PaginationError::InvalidPage)
        );
        assert_eq!(
            QueryParams::new(1, 0).validate(),
            Err(PaginationError::InvalidSize)
        );
        assert_eq!(
            QueryParams::new(1, 101).validate(),
            Err(PaginationError::InvalidSize)
        );
        assert!(QueryParams::new(1, 100).validate().is_ok());
        assert_eq!(
            PaginationError::InvalidSize.to_string(),
            "Size must be between 1 and 100"
        );
    }

    #[test]
    fn test_offset_and_limit() {
        let params = QueryParams::new(3, 20);
        assert_eq!(params.offset(), 40);
        assert_eq!(params.limit(), 20);
    }

    #[test]
    fn test_search_term_trims_and_drops_blank() {
        assert_eq!(QueryParams::default().with_search("  rust ").search_term(), Some("rust"));
        assert_eq!(QueryParams::default().with_search("   ").search_term(), None);
    }

    #[test]
    fn test_page_meta_examples() {
        let meta = PageMeta::new(1, 10, 0);
        assert_eq!(meta.pages, 0);
        assert!(!meta.has_next);
        assert!(!meta.has_prev);

        let meta = PageMeta::new(2, 10, 25);
        assert_eq!(meta.pages, 3);
        assert!(meta.has_next);
        assert!(meta.has_prev);

        let meta = PageMeta::new(3, 10, 30);
        assert_eq!(meta.pages, 3);
        assert!(!meta.has_next);
    }

    #[test]
    fn test_query_params_deserialize_from_json_defaults() {
        let params: QueryParams = serde_json::from_str(r#"{"sort_order":"asc"}"#).unwrap();
        assert_eq!(params.page, 1);
        assert_eq!(params.size, 10);
        assert_eq!(params.sort_order, SortOrder::Asc);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// pages is the ceiling of total / size and navigation flags agree with it
            #[test]
            fn prop_page_meta_consistent(page in 1u32..50, size in 1u32..=100, total in 0i64..10_000) {
                let meta = PageMeta::new(page, size, total);
                prop_assert!(meta.pages * size as i64 >= total);
                prop_assert!(meta.pages == 0 || (meta.pages - 1) * (size as i64) < total);
                prop_assert_eq!(meta.has_next, (page as i64) < meta.pages);
                prop_assert_eq!(meta.has_prev, page > 1);
            }

            /// Offsets of consecutive pages are exactly one page apart
            #[test]
            fn prop_offsets_are_contiguous(page in 1u32..1000, size in 1u32..=100) {
                let a = QueryParams::new(page, size);
                let b = QueryParams::new(page + 1, size);
                prop_assert_eq!(b.offset() - a.offset(), size as i64);
            }
        }
    }
}
