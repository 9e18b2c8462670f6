//! Offset-based pagination.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskgateError};

// ═══════════════════════════════════════════════════════════════════════════════
// Page Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// Metadata returned alongside a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Number of records matching the filters, across all pages.
    pub length: u64,
    /// The page that was returned (1-indexed).
    pub current: u64,
    /// Number of pages available.
    pub total: u64,
}

impl PageInfo {
    pub fn new(page: u64, per_page: u64, length: u64) -> Self {
        Self {
            length,
            current: page,
            total: length.div_ceil(per_page.max(1)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Offset Pagination
// ═══════════════════════════════════════════════════════════════════════════════

/// Offset-based pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetPagination {
    /// Current page number (1-indexed).
    pub page: u64,
    /// Number of items per page.
    pub per_page: u64,
}

impl OffsetPagination {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self {
            page: page.max(super::MIN_PAGE_NUMBER),
            per_page: per_page.clamp(1, super::MAX_PAGE_SIZE),
        }
    }

    /// Parse raw `page` / `perPage` query values, rejecting anything that is
    /// not a positive integer within bounds.
    pub fn parse(page: Option<&str>, per_page: Option<&str>) -> Result<Self> {
        let page = parse_positive("page", page, super::MIN_PAGE_NUMBER)?;
        let per_page = parse_positive("perPage", per_page, super::DEFAULT_PAGE_SIZE)?;

        if per_page > super::MAX_PAGE_SIZE {
            return Err(TaskgateError::bad_request(format!(
                "perPage cannot exceed {}",
                super::MAX_PAGE_SIZE
            )));
        }

        let offset = (page - 1)
            .checked_mul(per_page)
            .filter(|offset| *offset <= super::MAX_OFFSET);
        if offset.is_none() {
            return Err(TaskgateError::bad_request(format!(
                "page {} is out of range",
                page
            )));
        }

        Ok(Self { page, per_page })
    }

    /// Get the SQL OFFSET value, saturating at [`MAX_OFFSET`](super::MAX_OFFSET).
    pub fn offset(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.per_page)
            .min(super::MAX_OFFSET)
    }

    /// Get the SQL LIMIT value.
    pub fn limit(&self) -> u64 {
        self.per_page
    }

    pub fn metadata(&self, length: u64) -> PageInfo {
        PageInfo::new(self.page, self.per_page, length)
    }

    /// Apply pagination to an iterator.
    pub fn paginate_iter<T, I: Iterator<Item = T>>(&self, iter: I) -> Vec<T> {
        let skip = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let take = usize::try_from(self.per_page).unwrap_or(usize::MAX);
        iter.skip(skip).take(take).collect()
    }
}

impl Default for OffsetPagination {
    fn default() -> Self {
        Self::new(super::MIN_PAGE_NUMBER, super::DEFAULT_PAGE_SIZE)
    }
}

fn parse_positive(field: &str, raw: Option<&str>, default: u64) -> Result<u64> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };

    match raw.parse::<u64>() {
        Ok(value) if value >= 1 => Ok(value),
        _ => Err(TaskgateError::bad_request(format!(
            "{} must be a positive integer, got '{}'",
            field, raw
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_page_info() {
        let info = PageInfo::new(2, 10, 45);
        assert_eq!(info, PageInfo { length: 45, current: 2, total: 5 });

        let empty = PageInfo::new(1, 10, 0);
        assert_eq!(empty.total, 0);
    }

    #[test]
    fn test_offset_and_limit() {
        let pagination = OffsetPagination::new(3, 20);
        assert_eq!(pagination.offset(), 40);
        assert_eq!(pagination.limit(), 20);
    }

    #[test]
    fn test_parse_defaults() {
        let pagination = OffsetPagination::parse(None, None).unwrap();
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.per_page, crate::pagination::DEFAULT_PAGE_SIZE);

        let pagination = OffsetPagination::parse(Some(""), Some(" 5 ")).unwrap();
        assert_eq!(pagination, OffsetPagination::new(1, 5));
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        for (page, per_page) in [
            (Some("0"), None),
            (Some("-1"), None),
            (Some("abc"), None),
            (None, Some("0")),
            (None, Some("1001")),
            (Some("18446744073709551615"), Some("1000")),
            (Some("9223372036854775807"), Some("2")),
        ] {
            let err = OffsetPagination::parse(page, per_page).unwrap_err();
            assert_eq!(err.code(), ErrorCode::BadRequest);
        }
    }

    #[test]
    fn test_offset_saturates() {
        let pagination = OffsetPagination::new(u64::MAX, 1000);
        assert_eq!(pagination.offset(), crate::pagination::MAX_OFFSET);
        assert!(pagination.paginate_iter(0..10).is_empty());

        let last = OffsetPagination::parse(Some("9223372036854775"), Some("1000")).unwrap();
        assert_eq!(last.offset(), 9_223_372_036_854_774_000);
    }

    #[test]
    fn test_paginate_iter() {
        let items: Vec<i32> = (1..=25).collect();

        let page3 = OffsetPagination::new(3, 10).paginate_iter(items.iter().copied());
        assert_eq!(page3, vec![21, 22, 23, 24, 25]);

        let beyond = OffsetPagination::new(4, 10).paginate_iter(items.into_iter());
        assert!(beyond.is_empty());
    }
}
