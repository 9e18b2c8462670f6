//! Listing helpers shared by the administration API.
//!
//! - Offset pagination (`page`, `perPage`) with `{length, current, total}` metadata
//! - Whitelisted sort keys and directions
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskgate_core::pagination::{OffsetPagination, SortField, SortSpec};
//!
//! let page = OffsetPagination::parse(query.page.as_deref(), query.per_page.as_deref())?;
//! let sort = SortSpec::parse(query.sort.as_deref(), query.order.as_deref(), SortField::PERMISSION)?;
//! let (items, length) = store.list_permissions(&filter, sort, Some(page)).await?;
//! let info = page.metadata(length);
//! ```

mod offset;
mod sort;

pub use offset::{OffsetPagination, PageInfo};
pub use sort::{SortDirection, SortField, SortSpec};

/// Default page size if not specified.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Maximum allowed page size.
pub const MAX_PAGE_SIZE: u64 = 1000;

/// Minimum page number (1-indexed).
pub const MIN_PAGE_NUMBER: u64 = 1;

/// Largest row offset a page may start at; SQL offsets are signed 64-bit.
pub const MAX_OFFSET: u64 = i64::MAX as u64;
