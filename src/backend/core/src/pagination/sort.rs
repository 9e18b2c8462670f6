//! Sort keys and directions accepted by list endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TaskgateError};

// ═══════════════════════════════════════════════════════════════════════════════
// Sort Direction
// ═══════════════════════════════════════════════════════════════════════════════

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// Get the SQL keyword for this direction.
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sort Field
// ═══════════════════════════════════════════════════════════════════════════════

/// A sortable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    Name,
    Description,
    Username,
    Email,
    Method,
    Path,
    StatusCode,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub const ROLE: &'static [SortField] =
        &[Self::Name, Self::Description, Self::CreatedAt, Self::UpdatedAt];

    pub const PERMISSION: &'static [SortField] =
        &[Self::Name, Self::Description, Self::CreatedAt, Self::UpdatedAt];

    pub const USER: &'static [SortField] = &[
        Self::Name,
        Self::Username,
        Self::Email,
        Self::CreatedAt,
        Self::UpdatedAt,
    ];

    pub const AUDIT_LOG: &'static [SortField] =
        &[Self::Method, Self::Path, Self::StatusCode, Self::CreatedAt];

    /// Parse a query-string key; both `createdAt` and `created_at` are accepted.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "name" => Some(Self::Name),
            "description" => Some(Self::Description),
            "username" => Some(Self::Username),
            "email" => Some(Self::Email),
            "method" => Some(Self::Method),
            "path" | "endpoint" => Some(Self::Path),
            "statusCode" | "status_code" => Some(Self::StatusCode),
            "createdAt" | "created_at" => Some(Self::CreatedAt),
            "updatedAt" | "updated_at" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    /// The SQL column this field sorts on.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Username => "username",
            Self::Email => "email",
            Self::Method => "method",
            Self::Path => "path",
            Self::StatusCode => "status_code",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sort Spec
// ═══════════════════════════════════════════════════════════════════════════════

/// A validated sort instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortField::CreatedAt, SortDirection::Desc)
    }
}

impl SortSpec {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Parse `sort` / `order` query values against the fields a collection
    /// allows. Missing values default to newest first.
    pub fn parse(sort: Option<&str>, order: Option<&str>, allowed: &[SortField]) -> Result<Self> {
        let field = match sort.map(str::trim).filter(|s| !s.is_empty()) {
            None => SortField::CreatedAt,
            Some(key) => SortField::from_key(key)
                .filter(|f| allowed.contains(f))
                .ok_or_else(|| {
                    TaskgateError::bad_request(format!("Cannot sort by '{}'", key))
                })?,
        };

        let direction = match order.map(str::trim).filter(|s| !s.is_empty()) {
            None => SortDirection::Desc,
            Some(o) if o.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(o) if o.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(o) => {
                return Err(TaskgateError::bad_request(format!(
                    "order must be 'asc' or 'desc', got '{}'",
                    o
                )))
            }
        };

        Ok(Self::new(field, direction))
    }

    /// `ORDER BY` clause built only from whitelisted identifiers.
    pub fn sql_clause(&self) -> String {
        format!(
            "ORDER BY {} {}, id {}",
            self.field.column(),
            self.direction.sql_keyword(),
            self.direction.sql_keyword()
        )
    }

    /// Apply the direction to an ascending comparison.
    pub fn apply(&self, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
