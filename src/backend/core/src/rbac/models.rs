//! RBAC data models: identifiers, Permission, Role, associations, users,
//! principals and authorization decisions.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::TaskgateError;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Strongly-typed role identifier.
    RoleId
);
uuid_id!(
    /// Strongly-typed permission record identifier.
    PermissionId
);
uuid_id!(
    /// Strongly-typed user identifier.
    UserId
);
uuid_id!(
    /// Strongly-typed audit log entry identifier.
    AuditLogId
);

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

fn permission_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Z]+(_[A-Z]+)*$").unwrap_or_else(|e| panic!("invalid pattern: {e}"))
    })
}

/// The identifier of an atomic capability, e.g. `DELETE_TASK`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionName(pub String);

impl PermissionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is upper-case words joined by single underscores.
    pub fn is_well_formed(&self) -> bool {
        permission_name_pattern().is_match(&self.0)
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PermissionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PermissionName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for PermissionName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PermissionName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A persisted permission record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: PermissionName,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(name: impl Into<PermissionName>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PermissionId::new(),
            name: name.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// A named bundle of permissions assigned to principals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    /// Unique role name, e.g. `OWNER`.
    pub name: String,
    pub description: String,
    /// Marks the single role that passes owner-only checks.
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: RoleId::new(),
            name: name.into(),
            description: description.into(),
            is_superuser: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: tag this role as the superuser role.
    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }
}

/// A role together with the names of every permission granted to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<PermissionName>,
}

/// Association between a role and one of its permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub created_at: DateTime<Utc>,
}

impl RolePermission {
    pub fn new(role_id: RoleId, permission_id: PermissionId) -> Self {
        Self {
            role_id,
            permission_id,
            created_at: Utc::now(),
        }
    }
}

/// Result of an insert-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Created,
    AlreadyPresent,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Users and Principals
// ═══════════════════════════════════════════════════════════════════════════════

/// A user in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub email: String,
    pub role_id: RoleId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        role_id: RoleId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            username: username.into(),
            name: name.into(),
            email: email.into(),
            role_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The verified identity attached to a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub role_id: RoleId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    /// Build a principal valid for `ttl` from now.
    pub fn for_user(user: &User, ttl: chrono::Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            user_id: user.id,
            username: user.username.clone(),
            role_id: user.role_id,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Verbs
// ═══════════════════════════════════════════════════════════════════════════════

/// HTTP verbs that carry a permission action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    /// The action prefix of the permission this verb requires.
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "CREATE",
            Self::Put | Self::Patch => "EDIT",
            Self::Delete => "DELETE",
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = TaskgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(TaskgateError::bad_request(format!(
                "Unsupported HTTP verb: {}",
                other
            ))),
        }
    }
}

impl TryFrom<&axum::http::Method> for Verb {
    type Error = TaskgateError;

    /// `HEAD` is answered by `GET` handlers and needs the same permission.
    fn try_from(method: &axum::http::Method) -> Result<Self, Self::Error> {
        if method == axum::http::Method::HEAD {
            return Ok(Self::Get);
        }
        method.as_str().parse()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Requirements and Decisions
// ═══════════════════════════════════════════════════════════════════════════════

/// The permission a request must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionRequirement {
    /// Declared by the route.
    Explicit(PermissionName),
    /// Computed from the request path and verb.
    Derived,
}

impl PermissionRequirement {
    /// Resolve to a concrete permission name for one request.
    pub fn resolve(&self, path: &str, verb: Verb) -> PermissionName {
        match self {
            Self::Explicit(name) => name.clone(),
            Self::Derived => super::deriver::derive(path, verb),
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No verified principal on the request.
    Unauthenticated,
    /// The principal's role does not hold the required permission.
    MissingPermission(PermissionName),
    /// The route is owner-only and the principal's role is not the superuser role.
    NotOwner,
    /// A lookup failed; access is denied by default.
    LookupFailed,
}

impl DenyReason {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::MissingPermission(_) => "missing_permission",
            Self::NotOwner => "not_owner",
            Self::LookupFailed => "lookup_failed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unauthenticated => "You need to be logged in to access this route".to_string(),
            Self::MissingPermission(name) => {
                format!("You need the [{}] permission to access this route", name)
            }
            Self::NotOwner => "Only the superuser role can access this route".to_string(),
            Self::LookupFailed => "Access denied".to_string(),
        }
    }
}

impl From<DenyReason> for TaskgateError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Unauthenticated => TaskgateError::unauthenticated(reason.message()),
            other => TaskgateError::unauthorized(other.message()),
        }
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny(_) => "deny",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
