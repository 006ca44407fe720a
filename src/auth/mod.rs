//! Access checks for operations that write sales and work breakdown
//! structures.
//!
//! Callers act either as an authenticated user, whose permissions are
//! checked, or as the system, which bypasses checks. The system context is
//! what quote synchronization and draft cleanup use to touch WBS nodes that
//! may be shared with orders the current user cannot see.

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Common permission string constants for compile-time safety
pub mod consts {
    // Sales
    pub const SALES_CREATE: &str = "sales:create";
    pub const SALES_UPDATE: &str = "sales:update";

    // Work breakdown structures
    pub const WBS_CREATE: &str = "wbs:create";
    pub const WBS_UPDATE: &str = "wbs:update";
    pub const WBS_DELETE: &str = "wbs:delete";
}

/// Authenticated user performing an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl AuthUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            roles: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Check if the user has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check if the user has a specific permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Check if the user is an admin
    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }
}

/// Who an operation runs as
#[derive(Debug, Clone)]
pub enum AccessContext {
    User(AuthUser),
    System,
}

impl AccessContext {
    pub fn user(user: AuthUser) -> Self {
        Self::User(user)
    }

    pub fn system() -> Self {
        Self::System
    }

    pub fn checks_access(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Fails with `Forbidden` unless the context may perform `permission`.
    pub fn require(&self, permission: &str) -> Result<(), ServiceError> {
        match self {
            Self::System => Ok(()),
            Self::User(user) if user.is_admin() || user.has_permission(permission) => Ok(()),
            Self::User(user) => Err(ServiceError::Forbidden(format!(
                "user {} lacks permission {}",
                user.user_id, permission
            ))),
        }
    }

    pub fn actor(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User(user) => &user.user_id,
        }
    }
}
