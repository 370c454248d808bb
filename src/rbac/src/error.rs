//! Error types for the RBAC decision engine

use crate::constraint::ConstraintCheck;
use crate::hierarchy::GraphError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of directory entity referenced by a [`RbacError::NotFound`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Role,
    User,
    UserRole,
    UserAdminRole,
    PermObj,
    Tenant,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Role => "role",
            Self::User => "user",
            Self::UserRole => "user role assignment",
            Self::UserAdminRole => "user admin role assignment",
            Self::PermObj => "permission object",
            Self::Tenant => "tenant",
        };
        f.write_str(label)
    }
}

/// Reason an authentication attempt was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFailure {
    /// Password did not match
    BadCredential,
    /// Account is locked
    Locked,
    /// Password has expired and no grace logins remain
    Expired,
    /// The credential provider did not answer in time
    Timeout,
    /// The credential provider failed
    Unavailable(String),
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadCredential => write!(f, "bad credential"),
            Self::Locked => write!(f, "account locked"),
            Self::Expired => write!(f, "password expired"),
            Self::Timeout => write!(f, "authentication timed out"),
            Self::Unavailable(msg) => write!(f, "credential provider unavailable: {}", msg),
        }
    }
}

/// RBAC engine errors
#[derive(Debug, Error)]
pub enum RbacError {
    /// Malformed input, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("{entity} not found: {name}")]
    NotFound { entity: EntityKind, name: String },

    /// Credentials rejected by the authenticator or account policy
    #[error("Authentication failed for '{user_id}': {code}")]
    AuthenticationFailed { user_id: String, code: AuthFailure },

    /// Operation requires an authenticated session
    #[error("Session {session_id} is not authenticated")]
    NotAuthenticated { session_id: String },

    /// Assignment would break a static separation-of-duty set
    #[error("SSD violation: assigning '{role}' to '{user_id}' breaks set '{set}' (cardinality {cardinality})")]
    SsdViolation {
        set: String,
        cardinality: usize,
        user_id: String,
        role: String,
    },

    /// Activation would break a dynamic separation-of-duty set
    #[error("DSD violation: activating '{role}' for '{user_id}' breaks set '{set}' (cardinality {cardinality})")]
    DsdViolation {
        set: String,
        cardinality: usize,
        user_id: String,
        role: String,
    },

    /// Temporal constraint not satisfied for a user or role activation
    #[error("Constraint '{check}' not satisfied for {subject}")]
    ConstraintViolation { subject: String, check: ConstraintCheck },

    /// Role or org-unit graph is broken (cycle, duplicate node)
    #[error("Hierarchy integrity error: {0}")]
    Hierarchy(#[from] GraphError),

    /// Directory collaborator failure
    #[error("Directory error: {0}")]
    Directory(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RbacError {
    pub(crate) fn not_found(entity: EntityKind, name: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            name: name.to_string(),
        }
    }

    /// True for separation-of-duty violations (static or dynamic)
    pub fn is_sod_violation(&self) -> bool {
        matches!(self, Self::SsdViolation { .. } | Self::DsdViolation { .. })
    }
}

/// Result type for RBAC operations
pub type Result<T> = std::result::Result<T, RbacError>;
