//! Sessions: authenticated users with a set of activated roles
//!
//! A [`Session`] is owned by its caller. It is created and mutated only
//! through the [`SessionManager`], which enforces temporal constraints and
//! dynamic separation of duty on every activation.

pub mod auth;
pub mod manager;


pub use auth::{AuthOutcome, AuthWarning, Authenticator, Credential, StaticAuthenticator};
pub use manager::SessionManager;

use crate::constraint::{is_timed_out, ConstraintCheck};
use crate::types::{Name, SessionId, TenantId, User, UserAdminRole, UserRole};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which assigned roles to activate when a session is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Every assigned role, in assignment order
    All,
    /// The listed roles, in list order; each must be assigned
    Roles(Vec<Name>),
}

impl Activation {
    pub fn roles<I, N>(roles: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        Self::Roles(roles.into_iter().map(Into::into).collect())
    }

    /// Activate nothing
    pub fn none() -> Self {
        Self::Roles(Vec::new())
    }
}

/// A role that was not activated (or was dropped) because a check failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub role: Name,

    /// Admin role rather than RBAC role
    pub admin: bool,

    pub check: ConstraintCheck,

    pub at: NaiveDateTime,
}

/// Per-authentication record of the activated roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,

    tenant: TenantId,

    user: User,

    authenticated: bool,

    warnings: Vec<AuthWarning>,

    last_access: NaiveDateTime,

    roles: Vec<UserRole>,

    admin_roles: Vec<UserAdminRole>,

    exclusions: Vec<Exclusion>,
}

impl Session {
    /// Unauthenticated session with a fresh identifier and no roles
    pub fn new(tenant: impl Into<TenantId>, user: User, now: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant: tenant.into(),
            user,
            authenticated: false,
            warnings: Vec::new(),
            last_access: now,
            roles: Vec::new(),
            admin_roles: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> &Name {
        &self.user.user_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Non-fatal warnings returned by the authenticator
    pub fn warnings(&self) -> &[AuthWarning] {
        &self.warnings
    }

    pub fn last_access(&self) -> NaiveDateTime {
        self.last_access
    }

    /// Activated RBAC roles, in activation order
    pub fn roles(&self) -> &[UserRole] {
        &self.roles
    }

    /// Activated admin roles, in activation order
    pub fn admin_roles(&self) -> &[UserAdminRole] {
        &self.admin_roles
    }

    pub fn role_names(&self) -> impl Iterator<Item = &Name> + Clone {
        self.roles.iter().map(|ur| &ur.name)
    }

    pub fn admin_role_names(&self) -> impl Iterator<Item = &Name> + Clone {
        self.admin_roles.iter().map(|ur| &ur.name)
    }

    /// Roles skipped or dropped because of a failed check
    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    pub fn has_active_role(&self, role: &Name) -> bool {
        self.roles.iter().any(|ur| &ur.name == role)
    }

    pub fn has_active_admin_role(&self, role: &Name) -> bool {
        self.admin_roles.iter().any(|ur| &ur.name == role)
    }

    /// True if any activated role's inactivity timeout elapsed at `now`
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.roles
            .iter()
            .map(|ur| &ur.constraint)
            .chain(self.admin_roles.iter().map(|ur| &ur.constraint))
            .any(|c| is_timed_out(c, self.last_access, now))
    }

    pub(crate) fn touch(&mut self, now: NaiveDateTime) {
        self.last_access = now;
    }

    pub(crate) fn exclude(&mut self, role: Name, admin: bool, check: ConstraintCheck, at: NaiveDateTime) {
        self.exclusions.push(Exclusion {
            role,
            admin,
            check,
            at,
        });
    }
}
