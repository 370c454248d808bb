//! Session construction and role activation

use super::auth::{AuthWarning, Authenticator, Credential};
use super::{Activation, Exclusion, Session};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::constraint::{first_failed_check, is_timed_out, Constraint, ConstraintCheck};
use crate::error::{AuthFailure, EntityKind, RbacError, Result};
use crate::permission::ensure_authenticated;
use crate::snapshot::PolicySnapshot;
use crate::types::{Name, User, UserRole};
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Creates sessions and activates roles against one policy snapshot
///
/// Every activation is checked against the role's assignment constraint
/// and, for RBAC roles, against dynamic separation of duty.
pub struct SessionManager {
    snapshot: Arc<PolicySnapshot>,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    auth_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        snapshot: Arc<PolicySnapshot>,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            snapshot,
            authenticator,
            clock,
            auth_timeout: EngineConfig::default().auth_timeout(),
        }
    }

    /// Bound on the authenticator call
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn snapshot(&self) -> &PolicySnapshot {
        &self.snapshot
    }

    /// Authenticate `user` (unless trusted) and activate roles
    ///
    /// Roles whose constraint fails are skipped and recorded as exclusions.
    /// A DSD violation rejects the whole session.
    pub async fn create_session(
        &self,
        user: &User,
        credential: &Credential,
        activation: &Activation,
    ) -> Result<Session> {
        let mut session = self.open(user, credential).await?;
        let candidates = candidate_roles(user, activation)?;
        let now = session.last_access;
        let sod = self.snapshot.sod();

        for assignment in candidates {
            if let Some(check) = first_failed_check(&assignment.constraint, now) {
                info!(
                    "Skipping role '{}' for '{}': {} constraint not satisfied",
                    assignment.name, user.user_id, check
                );
                session.exclude(assignment.name.clone(), false, check, now);
                continue;
            }

            sod.validate_dsd(&user.user_id, session.role_names(), &assignment.name)?;
            session.roles.push(assignment.clone());
        }

        for assignment in &user.admin_roles {
            if let Some(check) = first_failed_check(&assignment.constraint, now) {
                info!(
                    "Skipping admin role '{}' for '{}': {} constraint not satisfied",
                    assignment.name, user.user_id, check
                );
                session.exclude(assignment.name.clone(), true, check, now);
                continue;
            }
            if self.snapshot.admin_role(&assignment.name).is_none() {
                warn!("Activating admin role '{}' with no admin role record", assignment.name);
            }
            session.admin_roles.push(assignment.clone());
        }

        info!(
            "Created session {} for '{}': {} role(s), {} admin role(s), {} excluded",
            session.id,
            user.user_id,
            session.roles.len(),
            session.admin_roles.len(),
            session.exclusions.len()
        );

        Ok(session)
    }

    /// Authenticate `user` without activating any role
    pub async fn authenticate(&self, user: &User, password: &str) -> Result<Session> {
        let session = self.open(user, &Credential::password(password)).await?;
        debug!("Authenticated '{}' as session {}", user.user_id, session.id);
        Ok(session)
    }

    /// Account checks, credential verification and the user-level constraint
    async fn open(&self, user: &User, credential: &Credential) -> Result<Session> {
        let fail = |code| RbacError::AuthenticationFailed {
            user_id: user.user_id.to_string(),
            code,
        };

        if user.locked {
            warn!("Rejected locked account '{}'", user.user_id);
            return Err(fail(AuthFailure::Locked));
        }

        let tenant = self.snapshot.tenant().to_string();
        let mut warnings = Vec::new();

        if let Credential::Password(password) = credential {
            let call = self.authenticator.authenticate(&tenant, &user.user_id, password);
            let outcome = match tokio::time::timeout(self.auth_timeout, call).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e @ RbacError::AuthenticationFailed { .. })) => {
                    warn!("Authentication failed for '{}': {}", user.user_id, e);
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!("Credential provider failed for '{}': {}", user.user_id, e);
                    return Err(fail(AuthFailure::Unavailable(e.to_string())));
                }
                Err(_) => {
                    warn!(
                        "Authentication for '{}' timed out after {:?}",
                        user.user_id, self.auth_timeout
                    );
                    return Err(fail(AuthFailure::Timeout));
                }
            };
            warnings = outcome.warnings;
        }

        if user.reset {
            warnings.push(AuthWarning::PasswordResetRequired);
        }

        let now = self.clock.now();
        if let Some(check) = first_failed_check(&user.constraint, now) {
            warn!("User '{}' rejected: {} constraint not satisfied", user.user_id, check);
            return Err(RbacError::ConstraintViolation {
                subject: format!("user '{}'", user.user_id),
                check,
            });
        }

        let mut session = Session::new(tenant, user.clone(), now);
        session.authenticated = true;
        session.warnings = warnings;
        Ok(session)
    }

    /// Activate an assigned role in an existing session
    pub fn add_active_role(&self, session: &mut Session, role: &Name) -> Result<()> {
        ensure_authenticated(session)?;
        let now = self.clock.now();

        if session.has_active_role(role) {
            return Err(RbacError::Validation(format!("Role '{}' is already active", role)));
        }

        let assignment = session
            .user
            .assigned_role(role)
            .cloned()
            .ok_or_else(|| assignment_not_found(EntityKind::UserRole, session.user_id(), role))?;

        if let Some(check) = first_failed_check(&assignment.constraint, now) {
            warn!(
                "Cannot activate '{}' for '{}': {} constraint not satisfied",
                role,
                session.user_id(),
                check
            );
            return Err(RbacError::ConstraintViolation {
                subject: format!("role '{}'", role),
                check,
            });
        }

        self.snapshot
            .sod()
            .validate_dsd(session.user_id(), session.role_names(), role)?;

        debug!("Activated '{}' in session {}", role, session.id);
        session.roles.push(assignment);
        session.touch(now);
        Ok(())
    }

    /// Deactivate a role; no checks beyond it being active
    pub fn drop_active_role(&self, session: &mut Session, role: &Name) -> Result<()> {
        ensure_authenticated(session)?;

        let index = session
            .roles
            .iter()
            .position(|ur| &ur.name == role)
            .ok_or_else(|| assignment_not_found(EntityKind::UserRole, session.user_id(), role))?;

        session.roles.remove(index);
        session.touch(self.clock.now());
        debug!("Dropped '{}' from session {}", role, session.id);
        Ok(())
    }

    /// Activate an assigned admin role; constraint-checked, no DSD
    pub fn add_active_admin_role(&self, session: &mut Session, role: &Name) -> Result<()> {
        ensure_authenticated(session)?;
        let now = self.clock.now();

        if session.has_active_admin_role(role) {
            return Err(RbacError::Validation(format!("Admin role '{}' is already active", role)));
        }

        let assignment = session
            .user
            .assigned_admin_role(role)
            .cloned()
            .ok_or_else(|| assignment_not_found(EntityKind::UserAdminRole, session.user_id(), role))?;

        if let Some(check) = first_failed_check(&assignment.constraint, now) {
            return Err(RbacError::ConstraintViolation {
                subject: format!("admin role '{}'", role),
                check,
            });
        }

        session.admin_roles.push(assignment);
        session.touch(now);
        Ok(())
    }

    pub fn drop_active_admin_role(&self, session: &mut Session, role: &Name) -> Result<()> {
        ensure_authenticated(session)?;

        let index = session
            .admin_roles
            .iter()
            .position(|ur| &ur.name == role)
            .ok_or_else(|| assignment_not_found(EntityKind::UserAdminRole, session.user_id(), role))?;

        session.admin_roles.remove(index);
        session.touch(self.clock.now());
        Ok(())
    }

    /// Drop active roles whose constraint no longer holds at `now` or whose
    /// inactivity timeout elapsed; returns what was dropped
    pub fn revalidate(&self, session: &mut Session, now: NaiveDateTime) -> Vec<Exclusion> {
        let last_access = session.last_access;
        let mut dropped = Vec::new();

        let mut failed = |name: &Name, constraint: &Constraint, admin: bool| {
            let check = if is_timed_out(constraint, last_access, now) {
                Some(ConstraintCheck::Timeout)
            } else {
                first_failed_check(constraint, now)
            };
            if let Some(check) = check {
                dropped.push(Exclusion {
                    role: name.clone(),
                    admin,
                    check,
                    at: now,
                });
                return true;
            }
            false
        };

        session.roles.retain(|ur| !failed(&ur.name, &ur.constraint, false));
        session.admin_roles.retain(|ur| !failed(&ur.name, &ur.constraint, true));

        if !dropped.is_empty() {
            info!(
                "Session {} lost {} role(s) on revalidation",
                session.id,
                dropped.len()
            );
        }

        session.exclusions.extend(dropped.iter().cloned());
        session.touch(now);
        dropped
    }

    /// Current time from the injected clock
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }
}

fn candidate_roles<'u>(user: &'u User, activation: &Activation) -> Result<Vec<&'u UserRole>> {
    match activation {
        Activation::All => Ok(user.roles.iter().collect()),
        Activation::Roles(names) => {
            let mut selected: Vec<&UserRole> = Vec::with_capacity(names.len());
            for name in names {
                let assignment = user
                    .assigned_role(name)
                    .ok_or_else(|| assignment_not_found(EntityKind::UserRole, &user.user_id, name))?;
                if !selected.iter().any(|ur| ur.name == assignment.name) {
                    selected.push(assignment);
                }
            }
            Ok(selected)
        }
    }
}

fn assignment_not_found(entity: EntityKind, user_id: &Name, role: &Name) -> RbacError {
    RbacError::not_found(entity, format!("{}/{}", user_id, role))
}
