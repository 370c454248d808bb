//! RBAC engine facade
//!
//! Wires the directory, authenticator, clock, per-tenant snapshot cache and
//! audit log behind one API.
//!
//! # Architecture
//!
//! ```text
//! Directory ──load──► PolicySnapshot (per tenant, Arc-swapped on refresh)
//!                        │
//!        ┌───────────────┼────────────────┬──────────────────┐
//!        ▼               ▼                ▼                  ▼
//!  SessionManager   SodValidator   PermissionResolver   DelegationChecker
//!        │                                │
//!        └──────────── [Audit Log] ◄──────┘
//! ```
//!
//! Session-scoped operations use the tenant recorded in the session.

use crate::audit::{AuditEntry, AuditLog, AuditOperation};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::directory::Directory;
use crate::error::{RbacError, Result};
use crate::permission::ensure_authenticated;
use crate::session::{Activation, Authenticator, Credential, Session, SessionManager};
use crate::snapshot::{PolicySnapshot, SnapshotCache};
use crate::types::{Name, Permission, PermissionKey, TenantId, User, UserRole};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Main RBAC engine
pub struct RbacEngine {
    config: EngineConfig,

    /// Policy and user storage
    directory: Arc<dyn Directory>,

    /// Credential verification
    authenticator: Arc<dyn Authenticator>,

    clock: Arc<dyn Clock>,

    snapshots: SnapshotCache,

    audit: Option<AuditLog>,

    /// Serialises assignment changes per (tenant, user)
    assignment_locks: DashMap<(TenantId, Name), Arc<Mutex<()>>>,
}

impl RbacEngine {
    /// Create an engine using the system clock
    ///
    /// # Errors
    ///
    /// Returns [`RbacError::Config`] if the configuration does not validate.
    pub fn new(
        config: EngineConfig,
        directory: Arc<dyn Directory>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        config.validate()?;

        let audit = config.enable_audit.then(|| AuditLog::new(config.audit_capacity));

        info!(
            "RbacEngine initialized with audit={}, closure_cache={}, revalidate_on_check={}",
            config.enable_audit, config.closure_cache, config.revalidate_on_check
        );

        Ok(Self {
            config,
            directory,
            authenticator,
            clock: Arc::new(SystemClock),
            snapshots: SnapshotCache::new(),
            audit,
            assignment_locks: DashMap::new(),
        })
    }

    /// Replace the clock used for temporal constraints
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Current snapshot for `tenant`, loading it on first use
    pub async fn snapshot(&self, tenant: &str) -> Result<Arc<PolicySnapshot>> {
        if let Some(snapshot) = self.snapshots.get(tenant) {
            return Ok(snapshot);
        }
        self.refresh(tenant).await
    }

    /// Rebuild `tenant`'s snapshot from the directory and swap it in
    ///
    /// On failure the previous snapshot (if any) stays in place.
    pub async fn refresh(&self, tenant: &str) -> Result<Arc<PolicySnapshot>> {
        let start = Instant::now();
        let snapshot = PolicySnapshot::load(self.directory.as_ref(), &tenant.to_string(), &self.config)
            .await
            .map_err(|e| {
                warn!("Snapshot refresh for tenant '{}' failed: {}", tenant, e);
                e
            })?;

        let (snapshot, previous) = self.snapshots.install(snapshot);
        info!(
            "Refreshed tenant '{}' in {:?} (replaced existing: {})",
            tenant,
            start.elapsed(),
            previous.is_some()
        );
        Ok(snapshot)
    }

    /// Forget `tenant`'s snapshot; the next call reloads it
    pub fn invalidate(&self, tenant: &str) -> bool {
        let removed = self.snapshots.invalidate(tenant);
        debug!("Invalidated tenant '{}': {}", tenant, removed);
        removed
    }

    fn sessions(&self, snapshot: Arc<PolicySnapshot>) -> SessionManager {
        SessionManager::new(snapshot, Arc::clone(&self.authenticator), Arc::clone(&self.clock))
            .with_auth_timeout(self.config.auth_timeout())
    }

    async fn user(&self, tenant: &str, user_id: &Name) -> Result<User> {
        self.directory.user(&tenant.to_string(), user_id).await
    }

    async fn record<T>(&self, entry: AuditEntry, result: &Result<T>) {
        if let Some(audit) = &self.audit {
            let entry = match result {
                Ok(_) => entry,
                Err(e) => entry.with_error(e),
            };
            audit.record(entry).await;
        }
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Fetch the user, authenticate unless trusted, and activate roles
    pub async fn create_session(
        &self,
        tenant: &str,
        user_id: &Name,
        credential: &Credential,
        activation: &Activation,
    ) -> Result<Session> {
        let result = async {
            let snapshot = self.snapshot(tenant).await?;
            let user = self.user(tenant, user_id).await?;
            self.sessions(snapshot)
                .create_session(&user, credential, activation)
                .await
        }
        .await;

        let mut entry = AuditEntry::new(AuditOperation::CreateSession, tenant, user_id, "session");
        if let Ok(session) = &result {
            entry = entry.with_session(session.id());
        }
        self.record(entry, &result).await;
        result
    }

    /// Verify a password and return a session with no active roles
    pub async fn authenticate(&self, tenant: &str, user_id: &Name, password: &str) -> Result<Session> {
        let result = async {
            let snapshot = self.snapshot(tenant).await?;
            let user = self.user(tenant, user_id).await?;
            self.sessions(snapshot).authenticate(&user, password).await
        }
        .await;

        self.record(
            AuditEntry::new(AuditOperation::Authenticate, tenant, user_id, "session"),
            &result,
        )
        .await;
        result
    }

    pub async fn add_active_role(&self, session: &mut Session, role: &Name) -> Result<()> {
        let snapshot = self.snapshot(session.tenant()).await?;
        let result = self.sessions(snapshot).add_active_role(session, role);
        self.record(session_entry(AuditOperation::AddActiveRole, session, role), &result)
            .await;
        result
    }

    pub async fn drop_active_role(&self, session: &mut Session, role: &Name) -> Result<()> {
        let snapshot = self.snapshot(session.tenant()).await?;
        let result = self.sessions(snapshot).drop_active_role(session, role);
        self.record(session_entry(AuditOperation::DropActiveRole, session, role), &result)
            .await;
        result
    }

    pub async fn add_active_admin_role(&self, session: &mut Session, role: &Name) -> Result<()> {
        let snapshot = self.snapshot(session.tenant()).await?;
        let result = self.sessions(snapshot).add_active_admin_role(session, role);
        self.record(session_entry(AuditOperation::AddActiveAdminRole, session, role), &result)
            .await;
        result
    }

    pub async fn drop_active_admin_role(&self, session: &mut Session, role: &Name) -> Result<()> {
        let snapshot = self.snapshot(session.tenant()).await?;
        let result = self.sessions(snapshot).drop_active_admin_role(session, role);
        self.record(session_entry(AuditOperation::DropActiveAdminRole, session, role), &result)
            .await;
        result
    }

    /// Drop active roles that no longer satisfy their constraints
    pub async fn revalidate(&self, session: &mut Session) -> Result<()> {
        let snapshot = self.snapshot(session.tenant()).await?;
        let manager = self.sessions(snapshot);
        let now = manager.now();
        manager.revalidate(session, now);
        Ok(())
    }

    async fn prepare(&self, session: &mut Session) -> Result<Arc<PolicySnapshot>> {
        let snapshot = self.snapshot(session.tenant()).await?;
        if self.config.revalidate_on_check && session.is_authenticated() {
            let manager = self.sessions(Arc::clone(&snapshot));
            let now = manager.now();
            manager.revalidate(session, now);
        }
        Ok(snapshot)
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    /// May the session perform `key`?
    pub async fn check_access(&self, session: &mut Session, key: &PermissionKey) -> Result<bool> {
        let result = match self.prepare(session).await {
            Ok(snapshot) => snapshot.resolver().check_access(session, key),
            Err(e) => Err(e),
        };

        if let Some(audit) = &self.audit {
            let entry = session_entry(AuditOperation::CheckAccess, session, key);
            let entry = match &result {
                Ok(allowed) => entry.with_outcome(*allowed, if *allowed { "granted" } else { "not granted" }),
                Err(e) => entry.with_error(e),
            };
            audit.record(entry).await;
        }
        result
    }

    pub async fn session_permissions(&self, session: &mut Session) -> Result<Vec<Permission>> {
        let snapshot = self.prepare(session).await?;
        snapshot.resolver().session_permissions(session)
    }

    pub async fn session_admin_permissions(&self, session: &mut Session) -> Result<Vec<Permission>> {
        let snapshot = self.prepare(session).await?;
        snapshot.resolver().session_admin_permissions(session)
    }

    pub async fn authorized_roles(&self, session: &Session) -> Result<HashSet<Name>> {
        ensure_authenticated(session)?;
        let snapshot = self.snapshot(session.tenant()).await?;
        Ok(snapshot.resolver().authorized_roles(session))
    }

    pub async fn authorized_admin_roles(&self, session: &Session) -> Result<HashSet<Name>> {
        ensure_authenticated(session)?;
        let snapshot = self.snapshot(session.tenant()).await?;
        Ok(snapshot.resolver().authorized_admin_roles(session))
    }

    pub async fn is_user_in_role(&self, session: &Session, role: &Name) -> Result<bool> {
        let snapshot = self.snapshot(session.tenant()).await?;
        snapshot.resolver().is_user_in_role(session, role)
    }

    // ========================================================================
    // Separation of duty
    // ========================================================================

    /// Would assigning `role` to the stored user break a static set?
    pub async fn validate_ssd(&self, tenant: &str, user_id: &Name, role: &Name) -> Result<()> {
        let snapshot = self.snapshot(tenant).await?;
        let user = self.user(tenant, user_id).await?;
        snapshot.sod().validate_ssd(&user, role)
    }

    /// Would activating `role` in the session break a dynamic set?
    pub async fn validate_dsd(&self, session: &Session, role: &Name) -> Result<()> {
        let snapshot = self.snapshot(session.tenant()).await?;
        snapshot
            .sod()
            .validate_dsd(session.user_id(), session.role_names(), role)
    }

    // ========================================================================
    // Delegated administration
    // ========================================================================

    pub async fn can_assign(&self, admin: &Session, user_id: &Name, role: &Name) -> Result<bool> {
        ensure_authenticated(admin)?;
        let snapshot = self.snapshot(admin.tenant()).await?;
        let user = self.user(admin.tenant(), user_id).await?;
        snapshot.delegation().can_assign(admin, &user, role)
    }

    pub async fn can_deassign(&self, admin: &Session, user_id: &Name, role: &Name) -> Result<bool> {
        ensure_authenticated(admin)?;
        let snapshot = self.snapshot(admin.tenant()).await?;
        let user = self.user(admin.tenant(), user_id).await?;
        snapshot.delegation().can_deassign(admin, &user, role)
    }

    pub async fn can_grant(&self, admin: &Session, object_name: &Name, role: &Name) -> Result<bool> {
        let snapshot = self.snapshot(admin.tenant()).await?;
        snapshot.delegation().can_grant(admin, object_name, role)
    }

    pub async fn can_revoke(&self, admin: &Session, object_name: &Name, role: &Name) -> Result<bool> {
        let snapshot = self.snapshot(admin.tenant()).await?;
        snapshot.delegation().can_revoke(admin, object_name, role)
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Persist a role assignment after the SSD check
    pub async fn assign_user(&self, tenant: &str, assignment: UserRole) -> Result<()> {
        let entry = AuditEntry::new(AuditOperation::AssignUser, tenant, &assignment.user_id, &assignment.name);
        let result = self.assign_checked(tenant, assignment).await;
        self.record(entry, &result).await;
        result
    }

    async fn assign_checked(&self, tenant: &str, assignment: UserRole) -> Result<()> {
        if assignment.name.is_blank() {
            return Err(RbacError::Validation("Role name cannot be empty".to_string()));
        }
        assignment.constraint.validate()?;

        // held until the directory write completes
        let lock = self.assignment_lock(tenant, &assignment.user_id);
        let _guard = lock.lock().await;

        let snapshot = self.snapshot(tenant).await?;
        let user = self.user(tenant, &assignment.user_id).await?;

        if user.assigned_role(&assignment.name).is_some() {
            return Err(RbacError::Validation(format!(
                "Role '{}' already assigned to '{}'",
                assignment.name, assignment.user_id
            )));
        }

        snapshot.sod().validate_ssd(&user, &assignment.name)?;

        info!("Assigning '{}' to '{}' in tenant '{}'", assignment.name, assignment.user_id, tenant);
        self.directory.assign_user(&tenant.to_string(), assignment).await
    }

    /// Assign on behalf of an administrative session
    ///
    /// The session must be allowed to assign the role to the user.
    pub async fn delegated_assign_user(&self, admin: &Session, assignment: UserRole) -> Result<()> {
        let entry = AuditEntry::new(
            AuditOperation::DelegatedAssignUser,
            admin.tenant(),
            admin.user_id(),
            format!("{}/{}", assignment.user_id, assignment.name),
        )
        .with_session(admin.id());

        let result = async {
            if !self.can_assign(admin, &assignment.user_id, &assignment.name).await? {
                return Err(RbacError::Validation(format!(
                    "Session {} may not assign '{}' to '{}'",
                    admin.id(),
                    assignment.name,
                    assignment.user_id
                )));
            }
            self.assign_checked(admin.tenant(), assignment).await
        }
        .await;

        self.record(entry, &result).await;
        result
    }

    /// Remove a role assignment
    pub async fn deassign_user(&self, tenant: &str, user_id: &Name, role: &Name) -> Result<()> {
        let lock = self.assignment_lock(tenant, user_id);
        let _guard = lock.lock().await;
        self.directory.deassign_user(&tenant.to_string(), user_id, role).await
    }

    fn assignment_lock(&self, tenant: &str, user_id: &Name) -> Arc<Mutex<()>> {
        self.assignment_locks
            .entry((tenant.to_string(), user_id.clone()))
            .or_default()
            .clone()
    }
}

fn session_entry(operation: AuditOperation, session: &Session, target: impl std::fmt::Display) -> AuditEntry {
    AuditEntry::new(operation, session.tenant(), session.user_id(), target).with_session(session.id())
}
