//! Directory collaborator: where policy entities and users are stored
//!
//! The engine only reads from the directory when it builds a snapshot or
//! fetches a user, and only writes through [`Directory::assign_user`] /
//! [`Directory::deassign_user`]. Every call carries the opaque tenant key.

use crate::error::{EntityKind, RbacError, Result};
use crate::types::{
    AdminRole, Name, OrgUnit, OrgUnitKind, PermObj, Permission, Role, SdSet, TenantId, User, UserRole,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Persistence layer contract
#[async_trait]
pub trait Directory: Send + Sync {
    async fn roles(&self, tenant: &TenantId) -> Result<Vec<Role>>;

    async fn admin_roles(&self, tenant: &TenantId) -> Result<Vec<AdminRole>>;

    async fn org_units(&self, tenant: &TenantId, kind: OrgUnitKind) -> Result<Vec<OrgUnit>>;

    async fn sd_sets(&self, tenant: &TenantId) -> Result<Vec<SdSet>>;

    async fn perm_objects(&self, tenant: &TenantId) -> Result<Vec<PermObj>>;

    async fn permissions(&self, tenant: &TenantId) -> Result<Vec<Permission>>;

    /// Fetch a user with its standing assignments
    async fn user(&self, tenant: &TenantId, user_id: &Name) -> Result<User>;

    /// Persist a new role assignment
    async fn assign_user(&self, tenant: &TenantId, assignment: UserRole) -> Result<()>;

    /// Remove a role assignment
    async fn deassign_user(&self, tenant: &TenantId, user_id: &Name, role: &Name) -> Result<()>;
}

/// Everything stored for one tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantData {
    pub roles: Vec<Role>,
    pub admin_roles: Vec<AdminRole>,
    pub org_units: Vec<OrgUnit>,
    pub sd_sets: Vec<SdSet>,
    pub perm_objects: Vec<PermObj>,
    pub permissions: Vec<Permission>,
    pub users: Vec<User>,
}

/// In-memory directory implementation
pub struct InMemoryDirectory {
    tenants: Arc<RwLock<HashMap<TenantId, TenantData>>>,
}

impl InMemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            tenants: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed from a JSON document mapping tenant keys to [`TenantData`]
    pub fn from_json(json: &str) -> Result<Self> {
        let tenants: HashMap<TenantId, TenantData> = serde_json::from_str(json)
            .map_err(|e| RbacError::Directory(format!("Invalid directory JSON: {}", e)))?;
        info!("Seeded in-memory directory with {} tenant(s)", tenants.len());
        Ok(Self {
            tenants: Arc::new(RwLock::new(tenants)),
        })
    }

    /// Seed from a JSON file
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&contents)
    }

    /// Replace a tenant's data
    pub async fn insert_tenant(&self, tenant: impl Into<TenantId>, data: TenantData) {
        self.tenants.write().await.insert(tenant.into(), data);
    }

    /// Insert or replace a user record
    pub async fn upsert_user(&self, tenant: &TenantId, user: User) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        let data = tenants
            .get_mut(tenant)
            .ok_or_else(|| RbacError::not_found(EntityKind::Tenant, tenant))?;
        match data.users.iter_mut().find(|u| u.user_id == user.user_id) {
            Some(existing) => *existing = user,
            None => data.users.push(user),
        }
        Ok(())
    }

    async fn read<T>(&self, tenant: &TenantId, f: impl FnOnce(&TenantData) -> T) -> Result<T> {
        let tenants = self.tenants.read().await;
        tenants
            .get(tenant)
            .map(f)
            .ok_or_else(|| RbacError::not_found(EntityKind::Tenant, tenant))
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn roles(&self, tenant: &TenantId) -> Result<Vec<Role>> {
        self.read(tenant, |d| d.roles.clone()).await
    }

    async fn admin_roles(&self, tenant: &TenantId) -> Result<Vec<AdminRole>> {
        self.read(tenant, |d| d.admin_roles.clone()).await
    }

    async fn org_units(&self, tenant: &TenantId, kind: OrgUnitKind) -> Result<Vec<OrgUnit>> {
        self.read(tenant, |d| {
            d.org_units.iter().filter(|ou| ou.kind == kind).cloned().collect()
        })
        .await
    }

    async fn sd_sets(&self, tenant: &TenantId) -> Result<Vec<SdSet>> {
        self.read(tenant, |d| d.sd_sets.clone()).await
    }

    async fn perm_objects(&self, tenant: &TenantId) -> Result<Vec<PermObj>> {
        self.read(tenant, |d| d.perm_objects.clone()).await
    }

    async fn permissions(&self, tenant: &TenantId) -> Result<Vec<Permission>> {
        self.read(tenant, |d| d.permissions.clone()).await
    }

    async fn user(&self, tenant: &TenantId, user_id: &Name) -> Result<User> {
        self.read(tenant, |d| d.users.iter().find(|u| &u.user_id == user_id).cloned())
            .await?
            .ok_or_else(|| RbacError::not_found(EntityKind::User, user_id))
    }

    async fn assign_user(&self, tenant: &TenantId, assignment: UserRole) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        let data = tenants
            .get_mut(tenant)
            .ok_or_else(|| RbacError::not_found(EntityKind::Tenant, tenant))?;

        if !data.roles.iter().any(|r| r.name == assignment.name) {
            return Err(RbacError::not_found(EntityKind::Role, &assignment.name));
        }

        let user = data
            .users
            .iter_mut()
            .find(|u| u.user_id == assignment.user_id)
            .ok_or_else(|| RbacError::not_found(EntityKind::User, &assignment.user_id))?;

        if user.assigned_role(&assignment.name).is_some() {
            return Err(RbacError::Validation(format!(
                "Role '{}' already assigned to '{}'",
                assignment.name, assignment.user_id
            )));
        }

        debug!("Assigned '{}' to '{}' in tenant '{}'", assignment.name, assignment.user_id, tenant);
        user.roles.push(assignment);
        Ok(())
    }

    async fn deassign_user(&self, tenant: &TenantId, user_id: &Name, role: &Name) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        let data = tenants
            .get_mut(tenant)
            .ok_or_else(|| RbacError::not_found(EntityKind::Tenant, tenant))?;

        let user = data
            .users
            .iter_mut()
            .find(|u| &u.user_id == user_id)
            .ok_or_else(|| RbacError::not_found(EntityKind::User, user_id))?;

        let before = user.roles.len();
        user.roles.retain(|ur| &ur.name != role);
        if user.roles.len() == before {
            return Err(RbacError::not_found(
                EntityKind::UserRole,
                format!("{}/{}", user_id, role),
            ));
        }

        debug!("Deassigned '{}' from '{}' in tenant '{}'", role, user_id, tenant);
        Ok(())
    }
}
