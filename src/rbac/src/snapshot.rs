//! Immutable per-tenant policy snapshots
//!
//! Everything a decision needs (the four hierarchies, admin role records,
//! SD sets and permissions) is resolved from the directory once and frozen
//! into a [`PolicySnapshot`]. Readers hold an `Arc` to it; a refresh builds
//! a new snapshot and swaps the `Arc` in the [`SnapshotCache`], so in-flight
//! traversals never observe a half-updated graph.

use crate::config::EngineConfig;
use crate::delegation::DelegationChecker;
use crate::directory::Directory;
use crate::error::{RbacError, Result};
use crate::hierarchy::{HierarchyGraphBuilder, HierarchyIndex, HierarchyNode, DEFAULT_MAX_DEPTH};
use crate::permission::{PermissionCatalogue, PermissionResolver};
use crate::sod::{SdCatalogue, SodValidator};
use crate::types::{AdminRole, Name, OrgUnit, OrgUnitKind, PermObj, Permission, Role, SdSet, TenantId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Frozen view of one tenant's policy
#[derive(Debug)]
pub struct PolicySnapshot {
    tenant: TenantId,
    roles: HierarchyIndex,
    admin_roles: HierarchyIndex,
    user_ous: HierarchyIndex,
    perm_ous: HierarchyIndex,
    admin_records: HashMap<Name, AdminRole>,
    sod: SdCatalogue,
    permissions: PermissionCatalogue,
    built_at: DateTime<Utc>,
}

impl PolicySnapshot {
    pub fn builder(tenant: impl Into<TenantId>) -> PolicySnapshotBuilder {
        PolicySnapshotBuilder::new(tenant)
    }

    /// Read every policy entity for `tenant` from the directory and build
    pub async fn load(directory: &dyn Directory, tenant: &TenantId, config: &EngineConfig) -> Result<Self> {
        let mut user_ous = directory.org_units(tenant, OrgUnitKind::User).await?;
        let perm_ous = directory.org_units(tenant, OrgUnitKind::Permission).await?;
        user_ous.extend(perm_ous);

        PolicySnapshotBuilder::new(tenant.clone())
            .roles(directory.roles(tenant).await?)
            .admin_roles(directory.admin_roles(tenant).await?)
            .org_units(user_ous)
            .sd_sets(directory.sd_sets(tenant).await?)
            .perm_objects(directory.perm_objects(tenant).await?)
            .permissions(directory.permissions(tenant).await?)
            .max_depth(config.max_hierarchy_depth)
            .closure_cache(config.closure_cache)
            .build()
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn roles(&self) -> &HierarchyIndex {
        &self.roles
    }

    pub fn admin_roles(&self) -> &HierarchyIndex {
        &self.admin_roles
    }

    pub fn user_ous(&self) -> &HierarchyIndex {
        &self.user_ous
    }

    pub fn perm_ous(&self) -> &HierarchyIndex {
        &self.perm_ous
    }

    pub fn admin_role(&self, name: &Name) -> Option<&AdminRole> {
        self.admin_records.get(name)
    }

    pub fn sd_sets(&self) -> &SdCatalogue {
        &self.sod
    }

    pub fn permissions(&self) -> &PermissionCatalogue {
        &self.permissions
    }

    pub fn sod(&self) -> SodValidator<'_> {
        SodValidator::new(&self.roles, &self.sod)
    }

    pub fn resolver(&self) -> PermissionResolver<'_> {
        PermissionResolver::new(&self.roles, &self.admin_roles, &self.permissions)
    }

    pub fn delegation(&self) -> DelegationChecker<'_> {
        DelegationChecker::new(
            &self.roles,
            &self.admin_roles,
            &self.user_ous,
            &self.perm_ous,
            &self.admin_records,
            &self.permissions,
        )
    }
}

/// Collects directory records and validates them into a [`PolicySnapshot`]
#[derive(Debug, Clone)]
pub struct PolicySnapshotBuilder {
    tenant: TenantId,
    roles: Vec<Role>,
    admin_roles: Vec<AdminRole>,
    org_units: Vec<OrgUnit>,
    sd_sets: Vec<SdSet>,
    perm_objects: Vec<PermObj>,
    permissions: Vec<Permission>,
    max_depth: usize,
    closure_cache: bool,
}

impl PolicySnapshotBuilder {
    pub fn new(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
            roles: Vec::new(),
            admin_roles: Vec::new(),
            org_units: Vec::new(),
            sd_sets: Vec::new(),
            perm_objects: Vec::new(),
            permissions: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            closure_cache: true,
        }
    }

    pub fn role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles.extend(roles);
        self
    }

    pub fn admin_role(mut self, role: AdminRole) -> Self {
        self.admin_roles.push(role);
        self
    }

    pub fn admin_roles(mut self, roles: impl IntoIterator<Item = AdminRole>) -> Self {
        self.admin_roles.extend(roles);
        self
    }

    pub fn org_unit(mut self, ou: OrgUnit) -> Self {
        self.org_units.push(ou);
        self
    }

    /// User and permission org units; split by [`OrgUnit::kind`]
    pub fn org_units(mut self, ous: impl IntoIterator<Item = OrgUnit>) -> Self {
        self.org_units.extend(ous);
        self
    }

    pub fn sd_set(mut self, set: SdSet) -> Self {
        self.sd_sets.push(set);
        self
    }

    pub fn sd_sets(mut self, sets: impl IntoIterator<Item = SdSet>) -> Self {
        self.sd_sets.extend(sets);
        self
    }

    pub fn perm_object(mut self, object: PermObj) -> Self {
        self.perm_objects.push(object);
        self
    }

    pub fn perm_objects(mut self, objects: impl IntoIterator<Item = PermObj>) -> Self {
        self.perm_objects.extend(objects);
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn closure_cache(mut self, enabled: bool) -> Self {
        self.closure_cache = enabled;
        self
    }

    fn index<'a, T>(&self, label: &'static str, nodes: impl IntoIterator<Item = &'a T>) -> Result<HierarchyIndex>
    where
        T: HierarchyNode + 'a,
    {
        Ok(HierarchyGraphBuilder::from_nodes(label, nodes)?
            .with_max_depth(self.max_depth)
            .build()?
            .with_closure_cache(self.closure_cache))
    }

    /// Validate and freeze
    ///
    /// # Errors
    ///
    /// [`RbacError::Hierarchy`] for a cycle, a duplicate node or a chain
    /// deeper than the depth limit in any of the four graphs, [`RbacError::Validation`] for malformed SD sets or
    /// permissions.
    pub fn build(self) -> Result<PolicySnapshot> {
        if self.tenant.trim().is_empty() {
            return Err(RbacError::Validation("Tenant cannot be empty".to_string()));
        }

        let roles = self.index("role", &self.roles)?;
        let admin_roles = self.index("admin role", &self.admin_roles)?;
        let user_ous = self.index(
            "user org unit",
            self.org_units.iter().filter(|ou| ou.kind == OrgUnitKind::User),
        )?;
        let perm_ous = self.index(
            "permission org unit",
            self.org_units.iter().filter(|ou| ou.kind == OrgUnitKind::Permission),
        )?;

        for set in &self.sd_sets {
            for member in &set.members {
                if !roles.contains(member) {
                    warn!("SD set '{}' lists unknown role '{}'", set.name, member);
                }
            }
        }

        let mut admin_records = HashMap::with_capacity(self.admin_roles.len());
        for record in self.admin_roles {
            for endpoint in record.begin_range.iter().chain(record.end_range.iter()) {
                if !roles.contains(endpoint) {
                    warn!("Admin role '{}' range names unknown role '{}'", record.name, endpoint);
                }
            }
            admin_records.insert(record.name.clone(), record);
        }

        let sod = SdCatalogue::new(self.sd_sets)?;
        let permissions = PermissionCatalogue::new(self.perm_objects, self.permissions)?;

        info!(
            "Built policy snapshot for tenant '{}': {} role(s), {} admin role(s), {} SD set(s), {} permission(s)",
            self.tenant,
            roles.len(),
            admin_roles.len(),
            sod.len(),
            permissions.len()
        );

        Ok(PolicySnapshot {
            tenant: self.tenant,
            roles,
            admin_roles,
            user_ous,
            perm_ous,
            admin_records,
            sod,
            permissions,
            built_at: Utc::now(),
        })
    }
}

/// Per-tenant snapshot registry with atomic swap on refresh
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: DashMap<TenantId, Arc<PolicySnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant: &str) -> Option<Arc<PolicySnapshot>> {
        self.snapshots.get(tenant).map(|entry| Arc::clone(entry.value()))
    }

    /// Install a snapshot, returning the one it replaced
    pub fn install(&self, snapshot: PolicySnapshot) -> (Arc<PolicySnapshot>, Option<Arc<PolicySnapshot>>) {
        let snapshot = Arc::new(snapshot);
        let previous = self
            .snapshots
            .insert(snapshot.tenant.clone(), Arc::clone(&snapshot));
        debug!(
            "Installed snapshot for tenant '{}' (replaced: {})",
            snapshot.tenant,
            previous.is_some()
        );
        (snapshot, previous)
    }

    /// Drop a tenant's snapshot; the next use reloads it
    pub fn invalidate(&self, tenant: &str) -> bool {
        self.snapshots.remove(tenant).is_some()
    }

    pub fn clear(&self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::GraphError;
    use crate::types::User;

    #[test]
    fn test_builder_reports_role_cycle() {
        let result = PolicySnapshot::builder("acme")
            .role(Role::new("a").with_parent("b"))
            .role(Role::new("b").with_parent("a"))
            .build();
        assert!(matches!(
            result,
            Err(RbacError::Hierarchy(GraphError::CircularDependency(_)))
        ));
    }

    #[test]
    fn test_builder_splits_org_units_by_kind() {
        let snapshot = PolicySnapshot::builder("acme")
            .org_unit(OrgUnit::new("HQ", OrgUnitKind::User))
            .org_unit(OrgUnit::new("East", OrgUnitKind::User).with_parent("HQ"))
            .org_unit(OrgUnit::new("Apps", OrgUnitKind::Permission))
            .build()
            .unwrap();

        assert_eq!(snapshot.user_ous().len(), 2);
        assert_eq!(snapshot.perm_ous().len(), 1);
        assert!(snapshot.user_ous().is_ascendant(&Name::new("hq"), &Name::new("east")));
    }

    /// `R0 < R1 < ... < R69`, with `R69` in conflict with `Auditor`
    fn deep_chain() -> PolicySnapshotBuilder {
        let roles = (0..70).map(|i| {
            let role = Role::new(format!("R{}", i));
            if i < 69 {
                role.with_parent(format!("R{}", i + 1))
            } else {
                role
            }
        });
        PolicySnapshot::builder("acme")
            .roles(roles)
            .role(Role::new("Auditor"))
            .sd_set(SdSet::ssd("deep-conflict", 2, ["R69", "Auditor"]))
    }

    #[test]
    fn test_builder_rejects_hierarchy_deeper_than_limit() {
        assert!(matches!(
            deep_chain().build(),
            Err(RbacError::Hierarchy(GraphError::InvalidNode(_)))
        ));
    }

    #[test]
    fn test_ssd_sees_roles_at_the_far_end_of_a_deep_chain() {
        let snapshot = deep_chain().max_depth(128).build().unwrap();
        let user = User::new("u").with_role("R0");

        assert!(snapshot.roles().ascendants_of(&Name::new("R0")).contains(&Name::new("R69")));
        assert!(matches!(
            snapshot.sod().validate_ssd(&user, &Name::new("Auditor")),
            Err(RbacError::SsdViolation { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_bad_sd_set() {
        let result = PolicySnapshot::builder("acme")
            .role(Role::new("Teller"))
            .sd_set(SdSet::ssd("solo", 1, ["Teller"]))
            .build();
        assert!(matches!(result, Err(RbacError::Validation(_))));
    }

    #[test]
    fn test_builder_rejects_blank_tenant() {
        assert!(PolicySnapshot::builder("  ").build().is_err());
    }

    #[test]
    fn test_cache_swap_keeps_old_readers() {
        let cache = SnapshotCache::new();
        let (first, previous) = cache.install(
            PolicySnapshot::builder("acme")
                .role(Role::new("Teller"))
                .build()
                .unwrap(),
        );
        assert!(previous.is_none());

        let reader = cache.get("acme").unwrap();
        let (_, previous) = cache.install(
            PolicySnapshot::builder("acme")
                .role(Role::new("Teller"))
                .role(Role::new("Auditor"))
                .build()
                .unwrap(),
        );

        assert!(Arc::ptr_eq(&previous.unwrap(), &first));
        assert_eq!(reader.roles().len(), 1);
        assert_eq!(cache.get("acme").unwrap().roles().len(), 2);

        assert!(cache.invalidate("acme"));
        assert!(cache.get("acme").is_none());
        assert!(!cache.invalidate("acme"));
    }
}
