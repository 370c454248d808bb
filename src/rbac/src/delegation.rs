//! Delegated administration scope checks
//!
//! An administrative session may assign a role to a user when one of its
//! authorized admin roles covers both the user's org unit and the role.
//! Granting a permission to a role is the same check with the permission
//! object's org unit instead of the user's.
//!
//! Role ranges follow the role hierarchy, not string order: a role is in
//! `[begin, end]` when it is a descendant of `begin` and an ascendant of
//! `end`. The endpoints themselves only count when flagged inclusive.

use crate::error::{EntityKind, RbacError, Result};
use crate::hierarchy::HierarchyIndex;
use crate::permission::{ensure_authenticated, PermissionCatalogue, PermissionResolver};
use crate::session::Session;
use crate::types::{AdminRole, Name, User};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct DelegationChecker<'a> {
    roles: &'a HierarchyIndex,
    admin_roles: &'a HierarchyIndex,
    user_ous: &'a HierarchyIndex,
    perm_ous: &'a HierarchyIndex,
    admin_records: &'a HashMap<Name, AdminRole>,
    catalogue: &'a PermissionCatalogue,
}

impl<'a> DelegationChecker<'a> {
    pub fn new(
        roles: &'a HierarchyIndex,
        admin_roles: &'a HierarchyIndex,
        user_ous: &'a HierarchyIndex,
        perm_ous: &'a HierarchyIndex,
        admin_records: &'a HashMap<Name, AdminRole>,
        catalogue: &'a PermissionCatalogue,
    ) -> Self {
        Self {
            roles,
            admin_roles,
            user_ous,
            perm_ous,
            admin_records,
            catalogue,
        }
    }

    /// May `admin` assign `role` to `user`?
    pub fn can_assign(&self, admin: &Session, user: &User, role: &Name) -> Result<bool> {
        ensure_authenticated(admin)?;

        let Some(user_ou) = &user.ou else {
            debug!("User '{}' has no org unit; nothing can be delegated", user.user_id);
            return Ok(false);
        };
        let user_scope = self.user_ous.ascendants_of(user_ou);

        let allowed = self.admin_records_for(admin).any(|record| {
            record.user_ous.iter().any(|ou| user_scope.contains(ou)) && self.in_range(record, role)
        });

        debug!(
            "canAssign session={} user='{}' role='{}': {}",
            admin.id(),
            user.user_id,
            role,
            allowed
        );
        Ok(allowed)
    }

    /// May `admin` remove `role` from `user`? Same scope as assignment.
    pub fn can_deassign(&self, admin: &Session, user: &User, role: &Name) -> Result<bool> {
        self.can_assign(admin, user, role)
    }

    /// May `admin` grant an operation on `object_name` to `role`?
    pub fn can_grant(&self, admin: &Session, object_name: &Name, role: &Name) -> Result<bool> {
        ensure_authenticated(admin)?;

        let object = self
            .catalogue
            .object(false, object_name)
            .ok_or_else(|| RbacError::not_found(EntityKind::PermObj, object_name))?;

        let Some(perm_ou) = &object.ou else {
            debug!("Object '{}' has no org unit; nothing can be delegated", object_name);
            return Ok(false);
        };
        let perm_scope = self.perm_ous.ascendants_of(perm_ou);

        let allowed = self.admin_records_for(admin).any(|record| {
            record.perm_ous.iter().any(|ou| perm_scope.contains(ou)) && self.in_range(record, role)
        });

        debug!(
            "canGrant session={} object='{}' role='{}': {}",
            admin.id(),
            object_name,
            role,
            allowed
        );
        Ok(allowed)
    }

    /// May `admin` revoke a grant on `object_name` from `role`?
    pub fn can_revoke(&self, admin: &Session, object_name: &Name, role: &Name) -> Result<bool> {
        self.can_grant(admin, object_name, role)
    }

    /// Records of the session's authorized admin roles (activated + inherited)
    fn admin_records_for(&self, admin: &Session) -> impl Iterator<Item = &'a AdminRole> {
        let records = self.admin_records;
        PermissionResolver::new(self.roles, self.admin_roles, self.catalogue)
            .authorized_admin_roles(admin)
            .into_iter()
            .filter_map(move |name| records.get(&name))
    }

    /// Whether `role` lies inside the admin role's hierarchical range
    pub fn in_range(&self, record: &AdminRole, role: &Name) -> bool {
        let (Some(begin), Some(end)) = (&record.begin_range, &record.end_range) else {
            return false;
        };

        if begin == end {
            return role == begin && (record.begin_inclusive || record.end_inclusive);
        }
        if role == begin {
            return record.begin_inclusive;
        }
        if role == end {
            return record.end_inclusive;
        }

        self.roles.is_ascendant(begin, role) && self.roles.is_ascendant(role, end)
    }
}
