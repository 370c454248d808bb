//! Permission catalogue and session permission resolution
//!
//! The catalogue indexes every [`Permission`] by its [`PermissionKey`] and
//! keeps reverse maps from granted role / user to keys, so resolving a
//! session never scans the whole permission table.

use crate::error::{EntityKind, RbacError, Result};
use crate::hierarchy::HierarchyIndex;
use crate::session::Session;
use crate::types::{Name, PermObj, Permission, PermissionKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

/// Immutable index over permission objects and their operations
#[derive(Debug, Clone, Default)]
pub struct PermissionCatalogue {
    /// `(admin, object name)` -> object record
    objects: HashMap<(bool, Name), PermObj>,

    permissions: HashMap<PermissionKey, Permission>,

    /// `(admin, role)` -> keys granted to that role
    by_role: HashMap<(bool, Name), Vec<PermissionKey>>,

    /// `(admin, user id)` -> keys granted directly to that user
    by_user: HashMap<(bool, Name), Vec<PermissionKey>>,
}

impl PermissionCatalogue {
    /// Index objects and permissions
    ///
    /// # Errors
    ///
    /// Returns a validation error for blank names, duplicate objects or
    /// permissions, and permissions whose object is not registered in the
    /// same (RBAC or ARBAC) space.
    pub fn new(objects: Vec<PermObj>, permissions: Vec<Permission>) -> Result<Self> {
        let mut catalogue = Self::default();

        for object in objects {
            if object.object_name.is_blank() {
                return Err(RbacError::Validation("Permission object name cannot be empty".to_string()));
            }
            let key = (object.admin, object.object_name.clone());
            if catalogue.objects.insert(key.clone(), object).is_some() {
                return Err(RbacError::Validation(format!(
                    "Duplicate permission object '{}'",
                    key.1
                )));
            }
        }

        for permission in permissions {
            if permission.op_name.is_blank() {
                return Err(RbacError::Validation(format!(
                    "Permission on '{}' has an empty operation name",
                    permission.object_name
                )));
            }
            if !catalogue
                .objects
                .contains_key(&(permission.admin, permission.object_name.clone()))
            {
                return Err(RbacError::Validation(format!(
                    "Permission '{}' references unknown object",
                    permission.key()
                )));
            }

            let key = permission.key();
            for role in &permission.roles {
                catalogue
                    .by_role
                    .entry((key.admin, role.clone()))
                    .or_default()
                    .push(key.clone());
            }
            for user in &permission.users {
                catalogue
                    .by_user
                    .entry((key.admin, user.clone()))
                    .or_default()
                    .push(key.clone());
            }
            if catalogue.permissions.insert(key.clone(), permission).is_some() {
                return Err(RbacError::Validation(format!("Duplicate permission '{}'", key)));
            }
        }

        debug!(
            "Indexed {} permission object(s), {} permission(s)",
            catalogue.objects.len(),
            catalogue.permissions.len()
        );

        Ok(catalogue)
    }

    pub fn object(&self, admin: bool, object_name: &Name) -> Option<&PermObj> {
        self.objects.get(&(admin, object_name.clone()))
    }

    pub fn get(&self, key: &PermissionKey) -> Option<&Permission> {
        self.permissions.get(key)
    }

    /// Permissions granted to `role` in the given space
    pub fn granted_to_role(&self, admin: bool, role: &Name) -> impl Iterator<Item = &Permission> {
        self.lookup(&self.by_role, admin, role)
    }

    /// Permissions granted directly to `user_id` in the given space
    pub fn granted_to_user(&self, admin: bool, user_id: &Name) -> impl Iterator<Item = &Permission> {
        self.lookup(&self.by_user, admin, user_id)
    }

    fn lookup<'a>(
        &'a self,
        index: &'a HashMap<(bool, Name), Vec<PermissionKey>>,
        admin: bool,
        name: &Name,
    ) -> impl Iterator<Item = &'a Permission> + 'a {
        index
            .get(&(admin, name.clone()))
            .map(|keys| keys.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(move |key| self.permissions.get(key))
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

/// Resolves what a session may do
///
/// RBAC permissions flow through the role hierarchy, ARBAC permissions
/// through the admin-role hierarchy; direct user grants apply in both.
#[derive(Debug, Clone, Copy)]
pub struct PermissionResolver<'a> {
    roles: &'a HierarchyIndex,
    admin_roles: &'a HierarchyIndex,
    catalogue: &'a PermissionCatalogue,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(
        roles: &'a HierarchyIndex,
        admin_roles: &'a HierarchyIndex,
        catalogue: &'a PermissionCatalogue,
    ) -> Self {
        Self {
            roles,
            admin_roles,
            catalogue,
        }
    }

    /// Activated roles plus their ascendants
    pub fn authorized_roles(&self, session: &Session) -> HashSet<Name> {
        self.roles.ascendants(session.role_names())
    }

    /// Activated admin roles plus their ascendants
    pub fn authorized_admin_roles(&self, session: &Session) -> HashSet<Name> {
        self.admin_roles.ascendants(session.admin_role_names())
    }

    /// Whether `role` is activated or inherited by an activated role
    pub fn is_user_in_role(&self, session: &Session, role: &Name) -> Result<bool> {
        ensure_authenticated(session)?;
        Ok(self.authorized_roles(session).contains(role))
    }

    /// Every RBAC permission reachable from the session, ordered by key
    pub fn session_permissions(&self, session: &Session) -> Result<Vec<Permission>> {
        ensure_authenticated(session)?;
        Ok(self.collect(session, false, &self.authorized_roles(session)))
    }

    /// Every ARBAC permission reachable from the session, ordered by key
    pub fn session_admin_permissions(&self, session: &Session) -> Result<Vec<Permission>> {
        ensure_authenticated(session)?;
        Ok(self.collect(session, true, &self.authorized_admin_roles(session)))
    }

    fn collect(&self, session: &Session, admin: bool, authorized: &HashSet<Name>) -> Vec<Permission> {
        let mut found: BTreeMap<PermissionKey, &Permission> = BTreeMap::new();

        for role in authorized {
            for permission in self.catalogue.granted_to_role(admin, role) {
                found.entry(permission.key()).or_insert(permission);
            }
        }
        for permission in self.catalogue.granted_to_user(admin, session.user_id()) {
            found.entry(permission.key()).or_insert(permission);
        }

        found.into_values().cloned().collect()
    }

    /// Decide whether the session may perform `key`
    ///
    /// `Ok(false)` means the operation exists but is not granted. An
    /// unauthenticated session or an unknown object is an error.
    pub fn check_access(&self, session: &Session, key: &PermissionKey) -> Result<bool> {
        ensure_authenticated(session)?;

        let object = self
            .catalogue
            .object(key.admin, &key.object_name)
            .ok_or_else(|| RbacError::not_found(EntityKind::PermObj, &key.object_name))?;

        let Some(permission) = self.catalogue.get(key) else {
            debug!("No operation '{}' on object '{}'", key.op_name, object.object_name);
            return Ok(false);
        };

        if permission.users.contains(session.user_id()) {
            trace!("'{}' granted directly to '{}'", key, session.user_id());
            return Ok(true);
        }

        let authorized = if key.admin {
            self.authorized_admin_roles(session)
        } else {
            self.authorized_roles(session)
        };
        let granted = permission.roles.iter().any(|role| authorized.contains(role));

        trace!("'{}' for session {}: {}", key, session.id(), granted);
        Ok(granted)
    }
}

pub(crate) fn ensure_authenticated(session: &Session) -> Result<()> {
    if session.is_authenticated() {
        Ok(())
    } else {
        Err(RbacError::NotAuthenticated {
            session_id: session.id().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_rejects_orphan_permission() {
        let result = PermissionCatalogue::new(
            vec![PermObj::new("Account")],
            vec![Permission::new("Ledger", "read")],
        );
        assert!(matches!(result, Err(RbacError::Validation(_))));
    }

    #[test]
    fn test_catalogue_spaces_are_separate() {
        // an admin object does not satisfy an RBAC permission
        let result = PermissionCatalogue::new(
            vec![PermObj::new("UserAdmin").admin()],
            vec![Permission::new("UserAdmin", "assign")],
        );
        assert!(result.is_err());

        let catalogue = PermissionCatalogue::new(
            vec![PermObj::new("UserAdmin").admin(), PermObj::new("UserAdmin")],
            vec![
                Permission::new("UserAdmin", "assign").admin().grant_role("BranchAdmin"),
                Permission::new("UserAdmin", "assign").grant_role("Teller"),
            ],
        )
        .unwrap();
        assert_eq!(catalogue.len(), 2);
        assert_eq!(catalogue.granted_to_role(true, &Name::new("branchadmin")).count(), 1);
        assert_eq!(catalogue.granted_to_role(false, &Name::new("BranchAdmin")).count(), 0);
    }

    #[test]
    fn test_catalogue_rejects_duplicate_key() {
        let result = PermissionCatalogue::new(
            vec![PermObj::new("Account")],
            vec![
                Permission::new("Account", "withdraw"),
                Permission::new("ACCOUNT", "Withdraw"),
            ],
        );
        assert!(matches!(result, Err(RbacError::Validation(_))));
    }

    #[test]
    fn test_instance_permissions_are_distinct_keys() {
        let catalogue = PermissionCatalogue::new(
            vec![PermObj::new("Account")],
            vec![
                Permission::new("Account", "withdraw").grant_role("Teller"),
                Permission::new("Account", "withdraw").with_object_id("42").grant_user("jdoe"),
            ],
        )
        .unwrap();

        let scoped = PermissionKey::new("account", "WITHDRAW").with_object_id("42");
        assert!(catalogue.get(&scoped).unwrap().users.contains(&Name::new("JDoe")));
        assert_eq!(catalogue.granted_to_user(false, &Name::new("jdoe")).count(), 1);
    }
}
