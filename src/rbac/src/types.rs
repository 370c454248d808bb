//! Core RBAC/ARBAC entity types
//!
//! These are read-only snapshots of directory records. The engine never
//! persists them; it only traverses and evaluates them.

use crate::constraint::Constraint;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque tenant / context key threaded through to the directory
pub type TenantId = String;

/// Unique session identifier
pub type SessionId = String;

/// Case-insensitive identifier (role, user, org unit, object, operation)
///
/// Equality, hashing and ordering ignore ASCII case while the original
/// spelling is kept for display and serialization.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(String);

impl Name {
    /// Create a new name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Original spelling
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    fn folded(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b.to_ascii_lowercase())
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Name {}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.folded() {
            state.write_u8(b);
        }
        // terminator so that ("ab", "c") and ("a", "bc") hash differently in tuples
        state.write_u8(0xff);
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&Name> for Name {
    fn from(n: &Name) -> Self {
        n.clone()
    }
}

fn names<I, N>(items: I) -> BTreeSet<Name>
where
    I: IntoIterator<Item = N>,
    N: Into<Name>,
{
    items.into_iter().map(Into::into).collect()
}

/// RBAC role definition (a node of the role DAG)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: Name,

    #[serde(default)]
    pub description: Option<String>,

    /// Direct parents (ascendants are the transitive closure of these)
    #[serde(default)]
    pub parents: BTreeSet<Name>,

    /// Direct children
    #[serde(default)]
    pub children: BTreeSet<Name>,
}

impl Role {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<Name>) -> Self {
        self.parents.insert(parent.into());
        self
    }

    pub fn with_parents<I, N>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        self.parents.extend(names(parents));
        self
    }

    pub fn with_child(mut self, child: impl Into<Name>) -> Self {
        self.children.insert(child.into());
        self
    }
}

/// Administrative role: same graph shape as [`Role`] plus delegation scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRole {
    pub name: Name,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub parents: BTreeSet<Name>,

    #[serde(default)]
    pub children: BTreeSet<Name>,

    /// Senior end of the delegated role range
    #[serde(default)]
    pub begin_range: Option<Name>,

    /// Junior end of the delegated role range
    #[serde(default)]
    pub end_range: Option<Name>,

    #[serde(default)]
    pub begin_inclusive: bool,

    #[serde(default)]
    pub end_inclusive: bool,

    /// User org units this role may administer
    #[serde(default)]
    pub user_ous: BTreeSet<Name>,

    /// Permission org units this role may administer
    #[serde(default)]
    pub perm_ous: BTreeSet<Name>,
}

impl AdminRole {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            begin_range: None,
            end_range: None,
            begin_inclusive: false,
            end_inclusive: false,
            user_ous: BTreeSet::new(),
            perm_ous: BTreeSet::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<Name>) -> Self {
        self.parents.insert(parent.into());
        self
    }

    /// Set the role range `[begin, end]` with inclusive flags
    pub fn with_range(
        mut self,
        begin: impl Into<Name>,
        begin_inclusive: bool,
        end: impl Into<Name>,
        end_inclusive: bool,
    ) -> Self {
        self.begin_range = Some(begin.into());
        self.begin_inclusive = begin_inclusive;
        self.end_range = Some(end.into());
        self.end_inclusive = end_inclusive;
        self
    }

    pub fn with_user_ou(mut self, ou: impl Into<Name>) -> Self {
        self.user_ous.insert(ou.into());
        self
    }

    pub fn with_perm_ou(mut self, ou: impl Into<Name>) -> Self {
        self.perm_ous.insert(ou.into());
        self
    }
}

/// Org-unit namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgUnitKind {
    /// Organizes users
    User,
    /// Organizes permission objects
    Permission,
}

/// Organizational unit (a node of one of the two OU DAGs)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    pub name: Name,

    pub kind: OrgUnitKind,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub parents: BTreeSet<Name>,

    #[serde(default)]
    pub children: BTreeSet<Name>,
}

impl OrgUnit {
    pub fn new(name: impl Into<Name>, kind: OrgUnitKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<Name>) -> Self {
        self.parents.insert(parent.into());
        self
    }
}

/// Standing RBAC assignment of a role to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: Name,

    /// Role name
    pub name: Name,

    /// Assignment-level temporal constraint (may be narrower than the role's)
    #[serde(default)]
    pub constraint: Constraint,
}

impl UserRole {
    pub fn new(user_id: impl Into<Name>, name: impl Into<Name>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            constraint: Constraint::default(),
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }
}

/// Standing ARBAC assignment of an admin role to a user
///
/// OU sets and role ranges are read from the [`AdminRole`] record at
/// decision time so inherited admin roles are scoped the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAdminRole {
    pub user_id: Name,

    pub name: Name,

    #[serde(default)]
    pub constraint: Constraint,
}

impl UserAdminRole {
    pub fn new(user_id: impl Into<Name>, name: impl Into<Name>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            constraint: Constraint::default(),
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }
}

/// User record with its standing assignments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: Name,

    /// User org unit
    #[serde(default)]
    pub ou: Option<Name>,

    #[serde(default)]
    pub roles: Vec<UserRole>,

    #[serde(default)]
    pub admin_roles: Vec<UserAdminRole>,

    /// User-level temporal constraint
    #[serde(default)]
    pub constraint: Constraint,

    /// Account locked
    #[serde(default)]
    pub locked: bool,

    /// Password reset pending
    #[serde(default)]
    pub reset: bool,
}

impl User {
    pub fn new(user_id: impl Into<Name>) -> Self {
        Self {
            user_id: user_id.into(),
            ou: None,
            roles: Vec::new(),
            admin_roles: Vec::new(),
            constraint: Constraint::default(),
            locked: false,
            reset: false,
        }
    }

    pub fn with_ou(mut self, ou: impl Into<Name>) -> Self {
        self.ou = Some(ou.into());
        self
    }

    /// Assign a role with no constraint
    pub fn with_role(mut self, role: impl Into<Name>) -> Self {
        let assignment = UserRole::new(self.user_id.clone(), role);
        self.roles.push(assignment);
        self
    }

    /// Assign a role with an assignment-level constraint
    pub fn with_constrained_role(mut self, role: impl Into<Name>, constraint: Constraint) -> Self {
        let assignment = UserRole::new(self.user_id.clone(), role).with_constraint(constraint);
        self.roles.push(assignment);
        self
    }

    pub fn with_admin_role(mut self, role: impl Into<Name>) -> Self {
        let assignment = UserAdminRole::new(self.user_id.clone(), role);
        self.admin_roles.push(assignment);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    /// Find a standing RBAC assignment by role name
    pub fn assigned_role(&self, role: &Name) -> Option<&UserRole> {
        self.roles.iter().find(|ur| &ur.name == role)
    }

    /// Find a standing ARBAC assignment by admin role name
    pub fn assigned_admin_role(&self, role: &Name) -> Option<&UserAdminRole> {
        self.admin_roles.iter().find(|ur| &ur.name == role)
    }
}

/// Protected object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermObj {
    pub object_name: Name,

    /// Permission org unit
    #[serde(default)]
    pub ou: Option<Name>,

    /// Object lives in the ARBAC permission space
    #[serde(default)]
    pub admin: bool,

    #[serde(default)]
    pub description: Option<String>,
}

impl PermObj {
    pub fn new(object_name: impl Into<Name>) -> Self {
        Self {
            object_name: object_name.into(),
            ou: None,
            admin: false,
            description: None,
        }
    }

    pub fn with_ou(mut self, ou: impl Into<Name>) -> Self {
        self.ou = Some(ou.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }
}

/// Lookup key of a permission: `(admin, objectName, opName, objectId)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionKey {
    pub admin: bool,
    pub object_name: Name,
    pub op_name: Name,
    pub object_id: Option<Name>,
}

impl PermissionKey {
    /// RBAC-space key for `(object, operation)`
    pub fn new(object_name: impl Into<Name>, op_name: impl Into<Name>) -> Self {
        Self {
            admin: false,
            object_name: object_name.into(),
            op_name: op_name.into(),
            object_id: None,
        }
    }

    pub fn with_object_id(mut self, object_id: impl Into<Name>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    /// Move the key into the ARBAC permission space
    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object_name, self.op_name)?;
        if let Some(id) = &self.object_id {
            write!(f, "#{}", id)?;
        }
        Ok(())
    }
}

/// Operation on a protected object, with its grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub object_name: Name,

    pub op_name: Name,

    /// Instance-level scope
    #[serde(default)]
    pub object_id: Option<Name>,

    /// ARBAC permission space
    #[serde(default)]
    pub admin: bool,

    /// Roles granted this permission
    #[serde(default)]
    pub roles: BTreeSet<Name>,

    /// Users granted this permission directly
    #[serde(default)]
    pub users: BTreeSet<Name>,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Permission {
    pub fn new(object_name: impl Into<Name>, op_name: impl Into<Name>) -> Self {
        Self {
            object_name: object_name.into(),
            op_name: op_name.into(),
            object_id: None,
            admin: false,
            roles: BTreeSet::new(),
            users: BTreeSet::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_object_id(mut self, object_id: impl Into<Name>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    pub fn grant_role(mut self, role: impl Into<Name>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn grant_user(mut self, user_id: impl Into<Name>) -> Self {
        self.users.insert(user_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Identity of this permission
    pub fn key(&self) -> PermissionKey {
        PermissionKey {
            admin: self.admin,
            object_name: self.object_name.clone(),
            op_name: self.op_name.clone(),
            object_id: self.object_id.clone(),
        }
    }
}

/// Separation-of-duty set type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SdType {
    /// Evaluated when a role is assigned
    Static,
    /// Evaluated when a role is activated
    Dynamic,
}

/// Separation-of-duty set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdSet {
    pub name: Name,

    #[serde(rename = "type")]
    pub sd_type: SdType,

    /// One more than the number of members that may be held together
    pub cardinality: usize,

    pub members: BTreeSet<Name>,

    #[serde(default)]
    pub description: Option<String>,
}

impl SdSet {
    pub fn new<I, N>(name: impl Into<Name>, sd_type: SdType, cardinality: usize, members: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        Self {
            name: name.into(),
            sd_type,
            cardinality,
            members: names(members),
            description: None,
        }
    }

    pub fn ssd<I, N>(name: impl Into<Name>, cardinality: usize, members: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        Self::new(name, SdType::Static, cardinality, members)
    }

    pub fn dsd<I, N>(name: impl Into<Name>, cardinality: usize, members: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        Self::new(name, SdType::Dynamic, cardinality, members)
    }
}
