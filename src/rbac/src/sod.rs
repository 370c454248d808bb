//! Static and dynamic separation of duty
//!
//! - **SSD** is checked before a role is *assigned*: the user's assigned
//!   roles are expanded through their ascendants and every static set that
//!   contains the candidate is counted against that authorized closure.
//! - **DSD** is checked before a role is *activated*: only the literal
//!   activation set is counted, plus at most one hierarchical attribution
//!   per active role (the first ascendant found in the set).
//!
//! In both cases a set with cardinality `C` rejects the candidate once
//! `C - 1` conflicting roles are already held.

use crate::error::{RbacError, Result};
use crate::hierarchy::HierarchyIndex;
use crate::types::{Name, SdSet, SdType, User};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Validated separation-of-duty sets with role -> set membership maps
#[derive(Debug, Clone, Default)]
pub struct SdCatalogue {
    sets: Vec<SdSet>,

    /// Role name -> ids of static sets containing it
    static_by_role: HashMap<Name, Vec<usize>>,

    /// Role name -> ids of dynamic sets containing it
    dynamic_by_role: HashMap<Name, Vec<usize>>,
}

impl SdCatalogue {
    /// Build the catalogue, validating every set
    ///
    /// # Errors
    ///
    /// Returns a validation error if a set has a blank name, fewer than two
    /// for cardinality, no members, or shares its name with another set of
    /// the same type.
    pub fn new(sets: Vec<SdSet>) -> Result<Self> {
        let mut catalogue = Self::default();
        let mut seen: HashMap<(SdType, Name), ()> = HashMap::new();

        for set in sets {
            if set.name.is_blank() {
                return Err(RbacError::Validation("SD set name cannot be empty".to_string()));
            }
            if set.cardinality < 2 {
                return Err(RbacError::Validation(format!(
                    "SD set '{}' has cardinality {}, must be at least 2",
                    set.name, set.cardinality
                )));
            }
            if set.members.is_empty() {
                return Err(RbacError::Validation(format!(
                    "SD set '{}' has no members",
                    set.name
                )));
            }
            if seen.insert((set.sd_type, set.name.clone()), ()).is_some() {
                return Err(RbacError::Validation(format!(
                    "Duplicate SD set '{}'",
                    set.name
                )));
            }

            let id = catalogue.sets.len();
            let by_role = match set.sd_type {
                SdType::Static => &mut catalogue.static_by_role,
                SdType::Dynamic => &mut catalogue.dynamic_by_role,
            };
            for member in &set.members {
                by_role.entry(member.clone()).or_default().push(id);
            }
            catalogue.sets.push(set);
        }

        Ok(catalogue)
    }

    /// Sets of the given type that list `role` as a member
    pub fn sets_containing<'a>(
        &'a self,
        role: &Name,
        sd_type: SdType,
    ) -> impl Iterator<Item = &'a SdSet> + 'a {
        let by_role = match sd_type {
            SdType::Static => &self.static_by_role,
            SdType::Dynamic => &self.dynamic_by_role,
        };
        by_role
            .get(role)
            .map(|ids| ids.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&id| &self.sets[id])
    }

    /// Look a set up by name and type
    pub fn get(&self, name: &Name, sd_type: SdType) -> Option<&SdSet> {
        self.sets
            .iter()
            .find(|s| s.sd_type == sd_type && &s.name == name)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Separation-of-duty validator over a role hierarchy and SD catalogue
#[derive(Debug, Clone, Copy)]
pub struct SodValidator<'a> {
    roles: &'a HierarchyIndex,
    catalogue: &'a SdCatalogue,
}

impl<'a> SodValidator<'a> {
    pub fn new(roles: &'a HierarchyIndex, catalogue: &'a SdCatalogue) -> Self {
        Self { roles, catalogue }
    }

    /// Can `candidate` be assigned to `user` without breaking a static set?
    pub fn validate_ssd(&self, user: &User, candidate: &Name) -> Result<()> {
        let mut sets = self.catalogue.sets_containing(candidate, SdType::Static).peekable();
        if sets.peek().is_none() {
            return Ok(());
        }

        let authorized = self.roles.ascendants(user.roles.iter().map(|ur| &ur.name));

        for set in sets {
            let count = authorized.iter().filter(|r| set.members.contains(*r)).count();
            debug!(
                "SSD '{}' for user '{}' + '{}': {} conflicting of cardinality {}",
                set.name, user.user_id, candidate, count, set.cardinality
            );
            if count >= set.cardinality - 1 {
                warn!(
                    "SSD violation: user '{}' cannot be assigned '{}' (set '{}', cardinality {})",
                    user.user_id, candidate, set.name, set.cardinality
                );
                return Err(RbacError::SsdViolation {
                    set: set.name.to_string(),
                    cardinality: set.cardinality,
                    user_id: user.user_id.to_string(),
                    role: candidate.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Can `candidate` be activated alongside `active`?
    ///
    /// `active` is processed in order; the candidate itself is ignored if
    /// it appears in the list.
    pub fn validate_dsd<'r, I>(&self, user_id: &Name, active: I, candidate: &Name) -> Result<()>
    where
        I: IntoIterator<Item = &'r Name>,
        I::IntoIter: Clone,
    {
        let active = active.into_iter().filter(|r| *r != candidate);

        for set in self.catalogue.sets_containing(candidate, SdType::Dynamic) {
            let bound = set.cardinality - 1;
            let mut count = 0usize;

            for role in active.clone() {
                if set.members.contains(role) {
                    count += 1;
                } else if self
                    .roles
                    .ascendants_of(role)
                    .iter()
                    .any(|ascendant| set.members.contains(ascendant))
                {
                    // one attribution per active role, however many ancestors collide
                    count += 1;
                }

                if count >= bound {
                    warn!(
                        "DSD violation: user '{}' cannot activate '{}' (set '{}', cardinality {})",
                        user_id, candidate, set.name, set.cardinality
                    );
                    return Err(RbacError::DsdViolation {
                        set: set.name.to_string(),
                        cardinality: set.cardinality,
                        user_id: user_id.to_string(),
                        role: candidate.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
