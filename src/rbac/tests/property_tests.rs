//! Property tests over generated hierarchies and constraint windows

use chrono::{NaiveDate, NaiveDateTime};
use cretoai_rbac::{
    is_currently_valid, Activation, Constraint, Credential, FixedClock, Name, PermObj, Permission, PermissionKey,
    PolicySnapshot, RbacError, Role, SdSet, SessionManager, StaticAuthenticator, User,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn role_name(i: usize) -> Name {
    Name::new(format!("R{}", i))
}

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 15)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn manager(snapshot: PolicySnapshot) -> SessionManager {
    SessionManager::new(
        Arc::new(snapshot),
        Arc::new(StaticAuthenticator::new()),
        Arc::new(FixedClock::new(at(10, 0))),
    )
}

/// Edges always point from a higher index to a lower one, so the graph is acyclic
fn dag(count: usize, edges: &[(usize, usize)]) -> Vec<Role> {
    let mut roles: Vec<Role> = (0..count).map(|i| Role::new(role_name(i))).collect();
    for &(a, b) in edges {
        let (a, b) = (a % count, b % count);
        if a != b {
            let (child, parent) = (a.max(b), a.min(b));
            roles[child] = roles[child].clone().with_parent(role_name(parent));
        }
    }
    roles
}

/// Reference closure: everything reachable through parent links
fn naive_ascendants(roles: &[Role], start: &[Name]) -> HashSet<Name> {
    let mut seen: HashSet<Name> = HashSet::new();
    let mut stack: Vec<Name> = start.to_vec();
    while let Some(name) = stack.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(role) = roles.iter().find(|r| r.name == name) {
            stack.extend(role.parents.iter().cloned());
        }
    }
    seen
}

proptest! {
    #[test]
    fn ssd_allows_cardinality_minus_one(cardinality in 2usize..6) {
        let members: Vec<Name> = (0..6).map(role_name).collect();
        let snapshot = PolicySnapshot::builder("acme")
            .roles(members.iter().map(|m| Role::new(m.clone())))
            .sd_set(SdSet::ssd("conflict", cardinality, members.iter().cloned()))
            .build()
            .unwrap();

        let mut user = User::new("u");
        for (i, role) in members.iter().take(cardinality).enumerate() {
            let result = snapshot.sod().validate_ssd(&user, role);
            if i + 1 < cardinality {
                prop_assert!(result.is_ok());
                user = user.with_role(role.clone());
            } else {
                let is_ssd = matches!(result, Err(RbacError::SsdViolation { .. }));
                prop_assert!(is_ssd);
            }
        }
    }

    #[test]
    fn dsd_never_activates_cardinality_members(cardinality in 2usize..5, order in Just((0..5usize).collect::<Vec<_>>()).prop_shuffle()) {
        let members: Vec<Name> = (0..5).map(role_name).collect();
        let snapshot = PolicySnapshot::builder("acme")
            .roles(members.iter().map(|m| Role::new(m.clone())))
            .sd_set(SdSet::dsd("conflict", cardinality, members.iter().cloned()))
            .build()
            .unwrap();
        let user = members.iter().fold(User::new("u"), |u, m| u.with_role(m.clone()));

        let manager = manager(snapshot);
        let mut session = tokio_test::block_on(
            manager.create_session(&user, &Credential::Trusted, &Activation::none()),
        )
        .unwrap();

        let activated = order
            .iter()
            .filter(|&&i| manager.add_active_role(&mut session, &members[i]).is_ok())
            .count();
        prop_assert_eq!(activated, cardinality - 1);
        prop_assert_eq!(session.roles().len(), cardinality - 1);
    }

    #[test]
    fn check_access_agrees_with_session_permissions(
        count in 2usize..10,
        edges in prop::collection::vec((0usize..10, 0usize..10), 0..20),
        grants in prop::collection::vec(0usize..10, 6),
        assigned in prop::collection::vec(any::<bool>(), 10),
    ) {
        let roles = dag(count, &edges);
        let permissions: Vec<Permission> = grants
            .iter()
            .enumerate()
            .map(|(op, &role)| Permission::new("Doc", format!("op{}", op)).grant_role(role_name(role % count)))
            .collect();

        let snapshot = PolicySnapshot::builder("acme")
            .roles(roles.clone())
            .perm_object(PermObj::new("Doc"))
            .permissions(permissions.clone())
            .build()
            .unwrap();

        let assigned: Vec<Name> = (0..count).filter(|&i| assigned[i]).map(role_name).collect();
        let user = assigned.iter().fold(User::new("u"), |u, r| u.with_role(r.clone()));

        let manager = manager(snapshot);
        let session = tokio_test::block_on(
            manager.create_session(&user, &Credential::Trusted, &Activation::All),
        )
        .unwrap();

        let resolver = manager.snapshot().resolver();
        let expected = naive_ascendants(&roles, &assigned);
        prop_assert_eq!(resolver.authorized_roles(&session), expected.clone());

        let listed: HashSet<PermissionKey> = resolver
            .session_permissions(&session)
            .unwrap()
            .iter()
            .map(Permission::key)
            .collect();

        for permission in &permissions {
            let key = permission.key();
            let allowed = resolver.check_access(&session, &key).unwrap();
            prop_assert_eq!(allowed, listed.contains(&key));
            prop_assert_eq!(allowed, permission.roles.iter().any(|r| expected.contains(r)));
        }
    }

    #[test]
    fn time_window_is_half_open(
        (begin, end, hour, minute) in (0u32..23).prop_flat_map(|b| (Just(b), (b + 1)..24, 0u32..24, 0u32..60)),
    ) {
        let constraint = Constraint::new()
            .with_time_window(format!("{:02}00", begin), format!("{:02}00", end));
        let minutes = hour * 60 + minute;
        let inside = begin * 60 <= minutes && minutes < end * 60;

        prop_assert_eq!(is_currently_valid(&constraint, at(hour, minute)), inside);
    }
}
