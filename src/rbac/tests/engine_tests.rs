//! End-to-end engine tests
//!
//! Directory → snapshot → session → decision, driven through `RbacEngine`
//! with an in-memory directory and a fixed clock (Wednesday 2024-05-15).

use chrono::{Duration, NaiveDate, NaiveDateTime};
use cretoai_rbac::{
    Activation, AuditOperation, Constraint, ConstraintCheck, Credential, EngineConfig, EntityKind, FixedClock,
    InMemoryDirectory, Name, PermObj, Permission, PermissionKey, RbacEngine, RbacError, Role, SdSet, Session,
    StaticAuthenticator, TenantData, User, UserRole,
};
use async_trait::async_trait;
use cretoai_rbac::{AdminRole, Directory, OrgUnit, OrgUnitKind, TenantId};
use std::sync::Arc;

const TENANT: &str = "acme";

fn n(s: &str) -> Name {
    Name::new(s)
}

fn wednesday_10am() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 15)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

fn bank() -> TenantData {
    TenantData {
        roles: vec![
            Role::new("Branch"),
            Role::new("Teller").with_parent("Branch"),
            Role::new("Auditor"),
            Role::new("Approver"),
            Role::new("Requester"),
            Role::new("NightOps"),
            Role::new("DayShift"),
        ],
        sd_sets: vec![
            SdSet::ssd("BankSafe", 2, ["Teller", "Auditor"]),
            SdSet::dsd("approvals", 2, ["Approver", "Requester"]),
        ],
        perm_objects: vec![PermObj::new("Account"), PermObj::new("Ledger")],
        permissions: vec![
            Permission::new("Account", "withdraw").grant_role("Branch"),
            Permission::new("Account", "audit").grant_role("Auditor"),
            Permission::new("Account", "approve").grant_role("Approver"),
            Permission::new("Account", "open").grant_role("DayShift"),
            Permission::new("Ledger", "read").grant_user("jdoe"),
        ],
        users: vec![
            User::new("jdoe").with_role("Teller"),
            User::new("nightowl").with_constrained_role("NightOps", Constraint::new().with_day_mask("123")),
            User::new("pat").with_role("Approver").with_role("Requester"),
            User::new("dana").with_constrained_role("DayShift", Constraint::new().with_time_window("0900", "1700")),
            User::new("lee"),
        ],
        ..Default::default()
    }
}

struct Fixture {
    engine: RbacEngine,
    clock: Arc<FixedClock>,
    directory: Arc<InMemoryDirectory>,
}

/// Route engine logs through the test harness; `RUST_LOG` selects the level
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn fixture_with(config: EngineConfig) -> Fixture {
    init_tracing();
    let directory = Arc::new(InMemoryDirectory::new());
    directory.insert_tenant(TENANT, bank()).await;
    let clock = Arc::new(FixedClock::new(wednesday_10am()));
    let authenticator = Arc::new(StaticAuthenticator::new().with_user("jdoe", "secret"));

    let engine = RbacEngine::new(config, directory.clone(), authenticator)
        .unwrap()
        .with_clock(clock.clone());

    Fixture {
        engine,
        clock,
        directory,
    }
}

async fn fixture() -> Fixture {
    fixture_with(EngineConfig::default()).await
}

async fn trusted_session(fx: &Fixture, user: &str) -> Session {
    fx.engine
        .create_session(TENANT, &n(user), &Credential::Trusted, &Activation::All)
        .await
        .unwrap()
}

/// Yields after every user read so concurrent writers interleave with it
struct SlowDirectory {
    inner: Arc<InMemoryDirectory>,
}

#[async_trait]
impl Directory for SlowDirectory {
    async fn roles(&self, tenant: &TenantId) -> cretoai_rbac::Result<Vec<Role>> {
        self.inner.roles(tenant).await
    }

    async fn admin_roles(&self, tenant: &TenantId) -> cretoai_rbac::Result<Vec<AdminRole>> {
        self.inner.admin_roles(tenant).await
    }

    async fn org_units(&self, tenant: &TenantId, kind: OrgUnitKind) -> cretoai_rbac::Result<Vec<OrgUnit>> {
        self.inner.org_units(tenant, kind).await
    }

    async fn sd_sets(&self, tenant: &TenantId) -> cretoai_rbac::Result<Vec<SdSet>> {
        self.inner.sd_sets(tenant).await
    }

    async fn perm_objects(&self, tenant: &TenantId) -> cretoai_rbac::Result<Vec<PermObj>> {
        self.inner.perm_objects(tenant).await
    }

    async fn permissions(&self, tenant: &TenantId) -> cretoai_rbac::Result<Vec<Permission>> {
        self.inner.permissions(tenant).await
    }

    async fn user(&self, tenant: &TenantId, user_id: &Name) -> cretoai_rbac::Result<User> {
        let user = self.inner.user(tenant, user_id).await?;
        tokio::task::yield_now().await;
        Ok(user)
    }

    async fn assign_user(&self, tenant: &TenantId, assignment: UserRole) -> cretoai_rbac::Result<()> {
        self.inner.assign_user(tenant, assignment).await
    }

    async fn deassign_user(&self, tenant: &TenantId, user_id: &Name, role: &Name) -> cretoai_rbac::Result<()> {
        self.inner.deassign_user(tenant, user_id, role).await
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_inherited_permission_grants_access() {
    let fx = fixture().await;
    let mut session = trusted_session(&fx, "jdoe").await;

    let withdraw = PermissionKey::new("Account", "withdraw");
    assert!(fx.engine.check_access(&mut session, &withdraw).await.unwrap());

    // case-insensitive match
    let shouty = PermissionKey::new("ACCOUNT", "WithDraw");
    assert!(fx.engine.check_access(&mut session, &shouty).await.unwrap());

    let audit = PermissionKey::new("Account", "audit");
    assert!(!fx.engine.check_access(&mut session, &audit).await.unwrap());
}

#[tokio::test]
async fn test_ssd_blocks_conflicting_assignment() {
    let fx = fixture().await;

    let result = fx
        .engine
        .assign_user(TENANT, UserRole::new("jdoe", "Auditor"))
        .await;
    match result {
        Err(RbacError::SsdViolation { set, cardinality, .. }) => {
            assert_eq!(set, "BankSafe");
            assert_eq!(cardinality, 2);
        }
        other => panic!("expected SSD violation, got {:?}", other),
    }

    let user = fx.directory.user(&TENANT.to_string(), &n("jdoe")).await.unwrap();
    assert!(user.assigned_role(&n("Auditor")).is_none());
}

#[tokio::test]
async fn test_concurrent_conflicting_assignments_admit_one() {
    init_tracing();
    let inner = Arc::new(InMemoryDirectory::new());
    inner.insert_tenant(TENANT, bank()).await;
    let directory = Arc::new(SlowDirectory { inner: inner.clone() });
    let engine = RbacEngine::new(EngineConfig::default(), directory, Arc::new(StaticAuthenticator::new()))
        .unwrap()
        .with_clock(Arc::new(FixedClock::new(wednesday_10am())));
    engine.snapshot(TENANT).await.unwrap();

    let (teller, auditor) = tokio::join!(
        engine.assign_user(TENANT, UserRole::new("lee", "Teller")),
        engine.assign_user(TENANT, UserRole::new("lee", "Auditor")),
    );

    let results = [&teller, &auditor];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(RbacError::SsdViolation { .. })))
            .count(),
        1
    );

    let lee = inner.user(&TENANT.to_string(), &n("lee")).await.unwrap();
    let held = [n("Teller"), n("Auditor")]
        .iter()
        .filter(|role| lee.assigned_role(role).is_some())
        .count();
    assert_eq!(held, 1);
}

#[tokio::test]
async fn test_day_mask_excludes_role_without_failing() {
    let fx = fixture().await;
    let session = trusted_session(&fx, "nightowl").await;

    assert!(session.is_authenticated());
    assert!(session.roles().is_empty());
    assert_eq!(session.exclusions()[0].check, ConstraintCheck::Day);
}

#[tokio::test]
async fn test_dsd_blocks_conflicting_activation() {
    let fx = fixture().await;
    let mut session = fx
        .engine
        .create_session(TENANT, &n("pat"), &Credential::Trusted, &Activation::roles(["Approver"]))
        .await
        .unwrap();

    let result = fx.engine.add_active_role(&mut session, &n("Requester")).await;
    assert!(matches!(result, Err(RbacError::DsdViolation { .. })));
    assert!(!session.has_active_role(&n("Requester")));

    assert!(fx.engine.validate_dsd(&session, &n("Requester")).await.is_err());
    assert!(fx.engine.validate_dsd(&session, &n("Teller")).await.is_ok());
}

// ============================================================================
// DECISIONS
// ============================================================================

#[tokio::test]
async fn test_direct_user_grant() {
    let fx = fixture().await;
    let mut session = fx
        .engine
        .create_session(TENANT, &n("jdoe"), &Credential::Trusted, &Activation::none())
        .await
        .unwrap();

    let read = PermissionKey::new("Ledger", "read");
    assert!(fx.engine.check_access(&mut session, &read).await.unwrap());
}

#[tokio::test]
async fn test_unknown_object_is_an_error_unknown_operation_is_false() {
    let fx = fixture().await;
    let mut session = trusted_session(&fx, "jdoe").await;

    let vault = PermissionKey::new("Vault", "open");
    assert!(matches!(
        fx.engine.check_access(&mut session, &vault).await,
        Err(RbacError::NotFound { entity: EntityKind::PermObj, .. })
    ));

    let close = PermissionKey::new("Account", "close");
    assert!(!fx.engine.check_access(&mut session, &close).await.unwrap());
}

#[tokio::test]
async fn test_unauthenticated_session_is_rejected() {
    let fx = fixture().await;
    let mut session = Session::new(TENANT, User::new("jdoe").with_role("Teller"), wednesday_10am());

    let withdraw = PermissionKey::new("Account", "withdraw");
    assert!(matches!(
        fx.engine.check_access(&mut session, &withdraw).await,
        Err(RbacError::NotAuthenticated { .. })
    ));
    assert!(matches!(
        fx.engine.session_permissions(&mut session).await,
        Err(RbacError::NotAuthenticated { .. })
    ));
}

#[tokio::test]
async fn test_session_permissions_and_authorized_roles() {
    let fx = fixture().await;
    let mut session = trusted_session(&fx, "jdoe").await;

    let permissions = fx.engine.session_permissions(&mut session).await.unwrap();
    let keys: Vec<String> = permissions.iter().map(|p| p.key().to_string()).collect();
    assert_eq!(keys, vec!["Account.withdraw", "Ledger.read"]);

    let authorized = fx.engine.authorized_roles(&session).await.unwrap();
    assert!(authorized.contains(&n("teller")));
    assert!(authorized.contains(&n("Branch")));
    assert!(fx.engine.is_user_in_role(&session, &n("branch")).await.unwrap());
    assert!(!fx.engine.is_user_in_role(&session, &n("Auditor")).await.unwrap());
}

#[tokio::test]
async fn test_revalidation_before_check_drops_expired_window() {
    let fx = fixture().await;
    let mut session = trusted_session(&fx, "dana").await;
    let open = PermissionKey::new("Account", "open");
    assert!(fx.engine.check_access(&mut session, &open).await.unwrap());

    fx.clock.set(wednesday_10am() + Duration::hours(8));
    assert!(!fx.engine.check_access(&mut session, &open).await.unwrap());
    assert!(session.roles().is_empty());
    assert_eq!(session.exclusions()[0].check, ConstraintCheck::Time);
}

#[tokio::test]
async fn test_revalidation_can_be_disabled() {
    let config = EngineConfig {
        revalidate_on_check: false,
        ..Default::default()
    };
    let fx = fixture_with(config).await;
    let mut session = trusted_session(&fx, "dana").await;

    fx.clock.set(wednesday_10am() + Duration::hours(8));
    let open = PermissionKey::new("Account", "open");
    assert!(fx.engine.check_access(&mut session, &open).await.unwrap());

    fx.engine.revalidate(&mut session).await.unwrap();
    assert!(!fx.engine.check_access(&mut session, &open).await.unwrap());
}

// ============================================================================
// SESSIONS
// ============================================================================

#[tokio::test]
async fn test_password_session() {
    let fx = fixture().await;

    let result = fx
        .engine
        .create_session(TENANT, &n("jdoe"), &Credential::password("nope"), &Activation::All)
        .await;
    assert!(matches!(result, Err(RbacError::AuthenticationFailed { .. })));

    let session = fx.engine.authenticate(TENANT, &n("jdoe"), "secret").await.unwrap();
    assert!(session.is_authenticated());
    assert!(session.roles().is_empty());
}

#[tokio::test]
async fn test_unknown_user_and_tenant() {
    let fx = fixture().await;

    assert!(matches!(
        fx.engine
            .create_session(TENANT, &n("ghost"), &Credential::Trusted, &Activation::All)
            .await,
        Err(RbacError::NotFound { entity: EntityKind::User, .. })
    ));
    assert!(matches!(
        fx.engine
            .create_session("globex", &n("jdoe"), &Credential::Trusted, &Activation::All)
            .await,
        Err(RbacError::NotFound { entity: EntityKind::Tenant, .. })
    ));
}

// ============================================================================
// ASSIGNMENT
// ============================================================================

#[tokio::test]
async fn test_assign_user_writes_through() {
    let fx = fixture().await;

    fx.engine
        .assign_user(TENANT, UserRole::new("jdoe", "Approver"))
        .await
        .unwrap();
    let user = fx.directory.user(&TENANT.to_string(), &n("jdoe")).await.unwrap();
    assert!(user.assigned_role(&n("approver")).is_some());

    assert!(matches!(
        fx.engine.assign_user(TENANT, UserRole::new("jdoe", "Approver")).await,
        Err(RbacError::Validation(_))
    ));

    // the new assignment is visible to the next session
    let session = trusted_session(&fx, "jdoe").await;
    assert!(session.has_active_role(&n("Approver")));

    fx.engine
        .deassign_user(TENANT, &n("jdoe"), &n("Approver"))
        .await
        .unwrap();
    assert!(fx.engine.validate_ssd(TENANT, &n("jdoe"), &n("Approver")).await.is_ok());
}

#[tokio::test]
async fn test_assign_rejects_malformed_constraint() {
    let fx = fixture().await;
    let assignment =
        UserRole::new("jdoe", "Approver").with_constraint(Constraint::new().with_time_window("2500", "0600"));

    assert!(matches!(
        fx.engine.assign_user(TENANT, assignment).await,
        Err(RbacError::Validation(_))
    ));
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

#[tokio::test]
async fn test_refresh_swaps_snapshot() {
    let fx = fixture().await;
    let before = fx.engine.snapshot(TENANT).await.unwrap();

    let mut data = bank();
    data.permissions
        .push(Permission::new("Account", "audit").grant_role("Teller"));
    data.permissions.retain(|p| !(p.op_name == "audit" && p.roles.contains(&n("Auditor"))));
    fx.directory.insert_tenant(TENANT, data).await;

    // still the cached snapshot
    let mut session = trusted_session(&fx, "jdoe").await;
    let audit = PermissionKey::new("Account", "audit");
    assert!(!fx.engine.check_access(&mut session, &audit).await.unwrap());

    let after = fx.engine.refresh(TENANT).await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(fx.engine.check_access(&mut session, &audit).await.unwrap());

    // readers holding the old snapshot are unaffected
    assert!(before.permissions().get(&audit).unwrap().roles.contains(&n("Auditor")));
}

#[tokio::test]
async fn test_invalidate_forces_reload() {
    let fx = fixture().await;
    let first = fx.engine.snapshot(TENANT).await.unwrap();
    assert!(Arc::ptr_eq(&first, &fx.engine.snapshot(TENANT).await.unwrap()));

    assert!(fx.engine.invalidate(TENANT));
    let second = fx.engine.snapshot(TENANT).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let fx = fixture().await;
    let good = fx.engine.snapshot(TENANT).await.unwrap();

    let mut data = bank();
    data.roles.push(Role::new("Branch2").with_parent("Teller"));
    data.roles.push(Role::new("Loop").with_parent("Branch2").with_child("Teller"));
    fx.directory.insert_tenant(TENANT, data).await;

    assert!(matches!(fx.engine.refresh(TENANT).await, Err(RbacError::Hierarchy(_))));
    assert!(Arc::ptr_eq(&good, &fx.engine.snapshot(TENANT).await.unwrap()));
}

#[tokio::test]
async fn test_concurrent_checks_share_snapshot() {
    let fx = Arc::new(fixture().await);
    let mut handles = Vec::new();

    for _ in 0..16 {
        let fx = Arc::clone(&fx);
        handles.push(tokio::spawn(async move {
            let mut session = trusted_session(&fx, "jdoe").await;
            let withdraw = PermissionKey::new("Account", "withdraw");
            fx.engine.check_access(&mut session, &withdraw).await.unwrap()
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

// ============================================================================
// AUDIT
// ============================================================================

#[tokio::test]
async fn test_audit_trail_records_decisions_and_violations() {
    let fx = fixture().await;
    let mut session = trusted_session(&fx, "jdoe").await;
    let withdraw = PermissionKey::new("Account", "withdraw");
    fx.engine.check_access(&mut session, &withdraw).await.unwrap();
    let _ = fx.engine.assign_user(TENANT, UserRole::new("jdoe", "Auditor")).await;

    let log = fx.engine.audit_log().unwrap();
    let entries = log.query_by_user("jdoe", 10).await;
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].operation, AuditOperation::AssignUser);
    assert!(!entries[0].allowed);
    assert!(entries[0].reason.contains("BankSafe"));
    assert_eq!(entries[1].operation, AuditOperation::CheckAccess);
    assert!(entries[1].allowed);
    assert_eq!(entries[1].session_id.as_deref(), Some(session.id()));

    assert_eq!(log.stats().await.sod_violations, 1);
}

#[tokio::test]
async fn test_audit_disabled() {
    let config = EngineConfig {
        enable_audit: false,
        ..Default::default()
    };
    let fx = fixture_with(config).await;
    trusted_session(&fx, "jdoe").await;
    assert!(fx.engine.audit_log().is_none());
}
