//! # CretoAI RBAC Engine
//!
//! Role-based and administrative role-based access control decisions.
//!
//! ## Features
//!
//! - **Role hierarchies** with cycle detection and memoised closures
//! - **Separation of duty**, static (assignment) and dynamic (activation)
//! - **Temporal constraints** on users, role and admin role assignments
//! - **Sessions** with per-role activation, revalidation and inactivity expiry
//! - **Delegated administration** scoped by org unit and role range
//! - **Per-tenant snapshots** swapped atomically on refresh
//! - **Audit trail** of sessions, decisions and assignments
//!
//! ## Example
//!
//! ```rust
//! use cretoai_rbac::{
//!     Activation, Credential, EngineConfig, InMemoryDirectory, Name, PermissionKey, RbacEngine,
//!     StaticAuthenticator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = InMemoryDirectory::from_json(r#"{
//!         "acme": {
//!             "roles": [
//!                 { "name": "Branch" },
//!                 { "name": "Teller", "parents": ["Branch"] }
//!             ],
//!             "perm_objects": [ { "object_name": "Account" } ],
//!             "permissions": [
//!                 { "object_name": "Account", "op_name": "withdraw", "roles": ["Branch"] }
//!             ],
//!             "users": [
//!                 { "user_id": "jdoe", "roles": [ { "user_id": "jdoe", "name": "Teller" } ] }
//!             ]
//!         }
//!     }"#)?;
//!
//!     let engine = RbacEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(directory),
//!         Arc::new(StaticAuthenticator::new()),
//!     )?;
//!
//!     let mut session = engine
//!         .create_session("acme", &Name::new("jdoe"), &Credential::Trusted, &Activation::All)
//!         .await?;
//!
//!     let withdraw = PermissionKey::new("Account", "withdraw");
//!     if engine.check_access(&mut session, &withdraw).await? {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod constraint;
pub mod delegation;
pub mod directory;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod permission;
pub mod session;
pub mod snapshot;
pub mod sod;
pub mod types;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditLog, AuditOperation, AuditStats};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use constraint::{is_currently_valid, Constraint, ConstraintCheck};
pub use delegation::DelegationChecker;
pub use directory::{Directory, InMemoryDirectory, TenantData};
pub use engine::RbacEngine;
pub use error::{AuthFailure, EntityKind, RbacError, Result};
pub use hierarchy::{CacheStats, GraphError, HierarchyIndex};
pub use permission::{PermissionCatalogue, PermissionResolver};
pub use session::{
    Activation, AuthOutcome, AuthWarning, Authenticator, Credential, Exclusion, Session, SessionManager,
    StaticAuthenticator,
};
pub use snapshot::{PolicySnapshot, PolicySnapshotBuilder, SnapshotCache};
pub use sod::{SdCatalogue, SodValidator};
pub use types::{
    AdminRole, Name, OrgUnit, OrgUnitKind, PermObj, Permission, PermissionKey, Role, SdSet, SdType, SessionId,
    TenantId, User, UserAdminRole, UserRole,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
