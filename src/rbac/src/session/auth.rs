//! Credential verification collaborator

use crate::error::{AuthFailure, RbacError, Result};
use crate::types::{Name, TenantId};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// How the caller vouches for the user
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Identity already established upstream; skip password verification
    Trusted,
    Password(String),
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(password.into())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trusted => f.write_str("Trusted"),
            Self::Password(_) => f.write_str("Password(***)"),
        }
    }
}

/// Non-fatal condition reported alongside a successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthWarning {
    /// Password expired; this many grace logins are left
    GraceLoginsRemaining(u32),
    /// Password expires in this many seconds
    PasswordExpiring { seconds: i64 },
    /// Account is flagged for a password reset
    PasswordResetRequired,
}

/// Successful authentication result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOutcome {
    pub warnings: Vec<AuthWarning>,
}

/// External credential verifier
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `password` for `user_id`
    ///
    /// Rejections are reported as [`RbacError::AuthenticationFailed`] with a
    /// specific [`AuthFailure`] code.
    async fn authenticate(&self, tenant: &TenantId, user_id: &Name, password: &str) -> Result<AuthOutcome>;
}

#[derive(Debug, Clone, Default)]
struct PasswordEntry {
    password: String,
    expired: bool,
    grace_logins: u32,
    expires_in: Option<i64>,
}

/// In-memory authenticator keyed by user id
///
/// Tenants are not distinguished. Intended for fixtures and tests.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    entries: RwLock<HashMap<Name, PasswordEntry>>,
    delay: Option<Duration>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user_id: impl Into<Name>, password: impl Into<String>) -> Self {
        self.set_password(user_id, password);
        self
    }

    /// Simulate a slow credential provider
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_password(&self, user_id: impl Into<Name>, password: impl Into<String>) {
        self.entries.write().insert(
            user_id.into(),
            PasswordEntry {
                password: password.into(),
                ..Default::default()
            },
        );
    }

    /// Mark the password expired, allowing `grace_logins` more logins
    pub fn expire(&self, user_id: &Name, grace_logins: u32) {
        if let Some(entry) = self.entries.write().get_mut(user_id) {
            entry.expired = true;
            entry.grace_logins = grace_logins;
        }
    }

    pub fn expiring_in(&self, user_id: &Name, seconds: i64) {
        if let Some(entry) = self.entries.write().get_mut(user_id) {
            entry.expires_in = Some(seconds);
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, tenant: &TenantId, user_id: &Name, password: &str) -> Result<AuthOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fail = |code| RbacError::AuthenticationFailed {
            user_id: user_id.to_string(),
            code,
        };

        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(user_id)
            .filter(|e| e.password == password)
            .ok_or_else(|| fail(AuthFailure::BadCredential))?;

        let mut outcome = AuthOutcome::default();

        if entry.expired {
            if entry.grace_logins == 0 {
                return Err(fail(AuthFailure::Expired));
            }
            entry.grace_logins -= 1;
            outcome
                .warnings
                .push(AuthWarning::GraceLoginsRemaining(entry.grace_logins));
        } else if let Some(seconds) = entry.expires_in {
            outcome.warnings.push(AuthWarning::PasswordExpiring { seconds });
        }

        debug!("Authenticated '{}' in tenant '{}'", user_id, tenant);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        "acme".to_string()
    }

    #[tokio::test]
    async fn test_bad_password_rejected() {
        let auth = StaticAuthenticator::new().with_user("jdoe", "secret");
        let err = auth
            .authenticate(&tenant(), &Name::new("jdoe"), "wrong")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RbacError::AuthenticationFailed { code: AuthFailure::BadCredential, .. }
        ));

        let err = auth
            .authenticate(&tenant(), &Name::new("ghost"), "secret")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RbacError::AuthenticationFailed { code: AuthFailure::BadCredential, .. }
        ));
    }

    #[tokio::test]
    async fn test_grace_logins_count_down() {
        let auth = StaticAuthenticator::new().with_user("jdoe", "secret");
        let user = Name::new("JDOE");
        auth.expire(&user, 1);

        let outcome = auth.authenticate(&tenant(), &user, "secret").await.unwrap();
        assert_eq!(outcome.warnings, vec![AuthWarning::GraceLoginsRemaining(0)]);

        let err = auth.authenticate(&tenant(), &user, "secret").await.unwrap_err();
        assert!(matches!(
            err,
            RbacError::AuthenticationFailed { code: AuthFailure::Expired, .. }
        ));
    }

    #[tokio::test]
    async fn test_expiry_warning() {
        let auth = StaticAuthenticator::new().with_user("jdoe", "secret");
        auth.expiring_in(&Name::new("jdoe"), 3600);

        let outcome = auth
            .authenticate(&tenant(), &Name::new("jdoe"), "secret")
            .await
            .unwrap();
        assert_eq!(outcome.warnings, vec![AuthWarning::PasswordExpiring { seconds: 3600 }]);
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let debug = format!("{:?}", Credential::password("hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
