//! Audit trail for sessions, decisions and assignments
//!
//! Entries are kept in a bounded in-memory buffer; once it is full the
//! oldest entries are dropped. Violations carry the error text, which
//! names the SD set and its cardinality.

use crate::error::RbacError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Audited engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    CreateSession,
    Authenticate,
    AddActiveRole,
    DropActiveRole,
    AddActiveAdminRole,
    DropActiveAdminRole,
    CheckAccess,
    AssignUser,
    DelegatedAssignUser,
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateSession => "create_session",
            Self::Authenticate => "authenticate",
            Self::AddActiveRole => "add_active_role",
            Self::DropActiveRole => "drop_active_role",
            Self::AddActiveAdminRole => "add_active_admin_role",
            Self::DropActiveAdminRole => "drop_active_admin_role",
            Self::CheckAccess => "check_access",
            Self::AssignUser => "assign_user",
            Self::DelegatedAssignUser => "delegated_assign_user",
        };
        f.write_str(name)
    }
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: String,

    pub operation: AuditOperation,

    pub tenant: String,

    /// Session the operation ran in, if any
    pub session_id: Option<String>,

    pub user_id: String,

    /// Role, permission or user the operation targeted
    pub target: String,

    /// Operation succeeded / access granted
    pub allowed: bool,

    pub reason: String,

    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        operation: AuditOperation,
        tenant: impl Into<String>,
        user_id: impl fmt::Display,
        target: impl fmt::Display,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            tenant: tenant.into(),
            session_id: None,
            user_id: user_id.to_string(),
            target: target.to_string(),
            allowed: true,
            reason: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_outcome(mut self, allowed: bool, reason: impl Into<String>) -> Self {
        self.allowed = allowed;
        self.reason = reason.into();
        self
    }

    /// Record a failed operation
    pub fn with_error(self, error: &RbacError) -> Self {
        self.with_outcome(false, error.to_string())
    }
}

/// Audit statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditStats {
    pub total: usize,
    pub allowed: usize,
    pub denied: usize,
    /// Denials caused by SSD or DSD
    pub sod_violations: usize,
}

/// Bounded in-memory audit log
#[derive(Debug, Clone)]
pub struct AuditLog {
    buffer: Arc<RwLock<Vec<AuditEntry>>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, dropping the oldest past capacity
    pub async fn record(&self, entry: AuditEntry) {
        let mut buffer = self.buffer.write().await;
        buffer.push(entry);

        if buffer.len() > self.capacity {
            let excess = buffer.len() - self.capacity;
            buffer.drain(0..excess);
        }
    }

    /// Most recent entries for `user_id`, newest first
    pub async fn query_by_user(&self, user_id: &str, limit: usize) -> Vec<AuditEntry> {
        let buffer = self.buffer.read().await;

        buffer
            .iter()
            .rev()
            .filter(|e| e.user_id.eq_ignore_ascii_case(user_id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent entries for an operation, newest first
    pub async fn query_by_operation(&self, operation: AuditOperation, limit: usize) -> Vec<AuditEntry> {
        let buffer = self.buffer.read().await;

        buffer
            .iter()
            .rev()
            .filter(|e| e.operation == operation)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> AuditStats {
        let buffer = self.buffer.read().await;
        let allowed = buffer.iter().filter(|e| e.allowed).count();

        AuditStats {
            total: buffer.len(),
            allowed,
            denied: buffer.len() - allowed,
            sod_violations: buffer
                .iter()
                .filter(|e| e.reason.starts_with("SSD violation") || e.reason.starts_with("DSD violation"))
                .count(),
        }
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }
}
