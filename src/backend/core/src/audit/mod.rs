//! Request audit log.
//!
//! [`AuditLayer`](crate::middleware::AuditLayer) observes every API request
//! after its response has been produced and hands an [`AuditEntry`] to the
//! [`AuditLogger`]. The logger owns a bounded channel drained by a writer
//! task that persists entries in the store. A full or closed channel drops
//! the entry with a warning; the response is never affected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use crate::rbac::models::{AuditLogId, PermissionName, RoleId, UserId};
use crate::store::RbacStore;

/// Default capacity of the audit channel.
pub const DEFAULT_AUDIT_BUFFER: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// Audit Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// One audited request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditLogId,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub user_id: Option<UserId>,
    pub role_id: Option<RoleId>,
    /// Permission the route required, when it was permission-gated.
    pub permission: Option<PermissionName>,
    /// `allow` or `deny`, when the authorization gate ran.
    pub decision: Option<String>,
    pub duration_ms: u64,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(method: impl Into<String>, path: impl Into<String>, status_code: u16) -> Self {
        Self {
            id: AuditLogId::new(),
            method: method.into(),
            path: path.into(),
            status_code,
            user_id: None,
            role_id: None,
            permission: None,
            decision: None,
            duration_ms: 0,
            user_agent: None,
            client_ip: None,
            created_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Audit Logger
// ═══════════════════════════════════════════════════════════════════════════════

/// Non-blocking handle to the audit writer task.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<AuditEntry>,
}

impl AuditLogger {
    /// Spawn the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn RbacStore>, buffer: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<AuditEntry>(buffer.max(1));

        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                if let Err(e) = store.insert_audit_entry(&entry).await {
                    error!(
                        target: "audit",
                        entry_id = %entry.id,
                        error = %e,
                        "Failed to persist audit entry"
                    );
                    continue;
                }
                debug!(
                    target: "audit",
                    method = %entry.method,
                    path = %entry.path,
                    status = entry.status_code,
                    "Audit entry stored"
                );
            }
            debug!(target: "audit", "Audit writer stopped");
        });

        Self { sender }
    }

    /// Queue an entry without waiting.
    pub fn record(&self, entry: AuditEntry) {
        match self.sender.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                counter!("taskgate_audit_dropped_total", "reason" => "full").increment(1);
                warn!(target: "audit", path = %entry.path, "Audit channel full, entry dropped");
            }
            Err(TrySendError::Closed(entry)) => {
                counter!("taskgate_audit_dropped_total", "reason" => "closed").increment(1);
                warn!(target: "audit", path = %entry.path, "Audit channel closed, entry dropped");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::{OffsetPagination, SortSpec};
    use crate::store::{AuditLogFilter, InMemoryStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_logger_persists_entries() {
        let store = Arc::new(InMemoryStore::new());
        let logger = AuditLogger::spawn(store.clone(), 8);

        let entry = AuditEntry::new("GET", "/api/v1/roles", 200);
        let id = entry.id;
        logger.record(entry);

        let mut found = None;
        for _ in 0..50 {
            found = store.find_audit_entry(id).await.unwrap();
            if found.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stored = found.expect("entry persisted");
        assert_eq!(stored.path, "/api/v1/roles");
        assert_eq!(stored.status_code, 200);

        let (all, total) = store
            .list_audit_entries(&AuditLogFilter::default(), SortSpec::default(), OffsetPagination::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_record_never_blocks_when_full() {
        let (sender, _receiver) = mpsc::channel(1);
        let logger = AuditLogger { sender };

        logger.record(AuditEntry::new("GET", "/a", 200));
        // Second entry finds the channel full and is dropped.
        logger.record(AuditEntry::new("GET", "/b", 200));
    }

    #[tokio::test]
    async fn test_record_after_close_is_dropped() {
        let (sender, receiver) = mpsc::channel(4);
        drop(receiver);
        let logger = AuditLogger { sender };
        logger.record(AuditEntry::new("DELETE", "/api/v1/logs/1", 200));
    }
}
