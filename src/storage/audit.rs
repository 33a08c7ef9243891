// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Key custody, KYC, second-factor, withdrawal and reconciliation events are
//! appended to the `audit_events` table, keyed newest-first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{StoreResult, AUDIT_EVENTS};

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Custody events
    WalletCreated,
    KeyRotated,
    KeyRotationRequested,

    // Identity events
    KycVerified,
    KycRejected,
    TwoFactorEnrolled,
    TwoFactorEnabled,
    TwoFactorFailed,

    // Settlement events
    CheckoutSettled,
    WithdrawalRequested,
    WithdrawalBroadcast,
    WithdrawalFailed,
    OrderStatusChanged,
    OrderRefunded,

    // Reconciliation events
    WebhookReconciled,
    WebhookRejected,

    // Auth events
    PermissionDenied,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    /// Resource affected (order id, transaction id, ...).
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only audit table.
#[derive(Clone)]
pub struct AuditLog {
    db: Arc<Database>,
}

impl AuditLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append an event.
    pub fn log(&self, event: &AuditEvent) -> StoreResult<()> {
        let json = serde_json::to_vec(event)?;
        let key = event_key(event);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_EVENTS)?;
            table.insert(key.as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Append an event; storage failures are logged, not returned.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event) {
            tracing::warn!(
                event_type = ?event.event_type,
                error = %e,
                "Failed to persist audit event"
            );
        }
    }

    /// Most recent events first.
    pub fn recent(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        self.scan(limit, |_| true)
    }

    pub fn search_by_user(&self, user_id: &str, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        self.scan(limit, |e| e.user_id.as_deref() == Some(user_id))
    }

    fn scan(
        &self,
        limit: usize,
        filter: impl Fn(&AuditEvent) -> bool,
    ) -> StoreResult<Vec<AuditEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_EVENTS)?;
        let mut events = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let event: AuditEvent = serde_json::from_slice(entry.1.value())?;
            if filter(&event) {
                events.push(event);
                if events.len() >= limit {
                    break;
                }
            }
        }
        Ok(events)
    }
}

fn event_key(event: &AuditEvent) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 1 + event.event_id.len());
    key.extend_from_slice(&(!event.timestamp.timestamp_micros() as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(event.event_id.as_bytes());
    key
}
