// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::error;

/// Kinds used by the core (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    NewPledge,
    ReceiptProcessed,
    Allocation,
    HostelVerification,
    HostelQuery,
    StatusChange,
    Alert,
    SubscriptionCreated,
    SubscriptionPayment,
    SubscriptionReminder,
    SubscriptionLapsed,
    SubscriptionCompleted,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::NewPledge => "NEW_PLEDGE",
            AuditKind::ReceiptProcessed => "RECEIPT_PROCESSED",
            AuditKind::Allocation => "ALLOCATION",
            AuditKind::HostelVerification => "HOSTEL_VERIFICATION",
            AuditKind::HostelQuery => "HOSTEL_QUERY",
            AuditKind::StatusChange => "STATUS_CHANGE",
            AuditKind::Alert => "ALERT",
            AuditKind::SubscriptionCreated => "SUBSCRIPTION_CREATED",
            AuditKind::SubscriptionPayment => "SUBSCRIPTION_PAYMENT",
            AuditKind::SubscriptionReminder => "SUBSCRIPTION_REMINDER",
            AuditKind::SubscriptionLapsed => "SUBSCRIPTION_LAPSED",
            AuditKind::SubscriptionCompleted => "SUBSCRIPTION_COMPLETED",
        }
    }
}

/// One row per state-changing business action (§4.6, 8-column schema §6).
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub actor: String,
    pub kind: AuditKind,
    pub target_id: String,
    pub action: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub metadata: Value,
}

/// Append-only journal. Writes never fail the enclosing business operation
/// (§4.6, §7): any storage error here is logged to the diagnostic stream
/// instead of propagated, the way the teacher logs and continues on
/// secondary-channel failures in `tap_manager.rs`.
#[derive(Clone)]
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, at: DateTime<Utc>, entry: AuditEntry) {
        let result = sqlx::query!(
            r#"
                INSERT INTO audit_log
                    (ts, actor, event_type, target_id, action, previous_value, new_value, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            at,
            entry.actor,
            entry.kind.as_str(),
            entry.target_id,
            entry.action,
            entry.before,
            entry.after,
            entry.metadata,
        )
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(
                error = %e,
                kind = entry.kind.as_str(),
                target_id = %entry.target_id,
                "audit log write failed; business operation proceeds regardless"
            );
        }
    }
}

/// Logs every AI oracle call to a separate journal (§4.9 step 5: "Always log
/// the AI call to an AI-audit journal"), independent of the business audit
/// log so AI call volume/latency can be inspected without mixing concerns.
#[derive(Clone)]
pub struct AiAuditLog {
    pool: PgPool,
}

impl AiAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        at: DateTime<Utc>,
        operation: &str,
        target_id: &str,
        succeeded: bool,
        raw_response_excerpt: Option<&str>,
    ) {
        let result = sqlx::query!(
            r#"
                INSERT INTO ai_audit_log (ts, operation, target_id, succeeded, response_excerpt)
                VALUES ($1, $2, $3, $4, $5)
            "#,
            at,
            operation,
            target_id,
            succeeded,
            raw_response_excerpt,
        )
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(error = %e, operation, target_id, "AI audit log write failed");
        }
    }
}
