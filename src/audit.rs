use async_trait::async_trait;
use serde::Serialize;
use ulid::Ulid;

use crate::model::Ms;

/// One line of the audit trail: who did what to which entity.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: Ms,
    pub actor: String,
    pub op: &'static str,
    pub entity: Ulid,
    pub detail: String,
}

/// Sink for audit records, invoked after every successful mutation.
/// Implementations must not fail the transition: the engine awaits
/// `record` but ignores whatever the sink does with the entry.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

/// Default sink: structured tracing events on target `audit`. The host
/// portal swaps in its own sink to persist the trail.
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            at = entry.at,
            actor = %entry.actor,
            op = entry.op,
            entity = %entry.entity,
            detail = %entry.detail,
        );
    }
}
