use crate::error::VerificationError;
use secura_audit_spec::{AuditRecord, RecordId, UserId};
use secura_common::{content_hash, ContentHash};
use secura_ledger::{CallContext, Ledger, LedgerError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read side of the audit trail: existence proofs and per-user history.
#[derive(Clone)]
pub struct VerificationService {
    ledger: Arc<dyn Ledger>,
}

impl VerificationService {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Whether an interaction with this content hash was committed. Reveals
    /// nothing about which user produced it.
    pub async fn verify(&self, ctx: &CallContext, content_hash: &ContentHash) -> Result<bool, VerificationError> {
        let exists = ctx
            .run(self.ledger.exists(content_hash))
            .await
            .map_err(|e| wrap("verify", content_hash.as_str(), e))?;
        debug!(content_hash = %content_hash, exists, "content hash verified");
        Ok(exists)
    }

    /// Recompute the content hash from payloads a third party holds, then verify it.
    pub async fn verify_interaction<Req, Resp>(
        &self,
        ctx: &CallContext,
        request: &Req,
        response: &Resp,
    ) -> Result<bool, VerificationError>
    where
        Req: Serialize + ?Sized,
        Resp: Serialize + ?Sized,
    {
        let hash = content_hash(request, response)?;
        self.verify(ctx, &hash).await
    }

    pub async fn audit_trail_for(&self, ctx: &CallContext, user_id: &UserId) -> Result<Vec<AuditRecord>, VerificationError> {
        let records = ctx
            .run(self.ledger.list_by_user(user_id))
            .await
            .map_err(|e| wrap("audit_trail_for", user_id.as_str(), e))?;
        debug!(user_id = %user_id, count = records.len(), "audit trail loaded");
        Ok(records)
    }

    /// One committed record by id; `None` if the ledger never committed it.
    pub async fn record(&self, ctx: &CallContext, id: &RecordId) -> Result<Option<AuditRecord>, VerificationError> {
        let id_text = id.to_string();
        let record = ctx
            .run(self.ledger.get(id))
            .await
            .map_err(|e| wrap("record", &id_text, e))?;
        debug!(record_id = %id, found = record.is_some(), "audit record looked up");
        Ok(record)
    }
}

fn wrap(operation: &'static str, input: &str, source: LedgerError) -> VerificationError {
    warn!(operation, input, error = %source, "ledger query failed");
    VerificationError::Ledger { operation, input: input.to_string(), source }
}
