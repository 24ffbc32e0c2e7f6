use crate::error::{AuditError, VerificationError};
use crate::recorder::{AuditPolicy, AuditReceipt, AuditRecorder, Interaction};
use crate::verification::VerificationService;
use secura_audit_spec::{ActionType, AuditRecord, LedgerRef, Metadata, RecordId, UserId};
use secura_common::ContentHash;
use secura_ledger::{CallContext, Ledger};
use serde_json::Value;
use std::sync::Arc;

/// The audit surface the gateway layer talks to. Built once per process and
/// cloned into handlers.
#[derive(Clone)]
pub struct AuditService {
    recorder: Arc<AuditRecorder>,
    verifier: VerificationService,
    policy: AuditPolicy,
}

impl AuditService {
    pub fn new(ledger: Arc<dyn Ledger>, policy: AuditPolicy) -> Self {
        Self {
            recorder: Arc::new(AuditRecorder::new(Arc::clone(&ledger))),
            verifier: VerificationService::new(ledger),
            policy,
        }
    }

    pub fn policy(&self) -> AuditPolicy {
        self.policy
    }

    pub fn recorder(&self) -> &Arc<AuditRecorder> {
        &self.recorder
    }

    pub fn verifier(&self) -> &VerificationService {
        &self.verifier
    }

    /// Always waits for the ledger, whatever the configured policy.
    pub async fn record_interaction(
        &self,
        ctx: &CallContext,
        user_id: UserId,
        action_type: ActionType,
        request: &Value,
        response: &Value,
        metadata: Metadata,
    ) -> Result<LedgerRef, AuditError> {
        self.recorder
            .record_interaction(ctx, user_id, action_type, request, response, metadata)
            .await
    }

    /// Record under the configured policy.
    pub async fn submit(&self, ctx: &CallContext, interaction: &Interaction) -> AuditReceipt {
        self.recorder.submit(ctx, interaction, self.policy).await
    }

    /// Accepts the hash as text (hex, optional `0x`, any case).
    pub async fn verify_content_hash(&self, ctx: &CallContext, hash: &str) -> Result<bool, VerificationError> {
        let hash = ContentHash::parse(hash)?;
        self.verifier.verify(ctx, &hash).await
    }

    pub async fn list_user_audit_trail(&self, ctx: &CallContext, user_id: &UserId) -> Result<Vec<AuditRecord>, VerificationError> {
        self.verifier.audit_trail_for(ctx, user_id).await
    }

    pub async fn get_audit_record(&self, ctx: &CallContext, id: &RecordId) -> Result<Option<AuditRecord>, VerificationError> {
        self.verifier.record(ctx, id).await
    }
}
