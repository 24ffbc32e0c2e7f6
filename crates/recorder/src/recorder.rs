use crate::clock::MonotonicClock;
use crate::error::{AuditError, RecordFailure};
use secura_audit_spec::{ActionType, AuditRecord, LedgerRef, Metadata, RecordId, RecordStatus, UserId};
use secura_common::{content_hash, ContentHash};
use secura_ledger::{CallContext, Ledger};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// One completed LLM interaction, with payloads already anonymized by the caller.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub user_id: UserId,
    pub action_type: ActionType,
    pub request: Value,
    pub response: Value,
    pub metadata: Metadata,
}

impl Interaction {
    pub fn new(user_id: UserId, action_type: ActionType, request: Value, response: Value) -> Self {
        Self { user_id, action_type, request, response, metadata: Metadata::new() }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// When the gateway considers an interaction audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPolicy {
    /// Hash now, commit on a background task; the client is answered immediately.
    #[default]
    BestEffort,
    /// Wait for the ledger before answering the client.
    Durable,
}

impl FromStr for AuditPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(AuditPolicy::BestEffort),
            "durable" => Ok(AuditPolicy::Durable),
            other => Err(format!("unknown audit policy: {other}")),
        }
    }
}

/// What the gateway learns about the audit of one interaction.
#[derive(Debug)]
pub enum AuditReceipt {
    Committed { record_id: RecordId, content_hash: ContentHash, ledger_ref: LedgerRef },
    /// Commit handed to a background task (best-effort policy). `settle` waits
    /// for its outcome; dropping the receipt leaves the commit running.
    Pending { record_id: RecordId, content_hash: ContentHash, commit: PendingCommit },
    Failed { record_id: Option<RecordId>, content_hash: Option<ContentHash>, error: AuditError },
}

/// Handle on a background commit.
pub struct PendingCommit(JoinHandle<AuditReceipt>);

impl fmt::Debug for PendingCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommit").field("finished", &self.0.is_finished()).finish()
    }
}

impl AuditReceipt {
    pub fn status(&self) -> RecordStatus {
        match self {
            AuditReceipt::Committed { .. } => RecordStatus::Committed,
            AuditReceipt::Pending { .. } => RecordStatus::Pending,
            AuditReceipt::Failed { .. } => RecordStatus::Failed,
        }
    }

    pub fn content_hash(&self) -> Option<&ContentHash> {
        match self {
            AuditReceipt::Committed { content_hash, .. } | AuditReceipt::Pending { content_hash, .. } => {
                Some(content_hash)
            }
            AuditReceipt::Failed { content_hash, .. } => content_hash.as_ref(),
        }
    }

    pub fn ledger_ref(&self) -> Option<&LedgerRef> {
        match self {
            AuditReceipt::Committed { ledger_ref, .. } => Some(ledger_ref),
            _ => None,
        }
    }

    /// Wait for a background commit and return its final receipt. Receipts
    /// that are already final come back unchanged.
    pub async fn settle(self) -> AuditReceipt {
        match self {
            AuditReceipt::Pending { record_id, content_hash, commit } => match commit.0.await {
                Ok(receipt) => receipt,
                Err(e) => {
                    error!(record_id = %record_id, content_hash = %content_hash, error = %e, "background commit task died");
                    AuditReceipt::Failed {
                        record_id: Some(record_id),
                        content_hash: Some(content_hash),
                        error: AuditError::LedgerUnavailable(format!("commit task failed: {e}")),
                    }
                }
            },
            other => other,
        }
    }

    fn from_commit(result: Result<AuditRecord, RecordFailure>) -> Self {
        match result {
            Ok(committed) => match committed.ledger_ref {
                Some(ledger_ref) => AuditReceipt::Committed {
                    record_id: committed.id,
                    content_hash: committed.content_hash,
                    ledger_ref,
                },
                None => AuditReceipt::Failed {
                    record_id: Some(committed.id),
                    content_hash: Some(committed.content_hash),
                    error: AuditError::InvalidRecord("committed record without ledger_ref".into()),
                },
            },
            Err(f) => AuditReceipt::from_failure(f),
        }
    }

    fn from_failure(failure: RecordFailure) -> Self {
        let RecordFailure { record, error } = failure;
        AuditReceipt::Failed {
            record_id: record.as_ref().map(|r| r.id),
            content_hash: record.map(|r| r.content_hash),
            error,
        }
    }
}

/// Builds audit records and commits them to the ledger.
///
/// Shared across request tasks. Timestamps come from the process-wide
/// monotonic clock, so records stay ordered across recorders.
pub struct AuditRecorder {
    ledger: Arc<dyn Ledger>,
    clock: &'static MonotonicClock,
}

impl AuditRecorder {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger, clock: MonotonicClock::global() }
    }

    /// Hash the interaction and build its pending record. No I/O.
    pub fn prepare(&self, interaction: &Interaction) -> Result<AuditRecord, RecordFailure> {
        self.build_record(
            interaction.user_id.clone(),
            interaction.action_type,
            &interaction.request,
            &interaction.response,
            interaction.metadata.clone(),
        )
    }

    /// Append a pending record. On success the returned record is committed;
    /// on failure the record inside the error is marked failed.
    pub async fn commit(&self, ctx: &CallContext, mut record: AuditRecord) -> Result<AuditRecord, RecordFailure> {
        match ctx.run(self.ledger.append(&record)).await {
            Ok(ledger_ref) => {
                if let Err(e) = record.commit(ledger_ref) {
                    return Err(self.failed(record, e.into()));
                }
                info!(
                    record_id = %record.id,
                    user_id = %record.user_id,
                    action_type = %record.action_type,
                    content_hash = %record.content_hash,
                    ledger_ref = record.ledger_ref.as_ref().map(|r| r.as_str()).unwrap_or_default(),
                    "audit record committed"
                );
                Ok(record)
            }
            Err(e) => Err(self.failed(record, e.into())),
        }
    }

    pub async fn record(&self, ctx: &CallContext, interaction: &Interaction) -> Result<AuditRecord, RecordFailure> {
        let record = self.prepare(interaction)?;
        self.commit(ctx, record).await
    }

    /// Narrow form of `record`: ledger reference or the raw error, for callers
    /// that retry, queue or drop on their own.
    pub async fn record_interaction(
        &self,
        ctx: &CallContext,
        user_id: UserId,
        action_type: ActionType,
        request: &Value,
        response: &Value,
        metadata: Metadata,
    ) -> Result<LedgerRef, AuditError> {
        let record = self
            .build_record(user_id, action_type, request, response, metadata)
            .map_err(|f| f.error)?;
        let committed = self.commit(ctx, record).await.map_err(|f| f.error)?;
        committed
            .ledger_ref
            .ok_or_else(|| AuditError::InvalidRecord("committed record without ledger_ref".into()))
    }

    /// Record according to `policy`. Never returns an error: failures come back
    /// as `AuditReceipt::Failed` and are already logged.
    ///
    /// Best-effort commits run on a spawned task under a clone of `ctx`, so
    /// canceling the request still cancels its pending commit. The returned
    /// `Pending` receipt can be settled to learn how the commit ended.
    pub async fn submit(self: &Arc<Self>, ctx: &CallContext, interaction: &Interaction, policy: AuditPolicy) -> AuditReceipt {
        let record = match self.prepare(interaction) {
            Ok(r) => r,
            Err(f) => return AuditReceipt::from_failure(f),
        };

        match policy {
            AuditPolicy::Durable => AuditReceipt::from_commit(self.commit(ctx, record).await),
            AuditPolicy::BestEffort => {
                let (record_id, content_hash) = (record.id, record.content_hash.clone());
                let recorder = Arc::clone(self);
                let ctx = ctx.clone();
                let handle = tokio::spawn(async move { AuditReceipt::from_commit(recorder.commit(&ctx, record).await) });
                AuditReceipt::Pending { record_id, content_hash, commit: PendingCommit(handle) }
            }
        }
    }

    fn build_record(
        &self,
        user_id: UserId,
        action_type: ActionType,
        request: &Value,
        response: &Value,
        metadata: Metadata,
    ) -> Result<AuditRecord, RecordFailure> {
        let hash = content_hash(request, response).map_err(|e| {
            let error = AuditError::from(e);
            error!(user_id = %user_id, action_type = %action_type, error = %error, "content hash failed");
            RecordFailure { record: None, error }
        })?;
        let record = AuditRecord::pending(user_id, action_type, hash, metadata, self.clock.now());
        debug!(record_id = %record.id, content_hash = %record.content_hash, "audit record prepared");
        Ok(record)
    }

    fn failed(&self, mut record: AuditRecord, error: AuditError) -> RecordFailure {
        if record.fail().is_err() {
            debug!(record_id = %record.id, status = %record.status, "record not pending; status unchanged");
        }
        error!(
            record_id = %record.id,
            user_id = %record.user_id,
            action_type = %record.action_type,
            content_hash = %record.content_hash,
            kind = error.kind(),
            retryable = error.is_retryable(),
            error = %error,
            "audit record failed"
        );
        RecordFailure { record: Some(record), error }
    }
}
