use crate::index::{LedgerIndex, Prior};
use crate::{ledger_ref_from_digest, Ledger, LedgerError};
use async_trait::async_trait;
use secura_audit_spec::{AuditRecord, LedgerRef, RecordId, UserId};
use secura_common::{sha256_canonical_json, ContentHash};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Process-local ledger. Same contract as the persistent backends, nothing
/// survives a restart.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    index: RwLock<LedgerIndex>,
}

// Material the reference is derived from; sequence keeps refs unique even if
// two records were built identically.
#[derive(Serialize)]
struct RefMaterial<'a> {
    sequence: u64,
    record_id: &'a RecordId,
    content_hash: &'a ContentHash,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(&self, record: &AuditRecord) -> Result<LedgerRef, LedgerError> {
        let mut index = self.index.write().await;
        if let Prior::Duplicate(existing) = index.check(record)? {
            debug!(record_id = %record.id, ledger_ref = %existing, "idempotent re-append");
            return Ok(existing);
        }

        let material = RefMaterial {
            sequence: index.len() as u64,
            record_id: &record.id,
            content_hash: &record.content_hash,
        };
        let digest = sha256_canonical_json(&material).map_err(|e| LedgerError::InvalidInput(e.to_string()))?;
        let ledger_ref = ledger_ref_from_digest(&digest);

        index.insert(record.committed_with(ledger_ref.clone()));
        Ok(ledger_ref)
    }

    async fn exists(&self, content_hash: &ContentHash) -> Result<bool, LedgerError> {
        Ok(self.index.read().await.contains_hash(content_hash))
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<AuditRecord>, LedgerError> {
        Ok(self.index.read().await.list_by_user(user_id))
    }

    async fn get(&self, id: &RecordId) -> Result<Option<AuditRecord>, LedgerError> {
        Ok(self.index.read().await.get(id))
    }
}
