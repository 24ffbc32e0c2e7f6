use crate::LedgerError;
use secura_audit_spec::{AuditRecord, LedgerRef, RecordId, UserId};
use secura_common::ContentHash;
use std::collections::{HashMap, HashSet};

/// In-process view of committed records: primary by id, secondary by user and
/// by content hash. Backends mutate it in the same critical section as the
/// append itself, so it never lags the store.
#[derive(Debug, Default)]
pub(crate) struct LedgerIndex {
    records: Vec<AuditRecord>,
    by_id: HashMap<RecordId, usize>,
    by_user: HashMap<UserId, Vec<usize>>,
    hashes: HashSet<ContentHash>,
}

pub(crate) enum Prior {
    /// Same id, same content: the append already happened.
    Duplicate(LedgerRef),
    New,
}

impl LedgerIndex {
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Checks a record against the index before it is written anywhere.
    pub(crate) fn check(&self, record: &AuditRecord) -> Result<Prior, LedgerError> {
        record.validate_for_append()?;
        let Some(&pos) = self.by_id.get(&record.id) else {
            return Ok(Prior::New);
        };
        let existing = &self.records[pos];
        if existing.user_id == record.user_id && existing.content_hash == record.content_hash {
            let ledger_ref = existing
                .ledger_ref
                .clone()
                .ok_or_else(|| LedgerError::Unavailable(format!("indexed record {} has no ledger_ref", record.id)))?;
            return Ok(Prior::Duplicate(ledger_ref));
        }
        Err(LedgerError::InvalidInput(format!(
            "record id {} already committed with different content",
            record.id
        )))
    }

    /// Caller must have run `check` and got `Prior::New`.
    pub(crate) fn insert(&mut self, committed: AuditRecord) {
        let pos = self.records.len();
        self.by_id.insert(committed.id, pos);
        self.by_user.entry(committed.user_id.clone()).or_default().push(pos);
        self.hashes.insert(committed.content_hash.clone());
        self.records.push(committed);
    }

    pub(crate) fn contains_hash(&self, content_hash: &ContentHash) -> bool {
        self.hashes.contains(content_hash)
    }

    pub(crate) fn get(&self, id: &RecordId) -> Option<AuditRecord> {
        self.by_id.get(id).map(|&p| self.records[p].clone())
    }

    pub(crate) fn list_by_user(&self, user_id: &UserId) -> Vec<AuditRecord> {
        let mut out: Vec<AuditRecord> = self
            .by_user
            .get(user_id)
            .map(|positions| positions.iter().map(|&p| self.records[p].clone()).collect())
            .unwrap_or_default();
        // Stable sort: equal timestamps keep append order.
        out.sort_by_key(|r| r.timestamp);
        out
    }
}
