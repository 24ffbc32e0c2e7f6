//! secura_ledger
//!
//! Append-only, content-addressed storage for audit records.
//! - `Ledger` is the contract every backend satisfies (embedded log, database
//!   table with hash chaining, external distributed ledger...)
//! - `MemoryLedger`: process-local, no persistence
//! - `FileLedger`: JSONL with hash chaining, replayed and verified on open
//! - `CallContext`: cancellation + deadline for every ledger call
//!
//! Backends own their concurrency: appends for unrelated records may interleave
//! in any order, but each append is atomic and durable once acknowledged.

mod context;
mod file;
mod index;
mod memory;

pub use context::CallContext;
pub use file::{verify_chain, ChainSummary, FileLedger, FileLedgerError, LedgerEntry, GENESIS_HASH};
pub use memory::MemoryLedger;

use async_trait::async_trait;
use secura_audit_spec::{AuditRecord, LedgerRef, RecordError, RecordId, UserId};
use secura_common::ContentHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Transient; the caller may retry.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// Malformed record; retrying will not help.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("ledger call canceled: {0}")]
    Canceled(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

impl From<RecordError> for LedgerError {
    fn from(e: RecordError) -> Self {
        LedgerError::InvalidInput(e.to_string())
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append one pending record. Returns a reference unique to this record.
    ///
    /// Re-appending an already committed id with the same user and content hash
    /// returns the original reference.
    async fn append(&self, record: &AuditRecord) -> Result<LedgerRef, LedgerError>;

    /// Whether any committed record carries this content hash, regardless of user.
    async fn exists(&self, content_hash: &ContentHash) -> Result<bool, LedgerError>;

    /// Committed records of one user, timestamp ascending (ties in append order).
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<AuditRecord>, LedgerError>;

    /// The committed record with this id, if any.
    async fn get(&self, id: &RecordId) -> Result<Option<AuditRecord>, LedgerError>;
}

/// Ledger references are `0x`-prefixed hex digests.
pub(crate) fn ledger_ref_from_digest(hex_digest: &str) -> LedgerRef {
    LedgerRef(format!("0x{hex_digest}"))
}
