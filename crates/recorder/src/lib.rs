//! secura_recorder
//!
//! Turns completed LLM interactions into committed audit records and answers
//! verification queries against the ledger.
//!
//! Audit failures are reported, never fatal: the caller already holds the LLM
//! response and decides what (if anything) to tell the end user.

mod clock;
mod error;
mod recorder;
mod service;
mod verification;

pub use clock::MonotonicClock;
pub use error::{AuditError, RecordFailure, VerificationError};
pub use recorder::{AuditPolicy, AuditReceipt, AuditRecorder, Interaction, PendingCommit};
pub use service::AuditService;
pub use verification::VerificationService;

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use secura_audit_spec::{AuditRecord, LedgerRef, RecordId, UserId};
    use secura_common::ContentHash;
    use secura_ledger::{Ledger, LedgerError};
    use std::time::Duration;

    /// Ledger whose backend is down.
    pub struct UnavailableLedger;

    #[async_trait]
    impl Ledger for UnavailableLedger {
        async fn append(&self, _record: &AuditRecord) -> Result<LedgerRef, LedgerError> {
            Err(LedgerError::Unavailable("connection refused".into()))
        }

        async fn exists(&self, _content_hash: &ContentHash) -> Result<bool, LedgerError> {
            Err(LedgerError::Unavailable("connection refused".into()))
        }

        async fn list_by_user(&self, _user_id: &UserId) -> Result<Vec<AuditRecord>, LedgerError> {
            Err(LedgerError::Unavailable("connection refused".into()))
        }

        async fn get(&self, _id: &RecordId) -> Result<Option<AuditRecord>, LedgerError> {
            Err(LedgerError::Unavailable("connection refused".into()))
        }
    }

    /// Ledger that never answers within a reasonable time.
    pub struct StalledLedger;

    #[async_trait]
    impl Ledger for StalledLedger {
        async fn append(&self, _record: &AuditRecord) -> Result<LedgerRef, LedgerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(LedgerRef("0xlate".into()))
        }

        async fn exists(&self, _content_hash: &ContentHash) -> Result<bool, LedgerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(false)
        }

        async fn list_by_user(&self, _user_id: &UserId) -> Result<Vec<AuditRecord>, LedgerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }

        async fn get(&self, _id: &RecordId) -> Result<Option<AuditRecord>, LedgerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }
}
