use secura_audit_spec::{AuditRecord, RecordError};
use secura_common::CanonError;
use secura_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Payload could not be canonicalized; nothing was sent to the ledger.
    #[error("encoding error: {0}")]
    Encoding(#[from] CanonError),
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("canceled: {0}")]
    Canceled(String),
}

impl AuditError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuditError::LedgerUnavailable(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::Encoding(_) => "encoding",
            AuditError::LedgerUnavailable(_) => "ledger_unavailable",
            AuditError::InvalidRecord(_) => "invalid_record",
            AuditError::Canceled(_) => "canceled",
        }
    }
}

impl From<LedgerError> for AuditError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(m) => AuditError::LedgerUnavailable(m),
            LedgerError::InvalidInput(m) => AuditError::InvalidRecord(m),
            LedgerError::Canceled(m) => AuditError::Canceled(m),
        }
    }
}

impl From<RecordError> for AuditError {
    fn from(e: RecordError) -> Self {
        AuditError::InvalidRecord(e.to_string())
    }
}

/// A recording attempt that did not commit. `record` is absent when hashing
/// failed before a record could be built; otherwise its status is `failed`.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RecordFailure {
    pub record: Option<AuditRecord>,
    #[source]
    pub error: AuditError,
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("{operation}({input}) failed: {source}")]
    Ledger {
        operation: &'static str,
        input: String,
        #[source]
        source: LedgerError,
    },
    #[error("encoding error: {0}")]
    Encoding(#[from] CanonError),
}

impl VerificationError {
    pub fn ledger_error(&self) -> Option<&LedgerError> {
        match self {
            VerificationError::Ledger { source, .. } => Some(source),
            VerificationError::Encoding(_) => None,
        }
    }
}
