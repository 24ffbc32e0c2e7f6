//! secura_audit_spec
//!
//! Strongly-typed audit record for LLM interactions.
//! - One record per completed interaction
//! - `content_hash` covers canonical(request) || canonical(response) only
//! - `metadata` is kept outside the hash so it can be redacted or extended
//!   without breaking verification
//!
//! Lifecycle: pending -> committed (exactly once) | pending -> failed.
//! NOTE: schema_version is per-record, not global.

use chrono::{DateTime, Utc};
use secura_common::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const RECORD_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("user_id must not be empty")]
    MissingUserId,
    #[error("record {0} already carries a ledger reference")]
    UnexpectedLedgerRef(RecordId),
    #[error("record {id} is {status}, expected pending")]
    NotPending { id: RecordId, status: RecordStatus },
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: RecordStatus, to: RecordStatus },
    #[error("unsupported record schema_version {0}")]
    UnsupportedSchema(u8),
    #[error("unknown action type: {0}")]
    UnknownAction(String),
    #[error("metadata {0} is not a finite number")]
    NonFiniteMetadata(String),
    #[error("invalid record id: {0}")]
    InvalidRecordId(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(RecordId)
            .map_err(|_| RecordError::InvalidRecordId(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference handed out by a ledger on a successful append
/// (a transaction id for chain backends, an entry hash for the embedded ones).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerRef(pub String);

impl LedgerRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Completion,
    Chat,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Completion => "completion",
            ActionType::Chat => "chat",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completion" => Ok(ActionType::Completion),
            "chat" => Ok(ActionType::Chat),
            other => Err(RecordError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Committed,
    Failed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Committed => "committed",
            RecordStatus::Failed => "failed",
        })
    }
}

/// Scalar metadata value (model name, token counts, client ip, user agent...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::Int(i64::from(v))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

/// Ordered so serialized metadata is stable without extra canonicalization.
pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub schema_version: u8,
    pub id: RecordId,
    pub user_id: UserId,
    pub action_type: ActionType,
    pub content_hash: ContentHash,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_ref: Option<LedgerRef>,
    pub status: RecordStatus,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// New pending record with a fresh id.
    pub fn pending(
        user_id: UserId,
        action_type: ActionType,
        content_hash: ContentHash,
        metadata: Metadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            id: RecordId::new(),
            user_id,
            action_type,
            content_hash,
            metadata,
            ledger_ref: None,
            status: RecordStatus::Pending,
            timestamp,
        }
    }

    /// Shape checks a ledger runs before accepting a record.
    pub fn validate_for_append(&self) -> Result<(), RecordError> {
        if self.schema_version != RECORD_SCHEMA_VERSION {
            return Err(RecordError::UnsupportedSchema(self.schema_version));
        }
        if self.user_id.0.trim().is_empty() {
            return Err(RecordError::MissingUserId);
        }
        if self.status != RecordStatus::Pending {
            return Err(RecordError::NotPending { id: self.id, status: self.status });
        }
        if self.ledger_ref.is_some() {
            return Err(RecordError::UnexpectedLedgerRef(self.id));
        }
        // JSON has no NaN or infinity; serde_json would write null and the
        // stored record would no longer read back as a number.
        if let Some((key, _)) = self
            .metadata
            .iter()
            .find(|(_, v)| matches!(v, MetadataValue::Float(f) if !f.is_finite()))
        {
            return Err(RecordError::NonFiniteMetadata(key.clone()));
        }
        Ok(())
    }

    pub fn commit(&mut self, ledger_ref: LedgerRef) -> Result<(), RecordError> {
        self.transition(RecordStatus::Committed)?;
        self.ledger_ref = Some(ledger_ref);
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), RecordError> {
        self.transition(RecordStatus::Failed)
    }

    /// Copy of this record as the ledger reports it once committed.
    pub fn committed_with(&self, ledger_ref: LedgerRef) -> Self {
        let mut out = self.clone();
        out.status = RecordStatus::Committed;
        out.ledger_ref = Some(ledger_ref);
        out
    }

    pub fn is_committed(&self) -> bool {
        self.status == RecordStatus::Committed
    }

    fn transition(&mut self, to: RecordStatus) -> Result<(), RecordError> {
        if self.status != RecordStatus::Pending {
            return Err(RecordError::InvalidTransition { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> AuditRecord {
        let hash = secura_common::content_hash(&json!({"prompt": "hi"}), &json!({"text": "hello"})).unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("model".into(), "gpt-4".into());
        metadata.insert("total_tokens".into(), MetadataValue::Int(12));
        AuditRecord::pending(UserId::new("user-1"), ActionType::Completion, hash, metadata, Utc::now())
    }

    #[test]
    fn pending_commits_exactly_once() {
        let mut rec = sample();
        rec.validate_for_append().unwrap();

        rec.commit(LedgerRef("0xabc".into())).unwrap();
        assert!(rec.is_committed());
        assert_eq!(rec.ledger_ref, Some(LedgerRef("0xabc".into())));

        let err = rec.commit(LedgerRef("0xdef".into())).unwrap_err();
        assert_eq!(
            err,
            RecordError::InvalidTransition { from: RecordStatus::Committed, to: RecordStatus::Committed }
        );
        assert!(rec.fail().is_err());
        assert_eq!(rec.ledger_ref, Some(LedgerRef("0xabc".into())));
    }

    #[test]
    fn failed_is_terminal() {
        let mut rec = sample();
        rec.fail().unwrap();
        assert_eq!(rec.status, RecordStatus::Failed);
        assert!(rec.commit(LedgerRef("0x1".into())).is_err());
        assert!(rec.ledger_ref.is_none());
    }

    #[test]
    fn append_validation_rejects_malformed_records() {
        let mut rec = sample();
        rec.user_id = UserId::new("  ");
        assert_eq!(rec.validate_for_append(), Err(RecordError::MissingUserId));

        let mut rec = sample();
        rec.ledger_ref = Some(LedgerRef("0x1".into()));
        assert!(matches!(rec.validate_for_append(), Err(RecordError::UnexpectedLedgerRef(_))));

        let mut rec = sample();
        rec.fail().unwrap();
        assert!(matches!(rec.validate_for_append(), Err(RecordError::NotPending { .. })));
    }

    #[test]
    fn non_finite_metadata_is_rejected() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut rec = sample();
            rec.metadata.insert("temperature".into(), MetadataValue::Float(bad));
            assert_eq!(rec.validate_for_append(), Err(RecordError::NonFiniteMetadata("temperature".into())));
        }

        let mut rec = sample();
        rec.metadata.insert("temperature".into(), MetadataValue::Float(0.7));
        rec.validate_for_append().unwrap();
    }

    #[test]
    fn record_json_shape() {
        let rec = sample();
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["action_type"], "completion");
        assert_eq!(v["status"], "pending");
        assert_eq!(v["metadata"]["total_tokens"], 12);
        assert!(v.get("ledger_ref").is_none());

        let back: AuditRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn record_id_parses_its_display_form() {
        let id = RecordId::new();
        assert_eq!(id.to_string().parse::<RecordId>().unwrap(), id);
        assert!(matches!("not-a-uuid".parse::<RecordId>(), Err(RecordError::InvalidRecordId(_))));
    }

    #[test]
    fn action_type_parses() {
        assert_eq!("chat".parse::<ActionType>().unwrap(), ActionType::Chat);
        assert!(matches!("embed".parse::<ActionType>(), Err(RecordError::UnknownAction(_))));
    }
}
