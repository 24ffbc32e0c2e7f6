//! Append-only JSONL ledger with hash chaining.
//! - Each line: sequence, prev_hash, hash, record (as appended, i.e. pending)
//! - hash = sha256(canonical {prev_hash, sequence, record})
//! - The ledger reference of a record is `0x` + its entry hash
//! - Opening repairs a torn final line, replays the file, verifies the chain
//!   end-to-end and rebuilds the index
//!
//! Writes and fsyncs run on the blocking pool. An append is driven by its own
//! task, so a caller that times out stops waiting but never leaves the chain
//! half-updated; the entry may still land after the caller gave up.

use crate::index::{LedgerIndex, Prior};
use crate::{ledger_ref_from_digest, Ledger, LedgerError};
use async_trait::async_trait;
use secura_audit_spec::{AuditRecord, LedgerRef, RecordId, UserId};
use secura_common::{sha256_canonical_json, CanonError, ContentHash};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum FileLedgerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] CanonError),
    #[error("hash mismatch at line {line}: expected {expected}, got {got}")]
    HashMismatch { line: usize, expected: String, got: String },
    #[error("sequence gap at line {line}: expected {expected}, got {got}")]
    SequenceGap { line: usize, expected: u64, got: u64 },
    #[error("ledger corruption at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("torn final entry at line {line} (unterminated, does not parse)")]
    TornTail { line: usize },
}

impl From<FileLedgerError> for LedgerError {
    fn from(e: FileLedgerError) -> Self {
        match e {
            FileLedgerError::Io(io) => LedgerError::Unavailable(format!("io error: {io}")),
            other => LedgerError::InvalidInput(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub prev_hash: String,
    pub hash: String,
    pub record: AuditRecord,
}

#[derive(Debug, Clone, Serialize)]
struct HashPayload<'a> {
    prev_hash: &'a str,
    sequence: u64,
    record: &'a AuditRecord,
}

pub fn compute_entry_hash(prev_hash: &str, sequence: u64, record: &AuditRecord) -> Result<String, CanonError> {
    sha256_canonical_json(&HashPayload { prev_hash, sequence, record })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub entries: u64,
    pub head: String,
}

/// Walk a ledger file, checking sequence continuity and every link of the chain.
fn replay<F>(path: &Path, mut visit: F) -> Result<ChainSummary, FileLedgerError>
where
    F: FnMut(usize, &LedgerEntry) -> Result<(), FileLedgerError>,
{
    let mut reader = BufReader::new(File::open(path)?);
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut expected_seq = 0u64;
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let entry: LedgerEntry = match serde_json::from_slice(&buf) {
            Ok(entry) => entry,
            Err(_) if !buf.ends_with(b"\n") => return Err(FileLedgerError::TornTail { line: line_no }),
            Err(e) => return Err(e.into()),
        };
        if entry.sequence != expected_seq {
            return Err(FileLedgerError::SequenceGap { line: line_no, expected: expected_seq, got: entry.sequence });
        }
        if entry.prev_hash != expected_prev {
            return Err(FileLedgerError::HashMismatch {
                line: line_no,
                expected: expected_prev,
                got: entry.prev_hash,
            });
        }
        let computed = compute_entry_hash(&entry.prev_hash, entry.sequence, &entry.record)?;
        if computed != entry.hash {
            return Err(FileLedgerError::HashMismatch { line: line_no, expected: computed, got: entry.hash });
        }
        visit(line_no, &entry)?;
        expected_prev = entry.hash;
        expected_seq += 1;
    }

    Ok(ChainSummary { entries: expected_seq, head: expected_prev })
}

/// Offline integrity check of a ledger file. Nothing is repaired.
pub fn verify_chain(path: impl AsRef<Path>) -> Result<ChainSummary, FileLedgerError> {
    replay(path.as_ref(), |_, _| Ok(()))
}

/// A crash between write and fsync can leave a final line without its
/// newline. A complete entry gets its newline back; anything else is cut off.
/// Lines before the last one are never touched.
fn repair_tail(path: &Path) -> Result<(), FileLedgerError> {
    let bytes = fs::read(path)?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let start = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);
    let tail = &bytes[start..];

    let mut file = OpenOptions::new().append(true).open(path)?;
    if serde_json::from_slice::<LedgerEntry>(tail).is_ok() {
        info!(path = %path.display(), "terminating final ledger line");
        file.write_all(b"\n")?;
    } else {
        warn!(path = %path.display(), offset = start, bytes = tail.len(), "discarding torn final ledger line");
        file.set_len(start as u64)?;
    }
    file.sync_data()?;
    Ok(())
}

/// Where entry lines go. Implemented by `File`; lets the rollback path be
/// exercised without a failing disk.
trait AppendTarget: Write {
    fn end(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn end(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

#[derive(Debug)]
enum WriteFailure {
    /// The file is back to its length before the write.
    RolledBack(io::Error),
    /// Part of the line may still be in the file.
    Torn { cause: io::Error, rollback: io::Error },
}

/// Write one line and fsync it, or leave the target as it was.
fn write_entry<T: AppendTarget>(target: &mut T, line: &[u8]) -> Result<(), WriteFailure> {
    let start = target.end().map_err(WriteFailure::RolledBack)?;
    let written = target.write_all(line).and_then(|_| target.flush()).and_then(|_| target.sync());
    let Err(cause) = written else {
        return Ok(());
    };
    match target.truncate_to(start).and_then(|_| target.sync()) {
        Ok(()) => Err(WriteFailure::RolledBack(cause)),
        Err(rollback) => Err(WriteFailure::Torn { cause, rollback }),
    }
}

struct FileState {
    file: Arc<Mutex<File>>,
    head: String,
    next_sequence: u64,
    index: LedgerIndex,
    /// Set when a failed write could not be rolled back. The in-memory head no
    /// longer matches the file, so further appends are refused until reopen.
    poisoned: Option<String>,
}

pub struct FileLedger {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

impl FileLedger {
    /// Open (or create) a ledger file. A file whose chain does not verify is refused.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileLedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut index = LedgerIndex::default();
        let summary = if path.exists() {
            repair_tail(&path)?;
            replay(&path, |line, entry| {
                match index.check(&entry.record) {
                    Ok(Prior::New) => {}
                    Ok(Prior::Duplicate(_)) => {
                        return Err(FileLedgerError::Corrupt { line, reason: format!("duplicate record id {}", entry.record.id) })
                    }
                    Err(e) => return Err(FileLedgerError::Corrupt { line, reason: e.to_string() }),
                }
                index.insert(entry.record.committed_with(ledger_ref_from_digest(&entry.hash)));
                Ok(())
            })?
        } else {
            ChainSummary { entries: 0, head: GENESIS_HASH.to_string() }
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), entries = summary.entries, head = %summary.head, "ledger opened");

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                file: Arc::new(Mutex::new(file)),
                head: summary.head,
                next_sequence: summary.entries,
                index,
                poisoned: None,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn summary(&self) -> ChainSummary {
        let state = self.state.read().await;
        ChainSummary { entries: state.next_sequence, head: state.head.clone() }
    }
}

async fn append_entry(state: &RwLock<FileState>, record: AuditRecord) -> Result<LedgerRef, LedgerError> {
    let mut state = state.write().await;
    if let Some(reason) = &state.poisoned {
        return Err(LedgerError::Unavailable(format!("ledger refuses appends until reopened: {reason}")));
    }
    if let Prior::Duplicate(existing) = state.index.check(&record)? {
        debug!(record_id = %record.id, ledger_ref = %existing, "idempotent re-append");
        return Ok(existing);
    }

    let sequence = state.next_sequence;
    let hash = compute_entry_hash(&state.head, sequence, &record).map_err(FileLedgerError::from)?;
    let entry = LedgerEntry { sequence, prev_hash: state.head.clone(), hash: hash.clone(), record };
    let mut line = serde_json::to_vec(&entry).map_err(FileLedgerError::from)?;
    line.push(b'\n');

    // Acknowledge only what is on disk.
    let file = Arc::clone(&state.file);
    let written = tokio::task::spawn_blocking(move || {
        let mut file = file
            .lock()
            .map_err(|_| WriteFailure::RolledBack(io::Error::other("ledger file lock poisoned")))?;
        write_entry(&mut *file, &line)
    })
    .await
    .map_err(|e| LedgerError::Unavailable(format!("ledger write task failed: {e}")))?;

    match written {
        Ok(()) => {}
        Err(WriteFailure::RolledBack(cause)) => {
            warn!(sequence, error = %cause, "ledger write failed and was rolled back");
            return Err(FileLedgerError::Io(cause).into());
        }
        Err(WriteFailure::Torn { cause, rollback }) => {
            let reason = format!("write failed ({cause}) and rollback failed ({rollback})");
            error!(sequence, %reason, "ledger file may hold a partial entry");
            state.poisoned = Some(reason.clone());
            return Err(LedgerError::Unavailable(reason));
        }
    }

    let ledger_ref = ledger_ref_from_digest(&hash);
    state.head = hash;
    state.next_sequence += 1;
    state.index.insert(entry.record.committed_with(ledger_ref.clone()));
    Ok(ledger_ref)
}

#[async_trait]
impl Ledger for FileLedger {
    async fn append(&self, record: &AuditRecord) -> Result<LedgerRef, LedgerError> {
        let state = Arc::clone(&self.state);
        let record = record.clone();
        tokio::spawn(async move { append_entry(&state, record).await })
            .await
            .map_err(|e| LedgerError::Unavailable(format!("ledger append task failed: {e}")))?
    }

    async fn exists(&self, content_hash: &ContentHash) -> Result<bool, LedgerError> {
        Ok(self.state.read().await.index.contains_hash(content_hash))
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<AuditRecord>, LedgerError> {
        Ok(self.state.read().await.index.list_by_user(user_id))
    }

    async fn get(&self, id: &RecordId) -> Result<Option<AuditRecord>, LedgerError> {
        Ok(self.state.read().await.index.get(id))
    }
}
