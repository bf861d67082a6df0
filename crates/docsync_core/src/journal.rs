//! Revision journal: the durable form of the document store.
//!
//! Every commit appends one record holding the local sequence, the
//! document id and the revisions the commit added. Opening a store
//! replays the records in order.
//!
//! Record layout:
//!
//! ```text
//! magic "DSRJ" (4) | version (2, LE) | payload length (4, LE)
//! payload: canonical CBOR {seq, doc, nodes}
//! checksum (4): first bytes of SHA-256 over everything before it
//! ```

use docsync_codec::{from_cbor, to_canonical_cbor, Value};
use docsync_storage::{InMemoryLog, LogBackend};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::document::{uint_value, DocumentId};
use crate::error::{CoreError, CoreResult};
use crate::revision::RevisionNode;

const MAGIC: [u8; 4] = *b"DSRJ";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 10;
const CHECKSUM_SIZE: usize = 4;

/// One replayed commit.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    /// Local sequence assigned to the commit.
    pub sequence: u64,
    /// Document the commit wrote.
    pub doc_id: DocumentId,
    /// Revisions added, in insertion order.
    pub nodes: Vec<RevisionNode>,
}

fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let hash = Sha256::digest(data);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&hash[..CHECKSUM_SIZE]);
    out
}

fn corrupt(offset: u64, message: impl std::fmt::Display) -> CoreError {
    CoreError::corruption("journal", format!("record at offset {offset}: {message}"))
}

fn encode_record(sequence: u64, doc_id: &DocumentId, nodes: &[RevisionNode]) -> CoreResult<Vec<u8>> {
    let payload = to_canonical_cbor(&Value::object([
        ("seq", uint_value(sequence)),
        ("doc", Value::from(doc_id.as_str())),
        ("nodes", Value::Array(nodes.iter().map(RevisionNode::to_value).collect())),
    ]))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("journal record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    data.extend_from_slice(&MAGIC);
    data.extend_from_slice(&VERSION.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);
    let sum = checksum(&data);
    data.extend_from_slice(&sum);
    Ok(data)
}

fn decode_payload(offset: u64, payload: &[u8]) -> CoreResult<JournalRecord> {
    let value = from_cbor(payload).map_err(|e| corrupt(offset, e))?;
    let sequence = value
        .get("seq")
        .and_then(Value::as_integer)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| corrupt(offset, "missing sequence"))?;
    let doc_id = value
        .get("doc")
        .and_then(Value::as_text)
        .map(DocumentId::new)
        .ok_or_else(|| corrupt(offset, "missing document id"))?;
    let nodes = value
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| corrupt(offset, "missing revisions"))?
        .iter()
        .map(|v| RevisionNode::from_value(v).map_err(|e| corrupt(offset, e)))
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(JournalRecord {
        sequence,
        doc_id,
        nodes,
    })
}

/// Append-only journal over a [`LogBackend`].
pub struct Journal {
    backend: Mutex<Box<dyn LogBackend>>,
    sync_on_write: bool,
}

impl Journal {
    /// Wraps a log. With `sync_on_write` every append is synced before it
    /// returns.
    pub fn new(backend: Box<dyn LogBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// A journal that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryLog::new()), false)
    }

    /// Appends one commit. Returns the record's offset.
    ///
    /// # Errors
    ///
    /// Fails if the record cannot be encoded or written.
    pub fn append(&self, sequence: u64, doc_id: &DocumentId, nodes: &[RevisionNode]) -> CoreResult<u64> {
        let data = encode_record(sequence, doc_id, nodes)?;
        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        if self.sync_on_write {
            backend.sync()?;
        }
        Ok(offset)
    }

    /// Reads every complete record from the start.
    ///
    /// An incomplete record at the end (a write cut short by a crash) ends
    /// the replay and is cut off so later appends follow the last complete
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] for a complete record with a
    /// bad magic, version or checksum, or an undecodable payload.
    pub fn replay(&self) -> CoreResult<Vec<JournalRecord>> {
        let mut backend = self.backend.lock();
        let size = backend.size()?;
        let mut records = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            let remaining = size - offset;
            if remaining < HEADER_SIZE as u64 {
                break;
            }
            let header = backend.read_at(offset, HEADER_SIZE)?;
            if header[..4] != MAGIC {
                return Err(corrupt(offset, "bad magic"));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version != VERSION {
                return Err(corrupt(offset, format!("unsupported version {version}")));
            }
            let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
            let total = (HEADER_SIZE + len + CHECKSUM_SIZE) as u64;
            if remaining < total {
                break;
            }

            let record = backend.read_at(offset, HEADER_SIZE + len + CHECKSUM_SIZE)?;
            let (body, sum) = record.split_at(HEADER_SIZE + len);
            if checksum(body) != sum {
                return Err(corrupt(offset, "checksum mismatch"));
            }
            records.push(decode_payload(offset, &body[HEADER_SIZE..])?);
            offset += total;
        }

        if offset < size {
            warn!(offset, dropped = size - offset, "dropping incomplete journal tail");
            backend.truncate(offset)?;
        }
        Ok(records)
    }

    /// Current size of the journal in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::document::Attachment;

    fn nodes() -> Vec<RevisionNode> {
        let mut attachments = BTreeMap::new();
        attachments.insert("binary".to_string(), Attachment::new("application/octet-stream", vec![1, 2]));
        let root = RevisionNode::build(
            None,
            false,
            Value::object([("text", Value::from("one"))]),
            &attachments,
        )
        .unwrap();
        let child = RevisionNode::build(Some(&root.rev), true, Value::empty_object(), &BTreeMap::new())
            .unwrap();
        vec![root, child]
    }

    fn log_with(records: &[(u64, &str)]) -> InMemoryLog {
        let journal = Journal::in_memory();
        for (seq, doc) in records {
            journal.append(*seq, &DocumentId::new(*doc), &nodes()).unwrap();
        }
        let backend = journal.backend.into_inner();
        let size = backend.size().unwrap() as usize;
        InMemoryLog::with_data(backend.read_at(0, size).unwrap())
    }

    #[test]
    fn records_replay_in_order() {
        let journal = Journal::new(Box::new(log_with(&[(1, "a"), (2, "b")])), false);
        let records = journal.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[1].doc_id, DocumentId::new("b"));
        assert_eq!(records[1].nodes, nodes());
        assert!(records[1].nodes.iter().all(|n| n.verify().unwrap()));
    }

    #[test]
    fn torn_tail_is_dropped() {
        let full = log_with(&[(1, "a"), (2, "b")]).data();
        let first_len = log_with(&[(1, "a")]).data().len();
        let torn = full[..full.len() - 3].to_vec();

        let journal = Journal::new(Box::new(InMemoryLog::with_data(torn)), false);
        let records = journal.replay().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(journal.size().unwrap(), first_len as u64);

        journal.append(2, &DocumentId::new("c"), &nodes()).unwrap();
        let again = journal.replay().unwrap();
        assert_eq!(again[1].doc_id, DocumentId::new("c"));
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let mut data = log_with(&[(1, "a")]).data();
        let middle = data.len() / 2;
        data[middle] ^= 0xff;
        let journal = Journal::new(Box::new(InMemoryLog::with_data(data)), false);
        assert!(matches!(
            journal.replay(),
            Err(CoreError::LogicalCorruption { .. })
        ));
    }

    #[test]
    fn foreign_bytes_are_corruption() {
        let journal = Journal::new(Box::new(InMemoryLog::with_data(vec![0x55; 64])), false);
        assert!(matches!(
            journal.replay(),
            Err(CoreError::LogicalCorruption { .. })
        ));
    }
}
