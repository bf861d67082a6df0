//! Protocol messages for replication.
//!
//! A session runs: handshake, then for pull `changes` / `revs_diff` /
//! `fetch` against the peer, for push `revs_diff` / `push` against it.
//! Every message encodes to a canonical CBOR object.

use std::collections::BTreeMap;
use std::fmt;

use docsync_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};
use docsync_core::{Change, DocumentId, RevisionBundle, RevisionId};

use crate::wire::{
    bundle_from_value, bundle_to_value, doc_ids_from_values, doc_ids_to_value, rev_map_from_value,
    rev_map_to_value, revs_from_values, revs_to_value, uint, Fields,
};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default number of changes per `changes` request.
pub const DEFAULT_CHANGES_LIMIT: u32 = 100;

/// Replication direction, seen from the initiating datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Local changes are sent to the peer.
    Push,
    /// Peer changes are applied locally.
    Pull,
}

impl Direction {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }

    fn from_str(s: &str) -> CodecResult<Self> {
        match s {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            other => Err(CodecError::invalid_structure(format!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake request opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol version.
    pub protocol_version: u16,
    /// Name of the initiating datastore.
    pub client: String,
    /// Fingerprint of the initiator's object model.
    pub model_fingerprint: String,
    /// Session direction.
    pub direction: Direction,
}

impl HandshakeRequest {
    /// Creates a handshake request for the current protocol version.
    pub fn new(client: impl Into<String>, model_fingerprint: impl Into<String>, direction: Direction) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            client: client.into(),
            model_fingerprint: model_fingerprint.into(),
            direction,
        }
    }

    fn to_value(&self) -> Value {
        Value::object([
            ("protocol_version", Value::Integer(i64::from(self.protocol_version))),
            ("client", Value::from(self.client.as_str())),
            ("model_fingerprint", Value::from(self.model_fingerprint.as_str())),
            ("direction", Value::from(self.direction.as_str())),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let f = Fields::of(value, "handshake request")?;
        Ok(Self {
            protocol_version: version(&f)?,
            client: f.text("client")?.to_string(),
            model_fingerprint: f.text("model_fingerprint")?.to_string(),
            direction: Direction::from_str(f.text("direction")?)?,
        })
    }
}

/// Handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Whether the peer accepted the session.
    pub accepted: bool,
    /// Reason for a refusal.
    pub error: Option<String>,
    /// Peer's protocol version.
    pub protocol_version: u16,
    /// Peer datastore name.
    pub server: String,
    /// Fingerprint of the peer's object model.
    pub model_fingerprint: String,
    /// Peer's latest local sequence.
    pub last_sequence: u64,
}

impl HandshakeResponse {
    /// An accepting response.
    pub fn accept(server: impl Into<String>, model_fingerprint: impl Into<String>, last_sequence: u64) -> Self {
        Self {
            accepted: true,
            error: None,
            protocol_version: PROTOCOL_VERSION,
            server: server.into(),
            model_fingerprint: model_fingerprint.into(),
            last_sequence,
        }
    }

    /// A refusing response.
    pub fn reject(server: impl Into<String>, model_fingerprint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            error: Some(message.into()),
            protocol_version: PROTOCOL_VERSION,
            server: server.into(),
            model_fingerprint: model_fingerprint.into(),
            last_sequence: 0,
        }
    }

    fn to_value(&self) -> Value {
        Value::object([
            ("accepted", Value::Bool(self.accepted)),
            ("error", self.error.as_deref().map_or(Value::Null, Value::from)),
            ("protocol_version", Value::Integer(i64::from(self.protocol_version))),
            ("server", Value::from(self.server.as_str())),
            ("model_fingerprint", Value::from(self.model_fingerprint.as_str())),
            ("last_sequence", uint(self.last_sequence)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let f = Fields::of(value, "handshake response")?;
        Ok(Self {
            accepted: f.bool("accepted")?,
            error: f.opt_text("error")?.map(str::to_string),
            protocol_version: version(&f)?,
            server: f.text("server")?.to_string(),
            model_fingerprint: f.text("model_fingerprint")?.to_string(),
            last_sequence: f.u64("last_sequence")?,
        })
    }
}

fn version(f: &Fields<'_>) -> CodecResult<u16> {
    u16::try_from(f.u64("protocol_version")?)
        .map_err(|_| CodecError::invalid_structure("protocol_version out of range"))
}

/// Request for the peer's changes feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangesRequest {
    /// Return writes after this peer sequence.
    pub since: u64,
    /// Maximum number of entries.
    pub limit: u32,
}

impl ChangesRequest {
    /// Creates a changes request.
    #[must_use]
    pub const fn new(since: u64, limit: u32) -> Self {
        Self { since, limit }
    }

    fn to_value(self) -> Value {
        Value::object([
            ("since", uint(self.since)),
            ("limit", Value::Integer(i64::from(self.limit))),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let f = Fields::of(value, "changes request")?;
        Ok(Self {
            since: f.u64("since")?,
            limit: u32::try_from(f.u64("limit")?)
                .map_err(|_| CodecError::invalid_structure("limit out of range"))?,
        })
    }
}

/// One changed document in a changes response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    /// Peer sequence of the latest write.
    pub sequence: u64,
    /// Document identifier.
    pub doc_id: DocumentId,
    /// All leaf revisions on the peer.
    pub tips: Vec<RevisionId>,
    /// Whether the peer's winner is a tombstone.
    pub deleted: bool,
}

impl From<Change> for ChangeEntry {
    fn from(change: Change) -> Self {
        Self {
            sequence: change.sequence,
            doc_id: change.doc_id,
            tips: change.tips,
            deleted: change.deleted,
        }
    }
}

impl ChangeEntry {
    fn to_value(&self) -> Value {
        Value::object([
            ("sequence", uint(self.sequence)),
            ("doc_id", Value::from(self.doc_id.as_str())),
            ("tips", revs_to_value(&self.tips)),
            ("deleted", Value::Bool(self.deleted)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let f = Fields::of(value, "change")?;
        Ok(Self {
            sequence: f.u64("sequence")?,
            doc_id: DocumentId::new(f.text("doc_id")?),
            tips: revs_from_values(f.array("tips")?)?,
            deleted: f.bool("deleted")?,
        })
    }
}

/// A batch of the peer's changes feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesResponse {
    /// Changed documents, ascending by sequence.
    pub changes: Vec<ChangeEntry>,
    /// Sequence to resume from; the high-water mark once the batch is applied.
    pub last_sequence: u64,
    /// Whether more changes follow.
    pub has_more: bool,
}

impl ChangesResponse {
    /// Creates a changes response.
    #[must_use]
    pub fn new(changes: Vec<ChangeEntry>, last_sequence: u64, has_more: bool) -> Self {
        Self {
            changes,
            last_sequence,
            has_more,
        }
    }

    fn to_value(&self) -> Value {
        Value::object([
            (
                "changes",
                Value::Array(self.changes.iter().map(ChangeEntry::to_value).collect()),
            ),
            ("last_sequence", uint(self.last_sequence)),
            ("has_more", Value::Bool(self.has_more)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let f = Fields::of(value, "changes response")?;
        Ok(Self {
            changes: f
                .array("changes")?
                .iter()
                .map(ChangeEntry::from_value)
                .collect::<CodecResult<_>>()?,
            last_sequence: f.u64("last_sequence")?,
            has_more: f.bool("has_more")?,
        })
    }
}

/// Which of these revisions does the receiver lack?
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevsDiffRequest {
    /// Candidate revisions per document.
    pub revs: BTreeMap<DocumentId, Vec<RevisionId>>,
}

/// The revisions the receiver lacks, per document. Documents with
/// nothing missing are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevsDiffResponse {
    /// Missing revisions per document.
    pub missing: BTreeMap<DocumentId, Vec<RevisionId>>,
}

/// One document to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEntry {
    /// Document identifier.
    pub doc_id: DocumentId,
    /// Revisions wanted.
    pub revs: Vec<RevisionId>,
    /// Revisions the requester already holds; ancestry stops there.
    pub known: Vec<RevisionId>,
}

impl FetchEntry {
    fn to_value(&self) -> Value {
        Value::object([
            ("doc_id", Value::from(self.doc_id.as_str())),
            ("revs", revs_to_value(&self.revs)),
            ("known", revs_to_value(&self.known)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let f = Fields::of(value, "fetch entry")?;
        Ok(Self {
            doc_id: DocumentId::new(f.text("doc_id")?),
            revs: revs_from_values(f.array("revs")?)?,
            known: revs_from_values(f.array("known")?)?,
        })
    }
}

/// Request for revisions with ancestry and attachment bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Documents to fetch.
    pub docs: Vec<FetchEntry>,
}

/// Revision bundles answering a fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    /// One bundle per requested document.
    pub bundles: Vec<RevisionBundle>,
}

/// Revision bundles sent to the peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushRequest {
    /// Bundles to apply.
    pub bundles: Vec<RevisionBundle>,
}

/// A bundle the receiver refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Document identifier.
    pub doc_id: DocumentId,
    /// Why it was refused.
    pub error: String,
}

/// Outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushResponse {
    /// Documents that gained revisions.
    pub applied: Vec<DocumentId>,
    /// Documents left conflicted on the receiver.
    pub conflicted: Vec<DocumentId>,
    /// Bundles refused by the receiver.
    pub rejected: Vec<Rejection>,
}

impl PushResponse {
    fn to_value(&self) -> Value {
        Value::object([
            ("applied", doc_ids_to_value(&self.applied)),
            ("conflicted", doc_ids_to_value(&self.conflicted)),
            (
                "rejected",
                Value::Array(
                    self.rejected
                        .iter()
                        .map(|r| {
                            Value::object([
                                ("doc_id", Value::from(r.doc_id.as_str())),
                                ("error", Value::from(r.error.as_str())),
                            ])
                        })
                        .collect(),
                ),
            ),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let f = Fields::of(value, "push response")?;
        let rejected = f
            .array("rejected")?
            .iter()
            .map(|r| {
                let r = Fields::of(r, "rejection")?;
                Ok(Rejection {
                    doc_id: DocumentId::new(r.text("doc_id")?),
                    error: r.text("error")?.to_string(),
                })
            })
            .collect::<CodecResult<_>>()?;
        Ok(Self {
            applied: doc_ids_from_values(f.array("applied")?)?,
            conflicted: doc_ids_from_values(f.array("conflicted")?)?,
            rejected,
        })
    }
}

/// Any protocol message, tagged with its type code on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Handshake request.
    HandshakeRequest(HandshakeRequest),
    /// Handshake response.
    HandshakeResponse(HandshakeResponse),
    /// Changes request.
    ChangesRequest(ChangesRequest),
    /// Changes response.
    ChangesResponse(ChangesResponse),
    /// Revs-diff request.
    RevsDiffRequest(RevsDiffRequest),
    /// Revs-diff response.
    RevsDiffResponse(RevsDiffResponse),
    /// Fetch request.
    FetchRequest(FetchRequest),
    /// Fetch response.
    FetchResponse(FetchResponse),
    /// Push request.
    PushRequest(PushRequest),
    /// Push response.
    PushResponse(PushResponse),
    /// Peer-side failure while handling a request.
    Error(String),
}

impl SyncMessage {
    /// Returns the message type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Self::HandshakeRequest(_) => 1,
            Self::HandshakeResponse(_) => 2,
            Self::ChangesRequest(_) => 3,
            Self::ChangesResponse(_) => 4,
            Self::RevsDiffRequest(_) => 5,
            Self::RevsDiffResponse(_) => 6,
            Self::FetchRequest(_) => 7,
            Self::FetchResponse(_) => 8,
            Self::PushRequest(_) => 9,
            Self::PushResponse(_) => 10,
            Self::Error(_) => 255,
        }
    }

    fn body(&self) -> Value {
        match self {
            Self::HandshakeRequest(m) => m.to_value(),
            Self::HandshakeResponse(m) => m.to_value(),
            Self::ChangesRequest(m) => m.to_value(),
            Self::ChangesResponse(m) => m.to_value(),
            Self::RevsDiffRequest(m) => rev_map_to_value(&m.revs),
            Self::RevsDiffResponse(m) => rev_map_to_value(&m.missing),
            Self::FetchRequest(m) => {
                Value::Array(m.docs.iter().map(FetchEntry::to_value).collect())
            }
            Self::FetchResponse(m) => {
                Value::Array(m.bundles.iter().map(bundle_to_value).collect())
            }
            Self::PushRequest(m) => Value::Array(m.bundles.iter().map(bundle_to_value).collect()),
            Self::PushResponse(m) => m.to_value(),
            Self::Error(message) => Value::from(message.as_str()),
        }
    }

    /// Encodes to CBOR: `{type, body}`.
    ///
    /// # Errors
    ///
    /// Fails if a document body holds a value with no canonical encoding.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(&Value::object([
            ("type", Value::Integer(i64::from(self.type_code()))),
            ("body", self.body()),
        ]))
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Fails on malformed CBOR, an unknown type code or a body that does
    /// not match its type.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let f = Fields::of(&value, "message")?;
        let body = f.value("body")?;
        let bundles = |body: &Value| -> CodecResult<Vec<RevisionBundle>> {
            body.as_array()
                .ok_or_else(|| CodecError::invalid_structure("bundles must be an array"))?
                .iter()
                .map(bundle_from_value)
                .collect()
        };
        Ok(match f.u64("type")? {
            1 => Self::HandshakeRequest(HandshakeRequest::from_value(body)?),
            2 => Self::HandshakeResponse(HandshakeResponse::from_value(body)?),
            3 => Self::ChangesRequest(ChangesRequest::from_value(body)?),
            4 => Self::ChangesResponse(ChangesResponse::from_value(body)?),
            5 => Self::RevsDiffRequest(RevsDiffRequest {
                revs: rev_map_from_value(body)?,
            }),
            6 => Self::RevsDiffResponse(RevsDiffResponse {
                missing: rev_map_from_value(body)?,
            }),
            7 => Self::FetchRequest(FetchRequest {
                docs: body
                    .as_array()
                    .ok_or_else(|| CodecError::invalid_structure("fetch entries must be an array"))?
                    .iter()
                    .map(FetchEntry::from_value)
                    .collect::<CodecResult<_>>()?,
            }),
            8 => Self::FetchResponse(FetchResponse {
                bundles: bundles(body)?,
            }),
            9 => Self::PushRequest(PushRequest {
                bundles: bundles(body)?,
            }),
            10 => Self::PushResponse(PushResponse::from_value(body)?),
            255 => Self::Error(
                body.as_text()
                    .ok_or_else(|| CodecError::invalid_structure("error body must be text"))?
                    .to_string(),
            ),
            other => {
                return Err(CodecError::invalid_structure(format!(
                    "unknown message type {other}"
                )))
            }
        })
    }
}
