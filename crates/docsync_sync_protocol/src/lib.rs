//! # docsync Sync Protocol
//!
//! Replication messages exchanged between docsync datastores.
//!
//! This crate provides:
//! - Handshake with protocol version and object model fingerprint
//! - Changes feed, revs-diff, fetch and push messages
//! - Revision bundles carrying ancestry and attachment bytes
//! - Canonical CBOR encoding/decoding via [`SyncMessage`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod messages;
mod wire;

pub use messages::{
    ChangeEntry, ChangesRequest, ChangesResponse, Direction, FetchEntry, FetchRequest,
    FetchResponse, HandshakeRequest, HandshakeResponse, PushRequest, PushResponse, Rejection,
    RevsDiffRequest, RevsDiffResponse, SyncMessage, DEFAULT_CHANGES_LIMIT, PROTOCOL_VERSION,
};

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::{DocumentId, RevisionId};
    use proptest::prelude::*;

    fn arb_rev() -> impl Strategy<Value = RevisionId> {
        (1u64..1_000, "[0-9a-f]{64}").prop_map(|(generation, digest)| RevisionId::new(generation, digest))
    }

    proptest! {
        #[test]
        fn changes_response_survives_encoding(
            entries in prop::collection::vec(
                (0u64..1 << 40, "[a-z0-9-]{1,16}", prop::collection::vec(arb_rev(), 1..4), any::<bool>()),
                0..8,
            ),
            has_more in any::<bool>(),
        ) {
            let changes: Vec<ChangeEntry> = entries
                .into_iter()
                .map(|(sequence, id, tips, deleted)| ChangeEntry {
                    sequence,
                    doc_id: DocumentId::new(id),
                    tips,
                    deleted,
                })
                .collect();
            let last = changes.iter().map(|c| c.sequence).max().unwrap_or(0);
            let message = SyncMessage::ChangesResponse(ChangesResponse::new(changes, last, has_more));
            let decoded = SyncMessage::decode(&message.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, message);
        }

        #[test]
        fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = SyncMessage::decode(&bytes);
        }
    }
}
