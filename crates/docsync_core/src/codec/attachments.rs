//! Moving attachment bytes between records and the blob store.

use docsync_storage::{AttachmentKey, BlobStore};

use crate::document::{attachment_digest, DocumentRecord};
use crate::error::{CoreError, CoreResult};

/// Write every attachment that carries bytes into `blobs` and turn it into
/// a stub. Returns the number of attachments written.
///
/// # Errors
///
/// Returns [`CoreError::InvalidDocument`] if bytes do not match the
/// recorded digest, or a storage error if a write fails. Attachments
/// processed before the failure stay extracted.
pub fn extract_attachments(record: &mut DocumentRecord, blobs: &dyn BlobStore) -> CoreResult<usize> {
    let mut written = 0;
    for (name, attachment) in &mut record.attachments {
        let Some(data) = attachment.data.take() else {
            continue;
        };
        if attachment_digest(&data) != attachment.digest {
            attachment.data = Some(data);
            return Err(CoreError::invalid_document(format!(
                "attachment '{name}' of {} does not match its digest",
                record.id
            )));
        }
        blobs.put(
            &AttachmentKey::new(record.id.as_str(), name.as_str()),
            &attachment.digest,
            &data,
        )?;
        written += 1;
    }
    Ok(written)
}

/// Fill every stub attachment of `record` with its bytes from `blobs`.
///
/// # Errors
///
/// Returns [`CoreError::MissingAttachment`] if a blob is absent and
/// [`CoreError::LogicalCorruption`] if stored bytes fail their digest.
pub fn load_attachments(record: &mut DocumentRecord, blobs: &dyn BlobStore) -> CoreResult<()> {
    for (name, attachment) in &mut record.attachments {
        if !attachment.is_stub() {
            continue;
        }
        let key = AttachmentKey::new(record.id.as_str(), name.as_str());
        let data = blobs
            .get(&key, &attachment.digest)?
            .ok_or_else(|| CoreError::MissingAttachment {
                doc_id: record.id.to_string(),
                name: name.clone(),
            })?;
        if attachment_digest(&data) != attachment.digest {
            return Err(CoreError::corruption(
                record.id.as_str(),
                format!("blob for attachment '{name}' fails its digest"),
            ));
        }
        attachment.data = Some(data);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Attachment, DocumentId};
    use docsync_codec::Value;
    use docsync_storage::InMemoryBlobStore;

    fn record() -> DocumentRecord {
        DocumentRecord::new(DocumentId::new("d1"), Value::empty_object())
            .with_attachment("binary", Attachment::new("application/octet-stream", vec![1, 2, 3, 4, 5]))
    }

    #[test]
    fn extract_then_load_is_byte_exact() {
        let blobs = InMemoryBlobStore::new();
        let mut rec = record();
        assert_eq!(extract_attachments(&mut rec, &blobs).unwrap(), 1);
        assert!(rec.attachments["binary"].is_stub());
        assert_eq!(blobs.len(), 1);

        // second extraction has nothing left to write
        assert_eq!(extract_attachments(&mut rec, &blobs).unwrap(), 0);

        load_attachments(&mut rec, &blobs).unwrap();
        assert_eq!(rec.attachments["binary"].data, Some(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn missing_blob_is_reported() {
        let blobs = InMemoryBlobStore::new();
        let mut rec = record();
        rec.attachments.get_mut("binary").unwrap().data = None;
        assert!(matches!(
            load_attachments(&mut rec, &blobs),
            Err(CoreError::MissingAttachment { .. })
        ));
    }

    #[test]
    fn tampered_bytes_rejected() {
        let blobs = InMemoryBlobStore::new();
        let mut rec = record();
        rec.attachments.get_mut("binary").unwrap().data = Some(vec![9]);
        assert!(matches!(
            extract_attachments(&mut rec, &blobs),
            Err(CoreError::InvalidDocument(_))
        ));
        assert!(blobs.is_empty());

        let stub = record().attachments["binary"].to_stub();
        blobs
            .put(&AttachmentKey::new("d1", "binary"), &stub.digest, b"evil")
            .unwrap();
        let mut rec = record();
        rec.attachments.insert("binary".into(), stub);
        assert!(matches!(
            load_attachments(&mut rec, &blobs),
            Err(CoreError::LogicalCorruption { .. })
        ));
    }
}
