use crate::error::{DbError, DbResult};
use dashmap::DashMap;

/// Result of writing an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub pointer: String,
    pub size: u64,
    pub mime: String,
}

/// Attachment storage, keyed by database and pointer.
pub trait ByteStore: Send + Sync {
    fn add(&self, db: &str, data: &[u8]) -> DbResult<BlobInfo>;
    fn update(&self, db: &str, pointer: &str, data: &[u8]) -> DbResult<BlobInfo>;
    fn delete(&self, db: &str, pointer: &str) -> DbResult<()>;
    fn read(&self, db: &str, pointer: &str) -> DbResult<Vec<u8>>;
    /// Physically duplicates a blob and returns the new pointer.
    fn copy(&self, db: &str, pointer: &str) -> DbResult<String>;
    fn drop_database(&self, db: &str) -> DbResult<()>;
}

/// Blob pointers are `<db>-<uuid>` so a database's blobs share a prefix.
pub fn new_pointer(db: &str) -> String {
    format!("{}-{}", db, uuid::Uuid::new_v4().simple())
}

pub fn blob_not_found(pointer: &str) -> DbError {
    DbError::not_found(format!("attachment '{}' not found", pointer))
}

/// Content type from leading magic bytes.
pub fn sniff_mime(data: &[u8]) -> String {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b\x08", "application/x-gzip"),
    ];

    if let Some(mime) = SIGNATURES
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
        .map(|(_, mime)| mime)
    {
        return mime.to_string();
    }
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return "image/webp".to_string();
    }

    let head = &data[..data.len().min(1024)];
    match std::str::from_utf8(head) {
        Ok(text) if !text.contains('\0') => {
            let trimmed = text.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                "application/json".to_string()
            } else if trimmed
                .get(..5)
                .is_some_and(|tag| tag.eq_ignore_ascii_case("<html"))
            {
                "text/html; charset=utf-8".to_string()
            } else {
                "text/plain; charset=utf-8".to_string()
            }
        }
        // A multi-byte character cut at the sniffing boundary is still text.
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => {
            "text/plain; charset=utf-8".to_string()
        }
        _ => "application/octet-stream".to_string(),
    }
}

/// In-process blob store.
#[derive(Debug, Default)]
pub struct MemoryByteStore {
    blobs: DashMap<(String, String), Vec<u8>>,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn info(pointer: String, data: &[u8]) -> BlobInfo {
        BlobInfo {
            pointer,
            size: data.len() as u64,
            mime: sniff_mime(data),
        }
    }
}

impl ByteStore for MemoryByteStore {
    fn add(&self, db: &str, data: &[u8]) -> DbResult<BlobInfo> {
        let pointer = new_pointer(db);
        self.blobs
            .insert((db.to_string(), pointer.clone()), data.to_vec());
        Ok(Self::info(pointer, data))
    }

    fn update(&self, db: &str, pointer: &str, data: &[u8]) -> DbResult<BlobInfo> {
        self.blobs
            .insert((db.to_string(), pointer.to_string()), data.to_vec());
        Ok(Self::info(pointer.to_string(), data))
    }

    fn delete(&self, db: &str, pointer: &str) -> DbResult<()> {
        self.blobs.remove(&(db.to_string(), pointer.to_string()));
        Ok(())
    }

    fn read(&self, db: &str, pointer: &str) -> DbResult<Vec<u8>> {
        self.blobs
            .get(&(db.to_string(), pointer.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| blob_not_found(pointer))
    }

    fn copy(&self, db: &str, pointer: &str) -> DbResult<String> {
        let data = self.read(db, pointer)?;
        Ok(self.add(db, &data)?.pointer)
    }

    fn drop_database(&self, db: &str) -> DbResult<()> {
        self.blobs.retain(|(owner, _), _| owner != db);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\n...."), "image/png");
        assert_eq!(sniff_mime(b"\xff\xd8\xff\xe0"), "image/jpeg");
        assert_eq!(sniff_mime(b"%PDF-1.7"), "application/pdf");
        assert_eq!(sniff_mime(b"  {\"a\": 1}"), "application/json");
        assert_eq!(sniff_mime(b"hello world"), "text/plain; charset=utf-8");
        assert_eq!(sniff_mime(&[0u8, 159, 146, 150]), "application/octet-stream");
    }

    #[test]
    fn test_pointer_prefix() {
        let pointer = new_pointer("media");
        assert!(pointer.starts_with("media-"));
        assert_eq!(pointer.len(), "media-".len() + 32);
    }

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryByteStore::new();
        let info = store.add("db1", b"first").unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(store.read("db1", &info.pointer).unwrap(), b"first");

        let updated = store.update("db1", &info.pointer, b"second!").unwrap();
        assert_eq!(updated.pointer, info.pointer);
        assert_eq!(updated.size, 7);

        let copy = store.copy("db1", &info.pointer).unwrap();
        assert_ne!(copy, info.pointer);
        store.delete("db1", &info.pointer).unwrap();
        assert!(store.read("db1", &info.pointer).is_err());
        assert_eq!(store.read("db1", &copy).unwrap(), b"second!");

        store.drop_database("db1").unwrap();
        assert!(store.read("db1", &copy).is_err());
    }
}
