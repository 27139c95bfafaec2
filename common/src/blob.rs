// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::error::Result;

/// Opaque reference to a stored file (§1 out-of-scope collaborators:
/// "blob storage (opaque file handle)"). Never interpreted by business
/// logic beyond equality and display — the handle is what gets written
/// into `Receipt::stored_file_handle`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub struct BlobHandle(pub String);

impl std::fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract for the blob-store seam (§5 suspension points, §6 receipts
/// folder layout). One flat namespace; `put` is idempotent by filename
/// prefix so a retried Receipt Processor tick does not duplicate storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `{prefix} - {original_filename}`, returning a
    /// handle that can later be fetched or linked from an email body.
    async fn put(&self, prefix: &str, original_filename: &str, bytes: &[u8]) -> Result<BlobHandle>;

    async fn get(&self, handle: &BlobHandle) -> Result<Vec<u8>>;

    /// A donor/admin-facing link into the blob folder, used for the
    /// attachment-overflow body note (§4.3).
    fn link(&self, handle: &BlobHandle) -> String;
}

/// Best-effort mime type from a stored filename's extension, for building
/// `mail::Attachment`s out of fetched blobs (§4.8.1 step 7). Receipts carry
/// only the original filename, never a content type.
pub fn guess_mime_type(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Local-filesystem adapter. Mirrors the shape of `HttpMailGateway`: a thin
/// struct holding just enough state (`root`, `base_link`) to talk to an
/// external storage surface, with every method mapping its own failure
/// mode into the shared `Error` type rather than leaking `std::io::Error`.
pub struct FsBlobStore {
    root: std::path::PathBuf,
    base_link: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>, base_link: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_link: base_link.into(),
        }
    }

    fn path_for(&self, handle: &BlobHandle) -> std::path::PathBuf {
        self.root.join(&handle.0)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, prefix: &str, original_filename: &str, bytes: &[u8]) -> Result<BlobHandle> {
        tokio::fs::create_dir_all(&self.root).await?;
        let name = format!("{prefix} - {original_filename}");
        let handle = BlobHandle(name);
        tokio::fs::write(self.path_for(&handle), bytes).await?;
        Ok(handle)
    }

    async fn get(&self, handle: &BlobHandle) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_for(handle)).await?)
    }

    fn link(&self, handle: &BlobHandle) -> String {
        format!("{}/{}", self.base_link.trim_end_matches('/'), handle.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "https://files.example.org");
        let handle = store.put("PLEDGE-2026-1", "receipt.png", b"hello").await.unwrap();
        assert_eq!(handle.0, "PLEDGE-2026-1 - receipt.png");
        assert_eq!(store.get(&handle).await.unwrap(), b"hello");
        assert_eq!(
            store.link(&handle),
            "https://files.example.org/PLEDGE-2026-1 - receipt.png"
        );
    }
}
