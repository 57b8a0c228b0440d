//! Raw object store: opaque names in, bytes and metadata out
//!
//! Layout inside the operator root:
//! ```text
//! blobs/<real-name>        object content
//! meta/<real-name>.json    {"metadata": {..}, "created_at": <unix secs>}
//! ```
//! Metadata lives in a sidecar object so every opendal backend carries it,
//! including those without user-metadata support.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use cloak_core::types::BlobInfo;
use opendal::Operator;
use serde::{Deserialize, Serialize};

const BLOB_PREFIX: &str = "blobs/";
const META_PREFIX: &str = "meta/";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    created_at: u64,
}

/// Object-store client for one bucket.
#[derive(Clone, Debug)]
pub struct BlobStore {
    op: Operator,
}

impl BlobStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// All blobs with size, metadata and creation time.
    pub async fn list(&self) -> Result<Vec<BlobInfo>> {
        let entries = match self.op.list(BLOB_PREFIX).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(anyhow::anyhow!("listing blobs: {e}")),
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.metadata().is_dir() || entry.path() == BLOB_PREFIX {
                continue;
            }
            let real_name = entry.name().to_string();
            out.push(self.stat(&real_name).await?);
        }
        Ok(out)
    }

    /// Size, metadata and creation time of a single blob.
    pub async fn stat(&self, real_name: &str) -> Result<BlobInfo> {
        check_name(real_name)?;
        let meta = self
            .op
            .stat(&blob_path(real_name))
            .await
            .map_err(|e| anyhow::anyhow!("stat {real_name}: {e}"))?;
        let sidecar = self.read_sidecar(real_name).await?;
        Ok(BlobInfo {
            real_name: real_name.to_string(),
            size: meta.content_length(),
            metadata: sidecar.metadata,
            created_at: sidecar.created_at,
        })
    }

    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        real_name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        check_name(real_name)?;
        let sidecar = Sidecar {
            metadata,
            created_at: now_secs(),
        };
        let json = serde_json::to_vec(&sidecar).context("serializing blob metadata")?;

        self.op
            .write(&blob_path(real_name), bytes)
            .await
            .map_err(|e| anyhow::anyhow!("uploading {real_name}: {e}"))?;
        self.op
            .write(&meta_path(real_name), json)
            .await
            .map_err(|e| anyhow::anyhow!("writing metadata for {real_name}: {e}"))?;
        tracing::debug!(blob = real_name, "uploaded");
        Ok(())
    }

    pub async fn download(&self, real_name: &str) -> Result<Vec<u8>> {
        check_name(real_name)?;
        let data = self
            .op
            .read(&blob_path(real_name))
            .await
            .map_err(|e| anyhow::anyhow!("downloading {real_name}: {e}"))?;
        Ok(data.to_vec())
    }

    /// Remove a blob and its metadata. Missing blobs are not an error.
    pub async fn delete(&self, real_name: &str) -> Result<()> {
        check_name(real_name)?;
        self.op
            .delete(&blob_path(real_name))
            .await
            .map_err(|e| anyhow::anyhow!("deleting {real_name}: {e}"))?;
        self.op
            .delete(&meta_path(real_name))
            .await
            .map_err(|e| anyhow::anyhow!("deleting metadata for {real_name}: {e}"))?;
        tracing::debug!(blob = real_name, "deleted");
        Ok(())
    }

    async fn read_sidecar(&self, real_name: &str) -> Result<Sidecar> {
        match self.op.read(&meta_path(real_name)).await {
            Ok(data) => serde_json::from_slice(&data.to_vec())
                .with_context(|| format!("parsing metadata for {real_name}")),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(anyhow::anyhow!("reading metadata for {real_name}: {e}")),
        }
    }
}

fn blob_path(real_name: &str) -> String {
    format!("{BLOB_PREFIX}{real_name}")
}

fn meta_path(real_name: &str) -> String {
    format!("{META_PREFIX}{real_name}.json")
}

fn check_name(real_name: &str) -> Result<()> {
    if real_name.is_empty() || real_name.contains('/') || real_name == "." || real_name == ".." {
        anyhow::bail!("invalid physical blob name: {real_name:?}");
    }
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> BlobStore {
        let op = Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish();
        BlobStore::new(op)
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let store = memory_store();
        let meta = HashMap::from([("_v".to_string(), "5sc".to_string())]);
        store
            .upload(b"ciphertext".to_vec(), "abc123", meta.clone())
            .await
            .unwrap();

        assert_eq!(store.download("abc123").await.unwrap(), b"ciphertext");
        let info = store.stat("abc123").await.unwrap();
        assert_eq!(info.size, 10);
        assert_eq!(info.metadata, meta);
        assert!(info.created_at > 0);
    }

    #[tokio::test]
    async fn test_list_empty_store() {
        let store = memory_store();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_reports_blobs_only() {
        let store = memory_store();
        store.upload(vec![1], "one", HashMap::new()).await.unwrap();
        store.upload(vec![2, 2], "two", HashMap::new()).await.unwrap();

        let mut names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|b| (b.real_name, b.size))
            .collect();
        names.sort();
        assert_eq!(names, vec![("one".to_string(), 1), ("two".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_delete_removes_blob_and_metadata() {
        let store = memory_store();
        store
            .upload(vec![0; 4], "gone", HashMap::from([("k".into(), "v".into())]))
            .await
            .unwrap();
        store.delete("gone").await.unwrap();

        assert!(store.list().await.unwrap().is_empty());
        assert!(store.download("gone").await.is_err());
        // deleting twice is fine
        store.delete("gone").await.unwrap();
    }

    #[tokio::test]
    async fn test_blob_without_sidecar_has_empty_metadata() {
        let store = memory_store();
        store.op.write("blobs/legacy", vec![9u8; 3]).await.unwrap();

        let info = store.stat("legacy").await.unwrap();
        assert!(info.metadata.is_empty());
        assert_eq!(info.created_at, 0);
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let store = memory_store();
        assert!(store.upload(vec![], "a/b", HashMap::new()).await.is_err());
        assert!(store.upload(vec![], "", HashMap::new()).await.is_err());
        assert!(store.download("..").await.is_err());
    }
}
