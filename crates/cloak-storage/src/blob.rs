//! Decoded view of a bucket: physical tokens mapped back to names
//!
//! A stored name has the form `<display name>.<file key>`; the file key is
//! the per-blob content password.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use cloak_core::types::BlobInfo;
use cloak_crypto::{validate_file_name, NameEncoder};
use rand::seq::SliceRandom;

use crate::store::BlobStore;

/// One blob with its decoded name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub info: BlobInfo,
    /// Decoded name; `None` when the token does not decode under this bucket's password
    pub name: Option<String>,
}

impl BlobRef {
    pub fn real_name(&self) -> &str {
        &self.info.real_name
    }

    /// Decoded name without its trailing `.<file key>`.
    pub fn display_name(&self) -> Option<&str> {
        let name = self.name.as_deref()?;
        Some(name.rsplit_once('.').map_or(name, |(display, _)| display))
    }

    /// Content password: the text after the last `.` of the decoded name.
    pub fn file_key(&self) -> Option<&str> {
        let name = self.name.as_deref()?;
        name.rsplit_once('.').map(|(_, key)| key)
    }
}

/// Bucket client that encodes names on the way in and decodes them on the way out.
pub struct Bucket {
    store: BlobStore,
    encoder: NameEncoder,
    listing: Mutex<Option<Vec<BlobRef>>>,
}

impl Bucket {
    pub fn new(store: BlobStore, password: &str) -> Self {
        Self {
            store,
            encoder: NameEncoder::new(password),
            listing: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Decodable blobs in random order. Cached until the next mutation.
    pub async fn list(&self) -> Result<Vec<BlobRef>> {
        if let Some(cached) = self.cache().as_ref() {
            return Ok(cached.clone());
        }

        let mut refs: Vec<BlobRef> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter_map(|info| self.decode(info))
            .collect();
        refs.shuffle(&mut rand::thread_rng());

        *self.cache() = Some(refs.clone());
        Ok(refs)
    }

    /// First blob whose display name matches `display`.
    pub async fn find(&self, display: &str) -> Result<Option<BlobRef>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|b| b.display_name() == Some(display)))
    }

    /// Drop the cached listing.
    pub fn invalidate(&self) {
        *self.cache() = None;
    }

    /// Upload already-encrypted `bytes` as `<display>.<file_key>`.
    pub async fn put(&self, display: &str, file_key: &str, bytes: Vec<u8>) -> Result<BlobRef> {
        validate_file_name(display)?;
        let name = format!("{display}.{file_key}");
        let mut metadata = HashMap::new();
        let real_name = self
            .encoder
            .encode(&name, &mut metadata)
            .with_context(|| format!("encoding name {display:?}"))?;

        self.store.upload(bytes, &real_name, metadata).await?;
        self.invalidate();
        let info = self.store.stat(&real_name).await?;
        Ok(BlobRef {
            info,
            name: Some(name),
        })
    }

    pub async fn download(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        self.store.download(blob.real_name()).await
    }

    pub async fn delete(&self, blob: &BlobRef) -> Result<()> {
        self.store.delete(blob.real_name()).await?;
        self.invalidate();
        Ok(())
    }

    /// Rename by copy-then-delete. The file key travels with the blob.
    pub async fn move_to(&self, blob: &BlobRef, new_display: &str) -> Result<BlobRef> {
        let file_key = blob
            .file_key()
            .with_context(|| format!("blob {} has no file key", blob.real_name()))?;
        let bytes = self.store.download(blob.real_name()).await?;
        let moved = self.put(new_display, file_key, bytes).await?;
        self.store.delete(blob.real_name()).await?;
        self.invalidate();
        Ok(moved)
    }

    fn decode(&self, info: BlobInfo) -> Option<BlobRef> {
        match self.encoder.decode(&info.real_name, &info.metadata) {
            Ok(name) => Some(BlobRef {
                info,
                name: Some(name),
            }),
            Err(e) => {
                tracing::debug!(blob = %info.real_name, "skipping undecodable name: {e}");
                None
            }
        }
    }

    fn cache(&self) -> MutexGuard<'_, Option<Vec<BlobRef>>> {
        self.listing.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        self.encoder.close();
    }
}
