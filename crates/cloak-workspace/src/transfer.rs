//! Moving content between local files and a bucket
//!
//! Ciphertext always passes through encrypted staging, and the staged copy
//! is header-shredded on every exit path.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cloak_crypto::{encrypt_file, generate_password, validate_file_name, DecryptReader};
use cloak_storage::{BlobRef, Bucket};
use secrecy::SecretString;

use crate::scratch::{shred_header, Scratch};

/// Download `blob` and return its decrypted content.
pub async fn fetch_blob(bucket: &Bucket, blob: &BlobRef, scratch: &Scratch) -> Result<Vec<u8>> {
    let file_key = blob
        .file_key()
        .with_context(|| format!("blob {} has no file key", blob.real_name()))?
        .to_string();
    let staged = scratch.temp_file_encrypted("")?;

    let result = async {
        let ciphertext = bucket.download(blob).await?;
        tokio::fs::write(&staged, &ciphertext)
            .await
            .with_context(|| format!("staging {}", staged.display()))?;
        let path = staged.clone();
        tokio::task::spawn_blocking(move || decrypt_staged(&path, file_key))
            .await
            .context("decrypt task panicked")?
    }
    .await;

    finish(result, staged)
}

/// Encrypt `local` under a fresh file key and upload it as `display`.
pub async fn put_file(
    bucket: &Bucket,
    scratch: &Scratch,
    local: &Path,
    display: &str,
) -> Result<BlobRef> {
    validate_file_name(display)?;
    let file_key = generate_password();
    let staged = scratch.temp_file_encrypted("")?;

    let result = async {
        let (from, to, key) = (local.to_path_buf(), staged.clone(), file_key.clone());
        tokio::task::spawn_blocking(move || {
            encrypt_file(&from, &to, &SecretString::from(key))
                .with_context(|| format!("encrypting {}", from.display()))
        })
        .await
        .context("encrypt task panicked")??;

        let ciphertext = tokio::fs::read(&staged).await?;
        bucket.put(display, &file_key, ciphertext).await
    }
    .await;

    let blob = finish(result, staged)?;
    let display_name = display;
    tracing::info!(name = display_name, blob = blob.real_name(), "uploaded");
    Ok(blob)
}

fn decrypt_staged(path: &Path, file_key: String) -> Result<Vec<u8>> {
    let password = SecretString::from(file_key);
    let mut reader = DecryptReader::new(BufReader::new(File::open(path)?), &password)?;
    let mut plaintext = Vec::new();
    reader.read_to_end(&mut plaintext)?;
    Ok(plaintext)
}

/// Shred the staged file, then report the first failure.
fn finish<T>(result: Result<T>, staged: PathBuf) -> Result<T> {
    let shredded = shred_header(&[&staged]);
    let value = result?;
    shredded.with_context(|| format!("shredding {}", staged.display()))?;
    Ok(value)
}
