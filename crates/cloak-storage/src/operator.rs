//! OpenDAL Operator factory for cloak storage backends

use anyhow::{Context, Result};
use cloak_core::config::{StorageBackend, StorageConfig};
use cloak_core::types::BucketConfig;
use opendal::Operator;

/// Build the operator backing one bucket.
///
/// - `fs`: a subdirectory `<root>/<location>`
/// - `memory`: a fresh in-process map (nothing survives the operator)
/// - `s3`: bucket `<location>` at `endpoint`, credentials from `keyfile`
pub fn build_operator(storage: &StorageConfig, bucket: &BucketConfig) -> Result<Operator> {
    if bucket.location.is_empty() {
        anyhow::bail!("bucket {:?} has no location", bucket.name);
    }

    let op = match storage.backend {
        StorageBackend::Fs => {
            let root = storage.root.join(&bucket.location);
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)
                .with_context(|| format!("creating fs operator at {}", root.display()))?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating memory operator")?
            .finish(),
        StorageBackend::S3 => build_s3(storage, bucket)?,
    };
    Ok(op)
}

/// S3 (or any S3-compatible endpoint) with path-style addressing.
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
fn build_s3(storage: &StorageConfig, bucket: &BucketConfig) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
        );
    }

    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let mut builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&bucket.location);
    if let Some((access_key_id, secret_access_key)) = parse_keyfile(&bucket.keyfile)? {
        builder = builder
            .access_key_id(access_key_id)
            .secret_access_key(secret_access_key);
    }

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}

/// `ACCESS_KEY_ID:SECRET_ACCESS_KEY`, or empty to fall back to the
/// environment / instance credentials.
fn parse_keyfile(keyfile: &str) -> Result<Option<(&str, &str)>> {
    let keyfile = keyfile.trim();
    if keyfile.is_empty() {
        return Ok(None);
    }
    match keyfile.split_once(':') {
        Some((id, secret)) if !id.is_empty() && !secret.is_empty() => Ok(Some((id, secret))),
        _ => anyhow::bail!("bucket keyfile must have the form ACCESS_KEY_ID:SECRET_ACCESS_KEY"),
    }
}
