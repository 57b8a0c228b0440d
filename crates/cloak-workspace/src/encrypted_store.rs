//! Encrypted, typed config records with passphrase rotation
//!
//! On disk, one record per type:
//! ```text
//! <dir>/<base64url(SHA-256(TYPE_KEY))>          current generation
//! <dir>/<base64url(SHA-256(TYPE_KEY))>.backup   previous generation
//! ```
//! Each file is a framed stream (see `cloak_crypto::stream`) around
//! pretty-printed JSON. The stream password is one of three passphrases
//! derived from the user key with fixed salts; any of the three opens a
//! record, one chosen per store instance seals new ones.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use cloak_core::{CloakError, CloakResult};
use cloak_crypto::kdf::{derive, CONFIG_PROFILE};
use cloak_crypto::{DecryptReader, EncryptWriter};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fixed salts for the three rotated passphrases, in read order.
const ROTATION_SALTS: [[u8; 16]; 3] = [
    // Q/TiLTkO/F2VmY3FKvxcVA==
    [
        0x43, 0xf4, 0xe2, 0x2d, 0x39, 0x0e, 0xfc, 0x5d, 0x95, 0x99, 0x8d, 0xc5, 0x2a, 0xfc, 0x5c,
        0x54,
    ],
    // dp07ISNZCQHarROLPAI8ag==
    [
        0x76, 0x9d, 0x3b, 0x21, 0x23, 0x59, 0x09, 0x01, 0xda, 0xad, 0x13, 0x8b, 0x3c, 0x02, 0x3c,
        0x6a,
    ],
    // HbzJbGMmCXGVb70KMAp+ww==
    [
        0x1d, 0xbc, 0xc9, 0x6c, 0x63, 0x26, 0x09, 0x71, 0x95, 0x6f, 0xbd, 0x0a, 0x30, 0x0a, 0x7e,
        0xc3,
    ],
];

const BACKUP_SUFFIX: &str = ".backup";

/// A document persisted by `EncryptedStore`, one per type.
pub trait ConfigRecord: Serialize + DeserializeOwned {
    /// Stable identifier; hashed into the on-disk file name.
    const TYPE_KEY: &'static str;
}

/// The three passphrases derived from one user key, in read order.
pub struct RotatingPassphrases {
    slots: Vec<SecretString>,
}

impl RotatingPassphrases {
    pub fn derive(user_key: &SecretString) -> Self {
        let slots = ROTATION_SALTS
            .iter()
            .map(|salt| {
                let key = derive(user_key.expose_secret().as_bytes(), salt, &CONFIG_PROFILE);
                SecretString::from(STANDARD.encode(key.as_bytes()))
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecretString> {
        self.slots.iter()
    }

    fn get(&self, slot: usize) -> Option<&SecretString> {
        self.slots.get(slot)
    }
}

type Slot = Arc<Mutex<Option<Value>>>;

/// Encrypted config directory. Reads are cached; writes happen on `flush`.
pub struct EncryptedStore {
    dir: PathBuf,
    cache: Mutex<HashMap<&'static str, Slot>>,
    passphrases: Option<RotatingPassphrases>,
    write_slot: usize,
}

impl EncryptedStore {
    /// Derive the rotated passphrases for `user_key` and pick this instance's write slot.
    pub fn open(dir: impl Into<PathBuf>, user_key: &SecretString) -> Self {
        let passphrases = RotatingPassphrases::derive(user_key);
        let write_slot = rand::rngs::OsRng.gen_range(0..passphrases.len());
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
            passphrases: Some(passphrases),
            write_slot,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached value for `T`, else the value on disk, else `default()`.
    ///
    /// Under contention the disk read (or `default`) runs once per type.
    /// Fails only when a record exists but no passphrase opens either generation.
    pub fn get<T: ConfigRecord>(&self, default: impl FnOnce() -> T) -> CloakResult<T> {
        let passphrases = self.passphrases()?;
        let slot = self.slot(T::TYPE_KEY);
        let mut value = lock(&slot);

        if let Some(cached) = value.as_ref() {
            return from_value(T::TYPE_KEY, cached.clone());
        }

        let record = match self.read::<T>(passphrases)? {
            Some(record) => record,
            None => {
                tracing::debug!(record = T::TYPE_KEY, "no stored record, using default");
                default()
            }
        };
        *value = Some(to_value(T::TYPE_KEY, &record)?);
        Ok(record)
    }

    /// Replace the cached value. Nothing touches disk until `flush`.
    pub fn set<T: ConfigRecord>(&self, record: &T) -> CloakResult<()> {
        self.passphrases()?;
        let encoded = to_value(T::TYPE_KEY, record)?;
        let slot = self.slot(T::TYPE_KEY);
        *lock(&slot) = Some(encoded);
        Ok(())
    }

    /// Write every cached record. Failures are logged, not returned.
    pub fn flush(&self) {
        let Some(passphrases) = self.passphrases.as_ref() else {
            return;
        };
        let Some(password) = passphrases.get(self.write_slot) else {
            return;
        };

        // hold the map for the whole pass so no slot is added or replaced mid-flush
        let cache = lock(&self.cache);
        for (key, slot) in cache.iter() {
            let value = lock(slot);
            let Some(value) = value.as_ref() else {
                continue;
            };
            if let Err(e) = self.write(key, value, password) {
                tracing::warn!(record = key, "failed to write config record: {e}");
            }
        }
    }

    /// Final flush, then drop the cache and the derived passphrases.
    pub fn close(&mut self) {
        if self.passphrases.is_none() {
            return;
        }
        self.flush();
        lock(&self.cache).clear();
        self.passphrases = None;
    }

    fn passphrases(&self) -> CloakResult<&RotatingPassphrases> {
        self.passphrases
            .as_ref()
            .ok_or_else(|| CloakError::Config("encrypted store is closed".into()))
    }

    fn slot(&self, key: &'static str) -> Slot {
        lock(&self.cache).entry(key).or_default().clone()
    }

    fn read<T: ConfigRecord>(&self, passphrases: &RotatingPassphrases) -> CloakResult<Option<T>> {
        let primary = self.record_path(T::TYPE_KEY);
        let backup = backup_path(&primary);
        let mut last_error = None;

        for path in [&primary, &backup] {
            if !has_content(path) {
                continue;
            }
            for (index, password) in passphrases.iter().enumerate() {
                match decrypt_record::<T>(path, password) {
                    Ok(record) => {
                        if path == &backup {
                            tracing::warn!(record = T::TYPE_KEY, "recovered from backup");
                        }
                        return Ok(Some(record));
                    }
                    Err(e) => {
                        tracing::debug!(
                            record = T::TYPE_KEY,
                            file = %path.display(),
                            slot = index,
                            "passphrase did not open record: {e}"
                        );
                        last_error = Some(e);
                    }
                }
            }
        }

        match last_error {
            Some(source) => Err(CloakError::RotationExhausted {
                key: T::TYPE_KEY.to_string(),
                source: Box::new(source),
            }),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, value: &Value, password: &SecretString) -> CloakResult<()> {
        fs::create_dir_all(&self.dir)?;
        let primary = self.record_path(key);
        if has_content(&primary) {
            fs::rename(&primary, backup_path(&primary))?;
        }

        let file = File::create(&primary)?;
        let mut writer = EncryptWriter::new(BufWriter::new(file), password)?;
        serde_json::to_writer_pretty(&mut writer, value)
            .map_err(|e| CloakError::Config(format!("serializing {key}: {e}")))?;
        let file = writer
            .finish()?
            .into_inner()
            .map_err(|e| CloakError::Io(e.into_error()))?;
        file.sync_all()?;
        tracing::debug!(record = key, file = %primary.display(), "config record written");
        Ok(())
    }

    /// Physical location of the record for `key`.
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(record_file_name(key))
    }
}

impl Drop for EncryptedStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// `base64url(SHA-256(key))`, unpadded.
pub fn record_file_name(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes()))
}

pub fn backup_path(primary: &Path) -> PathBuf {
    let mut name = primary.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

fn has_content(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

fn decrypt_record<T: DeserializeOwned>(path: &Path, password: &SecretString) -> CloakResult<T> {
    let reader = DecryptReader::new(BufReader::new(File::open(path)?), password)?;
    serde_json::from_reader(reader).map_err(|e| CloakError::Decode(format!("{e}")))
}

fn to_value<T: Serialize>(key: &str, record: &T) -> CloakResult<Value> {
    serde_json::to_value(record).map_err(|e| CloakError::Config(format!("serializing {key}: {e}")))
}

fn from_value<T: DeserializeOwned>(key: &str, value: Value) -> CloakResult<T> {
    serde_json::from_value(value).map_err(|e| CloakError::Config(format!("cached {key}: {e}")))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
