//! The persisted workspace: buckets, locations and file openers

use std::collections::HashMap;
use std::path::Path;

use cloak_core::types::{xorshift, BucketConfig};
use cloak_core::{CloakError, CloakResult};
use cloak_crypto::generate_password;
use serde::{Deserialize, Serialize};

use crate::encrypted_store::ConfigRecord;
use crate::scratch::Scratch;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Workspace {
    /// Change marker, advanced by `update`
    pub timestamp: i64,
    pub last_login: Option<String>,
    pub password: String,
    /// Root of the staging directories; empty means the configured default
    pub location: String,
    pub buckets: Vec<BucketConfig>,
    /// Default program for opening fetched files
    pub opener: String,
    /// Per-extension overrides of `opener`
    pub type_opener: HashMap<String, String>,
}

impl ConfigRecord for Workspace {
    const TYPE_KEY: &'static str = "cloak::workspace::Workspace";
}

impl Workspace {
    pub fn update(&mut self) {
        self.timestamp = xorshift(self.timestamp);
    }

    pub fn bucket(&self, name: &str) -> Option<&BucketConfig> {
        self.buckets.iter().find(|b| b.name == name)
    }

    /// Register a bucket with a freshly generated name password.
    pub fn add_bucket(&mut self, name: &str, location: &str) -> CloakResult<&BucketConfig> {
        if name.is_empty() || location.is_empty() {
            return Err(CloakError::Validation("bucket name and location are required".into()));
        }
        if self.bucket(name).is_some() {
            return Err(CloakError::Validation(format!("bucket {name:?} already exists")));
        }

        let mut bucket = BucketConfig {
            timestamp: seed_timestamp(),
            name: name.to_string(),
            location: location.to_string(),
            password: generate_password(),
            keyfile: String::new(),
        };
        bucket.update();
        self.buckets.push(bucket);
        self.update();
        let added = self.buckets.len() - 1;
        Ok(&self.buckets[added])
    }

    /// Program configured for `file_name`, by extension then default.
    pub fn opener_for(&self, file_name: &str) -> Option<&str> {
        let by_type = file_name
            .rsplit_once('.')
            .and_then(|(_, ext)| self.type_opener.get(&ext.to_ascii_lowercase()));
        match by_type {
            Some(opener) => Some(opener.as_str()),
            None if !self.opener.is_empty() => Some(self.opener.as_str()),
            None => None,
        }
    }

    /// Staging area at `location`, or at `default_root` if unset.
    pub fn scratch(&self, default_root: &Path) -> Scratch {
        if self.location.is_empty() {
            Scratch::new(default_root)
        } else {
            Scratch::new(&self.location)
        }
    }
}

fn seed_timestamp() -> i64 {
    let seed: i64 = rand::random();
    // zero is a fixed point of xorshift
    if seed == 0 {
        1
    } else {
        seed
    }
}
