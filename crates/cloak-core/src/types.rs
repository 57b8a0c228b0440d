use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Object metadata attribute carrying the name-encoding version string
pub const NAME_VERSION_KEY: &str = "_v";

/// One remote bucket the workspace knows how to open
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BucketConfig {
    pub timestamp: i64,
    /// Display name shown to the user
    pub name: String,
    /// Physical bucket / directory identifier
    pub location: String,
    /// Name-codec password for this bucket
    pub password: String,
    /// Service-account key material for the backend, if any
    pub keyfile: String,
}

impl BucketConfig {
    pub fn update(&mut self) {
        self.timestamp = xorshift(self.timestamp);
    }
}

/// Raw object as reported by the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Physical (encoded) object name
    pub real_name: String,
    pub size: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Unix epoch seconds
    pub created_at: u64,
}

/// One xorshift64 step (13, 17, 5). Used as a cheap change marker on records.
pub fn xorshift(mut x: i64) -> i64 {
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x
}
