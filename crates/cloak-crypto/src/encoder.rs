//! Version dispatch in front of the name codecs
//!
//! Only scheme 5 exists today; the wrapper is where a scheme 6 would plug in.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use cloak_core::{CloakError, CloakResult};
use secrecy::{ExposeSecret, SecretString};

use crate::names::{NameCodecV5, NameVersion, SCHEME_V5};

/// Encodes names with the current scheme and decodes any known scheme.
pub struct NameEncoder {
    password: SecretString,
    v5: OnceLock<NameCodecV5>,
}

impl NameEncoder {
    pub fn new(password: &str) -> Self {
        Self {
            password: SecretString::from(password.to_owned()),
            v5: OnceLock::new(),
        }
    }

    fn v5(&self) -> &NameCodecV5 {
        self.v5.get_or_init(|| {
            NameCodecV5::new(SecretString::from(self.password.expose_secret().to_owned()))
        })
    }

    /// Encode `name`, writing the `_v` attribute into `metadata`.
    pub fn encode(&self, name: &str, metadata: &mut HashMap<String, String>) -> CloakResult<String> {
        self.v5().encode(name, metadata)
    }

    /// Decode the physical name of a blob using its stored metadata.
    pub fn decode(&self, token: &str, metadata: &HashMap<String, String>) -> CloakResult<String> {
        let version = NameVersion::from_metadata(metadata)?;
        match version.scheme {
            SCHEME_V5 => self.v5().decode(token, version),
            other => {
                tracing::debug!(scheme = other, "blob name uses an unknown scheme");
                Err(CloakError::Decode(format!("unsupported name scheme {other}")))
            }
        }
    }

    /// Zero key material held by any codec built so far.
    pub fn close(&mut self) {
        if let Some(v5) = self.v5.get_mut() {
            v5.close();
        }
    }
}

impl fmt::Debug for NameEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameEncoder").field("v5", &self.v5.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_roundtrip() {
        let encoder = NameEncoder::new("bucket-password");
        let mut meta = HashMap::new();
        let token = encoder.encode("holiday.jpg", &mut meta).unwrap();
        assert!(meta["_v"].starts_with('5'));
        assert_eq!(encoder.decode(&token, &meta).unwrap(), "holiday.jpg");
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let encoder = NameEncoder::new("pw");
        let mut meta = HashMap::new();
        let token = encoder.encode("x.txt", &mut meta).unwrap();
        meta.insert("_v".into(), "6u_".into());

        let err = encoder.decode(&token, &meta).unwrap_err();
        assert!(err.to_string().contains("unsupported name scheme 6"));
    }

    #[test]
    fn test_codec_is_lazy() {
        let encoder = NameEncoder::new("pw");
        assert!(encoder.v5.get().is_none());
        encoder.encode("x", &mut HashMap::new()).unwrap();
        assert!(encoder.v5.get().is_some());
    }

    #[test]
    fn test_close_without_use_is_noop() {
        let mut encoder = NameEncoder::new("pw");
        encoder.close();
        assert!(encoder.v5.get().is_none());
    }
}
