//! Key derivation: PBKDF2-HMAC passphrase → key material
//!
//! Four callers, four fixed profiles:
//! - name codec: SHA-256 PRF, 10 000 rounds, 256-bit key, salt = SHA-256(password)
//! - stream "basic": SHA-256 PRF, 10 000 rounds, 384 bits split into key ‖ IV
//! - stream "extended": SHA-512 PRF, 100 000 rounds, 384 bits split into key ‖ IV
//! - config rotation: SHA-512 PRF, 100 000 rounds, 256-bit key per fixed salt

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroize;

use crate::{IV_SIZE, KEY_SIZE};

/// PRF used inside PBKDF2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prf {
    HmacSha256,
    HmacSha512,
}

/// PBKDF2 parameters for one caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfProfile {
    pub prf: Prf,
    pub iterations: u32,
    /// Output length in bytes
    pub output_len: usize,
}

pub const NAME_PROFILE: KdfProfile = KdfProfile {
    prf: Prf::HmacSha256,
    iterations: 10_000,
    output_len: KEY_SIZE,
};

pub const BASIC_STREAM_PROFILE: KdfProfile = KdfProfile {
    prf: Prf::HmacSha256,
    iterations: 10_000,
    output_len: KEY_SIZE + IV_SIZE,
};

pub const EXTENDED_STREAM_PROFILE: KdfProfile = KdfProfile {
    prf: Prf::HmacSha512,
    iterations: 100_000,
    output_len: KEY_SIZE + IV_SIZE,
};

pub const CONFIG_PROFILE: KdfProfile = KdfProfile {
    prf: Prf::HmacSha512,
    iterations: 100_000,
    output_len: KEY_SIZE,
};

/// Key material produced by PBKDF2. Zeroized on drop; never serialized.
pub struct DerivedKey {
    bytes: Vec<u8>,
}

impl DerivedKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Split stream material into `(key, iv)`.
    ///
    /// Returns `None` unless the material is exactly `KEY_SIZE + IV_SIZE` bytes.
    pub fn split_key_iv(&self) -> Option<(&[u8], &[u8])> {
        (self.bytes.len() == KEY_SIZE + IV_SIZE).then(|| self.bytes.split_at(KEY_SIZE))
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Run PBKDF2 with the given profile. Deterministic and side-effect free.
pub fn derive(password: &[u8], salt: &[u8], profile: &KdfProfile) -> DerivedKey {
    let mut out = vec![0u8; profile.output_len];
    match profile.prf {
        Prf::HmacSha256 => {
            pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, profile.iterations, &mut out)
        }
        Prf::HmacSha512 => {
            pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, profile.iterations, &mut out)
        }
    }
    DerivedKey::from_bytes(out)
}

/// Derive the filename key. The salt is SHA-256 of the password itself, so
/// one password always maps to one key.
pub fn derive_name_key(password: &SecretString) -> DerivedKey {
    let secret = password.expose_secret().as_bytes();
    let salt = Sha256::digest(secret);
    derive(secret, &salt, &NAME_PROFILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfProfile = KdfProfile {
        prf: Prf::HmacSha256,
        iterations: 1,
        output_len: 32,
    };

    #[test]
    fn test_kdf_deterministic() {
        let key1 = derive(b"test-passphrase-123", b"salt", &NAME_PROFILE);
        let key2 = derive(b"test-passphrase-123", b"salt", &NAME_PROFILE);

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
        assert_eq!(key1.len(), KEY_SIZE);
    }

    #[test]
    fn test_kdf_different_salts() {
        let key1 = derive(b"same-passphrase", &[1u8; 16], &FAST);
        let key2 = derive(b"same-passphrase", &[2u8; 16], &FAST);

        assert_ne!(key1.as_bytes(), key2.as_bytes(), "different salts must produce different keys");
    }

    #[test]
    fn test_kdf_prf_matters() {
        let sha512 = KdfProfile {
            prf: Prf::HmacSha512,
            ..FAST
        };
        let key1 = derive(b"pw", b"salt", &FAST);
        let key2 = derive(b"pw", b"salt", &sha512);

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_rfc6070_vector() {
        // PBKDF2-HMAC-SHA256, "password" / "salt", c = 1, dkLen = 32
        let key = derive(b"password", b"salt", &FAST);
        let expected = [
            0x12, 0x0f, 0xb6, 0xcf, 0xfc, 0xf8, 0xb3, 0x2c, 0x43, 0xe7, 0x22, 0x52, 0x56, 0xc4,
            0xf8, 0x37, 0xa8, 0x65, 0x48, 0xc9, 0x2c, 0xcc, 0x35, 0x48, 0x08, 0x05, 0x98, 0x7c,
            0xb7, 0x0b, 0xe1, 0x7b,
        ];
        assert_eq!(key.as_bytes(), expected);
    }

    #[test]
    fn test_stream_material_splits() {
        let key = derive(b"pw", b"12345678", &BASIC_STREAM_PROFILE);
        let (k, iv) = key.split_key_iv().unwrap();
        assert_eq!(k.len(), KEY_SIZE);
        assert_eq!(iv.len(), IV_SIZE);

        let name_key = derive(b"pw", b"12345678", &FAST);
        assert!(name_key.split_key_iv().is_none());
    }

    #[test]
    fn test_name_key_is_stable_per_password() {
        let a = derive_name_key(&SecretString::from("correct-horse"));
        let b = derive_name_key(&SecretString::from("correct-horse"));
        let c = derive_name_key(&SecretString::from("battery-staple"));

        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_debug_redacts() {
        let key = derive(b"pw", b"salt", &FAST);
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
    }
}
