//! cloak-crypto: password-derived encryption for names and payloads
//!
//! Pipeline for a stored file:
//! ```text
//! name    → Shift_JIS | UTF-8 → raw deflate (if smaller) → AES-256-CTR → base64url
//! content → framed stream: magic ‖ salt ‖ AES-256-CTR(content)
//! ```
//!
//! Key derivation (all PBKDF2):
//! ```text
//! Name key        HMAC-SHA256, 10k rounds,  salt = SHA-256(password)
//! Stream "basic"  HMAC-SHA256, 10k rounds,  salt = 8 random bytes   → key ‖ IV
//! Stream "extend" HMAC-SHA512, 100k rounds, salt = 16 random bytes  → key ‖ IV
//! Config rotation HMAC-SHA512, 100k rounds, salt = one of 3 constants
//! ```

pub mod encoder;
pub mod kdf;
pub mod names;
pub mod stream;

pub use encoder::NameEncoder;
pub use kdf::{derive, derive_name_key, DerivedKey, KdfProfile, Prf};
pub use names::{
    generate_password, is_plausible_name, is_valid_file_name, validate_file_name, NameCodecV5,
    NameVersion,
};
pub use stream::{
    decrypt_bytes, decrypt_file, encrypt_bytes, encrypt_file, DecryptReader, EncryptWriter,
    Generation,
};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-CTR initial counter block
pub const IV_SIZE: usize = 16;
