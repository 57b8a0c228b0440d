//! Scheme-5 filename encryption
//!
//! Token layout (base64url, `=` padding stripped):
//! ```text
//! [4 bytes: random salt][N bytes: AES-256-CTR(payload)]
//! IV      = SHA-256(salt)[..16]
//! key     = PBKDF2-HMAC-SHA256(password, SHA-256(password), 10 000, 256 bit)
//! payload = name bytes (UTF-8 or Shift_JIS), raw-deflated when that is smaller
//! ```
//!
//! How the payload was built is not part of the token. It travels as the
//! three-character version string (`5u_`, `5sc`, ...) in the blob's `_v`
//! metadata attribute.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, OnceLock};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cloak_core::types::NAME_VERSION_KEY;
use cloak_core::{CloakError, CloakResult};
use ctr::cipher::{KeyIvInit, StreamCipher};
use encoding_rs::SHIFT_JIS;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use rand::RngCore;
use secrecy::SecretString;
use sha2::{Digest, Sha256};

use crate::kdf::{derive_name_key, DerivedKey};
use crate::stream::Aes256Ctr;
use crate::IV_SIZE;

/// Random bytes prepended to every token
pub const NAME_SALT_SIZE: usize = 4;

/// The scheme implemented in this module
pub const SCHEME_V5: u8 = 5;

/// Output chunk size used while inflating a compressed name
const INFLATE_CHUNK: usize = 128;

/// Upper bound on an inflated name; anything larger is not a name.
const MAX_NAME_BYTES: usize = 64 * 1024;

/// Byte encoding of the name before compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// UTF-8
    Unicode,
    /// Shift_JIS (Windows code page 932)
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    Compressed,
    Raw,
}

/// Parsed `_v` attribute: `<scheme digit><u|s><c|_>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameVersion {
    pub scheme: u8,
    pub charset: Charset,
    pub packing: Packing,
}

impl NameVersion {
    /// Version assumed for blobs that carry no `_v` attribute.
    pub const DEFAULT: NameVersion = NameVersion {
        scheme: SCHEME_V5,
        charset: Charset::Unicode,
        packing: Packing::Raw,
    };

    /// Read the version from blob metadata, defaulting to `5u_`.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> CloakResult<Self> {
        match metadata.get(NAME_VERSION_KEY) {
            Some(raw) => raw.parse(),
            None => Ok(Self::DEFAULT),
        }
    }
}

impl fmt::Display for NameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let charset = match self.charset {
            Charset::Unicode => 'u',
            Charset::Legacy => 's',
        };
        let packing = match self.packing {
            Packing::Compressed => 'c',
            Packing::Raw => '_',
        };
        write!(f, "{}{}{}", self.scheme, charset, packing)
    }
}

impl FromStr for NameVersion {
    type Err = CloakError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CloakError::Decode(format!("malformed name version: {s:?}"));
        let mut chars = s.chars();
        let (Some(scheme), Some(charset), Some(packing), None) =
            (chars.next(), chars.next(), chars.next(), chars.next())
        else {
            return Err(bad());
        };

        let scheme = scheme.to_digit(10).ok_or_else(bad)? as u8;
        let charset = match charset {
            'u' => Charset::Unicode,
            's' => Charset::Legacy,
            _ => return Err(bad()),
        };
        let packing = match packing {
            'c' => Packing::Compressed,
            '_' => Packing::Raw,
            _ => return Err(bad()),
        };
        Ok(NameVersion {
            scheme,
            charset,
            packing,
        })
    }
}

/// Scheme-5 codec. Key material and the deflate engines are built on first
/// use and reused afterwards; `close` (or drop) zeroes the key.
pub struct NameCodecV5 {
    password: SecretString,
    key: OnceLock<DerivedKey>,
    deflater: Mutex<Option<Compress>>,
    inflater: Mutex<Option<Decompress>>,
}

impl NameCodecV5 {
    pub fn new(password: SecretString) -> Self {
        Self {
            password,
            key: OnceLock::new(),
            deflater: Mutex::new(None),
            inflater: Mutex::new(None),
        }
    }

    fn key(&self) -> &DerivedKey {
        self.key.get_or_init(|| derive_name_key(&self.password))
    }

    /// Encrypt `name` into a token and record its version under `_v` in `metadata`.
    pub fn encode(&self, name: &str, metadata: &mut HashMap<String, String>) -> CloakResult<String> {
        // decode refuses these, so a blob named with them would vanish from listings
        if !is_plausible_name(name) {
            return Err(CloakError::Validation(format!(
                "{name:?} contains characters that cannot be stored in a name"
            )));
        }
        let (charset, bytes) = match to_legacy(name) {
            Some(bytes) => (Charset::Legacy, bytes),
            None => (Charset::Unicode, name.as_bytes().to_vec()),
        };
        let (packing, payload) = match self.deflate(&bytes) {
            Some(compressed) => (Packing::Compressed, compressed),
            None => (Packing::Raw, bytes),
        };

        let version = NameVersion {
            scheme: SCHEME_V5,
            charset,
            packing,
        };
        metadata.insert(NAME_VERSION_KEY.to_string(), version.to_string());

        let mut salt = [0u8; NAME_SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let mut token = Vec::with_capacity(NAME_SALT_SIZE + payload.len());
        token.extend_from_slice(&salt);
        token.extend_from_slice(&payload);
        self.apply_keystream(&salt, &mut token[NAME_SALT_SIZE..])?;

        Ok(URL_SAFE_NO_PAD.encode(&token))
    }

    /// Decrypt a token produced by `encode` under the given version.
    pub fn decode(&self, token: &str, version: NameVersion) -> CloakResult<String> {
        let mut bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| CloakError::Decode(format!("token is not base64url: {e}")))?;
        if bytes.len() < NAME_SALT_SIZE {
            return Err(CloakError::Decode(format!(
                "token too short: {} bytes (minimum {NAME_SALT_SIZE})",
                bytes.len()
            )));
        }

        let (salt, body) = bytes.split_at_mut(NAME_SALT_SIZE);
        self.apply_keystream(salt, body)?;

        let raw = match version.packing {
            Packing::Compressed => self.inflate(body)?,
            Packing::Raw => body.to_vec(),
        };

        let name = match version.charset {
            Charset::Unicode => String::from_utf8(raw)
                .map_err(|_| CloakError::Decode("decrypted name is not UTF-8".into()))?,
            Charset::Legacy => decode_legacy(&raw)?,
        };

        if !is_valid_file_name(&name) || !is_plausible_name(&name) {
            tracing::trace!(version = %version, "decrypted name rejected");
            return Err(CloakError::Decode(
                "decrypted name contains disallowed characters".into(),
            ));
        }
        Ok(name)
    }

    /// Zero the cached key and release the deflate engines.
    pub fn close(&mut self) {
        drop(self.key.take());
        *lock(&self.deflater) = None;
        *lock(&self.inflater) = None;
    }

    fn apply_keystream(&self, salt: &[u8], data: &mut [u8]) -> CloakResult<()> {
        let digest = Sha256::digest(salt);
        let mut cipher = Aes256Ctr::new_from_slices(self.key().as_bytes(), &digest[..IV_SIZE])
            .map_err(|e| CloakError::CryptoProvider(format!("AES-256-CTR init: {e}")))?;
        cipher.apply_keystream(data);
        Ok(())
    }

    /// Raw deflate at maximum level; `None` unless the result is strictly smaller.
    fn deflate(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let mut guard = lock(&self.deflater);
        let engine = guard.get_or_insert_with(|| Compress::new(Compression::best(), false));
        engine.reset();

        // compress_vec never grows the vector: output that does not fit is not a win anyway
        let mut out = Vec::with_capacity(raw.len() + 16);
        match engine.compress_vec(raw, &mut out, FlushCompress::Finish) {
            Ok(Status::StreamEnd) if out.len() < raw.len() => Some(out),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("deflate failed, storing name uncompressed: {e}");
                None
            }
        }
    }

    fn inflate(&self, data: &[u8]) -> CloakResult<Vec<u8>> {
        let mut guard = lock(&self.inflater);
        let engine = guard.get_or_insert_with(|| Decompress::new(false));
        engine.reset(false);

        let mut out = Vec::new();
        let mut chunk = [0u8; INFLATE_CHUNK];
        loop {
            let consumed = engine.total_in() as usize;
            let produced_before = engine.total_out();
            let status = engine
                .decompress(&data[consumed..], &mut chunk, FlushDecompress::None)
                .map_err(|e| CloakError::Decode(format!("inflate: {e}")))?;
            let produced = (engine.total_out() - produced_before) as usize;
            out.extend_from_slice(&chunk[..produced]);

            if status == Status::StreamEnd {
                return Ok(out);
            }
            if produced == 0 && engine.total_in() as usize == consumed {
                return Err(CloakError::Decode("compressed name is truncated".into()));
            }
            if out.len() > MAX_NAME_BYTES {
                return Err(CloakError::Decode("inflated name exceeds size limit".into()));
            }
        }
    }
}

impl fmt::Debug for NameCodecV5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameCodecV5")
            .field("key_derived", &self.key.get().is_some())
            .finish()
    }
}

/// Shift_JIS bytes for `name`, if it survives an encode/decode round-trip.
fn to_legacy(name: &str) -> Option<Vec<u8>> {
    let (bytes, _, had_errors) = SHIFT_JIS.encode(name);
    if had_errors {
        return None;
    }
    let back = SHIFT_JIS.decode_without_bom_handling_and_without_replacement(&bytes)?;
    (back == name).then(|| bytes.into_owned())
}

/// Strict Shift_JIS decode of a decrypted payload.
///
/// Besides well-formedness the bytes must be exactly what `to_legacy` would
/// produce for the decoded text, and must not use the user-defined lead
/// bytes 0xF0..=0xF9.
fn decode_legacy(raw: &[u8]) -> CloakResult<String> {
    let not_sjis = || CloakError::Decode("decrypted name is not Shift_JIS".into());
    if raw.iter().any(|b| (0xF0..=0xF9).contains(b)) {
        return Err(not_sjis());
    }
    let name = SHIFT_JIS
        .decode_without_bom_handling_and_without_replacement(raw)
        .ok_or_else(not_sjis)?
        .into_owned();
    match to_legacy(&name) {
        Some(bytes) if bytes == raw => Ok(name),
        _ => Err(not_sjis()),
    }
}

/// Characters no client ever puts in a name, but which random keystream
/// output decodes to: C1 controls, private use, noncharacters.
pub fn is_plausible_name(name: &str) -> bool {
    name.chars().all(|c| {
        !matches!(c,
            '\u{0080}'..='\u{009F}'
            | '\u{E000}'..='\u{F8FF}'
            | '\u{FDD0}'..='\u{FDEF}')
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Upstream validity check for user-supplied names.
///
/// Rejects C0 controls, DEL, `"` `/` `<` `>` `?` `|`, and the BMP specials
/// block from U+FFFC up.
pub fn is_valid_file_name(name: &str) -> bool {
    name.chars().all(|c| {
        !matches!(c,
            '\u{0000}'..='\u{001F}'
            | '\u{007F}'
            | '"' | '/' | '<' | '>' | '?' | '|'
            | '\u{FFFC}'..='\u{FFFF}')
    })
}

/// `is_valid_file_name` and `is_plausible_name` as a `Validation` error.
pub fn validate_file_name(name: &str) -> CloakResult<()> {
    if is_valid_file_name(name) && is_plausible_name(name) {
        Ok(())
    } else {
        Err(CloakError::Validation(format!("{name:?} contains disallowed characters")))
    }
}

/// Random alphabetic password of 15..=23 characters.
pub fn generate_password() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(15..24);
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
