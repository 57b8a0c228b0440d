//! OpenSSL-style framed stream encryption
//!
//! Wire format:
//! ```text
//! [8 bytes: ASCII magic][8 or 16 bytes: salt][N bytes: AES-256-CTR ciphertext]
//! ```
//!
//! The magic selects the generation, and with it the salt length and the
//! PBKDF2 profile that turns `password ‖ salt` into `key ‖ IV`:
//!
//! | magic      | salt | PRF          | rounds  |
//! |------------|------|--------------|---------|
//! | `Salted__` | 8    | HMAC-SHA-256 | 10 000  |
//! | `Extend__` | 16   | HMAC-SHA-512 | 100 000 |
//!
//! New data is always written as `Extend__`. Both are readable.
//! CTR has no padding, so ciphertext length equals plaintext length and both
//! directions stream without buffering the payload.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use cloak_core::{CloakError, CloakResult};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};

use crate::kdf::{self, KdfProfile, BASIC_STREAM_PROFILE, EXTENDED_STREAM_PROFILE};

pub(crate) type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

pub const MAGIC_LEN: usize = 8;
pub const BASIC_MAGIC: &[u8; MAGIC_LEN] = b"Salted__";
pub const EXTENDED_MAGIC: &[u8; MAGIC_LEN] = b"Extend__";

/// Writes are split into blocks of this size before the keystream is applied.
const WRITE_BLOCK: usize = 16 * 1024;

/// Frame generation, identified by the leading magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Basic,
    Extended,
}

impl Generation {
    pub fn magic(self) -> &'static [u8; MAGIC_LEN] {
        match self {
            Generation::Basic => BASIC_MAGIC,
            Generation::Extended => EXTENDED_MAGIC,
        }
    }

    pub fn salt_len(self) -> usize {
        match self {
            Generation::Basic => 8,
            Generation::Extended => 16,
        }
    }

    /// Total header length (magic + salt) for this generation.
    pub fn header_len(self) -> usize {
        MAGIC_LEN + self.salt_len()
    }

    fn profile(self) -> &'static KdfProfile {
        match self {
            Generation::Basic => &BASIC_STREAM_PROFILE,
            Generation::Extended => &EXTENDED_STREAM_PROFILE,
        }
    }

    /// Match the leading bytes against the known magics.
    pub fn detect(head: &[u8; MAGIC_LEN]) -> CloakResult<Self> {
        if head == BASIC_MAGIC {
            Ok(Generation::Basic)
        } else if head == EXTENDED_MAGIC {
            Ok(Generation::Extended)
        } else {
            Err(CloakError::Decode("unrecognized stream header".into()))
        }
    }

    fn cipher(self, password: &SecretString, salt: &[u8]) -> CloakResult<Aes256Ctr> {
        let material = kdf::derive(password.expose_secret().as_bytes(), salt, self.profile());
        let (key, iv) = material
            .split_key_iv()
            .ok_or_else(|| CloakError::CryptoProvider("stream key material has wrong length".into()))?;
        Aes256Ctr::new_from_slices(key, iv)
            .map_err(|e| CloakError::CryptoProvider(format!("AES-256-CTR init: {e}")))
    }
}

/// Encrypting sink: plaintext written here leaves `inner` as a framed stream.
pub struct EncryptWriter<W: Write> {
    inner: W,
    cipher: Aes256Ctr,
    block: Vec<u8>,
}

impl<W: Write> EncryptWriter<W> {
    /// Start an `Extend__` frame on `inner`. The header is written immediately.
    pub fn new(inner: W, password: &SecretString) -> CloakResult<Self> {
        Self::with_generation(inner, password, Generation::Extended)
    }

    pub(crate) fn with_generation(
        mut inner: W,
        password: &SecretString,
        generation: Generation,
    ) -> CloakResult<Self> {
        let mut salt = vec![0u8; generation.salt_len()];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let cipher = generation.cipher(password, &salt)?;

        inner.write_all(generation.magic())?;
        inner.write_all(&salt)?;

        Ok(Self {
            inner,
            cipher,
            block: Vec::with_capacity(WRITE_BLOCK),
        })
    }

    /// Flush and hand back the inner sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        for piece in data.chunks(WRITE_BLOCK) {
            self.block.clear();
            self.block.extend_from_slice(piece);
            self.cipher.apply_keystream(&mut self.block);
            self.inner.write_all(&self.block)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting source: reads a framed stream from `inner`, yields plaintext.
pub struct DecryptReader<R: Read> {
    inner: R,
    cipher: Aes256Ctr,
    generation: Generation,
}

impl<R: Read> DecryptReader<R> {
    /// Consume the header from `inner` and prepare the keystream.
    ///
    /// A short or unknown magic, or a truncated salt, is a `Decode` error.
    pub fn new(mut inner: R, password: &SecretString) -> CloakResult<Self> {
        let mut head = [0u8; MAGIC_LEN];
        read_header_part(&mut inner, &mut head)?;
        let generation = Generation::detect(&head)?;

        let mut salt = vec![0u8; generation.salt_len()];
        read_header_part(&mut inner, &mut salt)?;

        let cipher = generation.cipher(password, &salt)?;
        Ok(Self {
            inner,
            cipher,
            generation,
        })
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

fn read_header_part<R: Read>(inner: &mut R, buf: &mut [u8]) -> CloakResult<()> {
    inner.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CloakError::Decode("stream header truncated".into()),
        _ => CloakError::Io(e),
    })
}

/// Encrypt a whole buffer into a new framed byte vector.
pub fn encrypt_bytes(plaintext: &[u8], password: &SecretString) -> CloakResult<Vec<u8>> {
    let out = Vec::with_capacity(Generation::Extended.header_len() + plaintext.len());
    let mut writer = EncryptWriter::new(out, password)?;
    writer.write_all(plaintext)?;
    Ok(writer.finish()?)
}

/// Decrypt a whole framed buffer.
pub fn decrypt_bytes(framed: &[u8], password: &SecretString) -> CloakResult<Vec<u8>> {
    let mut reader = DecryptReader::new(framed, password)?;
    let mut out = Vec::with_capacity(framed.len());
    reader.read_to_end(&mut out)?;
    Ok(out)
}

/// Stream-encrypt `from` into `to`, replacing `to` if it exists.
pub fn encrypt_file(from: &Path, to: &Path, password: &SecretString) -> CloakResult<u64> {
    let mut input = BufReader::new(File::open(from)?);
    let mut writer = EncryptWriter::new(BufWriter::new(File::create(to)?), password)?;
    let copied = io::copy(&mut input, &mut writer)?;
    writer.finish()?;
    Ok(copied)
}

/// Stream-decrypt `from` into `to`, replacing `to` if it exists.
pub fn decrypt_file(from: &Path, to: &Path, password: &SecretString) -> CloakResult<u64> {
    let mut reader = DecryptReader::new(BufReader::new(File::open(from)?), password)?;
    let mut output = BufWriter::new(File::create(to)?);
    let copied = io::copy(&mut reader, &mut output)?;
    output.flush()?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s.to_owned())
    }

    #[test]
    fn test_roundtrip_in_memory() {
        let framed = encrypt_bytes(b"hello, framed world!", &pw("pw")).unwrap();
        assert_eq!(&framed[..MAGIC_LEN], EXTENDED_MAGIC);

        let plain = decrypt_bytes(&framed, &pw("pw")).unwrap();
        assert_eq!(plain, b"hello, framed world!");
    }

    #[test]
    fn test_ciphertext_length_is_header_plus_plaintext() {
        let framed = encrypt_bytes(&[0u8; 1000], &pw("pw")).unwrap();
        assert_eq!(framed.len(), MAGIC_LEN + 16 + 1000);
    }

    #[test]
    fn test_empty_payload() {
        let framed = encrypt_bytes(b"", &pw("pw")).unwrap();
        assert_eq!(framed.len(), Generation::Extended.header_len());
        assert!(decrypt_bytes(&framed, &pw("pw")).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_salt_per_frame() {
        let a = encrypt_bytes(b"same", &pw("pw")).unwrap();
        let b = encrypt_bytes(b"same", &pw("pw")).unwrap();
        assert_ne!(a, b, "salt must be random per frame");
    }

    #[test]
    fn test_basic_generation_is_sniffed() {
        let mut writer =
            EncryptWriter::with_generation(Vec::new(), &pw("legacy"), Generation::Basic).unwrap();
        writer.write_all(b"written by an old client").unwrap();
        let framed = writer.finish().unwrap();
        assert_eq!(&framed[..MAGIC_LEN], BASIC_MAGIC);
        assert_eq!(framed.len(), MAGIC_LEN + 8 + 24);

        let mut reader = DecryptReader::new(framed.as_slice(), &pw("legacy")).unwrap();
        assert_eq!(reader.generation(), Generation::Basic);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"written by an old client");
    }

    #[test]
    fn test_unknown_header_is_fatal() {
        let mut framed = encrypt_bytes(b"data", &pw("pw")).unwrap();
        framed[..MAGIC_LEN].copy_from_slice(b"Garbage_");

        let err = decrypt_bytes(&framed, &pw("pw")).unwrap_err();
        assert!(err.is_decode(), "got {err:?}");
    }

    #[test]
    fn test_short_input_is_decode_error() {
        assert!(decrypt_bytes(b"Salt", &pw("pw")).unwrap_err().is_decode());
        assert!(decrypt_bytes(b"Extend__0123", &pw("pw")).unwrap_err().is_decode());
    }

    #[test]
    fn test_wrong_password_yields_different_bytes() {
        let framed = encrypt_bytes(b"attack at dawn", &pw("right")).unwrap();
        let plain = decrypt_bytes(&framed, &pw("wrong")).unwrap();
        assert_ne!(plain, b"attack at dawn");
    }

    #[test]
    fn test_large_write_spans_blocks() {
        let data: Vec<u8> = (0..(3 * WRITE_BLOCK + 123)).map(|i| (i % 251) as u8).collect();
        let framed = encrypt_bytes(&data, &pw("pw")).unwrap();
        assert_eq!(decrypt_bytes(&framed, &pw("pw")).unwrap(), data);
    }

    #[test]
    fn test_small_reads_decrypt_correctly() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();
        let framed = encrypt_bytes(&data, &pw("pw")).unwrap();

        let mut reader = DecryptReader::new(framed.as_slice(), &pw("pw")).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.bin");
        let enc = dir.path().join("plain.bin.enc");
        let dec = dir.path().join("plain.out");
        std::fs::write(&plain, b"file contents").unwrap();

        assert_eq!(encrypt_file(&plain, &enc, &pw("pw")).unwrap(), 13);
        assert_eq!(decrypt_file(&enc, &dec, &pw("pw")).unwrap(), 13);
        assert_eq!(std::fs::read(&dec).unwrap(), b"file contents");
    }
}
