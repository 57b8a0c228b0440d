//! cloak-workspace: encrypted config, sessions, staging and transfers
//!
//! Login flow:
//!   1. `EncryptedStore::open(dir, key)` derives the three rotated passphrases
//!   2. `get::<Workspace>` reads the stored workspace (or a default)
//!   3. the store is closed (flushed, passphrases dropped)
//!   4. `SessionStore::establish` hands back an opaque token

pub mod encrypted_store;
pub mod scratch;
pub mod session;
pub mod transfer;
pub mod workspace;

pub use encrypted_store::{ConfigRecord, EncryptedStore, RotatingPassphrases};
pub use scratch::{shred, shred_header, Scratch};
pub use session::{login, SessionStore};
pub use transfer::{fetch_blob, put_file};
pub use workspace::Workspace;
