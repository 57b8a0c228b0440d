//! In-memory sessions and login
//!
//! Establishing a session discards every earlier one: at most one session
//! is live at a time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cloak_core::CloakResult;
use rand::RngCore;
use secrecy::SecretString;

use crate::encrypted_store::EncryptedStore;
use crate::workspace::Workspace;

const TOKEN_BYTES: usize = 32;

/// Token → workspace map, shared by reference with request handlers.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Workspace>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any existing session with one for `workspace`; returns its token.
    pub fn establish(&self, workspace: Workspace) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let mut sessions = self.lock();
        sessions.clear();
        sessions.insert(token.clone(), Arc::new(workspace));
        tracing::info!("session established");
        token
    }

    pub fn get(&self, token: &str) -> Option<Arc<Workspace>> {
        self.lock().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Workspace>>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Open the encrypted config under `config_dir` with `user_key`, load the
/// workspace (default if none is stored), stamp `last_login` and start a
/// session for it.
pub fn login(
    sessions: &SessionStore,
    config_dir: &Path,
    user_key: &SecretString,
) -> CloakResult<String> {
    let mut store = EncryptedStore::open(config_dir, user_key);
    let mut workspace = store.get(Workspace::default)?;
    workspace.last_login = Some(unix_secs().to_string());
    store.set(&workspace)?;
    store.close();
    Ok(sessions.establish(workspace))
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
