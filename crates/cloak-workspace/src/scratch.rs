//! Staging directories and shredding
//!
//! ```text
//! <root>/temp/enc/<nanos><suffix>   ciphertext on its way in or out
//! <root>/temp/dec/<nanos><suffix>   plaintext, must be fully shredded
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use cloak_core::CloakResult;
use rand::RngCore;

/// Overwrite granularity for shredding
pub const SHRED_BLOCK: usize = 16 * 1024;

/// Last name handed out; names are strictly increasing within a process.
static LAST_NANOS: AtomicU64 = AtomicU64::new(0);

/// Staging area rooted at a workspace location.
#[derive(Debug, Clone)]
pub struct Scratch {
    root: PathBuf,
}

impl Scratch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/temp/enc`, created on demand.
    pub fn encrypted_dir(&self) -> CloakResult<PathBuf> {
        self.staging_dir("enc")
    }

    /// `<root>/temp/dec`, created on demand.
    pub fn decrypted_dir(&self) -> CloakResult<PathBuf> {
        self.staging_dir("dec")
    }

    /// New empty file in encrypted staging.
    pub fn temp_file_encrypted(&self, suffix: &str) -> CloakResult<PathBuf> {
        create_unique(&self.encrypted_dir()?, suffix)
    }

    /// New empty file in decrypted staging.
    pub fn temp_file_decrypted(&self, suffix: &str) -> CloakResult<PathBuf> {
        create_unique(&self.decrypted_dir()?, suffix)
    }

    /// Shred everything in decrypted staging and header-shred encrypted staging.
    /// Subdirectories are left alone. Returns the number of files destroyed.
    pub fn clean_temp_dir(&self) -> CloakResult<usize> {
        let decrypted = files_in(&self.decrypted_dir()?)?;
        let encrypted = files_in(&self.encrypted_dir()?)?;
        shred(&decrypted)?;
        shred_header(&encrypted)?;

        let total = decrypted.len() + encrypted.len();
        if total > 0 {
            tracing::info!(
                decrypted = decrypted.len(),
                encrypted = encrypted.len(),
                root = %self.root.display(),
                "cleaned staging directories"
            );
        }
        Ok(total)
    }

    fn staging_dir(&self, leaf: &str) -> CloakResult<PathBuf> {
        let dir = self.root.join("temp").join(leaf);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Overwrite each file end to end with random bytes, then unlink it.
pub fn shred<P: AsRef<Path>>(paths: &[P]) -> CloakResult<()> {
    for path in paths {
        destroy(path.as_ref(), false)?;
    }
    Ok(())
}

/// Overwrite only the first `SHRED_BLOCK` bytes of each file, then unlink it.
///
/// For ciphertext files only: past the header the content is already
/// indistinguishable from the random fill.
pub fn shred_header<P: AsRef<Path>>(paths: &[P]) -> CloakResult<()> {
    for path in paths {
        destroy(path.as_ref(), true)?;
    }
    Ok(())
}

fn destroy(path: &Path, header_only: bool) -> CloakResult<()> {
    match OpenOptions::new().write(true).open(path) {
        Ok(file) => overwrite(file, header_only)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn overwrite(mut file: File, header_only: bool) -> io::Result<()> {
    let len = file.metadata()?.len();
    let limit = if header_only {
        len.min(SHRED_BLOCK as u64)
    } else {
        len
    };

    let mut rng = rand::thread_rng();
    let mut block = vec![0u8; SHRED_BLOCK];
    let mut written = 0u64;
    while written < limit {
        let n = (limit - written).min(SHRED_BLOCK as u64) as usize;
        rng.fill_bytes(&mut block[..n]);
        file.write_all(&block[..n])?;
        written += n as u64;
    }
    file.sync_all()
}

fn files_in(dir: &Path) -> CloakResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            tracing::debug!(path = %entry.path().display(), "skipping directory in staging");
            continue;
        }
        files.push(entry.path());
    }
    Ok(files)
}

fn next_nanos() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut last = LAST_NANOS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_NANOS.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

fn create_unique(dir: &Path, suffix: &str) -> CloakResult<PathBuf> {
    loop {
        let path = dir.join(format!("{}{suffix}", next_nanos()));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            // left over from an earlier process
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
