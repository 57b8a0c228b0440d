use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{CloakError, CloakResult};

/// Top-level configuration (loaded from cloak.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloakConfig {
    pub workspace: WorkspaceConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl CloakConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> CloakResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CloakError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory holding the encrypted config records
    pub dir: PathBuf,
    /// Root for the `temp/enc` and `temp/dec` staging directories
    pub scratch_root: PathBuf,
    /// Shred leftover staging files when a command starts
    pub clean_on_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local directory (one subdirectory per bucket location)
    Fs,
    /// Process memory; contents vanish on exit
    Memory,
    /// Any S3-compatible endpoint
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./workspace"),
            scratch_root: PathBuf::from("./workspace"),
            clean_on_start: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("./buckets"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            enforce_tls: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[workspace]
dir = "/var/lib/cloak/config"
scratch_root = "/var/lib/cloak"
clean_on_start = false

[storage]
backend = "s3"
endpoint = "https://s3.example.com:8333"
region = "us-west-2"
enforce_tls = true

[log]
level = "debug"
format = "json"
"#;
        let config: CloakConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.workspace.dir, PathBuf::from("/var/lib/cloak/config"));
        assert!(!config.workspace.clean_on_start);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.endpoint, "https://s3.example.com:8333");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: CloakConfig = toml::from_str("").unwrap();

        assert_eq!(config.workspace.dir, PathBuf::from("./workspace"));
        assert!(config.workspace.clean_on_start);
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[storage]
backend = "memory"
"#;
        let config: CloakConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        // Defaults
        assert_eq!(config.storage.root, PathBuf::from("./buckets"));
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CloakConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.workspace.scratch_root, PathBuf::from("./workspace"));
    }

    #[test]
    fn test_load_rejects_bad_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloak.toml");
        std::fs::write(&path, "[storage]\nbackend = \"ftp\"\n").unwrap();
        let err = CloakConfig::load(&path).unwrap_err();
        assert!(matches!(err, CloakError::Config(_)));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CloakConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CloakConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.workspace.dir, parsed.workspace.dir);
        assert_eq!(config.storage.backend, parsed.storage.backend);
    }
}
