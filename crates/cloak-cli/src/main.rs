//! cloak: encrypted names, encrypted content, encrypted workspace
//!
//! Usage:
//!   cloak [--config cloak.toml] <command>
//!
//! Bucket commands (`ls`, `put`, `get`, `mv`, `rm`) and `workspace` need the
//! workspace key: `--key`, `$CLOAK_KEY`, or an interactive prompt.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use cloak_core::config::CloakConfig;
use cloak_core::types::NAME_VERSION_KEY;
use cloak_crypto::{decrypt_file, encrypt_file, NameEncoder};
use cloak_storage::{build_operator, BlobStore, Bucket};
use cloak_workspace::{fetch_blob, login, put_file, EncryptedStore, Scratch, SessionStore, Workspace};
use secrecy::{ExposeSecret, SecretString};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cloak", version, about = "Encrypted object storage client")]
struct Cli {
    /// Path to cloak.toml configuration file
    #[arg(long, short = 'c', env = "CLOAK_CONFIG", default_value = "cloak.toml")]
    config: PathBuf,

    /// Workspace key (prompted for when needed and not given)
    #[arg(long, env = "CLOAK_KEY", hide_env_values = true, global = true)]
    key: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "CLOAK_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "CLOAK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt, decrypt and validate file names
    Name {
        #[command(subcommand)]
        action: NameAction,
    },

    /// Encrypt a file into the framed stream format
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Stream password
        #[arg(long, env = "CLOAK_STREAM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Decrypt a framed stream (either generation)
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        /// Stream password
        #[arg(long, env = "CLOAK_STREAM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect and edit the encrypted workspace
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// List the decodable files in a bucket
    Ls { bucket: String },

    /// Encrypt and upload a local file
    Put {
        bucket: String,
        local: PathBuf,
        /// Name to store under (default: the local file name)
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Download and decrypt a file
    Get {
        bucket: String,
        name: String,
        /// Destination (default: ./<name>)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Rename a file inside a bucket
    Mv {
        bucket: String,
        from: String,
        to: String,
    },

    /// Delete a file from a bucket
    Rm { bucket: String, name: String },

    /// Shred everything left in the staging directories
    Clean,
}

#[derive(Subcommand, Debug)]
enum NameAction {
    /// Print the token and `_v` attribute for a name
    Encode {
        name: String,
        #[arg(long, env = "CLOAK_NAME_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Recover a name from its token
    Decode {
        token: String,
        /// Version attribute stored with the blob
        #[arg(long = "version", short = 'v', default_value = "5u_")]
        name_version: String,
        #[arg(long, env = "CLOAK_NAME_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Exit non-zero if the name contains disallowed characters
    Check { name: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum WorkspaceAction {
    /// Print buckets and openers (passwords are not shown)
    Show,
    /// Register a bucket with a generated name password
    AddBucket {
        name: String,
        location: String,
        /// S3 credentials as ACCESS_KEY_ID:SECRET_ACCESS_KEY
        #[arg(long)]
        keyfile: Option<String>,
    },
}

// ── Entry point ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CloakConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format.clone() {
        Some(format) => format,
        None if config.log.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);
    info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "cloak starting");

    match cli.command {
        Commands::Name { ref action } => cmd_name(action),
        Commands::Encrypt { ref input, ref output, ref password } => {
            let password = secret_or_prompt(password.as_deref(), "stream password: ")?;
            let n = encrypt_file(input, output, &password)
                .with_context(|| format!("encrypting {}", input.display()))?;
            println!("encrypted {n} bytes → {}", output.display());
            Ok(())
        }
        Commands::Decrypt { ref input, ref output, ref password } => {
            let password = secret_or_prompt(password.as_deref(), "stream password: ")?;
            let n = decrypt_file(input, output, &password)
                .with_context(|| format!("decrypting {}", input.display()))?;
            println!("decrypted {n} bytes → {}", output.display());
            Ok(())
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Workspace { ref action } => {
            let key = workspace_key(cli.key.as_deref())?;
            cmd_workspace(&config, &key, action)
        }
        Commands::Ls { ref bucket } => {
            let ws = open_session(&config, cli.key.as_deref())?;
            cmd_ls(&open_bucket(&config, &ws, bucket)?).await
        }
        Commands::Put { ref bucket, ref local, ref name } => {
            let ws = open_session(&config, cli.key.as_deref())?;
            let scratch = prepare_scratch(&config, &ws)?;
            let bucket = open_bucket(&config, &ws, bucket)?;
            cmd_put(&bucket, &scratch, local, name.as_deref()).await
        }
        Commands::Get { ref bucket, ref name, ref output } => {
            let ws = open_session(&config, cli.key.as_deref())?;
            let scratch = prepare_scratch(&config, &ws)?;
            let bucket = open_bucket(&config, &ws, bucket)?;
            cmd_get(&bucket, &scratch, name, output.as_deref()).await
        }
        Commands::Mv { ref bucket, ref from, ref to } => {
            let ws = open_session(&config, cli.key.as_deref())?;
            let bucket = open_bucket(&config, &ws, bucket)?;
            let blob = find(&bucket, from).await?;
            bucket.move_to(&blob, to).await?;
            println!("{from} → {to}");
            Ok(())
        }
        Commands::Rm { ref bucket, ref name } => {
            let ws = open_session(&config, cli.key.as_deref())?;
            let bucket = open_bucket(&config, &ws, bucket)?;
            let blob = find(&bucket, name).await?;
            bucket.delete(&blob).await?;
            println!("removed {name}");
            Ok(())
        }
        Commands::Clean => {
            let ws = open_session(&config, cli.key.as_deref())?;
            let scratch = ws.scratch(&config.workspace.scratch_root);
            let n = scratch.clean_temp_dir()?;
            println!("shredded {n} staged file(s) under {}", scratch.root().display());
            Ok(())
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // logs go to stderr so command output stays pipeable
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Secrets ────────────────────────────────────────────────────────────────────

fn secret_or_prompt(given: Option<&str>, prompt: &str) -> Result<SecretString> {
    match given {
        Some(s) => Ok(SecretString::from(s.to_owned())),
        None => {
            let entered = rpassword::prompt_password(prompt).context("reading password")?;
            Ok(SecretString::from(entered))
        }
    }
}

fn workspace_key(given: Option<&str>) -> Result<SecretString> {
    secret_or_prompt(given, "workspace key: ").context("reading workspace key")
}

// ── Workspace plumbing ─────────────────────────────────────────────────────────

fn open_session(config: &CloakConfig, key: Option<&str>) -> Result<Arc<Workspace>> {
    let key = workspace_key(key)?;
    let sessions = SessionStore::new();
    let token = login(&sessions, &config.workspace.dir, &key)
        .context("opening workspace (wrong key?)")?;
    sessions.get(&token).context("session was not established")
}

fn open_bucket(config: &CloakConfig, ws: &Workspace, name: &str) -> Result<Bucket> {
    let bucket = ws
        .bucket(name)
        .with_context(|| format!("no bucket named {name:?}; see `cloak workspace show`"))?;
    let op = build_operator(&config.storage, bucket)?;
    Ok(Bucket::new(BlobStore::new(op), &bucket.password))
}

fn prepare_scratch(config: &CloakConfig, ws: &Workspace) -> Result<Scratch> {
    let scratch = ws.scratch(&config.workspace.scratch_root);
    if config.workspace.clean_on_start {
        scratch.clean_temp_dir().context("cleaning staging directories")?;
    }
    Ok(scratch)
}

async fn find(bucket: &Bucket, display: &str) -> Result<cloak_storage::BlobRef> {
    bucket
        .find(display)
        .await?
        .with_context(|| format!("no file named {display:?}"))
}

// ── Commands ───────────────────────────────────────────────────────────────────

fn cmd_name(action: &NameAction) -> Result<()> {
    match action {
        NameAction::Encode { name, password } => {
            cloak_crypto::validate_file_name(name)?;
            let password = secret_or_prompt(password.as_deref(), "name password: ")?;
            let mut encoder = NameEncoder::new(password.expose_secret());
            let mut metadata = HashMap::new();
            let token = encoder.encode(name, &mut metadata)?;
            encoder.close();
            println!("token: {token}");
            println!("{NAME_VERSION_KEY}:    {}", metadata.get(NAME_VERSION_KEY).map_or("", String::as_str));
            Ok(())
        }
        NameAction::Decode { token, name_version, password } => {
            let password = secret_or_prompt(password.as_deref(), "name password: ")?;
            let mut encoder = NameEncoder::new(password.expose_secret());
            let metadata = HashMap::from([(NAME_VERSION_KEY.to_string(), name_version.clone())]);
            let name = encoder.decode(token, &metadata);
            encoder.close();
            println!("{}", name.context("name unavailable")?);
            Ok(())
        }
        NameAction::Check { name } => {
            cloak_crypto::validate_file_name(name)?;
            println!("ok");
            Ok(())
        }
    }
}

fn cmd_config_show(config: &CloakConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn cmd_workspace(config: &CloakConfig, key: &SecretString, action: &WorkspaceAction) -> Result<()> {
    let mut store = EncryptedStore::open(&config.workspace.dir, key);
    let mut ws = store.get(Workspace::default).context("opening workspace (wrong key?)")?;

    match action {
        WorkspaceAction::Show => {
            println!("location: {}", display_or_default(&ws.location));
            println!("opener:   {}", display_or_default(&ws.opener));
            for (ext, opener) in &ws.type_opener {
                println!("  .{ext:<8} {opener}");
            }
            println!("buckets:");
            for bucket in &ws.buckets {
                println!("  {:<20} {}", bucket.name, bucket.location);
            }
        }
        WorkspaceAction::AddBucket { name, location, keyfile } => {
            let added = ws.add_bucket(name, location)?;
            println!("added bucket {} at {}", added.name, added.location);
            if let Some(keyfile) = keyfile {
                if let Some(last) = ws.buckets.last_mut() {
                    last.keyfile = keyfile.clone();
                }
            }
            store.set(&ws)?;
        }
    }

    store.close();
    Ok(())
}

fn display_or_default(value: &str) -> &str {
    if value.is_empty() {
        "(default)"
    } else {
        value
    }
}

async fn cmd_ls(bucket: &Bucket) -> Result<()> {
    let mut blobs = bucket.list().await?;
    blobs.sort_by(|a, b| a.display_name().cmp(&b.display_name()));
    for blob in &blobs {
        println!(
            "{:>12}  {}",
            blob.info.size,
            blob.display_name().unwrap_or_default()
        );
    }
    Ok(())
}

async fn cmd_put(bucket: &Bucket, scratch: &Scratch, local: &Path, name: Option<&str>) -> Result<()> {
    let display = match name {
        Some(n) => n.to_string(),
        None => local
            .file_name()
            .with_context(|| format!("{} has no file name", local.display()))?
            .to_string_lossy()
            .into_owned(),
    };
    let blob = put_file(bucket, scratch, local, &display).await?;
    println!("stored {display} ({} bytes)", blob.info.size);
    Ok(())
}

async fn cmd_get(bucket: &Bucket, scratch: &Scratch, name: &str, output: Option<&Path>) -> Result<()> {
    let blob = find(bucket, name).await?;
    let content = fetch_blob(bucket, &blob, scratch).await?;
    let dest = output.map_or_else(|| PathBuf::from(name), Path::to_path_buf);
    tokio::fs::write(&dest, &content)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;
    println!("{name} → {} ({} bytes)", dest.display(), content.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_workspace_key_from_flag_is_secret() {
        let key = workspace_key(Some("hunter2")).unwrap();
        assert_eq!(key.expose_secret(), "hunter2");
        assert!(!format!("{key:?}").contains("hunter2"));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_name_decode() {
        let cli = Cli::try_parse_from([
            "cloak", "name", "decode", "QUJDRA", "--version", "5sc", "--password", "pw",
        ])
        .unwrap();
        match cli.command {
            Commands::Name {
                action: NameAction::Decode { token, name_version, password },
            } => {
                assert_eq!(token, "QUJDRA");
                assert_eq!(name_version, "5sc");
                assert_eq!(password.as_deref(), Some("pw"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_put_with_global_key() {
        let cli = Cli::try_parse_from([
            "cloak", "put", "photos", "/tmp/a.jpg", "--name", "beach.jpg", "--key", "k",
        ])
        .unwrap();
        assert_eq!(cli.key.as_deref(), Some("k"));
        assert!(matches!(
            cli.command,
            Commands::Put { ref bucket, ref name, .. } if bucket == "photos" && name.as_deref() == Some("beach.jpg")
        ));
    }

    #[test]
    fn test_parse_log_format() {
        let cli = Cli::try_parse_from(["cloak", "--log-format", "json", "clean"]).unwrap();
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
    }

    #[test]
    fn test_display_or_default() {
        assert_eq!(display_or_default(""), "(default)");
        assert_eq!(display_or_default("/srv"), "/srv");
    }
}
