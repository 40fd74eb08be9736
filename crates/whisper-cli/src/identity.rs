//! Identity discovery chain

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use whisper_core::config::{expand_tilde, KeysConfig, DEFAULT_IDENTITY_FILE};
use whisper_crypto::PrivateKey;

/// A loaded private key and where it came from
pub struct LoadedIdentity {
    pub key: PrivateKey,
    pub source: String,
}

/// Every place an identity may come from, in priority order.
#[derive(Default)]
struct Sources {
    flag: Option<PathBuf>,
    env_file: Option<PathBuf>,
    env_literal: Option<SecretString>,
    config_file: Option<PathBuf>,
    default_file: PathBuf,
}

impl Sources {
    fn from_env(flag: Option<&Path>, config: &KeysConfig) -> Self {
        Self {
            flag: flag.map(expand_tilde),
            env_file: std::env::var_os("WHISPER_IDENTITY_FILE").map(PathBuf::from),
            env_literal: std::env::var("WHISPER_IDENTITY")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(SecretString::from),
            config_file: config.identity_file.as_deref().map(expand_tilde),
            default_file: expand_tilde(Path::new(DEFAULT_IDENTITY_FILE)),
        }
    }
}

/// Discover and load the identity using the priority chain:
///   1. `--identity` flag (must exist when given)
///   2. $WHISPER_IDENTITY_FILE  (explicit path env var)
///   3. $WHISPER_IDENTITY  (literal key in env var)
///   4. `[keys].identity_file` from whisper.toml
///   5. ~/.config/whisper/identity
pub fn find_identity(flag: Option<&Path>, config: &KeysConfig) -> Result<LoadedIdentity> {
    resolve(&Sources::from_env(flag, config))
}

fn resolve(sources: &Sources) -> Result<LoadedIdentity> {
    if let Some(path) = &sources.flag {
        return load_file(path, "flag");
    }

    if let Some(path) = &sources.env_file {
        if path.exists() {
            return load_file(path, "WHISPER_IDENTITY_FILE");
        }
        tracing::warn!(path = %path.display(), "WHISPER_IDENTITY_FILE does not exist, ignoring");
    }

    if let Some(literal) = &sources.env_literal {
        let key: PrivateKey = literal
            .expose_secret()
            .parse()
            .context("parsing WHISPER_IDENTITY")?;
        return Ok(LoadedIdentity {
            key,
            source: "WHISPER_IDENTITY (env)".into(),
        });
    }

    if let Some(path) = &sources.config_file {
        if path.exists() {
            return load_file(path, "config");
        }
    }

    if sources.default_file.exists() {
        return load_file(&sources.default_file, "default");
    }

    anyhow::bail!(
        "no identity found. Tried: --identity, $WHISPER_IDENTITY_FILE, $WHISPER_IDENTITY, \
         config path, and {}. Run: whisper keygen",
        sources.default_file.display()
    )
}

fn load_file(path: &Path, origin: &str) -> Result<LoadedIdentity> {
    let content = SecretString::from(
        std::fs::read_to_string(path)
            .with_context(|| format!("reading identity: {}", path.display()))?,
    );
    let key: PrivateKey = content
        .expose_secret()
        .parse()
        .with_context(|| format!("parsing identity: {}", path.display()))?;
    Ok(LoadedIdentity {
        key,
        source: format!("{origin}:{}", path.display()),
    })
}

/// Where `keygen` writes when `--out` is not given.
pub fn default_identity_path(flag: Option<&Path>, config: &KeysConfig) -> PathBuf {
    let sources = Sources::from_env(flag, config);
    sources
        .flag
        .or(sources.env_file)
        .or(sources.config_file)
        .unwrap_or(sources.default_file)
}

/// Write `key` to `path`, readable by the owner only.
pub fn write_identity(path: &Path, key: &PrivateKey, force: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut opts = OpenOptions::new();
    opts.write(true);
    if force {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }

    let mut file = opts.open(path).with_context(|| {
        if path.exists() && !force {
            format!("{} already exists (use --force to replace it)", path.display())
        } else {
            format!("creating identity: {}", path.display())
        }
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", key.encode().as_str())
        .with_context(|| format!("writing identity: {}", path.display()))?;
    Ok(())
}
