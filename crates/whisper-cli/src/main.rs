//! whisper: encrypted message archives for X25519 recipients
//!
//! Commands:
//!   keygen              - create an identity and print its public key
//!   pubkey              - print the public key of the current identity
//!   encode --to KEY...  - write an archive for one or more recipients
//!   decode <archive>    - decrypt an archive into a directory
//!   inspect <archive>   - show the sender and recipient count without decrypting
//!   config show         - display the effective configuration

mod identity;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};

use whisper_core::config::{expand_tilde, WhisperConfig};
use whisper_core::WhisperError;
use whisper_crypto::{ErrorCategory, Identity, Message, PrivateKey, PublicKey};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "whisper",
    version,
    about = "Encrypted message archives",
    long_about = "whisper: seal a title, a message and attachments for X25519 public keys"
)]
struct Cli {
    /// Path to whisper.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "WHISPER_CONFIG",
        default_value = "~/.config/whisper/whisper.toml"
    )]
    config: PathBuf,

    /// Identity (private key) file, overriding the discovery chain
    #[arg(long, short = 'i', global = true)]
    identity: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides [log].level
    #[arg(long, env = "WHISPER_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides [log].format
    #[arg(long, env = "WHISPER_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

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
    /// Generate a new identity and print its public key
    Keygen {
        /// Where to write the private key (default: the discovered identity path)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Replace an existing identity file
        #[arg(long)]
        force: bool,
    },

    /// Print the public key of the current identity
    Pubkey,

    /// Encrypt a message into a new archive
    Encode {
        /// Recipient public key (repeatable)
        #[arg(long = "to", short = 't', required = true)]
        to: Vec<PublicKey>,
        /// Message title
        #[arg(long, default_value = "")]
        title: String,
        /// Message text
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,
        /// Read the message text from a file
        #[arg(long)]
        content_file: Option<PathBuf>,
        /// Image attachment (repeatable)
        #[arg(long)]
        image: Vec<PathBuf>,
        /// Video attachment (repeatable)
        #[arg(long)]
        video: Vec<PathBuf>,
        /// Output path (default: <output.directory>/<prefix>-YYYYMMDD-HHMMSS.bin)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Decrypt an archive into <out>/<archive name>/
    Decode {
        /// Archive to decrypt
        archive: PathBuf,
        /// Parent directory for the decoded message (default: output.directory)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Show the unencrypted header of an archive
    Inspect {
        /// Archive to inspect
        archive: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(hint) = error_hint(&e) {
                eprintln!("  {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path)?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None if config.log.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);
    debug!(config = %config_path.display(), "configuration loaded");

    let identity = cli.identity.as_deref();
    match cli.command {
        Commands::Keygen { out, force } => {
            cmd_keygen(&config, identity, out.as_deref(), force, cli.json)
        }
        Commands::Pubkey => cmd_pubkey(&config, identity, cli.json),
        Commands::Encode {
            to,
            title,
            content,
            content_file,
            image,
            video,
            out,
        } => {
            let content = match (content, content_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading content file: {}", path.display()))?,
                (None, None) => String::new(),
            };
            let message = Message {
                recipients: to,
                title,
                content,
                images: image,
                videos: video,
            };
            cmd_encode(&config, identity, &message, out.as_deref(), cli.json)
        }
        Commands::Decode { archive, out } => {
            cmd_decode(&config, identity, &archive, out.as_deref(), cli.json)
        }
        Commands::Inspect { archive } => cmd_inspect(&archive, cli.json),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

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

fn load_config(path: &Path) -> Result<WhisperConfig> {
    if path.exists() {
        WhisperConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
    } else {
        Ok(WhisperConfig::default())
    }
}

/// Turn a failed command into advice that depends on what went wrong.
fn error_hint(e: &anyhow::Error) -> Option<&'static str> {
    let category = e.chain().find_map(|cause| {
        cause
            .downcast_ref::<whisper_crypto::Error>()
            .map(|err| err.category())
            .or_else(|| match cause.downcast_ref::<WhisperError>() {
                Some(WhisperError::Crypto(err)) => Some(err.category()),
                _ => None,
            })
    })?;

    Some(match category {
        ErrorCategory::NotRecipient => "this archive was not addressed to your identity",
        ErrorCategory::Crypto => "the archive is corrupted or was modified after it was sealed",
        ErrorCategory::Format => "the file is not a valid Whisper archive",
        ErrorCategory::Internal => "an internal consistency check failed; please report this",
        ErrorCategory::Resource => "check disk space and file permissions",
        ErrorCategory::Usage => return None,
    })
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}

// ── `whisper keygen` ──────────────────────────────────────────────────────────

fn cmd_keygen(
    config: &WhisperConfig,
    identity_flag: Option<&Path>,
    out: Option<&Path>,
    force: bool,
    json: bool,
) -> Result<()> {
    let path = match out {
        Some(p) => expand_tilde(p),
        None => identity::default_identity_path(identity_flag, &config.keys),
    };

    let key = PrivateKey::generate().context("generating identity")?;
    identity::write_identity(&path, &key, force)?;
    info!(path = %path.display(), "identity created");

    let public = key.public_key();
    if json {
        print_json(&serde_json::json!({
            "public_key": public,
            "identity_file": path,
        }))
    } else {
        eprintln!("identity written to {}", path.display());
        println!("{public}");
        Ok(())
    }
}

// ── `whisper pubkey` ──────────────────────────────────────────────────────────

fn cmd_pubkey(config: &WhisperConfig, identity_flag: Option<&Path>, json: bool) -> Result<()> {
    let loaded = identity::find_identity(identity_flag, &config.keys)?;
    let public = loaded.key.public_key();
    if json {
        print_json(&serde_json::json!({
            "public_key": public,
            "source": loaded.source,
        }))
    } else {
        println!("{public}");
        Ok(())
    }
}

// ── `whisper encode` ──────────────────────────────────────────────────────────

fn cmd_encode(
    config: &WhisperConfig,
    identity_flag: Option<&Path>,
    message: &Message,
    out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let loaded = identity::find_identity(identity_flag, &config.keys)?;
    config.limits.check(message)?;

    let out = match out {
        Some(p) => expand_tilde(p),
        None => config.output.archive_path(),
    };

    let spinner = make_spinner("encode");
    spinner.set_message(format!(
        "sealing for {} recipient(s)",
        message.recipients.len()
    ));
    let bytes = encode_staged(message, &loaded.key, &out)?;
    spinner.finish_and_clear();

    info!(
        path = %out.display(),
        bytes,
        recipients = message.recipients.len(),
        "archive written"
    );

    if json {
        print_json(&serde_json::json!({
            "archive": out,
            "bytes": bytes,
            "recipients": message.recipients,
        }))
    } else {
        println!("{}", out.display());
        Ok(())
    }
}

/// Encode into a temporary file next to `out`, then move it into place.
///
/// Never replaces an existing `out`. On any error nothing is left behind.
fn encode_staged(message: &Message, sender: &PrivateKey, out: &Path) -> Result<u64> {
    let dir = match out.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let staged = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    let writer = whisper_crypto::encode_to_writer(
        message,
        sender,
        BufWriter::new(staged.as_file()),
    )
    .context("encoding archive")?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flushing archive")?;
    let file = staged
        .persist_noclobber(out)
        .map_err(|e| e.error)
        .with_context(|| format!("writing archive: {}", out.display()))?;
    Ok(file.metadata()?.len())
}

// ── `whisper decode` ──────────────────────────────────────────────────────────

fn cmd_decode(
    config: &WhisperConfig,
    identity_flag: Option<&Path>,
    archive: &Path,
    out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let loaded = identity::find_identity(identity_flag, &config.keys)?;
    let identity = Identity::new(loaded.key);

    let parent = expand_tilde(out.unwrap_or(&config.output.directory));
    let stem = archive
        .file_stem()
        .with_context(|| format!("archive path has no file name: {}", archive.display()))?;
    let target = parent.join(stem);

    let spinner = make_spinner("decode");
    spinner.set_message(archive.display().to_string());
    let message = decode_staged(archive, &identity, &target)?;
    spinner.finish_and_clear();

    info!(
        path = %target.display(),
        images = message.images.len(),
        videos = message.videos.len(),
        "archive decoded"
    );

    if json {
        print_json(&serde_json::json!({
            "directory": target,
            "sender": message.recipients.first(),
            "message": message,
        }))
    } else {
        println!("directory: {}", target.display());
        if let Some(sender) = message.recipients.first() {
            println!("from:      {sender}");
        }
        println!("title:     {}", message.title);
        for path in message.images.iter().chain(&message.videos) {
            println!("attached:  {}", path.display());
        }
        Ok(())
    }
}

/// Decode `archive` into a temporary directory beside `target`, add
/// `title.txt` and `content.txt`, then rename it to `target`.
///
/// `target` must not exist. On any error the temporary directory is removed,
/// so a failed decode leaves nothing under the parent. Attachment paths in
/// the returned message point into `target`.
fn decode_staged(archive: &Path, identity: &Identity, target: &Path) -> Result<Message> {
    if target.exists() {
        anyhow::bail!("{} already exists", target.display());
    }
    let parent = match target.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).with_context(|| format!("creating {}", parent.display()))?;

    let staging = tempfile::TempDir::new_in(&parent)
        .with_context(|| format!("creating temporary directory in {}", parent.display()))?;
    let reader = BufReader::new(
        File::open(archive).with_context(|| format!("opening {}", archive.display()))?,
    );
    let decoded = whisper_crypto::decode_from_reader(reader, identity, staging.path())
        .with_context(|| format!("decoding {}", archive.display()))?;

    std::fs::write(staging.path().join("title.txt"), &decoded.title)?;
    std::fs::write(staging.path().join("content.txt"), &decoded.content)?;

    let staged = staging.keep();
    if let Err(e) = std::fs::rename(&staged, target) {
        let _ = std::fs::remove_dir_all(&staged);
        return Err(e).with_context(|| format!("moving decoded message to {}", target.display()));
    }

    let relocate = |paths: Vec<PathBuf>| -> Vec<PathBuf> {
        paths
            .into_iter()
            .map(|p| match p.strip_prefix(&staged) {
                Ok(rel) => target.join(rel),
                Err(_) => p,
            })
            .collect()
    };
    Ok(Message {
        images: relocate(decoded.images),
        videos: relocate(decoded.videos),
        ..decoded
    })
}

// ── `whisper inspect` ─────────────────────────────────────────────────────────

fn cmd_inspect(archive: &Path, json: bool) -> Result<()> {
    let mut file = File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    let size = file.metadata()?.len();

    let mut prefix = Vec::with_capacity(whisper_crypto::MAGIC.len());
    (&mut file)
        .take(whisper_crypto::MAGIC.len() as u64)
        .read_to_end(&mut prefix)?;
    if !whisper_crypto::looks_like_archive(&prefix) {
        anyhow::bail!("{} is not a Whisper archive", archive.display());
    }

    let header = whisper_crypto::inspect_header(prefix.as_slice().chain(BufReader::new(file)))
        .with_context(|| format!("reading header of {}", archive.display()))?;

    if json {
        print_json(&serde_json::json!({
            "archive": archive,
            "bytes": size,
            "sender": header.sender,
            "recipient_count": header.recipient_count,
        }))
    } else {
        println!("archive:    {}", archive.display());
        println!("size:       {size} bytes");
        println!("sender:     {}", header.sender);
        println!("recipients: {}", header.recipient_count);
        Ok(())
    }
}

// ── `whisper config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &WhisperConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = config.to_toml().context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
