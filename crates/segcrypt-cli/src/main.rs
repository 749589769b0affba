//! segcrypt: segment encryption CLI
//!
//! Commands:
//!   init                                   - register a new file, print its file_id
//!   encrypt --file-id <id> --index <n> <in> - seal one segment, write .enc + .json
//!   decrypt <ciphertext> <descriptor>       - open one segment with the file password
//!   inspect <descriptor>                    - show a descriptor's fields
//!   list <file-id>                          - show a file's registry records
//!   forget <file-id>                        - delete a file's registry records
//!   config show                             - display current configuration
//!
//! Passwords are read from SEGCRYPT_PASSWORD, or prompted for on the terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::io::Write;
use std::path::{Path, PathBuf};

use segcrypt_core::config::SegcryptConfig;
use segcrypt_core::SegcryptError;
use segcrypt_crypto::{MinimalSegmentDescriptor, SegmentDescriptor};
use segcrypt_engine::{Credential, SegmentCodec};
use segcrypt_registry::{KeyRegistry, RegistryBackend};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "segcrypt",
    version,
    about = "Per-segment file encryption",
    long_about = "segcrypt: encrypt file segments under keys derived from a per-file password"
)]
struct Cli {
    /// Path to segcrypt.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SEGCRYPT_CONFIG",
        default_value = "~/.config/segcrypt/config.toml"
    )]
    config: PathBuf,

    /// Key registry path (overrides config)
    #[arg(long, env = "SEGCRYPT_REGISTRY")]
    registry: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long, env = "SEGCRYPT_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides config
    #[arg(long, env = "SEGCRYPT_LOG_FORMAT")]
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
    /// Register a new file and print its file_id
    Init,

    /// Encrypt one segment of a registered file
    ///
    /// Writes `<segment_id>.enc` (ciphertext) and `<segment_id>.json`
    /// (descriptor) into the output directory.
    Encrypt {
        /// File id printed by `segcrypt init`
        #[arg(long)]
        file_id: String,
        /// Zero-based segment index
        #[arg(long, default_value_t = 0)]
        index: u64,
        /// Plaintext segment to encrypt
        input: PathBuf,
        /// Output directory (default: current directory)
        #[arg(long, short = 'o', default_value = ".")]
        out_dir: PathBuf,
        /// AES-256-GCM or ChaCha20-Poly1305 (default: from config)
        #[arg(long, short = 'a')]
        algorithm: Option<String>,
    },

    /// Decrypt one segment using its descriptor and the file password
    Decrypt {
        /// Ciphertext file
        ciphertext: PathBuf,
        /// Descriptor JSON file
        descriptor: PathBuf,
        /// Write plaintext here (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Show the fields of a segment descriptor
    Inspect {
        /// Descriptor JSON file
        descriptor: PathBuf,
    },

    /// Show the registry records for a file
    List {
        file_id: String,
    },

    /// Delete a file's registry records
    ///
    /// Segments of the file can no longer be decrypted by password.
    Forget {
        file_id: String,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let mut config = load_config(&config_path)?;
    if let Some(registry) = &cli.registry {
        config.registry.path = registry.clone();
    }
    config.registry.path = expand_tilde(&config.registry.path);

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(f) => f,
        None => parse_log_format(&config.log.format)?,
    };
    init_logging(&level, &format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        registry = %config.registry.path.display(),
        "segcrypt starting"
    );

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Encrypt {
            file_id,
            index,
            input,
            out_dir,
            algorithm,
        } => cmd_encrypt(&config, &file_id, index, &input, &out_dir, algorithm.as_deref()),
        Commands::Decrypt {
            ciphertext,
            descriptor,
            output,
        } => cmd_decrypt(&config, &ciphertext, &descriptor, output.as_deref()),
        Commands::Inspect { descriptor } => cmd_inspect(&descriptor),
        Commands::List { file_id } => cmd_list(&config, &file_id),
        Commands::Forget { file_id, yes } => cmd_forget(&config, &file_id, yes),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

// ── Logging / config ──────────────────────────────────────────────────────────

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout may carry plaintext, so logs go to stderr
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

fn parse_log_format(s: &str) -> Result<LogFormat> {
    LogFormat::from_str(s, true)
        .map_err(|e| anyhow::anyhow!("invalid log.format {s:?}: {e}"))
}

fn load_config(path: &Path) -> Result<SegcryptConfig> {
    SegcryptConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

fn open_codec(config: &SegcryptConfig) -> Result<SegmentCodec<RegistryBackend>> {
    SegmentCodec::open(config)
        .with_context(|| format!("opening key registry: {}", config.registry.path.display()))
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

// ── Password input ────────────────────────────────────────────────────────────

/// SEGCRYPT_PASSWORD if set, otherwise a terminal prompt.
fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("SEGCRYPT_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

/// Like [`read_password`], but asks twice when prompting. The password is
/// rejected if empty, whichever way it was supplied.
fn read_new_password() -> Result<SecretString> {
    let password = if std::env::var("SEGCRYPT_PASSWORD").is_ok() {
        read_password("")?
    } else {
        let first = read_password("New file password: ")?;
        let second = read_password("Repeat password: ")?;
        if first.expose_secret() != second.expose_secret() {
            anyhow::bail!("passwords do not match");
        }
        first
    };
    check_new_password(&password)?;
    Ok(password)
}

fn check_new_password(password: &SecretString) -> Result<()> {
    if password.expose_secret().is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(())
}

// ── `segcrypt init` ───────────────────────────────────────────────────────────

fn cmd_init(config: &SegcryptConfig) -> Result<()> {
    let password = read_new_password()?;
    let codec = open_codec(config)?;

    let (file_id, _master_key) = codec.setup(&password).context("registering file")?;
    let record = codec
        .file_record(&file_id)?
        .context("file record missing right after setup")?;
    codec.close().context("flushing key registry")?;

    println!("{file_id}");
    eprintln!(
        "registered with {} in {}",
        record.kdf_kind(),
        config.registry.path.display()
    );
    Ok(())
}

// ── `segcrypt encrypt` ────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &SegcryptConfig,
    file_id: &str,
    index: u64,
    input: &Path,
    out_dir: &Path,
    algorithm: Option<&str>,
) -> Result<()> {
    let data =
        std::fs::read(input).with_context(|| format!("reading segment: {}", input.display()))?;
    let codec = open_codec(config)?;

    let password = read_password("File password: ")?;
    let master_key = codec
        .unlock(file_id, &password)
        .map_err(friendly)
        .with_context(|| format!("unlocking file {file_id}"))?;

    let sealed = match algorithm {
        Some(name) => codec.encrypt_segment_as(file_id, &master_key, &data, index, name),
        None => codec.encrypt_segment(file_id, &master_key, &data, index),
    }
    .map_err(friendly)
    .with_context(|| format!("encrypting segment {index} of {file_id}"))?;
    codec.close().context("flushing key registry")?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output dir: {}", out_dir.display()))?;
    let segment_id = &sealed.descriptor.segment_id;
    let enc_path = out_dir.join(format!("{segment_id}.enc"));
    let json_path = out_dir.join(format!("{segment_id}.json"));

    std::fs::write(&enc_path, &sealed.ciphertext)
        .with_context(|| format!("writing ciphertext: {}", enc_path.display()))?;
    std::fs::write(&json_path, &sealed.serialized)
        .with_context(|| format!("writing descriptor: {}", json_path.display()))?;

    println!(
        "{} → {} ({} bytes, {})",
        input.display(),
        enc_path.display(),
        sealed.descriptor.ciphertext_size,
        sealed.descriptor.algorithm,
    );
    Ok(())
}

// ── `segcrypt decrypt` ────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &SegcryptConfig,
    ciphertext_path: &Path,
    descriptor_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let ciphertext = std::fs::read(ciphertext_path)
        .with_context(|| format!("reading ciphertext: {}", ciphertext_path.display()))?;
    let descriptor = std::fs::read_to_string(descriptor_path)
        .with_context(|| format!("reading descriptor: {}", descriptor_path.display()))?;

    let codec = open_codec(config)?;
    let credential = Credential::Password(read_password("File password: ")?);
    let plaintext = codec
        .decrypt_segment(&ciphertext, descriptor.as_str(), &credential)
        .map_err(friendly)
        .with_context(|| format!("decrypting {}", ciphertext_path.display()))?;

    match output {
        Some(path) => {
            std::fs::write(path, &plaintext)
                .with_context(|| format!("writing plaintext: {}", path.display()))?;
            eprintln!("{} bytes → {}", plaintext.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&plaintext).context("writing plaintext to stdout")?;
            stdout.flush()?;
        }
    }
    Ok(())
}

// ── `segcrypt inspect` ────────────────────────────────────────────────────────

fn cmd_inspect(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading descriptor: {}", path.display()))?;

    match SegmentDescriptor::deserialize(&text) {
        Ok(d) => {
            println!("segment_id:      {}", d.segment_id);
            println!("file_id:         {}", d.file_id);
            println!("segment_index:   {}", d.segment_index);
            println!("algorithm:       {}", d.algorithm);
            println!("ciphertext_size: {}", d.ciphertext_size);
            println!("encryption_time: {}", d.encryption_time.to_rfc3339());
        }
        Err(SegcryptError::Parse(full_err)) => {
            // partial descriptors still carry enough to decrypt
            let d = MinimalSegmentDescriptor::deserialize(&text)
                .with_context(|| format!("not a segment descriptor ({full_err})"))?;
            println!("segment_id:      {}", d.segment_id);
            println!("file_id:         {}", d.file_id);
            println!("algorithm:       {}", d.algorithm);
            println!("(minimal descriptor: {full_err})");
        }
        Err(e) => return Err(e).context("parsing descriptor"),
    }
    Ok(())
}

// ── `segcrypt list` ───────────────────────────────────────────────────────────

fn cmd_list(config: &SegcryptConfig, file_id: &str) -> Result<()> {
    let codec = open_codec(config)?;
    let record = codec
        .file_record(file_id)?
        .ok_or_else(|| SegcryptError::UnknownFile(file_id.to_string()))?;

    println!("file_id:  {}", record.file_id);
    println!("kdf:      {}", record.kdf_kind());
    println!("created:  {}", record.creation_date.to_rfc3339());

    let segments = codec.segments(file_id)?;
    println!("segments: {}", segments.len());
    for s in &segments {
        println!(
            "  {:>6}  {:<18}  {}",
            s.segment_index, s.encryption_algorithm, s.segment_id
        );
    }
    Ok(())
}

// ── `segcrypt forget` ─────────────────────────────────────────────────────────

fn cmd_forget(config: &SegcryptConfig, file_id: &str, yes: bool) -> Result<()> {
    if !yes {
        eprint!("Delete all key records for {file_id}? [y/N] ");
        std::io::stderr().flush()?;
        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .context("reading confirmation")?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            eprintln!("aborted");
            return Ok(());
        }
    }

    let codec = open_codec(config)?;
    let removed = codec.forget_file(file_id)?;
    let remaining = codec.registry().file_count()?;
    codec.close().context("flushing key registry")?;

    println!("forgot {file_id}: {removed} segment records removed ({remaining} files remain)");
    Ok(())
}

// ── `segcrypt config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SegcryptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

/// Add a hint to the errors a user can act on.
fn friendly(e: SegcryptError) -> anyhow::Error {
    match e {
        SegcryptError::InvalidPassword => {
            anyhow::Error::new(e).context("check SEGCRYPT_PASSWORD or re-enter the password")
        }
        SegcryptError::AuthenticationFailure => anyhow::Error::new(e)
            .context("ciphertext, descriptor and password must all belong to the same segment"),
        SegcryptError::UnknownFile(_) => {
            anyhow::Error::new(e).context("run `segcrypt init` first, or check --registry")
        }
        other => other.into(),
    }
}
