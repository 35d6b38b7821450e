//! sqrl: SQRL identity container CLI
//!
//! Commands:
//!   create [<file>] [--text]           - seal a new identity, print its rescue code
//!   dump [<file>]                      - list every block (no secrets)
//!   text [<file>]                      - print the SQRLDATA text form
//!   binary <file> <out>                - write the sqrldata binary form
//!   verify [<file>] [--rescue]         - open with password or rescue code, print the ILK
//!   passwd [<file>]                    - change the access password
//!   rekey [<file>]                     - replace the identity key (needs the rescue code)
//!   secret add|get [<file>] --path --realm --username
//!   config show                        - display the active configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use sqrl_core::config::SqrlConfig;
use sqrl_core::{BlockType, SqrlError};
use sqrl_s4::{ContainerFormat, IdentitySettings, RescueCode, SqrlData};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sqrl",
    version,
    about = "SQRL identity container tool",
    long_about = "sqrl: create, inspect and maintain portable SQRL identities (S4 format)"
)]
struct Cli {
    /// Path to sqrl.toml configuration file
    #[arg(long, short = 'c', env = "SQRL_CONFIG", default_value = "~/.config/sqrl/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long, env = "SQRL_LOG")]
    log: Option<String>,

    /// Log format (json, text). Overrides the config file.
    #[arg(long, env = "SQRL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new identity protected by a password and a rescue code
    Create {
        /// Identity file (default: identity.path from the config)
        file: Option<PathBuf>,
        /// Write the SQRLDATA text form instead of binary
        #[arg(long)]
        text: bool,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List the blocks of a container without opening them
    Dump { file: Option<PathBuf> },

    /// Print the container in its SQRLDATA text form
    Text { file: Option<PathBuf> },

    /// Write the container in its sqrldata binary form
    Binary { file: PathBuf, out: PathBuf },

    /// Check a password (or rescue code) and print the identity lock key
    Verify {
        file: Option<PathBuf>,
        /// Open the rescue block instead of the access block
        #[arg(long)]
        rescue: bool,
    },

    /// Change the access password
    Passwd { file: Option<PathBuf> },

    /// Replace the identity unlock key, keeping the old one in a Previous block
    Rekey { file: Option<PathBuf> },

    /// Per-site secrets stored in the container
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct SecretName {
    /// Identity file (default: identity.path from the config)
    file: Option<PathBuf>,
    #[arg(long, default_value = "")]
    path: String,
    #[arg(long, default_value = "")]
    realm: String,
    #[arg(long, default_value = "")]
    username: String,
}

#[derive(Subcommand, Debug)]
enum SecretAction {
    /// Store a secret (prompted, not echoed)
    Add(SecretName),
    /// Print a stored secret
    Get(SecretName),
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
    let config = load_config(&config_path)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(f) => f,
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("log.format: {e}"))?,
    };
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "sqrl starting"
    );

    let settings = IdentitySettings::from_config(&config);
    match cli.command {
        Commands::Create { file, text, force } => {
            let path = identity_path(&config, file.as_deref());
            let format = if text {
                ContainerFormat::Text
            } else {
                config.identity.format.parse()?
            };
            cmd_create(settings, &path, format, force)
        }
        Commands::Dump { file } => cmd_dump(&identity_path(&config, file.as_deref())),
        Commands::Text { file } => cmd_text(&identity_path(&config, file.as_deref())),
        Commands::Binary { file, out } => cmd_binary(&file, &out),
        Commands::Verify { file, rescue } => cmd_verify(&identity_path(&config, file.as_deref()), rescue),
        Commands::Passwd { file } => cmd_passwd(settings, &identity_path(&config, file.as_deref())),
        Commands::Rekey { file } => cmd_rekey(settings, &identity_path(&config, file.as_deref())),
        Commands::Secret { action: SecretAction::Add(name) } => {
            let path = identity_path(&config, name.file.as_deref());
            cmd_secret_add(settings, &path, &name)
        }
        Commands::Secret { action: SecretAction::Get(name) } => {
            cmd_secret_get(&identity_path(&config, name.file.as_deref()), &name)
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn load_config(path: &Path) -> Result<SqrlConfig> {
    SqrlConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output
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

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(rest) = s.strip_prefix("~/") {
            return home_dir().join(rest);
        }
    }
    path.to_path_buf()
}

fn identity_path(config: &SqrlConfig, file: Option<&Path>) -> PathBuf {
    expand_tilde(file.unwrap_or(&config.identity.path))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

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

/// EnScrypt observer that reports rounds on `pb`.
fn spinner_progress(pb: &ProgressBar) -> impl FnMut(u32, Duration) -> ControlFlow<()> + '_ {
    move |iterations, elapsed| {
        pb.set_message(format!("{iterations} rounds, {:.1}s", elapsed.as_secs_f64()));
        ControlFlow::Continue(())
    }
}

fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt).context("reading from terminal")?;
    Ok(SecretString::from(value))
}

/// Prompt twice and insist on a non-empty match.
fn prompt_new_password(prompt: &str) -> Result<SecretString> {
    let first = prompt_secret(prompt)?;
    if first.expose_secret().is_empty() {
        bail!("password must not be empty");
    }
    let second = prompt_secret("Repeat password: ")?;
    if first.expose_secret() != second.expose_secret() {
        bail!("passwords do not match");
    }
    Ok(first)
}

fn prompt_rescue_code() -> Result<RescueCode> {
    let entered = prompt_secret("Rescue code: ")?;
    RescueCode::parse(entered.expose_secret()).context("rescue code")
}

/// Read a container for inspection only; nothing is resealed.
fn load_identity(path: &Path) -> Result<(SqrlData, ContainerFormat)> {
    load_identity_with(path, IdentitySettings::default())
}

/// Read a container that will be resealed under `settings`, and remember
/// which encoding it was stored in.
fn load_identity_with(path: &Path, settings: IdentitySettings) -> Result<(SqrlData, ContainerFormat)> {
    let bytes = std::fs::read(path).with_context(|| format!("reading identity: {}", path.display()))?;
    let format = detect_format(&bytes);
    let data = SqrlData::load_with_settings(&bytes, settings)
        .with_context(|| format!("parsing identity: {}", path.display()))?;
    Ok((data, format))
}

fn detect_format(bytes: &[u8]) -> ContainerFormat {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    if bytes[start..].starts_with(sqrl_s4::TEXT_MAGIC) {
        ContainerFormat::Text
    } else {
        ContainerFormat::Binary
    }
}

/// Turn a tag mismatch on the block the user just unlocked into something
/// a person can act on. Failures on any other block are reported as is.
fn explain(err: SqrlError, unlocked: BlockType, what: &str) -> anyhow::Error {
    match err {
        SqrlError::AuthenticationFailed { blocktype } if blocktype == unlocked => {
            anyhow::anyhow!("incorrect {what}")
        }
        other => anyhow::Error::new(other),
    }
}

fn save_identity(data: &SqrlData, path: &Path, format: ContainerFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    data.write_to(path, format)
        .with_context(|| format!("writing identity: {}", path.display()))
}

/// Open the Access block behind a spinner.
fn unlock(data: &SqrlData, password: &SecretString) -> Result<sqrl_crypto::IdentityMasterKey> {
    let pb = make_spinner("unlocking");
    let keys = data
        .open_access_with_progress(password, spinner_progress(&pb))
        .map_err(|e| explain(e, BlockType::ACCESS, "password"));
    pb.finish_and_clear();
    Ok(keys?.0)
}

// ── `sqrl create` ─────────────────────────────────────────────────────────────

fn cmd_create(settings: IdentitySettings, path: &Path, format: ContainerFormat, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let password = prompt_new_password("New password: ")?;

    let mut rng = OsRng;
    let iuk = sqrl_crypto::IdentityUnlockKey::generate(&mut rng);
    let code = RescueCode::generate(&mut rng);

    let pb = make_spinner("sealing");
    let data = SqrlData::create_with_progress(&password, &code, &iuk, settings, &mut rng, spinner_progress(&pb))?;
    pb.finish_and_clear();

    save_identity(&data, path, format)?;

    println!("Identity written to {}", path.display());
    println!("Identity lock key: {}", iuk.lock_key());
    println!();
    println!("Rescue code (write it down; it is shown only once):");
    println!();
    println!("    {}", code.grouped());
    Ok(())
}

// ── `sqrl dump` / `text` / `binary` ───────────────────────────────────────────

fn cmd_dump(path: &Path) -> Result<()> {
    let (data, format) = load_identity(path)?;
    println!("# {} ({format:?})", path.display());
    for summary in data.describe() {
        println!("{summary}");
    }
    Ok(())
}

fn cmd_text(path: &Path) -> Result<()> {
    let (data, _) = load_identity(path)?;
    println!("{}", data.to_text()?);
    Ok(())
}

fn cmd_binary(path: &Path, out: &Path) -> Result<()> {
    let (data, _) = load_identity(path)?;
    save_identity(&data, out, ContainerFormat::Binary)?;
    println!("Wrote {}", out.display());
    Ok(())
}

// ── `sqrl verify` ─────────────────────────────────────────────────────────────

fn cmd_verify(path: &Path, rescue: bool) -> Result<()> {
    let (data, _) = load_identity(path)?;
    let ilk = if rescue {
        let code = prompt_rescue_code()?;
        let pb = make_spinner("verifying");
        let iuk = data
            .open_rescue_with_progress(&code, spinner_progress(&pb))
            .map_err(|e| explain(e, BlockType::RESCUE, "rescue code"));
        pb.finish_and_clear();
        iuk?.lock_key()
    } else {
        let password = prompt_secret("Password: ")?;
        let pb = make_spinner("verifying");
        let keys = data
            .open_access_with_progress(&password, spinner_progress(&pb))
            .map_err(|e| explain(e, BlockType::ACCESS, "password"));
        pb.finish_and_clear();
        keys?.1
    };
    println!("OK");
    println!("Identity lock key: {ilk}");
    Ok(())
}

// ── `sqrl passwd` / `rekey` ───────────────────────────────────────────────────

fn cmd_passwd(settings: IdentitySettings, path: &Path) -> Result<()> {
    let (mut data, format) = load_identity_with(path, settings)?;
    let old = prompt_secret("Current password: ")?;
    let new = prompt_new_password("New password: ")?;

    let pb = make_spinner("resealing");
    let result = data
        .change_password_with_progress(&old, &new, &mut OsRng, spinner_progress(&pb))
        .map_err(|e| explain(e, BlockType::ACCESS, "password"));
    pb.finish_and_clear();
    result?;

    save_identity(&data, path, format)?;
    println!("Password changed");
    Ok(())
}

fn cmd_rekey(settings: IdentitySettings, path: &Path) -> Result<()> {
    let (mut data, format) = load_identity_with(path, settings)?;
    let code = prompt_rescue_code()?;
    let password = prompt_new_password("New password: ")?;

    let pb = make_spinner("rekeying");
    let result = data
        .rekey(&code, &password, &mut OsRng, spinner_progress(&pb))
        .map_err(|e| explain(e, BlockType::RESCUE, "rescue code"));
    pb.finish_and_clear();
    let new_code = result?;

    save_identity(&data, path, format)?;
    println!("Identity rekeyed; the previous key is kept for identity recovery.");
    println!();
    println!("New rescue code (the old one no longer works):");
    println!();
    println!("    {}", new_code.grouped());
    Ok(())
}

// ── `sqrl secret` ─────────────────────────────────────────────────────────────

fn cmd_secret_add(settings: IdentitySettings, path: &Path, name: &SecretName) -> Result<()> {
    let (mut data, format) = load_identity_with(path, settings)?;
    let password = prompt_secret("Password: ")?;
    let imk = unlock(&data, &password)?;
    let secret = prompt_secret("Secret: ")?;

    data.add_secret(
        &imk,
        &name.path,
        &name.realm,
        &name.username,
        secret.expose_secret().as_bytes(),
        &mut OsRng,
    )?;
    save_identity(&data, path, format)?;
    println!("Stored secret for {}@{}{}", name.username, name.realm, name.path);
    Ok(())
}

fn cmd_secret_get(path: &Path, name: &SecretName) -> Result<()> {
    let (data, _) = load_identity(path)?;
    if data.find_secret(&name.path, &name.realm, &name.username).is_none() {
        bail!("no secret stored for {}@{}{}", name.username, name.realm, name.path);
    }
    let password = prompt_secret("Password: ")?;
    let imk = unlock(&data, &password)?;
    let secret = data.open_secret(&imk, &name.path, &name.realm, &name.username)?;
    println!("{}", String::from_utf8_lossy(&secret));
    Ok(())
}

// ── `sqrl config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &SqrlConfig, config_path: &Path) -> Result<()> {
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
