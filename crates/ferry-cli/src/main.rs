//! FERRY command-line interface.

use clap::{Parser, Subcommand};
use ferry_core::{
    CancelFlag, Delivery, DeliveryConfig, DeliveryReport, LocalDirTransport, UploadKeys,
};
use ferry_crypto::{RecipientKey, StaticPassphrase};
use ferry_crypto::keystore::{MIN_PASSPHRASE_LEN, SealParams};
use ferry_files::WorkList;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroizing;

mod config;
mod progress;

use config::{Config, expand_tilde};
use progress::{TransferProgress, format_bytes};

/// Environment variable consulted before prompting for a passphrase
const PASSPHRASE_ENV: &str = "FERRY_PASSPHRASE";

/// FERRY - secure bulk-file delivery
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/ferry/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Protect and upload files or directories
    Put {
        /// Files or directories to upload
        paths: Vec<PathBuf>,

        /// File listing one path per line
        #[arg(long)]
        path_file: Option<PathBuf>,

        /// Compress only, do not encrypt
        #[arg(long)]
        no_encrypt: bool,

        /// Files processed at once (1-32)
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,

        /// Stop after the first failed file
        #[arg(long)]
        break_on_fail: bool,

        /// Replace objects that already exist in the bucket
        #[arg(long)]
        overwrite: bool,

        /// Bucket directory (overrides storage.bucket)
        #[arg(long)]
        bucket: Option<PathBuf>,

        /// Recipient public key hex (overrides keys.recipient_public)
        #[arg(long)]
        recipient: Option<String>,
    },

    /// Download and restore files listed in the bucket manifest
    Get {
        /// Logical names to restore (all when omitted)
        names: Vec<String>,

        /// Destination directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Skip checksum verification of restored files
        #[arg(long)]
        no_verify: bool,

        /// Files processed at once (1-32)
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,

        /// Stop after the first failed file
        #[arg(long)]
        break_on_fail: bool,

        /// Replace existing local files
        #[arg(long)]
        overwrite: bool,

        /// Bucket directory (overrides storage.bucket)
        #[arg(long)]
        bucket: Option<PathBuf>,

        /// Sealed private key file (overrides keys.recipient_private)
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Generate a recipient keypair
    Keygen {
        /// Output file for the sealed private key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show configuration
    Show {
        /// Specific key to show (e.g. delivery.concurrency)
        key: Option<String>,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g. storage.bucket)
        key: String,

        /// Value to set
        value: String,
    },
}

/// Flag overrides shared by `put` and `get`.
#[derive(Debug, Default, Clone, Copy)]
struct Overrides {
    concurrency: Option<usize>,
    break_on_fail: bool,
    overwrite: bool,
}

impl Overrides {
    fn apply(self, config: &mut DeliveryConfig) {
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        config.break_on_fail |= self.break_on_fail;
        config.overwrite |= self.overwrite;
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}.{:01}s", secs, d.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config);
    let config = Config::load_or_default(&config_path)?;

    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Keygen and config editing work even when the file has invalid values
    let success = match cli.command {
        Commands::Keygen { output } => {
            generate_keypair(output.as_deref())?;
            true
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show { key } => config_show(key.as_deref(), &config)?,
                ConfigAction::Set { key, value } => config_set(&key, &value, &config_path)?,
            }
            true
        }
        Commands::Put {
            paths,
            path_file,
            no_encrypt,
            concurrency,
            break_on_fail,
            overwrite,
            bucket,
            recipient,
        } => {
            config.validate()?;
            let overrides = Overrides {
                concurrency,
                break_on_fail,
                overwrite,
            };
            put(
                &config,
                &paths,
                path_file.as_deref(),
                no_encrypt,
                overrides,
                bucket,
                recipient,
            )
            .await?
        }
        Commands::Get {
            names,
            output,
            no_verify,
            concurrency,
            break_on_fail,
            overwrite,
            bucket,
            key,
        } => {
            config.validate()?;
            let overrides = Overrides {
                concurrency,
                break_on_fail,
                overwrite,
            };
            get(&config, &names, &output, no_verify, overrides, bucket, key).await?
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// Cancel `flag` on Ctrl-C. In-flight files stop at the next chunk.
fn cancel_on_interrupt(flag: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding files");
            flag.cancel();
        }
    });
}

fn open_bucket(config: &Config, bucket: Option<PathBuf>) -> anyhow::Result<Arc<LocalDirTransport>> {
    let root = bucket.unwrap_or_else(|| config.storage.bucket.clone());
    Ok(Arc::new(LocalDirTransport::open(root)?))
}

/// Protect and upload files
async fn put(
    config: &Config,
    paths: &[PathBuf],
    path_file: Option<&Path>,
    no_encrypt: bool,
    overrides: Overrides,
    bucket: Option<PathBuf>,
    recipient: Option<String>,
) -> anyhow::Result<bool> {
    if paths.is_empty() && path_file.is_none() {
        anyhow::bail!("Nothing to upload: give paths or --path-file");
    }

    let mut delivery_config = config.to_delivery_config();
    overrides.apply(&mut delivery_config);
    if no_encrypt {
        delivery_config.sensitive = false;
    }

    let work = WorkList::assemble(paths, path_file)?;
    if work.is_empty() && work.missing.is_empty() {
        anyhow::bail!("Nothing to upload: selected directories are empty");
    }

    let keys = if delivery_config.sensitive {
        let recipient_public = match recipient {
            Some(hex_key) => ferry_crypto::exchange::parse_public_key(&hex_key)
                .map_err(|_| anyhow::anyhow!("--recipient is not a 32-byte hex key"))?,
            None => config.recipient_public()?.ok_or_else(|| {
                anyhow::anyhow!(
                    "Encrypted upload needs a recipient public key (keys.recipient_public or --recipient)"
                )
            })?,
        };
        let passphrase = resolve_passphrase("Passphrase for per-file session keys: ", false)?;
        Some(UploadKeys {
            recipient_public,
            passphrase: Arc::new(StaticPassphrase::new(passphrase.as_str())),
        })
    } else {
        None
    };

    let transport = open_bucket(config, bucket)?;
    let cancel = CancelFlag::new();
    cancel_on_interrupt(cancel.clone());

    let delivery = Delivery::new(delivery_config, transport, config.checksum_key()?)?
        .with_progress(Arc::new(TransferProgress::new("Uploading")))
        .with_cancel(cancel);

    println!(
        "Uploading {} files ({}){}",
        work.units.len(),
        format_bytes(work.total_size()),
        if keys.is_some() { ", encrypted" } else { "" }
    );
    let report = delivery.upload(work, keys).await?;
    print_report("Uploaded", &report);
    Ok(report.is_success())
}

/// Download and restore files
async fn get(
    config: &Config,
    names: &[String],
    output: &Path,
    no_verify: bool,
    overrides: Overrides,
    bucket: Option<PathBuf>,
    key: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let mut delivery_config = config.to_delivery_config();
    overrides.apply(&mut delivery_config);
    if no_verify {
        delivery_config.verify = false;
    }

    let recipient = match key.or_else(|| config.keys.recipient_private.clone()) {
        Some(path) => Some(Arc::new(load_recipient_key(&path)?)),
        None => None,
    };

    let transport = open_bucket(config, bucket)?;
    let cancel = CancelFlag::new();
    cancel_on_interrupt(cancel.clone());

    let delivery = Delivery::new(delivery_config, transport, config.checksum_key()?)?
        .with_progress(Arc::new(TransferProgress::new("Downloading")))
        .with_cancel(cancel);

    std::fs::create_dir_all(output)?;
    let report = delivery.download(output, names, recipient).await?;
    print_report("Restored", &report);
    Ok(report.is_success())
}

fn print_report(verb: &str, report: &DeliveryReport) {
    let summary = &report.summary;
    println!();
    println!(
        "{} {} of {} files in {}",
        verb,
        summary.succeeded(),
        summary.reports.len() + summary.not_admitted.len() + report.missing.len(),
        format_duration(summary.elapsed)
    );

    for path in &report.missing {
        println!("  not found: {}", path.display());
    }
    for (name, error) in summary.failures() {
        println!("  failed: {}: {}", name, error);
    }
    if !summary.not_admitted.is_empty() {
        let reason = if summary.cancelled {
            "cancelled"
        } else {
            "stopped after first failure"
        };
        println!(
            "  {} files not started ({})",
            summary.not_admitted.len(),
            reason
        );
    }
    if let Some(path) = &report.failures_file {
        println!("Failure details: {}", path.display());
    }
    info!(
        "Run finished: {} ok, {} failed, peak {} in flight",
        summary.succeeded(),
        summary.failed(),
        summary.peak_in_flight
    );
}

/// Passphrase from `FERRY_PASSPHRASE`, or prompted on the terminal.
fn resolve_passphrase(prompt: &str, confirm: bool) -> anyhow::Result<Zeroizing<String>> {
    if let Ok(from_env) = std::env::var(PASSPHRASE_ENV) {
        let passphrase = Zeroizing::new(from_env);
        ferry_crypto::keystore::check_passphrase(&passphrase)?;
        return Ok(passphrase);
    }
    prompt_passphrase(prompt, confirm)
}

/// Prompt for passphrase with optional confirmation
fn prompt_passphrase(prompt: &str, confirm: bool) -> anyhow::Result<Zeroizing<String>> {
    let passphrase = Zeroizing::new(rpassword::prompt_password(prompt)?);

    if passphrase.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        anyhow::bail!("Passphrase must be at least {MIN_PASSPHRASE_LEN} characters");
    }

    if confirm {
        let again = Zeroizing::new(rpassword::prompt_password("Confirm passphrase: ")?);
        if *passphrase != *again {
            anyhow::bail!("Passphrases do not match");
        }
    }

    Ok(passphrase)
}

fn load_recipient_key(path: &Path) -> anyhow::Result<RecipientKey> {
    let path = expand_tilde(&path.to_string_lossy());
    let blob = std::fs::read(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read private key {}: {e}", path.display()))?;
    let passphrase = resolve_passphrase("Private key passphrase: ", false)?;
    let key = RecipientKey::from_sealed(&blob, &StaticPassphrase::new(passphrase.as_str()))
        .map_err(|e| anyhow::anyhow!("Failed to open private key {}: {e}", path.display()))?;
    Ok(key)
}

/// Generate a recipient keypair, sealing the private key to `output`
fn generate_keypair(output: Option<&Path>) -> anyhow::Result<()> {
    println!("Generating new X25519 recipient keypair...");
    println!();

    let key = RecipientKey::generate()?;
    println!("Public key: {}", hex::encode(key.public_key()));

    if let Some(path) = output {
        let output_path = expand_tilde(&path.to_string_lossy());
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        println!();
        println!("Your private key will be sealed with a passphrase.");
        println!("Choose a strong passphrase (minimum {MIN_PASSPHRASE_LEN} characters).");
        println!();

        let passphrase = resolve_passphrase("Enter passphrase: ", true)?;
        let sealed = key.seal(
            &StaticPassphrase::new(passphrase.as_str()),
            &SealParams::default(),
        )?;
        write_private_key(&output_path, &sealed)?;

        println!();
        println!("Sealed private key saved to: {}", output_path.display());
        println!();
        println!("IMPORTANT:");
        println!("  - Give the public key to whoever uploads files for you");
        println!("  - Keep your passphrase secure, it cannot be recovered if lost");
        println!("  - Back up this file and your passphrase separately");
    } else {
        println!();
        println!("WARNING: Private key not saved (use --output to save)");
        println!("The key will be lost when this program exits.");
    }

    Ok(())
}

fn write_private_key(path: &Path, sealed: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, sealed)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

fn config_show(key: Option<&str>, config: &Config) -> anyhow::Result<()> {
    if let Some(key_name) = key {
        println!("{}", config.get(key_name)?);
        return Ok(());
    }

    println!("FERRY Configuration");
    println!();

    println!("[delivery]");
    for key in [
        "concurrency",
        "break_on_fail",
        "overwrite",
        "verify",
        "sensitive",
        "compression_level",
        "chunk_size",
    ] {
        println!("  {} = {}", key, config.get(key)?);
    }
    println!();

    println!("[keys]");
    for key in ["recipient_public", "recipient_private", "checksum_key", "project"] {
        println!("  {} = {}", key, config.get(key)?);
    }
    println!();

    println!("[storage]");
    println!("  bucket = \"{}\"", config.storage.bucket.display());
    println!("  staging_root = \"{}\"", config.storage.staging_root.display());
    println!();

    println!("[logging]");
    println!("  level = \"{}\"", config.logging.level);

    Ok(())
}

fn config_set(key: &str, value: &str, config_path: &Path) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(config_path)?;
    config.set(key, value)?;
    config.validate()?;
    config.save(config_path)?;

    let shown = if key.ends_with("checksum_key") {
        "(set)"
    } else {
        value
    };
    println!("Configuration updated: {} = {}", key, shown);
    println!("Saved to: {}", config_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(2_300)), "2.3s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = DeliveryConfig::default();
        Overrides {
            concurrency: Some(7),
            break_on_fail: true,
            overwrite: false,
        }
        .apply(&mut config);
        assert_eq!(config.concurrency, 7);
        assert!(config.break_on_fail);
        assert!(!config.overwrite);
    }

    #[test]
    fn test_config_show_all_and_key() {
        let config = Config::default();
        assert!(config_show(None, &config).is_ok());
        assert!(config_show(Some("delivery.concurrency"), &config).is_ok());
        assert!(config_show(Some("invalid_key"), &config).is_err());
    }

    #[test]
    fn test_config_set_saves() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        config_set("concurrency", "16", &path).unwrap();
        config_set("storage.bucket", "/srv/ferry", &path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.delivery.concurrency, 16);
        assert_eq!(loaded.storage.bucket, PathBuf::from("/srv/ferry"));
    }

    #[test]
    fn test_config_set_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        assert!(config_set("concurrency", "64", &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_sealed_key_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recipient.key");

        let key = RecipientKey::generate().unwrap();
        let passphrase = StaticPassphrase::new("correct horse battery");
        let sealed = key.seal(&passphrase, &SealParams::testing()).unwrap();
        write_private_key(&path, &sealed).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let blob = std::fs::read(&path).unwrap();
        let opened = RecipientKey::from_sealed(&blob, &passphrase).unwrap();
        assert_eq!(opened.public_key(), key.public_key());
    }
}
