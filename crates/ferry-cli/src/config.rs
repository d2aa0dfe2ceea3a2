//! CLI configuration file handling.

use anyhow::Context;
use ferry_core::DeliveryConfig;
use ferry_core::config::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
use ferry_crypto::exchange::parse_public_key;
use ferry_files::ChecksumKey;
use ferry_files::compress::DEFAULT_COMPRESSION_LEVEL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// FERRY CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delivery behaviour
    pub delivery: DeliverySettings,
    /// Key material locations
    pub keys: KeysConfig,
    /// Bucket and staging locations
    pub storage: StorageConfig,
    /// Logging
    pub logging: LoggingConfig,
}

/// `[delivery]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Files processed at once
    pub concurrency: usize,
    /// Stop after the first failed file
    pub break_on_fail: bool,
    /// Replace existing objects and local files
    pub overwrite: bool,
    /// Verify restored files against the manifest
    pub verify: bool,
    /// Encrypt uploads
    pub sensitive: bool,
    /// zstd level
    pub compression_level: i32,
    /// Read chunk size in bytes
    pub chunk_size: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            break_on_fail: false,
            overwrite: false,
            verify: true,
            sensitive: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            chunk_size: ferry_files::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// `[keys]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Recipient X25519 public key (hex)
    pub recipient_public: Option<String>,
    /// Sealed recipient private key file
    pub recipient_private: Option<PathBuf>,
    /// Checksum key (hex). Derived from `project` when unset.
    pub checksum_key: Option<String>,
    /// Project context the checksum key is derived from
    pub project: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            recipient_public: None,
            recipient_private: None,
            checksum_key: None,
            project: "ferry-default".to_string(),
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory acting as the delivery bucket
    pub bucket: PathBuf,
    /// Root under which each run creates its staging area
    pub staging_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("ferry")
                .join("bucket"),
            staging_root: std::env::temp_dir(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when neither `--verbose` nor `--debug` is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Default configuration path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("ferry")
            .join("config.toml")
    }

    /// Check every value is usable.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.to_delivery_config().validate()?;

        if let Some(public) = &self.keys.recipient_public {
            parse_public_key(public)
                .map_err(|_| anyhow::anyhow!("keys.recipient_public is not a 32-byte hex key"))?;
        }
        if let Some(key) = &self.keys.checksum_key {
            ChecksumKey::from_hex(key)
                .map_err(|e| anyhow::anyhow!("keys.checksum_key: {e}"))?;
        } else if self.keys.project.trim().is_empty() {
            anyhow::bail!("keys.project must not be empty when keys.checksum_key is unset");
        }
        if self.storage.bucket.as_os_str().is_empty() {
            anyhow::bail!("storage.bucket must not be empty");
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "logging.level must be one of {}, got {}",
                LOG_LEVELS.join(", "),
                self.logging.level
            );
        }
        Ok(())
    }

    /// Core delivery settings described by this file.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            concurrency: self.delivery.concurrency,
            break_on_fail: self.delivery.break_on_fail,
            overwrite: self.delivery.overwrite,
            verify: self.delivery.verify,
            sensitive: self.delivery.sensitive,
            compression_level: self.delivery.compression_level,
            chunk_size: self.delivery.chunk_size,
            staging_root: self.storage.staging_root.clone(),
            ..DeliveryConfig::default()
        }
    }

    /// Recipient public key, if configured.
    pub fn recipient_public(&self) -> anyhow::Result<Option<[u8; 32]>> {
        self.keys
            .recipient_public
            .as_deref()
            .map(|hex_key| {
                parse_public_key(hex_key)
                    .map_err(|_| anyhow::anyhow!("keys.recipient_public is not a 32-byte hex key"))
            })
            .transpose()
    }

    /// Checksum key from `keys.checksum_key` or derived from `keys.project`.
    pub fn checksum_key(&self) -> anyhow::Result<ChecksumKey> {
        match &self.keys.checksum_key {
            Some(hex_key) => {
                ChecksumKey::from_hex(hex_key).map_err(|e| anyhow::anyhow!("keys.checksum_key: {e}"))
            }
            None => Ok(ChecksumKey::derive(&self.keys.project)),
        }
    }

    /// Look up a single value by `section.key` or bare key.
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let value = match key.to_lowercase().as_str() {
            "delivery.concurrency" | "concurrency" => self.delivery.concurrency.to_string(),
            "delivery.break_on_fail" | "break_on_fail" => self.delivery.break_on_fail.to_string(),
            "delivery.overwrite" | "overwrite" => self.delivery.overwrite.to_string(),
            "delivery.verify" | "verify" => self.delivery.verify.to_string(),
            "delivery.sensitive" | "sensitive" => self.delivery.sensitive.to_string(),
            "delivery.compression_level" | "compression_level" => {
                self.delivery.compression_level.to_string()
            }
            "delivery.chunk_size" | "chunk_size" => self.delivery.chunk_size.to_string(),
            "keys.recipient_public" | "recipient_public" => {
                or_unset(self.keys.recipient_public.clone())
            }
            "keys.recipient_private" | "recipient_private" => or_unset(
                self.keys
                    .recipient_private
                    .as_ref()
                    .map(|p| p.display().to_string()),
            ),
            "keys.checksum_key" | "checksum_key" => {
                // Never echo the key itself.
                if self.keys.checksum_key.is_some() {
                    "(set)".to_string()
                } else {
                    "(not set)".to_string()
                }
            }
            "keys.project" | "project" => self.keys.project.clone(),
            "storage.bucket" | "bucket" => self.storage.bucket.display().to_string(),
            "storage.staging_root" | "staging_root" => {
                self.storage.staging_root.display().to_string()
            }
            "logging.level" | "level" => self.logging.level.clone(),
            _ => anyhow::bail!("Unknown configuration key: {}", key),
        };
        Ok(value)
    }

    /// Set a single value by `section.key` or bare key.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key.to_lowercase().as_str() {
            "delivery.concurrency" | "concurrency" => {
                self.delivery.concurrency = value.parse().map_err(|_| {
                    anyhow::anyhow!(
                        "Invalid number for concurrency (1-{MAX_CONCURRENCY}): {}",
                        value
                    )
                })?;
            }
            "delivery.break_on_fail" | "break_on_fail" => {
                self.delivery.break_on_fail = parse_bool(key, value)?;
            }
            "delivery.overwrite" | "overwrite" => {
                self.delivery.overwrite = parse_bool(key, value)?;
            }
            "delivery.verify" | "verify" => {
                self.delivery.verify = parse_bool(key, value)?;
            }
            "delivery.sensitive" | "sensitive" => {
                self.delivery.sensitive = parse_bool(key, value)?;
            }
            "delivery.compression_level" | "compression_level" => {
                self.delivery.compression_level = value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid number for compression_level: {}", value))?;
            }
            "delivery.chunk_size" | "chunk_size" => {
                self.delivery.chunk_size = value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid number for chunk_size: {}", value))?;
            }
            "keys.recipient_public" | "recipient_public" => {
                self.keys.recipient_public = Some(value.trim().to_string());
            }
            "keys.recipient_private" | "recipient_private" => {
                self.keys.recipient_private = Some(PathBuf::from(value));
            }
            "keys.checksum_key" | "checksum_key" => {
                self.keys.checksum_key = Some(value.trim().to_string());
            }
            "keys.project" | "project" => {
                self.keys.project = value.to_string();
            }
            "storage.bucket" | "bucket" => {
                self.storage.bucket = PathBuf::from(value);
            }
            "storage.staging_root" | "staging_root" => {
                self.storage.staging_root = PathBuf::from(value);
            }
            "logging.level" | "level" => {
                self.logging.level = value.to_lowercase();
            }
            _ => anyhow::bail!("Unknown configuration key: {}", key),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid boolean value for {}: {}", key, value))
}

fn or_unset(value: Option<String>) -> String {
    value.unwrap_or_else(|| "(not set)".to_string())
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(stripped)
    } else {
        PathBuf::from(path)
    }
}
