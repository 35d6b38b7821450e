use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SqrlError, SqrlResult};

/// Top-level configuration (loaded from sqrl.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SqrlConfig {
    pub identity: IdentityConfig,
    pub access: AccessConfig,
    pub rescue: RescueConfig,
    pub nonce: NonceConfig,
    pub log: LogConfig,
}

impl SqrlConfig {
    /// Read a TOML config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> SqrlResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SqrlError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Where the identity container lives and how it is written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity file (default: ~/.config/sqrl/identity.sqrl)
    pub path: PathBuf,
    /// Storage encoding: "binary" ("sqrldata") or "text" ("SQRLDATA")
    pub format: String,
}

/// Password-protected access block parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// scrypt cost exponent, N = 2^log_n (default: 9)
    pub log_n: u8,
    /// Minimum EnScrypt iterations (default: 20)
    pub min_iterations: u32,
    /// Target password verification time in seconds (default: 1)
    pub verify_seconds: u8,
    /// Client option flags stored in the block (default: 0x1F)
    pub option_flags: u16,
    /// Characters of the password used as a quick-entry hint (default: 6)
    pub hint_length: u8,
    /// Minutes of idleness before the hint is discarded (default: 1)
    pub idle_timeout_mins: u16,
}

/// Rescue-code block parameters. Deliberately expensive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RescueConfig {
    pub log_n: u8,
    /// Minimum EnScrypt iterations (default: 100)
    pub min_iterations: u32,
    /// Minimum stretching time in seconds (default: 60)
    pub min_seconds: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Derive rewritten nonces from the previous one instead of drawing
    /// fresh random bytes. Only for compatibility with older clients.
    pub chained: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.config/sqrl/identity.sqrl"),
            format: "binary".into(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            log_n: 9,
            min_iterations: 20,
            verify_seconds: 1,
            option_flags: 0x1F,
            hint_length: 6,
            idle_timeout_mins: 1,
        }
    }
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            log_n: 9,
            min_iterations: 100,
            min_seconds: 60,
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
