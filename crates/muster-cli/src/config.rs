//! Configuration file management for muster.
//!
//! Provides a TOML-based config file at `~/.config/muster/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.
//! There is no database section here (muster's state is file-based);
//! the sections that exist are the runtime tunables (spec §6's
//! configuration table) and the default harness's command template.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use muster_core::RuntimeConfig;

/// Environment variable that overrides the resolved config file path.
pub const CONFIG_PATH_ENV: &str = "MUSTER_CONFIG";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub runtime: RuntimeConfig,
    pub harness: HarnessSection,
}

/// The default provider's subprocess command template (spec §6's
/// subagent worker contract), written by `muster init` and read by
/// `muster-cli::registry` to build the `ProcessHarness`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessSection {
    pub provider: String,
    pub program: String,
    pub base_args: Vec<String>,
    pub prompt_flag: String,
}

impl Default for HarnessSection {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            program: "claude".to_string(),
            base_args: vec!["--print".to_string(), "--output-format".to_string(), "stream-json".to_string()],
            prompt_flag: "--append-system-prompt".to_string(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the muster config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/muster` or `~/.config/muster`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("muster");
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config").join("muster")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config_from(path: &std::path::Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).context("failed to parse config file")
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix (state directories are left
/// world-readable by default, but a config file is the one place a user
/// might stash a harness API key via env passthrough, so lock it down).
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents).with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms).with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolution chain
// -----------------------------------------------------------------------

/// Resolve the config file to load: `--config` flag > `$MUSTER_CONFIG` >
/// the default XDG path. Returns `ConfigFile::default()` (not an error)
/// when no path resolves to an existing file, since muster works
/// out-of-the-box without `muster init`.
pub fn resolve(cli_config_path: Option<&str>) -> Result<ConfigFile> {
    let path = if let Some(p) = cli_config_path {
        Some(PathBuf::from(p))
    } else if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        Some(PathBuf::from(p))
    } else {
        let default = config_path();
        default.exists().then_some(default)
    };

    match path {
        Some(p) => load_config_from(&p),
        None => Ok(ConfigFile::default()),
    }
}
