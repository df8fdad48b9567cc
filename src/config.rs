//! TOML-based configuration system.
//!
//! Every struct implements `Default` so a missing or partial config file
//! behaves exactly like no file at all.
//!
//! ## Config file search order
//!
//! 1. `CHROMERULES_CONFIG` environment variable (explicit override)
//! 2. Next to the executable (`<exe_dir>/chromerules.toml`)
//! 3. Platform config directory (`%APPDATA%\ChromeRules\chromerules.toml` on Windows)
//! 4. Current working directory (`./chromerules.toml`)
//! 5. No file found → `Config::default()`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hotkey::{DEFAULT_HOTKEY, Hotkey};
use crate::i18n::Strings;
use crate::reorder::DEFAULT_ITEM_GAP;

const CONFIG_FILE: &str = "chromerules.toml";

// ─────────────────────────────────────────────────────────────────────────────
// Config structs
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub editor: EditorConfig,
    /// Overrides of the dialog string table, `key = "text"`.
    pub strings: IndexMap<String, String>,
}

/// Where rules, backups and dependency mirrors live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Profile chrome directory. Relative file names below are joined to it.
    pub chrome_dir: PathBuf,
    pub rules_file: String,
    pub backup_file: String,
    pub mirror_dir: String,
}

/// Manager dialog behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub hotkey: String,
    /// Vertical gap between list items, added to the dragged item's height.
    pub item_gap: f32,
    /// Duration of the fade-in after a drop.
    pub fade_in_ms: u64,
    pub open_on_start: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Default impls
// ─────────────────────────────────────────────────────────────────────────────

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chrome_dir: PathBuf::from("chrome"),
            rules_file: "UserChromeRules.json".to_string(),
            backup_file: "UserChromeRules.bak.tar.gz".to_string(),
            mirror_dir: "UserChromeRules".to_string(),
        }
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            hotkey: DEFAULT_HOTKEY.to_string(),
            item_gap: DEFAULT_ITEM_GAP,
            fade_in_ms: 500,
            open_on_start: false,
        }
    }
}

impl StorageConfig {
    pub fn rules_path(&self) -> PathBuf {
        self.chrome_dir.join(&self.rules_file)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.chrome_dir.join(&self.backup_file)
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.chrome_dir.join(&self.mirror_dir)
    }
}

impl Config {
    /// Parsed hotkey. Falls back to the default binding on a bad value.
    pub fn hotkey(&self) -> Hotkey {
        Hotkey::parse(&self.editor.hotkey).unwrap_or_else(|e| {
            warn!(hotkey = %self.editor.hotkey, error = %e, "Invalid hotkey, using default");
            Hotkey::default()
        })
    }

    /// String table with the `[strings]` overrides applied.
    pub fn strings(&self) -> Strings {
        let mut strings = Strings::default();
        strings.update(&self.strings);
        strings
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config loading and saving
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Loads configuration from a TOML file. Never panics: returns defaults
    /// if no file is found or if parsing fails.
    pub fn load() -> Self {
        match find_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                info!("No config file found, using defaults");
                Config::default()
            }
        }
    }

    /// Loads a specific file, with the same fallback rules as [`Config::load`].
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Config>(&content) {
                Ok(config) => {
                    info!(path = %path.display(), "Configuration loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read config, using defaults");
                Config::default()
            }
        }
    }

    /// Saves configuration to the platform config directory.
    /// Creates the directory if it doesn't exist.
    pub fn save(&self) -> io::Result<()> {
        self.save_to(&save_path())
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, content)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

/// Searches for a config file in the standard locations.
fn find_config_path() -> Option<PathBuf> {
    // 1. Explicit env var override
    if let Ok(path) = std::env::var("CHROMERULES_CONFIG") {
        let p = PathBuf::from(path);
        if p.is_file() {
            return Some(p);
        }
    }

    // 2. Next to the executable
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let p = dir.join(CONFIG_FILE);
        if p.is_file() {
            return Some(p);
        }
    }

    // 3. Platform config directory
    if let Some(dir) = platform_config_dir() {
        let p = dir.join(CONFIG_FILE);
        if p.is_file() {
            return Some(p);
        }
    }

    // 4. Current working directory
    let p = PathBuf::from(CONFIG_FILE);
    if p.is_file() {
        return Some(p);
    }

    None
}

/// Returns the platform-specific save path for the config file.
fn save_path() -> PathBuf {
    platform_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE)
}

/// Returns the platform config directory without adding a dependency.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|appdata| PathBuf::from(appdata).join("ChromeRules"))
    }
    #[cfg(not(windows))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .or_else(|| std::env::var("HOME").ok().map(|h| format!("{h}/.config")))
            .map(|dir| PathBuf::from(dir).join("chromerules"))
    }
}
