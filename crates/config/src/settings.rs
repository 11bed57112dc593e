// Application settings
// Loaded from ~/.config/flowgrid/settings.json

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flowgrid_engine::color::{ColorConfig, ColorConfigError};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Autosave
    #[serde(rename = "autosave.enabled")]
    pub autosave_enabled: bool,

    #[serde(rename = "autosave.debounceMs")]
    pub autosave_debounce_ms: u64,

    #[serde(rename = "autosave.backupCount")]
    pub autosave_backup_count: usize,

    #[serde(rename = "autosave.maxRetries")]
    pub autosave_max_retries: u32,

    #[serde(rename = "autosave.baseRetryDelayMs")]
    pub autosave_base_retry_delay_ms: u64,

    // Session
    #[serde(rename = "session.autoSaveInterval")]
    pub session_auto_save_interval: u64, // seconds

    #[serde(rename = "session.historyLimit")]
    pub session_history_limit: usize,

    // Colours
    #[serde(rename = "colors.viewThresholds")]
    pub view_thresholds: Vec<f64>,

    #[serde(rename = "colors.viewColors")]
    pub view_colors: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let colors = ColorConfig::default();
        Self {
            // Autosave
            autosave_enabled: true,
            autosave_debounce_ms: 500,
            autosave_backup_count: 3,
            autosave_max_retries: 3,
            autosave_base_retry_delay_ms: 100,
            // Session
            session_auto_save_interval: 60,
            session_history_limit: 100,
            // Colours
            view_thresholds: colors.thresholds().to_vec(),
            view_colors: colors.colors().iter().map(|c| c.to_hex()).collect(),
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        config_dir().join("settings.json")
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`. A missing file is created with the commented
    /// defaults; unreadable or malformed files yield defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            write_default_file(path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                warn!("Error parsing {}: {}; using default settings", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                warn!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse settings JSON, ignoring lines that start with `//`.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        serde_json::from_str(&cleaned)
    }

    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        fs::write(path, json).map_err(|e| e.to_string())
    }

    /// VIEW colour buckets, or the built-in ones if the configured values
    /// don't form a valid scale.
    pub fn color_config(&self) -> ColorConfig {
        self.try_color_config().unwrap_or_else(|e| {
            warn!("Invalid colour settings ({}); using defaults", e);
            ColorConfig::default()
        })
    }

    pub fn try_color_config(&self) -> Result<ColorConfig, ColorConfigError> {
        ColorConfig::from_hex(self.view_thresholds.clone(), &self.view_colors)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn autosave_base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_base_retry_delay_ms)
    }

    pub fn session_auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.session_auto_save_interval)
    }
}

/// `dirs::config_dir()/flowgrid`, or `./flowgrid` when the platform has
/// no config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowgrid")
}

const DEFAULT_CONFIG: &str = r##"{
    // Autosave: backups are written next to the workbook after edits
    "autosave.enabled": true,
    "autosave.debounceMs": 500,
    "autosave.backupCount": 3,
    "autosave.maxRetries": 3,
    "autosave.baseRetryDelayMs": 100,

    // Session checkpoint interval (seconds) and edit history size
    "session.autoSaveInterval": 60,
    "session.historyLimit": 100,

    // VIEW colour buckets: one more colour than thresholds, thresholds ascending
    "colors.viewThresholds": [50, 100, 200],
    "colors.viewColors": ["#00FF00", "#FFFF00", "#FFA500", "#FF0000"]
}
"##;

fn write_default_file(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Error creating config directory: {}", e);
            return;
        }
    }
    if let Err(e) = fs::write(path, DEFAULT_CONFIG) {
        warn!("Error writing default settings.json: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_engine::color::Rgb;

    #[test]
    fn test_default_file_parses_to_defaults() {
        assert_eq!(Settings::parse(DEFAULT_CONFIG).unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = Settings::parse(
            r#"{
            // shorter debounce
            "autosave.debounceMs": 250
        }"#,
        )
        .unwrap();
        assert_eq!(settings.autosave_debounce(), Duration::from_millis(250));
        assert_eq!(settings.autosave_backup_count, 3);
        assert_eq!(settings.session_auto_save_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_first_run_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings::load_from(&path);
        assert_eq!(settings, Settings::default());
        assert!(path.exists());
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings { autosave_enabled: false, ..Settings::default() };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_color_config() {
        let settings = Settings {
            view_thresholds: vec![10.0],
            view_colors: vec!["#000000".into(), "#FFFFFF".into()],
            ..Settings::default()
        };
        assert_eq!(settings.color_config().colors(), &[Rgb::new(0, 0, 0), Rgb::new(255, 255, 255)]);

        let broken = Settings { view_thresholds: vec![1.0, 2.0], ..Settings::default() };
        assert!(broken.try_color_config().is_err());
        assert_eq!(broken.color_config(), ColorConfig::default());
    }
}
