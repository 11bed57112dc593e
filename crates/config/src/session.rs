//! Persisted viewer position and its JSON store.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::settings::config_dir;

pub const SESSION_FILE: &str = "session.json";
const TEMP_FILE: &str = "session.tmp";
const BACKUP_PREFIX: &str = "session_backup_";

/// Where the user was when the viewer last closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub last_file: String,
    pub current_sheet: String,
    /// Index into the current sheet's cluster list.
    pub current_cluster: usize,
    pub current_row: usize,
    /// Terminal (columns, rows).
    pub window_size: (u16, u16),
    pub last_modified: NaiveDateTime,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            last_file: String::new(),
            current_sheet: String::new(),
            current_cluster: 0,
            current_row: 0,
            window_size: (120, 40),
            last_modified: Local::now().naive_local(),
        }
    }
}

/// Persistence for [`SessionState`]. Never fails loudly: loads fall back
/// to defaults and saves report `false`.
pub trait SessionStore: Send + Sync {
    fn load_session(&self) -> SessionState;
    fn save_session(&self, state: &SessionState) -> bool;
}

/// `session.json` in a config directory, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    dir: PathBuf,
}

impl JsonSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under `~/.config/flowgrid`.
    pub fn default_location() -> Self {
        Self::new(config_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn write_atomically(&self, state: &SessionState) -> Result<(), String> {
        fs::create_dir_all(&self.dir).map_err(|e| e.to_string())?;
        let json = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;

        let temp = self.dir.join(TEMP_FILE);
        fs::write(&temp, &json).map_err(|e| e.to_string())?;

        // Re-read before replacing so a truncated write never lands.
        let written = fs::read_to_string(&temp).map_err(|e| e.to_string())?;
        serde_json::from_str::<SessionState>(&written).map_err(|e| e.to_string())?;

        fs::rename(&temp, self.session_path()).map_err(|e| e.to_string())
    }

    /// Copy the current session file to `session_backup_<timestamp>.json`.
    pub fn backup_current_session(&self) -> Option<PathBuf> {
        let current = self.session_path();
        if !current.exists() {
            return None;
        }
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let backup = self.dir.join(format!("{BACKUP_PREFIX}{stamp}.json"));
        match fs::copy(&current, &backup) {
            Ok(_) => Some(backup),
            Err(e) => {
                warn!("Failed to back up session: {}", e);
                None
            }
        }
    }

    /// Delete all but the `keep` newest session backups. Returns how many
    /// were removed.
    pub fn clean_old_sessions(&self, keep: usize) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut backups: Vec<(SystemTime, PathBuf)> = entries
            .flatten()
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with(BACKUP_PREFIX) && name.ends_with(".json")
            })
            .map(|e| {
                let modified = e
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, e.path())
            })
            .collect();
        // Newest first; name breaks ties since the stamp sorts by time.
        backups.sort_by(|a, b| b.cmp(a));

        backups
            .into_iter()
            .skip(keep)
            .filter(|(_, path)| match fs::remove_file(path) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    false
                }
            })
            .count()
    }
}

impl SessionStore for JsonSessionStore {
    fn load_session(&self) -> SessionState {
        let path = self.session_path();
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                debug!("No session at {}: {}", path.display(), e);
                return SessionState::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("Corrupt session file {}: {}", path.display(), e);
            SessionState::default()
        })
    }

    fn save_session(&self, state: &SessionState) -> bool {
        match self.write_atomically(state) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save session: {}", e);
                let _ = fs::remove_file(self.dir.join(TEMP_FILE));
                false
            }
        }
    }
}
