//! Debounced background backups of an edited workbook.
//!
//! Edits restart a debounce timer; when it fires, a single save worker
//! writes a timestamped `<stem>_autosave_<ts><ext>` copy next to the
//! workbook (temp file in the same directory, then an atomic rename) and
//! prunes old copies. Saves never overlap: a trigger that arrives while a
//! save is running is dropped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use chrono::Local;
use flowgrid_engine::error::EngineError;
use flowgrid_engine::storage::timestamped_path;
use flowgrid_engine::ExcelDataManager;
use log::{debug, error, info, warn};

const AUTOSAVE_TAG: &str = "autosave";

/// What the autosave manager saves.
pub trait SaveTarget: Send + Sync {
    /// Edits not yet held by any backup.
    fn has_unsaved_changes(&self) -> bool;
    fn file_path(&self) -> Option<PathBuf>;
    /// Write the full workbook to exactly `path`.
    fn save_to_file(&self, path: &Path) -> Result<(), EngineError>;
}

/// Backups leave the manager's unsaved flag alone: the edited workbook
/// is still written by [`ExcelDataManager::save_workbook`].
impl SaveTarget for ExcelDataManager {
    fn has_unsaved_changes(&self) -> bool {
        self.has_changes_since_backup()
    }

    fn file_path(&self) -> Option<PathBuf> {
        ExcelDataManager::file_path(self)
    }

    fn save_to_file(&self, path: &Path) -> Result<(), EngineError> {
        self.write_backup(path).map(|_| ())
    }
}

/// Receives user-facing progress messages.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, message: &str);
}

/// Keeps the most recent status message until it is taken.
#[derive(Debug, Default)]
pub struct LatestStatus {
    message: Mutex<Option<String>>,
}

impl LatestStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Option<String> {
        lock(&self.message).take()
    }

    pub fn peek(&self) -> Option<String> {
        lock(&self.message).clone()
    }
}

impl StatusSink for LatestStatus {
    fn set_status(&self, message: &str) {
        *lock(&self.message) = Some(message.to_string());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoSaveConfig {
    pub debounce: Duration,
    /// Autosave copies kept per workbook.
    pub backup_count: usize,
    /// Attempts per save cycle.
    pub max_retries: u32,
    /// Backoff before retry `k` is `base_retry_delay * 2^k`.
    pub base_retry_delay: Duration,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            backup_count: 3,
            max_retries: 3,
            base_retry_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutoSaveError {
    /// The target has no workbook path.
    NoFile,
    /// Every attempt failed; carries the last error.
    Save(String),
}

impl fmt::Display for AutoSaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFile => write!(f, "No file to save"),
            Self::Save(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for AutoSaveError {}

enum TimerMsg {
    Restart(Duration),
    Cancel,
}

struct Shared {
    target: Arc<dyn SaveTarget>,
    status: Arc<dyn StatusSink>,
    config: Mutex<AutoSaveConfig>,
    saving: AtomicBool,
    last_save_duration: Mutex<Option<Duration>>,
}

impl Shared {
    fn config(&self) -> AutoSaveConfig {
        lock(&self.config).clone()
    }

    /// Hand one save to the worker unless one is already queued or running.
    fn submit(&self, worker: &Sender<()>) -> bool {
        if self.saving.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("Save already in progress; trigger dropped");
            return false;
        }
        if worker.send(()).is_err() {
            self.saving.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// One save cycle, reporting progress to the status sink. `Ok(None)`
    /// when there was nothing to save.
    fn run_cycle(&self) -> Result<Option<PathBuf>, AutoSaveError> {
        if !self.target.has_unsaved_changes() {
            return Ok(None);
        }
        let Some(original) = self.target.file_path() else {
            self.status.set_status("No file to save");
            return Err(AutoSaveError::NoFile);
        };

        self.status.set_status("Saving...");
        let config = self.config();
        let started = Instant::now();

        match self.save_with_retry(&original, &config) {
            Ok(backup) => {
                let elapsed = started.elapsed();
                *lock(&self.last_save_duration) = Some(elapsed);
                self.status.set_status(&format!("Saved at {}", Local::now().format("%H:%M:%S")));
                info!("Autosaved {} in {:?}", backup.display(), elapsed);
                Ok(Some(backup))
            }
            Err(e) => {
                error!("Autosave of {} failed: {}", original.display(), e);
                self.status.set_status(&format!("Save failed: {}", e));
                Err(e)
            }
        }
    }

    fn save_with_retry(&self, original: &Path, config: &AutoSaveConfig) -> Result<PathBuf, AutoSaveError> {
        let attempts = config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match write_backup(self.target.as_ref(), original) {
                Ok(backup) => {
                    prune_backups(original, config.backup_count);
                    return Ok(backup);
                }
                Err(e) => {
                    warn!("Autosave attempt {} failed: {}", attempt + 1, e);
                    last_error = e;
                    if attempt + 1 < attempts {
                        self.status.set_status(&format!(
                            "Retrying save (attempt {}/{})...",
                            attempt + 2,
                            attempts
                        ));
                        thread::sleep(config.base_retry_delay * 2u32.saturating_pow(attempt));
                    }
                }
            }
        }
        Err(AutoSaveError::Save(last_error))
    }
}

/// Save into a temp file beside `original`, then rename it into place.
fn write_backup(target: &dyn SaveTarget, original: &Path) -> Result<PathBuf, String> {
    let dir = match original.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let suffix = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".xlsx".to_string());
    let backup = timestamped_path(original, AUTOSAVE_TAG, Local::now().naive_local());

    let temp = tempfile::Builder::new()
        .prefix(".flowgrid-")
        .suffix(&suffix)
        .tempfile_in(&dir)
        .map_err(|e| e.to_string())?;
    target.save_to_file(temp.path()).map_err(|e| e.to_string())?;
    temp.persist(&backup).map_err(|e| e.error.to_string())?;
    Ok(backup)
}

/// Autosave copies of `original`, newest first.
pub fn list_backups(original: &Path) -> Vec<PathBuf> {
    let dir = match original.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!("{}_{}_", stem, AUTOSAVE_TAG);
    let suffix = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".xlsx".to_string());

    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<(SystemTime, PathBuf)> = entries
        .flatten()
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(&suffix)
        })
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .collect();
    found.sort_by(|a, b| b.cmp(a));
    found.into_iter().map(|(_, p)| p).collect()
}

fn prune_backups(original: &Path, keep: usize) {
    for old in list_backups(original).into_iter().skip(keep) {
        match fs::remove_file(&old) {
            Ok(()) => debug!("Removed old autosave {}", old.display()),
            Err(e) => warn!("Could not remove {}: {}", old.display(), e),
        }
    }
}

pub struct AutoSaveManager {
    shared: Arc<Shared>,
    timer_tx: Mutex<Option<Sender<TimerMsg>>>,
    worker_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl AutoSaveManager {
    /// Start the timer thread and the save worker.
    pub fn new(
        target: Arc<dyn SaveTarget>,
        status: Arc<dyn StatusSink>,
        config: AutoSaveConfig,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            target,
            status,
            config: Mutex::new(config),
            saving: AtomicBool::new(false),
            last_save_duration: Mutex::new(None),
        });

        let (worker_tx, worker_rx) = mpsc::channel::<()>();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("flowgrid-autosave".into())
            .spawn(move || {
                for () in worker_rx {
                    let _ = worker_shared.run_cycle();
                    worker_shared.saving.store(false, Ordering::SeqCst);
                }
            })?;

        let (timer_tx, timer_rx) = mpsc::channel::<TimerMsg>();
        let timer_shared = Arc::clone(&shared);
        let timer_worker_tx = worker_tx.clone();
        let timer = thread::Builder::new()
            .name("flowgrid-autosave-timer".into())
            .spawn(move || {
                let mut deadline: Option<Instant> = None;
                loop {
                    let msg = match deadline {
                        Some(at) => timer_rx.recv_timeout(at.saturating_duration_since(Instant::now())),
                        None => timer_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };
                    match msg {
                        Ok(TimerMsg::Restart(delay)) => deadline = Some(Instant::now() + delay),
                        Ok(TimerMsg::Cancel) => deadline = None,
                        Err(RecvTimeoutError::Timeout) => {
                            deadline = None;
                            timer_shared.submit(&timer_worker_tx);
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(Self {
            shared,
            timer_tx: Mutex::new(Some(timer_tx)),
            worker_tx: Mutex::new(Some(worker_tx)),
            threads: Mutex::new(vec![timer, worker]),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Restart the debounce timer if the target has unsaved changes.
    pub fn on_data_edited(&self) {
        if !self.shared.target.has_unsaved_changes() {
            return;
        }
        let delay = self.shared.config().debounce;
        if let Some(tx) = lock(&self.timer_tx).as_ref() {
            let _ = tx.send(TimerMsg::Restart(delay));
        }
    }

    /// Applies from the next edit on.
    pub fn set_debounce(&self, debounce: Duration) {
        lock(&self.shared.config).debounce = debounce;
    }

    /// Cancel any pending timer and queue a save now. Returns `false` if
    /// the save was dropped because another one is running.
    pub fn perform_manual_save(&self) -> bool {
        if let Some(tx) = lock(&self.timer_tx).as_ref() {
            let _ = tx.send(TimerMsg::Cancel);
        }
        match lock(&self.worker_tx).as_ref() {
            Some(tx) => self.shared.submit(tx),
            None => false,
        }
    }

    /// Run one save cycle on the calling thread.
    pub fn save_blocking(&self) -> Result<Option<PathBuf>, AutoSaveError> {
        if let Some(tx) = lock(&self.timer_tx).as_ref() {
            let _ = tx.send(TimerMsg::Cancel);
        }
        // Wait out a running background save so the two never overlap.
        while self
            .shared
            .saving
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            thread::sleep(Duration::from_millis(10));
        }
        let result = self.shared.run_cycle();
        self.shared.saving.store(false, Ordering::SeqCst);
        result
    }

    pub fn is_saving(&self) -> bool {
        self.shared.saving.load(Ordering::SeqCst)
    }

    pub fn last_save_duration(&self) -> Option<Duration> {
        *lock(&self.shared.last_save_duration)
    }

    /// Stop both threads, letting a queued save finish. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.timer_tx).take();
        lock(&self.worker_tx).take();
        for handle in lock(&self.threads).drain(..) {
            if handle.join().is_err() {
                warn!("Autosave thread panicked");
            }
        }
        debug!("Autosave stopped");
    }
}

impl Drop for AutoSaveManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_engine::error::StorageError;
    use std::sync::atomic::AtomicUsize;

    /// Writes a small marker file; can fail a set number of times.
    struct FakeTarget {
        path: Option<PathBuf>,
        dirty: AtomicBool,
        failures: AtomicUsize,
        saves: AtomicUsize,
        delay: Duration,
    }

    impl FakeTarget {
        fn new(path: Option<PathBuf>) -> Self {
            Self {
                path,
                dirty: AtomicBool::new(true),
                failures: AtomicUsize::new(0),
                saves: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    impl SaveTarget for FakeTarget {
        fn has_unsaved_changes(&self) -> bool {
            self.dirty.load(Ordering::SeqCst)
        }

        fn file_path(&self) -> Option<PathBuf> {
            self.path.clone()
        }

        fn save_to_file(&self, path: &Path) -> Result<(), EngineError> {
            thread::sleep(self.delay);
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::Storage(StorageError::Write("disk full".into())));
            }
            fs::write(path, b"xlsx").map_err(|e| EngineError::Storage(e.into()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl StatusSink for Recorder {
        fn set_status(&self, message: &str) {
            lock(&self.0).push(message.to_string());
        }
    }

    fn fast_config() -> AutoSaveConfig {
        AutoSaveConfig {
            debounce: Duration::from_millis(20),
            base_retry_delay: Duration::from_millis(1),
            ..AutoSaveConfig::default()
        }
    }

    fn manager(target: Arc<FakeTarget>) -> (Arc<Recorder>, AutoSaveManager) {
        let status = Arc::new(Recorder::default());
        let mgr = AutoSaveManager::new(target, status.clone(), fast_config()).unwrap();
        (status, mgr)
    }

    #[test]
    fn test_blocking_save_writes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("flows.xlsx");
        let target = Arc::new(FakeTarget::new(Some(original.clone())));
        let (status, mgr) = manager(target.clone());

        let backup = mgr.save_blocking().unwrap().unwrap();
        assert!(backup.exists());
        assert!(backup.file_name().unwrap().to_string_lossy().starts_with("flows_autosave_"));
        let messages = lock(&status.0).clone();
        assert_eq!(messages[0], "Saving...");
        assert!(messages[1].starts_with("Saved at "));
        assert!(mgr.last_save_duration().is_some());
        // No temp files left behind.
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".flowgrid-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_clean_target_is_noop() {
        let target = Arc::new(FakeTarget::new(Some(PathBuf::from("/nonexistent/flows.xlsx"))));
        target.dirty.store(false, Ordering::SeqCst);
        let (status, mgr) = manager(target.clone());
        assert_eq!(mgr.save_blocking(), Ok(None));
        assert!(lock(&status.0).is_empty());
        assert_eq!(target.saves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_file() {
        let target = Arc::new(FakeTarget::new(None));
        let (status, mgr) = manager(target);
        assert_eq!(mgr.save_blocking(), Err(AutoSaveError::NoFile));
        assert_eq!(lock(&status.0).clone(), vec!["No file to save"]);
    }

    #[test]
    fn test_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(FakeTarget::new(Some(dir.path().join("flows.xlsx"))));
        target.failures.store(2, Ordering::SeqCst);
        let (status, mgr) = manager(target.clone());

        assert!(mgr.save_blocking().unwrap().is_some());
        assert_eq!(target.saves.load(Ordering::SeqCst), 3);
        let messages = lock(&status.0).clone();
        assert!(messages.contains(&"Retrying save (attempt 2/3)...".to_string()));
        assert!(messages.contains(&"Retrying save (attempt 3/3)...".to_string()));
    }

    #[test]
    fn test_retries_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(FakeTarget::new(Some(dir.path().join("flows.xlsx"))));
        target.failures.store(10, Ordering::SeqCst);
        let (status, mgr) = manager(target.clone());

        let err = mgr.save_blocking().unwrap_err();
        assert!(matches!(err, AutoSaveError::Save(ref m) if m.contains("disk full")));
        assert_eq!(target.saves.load(Ordering::SeqCst), 3);
        assert!(lock(&status.0).last().unwrap().starts_with("Save failed: "));
        assert!(list_backups(&dir.path().join("flows.xlsx")).is_empty());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("flows.xlsx");
        for n in 0..5 {
            fs::write(dir.path().join(format!("flows_autosave_2020010{n}_000000.xlsx")), b"x").unwrap();
        }
        fs::write(dir.path().join("other_autosave_20200101_000000.xlsx"), b"x").unwrap();
        prune_backups(&original, 3);
        assert_eq!(list_backups(&original).len(), 3);
        assert!(dir.path().join("other_autosave_20200101_000000.xlsx").exists());
    }

    #[test]
    fn test_debounced_edits_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(FakeTarget::new(Some(dir.path().join("flows.xlsx"))));
        let (_, mgr) = manager(target.clone());

        for _ in 0..5 {
            mgr.on_data_edited();
            thread::sleep(Duration::from_millis(2));
        }
        thread::sleep(Duration::from_millis(300));
        mgr.shutdown();
        assert_eq!(target.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_save_dropped_while_saving() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeTarget::new(Some(dir.path().join("flows.xlsx")));
        fake.delay = Duration::from_millis(200);
        let target = Arc::new(fake);
        let (_, mgr) = manager(target.clone());

        assert!(mgr.perform_manual_save());
        assert!(!mgr.perform_manual_save());
        mgr.shutdown();
        assert_eq!(target.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let target = Arc::new(FakeTarget::new(None));
        let (_, mgr) = manager(target);
        mgr.shutdown();
        mgr.shutdown();
        assert!(!mgr.perform_manual_save());
    }
}
