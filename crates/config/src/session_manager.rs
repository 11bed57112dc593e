//! Position tracking and session checkpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDateTime;
use flowgrid_engine::clock::{Clock, SystemClock};
use flowgrid_engine::history::{EditHistory, EditRecord};
use log::{debug, info, warn};

use crate::session::{SessionState, SessionStore};

pub const DEFAULT_AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SESSION_HISTORY: usize = 100;

/// Fields to change in the session state. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub last_file: Option<String>,
    pub current_sheet: Option<String>,
    pub current_cluster: Option<usize>,
    pub current_row: Option<usize>,
    pub window_size: Option<(u16, u16)>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_file(mut self, path: impl Into<String>) -> Self {
        self.last_file = Some(path.into());
        self
    }

    pub fn current_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.current_sheet = Some(sheet.into());
        self
    }

    pub fn current_cluster(mut self, index: usize) -> Self {
        self.current_cluster = Some(index);
        self
    }

    pub fn current_row(mut self, row: usize) -> Self {
        self.current_row = Some(row);
        self
    }

    pub fn window_size(mut self, cols: u16, rows: u16) -> Self {
        self.window_size = Some((cols, rows));
        self
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) if *slot != v => {
            *slot = v;
            true
        }
        _ => false,
    }
}

struct Tracker {
    state: SessionState,
    dirty: bool,
    /// Bumped by every applied update; a checkpoint only clears `dirty`
    /// if it saved the latest revision.
    revision: u64,
    last_save: Option<NaiveDateTime>,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    auto_save_interval: Duration,
    tracker: Arc<Mutex<Tracker>>,
    history: Mutex<EditHistory>,
    shutdown: AtomicBool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
            tracker: Arc::new(Mutex::new(Tracker {
                state: SessionState::default(),
                dirty: false,
                revision: 0,
                last_save: None,
            })),
            history: Mutex::new(EditHistory::new(DEFAULT_SESSION_HISTORY)),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval = interval;
        self
    }

    pub fn with_history_limit(self, limit: usize) -> Self {
        Self { history: Mutex::new(EditHistory::new(limit)), ..self }
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        lock(&self.tracker)
    }

    /// Load the persisted state and start clean.
    pub fn start_session(&self) -> SessionState {
        let mut state = self.store.load_session();
        state.last_modified = self.clock.now();
        let mut tracker = self.tracker();
        tracker.state = state.clone();
        tracker.dirty = false;
        tracker.last_save = None;
        info!("Session started (sheet '{}', cluster {})", state.current_sheet, state.current_cluster);
        state
    }

    /// Apply the fields of `update` that differ from the current state.
    /// Returns whether anything changed.
    pub fn update_state(&self, update: SessionUpdate) -> bool {
        let mut tracker = self.tracker();
        let state = &mut tracker.state;
        let mut changed = replace(&mut state.last_file, update.last_file);
        changed |= replace(&mut state.current_sheet, update.current_sheet);
        changed |= replace(&mut state.current_cluster, update.current_cluster);
        changed |= replace(&mut state.current_row, update.current_row);
        changed |= replace(&mut state.window_size, update.window_size);
        if changed {
            state.last_modified = self.clock.now();
            tracker.dirty = true;
            tracker.revision += 1;
        }
        changed
    }

    pub fn is_dirty(&self) -> bool {
        self.tracker().dirty
    }

    /// Dirty and either never saved this run or the interval has passed.
    pub fn should_auto_save(&self) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let tracker = self.tracker();
        if !tracker.dirty {
            return false;
        }
        match tracker.last_save {
            None => true,
            Some(last) => match (self.clock.now() - last).to_std() {
                Ok(elapsed) => elapsed >= self.auto_save_interval,
                Err(_) => false,
            },
        }
    }

    /// Save a snapshot of the state on a background thread. `None` when
    /// there is nothing to save or the session has ended. The handle
    /// yields whether the store accepted the snapshot.
    pub fn checkpoint(&self) -> Option<JoinHandle<bool>> {
        if self.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        let (snapshot, revision) = {
            let tracker = self.tracker();
            if !tracker.dirty {
                return None;
            }
            (tracker.state.clone(), tracker.revision)
        };

        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let tracker = Arc::clone(&self.tracker);
        let spawned = thread::Builder::new()
            .name("flowgrid-session-checkpoint".into())
            .spawn(move || {
                let saved = store.save_session(&snapshot);
                if saved {
                    let mut tracker = lock(&tracker);
                    tracker.last_save = Some(clock.now());
                    if tracker.revision == revision {
                        tracker.dirty = false;
                    }
                    debug!("Session checkpoint saved");
                } else {
                    warn!("Session checkpoint failed");
                }
                saved
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start checkpoint thread: {}", e);
                None
            }
        }
    }

    /// Final synchronous save if dirty; further checkpoints are refused.
    /// Returns `false` only if a needed save failed.
    pub fn end_session(&self) -> bool {
        let saved = {
            let mut tracker = self.tracker();
            if tracker.dirty {
                let ok = self.store.save_session(&tracker.state);
                if ok {
                    tracker.dirty = false;
                    tracker.last_save = Some(self.clock.now());
                }
                ok
            } else {
                true
            }
        };
        self.shutdown.store(true, Ordering::SeqCst);
        info!("Session ended");
        saved
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn current_state(&self) -> SessionState {
        self.tracker().state.clone()
    }

    pub fn record_edit(&self, record: EditRecord) {
        lock(&self.history).push(record);
    }

    pub fn get_edit_history(&self) -> Vec<EditRecord> {
        lock(&self.history).snapshot()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use flowgrid_engine::cell::CellValue;
    use flowgrid_engine::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingStore {
        initial: Mutex<Option<SessionState>>,
        saved: Mutex<Vec<SessionState>>,
        fail: AtomicBool,
        saves: AtomicUsize,
    }

    impl SessionStore for RecordingStore {
        fn load_session(&self) -> SessionState {
            lock(&self.initial).clone().unwrap_or_default()
        }

        fn save_session(&self, state: &SessionState) -> bool {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return false;
            }
            lock(&self.saved).push(state.clone());
            true
        }
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap()
    }

    fn setup() -> (Arc<RecordingStore>, Arc<ManualClock>, SessionManager) {
        let store = Arc::new(RecordingStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let mgr = SessionManager::new(store.clone()).with_clock(clock.clone());
        mgr.start_session();
        (store, clock, mgr)
    }

    #[test]
    fn test_start_session_loads_store() {
        let store = Arc::new(RecordingStore::default());
        *lock(&store.initial) = Some(SessionState {
            current_sheet: "OCT25".into(),
            current_cluster: 4,
            ..SessionState::default()
        });
        let mgr = SessionManager::new(store).with_clock(Arc::new(ManualClock::new(start())));
        let state = mgr.start_session();
        assert_eq!(state.current_sheet, "OCT25");
        assert_eq!(state.current_cluster, 4);
        assert_eq!(state.last_modified, start());
        assert!(!mgr.is_dirty());
    }

    #[test]
    fn test_noop_update_stays_clean() {
        let (_, _, mgr) = setup();
        assert!(!mgr.update_state(SessionUpdate::new().current_cluster(0)));
        assert!(!mgr.is_dirty());
        assert!(!mgr.should_auto_save());
        assert!(mgr.checkpoint().is_none());
    }

    #[test]
    fn test_update_marks_dirty() {
        let (_, clock, mgr) = setup();
        clock.advance(chrono::Duration::seconds(5));
        assert!(mgr.update_state(SessionUpdate::new().current_sheet("SEP25").current_cluster(2)));
        let state = mgr.current_state();
        assert_eq!(state.current_sheet, "SEP25");
        assert_eq!(state.current_cluster, 2);
        assert_eq!(state.last_modified, start() + chrono::Duration::seconds(5));
        assert!(mgr.should_auto_save());
    }

    #[test]
    fn test_checkpoint_clears_dirty_and_respects_interval() {
        let (store, clock, mgr) = setup();
        mgr.update_state(SessionUpdate::new().current_row(3));
        assert!(mgr.checkpoint().unwrap().join().unwrap());
        assert!(!mgr.is_dirty());
        assert_eq!(lock(&store.saved)[0].current_row, 3);

        mgr.update_state(SessionUpdate::new().current_row(4));
        assert!(!mgr.should_auto_save());
        clock.advance(chrono::Duration::seconds(60));
        assert!(mgr.should_auto_save());
    }

    #[test]
    fn test_failed_checkpoint_stays_dirty() {
        let (store, _, mgr) = setup();
        store.fail.store(true, Ordering::SeqCst);
        mgr.update_state(SessionUpdate::new().window_size(80, 24));
        assert!(!mgr.checkpoint().unwrap().join().unwrap());
        assert!(mgr.is_dirty());
        // Never saved, so still eager.
        assert!(mgr.should_auto_save());
    }

    #[test]
    fn test_end_session_saves_and_blocks_checkpoints() {
        let (store, _, mgr) = setup();
        mgr.update_state(SessionUpdate::new().last_file("/data/flows.xlsx"));
        assert!(mgr.end_session());
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        mgr.update_state(SessionUpdate::new().current_row(9));
        assert!(mgr.checkpoint().is_none());
        assert!(!mgr.should_auto_save());
    }

    #[test]
    fn test_history_bounded() {
        let store = Arc::new(RecordingStore::default());
        let mgr = SessionManager::new(store).with_history_limit(2);
        for n in 0..3 {
            mgr.record_edit(EditRecord {
                id: format!("e{n}"),
                timestamp: start(),
                sheet: "SEP25".into(),
                row: n,
                constraint_index: 0,
                column: "VIEW".into(),
                old_value: CellValue::Empty,
                new_value: CellValue::Number(1.0),
                cluster_id: "1".into(),
            });
        }
        let ids: Vec<_> = mgr.get_edit_history().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }
}
