//! The transactional edit core.
//!
//! [`ExcelDataManager`] owns one [`ConstraintTable`] per sheet and is the
//! only path through which those tables change. All state sits behind a
//! single `RwLock`: readers share it, every mutation takes it exclusively
//! for its whole duration (a batch holds it across all its updates). Storage
//! I/O always happens with the lock released.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::cell::CellValue;
use crate::clock::{Clock, SystemClock};
use crate::constraint::{ClusterInfo, ConstraintRow};
use crate::error::EngineError;
use crate::history::{EditHistory, EditRecord, DEFAULT_HISTORY_CAPACITY};
use crate::sheet::{ClusterData, ClusterKey, ConstraintTable, CLUSTER_COLUMN};
use crate::storage::{SheetTables, WorkbookStorage};
use crate::validation::{ColumnRules, DataValidator, SHORTLIMIT, VIEW};

pub const UPDATE_OK: &str = "Value updated successfully";
const NO_ACTIVE_SHEET: &str = "No active sheet selected";

/// Fixed set of user-editable columns.
pub const EDITABLE_COLUMNS: [&str; 2] = [VIEW, SHORTLIMIT];

/// Columns known to be read-only. Informational: anything not in
/// [`EDITABLE_COLUMNS`] is read-only.
pub const READONLY_COLUMNS: [&str; 20] = [
    "CLUSTER", "CUID", "LODF", "FLOW", "LIMIT", "PREV", "PACTUAL", "PEXPECTED", "VIEWLG", "MON",
    "CONT", "DIRECTION", "SOURCE", "SINK", "LAST_BINDING", "BHOURS", "MAXHIST", "EXP_PEAK",
    "EXP_OP", "RECENT_DELTA",
];

pub fn can_edit_column(column: &str) -> bool {
    EDITABLE_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(column))
}

fn read_only_message(column: &str) -> String {
    format!("Column '{}' is read-only and cannot be modified", column)
}

/// One cell edit inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUpdate {
    pub cluster: String,
    pub constraint_index: usize,
    pub column: String,
    pub value: CellValue,
}

impl BatchUpdate {
    pub fn new(
        cluster: impl Into<String>,
        constraint_index: usize,
        column: impl Into<String>,
        value: impl Into<CellValue>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            constraint_index,
            column: column.into(),
            value: value.into(),
        }
    }

    /// The cell this update addresses, with the cluster resolved the way
    /// edits resolve it, so "1" and "01" collide.
    fn target(&self) -> (ClusterKey, usize, String) {
        (
            ClusterKey::parse(&self.cluster),
            self.constraint_index,
            self.column.to_ascii_uppercase(),
        )
    }
}

/// Outcome of [`ExcelDataManager::batch_update`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub success: bool,
    pub applied_count: usize,
    pub failed_count: usize,
    pub error_message: Option<String>,
}

impl BatchResult {
    fn applied(count: usize) -> Self {
        Self { success: true, applied_count: count, failed_count: 0, error_message: None }
    }

    fn failed(failed_count: usize, message: String) -> Self {
        Self {
            success: false,
            applied_count: 0,
            failed_count,
            error_message: Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataStats {
    pub total_sheets: usize,
    pub active_sheet: Option<String>,
    pub total_constraints: usize,
    pub unique_clusters: usize,
}

struct State {
    file_path: Option<PathBuf>,
    sheet_names: Vec<String>,
    sheets: HashMap<String, ConstraintTable>,
    active_sheet: Option<String>,
    modified: bool,
    /// Bumped on every mutation; lets a save tell whether it captured the
    /// latest data.
    revision: u64,
    /// Revision captured by the newest backup copy.
    backup_revision: u64,
    history: EditHistory,
}

impl State {
    fn new() -> Self {
        Self {
            file_path: None,
            sheet_names: Vec::new(),
            sheets: HashMap::new(),
            active_sheet: None,
            modified: false,
            revision: 0,
            backup_revision: 0,
            history: EditHistory::new(DEFAULT_HISTORY_CAPACITY),
        }
    }

    fn active_table(&self) -> Option<&ConstraintTable> {
        self.active_sheet.as_ref().and_then(|name| self.sheets.get(name))
    }

    /// Resolve, validate and apply one edit. Caller holds the write lock.
    fn apply_edit(
        &mut self,
        validator: &DataValidator,
        clock: &dyn Clock,
        cluster: &str,
        constraint_index: usize,
        column: &str,
        value: &CellValue,
    ) -> Result<(), String> {
        if !can_edit_column(column) {
            return Err(read_only_message(column));
        }
        let Some(sheet) = self.active_sheet.clone() else {
            return Err(NO_ACTIVE_SHEET.to_string());
        };
        let Some(table) = self.sheets.get_mut(&sheet) else {
            return Err(NO_ACTIVE_SHEET.to_string());
        };

        let key = ClusterKey::parse(cluster);
        let rows = table.cluster_rows(&key);
        let Some(&row) = rows.get(constraint_index) else {
            return Err(format!(
                "Invalid constraint index {} for cluster {}",
                constraint_index, cluster
            ));
        };
        let Some(col) = table.column_index(column) else {
            return Err(format!("Column '{}' not found in data", column));
        };

        let result = validator.validate_cell(column, value);
        if !result.is_valid {
            return Err(result.error_message.unwrap_or_else(|| format!("Invalid value for {}", column)));
        }

        let new_value = result.sanitized_value;
        let Some(old_value) = table.set(row, col, new_value.clone()) else {
            return Err(format!("Row {} is outside sheet '{}'", row, sheet));
        };
        let column_name = table.columns()[col].clone();

        debug!(
            "{}: cluster {} #{} {} {} -> {}",
            sheet, key, constraint_index, column_name, old_value, new_value
        );
        self.history.push(EditRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: clock.now(),
            sheet,
            row,
            constraint_index,
            column: column_name,
            old_value,
            new_value,
            cluster_id: key.to_string(),
        });
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.modified = true;
        self.revision += 1;
    }
}

/// Owns the sheet tables of one workbook and mediates every edit.
pub struct ExcelDataManager {
    storage: Arc<dyn WorkbookStorage>,
    clock: Arc<dyn Clock>,
    validator: DataValidator,
    state: RwLock<State>,
}

impl ExcelDataManager {
    pub fn new(storage: Arc<dyn WorkbookStorage>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn WorkbookStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            validator: DataValidator::new(),
            state: RwLock::new(State::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Workbook and sheets
    // ------------------------------------------------------------------

    /// Read the sheet list for `path` and reset all cached state.
    pub fn load_workbook(&self, path: impl Into<PathBuf>) -> Result<(), EngineError> {
        let path = path.into();
        let names = self.storage.sheet_names()?;
        info!("Loaded workbook {} ({} sheets)", path.display(), names.len());

        let mut state = self.write();
        state.file_path = Some(path);
        state.sheet_names = names;
        state.sheets.clear();
        state.active_sheet = None;
        state.modified = false;
        state.revision += 1;
        state.backup_revision = state.revision;
        state.history.clear();
        Ok(())
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.read().sheet_names.clone()
    }

    /// Make `name` the sheet that reads and edits address, loading it
    /// from storage on first use.
    pub fn set_active_sheet(&self, name: &str) -> Result<(), EngineError> {
        {
            let state = self.read();
            if !state.sheet_names.iter().any(|n| n == name) {
                return Err(EngineError::UnknownSheet(name.to_string()));
            }
        }
        self.ensure_loaded(name)?;
        self.write().active_sheet = Some(name.to_string());
        Ok(())
    }

    pub fn active_sheet_name(&self) -> Option<String> {
        self.read().active_sheet.clone()
    }

    fn ensure_loaded(&self, name: &str) -> Result<(), EngineError> {
        if self.read().sheets.contains_key(name) {
            return Ok(());
        }
        let table = self.storage.load_sheet(name)?;
        let missing = table.missing_required_columns();
        if !missing.is_empty() {
            warn!("Sheet {} is missing columns: {}", name, missing.join(", "));
        }
        debug!("Loaded sheet {}: {} rows x {} cols", name, table.row_count(), table.columns().len());
        self.write().sheets.entry(name.to_string()).or_insert(table);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Rows of `cluster` in the active sheet, in sheet order, optionally
    /// projected onto `columns`. Empty when there is no active sheet or no
    /// `CLUSTER` column.
    pub fn get_cluster_data(&self, cluster: &str, columns: Option<&[&str]>) -> ClusterData {
        let state = self.read();
        let Some(table) = state.active_table() else {
            return ClusterData::default();
        };
        if !table.has_column(CLUSTER_COLUMN) {
            return ClusterData::default();
        }
        let rows = table.cluster_rows(&ClusterKey::parse(cluster));
        ClusterData::project(table, &rows, columns)
    }

    /// Distinct cluster ids of the active sheet, stringified.
    pub fn get_all_clusters(&self) -> Vec<String> {
        self.read()
            .active_table()
            .map(ConstraintTable::cluster_ids)
            .unwrap_or_default()
    }

    pub fn cluster_info(&self, cluster: &str) -> Option<ClusterInfo> {
        let state = self.read();
        let table = state.active_table()?;
        let key = ClusterKey::parse(cluster);
        let rows = table.cluster_rows(&key);
        if rows.is_empty() {
            return None;
        }
        Some(ClusterInfo::build(key.to_string(), table, &rows))
    }

    /// Typed rows of `cluster`, for colouring.
    pub fn constraint_rows(&self, cluster: &str) -> Vec<ConstraintRow> {
        let state = self.read();
        let Some(table) = state.active_table() else {
            return Vec::new();
        };
        let rows = table.cluster_rows(&ClusterKey::parse(cluster));
        ConstraintRow::collect(table, &rows)
    }

    pub fn data_stats(&self) -> DataStats {
        let state = self.read();
        let (total_constraints, unique_clusters) = state
            .active_table()
            .map(|t| (t.row_count(), t.cluster_ids().len()))
            .unwrap_or((0, 0));
        DataStats {
            total_sheets: state.sheet_names.len(),
            active_sheet: state.active_sheet.clone(),
            total_constraints,
            unique_clusters,
        }
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    pub fn can_edit_column(&self, column: &str) -> bool {
        can_edit_column(column)
    }

    pub fn validation_rules(&self, column: &str) -> ColumnRules {
        self.validator.column_rules(column)
    }

    /// Validate and apply one cell edit. Never fails loudly: every
    /// rejection comes back as `(false, message)` with the table untouched.
    pub fn validate_and_update(
        &self,
        cluster: &str,
        constraint_index: usize,
        column: &str,
        value: &CellValue,
    ) -> (bool, String) {
        let mut state = self.write();
        match state.apply_edit(&self.validator, self.clock.as_ref(), cluster, constraint_index, column, value) {
            Ok(()) => (true, UPDATE_OK.to_string()),
            Err(message) => (false, message),
        }
    }

    /// Apply `updates` all-or-nothing.
    ///
    /// Conflicting targets and invalid values are rejected before anything
    /// is written. If an update still fails while applying, the active
    /// table and the edit log are restored to their pre-batch state.
    pub fn batch_update(&self, updates: &[BatchUpdate]) -> BatchResult {
        let mut state = self.write();

        if updates.is_empty() {
            return BatchResult::applied(0);
        }

        let mut targets = HashSet::new();
        for update in updates {
            if !targets.insert(update.target()) {
                return BatchResult::failed(
                    1,
                    format!(
                        "Conflict: Multiple edits target the same cell (cluster={}, index={}, column={})",
                        update.cluster, update.constraint_index, update.column
                    ),
                );
            }
        }

        let Some(sheet) = state.active_sheet.clone() else {
            return BatchResult::failed(1, NO_ACTIVE_SHEET.to_string());
        };

        let errors: Vec<String> = updates
            .iter()
            .enumerate()
            .filter_map(|(i, update)| {
                if !can_edit_column(&update.column) {
                    return Some(format!("Update {}: Column '{}' is read-only", i, update.column));
                }
                let result = self.validator.validate_cell(&update.column, &update.value);
                if result.is_valid {
                    None
                } else {
                    Some(format!("Update {}: {}", i, result.error_message.unwrap_or_default()))
                }
            })
            .collect();
        if !errors.is_empty() {
            return BatchResult::failed(errors.len(), errors.join("; "));
        }

        let table_backup = state.sheets.get(&sheet).cloned();
        let history_backup = state.history.clone();
        let modified_backup = state.modified;
        let revision_backup = state.revision;

        for (i, update) in updates.iter().enumerate() {
            let applied = state.apply_edit(
                &self.validator,
                self.clock.as_ref(),
                &update.cluster,
                update.constraint_index,
                &update.column,
                &update.value,
            );
            if let Err(message) = applied {
                warn!("Batch of {} rolled back at update {}: {}", updates.len(), i, message);
                if let Some(table) = table_backup {
                    state.sheets.insert(sheet, table);
                }
                state.history = history_backup;
                state.modified = modified_backup;
                state.revision = revision_backup;
                return BatchResult::failed(1, format!("Update {}: {}", i, message));
            }
        }

        BatchResult::applied(updates.len())
    }

    /// Write an edit's old value back. The record stays in the log and no
    /// new record is added. `false` if the id is unknown, the edit belongs
    /// to another sheet, or its cell no longer exists.
    pub fn rollback_edit(&self, edit_id: &str) -> bool {
        let mut state = self.write();
        let Some(record) = state.history.find(edit_id).cloned() else {
            return false;
        };
        if state.active_sheet.as_deref() != Some(record.sheet.as_str()) {
            return false;
        }
        let Some(table) = state.sheets.get_mut(&record.sheet) else {
            return false;
        };
        let Some(col) = table.column_index(&record.column) else {
            return false;
        };
        if table.set(record.row, col, record.old_value.clone()).is_none() {
            return false;
        }
        debug!("Rolled back edit {} on {}[{}]", record.id, record.sheet, record.column);
        state.touch();
        true
    }

    /// Copy of the edit log, oldest first.
    pub fn get_edit_history(&self) -> Vec<EditRecord> {
        self.read().history.snapshot()
    }

    /// Newest edit record, if any.
    pub fn last_edit(&self) -> Option<EditRecord> {
        self.read().history.last().cloned()
    }

    /// The logged record with `edit_id`, if it has not been evicted.
    pub fn find_edit(&self, edit_id: &str) -> Option<EditRecord> {
        self.read().history.find(edit_id).cloned()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn has_unsaved_changes(&self) -> bool {
        self.read().modified
    }

    /// Unsaved edits that no backup copy holds yet.
    pub fn has_changes_since_backup(&self) -> bool {
        let state = self.read();
        state.modified && state.revision != state.backup_revision
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.read().file_path.clone()
    }

    /// Save every sheet to a new timestamped file next to the workbook.
    pub fn save_workbook(&self) -> Result<PathBuf, EngineError> {
        let original = self.file_path().ok_or(EngineError::NoWorkbook)?;
        let (tables, revision) = self.snapshot_all()?;
        let saved = self.storage.save_workbook(&tables, &original)?;
        self.mark_saved(revision);
        info!("Workbook saved to {}", saved.display());
        Ok(saved)
    }

    /// Save every sheet to exactly `path`.
    pub fn save_to_file(&self, path: &Path) -> Result<PathBuf, EngineError> {
        let (tables, revision) = self.snapshot_all()?;
        self.storage.write_workbook(&tables, path)?;
        self.mark_saved(revision);
        info!("Workbook written to {}", path.display());
        Ok(path.to_path_buf())
    }

    /// Write a backup copy of every sheet to `path`. The workbook stays
    /// unsaved; only [`Self::has_changes_since_backup`] is cleared.
    pub fn write_backup(&self, path: &Path) -> Result<PathBuf, EngineError> {
        let (tables, revision) = self.snapshot_all()?;
        self.storage.write_workbook(&tables, path)?;
        let mut state = self.write();
        state.backup_revision = state.backup_revision.max(revision);
        debug!("Backup written to {}", path.display());
        Ok(path.to_path_buf())
    }

    /// Copies of all sheets in workbook order, loading any not yet cached.
    fn snapshot_all(&self) -> Result<(SheetTables, u64), EngineError> {
        let names = self.sheet_names();
        for name in &names {
            self.ensure_loaded(name)?;
        }
        let state = self.read();
        let tables = state
            .sheet_names
            .iter()
            .filter_map(|n| state.sheets.get(n).map(|t| (n.clone(), t.clone())))
            .collect();
        Ok((tables, state.revision))
    }

    fn mark_saved(&self, revision: u64) {
        let mut state = self.write();
        if state.revision == revision {
            state.modified = false;
        } else {
            debug!("Edits arrived during save; keeping unsaved flag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn scenario_table() -> ConstraintTable {
        ConstraintTable::from_rows(
            ["CLUSTER", "CUID", "VIEW", "SHORTLIMIT", "LODF"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            vec![
                vec![1.0.into(), "C1".into(), 100.0.into(), (-10.0).into(), 0.2.into()],
                vec![1.0.into(), "C2".into(), 150.0.into(), (-20.0).into(), 0.3.into()],
                vec![2.0.into(), "C3".into(), 80.0.into(), CellValue::Empty, 0.1.into()],
            ],
        )
    }

    fn manager() -> (Arc<MemoryStorage>, ExcelDataManager) {
        let storage = Arc::new(MemoryStorage::new(vec![
            ("SEP25".into(), scenario_table()),
            ("OCT25".into(), scenario_table()),
        ]));
        let mgr = ExcelDataManager::new(storage.clone());
        mgr.load_workbook("/tmp/flows.xlsx").unwrap();
        mgr.set_active_sheet("SEP25").unwrap();
        (storage, mgr)
    }

    fn view_at(mgr: &ExcelDataManager, cluster: &str, idx: usize) -> CellValue {
        mgr.get_cluster_data(cluster, None).value(idx, "VIEW").cloned().unwrap_or_default()
    }

    #[test]
    fn test_cluster_read() {
        let (_, mgr) = manager();
        let data = mgr.get_cluster_data("1", None);
        assert_eq!(data.len(), 2);
        assert_eq!(data.value(0, "CUID"), Some(&CellValue::from("C1")));
        assert_eq!(data.value(1, "CUID"), Some(&CellValue::from("C2")));
        assert_eq!(mgr.get_all_clusters(), vec!["1", "2"]);
    }

    #[test]
    fn test_cluster_read_projection() {
        let (_, mgr) = manager();
        let data = mgr.get_cluster_data("2", Some(&["CUID", "MISSING"]));
        assert_eq!(data.columns, vec!["CUID"]);
        assert_eq!(data.rows[0].index, 2);
    }

    #[test]
    fn test_reads_without_active_sheet_are_empty() {
        let storage = Arc::new(MemoryStorage::new(vec![("A".into(), scenario_table())]));
        let mgr = ExcelDataManager::new(storage);
        mgr.load_workbook("a.xlsx").unwrap();
        assert!(mgr.get_cluster_data("1", None).is_empty());
        assert!(mgr.get_all_clusters().is_empty());
        assert_eq!(
            mgr.validate_and_update("1", 0, "VIEW", &"5".into()),
            (false, "No active sheet selected".to_string())
        );
    }

    #[test]
    fn test_unknown_sheet() {
        let (_, mgr) = manager();
        assert_eq!(mgr.set_active_sheet("NOPE"), Err(EngineError::UnknownSheet("NOPE".into())));
        assert_eq!(mgr.active_sheet_name().as_deref(), Some("SEP25"));
    }

    #[test]
    fn test_sheet_loaded_once() {
        let (storage, mgr) = manager();
        mgr.set_active_sheet("SEP25").unwrap();
        mgr.set_active_sheet("SEP25").unwrap();
        assert_eq!(storage.load_count(), 1);
    }

    #[test]
    fn test_validate_and_update_scenario() {
        let (_, mgr) = manager();
        assert_eq!(
            mgr.validate_and_update("1", 0, "VIEW", &"125.5".into()),
            (true, "Value updated successfully".to_string())
        );
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(125.5));

        assert_eq!(
            mgr.validate_and_update("1", 0, "VIEW", &"-5".into()),
            (false, "VIEW must be a positive number greater than 0".to_string())
        );
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(125.5));

        assert_eq!(
            mgr.validate_and_update("1", 0, "LODF", &"0.5".into()),
            (false, "Column 'LODF' is read-only and cannot be modified".to_string())
        );
    }

    #[test]
    fn test_update_records_history() {
        let (_, mgr) = manager();
        assert!(mgr.validate_and_update("1", 1, "SHORTLIMIT", &"".into()).0);
        let history = mgr.get_edit_history();
        assert_eq!(history.len(), 1);
        let record = &history[0];
        assert_eq!(record.sheet, "SEP25");
        assert_eq!(record.row, 1);
        assert_eq!(record.cluster_id, "1");
        assert_eq!(record.old_value, CellValue::Number(-20.0));
        assert_eq!(record.new_value, CellValue::Empty);
        assert!(mgr.has_unsaved_changes());
    }

    #[test]
    fn test_update_structural_errors() {
        let (_, mgr) = manager();
        let (ok, msg) = mgr.validate_and_update("1", 2, "VIEW", &"5".into());
        assert!(!ok);
        assert_eq!(msg, "Invalid constraint index 2 for cluster 1");

        let (ok, msg) = mgr.validate_and_update("9", 0, "VIEW", &"5".into());
        assert!(!ok);
        assert!(msg.contains("cluster 9"));

        assert!(mgr.get_edit_history().is_empty());
        assert!(!mgr.has_unsaved_changes());
    }

    #[test]
    fn test_editable_column_missing_from_sheet() {
        let storage = Arc::new(MemoryStorage::new(vec![(
            "A".into(),
            ConstraintTable::from_rows(
                vec!["CLUSTER".into(), "VIEW".into()],
                vec![vec![1.0.into(), 5.0.into()]],
            ),
        )]));
        let mgr = ExcelDataManager::new(storage);
        mgr.load_workbook("a.xlsx").unwrap();
        mgr.set_active_sheet("A").unwrap();
        assert_eq!(
            mgr.validate_and_update("1", 0, "SHORTLIMIT", &"-1".into()),
            (false, "Column 'SHORTLIMIT' not found in data".to_string())
        );
    }

    #[test]
    fn test_batch_all_or_nothing() {
        let (_, mgr) = manager();
        let result = mgr.batch_update(&[
            BatchUpdate::new("1", 0, "VIEW", "110"),
            BatchUpdate::new("1", 1, "VIEW", "-3"),
        ]);
        assert!(!result.success);
        assert_eq!(result.applied_count, 0);
        assert_eq!(result.failed_count, 1);
        assert!(result.error_message.unwrap().starts_with("Update 1: "));
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(100.0));
        assert!(mgr.get_edit_history().is_empty());
    }

    #[test]
    fn test_batch_success() {
        let (_, mgr) = manager();
        let result = mgr.batch_update(&[
            BatchUpdate::new("1", 0, "VIEW", "110"),
            BatchUpdate::new("1", 0, "SHORTLIMIT", "-4"),
            BatchUpdate::new("2", 0, "VIEW", 90.0),
        ]);
        assert_eq!(result, BatchResult::applied(3));
        assert_eq!(mgr.get_edit_history().len(), 3);
        assert_eq!(view_at(&mgr, "2", 0), CellValue::Number(90.0));
    }

    #[test]
    fn test_batch_empty() {
        let (_, mgr) = manager();
        assert_eq!(mgr.batch_update(&[]), BatchResult::applied(0));
    }

    #[test]
    fn test_batch_conflict() {
        let (_, mgr) = manager();
        let result = mgr.batch_update(&[
            BatchUpdate::new("1", 0, "VIEW", "110"),
            BatchUpdate::new("1", 0, "view", "120"),
        ]);
        assert!(!result.success);
        assert_eq!(result.applied_count, 0);
        assert!(result.error_message.unwrap().starts_with("Conflict"));
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(100.0));
    }

    #[test]
    fn test_batch_conflict_same_cluster_spelled_differently() {
        let (_, mgr) = manager();
        let result = mgr.batch_update(&[
            BatchUpdate::new("1", 0, "VIEW", "110"),
            BatchUpdate::new(" 01", 0, "VIEW", "120"),
        ]);
        assert!(!result.success);
        assert_eq!(result.applied_count, 0);
        assert!(result.error_message.unwrap().starts_with("Conflict"));
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(100.0));
        assert!(mgr.get_edit_history().is_empty());
    }

    #[test]
    fn test_backup_keeps_workbook_unsaved() {
        let (storage, mgr) = manager();
        assert!(!mgr.has_changes_since_backup());
        assert!(mgr.validate_and_update("1", 0, "VIEW", &"110".into()).0);
        assert!(mgr.has_changes_since_backup());

        mgr.write_backup(Path::new("/tmp/flows_autosave.xlsx")).unwrap();
        assert!(mgr.has_unsaved_changes());
        assert!(!mgr.has_changes_since_backup());
        assert_eq!(storage.writes()[0].0, PathBuf::from("/tmp/flows_autosave.xlsx"));

        assert!(mgr.validate_and_update("1", 0, "VIEW", &"115".into()).0);
        assert!(mgr.has_changes_since_backup());

        let saved = mgr.save_workbook().unwrap();
        assert!(saved.to_string_lossy().contains("flows_edited_"));
        assert!(!mgr.has_unsaved_changes());
        assert!(!mgr.has_changes_since_backup());
    }

    #[test]
    fn test_last_edit() {
        let (_, mgr) = manager();
        assert!(mgr.last_edit().is_none());
        assert!(mgr.validate_and_update("1", 0, "VIEW", &"110".into()).0);
        assert!(mgr.validate_and_update("1", 1, "VIEW", &"160".into()).0);
        let last = mgr.last_edit().unwrap();
        assert_eq!(last.constraint_index, 1);
        assert_eq!(last.new_value, CellValue::Number(160.0));
        assert_eq!(mgr.find_edit(&last.id).as_ref(), Some(&last));
        assert_eq!(Some(last), mgr.get_edit_history().pop());
        assert!(mgr.find_edit("no-such-id").is_none());
    }

    #[test]
    fn test_batch_read_only_rejected_up_front() {
        let (_, mgr) = manager();
        let result = mgr.batch_update(&[
            BatchUpdate::new("1", 0, "LODF", "1"),
            BatchUpdate::new("1", 1, "VIEW", "0"),
        ]);
        assert_eq!(result.failed_count, 2);
        let message = result.error_message.unwrap();
        assert!(message.contains("Update 0: Column 'LODF' is read-only"));
        assert!(message.contains("; Update 1: VIEW must be"));
    }

    #[test]
    fn test_batch_rolls_back_structural_failure() {
        let (_, mgr) = manager();
        assert!(mgr.validate_and_update("2", 0, "VIEW", &"81".into()).0);
        let history_before = mgr.get_edit_history();

        let result = mgr.batch_update(&[
            BatchUpdate::new("1", 0, "VIEW", "111"),
            BatchUpdate::new("1", 1, "VIEW", "222"),
            BatchUpdate::new("1", 7, "VIEW", "333"),
        ]);
        assert!(!result.success);
        assert_eq!(result.applied_count, 0);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Update 2: Invalid constraint index 7 for cluster 1")
        );
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(100.0));
        assert_eq!(view_at(&mgr, "1", 1), CellValue::Number(150.0));
        assert_eq!(mgr.get_edit_history(), history_before);
    }

    #[test]
    fn test_rollback_edit() {
        let (_, mgr) = manager();
        assert!(mgr.validate_and_update("1", 0, "VIEW", &"125".into()).0);
        let id = mgr.get_edit_history()[0].id.clone();

        assert!(mgr.rollback_edit(&id));
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(100.0));
        // Rollback leaves the log alone.
        assert_eq!(mgr.get_edit_history().len(), 1);
        assert!(!mgr.rollback_edit("missing"));
    }

    #[test]
    fn test_rollback_other_sheet_refused() {
        let (_, mgr) = manager();
        assert!(mgr.validate_and_update("1", 0, "VIEW", &"125".into()).0);
        let id = mgr.get_edit_history()[0].id.clone();
        mgr.set_active_sheet("OCT25").unwrap();
        assert!(!mgr.rollback_edit(&id));
        mgr.set_active_sheet("SEP25").unwrap();
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(125.0));
    }

    #[test]
    fn test_history_is_a_copy() {
        let (_, mgr) = manager();
        assert!(mgr.validate_and_update("1", 0, "VIEW", &"125".into()).0);
        let mut copy = mgr.get_edit_history();
        copy.clear();
        assert_eq!(mgr.get_edit_history().len(), 1);
    }

    #[test]
    fn test_history_bound() {
        let (_, mgr) = manager();
        let total = DEFAULT_HISTORY_CAPACITY + 25;
        for n in 1..=total {
            let value = CellValue::Number(n as f64);
            assert!(mgr.validate_and_update("1", 0, "VIEW", &value).0);
        }
        let history = mgr.get_edit_history();
        assert_eq!(history.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(history[0].new_value, CellValue::Number(26.0));
        assert_eq!(history.last().map(|r| r.new_value.clone()), Some(CellValue::Number(total as f64)));
    }

    #[test]
    fn test_save_workbook_includes_every_sheet() {
        let (storage, mgr) = manager();
        assert!(mgr.validate_and_update("1", 0, "VIEW", &"125".into()).0);
        let saved = mgr.save_workbook().unwrap();
        assert!(saved.to_string_lossy().contains("flows_edited_"));
        assert!(!mgr.has_unsaved_changes());

        let writes = storage.writes();
        assert_eq!(writes.len(), 1);
        let names: Vec<_> = writes[0].1.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["SEP25", "OCT25"]);
        assert_eq!(writes[0].1[0].1.get(0, 2), Some(&CellValue::Number(125.0)));
    }

    #[test]
    fn test_failed_save_keeps_edits() {
        let (storage, mgr) = manager();
        assert!(mgr.validate_and_update("1", 0, "VIEW", &"125".into()).0);
        storage.fail_next_writes(1);
        assert!(matches!(mgr.save_to_file(Path::new("/tmp/out.xlsx")), Err(EngineError::Storage(_))));
        assert!(mgr.has_unsaved_changes());
        assert_eq!(view_at(&mgr, "1", 0), CellValue::Number(125.0));
    }

    #[test]
    fn test_save_without_workbook() {
        let mgr = ExcelDataManager::new(Arc::new(MemoryStorage::default()));
        assert_eq!(mgr.save_workbook(), Err(EngineError::NoWorkbook));
    }

    #[test]
    fn test_stats_and_info() {
        let (_, mgr) = manager();
        let stats = mgr.data_stats();
        assert_eq!(stats.total_sheets, 2);
        assert_eq!(stats.total_constraints, 3);
        assert_eq!(stats.unique_clusters, 2);
        let info = mgr.cluster_info("1").unwrap();
        assert_eq!(info.cuids, vec!["C1", "C2"]);
        assert!(mgr.cluster_info("42").is_none());
        assert_eq!(mgr.constraint_rows("1").len(), 2);
    }
}
