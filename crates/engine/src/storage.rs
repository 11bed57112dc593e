//! Storage collaborator contract.
//!
//! The data manager never touches files itself. It asks a
//! [`WorkbookStorage`] for sheet names and sheet tables and hands every
//! table back for saving. Implementations must not mutate their inputs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{Local, NaiveDateTime};

use crate::error::StorageError;
use crate::sheet::ConstraintTable;

/// Sheets in workbook order.
pub type SheetTables = Vec<(String, ConstraintTable)>;

pub trait WorkbookStorage: Send + Sync {
    /// Sheet names in workbook order.
    fn sheet_names(&self) -> Result<Vec<String>, StorageError>;

    fn load_sheet(&self, name: &str) -> Result<ConstraintTable, StorageError>;

    /// Write every sheet to exactly `dest`, replacing it if present.
    fn write_workbook(&self, sheets: &[(String, ConstraintTable)], dest: &Path) -> Result<(), StorageError>;

    /// Write to a new timestamped file next to `original`, leaving
    /// `original` untouched. Returns the path written.
    fn save_workbook(&self, sheets: &[(String, ConstraintTable)], original: &Path) -> Result<PathBuf, StorageError> {
        let dest = timestamped_path(original, "edited", Local::now().naive_local());
        self.write_workbook(sheets, &dest)?;
        Ok(dest)
    }
}

/// `<dir>/<stem>_<tag>_<YYYYmmdd_HHMMSS>.<ext>`; the extension defaults
/// to `xlsx` when `original` has none.
pub fn timestamped_path(original: &Path, tag: &str, at: NaiveDateTime) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    let ext = original
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xlsx".to_string());
    let name = format!("{}_{}_{}.{}", stem, tag, at.format("%Y%m%d_%H%M%S"), ext);
    match original.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// In-memory storage. Records every write; can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sheets: Mutex<SheetTables>,
    writes: Mutex<Vec<(PathBuf, SheetTables)>>,
    failing_writes: AtomicUsize,
    loads: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(sheets: SheetTables) -> Self {
        Self {
            sheets: Mutex::new(sheets),
            ..Default::default()
        }
    }

    /// Make the next `n` writes fail with [`StorageError::Write`].
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Every successful write so far, oldest first.
    pub fn writes(&self) -> Vec<(PathBuf, SheetTables)> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of `load_sheet` calls served.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl WorkbookStorage for MemoryStorage {
    fn sheet_names(&self) -> Result<Vec<String>, StorageError> {
        let sheets = self.sheets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sheets.iter().map(|(name, _)| name.clone()).collect())
    }

    fn load_sheet(&self, name: &str) -> Result<ConstraintTable, StorageError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let sheets = self.sheets.lock().unwrap_or_else(|e| e.into_inner());
        sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| StorageError::UnknownSheet(name.to_string()))
    }

    fn write_workbook(&self, sheets: &[(String, ConstraintTable)], dest: &Path) -> Result<(), StorageError> {
        let failing = self.failing_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_writes.store(failing - 1, Ordering::SeqCst);
            return Err(StorageError::Write(format!("simulated failure writing {}", dest.display())));
        }
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((dest.to_path_buf(), sheets.to_vec()));
        Ok(())
    }
}
