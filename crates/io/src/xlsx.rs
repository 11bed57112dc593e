// Excel storage (xlsx read via calamine, write via rust_xlsxwriter)

use std::fs;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use flowgrid_engine::cell::CellValue;
use flowgrid_engine::error::StorageError;
use flowgrid_engine::sheet::ConstraintTable;
use flowgrid_engine::storage::WorkbookStorage;
use log::{debug, info, warn};
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook, XlsxError};

/// Workbook on disk. Every read reopens the file, so a storage instance
/// never holds it open.
#[derive(Debug, Clone)]
pub struct ExcelStorage {
    path: PathBuf,
}

impl ExcelStorage {
    /// Check the file exists and take a one-time `<stem>_backup<ext>` copy
    /// of it. A failed backup is logged, not fatal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if !path.exists() {
            return Err(StorageError::NotFound(path));
        }
        create_backup(&path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_reader(&self) -> Result<Sheets<std::io::BufReader<fs::File>>, StorageError> {
        if !self.path.exists() {
            return Err(StorageError::NotFound(self.path.clone()));
        }
        open_workbook_auto(&self.path)
            .map_err(|e| StorageError::Parse(format!("Failed to open Excel file: {}", e)))
    }
}

/// `<dir>/<stem>_backup<ext>`
pub fn backup_path(original: &Path) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    original.with_file_name(format!("{}_backup{}", stem, ext))
}

fn create_backup(original: &Path) -> Option<PathBuf> {
    let backup = backup_path(original);
    if backup.exists() {
        return None;
    }
    match fs::copy(original, &backup) {
        Ok(_) => {
            info!("Created backup {}", backup.display());
            Some(backup)
        }
        Err(e) => {
            warn!("Could not create backup of {}: {}", original.display(), e);
            None
        }
    }
}

fn convert(data: &Data) -> CellValue {
    match data {
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Float(n) => CellValue::Number(*n),
        // Dates are kept as their serial number
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::String(s) if s.trim().is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::Error(_) | Data::Empty => CellValue::Empty,
    }
}

/// Header cell text; blanks become `Unnamed: <i>`.
fn header_name(idx: usize, data: &Data) -> String {
    let value = convert(data);
    if value.is_empty() {
        format!("Unnamed: {}", idx)
    } else {
        value.display().trim().to_string()
    }
}

impl WorkbookStorage for ExcelStorage {
    fn sheet_names(&self) -> Result<Vec<String>, StorageError> {
        let workbook = self.open_reader()?;
        Ok(workbook.sheet_names().to_vec())
    }

    fn load_sheet(&self, name: &str) -> Result<ConstraintTable, StorageError> {
        let mut workbook = self.open_reader()?;
        if !workbook.sheet_names().iter().any(|n| n == name) {
            return Err(StorageError::UnknownSheet(name.to_string()));
        }
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| StorageError::Parse(format!("Failed to read sheet '{}': {}", name, e)))?;

        let mut rows = range.rows();
        let columns: Vec<String> = match rows.next() {
            Some(header) => header.iter().enumerate().map(|(i, d)| header_name(i, d)).collect(),
            None => return Ok(ConstraintTable::default()),
        };

        let mut table = ConstraintTable::new(columns);
        for row in rows {
            let values: Vec<CellValue> = row.iter().map(convert).collect();
            if values.iter().all(CellValue::is_empty) {
                continue;
            }
            table.push_row(values);
        }

        let missing = table.missing_required_columns();
        if !missing.is_empty() {
            warn!("Sheet '{}' is missing required columns: {}", name, missing.join(", "));
        }
        debug!("Read sheet '{}': {} rows", name, table.row_count());
        Ok(table)
    }

    fn write_workbook(&self, sheets: &[(String, ConstraintTable)], dest: &Path) -> Result<(), StorageError> {
        write_xlsx(sheets, dest).map_err(|e| StorageError::Write(format!("{}: {}", dest.display(), e)))?;
        debug!("Wrote {} sheet(s) to {}", sheets.len(), dest.display());
        Ok(())
    }
}

fn write_xlsx(sheets: &[(String, ConstraintTable)], dest: &Path) -> Result<(), XlsxError> {
    let mut workbook = XlsxWorkbook::new();
    let header = Format::new().set_bold();

    for (name, table) in sheets {
        let worksheet = workbook.add_worksheet().set_name(name)?;
        for (col, title) in table.columns().iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, title, &header)?;
        }
        for (r, row) in table.rows().iter().enumerate() {
            let row32 = (r + 1) as u32;
            for (col, value) in row.iter().enumerate() {
                match value {
                    CellValue::Number(n) => {
                        worksheet.write_number(row32, col as u16, *n)?;
                    }
                    CellValue::Text(s) => {
                        worksheet.write_string(row32, col as u16, s)?;
                    }
                    CellValue::Empty => {}
                }
            }
        }
    }

    workbook.save(dest)
}
