use std::fmt;
use std::path::PathBuf;

/// Failure reported by a storage collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// The workbook file does not exist.
    NotFound(PathBuf),
    /// The workbook (or one sheet) could not be read or understood.
    Parse(String),
    /// The named sheet is not in the workbook.
    UnknownSheet(String),
    /// Writing the output file failed.
    Write(String),
    /// Any other filesystem error.
    Io(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "Excel file not found: {}", path.display()),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::UnknownSheet(name) => write!(f, "sheet '{name}' not found in workbook"),
            Self::Write(msg) => write!(f, "write error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Failure of a data-manager operation that is not an edit.
///
/// Edits never produce this type; they report `(false, message)`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// `set_active_sheet` was given a name the workbook does not contain.
    UnknownSheet(String),
    /// A save was requested before any workbook was loaded.
    NoWorkbook,
    Storage(StorageError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSheet(name) => write!(f, "Sheet '{name}' not found"),
            Self::NoWorkbook => write!(f, "no workbook loaded"),
            Self::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
