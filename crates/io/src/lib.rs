// File I/O - Excel workbooks and autosave backups

pub mod autosave;
pub mod xlsx;

pub use autosave::{AutoSaveConfig, AutoSaveError, AutoSaveManager, LatestStatus, SaveTarget, StatusSink};
pub use xlsx::ExcelStorage;
