pub mod cell;
pub mod clock;
pub mod color;
pub mod constraint;
pub mod error;
pub mod history;
pub mod manager;
pub mod sheet;
pub mod storage;
pub mod validation;

pub use cell::CellValue;
pub use error::{EngineError, StorageError};
pub use manager::{BatchResult, BatchUpdate, DataStats, ExcelDataManager};
pub use sheet::{ClusterData, ClusterKey, ConstraintTable};
pub use storage::WorkbookStorage;
