// Manager + Excel storage + autosave against real files.

use std::path::Path;
use std::sync::Arc;

use flowgrid_engine::storage::WorkbookStorage;
use flowgrid_engine::{CellValue, ConstraintTable, ExcelDataManager};
use flowgrid_io::autosave::list_backups;
use flowgrid_io::{AutoSaveConfig, AutoSaveManager, ExcelStorage, LatestStatus};

fn seed(path: &Path) {
    let table = ConstraintTable::from_rows(
        ["CLUSTER", "CUID", "VIEW", "SHORTLIMIT", "LODF"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        vec![
            vec![1.0.into(), "C1".into(), 100.0.into(), (-10.0).into(), 0.2.into()],
            vec![1.0.into(), "C2".into(), 150.0.into(), (-20.0).into(), 0.3.into()],
            vec![2.0.into(), "C3".into(), 80.0.into(), CellValue::Empty, 0.1.into()],
        ],
    );
    // ExcelStorage needs an existing file before it can write one.
    std::fs::write(path, b"").unwrap();
    let storage = ExcelStorage::open(path).unwrap();
    storage
        .write_workbook(&[("SEP25".into(), table.clone()), ("OCT25".into(), table)], path)
        .unwrap();
}

fn open(path: &Path) -> Arc<ExcelDataManager> {
    let storage = Arc::new(ExcelStorage::open(path).unwrap());
    let mgr = Arc::new(ExcelDataManager::new(storage));
    mgr.load_workbook(path).unwrap();
    mgr.set_active_sheet("SEP25").unwrap();
    mgr
}

#[test]
fn edit_then_save_round_trips_through_xlsx() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flows.xlsx");
    seed(&path);

    let mgr = open(&path);
    assert_eq!(mgr.sheet_names(), vec!["SEP25", "OCT25"]);
    assert!(mgr.validate_and_update("1", 1, "VIEW", &"175.25".into()).0);
    assert!(mgr.validate_and_update("2", 0, "SHORTLIMIT", &"-7".into()).0);

    let saved = mgr.save_workbook().unwrap();
    assert!(!mgr.has_unsaved_changes());

    let reopened = open(&saved);
    let cluster1 = reopened.get_cluster_data("1", Some(&["CUID", "VIEW"]));
    assert_eq!(cluster1.value(1, "VIEW"), Some(&CellValue::Number(175.25)));
    let cluster2 = reopened.get_cluster_data("2", None);
    assert_eq!(cluster2.value(0, "SHORTLIMIT"), Some(&CellValue::Number(-7.0)));
    // Untouched sheet survives the save.
    assert_eq!(reopened.sheet_names(), vec!["SEP25", "OCT25"]);
}

#[test]
fn autosave_backup_is_a_readable_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flows.xlsx");
    seed(&path);

    let mgr = open(&path);
    let status = Arc::new(LatestStatus::new());
    let autosave = AutoSaveManager::new(mgr.clone(), status.clone(), AutoSaveConfig::default()).unwrap();

    assert!(mgr.validate_and_update("1", 0, "VIEW", &"99".into()).0);
    let backup = autosave.save_blocking().unwrap().unwrap();
    assert!(status.peek().unwrap().starts_with("Saved at "));
    assert_eq!(list_backups(&path), vec![backup.clone()]);
    // A backup is not a save of the edited workbook.
    assert!(mgr.has_unsaved_changes());
    assert!(!mgr.has_changes_since_backup());
    assert_eq!(autosave.save_blocking().unwrap(), None);

    let restored = ExcelStorage::open(&backup).unwrap().load_sheet("SEP25").unwrap();
    assert_eq!(restored.get(0, 2), Some(&CellValue::Number(99.0)));

    let edited = mgr.save_workbook().unwrap();
    assert!(edited.file_name().unwrap().to_string_lossy().starts_with("flows_edited_"));
    assert!(!mgr.has_unsaved_changes());
    autosave.shutdown();
}
