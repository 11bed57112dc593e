// Edits from several threads against one manager.

use std::sync::Arc;
use std::thread;

use flowgrid_engine::storage::MemoryStorage;
use flowgrid_engine::{BatchUpdate, CellValue, ConstraintTable, ExcelDataManager};

const THREADS: usize = 8;
const EDITS_PER_THREAD: usize = 50;

fn manager() -> Arc<ExcelDataManager> {
    let columns = vec!["CLUSTER".into(), "CUID".into(), "VIEW".into(), "SHORTLIMIT".into()];
    let rows = (0..THREADS)
        .map(|t| {
            vec![
                CellValue::Number(t as f64),
                CellValue::from(format!("C{t}")),
                CellValue::Number(1.0),
                CellValue::Empty,
            ]
        })
        .collect();
    let storage = Arc::new(MemoryStorage::new(vec![(
        "SEP25".into(),
        ConstraintTable::from_rows(columns, rows),
    )]));
    let mgr = Arc::new(ExcelDataManager::new(storage));
    mgr.load_workbook("flows.xlsx").unwrap();
    mgr.set_active_sheet("SEP25").unwrap();
    mgr
}

#[test]
fn parallel_single_edits_all_land() {
    let mgr = manager();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                for n in 1..=EDITS_PER_THREAD {
                    let value = CellValue::Number(n as f64);
                    let (ok, msg) = mgr.validate_and_update(&t.to_string(), 0, "VIEW", &value);
                    assert!(ok, "{msg}");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(mgr.get_edit_history().len(), THREADS * EDITS_PER_THREAD);
    for t in 0..THREADS {
        let data = mgr.get_cluster_data(&t.to_string(), Some(&["VIEW"]));
        assert_eq!(data.value(0, "VIEW"), Some(&CellValue::Number(EDITS_PER_THREAD as f64)));
    }
}

#[test]
fn batches_are_not_interleaved() {
    let mgr = manager();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                for n in 1..=EDITS_PER_THREAD {
                    let updates = [
                        BatchUpdate::new(t.to_string(), 0, "VIEW", n as f64),
                        BatchUpdate::new(t.to_string(), 0, "SHORTLIMIT", -(n as f64)),
                    ];
                    assert!(mgr.batch_update(&updates).success);
                }
            })
        })
        .collect();

    // Readers observe each cluster's pair moving together.
    for _ in 0..200 {
        for t in 0..THREADS {
            let data = mgr.get_cluster_data(&t.to_string(), None);
            let view = data.value(0, "VIEW").and_then(CellValue::as_number);
            let short = data.value(0, "SHORTLIMIT").and_then(CellValue::as_number);
            if let (Some(v), Some(s)) = (view, short) {
                assert_eq!(v, -s);
            }
        }
    }

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(mgr.get_edit_history().len(), THREADS * EDITS_PER_THREAD * 2);
}
