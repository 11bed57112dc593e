//! Edit log: immutable records kept in a bounded FIFO.

use std::collections::VecDeque;

use chrono::NaiveDateTime;

use crate::cell::CellValue;

/// Capacity of the data manager's edit log.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// One successful, validated cell edit.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRecord {
    /// Unique token used by rollback.
    pub id: String,
    pub timestamp: NaiveDateTime,
    pub sheet: String,
    /// Absolute row index within the sheet.
    pub row: usize,
    /// Position within the cluster at the time of the edit.
    pub constraint_index: usize,
    pub column: String,
    pub old_value: CellValue,
    pub new_value: CellValue,
    pub cluster_id: String,
}

impl std::fmt::Display for EditRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Edit at {}: {}[{}] cluster {} #{} {} -> {}",
            self.timestamp.format("%H:%M:%S"),
            self.sheet,
            self.column,
            self.cluster_id,
            self.constraint_index,
            display_or_blank(&self.old_value),
            display_or_blank(&self.new_value),
        )
    }
}

fn display_or_blank(value: &CellValue) -> String {
    if value.is_empty() {
        "(blank)".to_string()
    } else {
        value.display()
    }
}

/// FIFO of edit records; pushing past capacity drops the oldest entry.
#[derive(Debug, Clone)]
pub struct EditHistory {
    entries: VecDeque<EditRecord>,
    capacity: usize,
}

impl EditHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, record: EditRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Linear scan from oldest to newest.
    pub fn find(&self, id: &str) -> Option<&EditRecord> {
        self.entries.iter().find(|r| r.id == id)
    }

    pub fn last(&self) -> Option<&EditRecord> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Owned copy, oldest first.
    pub fn snapshot(&self) -> Vec<EditRecord> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
