use std::collections::HashMap;

/// Row ids are store-local, start at 1, and are never reused.
pub type RowId = u32;

/// Flag bit for rows that have been deleted or superseded. Inactive rows
/// are never read.
pub const FLAG_INACTIVE: u8 = 0x1;

/// Location and state of one row slot inside a store's chunk list.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub row_id: RowId,
    pub chunk_index: usize,
    pub offset: u64,
    pub length: u64,
    pub flags: u8,
}

impl RowRecord {
    pub fn is_active(&self) -> bool {
        self.flags & FLAG_INACTIVE == 0
    }
}

/// Per-store mapping from external keys to row records. The record list
/// only ever grows; overwrites mark the old row inactive and append.
#[derive(Debug, Default)]
pub struct RowDirectory {
    rows: Vec<RowRecord>,
    index: HashMap<String, RowId>,
    /// Keys in first-bind order, for paginated scans.
    keys: Vec<String>,
}

impl RowDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The row currently bound to `key`, only while it is active.
    pub fn active_row(&self, key: &str) -> Option<&RowRecord> {
        let row_id = *self.index.get(key)?;
        let row = &self.rows[row_id as usize - 1];
        row.is_active().then_some(row)
    }

    /// Append a fresh row record and bind `key` to it. Returns the new
    /// row id. Any previously bound row must already be inactive.
    pub fn append_row(&mut self, key: &str, chunk_index: usize, offset: u64, length: u64) -> RowId {
        let row_id = self.rows.len() as RowId + 1;
        self.rows.push(RowRecord {
            row_id,
            chunk_index,
            offset,
            length,
            flags: 0,
        });
        if self.index.insert(key.to_string(), row_id).is_none() {
            self.keys.push(key.to_string());
        }
        row_id
    }

    /// Rewrite an active row's payload length after an in-place
    /// overwrite. Bytes past the new length become unreachable.
    pub fn set_length(&mut self, row_id: RowId, length: u64) {
        self.rows[row_id as usize - 1].length = length;
    }

    pub fn deactivate(&mut self, row_id: RowId) {
        self.rows[row_id as usize - 1].flags |= FLAG_INACTIVE;
    }

    pub fn row(&self, row_id: RowId) -> Option<&RowRecord> {
        self.rows.get(row_id as usize - 1)
    }

    /// Rows ever created, active or not.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.keys.iter().filter(|k| self.active_row(k).is_some()).count()
    }

    /// Keys in first-bind order, including keys whose rows are inactive.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Keys with an active row, in first-bind order.
    pub fn active_keys(&self) -> Vec<String> {
        self.keys
            .iter()
            .filter(|k| self.active_row(k).is_some())
            .cloned()
            .collect()
    }

    /// Active row ids, in first-bind key order.
    pub fn active_row_ids(&self) -> Vec<RowId> {
        self.keys
            .iter()
            .filter_map(|k| self.active_row(k))
            .map(|row| row.row_id)
            .collect()
    }

    /// Drop every row and key binding. Used by clear.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.index.clear();
        self.keys.clear();
    }
}
