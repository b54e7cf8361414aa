use std::collections::HashMap;

use crate::alloc::ChunkSet;
use crate::codec::sortkey::SortDefinition;
use crate::codec::{self, DataType, ElementKind, Payload};
use crate::config::StoreOptions;
use crate::device::GpuDevice;
use crate::directory::{RowDirectory, RowId, RowRecord};
use crate::error::{Error, Result};

/// How a mutation binds a key: `Add` fails on an active duplicate, `Put`
/// overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Add,
    Put,
}

/// Where an upsert landed.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub row_id: RowId,
    pub chunk_index: usize,
    pub offset: u64,
    /// True when the existing slot was reused in place.
    pub reused: bool,
}

/// Occupancy snapshot of one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub used_bytes: u64,
    pub active_rows: usize,
    pub pending_writes: usize,
}

/// One named store: a payload discipline, its device chunks, and the row
/// directory over them.
pub struct Store {
    pub name: String,
    pub data_type: DataType,
    pub element_kind: Option<ElementKind>,
    pub fixed_row_bytes: Option<u64>,
    pub total_rows: u64,
    pub sort_definitions: Vec<SortDefinition>,
    pub sorts_dirty: bool,
    pub chunks: ChunkSet,
    pub directory: RowDirectory,
    /// Row ids per definition name, as read back from the last sort pass.
    orders: HashMap<String, Vec<RowId>>,
}

impl Store {
    pub fn new(name: impl Into<String>, options: &StoreOptions, default_capacity: u64) -> Self {
        let name = name.into();
        let capacity = options.buffer_capacity_bytes.unwrap_or(default_capacity);
        Self {
            chunks: ChunkSet::new(name.clone(), capacity),
            name,
            data_type: options.data_type,
            element_kind: options.element_kind,
            fixed_row_bytes: options.fixed_row_bytes,
            total_rows: options.total_rows,
            sort_definitions: options.sort_definitions.clone(),
            sorts_dirty: false,
            directory: RowDirectory::new(),
            orders: HashMap::new(),
        }
    }

    /// Encode a payload under this store's discipline, enforcing the
    /// fixed slot size when one is configured.
    pub fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        let encoded = codec::encode(payload, self.data_type, self.element_kind)?;
        if let Some(fixed) = self.fixed_row_bytes {
            if encoded.len() as u64 > fixed {
                return Err(Error::InvalidInput(format!(
                    "payload of {} bytes exceeds fixed row size {fixed}",
                    encoded.len()
                )));
            }
        }
        Ok(encoded)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Payload> {
        codec::decode(bytes, self.data_type, self.element_kind)
    }

    /// Bind `key` to a slot that can hold `length` encoded bytes. Reuses
    /// the active slot in place when the new payload fits, otherwise
    /// marks it inactive and appends a fresh row.
    pub fn upsert(
        &mut self,
        device: &GpuDevice,
        key: &str,
        length: u64,
        mode: WriteMode,
    ) -> Result<Slot> {
        if let Some(active) = self.directory.active_row(key) {
            if mode == WriteMode::Add {
                return Err(Error::DuplicateKey(key.to_string()));
            }
            let slot_capacity = self.fixed_row_bytes.unwrap_or(active.length);
            if length <= slot_capacity {
                let slot = Slot {
                    row_id: active.row_id,
                    chunk_index: active.chunk_index,
                    offset: active.offset,
                    reused: true,
                };
                self.directory.set_length(slot.row_id, length);
                return Ok(slot);
            }
            let old_id = active.row_id;
            self.directory.deactivate(old_id);
        }

        let reserve = self.fixed_row_bytes.unwrap_or(length).max(length);
        let (chunk_index, offset) = self.chunks.allocate(device, reserve);
        let row_id = self.directory.append_row(key, chunk_index, offset, length);
        Ok(Slot {
            row_id,
            chunk_index,
            offset,
            reused: false,
        })
    }

    /// Mark the key's row inactive and hand back the dead record so the
    /// caller can enqueue a zeroing write over its bytes.
    pub fn remove(&mut self, key: &str) -> Option<RowRecord> {
        let row = self.directory.active_row(key)?.clone();
        self.directory.deactivate(row.row_id);
        Some(row)
    }

    /// Destroy all chunks, forget every row, and start with a fresh
    /// empty chunk.
    pub fn clear(&mut self, device: &GpuDevice) {
        self.chunks.reset(device);
        self.directory.reset();
        self.orders.clear();
        self.sorts_dirty = false;
    }

    pub fn has_sorts(&self) -> bool {
        !self.sort_definitions.is_empty()
    }

    /// Sorted row ids for a definition, from the most recent sort pass.
    pub fn order(&self, definition: &str) -> Option<&[RowId]> {
        self.orders.get(definition).map(Vec::as_slice)
    }

    pub fn set_order(&mut self, definition: impl Into<String>, row_ids: Vec<RowId>) {
        self.orders.insert(definition.into(), row_ids);
    }

    pub fn stats(&self, pending_writes: usize) -> StoreStats {
        StoreStats {
            chunk_count: self.chunks.chunk_count(),
            used_bytes: self.chunks.used_bytes(),
            active_rows: self.directory.active_len(),
            pending_writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn opaque_options() -> StoreOptions {
        StoreOptions::new(DataType::Opaque).buffer_capacity_bytes(4096)
    }

    #[tokio::test]
    async fn test_upsert_reuses_in_place_then_reallocates() {
        let Some(device) = testutil::test_device().await else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let mut store = Store::new("s", &opaque_options(), 4096);

        let first = store.upsert(&device, "k", 16, WriteMode::Put).unwrap();
        assert!(!first.reused);
        assert_eq!(first.offset, 0);

        // A shorter payload stays in the slot and shrinks the row.
        let second = store.upsert(&device, "k", 8, WriteMode::Put).unwrap();
        assert!(second.reused);
        assert_eq!(second.row_id, first.row_id);
        assert_eq!(store.directory.active_row("k").unwrap().length, 8);

        // A larger one moves to the next aligned slot under a fresh id.
        let third = store.upsert(&device, "k", 32, WriteMode::Put).unwrap();
        assert!(!third.reused);
        assert_ne!(third.row_id, first.row_id);
        assert_eq!(third.offset, 256);
        assert_eq!(store.directory.active_len(), 1);
        assert_eq!(store.directory.len(), 2);
    }

    #[tokio::test]
    async fn test_add_mode_rejects_active_duplicate() {
        let Some(device) = testutil::test_device().await else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let mut store = Store::new("s", &opaque_options(), 4096);

        store.upsert(&device, "k", 16, WriteMode::Add).unwrap();
        let result = store.upsert(&device, "k", 16, WriteMode::Add);
        assert_eq!(result, Err(Error::DuplicateKey("k".to_string())));

        // Once removed, the key can be added again.
        assert!(store.remove("k").is_some());
        assert!(store.remove("k").is_none());
        store.upsert(&device, "k", 16, WriteMode::Add).unwrap();
    }

    #[tokio::test]
    async fn test_fixed_rows_grow_within_their_slot() {
        let Some(device) = testutil::test_device().await else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let mut store = Store::new("s", &opaque_options().fixed_row_bytes(64), 4096);

        let first = store.upsert(&device, "k", 16, WriteMode::Put).unwrap();
        // Growth inside the fixed slot does not reallocate.
        let second = store.upsert(&device, "k", 48, WriteMode::Put).unwrap();
        assert!(second.reused);
        assert_eq!(second.row_id, first.row_id);

        // Payloads over the slot size are rejected before placement.
        let result = store.encode(&Payload::Bytes(vec![0; 100]));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_clear_resets_to_one_empty_chunk() {
        let Some(device) = testutil::test_device().await else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let mut store = Store::new("s", &opaque_options(), 4096);
        store.upsert(&device, "a", 16, WriteMode::Put).unwrap();
        store.upsert(&device, "b", 4096, WriteMode::Put).unwrap();
        assert_eq!(store.chunks.chunk_count(), 2);

        store.clear(&device);
        assert_eq!(store.chunks.chunk_count(), 1);
        assert_eq!(store.chunks.used_bytes(), 0);
        assert!(store.directory.is_empty());
    }
}
