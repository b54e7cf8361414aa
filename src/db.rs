use std::collections::BTreeMap;

use crate::codec::sortkey::{self, SortKeyCache};
use crate::codec::{DataType, ElementKind, NumericArray, Payload};
use crate::config::{DbConfig, StoreOptions};
use crate::device::GpuDevice;
use crate::directory::RowId;
use crate::error::{Error, Result};
use crate::flush::{FlushEngine, PendingWrite, WriteOp};
use crate::reader;
use crate::sort::SortPipeline;
use crate::store::{Store, WriteMode};

/// Suffix of the companion store that holds sort-key encodings for a
/// JSON store. Its keys are `<primary_key>::<definition_name>`.
pub const OFFSETS_SUFFIX: &str = "-offsets";

/// Chunk capacity of companion offsets stores.
const OFFSETS_CAPACITY: u64 = 10 * 1024 * 1024;

/// Key separator between a primary key and a definition name inside an
/// offsets store.
const OFFSETS_SEP: &str = "::";

/// String-key range filter for cursors. Bounds default to inclusive.
#[derive(Debug, Clone, Default)]
pub struct CursorRange {
    pub lower: Option<String>,
    pub upper: Option<String>,
    pub lower_exclusive: bool,
    pub upper_exclusive: bool,
}

impl CursorRange {
    fn contains(&self, key: &str) -> bool {
        if let Some(lower) = &self.lower {
            let ok = if self.lower_exclusive { key > lower.as_str() } else { key >= lower.as_str() };
            if !ok {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            let ok = if self.upper_exclusive { key < upper.as_str() } else { key <= upper.as_str() };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// Cursor options: an optional key range and the emission direction.
#[derive(Debug, Clone, Default)]
pub struct CursorOptions {
    pub range: Option<CursorRange>,
    pub descending: bool,
}

/// A range scan over one store. Records are fetched through the bulk
/// reader up front and already sit in emission order.
pub struct Cursor {
    records: std::vec::IntoIter<(String, Payload)>,
}

impl Iterator for Cursor {
    type Item = (String, Payload);

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for Cursor {}

/// The store coordinator. Owns the device handle, every store, the
/// pending-write queue, and the sort pipeline; all public operations go
/// through here. Callers serialize externally: one host task per
/// database.
pub struct Database {
    config: DbConfig,
    device: GpuDevice,
    sorter: SortPipeline,
    stores: BTreeMap<String, Store>,
    flush: FlushEngine,
    cache: SortKeyCache,
}

impl Database {
    /// Acquire the GPU device and build an empty database.
    pub async fn open(config: DbConfig) -> Result<Self> {
        let device = GpuDevice::open(config.power_preference).await?;
        let sorter = SortPipeline::new(&device);
        let flush = FlushEngine::new(config.flush_debounce);
        Ok(Self {
            config,
            device,
            sorter,
            stores: BTreeMap::new(),
            flush,
            cache: SortKeyCache::new(),
        })
    }

    /// Create a store. JSON stores with sort definitions also get their
    /// companion offsets store, sized for one row per key and
    /// definition.
    pub fn create_store(&mut self, name: &str, options: StoreOptions) -> Result<()> {
        if self.stores.contains_key(name) {
            return Err(Error::DuplicateStore(name.to_string()));
        }
        if options.data_type == DataType::Numeric && options.element_kind.is_none() {
            return Err(Error::MissingElementKind(name.to_string()));
        }
        if !options.sort_definitions.is_empty() && options.data_type != DataType::Json {
            return Err(Error::InvalidInput(format!(
                "sort definitions require a JSON store, {name} is {:?}",
                options.data_type
            )));
        }
        if let Some(fixed) = options.fixed_row_bytes {
            if options.data_type == DataType::Json {
                return Err(Error::InvalidInput(
                    "fixed row size applies to opaque and numeric stores only".to_string(),
                ));
            }
            if fixed % 4 != 0 {
                return Err(Error::InvalidInput(format!(
                    "fixed row size {fixed} is not a multiple of 4"
                )));
            }
        }

        let offsets = if options.data_type == DataType::Json
            && !options.sort_definitions.is_empty()
        {
            let offsets_name = format!("{name}{OFFSETS_SUFFIX}");
            if self.stores.contains_key(&offsets_name) {
                return Err(Error::DuplicateStore(offsets_name));
            }
            let offsets_options = StoreOptions::new(DataType::Numeric)
                .element_kind(ElementKind::U32)
                .buffer_capacity_bytes(OFFSETS_CAPACITY)
                .total_rows(options.total_rows * options.sort_definitions.len() as u64);
            Some((offsets_name, offsets_options))
        } else {
            None
        };

        self.stores.insert(
            name.to_string(),
            Store::new(name, &options, self.config.default_buffer_capacity),
        );
        if let Some((offsets_name, offsets_options)) = offsets {
            self.stores.insert(
                offsets_name.clone(),
                Store::new(
                    offsets_name,
                    &offsets_options,
                    self.config.default_buffer_capacity,
                ),
            );
        }
        Ok(())
    }

    /// Destroy a store's chunks and forget it, along with its companion
    /// offsets store and any queued writes.
    pub fn drop_store(&mut self, name: &str) -> Result<()> {
        let mut store = self
            .stores
            .remove(name)
            .ok_or_else(|| Error::NoSuchStore(name.to_string()))?;
        store.chunks.destroy();
        self.flush.discard_store(name);

        let offsets_name = format!("{name}{OFFSETS_SUFFIX}");
        if let Some(mut offsets) = self.stores.remove(&offsets_name) {
            offsets.chunks.destroy();
            self.flush.discard_store(&offsets_name);
        }
        Ok(())
    }

    pub fn list_stores(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Insert a record under a new key. Fails with `DuplicateKey` when
    /// the key already has an active row.
    pub async fn add(&mut self, store: &str, key: &str, value: Payload) -> Result<()> {
        self.write_record(store, key, value, WriteMode::Add).await
    }

    /// Insert or overwrite a record. The last write wins.
    pub async fn put(&mut self, store: &str, key: &str, value: Payload) -> Result<()> {
        self.write_record(store, key, value, WriteMode::Put).await
    }

    async fn write_record(
        &mut self,
        store: &str,
        key: &str,
        value: Payload,
        mode: WriteMode,
    ) -> Result<()> {
        self.enqueue_record(store, key, &value, mode)?;

        // Maintain the companion sort-key rows for JSON stores.
        let definitions = {
            let store = self.stores.get_mut(store).expect("store checked above");
            if store.data_type == DataType::Json && store.has_sorts() {
                store.sorts_dirty = true;
                store.sort_definitions.clone()
            } else {
                Vec::new()
            }
        };
        if !definitions.is_empty() {
            let document = value.as_json().expect("json payload checked on encode").clone();
            let offsets_name = format!("{store}{OFFSETS_SUFFIX}");
            for definition in &definitions {
                let words = sortkey::encode_record(&document, definition, &mut self.cache);
                let offsets_key = format!("{key}{OFFSETS_SEP}{}", definition.name);
                self.enqueue_record(
                    &offsets_name,
                    &offsets_key,
                    &Payload::Numeric(NumericArray::from_u32(&words)),
                    WriteMode::Put,
                )?;
            }
        }

        self.flush_if_over_threshold().await
    }

    /// Validate, encode, place, and queue one record write. Never
    /// suspends; the device sees the bytes at the next flush.
    fn enqueue_record(
        &mut self,
        store_name: &str,
        key: &str,
        value: &Payload,
        mode: WriteMode,
    ) -> Result<()> {
        let store = self
            .stores
            .get_mut(store_name)
            .ok_or_else(|| Error::NoSuchStore(store_name.to_string()))?;
        let encoded = store.encode(value)?;
        let slot = store.upsert(&self.device, key, encoded.len() as u64, mode)?;
        self.flush.enqueue(PendingWrite {
            store: store_name.to_string(),
            row_id: slot.row_id,
            chunk_index: slot.chunk_index,
            offset: slot.offset,
            bytes: encoded,
            op: match mode {
                WriteMode::Add => WriteOp::Add,
                WriteMode::Put => WriteOp::Put,
            },
            key: Some(key.to_string()),
        });
        Ok(())
    }

    /// Mark the key's row inactive and queue a zeroing write over its
    /// device bytes. Missing or already-inactive keys are a no-op.
    pub async fn delete(&mut self, store: &str, key: &str) -> Result<()> {
        let (removed, definitions) = {
            let entry = self
                .stores
                .get_mut(store)
                .ok_or_else(|| Error::NoSuchStore(store.to_string()))?;
            let removed = entry.remove(key);
            let definitions = if removed.is_some() && entry.has_sorts() {
                entry.sorts_dirty = true;
                entry.sort_definitions.clone()
            } else {
                Vec::new()
            };
            (removed, definitions)
        };
        let Some(row) = removed else {
            return Ok(());
        };

        self.flush.enqueue(PendingWrite {
            store: store.to_string(),
            row_id: row.row_id,
            chunk_index: row.chunk_index,
            offset: row.offset,
            bytes: vec![0; row.length as usize],
            op: WriteOp::Delete,
            key: Some(key.to_string()),
        });

        let offsets_name = format!("{store}{OFFSETS_SUFFIX}");
        for definition in &definitions {
            let offsets_key = format!("{key}{OFFSETS_SEP}{}", definition.name);
            let Some(offsets) = self.stores.get_mut(&offsets_name) else {
                break;
            };
            if let Some(row) = offsets.remove(&offsets_key) {
                self.flush.enqueue(PendingWrite {
                    store: offsets_name.clone(),
                    row_id: row.row_id,
                    chunk_index: row.chunk_index,
                    offset: row.offset,
                    bytes: vec![0; row.length as usize],
                    op: WriteOp::Delete,
                    key: Some(offsets_key),
                });
            }
        }

        self.flush_if_over_threshold().await
    }

    /// Read one key. Flushes queued writes first, so a read always sees
    /// its task's prior mutations.
    pub async fn get(&mut self, store: &str, key: &str) -> Result<Option<Payload>> {
        let keys = [key.to_string()];
        let mut values = self.read_keys(store, &keys).await?;
        Ok(values.pop().flatten())
    }

    /// Read a batch of keys. Wildcard patterns (`%`, `_`, bracket
    /// classes) expand in place against the live key set, so the result
    /// length may differ from the request length.
    pub async fn get_many(&mut self, store: &str, keys: &[String]) -> Result<Vec<Option<Payload>>> {
        self.flush_writes().await?;
        let entry = self
            .stores
            .get(store)
            .ok_or_else(|| Error::NoSuchStore(store.to_string()))?;
        let expanded = reader::expand_keys(keys, &entry.directory.active_keys())?;
        reader::read_rows(&self.device, entry, &expanded).await
    }

    /// Read a page of the store's key enumeration, in first-bind order.
    /// Positions whose key no longer has an active row hold None.
    pub async fn get_page(
        &mut self,
        store: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Option<Payload>>> {
        self.flush_writes().await?;
        let entry = self
            .stores
            .get(store)
            .ok_or_else(|| Error::NoSuchStore(store.to_string()))?;
        let keys: Vec<String> = entry
            .directory
            .keys()
            .skip(skip)
            .take(take)
            .map(str::to_string)
            .collect();
        reader::read_rows(&self.device, entry, &keys).await
    }

    async fn read_keys(&mut self, store: &str, keys: &[String]) -> Result<Vec<Option<Payload>>> {
        self.flush_writes().await?;
        let entry = self
            .stores
            .get(store)
            .ok_or_else(|| Error::NoSuchStore(store.to_string()))?;
        reader::read_rows(&self.device, entry, keys).await
    }

    /// Emit active records in lexicographic key order, optionally range
    /// filtered, descending on request.
    pub async fn cursor(&mut self, store: &str, options: CursorOptions) -> Result<Cursor> {
        self.flush_writes().await?;
        let entry = self
            .stores
            .get(store)
            .ok_or_else(|| Error::NoSuchStore(store.to_string()))?;

        let mut keys = entry.directory.active_keys();
        if let Some(range) = &options.range {
            keys.retain(|key| range.contains(key));
        }
        keys.sort();
        if options.descending {
            keys.reverse();
        }

        let values = reader::read_rows(&self.device, entry, &keys).await?;
        let records: Vec<(String, Payload)> = keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect();
        Ok(Cursor {
            records: records.into_iter(),
        })
    }

    /// Row ids for a sort definition, in the order of the last completed
    /// sort pass. None until the first rebuild.
    pub fn sorted_row_ids(&self, store: &str, definition: &str) -> Result<Option<&[RowId]>> {
        let entry = self
            .stores
            .get(store)
            .ok_or_else(|| Error::NoSuchStore(store.to_string()))?;
        Ok(entry.order(definition))
    }

    /// Occupancy snapshot of one store.
    pub fn stats(&self, store: &str) -> Result<crate::store::StoreStats> {
        let entry = self
            .stores
            .get(store)
            .ok_or_else(|| Error::NoSuchStore(store.to_string()))?;
        Ok(entry.stats(self.flush.pending_for(store)))
    }

    /// False between any mutation and the end of the next timed flush.
    pub fn is_ready(&self) -> bool {
        self.flush.is_ready()
    }

    /// Wait out the debounce window, drain the queue, rebuild sort
    /// orders for every dirty JSON store, and drop the per-window
    /// sort-key caches.
    pub async fn await_ready(&mut self) -> Result<()> {
        if let Some(wait) = self.flush.time_until_due() {
            tokio::time::sleep(wait).await;
        }
        self.flush_writes().await?;
        self.rebuild_sorts().await?;
        self.cache.clear();
        self.flush.mark_ready();
        Ok(())
    }

    /// Drain the pending-write queue to the device.
    pub async fn flush_writes(&mut self) -> Result<()> {
        let Self { device, stores, flush, .. } = self;
        flush.flush(device, stores).await
    }

    async fn flush_if_over_threshold(&mut self) -> Result<()> {
        if self.flush.len() >= self.config.batch_threshold {
            tracing::debug!(pending = self.flush.len(), "batch threshold reached, flushing");
            self.flush_writes().await?;
        }
        Ok(())
    }

    /// Destroy every chunk of the store, reset its directory, and start
    /// over with one empty chunk. The store itself stays listed.
    pub async fn clear(&mut self, store: &str) -> Result<()> {
        if !self.stores.contains_key(store) {
            return Err(Error::NoSuchStore(store.to_string()));
        }
        self.await_ready().await?;

        self.flush.discard_store(store);
        let entry = self.stores.get_mut(store).expect("store checked above");
        entry.clear(&self.device);
        tracing::info!(store = %store, "store cleared");

        // Sort-key rows for cleared records are stale; the companion
        // store starts over too.
        let offsets_name = format!("{store}{OFFSETS_SUFFIX}");
        if let Some(offsets) = self.stores.get_mut(&offsets_name) {
            self.flush.discard_store(&offsets_name);
            offsets.clear(&self.device);
        }
        Ok(())
    }

    /// Rebuild the row order of every dirty JSON store, one device sort
    /// per definition.
    async fn rebuild_sorts(&mut self) -> Result<()> {
        let dirty: Vec<String> = self
            .stores
            .values()
            .filter(|s| s.sorts_dirty && s.has_sorts())
            .map(|s| s.name.clone())
            .collect();

        for name in dirty {
            let definitions = self.stores[&name].sort_definitions.clone();
            for definition in &definitions {
                let (items, fields_per_item) =
                    match self.build_sort_items(&name, &definition.name).await? {
                        Some(built) => built,
                        None => continue,
                    };
                match self
                    .sorter
                    .execute(&self.device, &definition.name, &items, fields_per_item)
                    .await
                {
                    Ok(row_ids) => {
                        tracing::debug!(
                            store = %name,
                            definition = %definition.name,
                            rows = row_ids.len(),
                            "sort order rebuilt"
                        );
                        let store = self.stores.get_mut(&name).expect("dirty store exists");
                        store.set_order(&definition.name, row_ids);
                    }
                    Err(err @ Error::SortBudgetExceeded { .. }) => {
                        // Non-fatal: the previous order stands.
                        tracing::warn!(store = %name, error = %err, "sort skipped");
                    }
                    Err(err) => return Err(err),
                }
            }
            self.stores.get_mut(&name).expect("dirty store exists").sorts_dirty = false;
        }
        Ok(())
    }

    /// Gather the offsets rows for one definition and prepend each
    /// record's primary row id, yielding the contiguous item array the
    /// sort shader consumes.
    async fn build_sort_items(
        &mut self,
        store: &str,
        definition: &str,
    ) -> Result<Option<(Vec<u32>, u32)>> {
        let offsets_name = format!("{store}{OFFSETS_SUFFIX}");
        let suffix = format!("{OFFSETS_SEP}{definition}");

        let Some(offsets) = self.stores.get(&offsets_name) else {
            return Ok(None);
        };
        let primary = &self.stores[store];
        let expected_words = primary
            .sort_definitions
            .iter()
            .find(|d| d.name == definition)
            .map(|d| d.words())
            .unwrap_or(0);
        if expected_words == 0 {
            return Ok(None);
        }

        let keys: Vec<String> = offsets
            .directory
            .active_keys()
            .into_iter()
            .filter(|k| k.ends_with(&suffix))
            .collect();
        if keys.is_empty() {
            return Ok(Some((Vec::new(), expected_words as u32)));
        }

        let values = reader::read_rows(&self.device, offsets, &keys).await?;

        let mut items = Vec::with_capacity(keys.len() * (expected_words + 1));
        for (key, value) in keys.iter().zip(values) {
            let primary_key = &key[..key.len() - suffix.len()];
            let Some(row) = primary.directory.active_row(primary_key) else {
                continue;
            };
            let Some(Payload::Numeric(words)) = value else {
                continue;
            };
            let words = words.as_u32()?;
            if words.len() != expected_words {
                tracing::warn!(
                    store = %store,
                    key = %primary_key,
                    "sort-key row has wrong width, skipped"
                );
                continue;
            }
            items.push(row.row_id);
            items.extend_from_slice(words);
        }
        Ok(Some((items, expected_words as u32)))
    }
}
