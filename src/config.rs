use std::time::Duration;

use crate::codec::sortkey::SortDefinition;
use crate::codec::{DataType, ElementKind};

/// Configuration for a database instance.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Default capacity for newly created device chunks (default: 16MB)
    pub default_buffer_capacity: u64,

    /// Debounce window between the last mutation and the timed flush
    /// that also rebuilds sort orders (default: 250ms)
    pub flush_debounce: Duration,

    /// Pending-write count that forces an immediate flush (default: 10_000)
    pub batch_threshold: usize,

    /// Adapter selection preference (default: high performance)
    pub power_preference: wgpu::PowerPreference,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            default_buffer_capacity: 16 * 1024 * 1024, // 16MB
            flush_debounce: Duration::from_millis(250),
            batch_threshold: 10_000,
            power_preference: wgpu::PowerPreference::HighPerformance,
        }
    }
}

impl DbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default chunk capacity in bytes
    pub fn default_buffer_capacity(mut self, bytes: u64) -> Self {
        self.default_buffer_capacity = bytes;
        self
    }

    /// Set the flush debounce window
    pub fn flush_debounce(mut self, window: Duration) -> Self {
        self.flush_debounce = window;
        self
    }

    /// Set the batch flush threshold
    pub fn batch_threshold(mut self, entries: usize) -> Self {
        self.batch_threshold = entries;
        self
    }

    /// Set the adapter power preference
    pub fn power_preference(mut self, preference: wgpu::PowerPreference) -> Self {
        self.power_preference = preference;
        self
    }
}

/// Per-store creation options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Payload discipline for every row in the store
    pub data_type: DataType,

    /// Element kind, required for numeric stores
    pub element_kind: Option<ElementKind>,

    /// Chunk capacity for this store; falls back to the database default
    pub buffer_capacity_bytes: Option<u64>,

    /// Fixed slot size for opaque/numeric rows; variable when unset
    pub fixed_row_bytes: Option<u64>,

    /// Expected row budget, used to size companion stores
    pub total_rows: u64,

    /// Sort definitions (JSON stores only)
    pub sort_definitions: Vec<SortDefinition>,
}

impl StoreOptions {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            element_kind: None,
            buffer_capacity_bytes: None,
            fixed_row_bytes: None,
            total_rows: 1024,
            sort_definitions: Vec::new(),
        }
    }

    /// Set the element kind for a numeric store
    pub fn element_kind(mut self, kind: ElementKind) -> Self {
        self.element_kind = Some(kind);
        self
    }

    /// Set the chunk capacity for this store
    pub fn buffer_capacity_bytes(mut self, bytes: u64) -> Self {
        self.buffer_capacity_bytes = Some(bytes);
        self
    }

    /// Fix the slot size for every row
    pub fn fixed_row_bytes(mut self, bytes: u64) -> Self {
        self.fixed_row_bytes = Some(bytes);
        self
    }

    /// Set the expected row budget
    pub fn total_rows(mut self, rows: u64) -> Self {
        self.total_rows = rows;
        self
    }

    /// Add a sort definition
    pub fn sort_definition(mut self, definition: SortDefinition) -> Self {
        self.sort_definitions.push(definition);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.default_buffer_capacity, 16 * 1024 * 1024);
        assert_eq!(config.flush_debounce, Duration::from_millis(250));
        assert_eq!(config.batch_threshold, 10_000);
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new()
            .default_buffer_capacity(1024 * 1024)
            .flush_debounce(Duration::from_millis(50))
            .batch_threshold(100);

        assert_eq!(config.default_buffer_capacity, 1024 * 1024);
        assert_eq!(config.flush_debounce, Duration::from_millis(50));
        assert_eq!(config.batch_threshold, 100);
    }

    #[test]
    fn test_store_options_builder() {
        let options = StoreOptions::new(DataType::Numeric)
            .element_kind(ElementKind::F32)
            .buffer_capacity_bytes(4096)
            .fixed_row_bytes(64)
            .total_rows(10);

        assert_eq!(options.data_type, DataType::Numeric);
        assert_eq!(options.element_kind, Some(ElementKind::F32));
        assert_eq!(options.buffer_capacity_bytes, Some(4096));
        assert_eq!(options.fixed_row_bytes, Some(64));
        assert_eq!(options.total_rows, 10);
        assert!(options.sort_definitions.is_empty());
    }
}
