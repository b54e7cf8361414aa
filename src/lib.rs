pub mod alloc;
pub mod codec;
pub mod config;
pub mod db;
pub mod device;
pub mod directory;
pub mod error;
pub mod flush;
pub mod reader;
pub mod sort;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use codec::sortkey::{Direction, FieldKind, SortDefinition, SortField};
pub use codec::{DataType, ElementKind, NumericArray, Payload};
pub use config::{DbConfig, StoreOptions};
pub use db::{Cursor, CursorOptions, CursorRange, Database};
pub use error::{Error, Result};
