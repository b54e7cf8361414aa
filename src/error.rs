use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// vramdb errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The named store does not exist.
    NoSuchStore(String),
    /// A store with this name already exists.
    DuplicateStore(String),
    /// `add` was called for a key that already has an active row.
    DuplicateKey(String),
    /// A numeric store was created without an element kind.
    MissingElementKind(String),
    /// The payload does not match the store's declared data discipline.
    TypeMismatch(String),
    /// Invalid user input, typically malformed arguments or patterns.
    InvalidInput(String),
    /// Invalid data, typically decoding errors or corrupted device bytes.
    InvalidData(String),
    /// The sort items for a definition exceed the device's storage binding
    /// limit. The previous order is retained.
    SortBudgetExceeded { definition: String, bytes: u64 },
    /// A GPU device failure. Fatal: the pending queue is preserved and
    /// readiness stays false.
    Device(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NoSuchStore(name) => write!(f, "no such store: {name}"),
            Error::DuplicateStore(name) => write!(f, "store already exists: {name}"),
            Error::DuplicateKey(key) => write!(f, "key already has an active row: {key}"),
            Error::MissingElementKind(name) => {
                write!(f, "numeric store {name} requires an element kind")
            }
            Error::TypeMismatch(msg) => write!(f, "payload type mismatch: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::SortBudgetExceeded { definition, bytes } => {
                write!(
                    f,
                    "sort items for {definition} need {bytes} bytes, over device limit"
                )
            }
            Error::Device(msg) => write!(f, "device error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidData for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::InvalidData(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidInput for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)).into() };
}

/// A vramdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<wgpu::BufferAsyncError> for Error {
    fn from(err: wgpu::BufferAsyncError) -> Self {
        Error::Device(err.to_string())
    }
}

impl From<wgpu::RequestDeviceError> for Error {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        Error::Device(err.to_string())
    }
}
