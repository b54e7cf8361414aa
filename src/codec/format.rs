//! Formats keys and payload bytes for log output. Payload bytes are
//! device data and may be arbitrary binary; log lines get an escaped,
//! bounded preview rather than the raw buffer.

use itertools::Itertools as _;

/// Longest payload preview emitted into a log line, in source bytes.
const PREVIEW_LIMIT: usize = 64;

/// Formats keys and payloads for log lines.
pub trait Formatter {
    /// Formats a key.
    fn key(key: &str) -> String;

    /// Formats payload bytes.
    fn payload(bytes: &[u8]) -> String;

    /// Formats a key/payload pair.
    fn entry(key: &str, bytes: &[u8]) -> String {
        format!("{} = {}", Self::key(key), Self::payload(bytes))
    }
}

/// Formats payloads as escaped ASCII previews without any decoding.
pub struct Raw;

impl Raw {
    /// Escapes bytes as printable ASCII, truncating long buffers.
    pub fn bytes(bytes: &[u8]) -> String {
        let truncated = bytes.len() > PREVIEW_LIMIT;
        let shown = &bytes[..bytes.len().min(PREVIEW_LIMIT)];
        let escaped = shown
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        let suffix = if truncated {
            format!("… ({} bytes)", bytes.len())
        } else {
            String::new()
        };
        format!("\"{}\"{}", String::from_utf8_lossy(&escaped), suffix)
    }
}

impl Formatter for Raw {
    fn key(key: &str) -> String {
        key.to_string()
    }

    fn payload(bytes: &[u8]) -> String {
        Self::bytes(bytes)
    }
}
