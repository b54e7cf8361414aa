use regex::Regex;

use crate::codec::format::Raw;
use crate::codec::Payload;
use crate::device::GpuDevice;
use crate::error::{Error, Result};
use crate::store::Store;

/// Keys containing any of these are treated as wildcard patterns rather
/// than literal lookups.
const WILDCARD_MARKS: [char; 4] = ['%', '_', '[', ']'];

pub fn is_wildcard(key: &str) -> bool {
    key.contains(WILDCARD_MARKS)
}

/// Translate a wildcard pattern to an anchored regular expression:
/// `%` matches any run, `_` one character, bracket classes pass through,
/// every other metacharacter is escaped.
pub fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            '[' => {
                source.push('[');
                for inner in chars.by_ref() {
                    source.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }

    source.push('$');
    Regex::new(&source).map_err(|e| Error::InvalidInput(format!("bad key pattern {pattern}: {e}")))
}

/// Expand the caller's key list in place: literal keys pass through,
/// wildcard patterns expand to every matching live key in the store's
/// enumeration order.
pub fn expand_keys(requested: &[String], live_keys: &[String]) -> Result<Vec<String>> {
    let mut expanded = Vec::with_capacity(requested.len());
    for key in requested {
        if is_wildcard(key) {
            let matcher = wildcard_regex(key)?;
            expanded.extend(live_keys.iter().filter(|k| matcher.is_match(k)).cloned());
        } else {
            expanded.push(key.clone());
        }
    }
    Ok(expanded)
}

/// Read a batch of keys in two device phases: scattered rows are copied
/// into one gather buffer, the gather buffer into a host-mappable
/// staging buffer, and a single map yields every payload. Position `i`
/// of the result corresponds to `keys[i]`; keys without an active row
/// stay None.
pub async fn read_rows(
    device: &GpuDevice,
    store: &Store,
    keys: &[String],
) -> Result<Vec<Option<Payload>>> {
    let rows: Vec<_> = keys
        .iter()
        .map(|key| store.directory.active_row(key).cloned())
        .collect();

    let total: u64 = rows.iter().flatten().map(|row| row.length).sum();
    if total == 0 {
        // Nothing on the device to copy; resolve empty rows host-side.
        return rows
            .iter()
            .map(|row| row.as_ref().map(|_| store.decode(&[])).transpose())
            .collect();
    }

    let gather = device.create_gather(total);
    let mut encoder = device
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("vramdb-gather-encoder"),
        });
    let mut cursor = 0u64;
    for row in rows.iter().flatten() {
        if row.length == 0 {
            continue;
        }
        let chunk = store.chunks.chunk(row.chunk_index);
        encoder.copy_buffer_to_buffer(&chunk.buffer, row.offset, &gather, cursor, row.length);
        cursor += row.length;
    }
    device.submit(encoder);

    let staging = device.create_staging(total);
    let mut encoder = device
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("vramdb-staging-encoder"),
        });
    encoder.copy_buffer_to_buffer(&gather, 0, &staging, 0, total);
    device.submit(encoder);
    device.await_queue();

    let bytes = device.read_back(&staging)?;
    gather.destroy();
    staging.destroy();

    let mut cursor = 0usize;
    rows.iter()
        .zip(keys)
        .map(|(row, key)| {
            let Some(row) = row else {
                return Ok(None);
            };
            let slice = &bytes[cursor..cursor + row.length as usize];
            cursor += row.length as usize;
            match store.decode(slice) {
                Ok(value) => Ok(Some(value)),
                // Decode failures mean the device bytes are corrupt.
                Err(e) => {
                    tracing::error!(
                        store = %store.name,
                        key = %key,
                        payload = %Raw::bytes(slice),
                        "row decode failed"
                    );
                    Err(e)
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_wildcard_detection() {
        assert!(is_wildcard("user:%"));
        assert!(is_wildcard("user:_"));
        assert!(is_wildcard("user:[12]"));
        assert!(!is_wildcard("user:1"));
    }

    #[test]
    fn test_percent_matches_any_run() {
        let re = wildcard_regex("user:%").unwrap();
        assert!(re.is_match("user:1"));
        assert!(re.is_match("user:10"));
        assert!(re.is_match("user:"));
        assert!(!re.is_match("admin:1"));
    }

    #[test]
    fn test_underscore_matches_one_character() {
        let re = wildcard_regex("user:_").unwrap();
        assert!(re.is_match("user:1"));
        assert!(!re.is_match("user:10"));
        assert!(!re.is_match("user:"));
    }

    #[test]
    fn test_bracket_class_passes_through() {
        let re = wildcard_regex("user:[13]").unwrap();
        assert!(re.is_match("user:1"));
        assert!(re.is_match("user:3"));
        assert!(!re.is_match("user:2"));
    }

    #[test]
    fn test_metacharacters_are_escaped() {
        let re = wildcard_regex("a.b%").unwrap();
        assert!(re.is_match("a.b"));
        assert!(re.is_match("a.b-suffix"));
        assert!(!re.is_match("axb"));

        let re = wildcard_regex("v(1)_").unwrap();
        assert!(re.is_match("v(1)x"));
    }

    #[test]
    fn test_match_is_full_string() {
        let re = wildcard_regex("user:_").unwrap();
        assert!(!re.is_match("xuser:1"));
        assert!(!re.is_match("user:1x"));
    }

    #[test]
    fn test_expand_keys_in_place() {
        let keys = live(&["user:1", "user:2", "user:10", "admin:1"]);

        let expanded =
            expand_keys(&live(&["admin:1", "user:%"]), &keys).unwrap();
        assert_eq!(expanded, live(&["admin:1", "user:1", "user:2", "user:10"]));

        let expanded = expand_keys(&live(&["user:_"]), &keys).unwrap();
        assert_eq!(expanded, live(&["user:1", "user:2"]));
    }

    #[test]
    fn test_expand_keys_without_wildcards_passes_through() {
        let keys = live(&["a", "b"]);
        let expanded = expand_keys(&live(&["b", "missing"]), &keys).unwrap();
        assert_eq!(expanded, live(&["b", "missing"]));
    }
}
