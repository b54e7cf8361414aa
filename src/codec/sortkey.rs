use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every sort field encodes to exactly this many u32 words, so the device
/// sort can assume one item stride per definition.
pub const WORDS_PER_FIELD: usize = 2;

/// Code point slot marker for strings shorter than the fixed word width.
const NO_CODE_POINT: u32 = u32::MAX;

/// A named multi-field ordering over a JSON store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortDefinition {
    pub name: String,
    pub fields: Vec<SortField>,
}

impl SortDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new() }
    }

    /// Append a sort field
    pub fn field(mut self, field: SortField) -> Self {
        self.fields.push(field);
        self
    }

    /// Total u32 words one record encodes to under this definition.
    pub fn words(&self) -> usize {
        self.fields.len() * WORDS_PER_FIELD
    }
}

/// One field of a sort definition: a dot path, its data kind, and the
/// requested direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub path: String,
    pub kind: FieldKind,
    pub direction: Direction,
}

impl SortField {
    pub fn asc(path: impl Into<String>, kind: FieldKind) -> Self {
        Self { path: path.into(), kind, direction: Direction::Ascending }
    }

    pub fn desc(path: impl Into<String>, kind: FieldKind) -> Self {
        Self { path: path.into(), kind, direction: Direction::Descending }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Number,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Memo caches for one flush window. Dropped after every timed flush.
#[derive(Debug, Default)]
pub struct SortKeyCache {
    strings: HashMap<String, [u32; WORDS_PER_FIELD]>,
    dates: HashMap<String, Option<i64>>,
}

impl SortKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.strings.clear();
        self.dates.clear();
    }
}

/// Resolve a dot path like `user.address.city` inside a document.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Encode one record under a definition: the concatenation of each
/// field's words, in field order.
pub fn encode_record(value: &Value, definition: &SortDefinition, cache: &mut SortKeyCache) -> Vec<u32> {
    let mut words = Vec::with_capacity(definition.words());
    for field in &definition.fields {
        words.extend_from_slice(&encode_field(get_path(value, &field.path), field, cache));
    }
    words
}

/// Encode one field value to its fixed word pair.
pub fn encode_field(
    value: Option<&Value>,
    field: &SortField,
    cache: &mut SortKeyCache,
) -> [u32; WORDS_PER_FIELD] {
    match field.kind {
        FieldKind::String => encode_string(value, field.direction, cache),
        FieldKind::Number => encode_number(value, field.direction),
        FieldKind::Date => encode_date(value, field.direction, cache),
    }
}

/// Descending fields store the complement so the device sorts everything
/// ascending over raw words.
fn oriented(word: u32, direction: Direction) -> u32 {
    match direction {
        Direction::Ascending => word,
        Direction::Descending => !word,
    }
}

/// Word for an absent value or code point slot: sorts first ascending,
/// last descending.
fn fallback(direction: Direction) -> u32 {
    match direction {
        Direction::Ascending => 0,
        Direction::Descending => u32::MAX,
    }
}

fn encode_string(
    value: Option<&Value>,
    direction: Direction,
    cache: &mut SortKeyCache,
) -> [u32; WORDS_PER_FIELD] {
    let Some(Value::String(s)) = value else {
        return [fallback(direction); WORDS_PER_FIELD];
    };

    let points = if let Some(points) = cache.strings.get(s) {
        *points
    } else {
        let mut points = [NO_CODE_POINT; WORDS_PER_FIELD];
        for (slot, c) in points.iter_mut().zip(s.chars()) {
            *slot = c as u32;
        }
        cache.strings.insert(s.clone(), points);
        points
    };

    points.map(|point| {
        if point == NO_CODE_POINT {
            fallback(direction)
        } else {
            oriented(point, direction)
        }
    })
}

/// Split an IEEE-754 double into two orderable words. The sign bit is
/// flipped for non-negatives and all bits for negatives, so unsigned
/// word comparison matches numeric order for every finite value.
fn encode_number(value: Option<&Value>, direction: Direction) -> [u32; WORDS_PER_FIELD] {
    let number = value.and_then(Value::as_f64).filter(|n| n.is_finite());
    let Some(number) = number else {
        return [fallback(direction); WORDS_PER_FIELD];
    };

    let bits = number.to_bits();
    let ordered = if bits & (1u64 << 63) != 0 { !bits } else { bits | (1u64 << 63) };
    split(ordered, direction)
}

fn encode_date(
    value: Option<&Value>,
    direction: Direction,
    cache: &mut SortKeyCache,
) -> [u32; WORDS_PER_FIELD] {
    let millis = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => {
            if let Some(cached) = cache.dates.get(s) {
                *cached
            } else {
                let parsed = parse_date_millis(s);
                cache.dates.insert(s.clone(), parsed);
                parsed
            }
        }
        _ => None,
    };

    let Some(millis) = millis else {
        return [fallback(direction); WORDS_PER_FIELD];
    };

    // Same sign-flip as integers in general, so pre-epoch timestamps
    // still order below the epoch.
    split((millis as u64) ^ (1u64 << 63), direction)
}

fn split(ordered: u64, direction: Direction) -> [u32; WORDS_PER_FIELD] {
    [
        oriented((ordered >> 32) as u32, direction),
        oriented(ordered as u32, direction),
    ]
}

fn parse_date_millis(text: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc).timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asc(kind: FieldKind) -> SortField {
        SortField::asc("x", kind)
    }

    fn desc(kind: FieldKind) -> SortField {
        SortField::desc("x", kind)
    }

    fn words(value: Value, field: &SortField) -> [u32; WORDS_PER_FIELD] {
        let mut cache = SortKeyCache::new();
        encode_field(Some(&value), field, &mut cache)
    }

    #[test]
    fn test_string_ordering() {
        let values = ["", "a", "ab", "b", "ba"];
        let encoded: Vec<_> = values
            .iter()
            .map(|s| words(json!(s), &asc(FieldKind::String)))
            .collect();

        for i in 1..encoded.len() {
            assert!(encoded[i - 1] <= encoded[i], "{:?} !<= {:?}", values[i - 1], values[i]);
        }
    }

    #[test]
    fn test_string_descending_reverses() {
        let a = words(json!("apple"), &desc(FieldKind::String));
        let b = words(json!("banana"), &desc(FieldKind::String));
        assert!(b < a);
    }

    #[test]
    fn test_string_shorter_sorts_first_ascending() {
        let short = words(json!("a"), &asc(FieldKind::String));
        let long = words(json!("ab"), &asc(FieldKind::String));
        assert!(short < long);
    }

    #[test]
    fn test_non_string_falls_back() {
        let missing = {
            let mut cache = SortKeyCache::new();
            encode_field(None, &asc(FieldKind::String), &mut cache)
        };
        assert_eq!(missing, [0, 0]);

        let wrong_type = words(json!(42), &desc(FieldKind::String));
        assert_eq!(wrong_type, [u32::MAX, u32::MAX]);
    }

    #[test]
    fn test_number_ordering_includes_negatives_and_fractions() {
        let values = [-1000.5, -1.0, -0.25, 0.0, 0.25, 1.0, 42.0, 1e12];
        let encoded: Vec<_> = values
            .iter()
            .map(|n| words(json!(n), &asc(FieldKind::Number)))
            .collect();

        for i in 1..encoded.len() {
            assert!(encoded[i - 1] < encoded[i], "{} !< {}", values[i - 1], values[i]);
        }
    }

    #[test]
    fn test_number_descending_reverses() {
        let values = [-3.0, 1.0, 7.5];
        let encoded: Vec<_> = values
            .iter()
            .map(|n| words(json!(n), &desc(FieldKind::Number)))
            .collect();

        assert!(encoded[0] > encoded[1]);
        assert!(encoded[1] > encoded[2]);
    }

    #[test]
    fn test_non_finite_number_falls_back() {
        assert_eq!(words(json!("nan"), &asc(FieldKind::Number)), [0, 0]);
        assert_eq!(words(Value::Null, &asc(FieldKind::Number)), [0, 0]);
    }

    #[test]
    fn test_date_numeric_millis_ordering() {
        let early = words(json!(1_000_000), &asc(FieldKind::Date));
        let late = words(json!(2_000_000), &asc(FieldKind::Date));
        assert!(early < late);
    }

    #[test]
    fn test_date_text_parsing_and_pre_epoch() {
        let before = words(json!("1969-12-31"), &asc(FieldKind::Date));
        let epoch = words(json!(0), &asc(FieldKind::Date));
        let after = words(json!("2024-06-01T12:00:00Z"), &asc(FieldKind::Date));

        assert!(before < epoch);
        assert!(epoch < after);
    }

    #[test]
    fn test_date_unparseable_falls_back() {
        assert_eq!(words(json!("not a date"), &asc(FieldKind::Date)), [0, 0]);
        assert_eq!(
            words(json!("not a date"), &desc(FieldKind::Date)),
            [u32::MAX, u32::MAX]
        );
    }

    #[test]
    fn test_date_parse_is_cached() {
        let mut cache = SortKeyCache::new();
        let value = json!("2024-06-01T12:00:00Z");
        let field = asc(FieldKind::Date);

        let first = encode_field(Some(&value), &field, &mut cache);
        assert_eq!(cache.dates.len(), 1);
        let second = encode_field(Some(&value), &field, &mut cache);
        assert_eq!(first, second);
        assert_eq!(cache.dates.len(), 1);

        cache.clear();
        assert!(cache.dates.is_empty());
    }

    #[test]
    fn test_record_encoding_concatenates_fields_in_order() {
        let definition = SortDefinition::new("by-age-name")
            .field(SortField::asc("age", FieldKind::Number))
            .field(SortField::asc("name", FieldKind::String));
        let mut cache = SortKeyCache::new();

        let record = json!({"age": 30, "name": "ada"});
        let words = encode_record(&record, &definition, &mut cache);

        assert_eq!(words.len(), definition.words());
        assert_eq!(
            &words[..2],
            &encode_field(Some(&json!(30)), &definition.fields[0], &mut cache)
        );
        assert_eq!(
            &words[2..],
            &encode_field(Some(&json!("ada")), &definition.fields[1], &mut cache)
        );
    }

    #[test]
    fn test_record_ordering_matches_host_sort() {
        let definition = SortDefinition::new("by-age-name")
            .field(SortField::asc("age", FieldKind::Number))
            .field(SortField::asc("name", FieldKind::String));
        let mut cache = SortKeyCache::new();

        let mut records = vec![
            json!({"age": 41, "name": "eve"}),
            json!({"age": 30, "name": "bob"}),
            json!({"age": 30, "name": "ada"}),
            json!({"age": 7, "name": "zed"}),
        ];
        records.sort_by_key(|r| encode_record(r, &definition, &mut cache));

        let names: Vec<_> = records.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, ["zed", "ada", "bob", "eve"]);
    }

    #[test]
    fn test_dot_path_resolution() {
        let doc = json!({"user": {"address": {"city": "kigali"}}});
        assert_eq!(get_path(&doc, "user.address.city"), Some(&json!("kigali")));
        assert_eq!(get_path(&doc, "user.missing"), None);
    }
}
