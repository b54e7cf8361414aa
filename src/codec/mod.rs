pub mod format;
pub mod sortkey;

use serde::{Deserialize, Serialize};

use crate::errdata;
use crate::error::{Error, Result};

/// Device rows are stored at 4-byte granularity; payloads are padded up
/// on write so every row length is a word multiple.
pub const LENGTH_ALIGN: usize = 4;

/// Payload discipline of a store, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Raw byte blobs, zero-padded to a word multiple.
    Opaque,
    /// Homogeneous numeric arrays of a declared element kind.
    Numeric,
    /// JSON documents, stored as canonical text.
    Json,
}

/// Element kind of a numeric store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    F32,
    F64,
    I32,
    U32,
    U8,
}

impl ElementKind {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            ElementKind::F32 | ElementKind::I32 | ElementKind::U32 => 4,
            ElementKind::F64 => 8,
            ElementKind::U8 => 1,
        }
    }
}

/// A numeric array payload: a declared element kind plus its raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    kind: ElementKind,
    bytes: Vec<u8>,
}

impl NumericArray {
    pub fn from_f32(values: &[f32]) -> Self {
        Self { kind: ElementKind::F32, bytes: bytemuck::cast_slice(values).to_vec() }
    }

    pub fn from_f64(values: &[f64]) -> Self {
        Self { kind: ElementKind::F64, bytes: bytemuck::cast_slice(values).to_vec() }
    }

    pub fn from_i32(values: &[i32]) -> Self {
        Self { kind: ElementKind::I32, bytes: bytemuck::cast_slice(values).to_vec() }
    }

    pub fn from_u32(values: &[u32]) -> Self {
        Self { kind: ElementKind::U32, bytes: bytemuck::cast_slice(values).to_vec() }
    }

    pub fn from_u8(values: &[u8]) -> Self {
        Self { kind: ElementKind::U8, bytes: values.to_vec() }
    }

    /// Reconstruct an array from device bytes. The byte length must land
    /// on an element boundary.
    pub fn from_bytes(kind: ElementKind, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() % kind.size_bytes() != 0 {
            return errdata!(
                "{} bytes do not align to {:?} elements",
                bytes.len(),
                kind
            );
        }
        Ok(Self { kind, bytes })
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.size_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        self.view(ElementKind::F32)
    }

    pub fn as_f64(&self) -> Result<&[f64]> {
        self.view(ElementKind::F64)
    }

    pub fn as_i32(&self) -> Result<&[i32]> {
        self.view(ElementKind::I32)
    }

    pub fn as_u32(&self) -> Result<&[u32]> {
        self.view(ElementKind::U32)
    }

    fn view<T: bytemuck::Pod>(&self, kind: ElementKind) -> Result<&[T]> {
        if self.kind != kind {
            return Err(Error::TypeMismatch(format!(
                "array holds {:?} elements, viewed as {:?}",
                self.kind, kind
            )));
        }
        bytemuck::try_cast_slice(&self.bytes).map_err(|e| Error::InvalidData(e.to_string()))
    }
}

/// A typed store value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Numeric(NumericArray),
    Json(serde_json::Value),
}

impl Payload {
    pub fn json(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&NumericArray> {
        match self {
            Payload::Numeric(array) => Some(array),
            _ => None,
        }
    }
}

/// Right-pad to the next word boundary with the given fill byte.
fn pad_to_word(mut bytes: Vec<u8>, fill: u8) -> Vec<u8> {
    let rem = bytes.len() % LENGTH_ALIGN;
    if rem != 0 {
        bytes.resize(bytes.len() + (LENGTH_ALIGN - rem), fill);
    }
    bytes
}

/// Encode a payload for the given store discipline. The result length is
/// always a multiple of [`LENGTH_ALIGN`].
pub fn encode(
    payload: &Payload,
    data_type: DataType,
    element_kind: Option<ElementKind>,
) -> Result<Vec<u8>> {
    match (data_type, payload) {
        (DataType::Opaque, Payload::Bytes(bytes)) => Ok(pad_to_word(bytes.clone(), 0)),
        (DataType::Numeric, Payload::Numeric(array)) => {
            let declared = element_kind
                .ok_or_else(|| Error::MissingElementKind("numeric store".to_string()))?;
            if array.kind() != declared {
                return Err(Error::TypeMismatch(format!(
                    "store expects {:?} elements, payload holds {:?}",
                    declared,
                    array.kind()
                )));
            }
            Ok(pad_to_word(array.as_bytes().to_vec(), 0))
        }
        (DataType::Json, Payload::Json(value)) => {
            // Canonical text, space-padded so the trailing fill trims away
            // on decode.
            let text = serde_json::to_string(value)?;
            Ok(pad_to_word(text.into_bytes(), b' '))
        }
        (expected, _) => Err(Error::TypeMismatch(format!(
            "store holds {expected:?} payloads"
        ))),
    }
}

/// Decode device bytes back into a payload.
pub fn decode(
    bytes: &[u8],
    data_type: DataType,
    element_kind: Option<ElementKind>,
) -> Result<Payload> {
    match data_type {
        DataType::Opaque => Ok(Payload::Bytes(bytes.to_vec())),
        DataType::Numeric => {
            let kind = element_kind
                .ok_or_else(|| Error::MissingElementKind("numeric store".to_string()))?;
            Ok(Payload::Numeric(NumericArray::from_bytes(
                kind,
                bytes.to_vec(),
            )?))
        }
        DataType::Json => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::InvalidData(format!("non-utf8 document bytes: {e}")))?;
            let trimmed = text.trim_end_matches(' ');
            if trimmed.is_empty() {
                return errdata!("empty document bytes");
            }
            Ok(Payload::Json(serde_json::from_str(trimmed)?))
        }
    }
}
