// Dataref value representation and wire conversion.
//
// The wire carries scalars and arrays as plain JSON; `data`-typed
// payloads are base64-encoded strings in both directions.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use xpkit_api::DatarefType;

/// A typed dataref value.
#[derive(Debug, Clone, PartialEq)]
pub enum DatarefValue {
    Int(i64),
    Float(f64),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    /// Opaque byte payload (base64-decoded).
    Data(Vec<u8>),
}

impl DatarefValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of a `Data` payload, with embedded NULs stripped.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Data(bytes) => Some(
                String::from_utf8_lossy(bytes)
                    .chars()
                    .filter(|&c| c != '\u{0}')
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatarefValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::IntArray(v) => write!(f, "{v:?}"),
            Self::FloatArray(v) => write!(f, "{v:?}"),
            Self::Data(bytes) => match self.as_text() {
                Some(text) => write!(f, "{text}"),
                None => write!(f, "<{} bytes>", bytes.len()),
            },
        }
    }
}

/// Parse a raw wire value according to the dataref's declared type.
pub(crate) fn parse_value(
    value_type: DatarefType,
    raw: &serde_json::Value,
) -> Result<DatarefValue, String> {
    match value_type {
        DatarefType::Int => raw
            .as_i64()
            .map(DatarefValue::Int)
            .ok_or_else(|| format!("expected int, got {raw}")),
        DatarefType::Float | DatarefType::Double => raw
            .as_f64()
            .map(DatarefValue::Float)
            .ok_or_else(|| format!("expected float, got {raw}")),
        DatarefType::IntArray => raw
            .as_array()
            .and_then(|a| a.iter().map(serde_json::Value::as_i64).collect())
            .map(DatarefValue::IntArray)
            .ok_or_else(|| format!("expected int array, got {raw}")),
        DatarefType::FloatArray => raw
            .as_array()
            .and_then(|a| a.iter().map(serde_json::Value::as_f64).collect())
            .map(DatarefValue::FloatArray)
            .ok_or_else(|| format!("expected float array, got {raw}")),
        DatarefType::Data => raw
            .as_str()
            .ok_or_else(|| format!("expected base64 string, got {raw}"))
            .and_then(|s| {
                BASE64
                    .decode(s)
                    .map(DatarefValue::Data)
                    .map_err(|e| format!("bad base64 payload: {e}"))
            }),
    }
}

/// Parse a single element of an array-typed dataref.
pub(crate) fn parse_array_element(
    value_type: DatarefType,
    raw: &serde_json::Value,
) -> Result<DatarefValue, String> {
    match value_type {
        DatarefType::IntArray => parse_value(DatarefType::Int, raw),
        DatarefType::FloatArray => parse_value(DatarefType::Float, raw),
        other => Err(format!("{other} is not an array type")),
    }
}

/// Encode a value for the wire. `Data` payloads become base64 strings.
pub(crate) fn value_to_wire(value: &DatarefValue) -> serde_json::Value {
    match value {
        DatarefValue::Int(v) => serde_json::json!(v),
        DatarefValue::Float(v) => serde_json::json!(v),
        DatarefValue::IntArray(v) => serde_json::json!(v),
        DatarefValue::FloatArray(v) => serde_json::json!(v),
        DatarefValue::Data(bytes) => serde_json::json!(BASE64.encode(bytes)),
    }
}
