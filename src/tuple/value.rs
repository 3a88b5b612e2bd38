use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{TupleError, TupleResult};

/// Fixed-width type of a tuple field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,         // 4 bytes
    Float,       // 8 bytes
    Char(usize), // n bytes, NUL padded
}

impl FieldType {
    /// Get the on-page width of this type in bytes
    pub fn size(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Float => 8,
            FieldType::Char(n) => *n,
        }
    }
}

impl FromStr for FieldType {
    type Err = TupleError;

    /// Parses `int`, `float` or `char(n)` (case-insensitive)
    fn from_str(s: &str) -> TupleResult<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "int" | "integer" => Ok(FieldType::Int),
            "float" | "double" => Ok(FieldType::Float),
            _ => lower
                .strip_prefix("char(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|n| n.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
                .map(FieldType::Char)
                .ok_or_else(|| TupleError::SchemaMismatch(format!("unknown field type '{}'", s))),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Float => write!(f, "float"),
            FieldType::Char(n) => write!(f, "char({})", n),
        }
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i32),
    Float(f64),
    Str(String),
    Null,
}

impl Field {
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// Whether this value can be stored in a field of type `field_type`
    pub fn conforms_to(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (Field::Null, _)
                | (Field::Int(_), FieldType::Int)
                | (Field::Float(_), FieldType::Float)
                | (Field::Str(_), FieldType::Char(_))
        )
    }

    /// Parse a textual value for the given type; `null` (any case) yields NULL
    pub fn parse(text: &str, field_type: FieldType) -> TupleResult<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("null") {
            return Ok(Field::Null);
        }

        let parse_err = || TupleError::TypeMismatch {
            expected: field_type.to_string(),
            actual: format!("'{}'", trimmed),
        };

        match field_type {
            FieldType::Int => trimmed.parse().map(Field::Int).map_err(|_| parse_err()),
            FieldType::Float => trimmed.parse().map(Field::Float).map_err(|_| parse_err()),
            FieldType::Char(_) => Ok(Field::Str(text.to_string())),
        }
    }

    /// Encode into `out`, which must be exactly `field_type.size()` bytes.
    /// NULL is written as zeros; the null bitmap of the tuple records it.
    pub fn encode_into(&self, field_type: FieldType, out: &mut [u8]) -> TupleResult<()> {
        debug_assert_eq!(out.len(), field_type.size());
        match (self, field_type) {
            (Field::Int(i), FieldType::Int) => out.copy_from_slice(&i.to_le_bytes()),
            (Field::Float(v), FieldType::Float) => out.copy_from_slice(&v.to_le_bytes()),
            (Field::Str(s), FieldType::Char(max_len)) => {
                let bytes = s.as_bytes();
                if bytes.len() > max_len {
                    return Err(TupleError::Serialization(format!(
                        "string of {} bytes exceeds char({})",
                        bytes.len(),
                        max_len
                    )));
                }
                out[..bytes.len()].copy_from_slice(bytes);
                out[bytes.len()..].fill(0);
            }
            (Field::Null, _) => out.fill(0),
            (value, ty) => {
                return Err(TupleError::TypeMismatch {
                    expected: ty.to_string(),
                    actual: format!("{:?}", value),
                });
            }
        }
        Ok(())
    }

    /// Decode a field previously written by [`Field::encode_into`]
    pub fn decode(bytes: &[u8], field_type: FieldType, is_null: bool) -> TupleResult<Self> {
        if bytes.len() != field_type.size() {
            return Err(TupleError::Deserialization(format!(
                "expected {} bytes for {}, got {}",
                field_type.size(),
                field_type,
                bytes.len()
            )));
        }
        if is_null {
            return Ok(Field::Null);
        }

        match field_type {
            FieldType::Int => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                Ok(Field::Int(i32::from_le_bytes(buf)))
            }
            FieldType::Float => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok(Field::Float(f64::from_le_bytes(buf)))
            }
            FieldType::Char(_) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                String::from_utf8(bytes[..end].to_vec())
                    .map(Field::Str)
                    .map_err(|e| TupleError::Deserialization(format!("invalid UTF-8: {}", e)))
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(i) => write!(f, "{}", i),
            Field::Float(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
            Field::Null => write!(f, "NULL"),
        }
    }
}
