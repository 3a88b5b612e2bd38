use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::{TupleError, TupleResult};
use super::value::{Field, FieldType};

/// One named, typed field of a tuple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDesc {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

impl FromStr for FieldDesc {
    type Err = TupleError;

    /// Parses `name:type`, with a trailing `?` on the type marking it nullable
    /// (e.g. `score:float?`)
    fn from_str(s: &str) -> TupleResult<Self> {
        let (name, ty) = s
            .split_once(':')
            .ok_or_else(|| TupleError::SchemaMismatch(format!("expected name:type, got '{}'", s)))?;
        let (ty, nullable) = match ty.trim().strip_suffix('?') {
            Some(ty) => (ty, true),
            None => (ty, false),
        };
        Ok(Self {
            name: name.trim().to_string(),
            field_type: ty.parse()?,
            nullable,
        })
    }
}

/// Schema of a table: the fixed-length layout every tuple on its pages uses.
///
/// A serialized tuple is `[null bitmap][field 0][field 1]...` where the
/// bitmap holds one bit per field (set = NULL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    fields: Vec<FieldDesc>,
    null_bitmap_size: usize,
    tuple_size: usize,
}

impl TupleDesc {
    pub fn new(fields: Vec<FieldDesc>) -> Self {
        let null_bitmap_size = fields.len().div_ceil(8);
        let tuple_size =
            null_bitmap_size + fields.iter().map(|f| f.field_type.size()).sum::<usize>();

        Self {
            fields,
            null_bitmap_size,
            tuple_size,
        }
    }

    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn null_bitmap_size(&self) -> usize {
        self.null_bitmap_size
    }

    /// Size in bytes of one serialized tuple (one page slot)
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    /// Check that `values` can be stored under this schema
    pub fn validate(&self, values: &[Field]) -> TupleResult<()> {
        if values.len() != self.fields.len() {
            return Err(TupleError::SchemaMismatch(format!(
                "expected {} fields, got {}",
                self.fields.len(),
                values.len()
            )));
        }

        for (value, desc) in values.iter().zip(&self.fields) {
            if value.is_null() && !desc.nullable {
                return Err(TupleError::NullConstraintViolation(desc.name.clone()));
            }
            if !value.conforms_to(desc.field_type) {
                return Err(TupleError::TypeMismatch {
                    expected: desc.field_type.to_string(),
                    actual: format!("{:?}", value),
                });
            }
            if let (Field::Str(s), FieldType::Char(max_len)) = (value, desc.field_type)
                && s.len() > max_len
            {
                return Err(TupleError::Serialization(format!(
                    "value for '{}' is {} bytes, {} holds at most {}",
                    desc.name,
                    s.len(),
                    desc.field_type,
                    max_len
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> TupleDesc {
        TupleDesc::new(vec![
            FieldDesc::new("id", FieldType::Int),
            FieldDesc::new("name", FieldType::Char(15)),
            FieldDesc::new("score", FieldType::Float).nullable(),
        ])
    }

    #[test]
    fn test_tuple_size() {
        let desc = people();
        assert_eq!(desc.null_bitmap_size(), 1);
        assert_eq!(desc.tuple_size(), 1 + 4 + 15 + 8);
        assert_eq!(desc.field_index("score"), Some(2));
        assert_eq!(desc.field_index("missing"), None);
    }

    #[test]
    fn test_validate() {
        let desc = people();
        assert!(
            desc.validate(&[Field::Int(1), Field::Str("ann".into()), Field::Null])
                .is_ok()
        );
        assert!(matches!(
            desc.validate(&[Field::Null, Field::Str("ann".into()), Field::Null]),
            Err(TupleError::NullConstraintViolation(_))
        ));
        assert!(matches!(
            desc.validate(&[Field::Int(1), Field::Int(2), Field::Null]),
            Err(TupleError::TypeMismatch { .. })
        ));
        assert!(matches!(
            desc.validate(&[Field::Int(1)]),
            Err(TupleError::SchemaMismatch(_))
        ));
        assert!(matches!(
            desc.validate(&[Field::Int(1), Field::Str("x".repeat(16)), Field::Null]),
            Err(TupleError::Serialization(_))
        ));
    }

    #[test]
    fn test_parse_field_desc() {
        let desc: FieldDesc = "score:float?".parse().unwrap();
        assert_eq!(desc.name, "score");
        assert_eq!(desc.field_type, FieldType::Float);
        assert!(desc.nullable);

        let desc: FieldDesc = "name : char(10)".parse().unwrap();
        assert_eq!(desc.field_type, FieldType::Char(10));
        assert!(!desc.nullable);

        assert!("nocolon".parse::<FieldDesc>().is_err());
    }
}
