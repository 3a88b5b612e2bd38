mod error;
mod schema;
mod value;

pub use error::{TupleError, TupleResult};
pub use schema::{FieldDesc, TupleDesc};
pub use value::{Field, FieldType};

use crate::storage::RecordId;

/// A row of field values, optionally tagged with where it is stored
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            record_id: None,
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Write this tuple into `out` (exactly `desc.tuple_size()` bytes)
    pub fn serialize_into(&self, desc: &TupleDesc, out: &mut [u8]) -> TupleResult<()> {
        desc.validate(&self.fields)?;
        if out.len() != desc.tuple_size() {
            return Err(TupleError::Serialization(format!(
                "slot is {} bytes, tuple needs {}",
                out.len(),
                desc.tuple_size()
            )));
        }

        let (bitmap, mut rest) = out.split_at_mut(desc.null_bitmap_size());
        bitmap.fill(0);
        for (i, (value, field)) in self.fields.iter().zip(desc.fields()).enumerate() {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
            let (chunk, tail) = rest.split_at_mut(field.field_type.size());
            value.encode_into(field.field_type, chunk)?;
            rest = tail;
        }

        Ok(())
    }

    /// Read a tuple written by [`Tuple::serialize_into`]
    pub fn deserialize(data: &[u8], desc: &TupleDesc) -> TupleResult<Self> {
        if data.len() != desc.tuple_size() {
            return Err(TupleError::Deserialization(format!(
                "expected {} bytes, got {}",
                desc.tuple_size(),
                data.len()
            )));
        }

        let (bitmap, mut rest) = data.split_at(desc.null_bitmap_size());
        let mut fields = Vec::with_capacity(desc.num_fields());
        for (i, field) in desc.fields().iter().enumerate() {
            let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
            let (chunk, tail) = rest.split_at(field.field_type.size());
            fields.push(Field::decode(chunk, field.field_type, is_null)?);
            rest = tail;
        }

        Ok(Self::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> TupleDesc {
        TupleDesc::new(vec![
            FieldDesc::new("id", FieldType::Int),
            FieldDesc::new("name", FieldType::Char(10)).nullable(),
            FieldDesc::new("score", FieldType::Float).nullable(),
        ])
    }

    #[test]
    fn test_serialize_layout() {
        let desc = desc();
        let tuple = Tuple::new(vec![
            Field::Int(258),
            Field::Null,
            Field::Float(1.5),
        ]);
        let mut buf = vec![0xaau8; desc.tuple_size()];
        tuple.serialize_into(&desc, &mut buf).unwrap();

        // bit 1 set: field 1 is NULL
        assert_eq!(buf[0], 0b0000_0010);
        assert_eq!(&buf[1..5], &258i32.to_le_bytes());
        assert!(buf[5..15].iter().all(|&b| b == 0));
        assert_eq!(&buf[15..23], &1.5f64.to_le_bytes());

        let back = Tuple::deserialize(&buf, &desc).unwrap();
        assert_eq!(back.fields(), tuple.fields());
        assert_eq!(back.record_id(), None);
    }

    #[test]
    fn test_serialize_rejects_invalid_tuple() {
        let desc = desc();
        let mut buf = vec![0u8; desc.tuple_size()];
        let bad = Tuple::new(vec![Field::Null, Field::Null, Field::Null]);
        assert!(matches!(
            bad.serialize_into(&desc, &mut buf),
            Err(TupleError::NullConstraintViolation(_))
        ));

        let mut short = vec![0u8; desc.tuple_size() - 1];
        let ok = Tuple::new(vec![Field::Int(1), Field::Null, Field::Null]);
        assert!(matches!(
            ok.serialize_into(&desc, &mut short),
            Err(TupleError::Serialization(_))
        ));
    }
}
