use thiserror::Error;

#[derive(Debug, Error)]
pub enum TupleError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("NULL value for non-nullable field: {0}")]
    NullConstraintViolation(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type TupleResult<T> = Result<T, TupleError>;
