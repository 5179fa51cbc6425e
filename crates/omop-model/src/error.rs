use thiserror::Error;

use crate::schema::ColumnType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid trial identifier: {0:?}")]
    InvalidTrialId(String),
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),
    #[error("invalid column name: {0:?}")]
    InvalidColumnName(String),
    #[error("invalid target table reference: {0:?}")]
    InvalidTarget(String),
    #[error("cannot coerce {raw:?} to {column_type}: {message}")]
    Coercion {
        raw: String,
        column_type: ColumnType,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ModelError>;
