// Copyright © 2025 Flowbench

use std::any::Any;
use std::error;
use std::result;

use arcstr::ArcStr;

use super::value::{RowKey, Type};

#[allow(clippy::module_name_repetitions)]
pub type DynError = Box<dyn error::Error + Send + Sync>;
pub type DynResult<T> = result::Result<T, DynError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("execution canceled")]
    Canceled,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("invalid table handle")]
    InvalidTableHandle,

    #[error("table already disposed")]
    AlreadyDisposed,

    #[error("table is not owned by the calling node")]
    NotOwner,

    #[error("table is still registered in the workflow repository")]
    AlreadyPublished,

    #[error("cannot concatenate an empty list of tables")]
    EmptyTableList,

    #[error("duplicate row key: {0}")]
    DuplicateRowKey(RowKey),

    #[error("duplicate column name: {0}")]
    DuplicateColumnName(ArcStr),

    #[error("tables have different numbers of rows")]
    RowCountMismatch,

    #[error("row order mismatch: expected key {expected}, got {actual}")]
    RowOrderMismatch { expected: RowKey, actual: RowKey },

    #[error("column count mismatch: expected {expected}, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("column type mismatch in {column}: expected {expected}, got {actual}")]
    ColumnTypeMismatch {
        column: ArcStr,
        expected: Type,
        actual: Type,
    },

    #[error("value does not match the column type")]
    TypeMismatch,

    #[error("wrong number of outputs: expected {expected}, got {actual}")]
    WrongOutputCount { expected: usize, actual: usize },

    #[error("missing output at port {0}")]
    MissingOutput(usize),

    #[error("output at port {0} does not match the declared port type")]
    OutputTypeMismatch(usize),

    #[error("scope end reached without a matching scope start")]
    MissingScopeStart,

    #[error("port objects holding tables must not be copied")]
    TableCopyNotSupported,

    #[error("invalid file store name: {0}")]
    InvalidFileStoreName(String),

    #[error("duplicate file store name: {0}")]
    DuplicateFileStoreName(String),

    #[error("worker panic: {0}")]
    WorkerPanic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("row serialization failed: {0}")]
    RowSerialization(#[from] bincode::Error),

    #[error(transparent)]
    Other(DynError),
}

impl Error {
    pub fn from_panic_payload(panic_payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = match panic_payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(panic_payload) => match panic_payload.downcast::<String>() {
                Ok(message) => *message,
                Err(panic_payload) => format!("{panic_payload:?}"),
            },
        };
        Self::WorkerPanic(message)
    }

    pub fn downcast<E: error::Error + 'static>(self) -> Result<E, Self> {
        match self {
            Self::Other(inner) => match inner.downcast::<E>() {
                Ok(error) => Ok(*error),
                Err(other) => Err(Self::Other(other)),
            },
            other => Err(other),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<DynError> for Error {
    fn from(value: DynError) -> Self {
        match value.downcast::<Self>() {
            Ok(this) => *this,
            Err(other) => Self::Other(other),
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;
