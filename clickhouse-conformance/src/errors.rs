use std::str::Utf8Error;
use std::string::FromUtf8Error;

use strum::{AsRefStr, Display};

use crate::native::ServerError;

/// Represents the errors any client operation or harness helper can surface.
///
/// `DeadlineExceeded` and `Cancelled` are unit variants so they act as sentinels: an operation
/// whose context has expired returns exactly that variant, never a wrapped form of it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connect error: {0}")]
    Connect(String),
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("context canceled")]
    Cancelled,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("Exception({0})")]
    Server(ServerError),
    #[error("arity mismatch: expected {expected} values, got {provided}")]
    ArityMismatch { expected: usize, provided: usize },
    #[error("type mismatch: expected {expected}, provided {provided}")]
    TypeMismatch { expected: String, provided: String },
    #[error("type mismatch for column {column}: expected {expected}, provided {provided}")]
    ColumnTypeMismatch { column: String, expected: String, provided: String },
    #[error("no rows in result set")]
    NoRows,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("client is closed")]
    Closed,
    #[error("str utf-8 conversion error: {0}")]
    Utf8(#[from] Utf8Error),
    #[error("string utf-8 conversion error: {0}")]
    FromUtf8(#[from] FromUtf8Error),
}

/// Comparable classification of an [`Error`].
///
/// The assertion utility compares errors by kind, never by message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum ErrorKind {
    Configuration,
    Connect,
    DeadlineExceeded,
    Cancelled,
    Protocol,
    Server,
    ArityMismatch,
    TypeMismatch,
    NoRows,
    InvalidArgument,
    Closed,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Connect(_) => ErrorKind::Connect,
            Error::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Protocol(_) | Error::Utf8(_) | Error::FromUtf8(_) => ErrorKind::Protocol,
            Error::Server(_) => ErrorKind::Server,
            Error::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            Error::TypeMismatch { .. } | Error::ColumnTypeMismatch { .. } => {
                ErrorKind::TypeMismatch
            }
            Error::NoRows => ErrorKind::NoRows,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Closed => ErrorKind::Closed,
        }
    }

    /// Whether the error was produced by the context ending rather than by the operation.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Error::DeadlineExceeded | Error::Cancelled)
    }

    #[must_use]
    pub fn with_column_name(self, name: &str) -> Self {
        match self {
            Error::TypeMismatch { expected, provided } => {
                Error::ColumnTypeMismatch { column: name.to_string(), expected, provided }
            }
            x => x,
        }
    }

    pub(crate) fn type_mismatch(expected: impl ToString, provided: impl ToString) -> Self {
        Error::TypeMismatch { expected: expected.to_string(), provided: provided.to_string() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ignores_message() {
        let a = Error::Protocol("short read".into());
        let b = Error::Protocol("unexpected packet".into());
        assert_eq!(a.kind(), b.kind());
        assert_eq!(Error::DeadlineExceeded.kind(), ErrorKind::DeadlineExceeded);
        assert_ne!(Error::DeadlineExceeded.kind(), Error::Cancelled.kind());
    }

    #[test]
    fn test_with_column_name_keeps_kind() {
        let err = Error::type_mismatch("UInt8", "String(\"x\")").with_column_name("col1");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(err.to_string().contains("col1"));

        let untouched = Error::NoRows.with_column_name("col1");
        assert!(matches!(untouched, Error::NoRows));
    }
}
