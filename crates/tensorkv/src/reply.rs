//! Client visible reply values.

use bytes::Bytes;
use crate::error::Error;

/// A reply in the shape of the host store's protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Simple status line such as `OK`, `NA` or `TIMEDOUT`.
    Status(String),
    /// Binary safe string.
    Bulk(Bytes),
    Integer(i64),
    Double(f64),
    Array(Vec<Reply>),
    Error(Error),
    Null,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Sentinel for a DAG op that could not run.
    pub fn not_available() -> Self {
        Reply::Status("NA".to_string())
    }

    pub fn timed_out() -> Self {
        Reply::Status("TIMEDOUT".to_string())
    }

    pub fn status(text: impl Into<String>) -> Self {
        Reply::Status(text.into())
    }

    pub fn bulk(text: impl AsRef<[u8]>) -> Self {
        Reply::Bulk(Bytes::copy_from_slice(text.as_ref()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up the value that follows `field` in a flat `[field, value, ...]` array.
    pub fn field(&self, field: &str) -> Option<&Reply> {
        let items = self.as_array()?;
        items.chunks(2).find_map(|pair| match pair {
            [Reply::Status(name), value] if name == field => Some(value),
            [Reply::Bulk(name), value] if name.as_ref() == field.as_bytes() => Some(value),
            _ => None,
        })
    }
}

impl From<Error> for Reply {
    fn from(error: Error) -> Self {
        Reply::Error(error)
    }
}

impl<T: Into<Reply>> From<Result<T, Error>> for Reply {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(error) => Reply::Error(error),
        }
    }
}
