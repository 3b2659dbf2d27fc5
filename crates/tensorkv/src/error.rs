//! Error type shared by every command path.
//!
//! The `Display` text of each variant is exactly the line a client sees, so
//! errors can be forwarded into a reply without reformatting.

/// Every failure the engine can report.
///
/// Errors are `Clone` because a single backend failure is delivered to every
/// member of the batch that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The command was called with too few (or too many) arguments.
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// The key exists but holds a value of another type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Keys touched by one command live in different cluster slots.
    #[error("ERR CROSSSLOT Keys in request don't hash to the same slot")]
    CrossSlot,

    /// The key does not exist. The payload names the expected entity.
    #[error("ERR {0} key is empty")]
    EmptyKey(&'static str),

    /// Malformed command arguments.
    #[error("ERR {0}")]
    Syntax(String),

    /// The DAG could not be built.
    #[error("ERR {0}")]
    Dag(String),

    /// Tensor construction or conversion failed.
    #[error("ERR {0}")]
    Tensor(String),

    /// A backend rejected a blob, a script or a run.
    #[error("ERR {0}")]
    Backend(String),

    /// Bad configuration key or value.
    #[error("ERR {0}")]
    Config(String),

    /// A persisted entity could not be decoded.
    #[error("ERR {0}")]
    Codec(String),

    /// The run queue holding the request was closed before a worker took it.
    #[error("ERR run queue shut down")]
    QueueClosed,

    /// The request deadline passed before it completed.
    #[error("TIMEDOUT")]
    TimedOut,
}

impl Error {
    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Error::Syntax(message.into())
    }

    pub(crate) fn dag(message: impl Into<String>) -> Self {
        Error::Dag(message.into())
    }

    pub(crate) fn tensor(message: impl Into<String>) -> Self {
        Error::Tensor(message.into())
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Error::Backend(message.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_client_visible_line() {
        assert_eq!(
            Error::WrongArity("AI.TENSORSET".into()).to_string(),
            "ERR wrong number of arguments for 'AI.TENSORSET' command"
        );
        assert_eq!(Error::EmptyKey("model").to_string(), "ERR model key is empty");
        assert_eq!(Error::dag("DAG is empty").to_string(), "ERR DAG is empty");
        assert_eq!(Error::TimedOut.to_string(), "TIMEDOUT");
        assert!(Error::WrongType.to_string().starts_with("WRONGTYPE"));
    }
}
