//! Parsers and handlers for the `AI.*` commands.
//!
//! Every parser receives the full argument vector, command name included, so
//! arity checks read the same way the host store counts arguments.

pub mod config;
pub mod info;
pub mod model;
pub mod script;
pub mod tensor;

use std::time::Duration;
use bytes::Bytes;
use crate::args::{is_keyword, parse_i64};
use crate::error::{Error, Result};

/// Token separating the ops of a DAG.
pub const CHAIN: &str = "|>";

pub(crate) fn is_chain(arg: &Bytes) -> bool {
    arg.as_ref() == CHAIN.as_bytes()
}

/// Parses a strictly positive millisecond timeout.
pub(crate) fn parse_timeout(arg: &[u8]) -> Result<Duration> {
    match parse_i64(arg) {
        Some(ms) if ms > 0 => Ok(Duration::from_millis(ms as u64)),
        _ => Err(Error::syntax("Invalid value for TIMEOUT")),
    }
}

/// Returns the upper-case command name at position 0.
pub(crate) fn command_name(args: &[Bytes]) -> String {
    args.first()
        .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase())
        .unwrap_or_default()
}

/// Whether any argument is one of the reserved scope keywords.
pub(crate) fn is_any_keyword(arg: &[u8], keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| is_keyword(arg, keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(b"250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_timeout(b"0").unwrap_err().to_string(), "ERR Invalid value for TIMEOUT");
        assert!(parse_timeout(b"soon").is_err());
    }

    #[test]
    fn test_command_name_is_upper_case() {
        let args = vec![Bytes::from_static(b"ai.tensorget"), Bytes::from_static(b"t")];
        assert_eq!(command_name(&args), "AI.TENSORGET");
        assert!(is_chain(&Bytes::from_static(b"|>")));
    }
}
