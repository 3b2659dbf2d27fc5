//! Cursor over binary command arguments.

use bytes::Bytes;
use crate::error::{Error, Result};

/// Returns `true` when `arg` equals `keyword`, ignoring ASCII case.
pub(crate) fn is_keyword(arg: &[u8], keyword: &str) -> bool {
    arg.eq_ignore_ascii_case(keyword.as_bytes())
}

/// Interprets an argument as UTF-8 text.
pub(crate) fn as_str(arg: &Bytes) -> Result<&str> {
    std::str::from_utf8(arg).map_err(|_| Error::syntax("argument is not valid UTF-8"))
}

/// Parses a signed integer argument the way the host store does: the whole
/// argument must be a decimal number.
pub(crate) fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse::<i64>().ok()
}

/// Forward-only cursor over the arguments of one command.
///
/// Position `0` is the command name itself.
#[derive(Debug, Clone)]
pub(crate) struct Args<'a> {
    args: &'a [Bytes],
    pos: usize,
}

impl<'a> Args<'a> {
    pub(crate) fn new(args: &'a [Bytes]) -> Self {
        Self { args, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.args.len().saturating_sub(self.pos)
    }

    pub(crate) fn peek(&self) -> Option<&'a Bytes> {
        self.args.get(self.pos)
    }

    pub(crate) fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|arg| is_keyword(arg, keyword))
    }

    pub(crate) fn next_arg(&mut self) -> Option<&'a Bytes> {
        let arg = self.args.get(self.pos)?;
        self.pos += 1;
        Some(arg)
    }

    pub(crate) fn next_str(&mut self) -> Option<Result<&'a str>> {
        self.next_arg().map(as_str)
    }

    /// Takes the next `n` arguments, or `None` when fewer are left.
    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [Bytes]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.args[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    /// Takes every argument left.
    pub(crate) fn rest(&mut self) -> &'a [Bytes] {
        let slice = &self.args[self.pos.min(self.args.len())..];
        self.pos = self.args.len();
        slice
    }
}

/// Converts a slice of arguments to owned strings.
pub(crate) fn to_strings(args: &[Bytes]) -> Result<Vec<String>> {
    args.iter().map(|arg| as_str(arg).map(str::to_owned)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_keyword_is_case_insensitive() {
        assert!(is_keyword(b"inputs", "INPUTS"));
        assert!(!is_keyword(b"input", "INPUTS"));
    }

    #[test]
    fn test_parse_i64_rejects_trailing_garbage() {
        assert_eq!(parse_i64(b"42"), Some(42));
        assert_eq!(parse_i64(b"-3"), Some(-3));
        assert_eq!(parse_i64(b"4x"), None);
        assert_eq!(parse_i64(b""), None);
    }

    #[test]
    fn test_cursor_take_and_rest() {
        let raw = argv(&["AI.X", "a", "b", "c"]);
        let mut args = Args::new(&raw);
        assert_eq!(args.next_arg().map(|a| a.as_ref()), Some(b"AI.X".as_ref()));
        assert!(args.take(4).is_none());
        assert_eq!(args.take(2).map(|s| s.len()), Some(2));
        assert_eq!(args.remaining(), 1);
        assert_eq!(args.rest().len(), 1);
        assert_eq!(args.remaining(), 0);
        assert!(args.next_arg().is_none());
    }
}
