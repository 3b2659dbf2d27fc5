//! `AI.CONFIG` runtime settings.

use bytes::Bytes;
use crate::args::{as_str, is_keyword, parse_i64};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reply::Reply;

/// One parsed `AI.CONFIG` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    BackendsPath(String),
    ModelChunkSize(usize),
    Get(String),
}

pub fn parse_config(raw: &[Bytes]) -> Result<ConfigCommand> {
    if raw.len() < 2 {
        return Err(Error::WrongArity("AI.CONFIG".into()));
    }
    let subcommand = &raw[1];
    let value = raw.get(2);
    if is_keyword(subcommand, "BACKENDSPATH") {
        let path = value.ok_or_else(|| Error::Config("BACKENDSPATH: missing path argument".into()))?;
        Ok(ConfigCommand::BackendsPath(as_str(path)?.to_string()))
    } else if is_keyword(subcommand, "MODEL_CHUNK_SIZE") {
        let size = value.ok_or_else(|| Error::Config("MODEL_CHUNK_SIZE: missing chunk size".into()))?;
        match parse_i64(size) {
            Some(size) if size > 0 => Ok(ConfigCommand::ModelChunkSize(size as usize)),
            _ => Err(Error::Config("MODEL_CHUNK_SIZE: invalid chunk size".into())),
        }
    } else if is_keyword(subcommand, "GET") {
        let name = value.ok_or_else(|| Error::WrongArity("AI.CONFIG".into()))?;
        Ok(ConfigCommand::Get(as_str(name)?.to_string()))
    } else {
        Err(Error::Config("unsupported subcommand".into()))
    }
}

impl ConfigCommand {
    /// Applies the command, returning its reply.
    pub fn apply(self, config: &mut Config) -> Reply {
        match self {
            ConfigCommand::BackendsPath(path) => {
                tracing::info!(path = %path, "backends path changed");
                config.backends_path = Some(path);
                Reply::ok()
            }
            ConfigCommand::ModelChunkSize(size) => {
                config.model_chunk_size = size;
                Reply::ok()
            }
            ConfigCommand::Get(name) => match config.get(&name) {
                Some(value) => Reply::bulk(value),
                None => Reply::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(line: &str) -> Vec<Bytes> {
        line.split_whitespace().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_set_then_get() {
        let mut config = Config::default();
        assert_eq!(parse_config(&argv("AI.CONFIG MODEL_CHUNK_SIZE 64")).unwrap().apply(&mut config), Reply::ok());
        assert_eq!(config.model_chunk_size, 64);
        assert_eq!(parse_config(&argv("AI.CONFIG BACKENDSPATH /opt/ai")).unwrap().apply(&mut config), Reply::ok());
        assert_eq!(
            parse_config(&argv("AI.CONFIG GET backendspath")).unwrap().apply(&mut config),
            Reply::bulk("/opt/ai")
        );
        assert_eq!(parse_config(&argv("AI.CONFIG GET nothing")).unwrap().apply(&mut config), Reply::Null);
    }

    #[test]
    fn test_errors() {
        let error = |line: &str| parse_config(&argv(line)).unwrap_err().to_string();
        assert_eq!(error("AI.CONFIG BACKENDSPATH"), "ERR BACKENDSPATH: missing path argument");
        assert_eq!(error("AI.CONFIG MODEL_CHUNK_SIZE"), "ERR MODEL_CHUNK_SIZE: missing chunk size");
        assert_eq!(error("AI.CONFIG MODEL_CHUNK_SIZE 0"), "ERR MODEL_CHUNK_SIZE: invalid chunk size");
        assert_eq!(error("AI.CONFIG LOADBACKEND TF x"), "ERR unsupported subcommand");
    }
}
