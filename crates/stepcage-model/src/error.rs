use std::io;
use thiserror::Error;

/// Errors shared by every layer of the stack: configuration and argument
/// parsing, plus the generic I/O failures any component can hit.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid plugin configuration: {0}")]
    ConfigError(String),

    #[error("invalid option: {0}")]
    ParseError(String),

    #[error("i/o error: {0}")]
    IoError(#[from] io::Error),

    #[error("{field} must be an absolute path, got {value:?}")]
    NotAbsolute { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
