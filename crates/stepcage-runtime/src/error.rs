use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("model error: {0}")]
    Model(#[from] stepcage_model::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("failed to fork: {0}")]
    Fork(nix::Error),

    #[error("{program} was killed by signal {signal}")]
    Signalled { program: String, signal: i32 },

    #[error("{program} exited with status {code}")]
    Exited { program: String, code: i32 },

    #[error("{program} exited before the runtime helper finished its handshake")]
    ExitedTooSoon { program: String },

    #[error("malformed container listing row: {0:?}")]
    MalformedListing(String),

    #[error("importer produced no output for `get {uri}`")]
    ImporterEmptyOutput { uri: String },
}

pub type Result<T> = std::result::Result<T, Error>;
