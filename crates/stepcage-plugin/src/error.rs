use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] stepcage_model::Error),

    #[error(transparent)]
    Runtime(#[from] stepcage_runtime::Error),

    #[error(transparent)]
    Shared(#[from] stepcage_shared::Error),

    #[error(transparent)]
    Cache(#[from] stepcage_cache::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Config(String),

    #[error("container named {name:?} requested with mode create, but it already exists")]
    NameCreateExists { name: String },

    #[error("container named {name:?} requested with mode exec, but it is not running")]
    NameExecNotRunning { name: String },

    #[error("step has no image to resolve a container from")]
    NoImage,

    #[error("--container-save target {path:?} could not be resolved: job cwd is unknown")]
    SaveWithoutCwd { path: String },
}

pub type Result<T> = std::result::Result<T, Error>;
