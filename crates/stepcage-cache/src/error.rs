use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("container cache requires container_cache_data_path to be configured")]
    NoDataPath,

    #[error("cache lock on {path} is held by another step")]
    Locked { path: String },
}

pub type Result<T> = std::result::Result<T, Error>;
