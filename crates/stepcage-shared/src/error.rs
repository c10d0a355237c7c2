use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("pthread mutex operation failed with errno {0}")]
    Mutex(i32),

    #[error("shared region mutex owner died; region state invalidated")]
    OwnerDead,
}

pub type Result<T> = std::result::Result<T, Error>;
