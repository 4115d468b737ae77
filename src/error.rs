use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::reader::ReadError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("unknown rpc protocol: {0}")]
    UnknownProtocol(String),
    #[error("parcel read failed: {0}")]
    Read(#[from] ReadError),
    #[error("dead binder: handle {0}")]
    DeadBinder(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
