use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::disassembly;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot load specification from `{path}`: {error}")]
    DeserialiseFile {
        path: PathBuf,
        error: disassembly::Error,
    },
    #[error("cannot read `{path}`: {error}")]
    ParseFile { path: PathBuf, error: io::Error },
    #[error(transparent)]
    Disassembly(#[from] disassembly::Error),
}
