use std::num::ParseIntError;
use std::str::ParseBoolError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("attribute `{0}` expected")]
    AttributeExpected(&'static str),
    #[error("invariant not satisfied: {0}")]
    Invariant(&'static str),
    #[error("could not parse boolean: {0}")]
    ParseBool(#[from] ParseBoolError),
    #[error("could not parse integer: {0}")]
    ParseInteger(#[from] ParseIntError),
    #[error("could not parse endian")]
    ParseEndian,
    #[error("unexpected tag `{0}`")]
    TagUnexpected(String),
    #[error("specification format version {found} does not match supported version {expected}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error(transparent)]
    Xml(#[from] xml::Error),
}
