use std::fmt::Display;
use std::str::FromStr;

use crate::order::Order;
use crate::{BE, LE};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum Endian {
    Big,
    Little,
}

impl Display for Endian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_big() { "BE" } else { "LE" })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEndianError;

impl Display for ParseEndianError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid endian")
    }
}

impl std::error::Error for ParseEndianError {}

impl FromStr for Endian {
    type Err = ParseEndianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BE" | "big" | "true" => Ok(Self::Big),
            "LE" | "little" | "false" => Ok(Self::Little),
            _ => Err(ParseEndianError),
        }
    }
}

impl Endian {
    pub fn is_big(&self) -> bool {
        matches!(self, Self::Big)
    }

    pub fn is_little(&self) -> bool {
        matches!(self, Self::Little)
    }

    pub fn from_big(big: bool) -> Self {
        if big {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// Reads a `buf.len()` byte word (at most 8 bytes) in this byte order.
    pub fn read_word(&self, buf: &[u8]) -> u64 {
        match self {
            Self::Big => BE::read_word(buf),
            Self::Little => LE::read_word(buf),
        }
    }

    pub fn write_word(&self, buf: &mut [u8], n: u64) {
        match self {
            Self::Big => BE::write_word(buf, n),
            Self::Little => LE::write_word(buf, n),
        }
    }
}
