use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("specification error: {0}")]
    Specification(String),
    #[error("bad data at {address:#x}: {reason}")]
    BadData { address: u64, reason: String },
    #[error("unimplemented instruction `{text}` at {address:#x} ({length} bytes)")]
    Unimplemented {
        address: u64,
        length: usize,
        text: String,
    },
    #[error("internal error: {0}")]
    Invariant(String),
    #[error("symbol invalid")]
    InvalidSymbol,
    #[error("space invalid")]
    InvalidSpace,
    #[error("handle invalid")]
    InvalidHandle,
    #[error("context commit: {0}")]
    ContextCommit(String),
    #[error("specification deserialisation error: {0}")]
    Deserialise(#[from] crate::deserialise::Error),
}

impl Error {
    pub(crate) fn specification<S: Into<String>>(msg: S) -> Self {
        Self::Specification(msg.into())
    }

    pub(crate) fn bad_data<S: Into<String>>(address: u64, reason: S) -> Self {
        Self::BadData {
            address,
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn is_bad_data(&self) -> bool {
        matches!(self, Self::BadData { .. })
    }

    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Self::Unimplemented { .. })
    }
}
