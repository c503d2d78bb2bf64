pub mod error;
pub use error::Error;

pub mod parse;
pub use parse::XmlExt;

pub mod write;
pub use write::XmlWriter;
