pub mod address;
pub mod bits;
pub mod deserialise;
pub mod disassembly;
pub mod error;
pub mod sleigh;
pub mod space;
pub mod space_manager;

pub use address::AddressValue;
pub use disassembly::{Opcode, PcodeData, VarnodeData};
pub use error::Error;
pub use sleigh::{AssemblyEmitter, LoadImage, PcodeEmitter, Sleigh};
pub use sleigh_bytes::Endian;
