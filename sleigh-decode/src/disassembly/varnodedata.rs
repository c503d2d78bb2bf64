use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::address::AddressValue;
use crate::disassembly::Opcode;
use crate::sleigh::Sleigh;
use crate::space::AddressSpace;

/// A concrete `(space, offset, size)` location produced by p-code
/// generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct VarnodeData {
    space: Arc<AddressSpace>,
    pub(crate) offset: u64,
    pub(crate) size: usize,
}

impl VarnodeData {
    pub fn new(space: Arc<AddressSpace>, offset: u64, size: usize) -> Self {
        Self {
            space,
            offset,
            size,
        }
    }

    pub fn address(&self) -> AddressValue {
        AddressValue::new(self.space.clone(), self.offset)
    }

    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Formats with register names resolved through `sleigh`.
    pub fn display<'a>(&'a self, sleigh: &'a Sleigh) -> VarnodeDataFormatter<'a> {
        VarnodeDataFormatter {
            varnode: self,
            sleigh,
        }
    }
}

impl fmt::Display for VarnodeData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.space.is_constant() {
            write!(f, "{:#x}:{}", self.offset, self.size)
        } else {
            write!(f, "{}[{:#x}]:{}", self.space.name(), self.offset, self.size)
        }
    }
}

pub struct VarnodeDataFormatter<'a> {
    varnode: &'a VarnodeData,
    sleigh: &'a Sleigh,
}

impl<'a> fmt::Display for VarnodeDataFormatter<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let varnode = self.varnode;
        if varnode.space.is_register() {
            if let Some(name) = self
                .sleigh
                .register_name(&varnode.space, varnode.offset, varnode.size)
            {
                return write!(f, "{}:{}", name, varnode.size);
            }
        }
        write!(f, "{}", varnode)
    }
}

/// One concrete p-code operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct PcodeData {
    pub opcode: Opcode,
    pub output: Option<VarnodeData>,
    pub inputs: SmallVec<[VarnodeData; 4]>,
}

impl PcodeData {
    pub fn display<'a>(&'a self, sleigh: &'a Sleigh) -> PcodeDataFormatter<'a> {
        PcodeDataFormatter { pcode: self, sleigh }
    }
}

impl fmt::Display for PcodeData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref output) = self.output {
            write!(f, "{} = ", output)?;
        }
        write!(f, "{}", self.opcode)?;
        for (i, input) in self.inputs.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " " } else { ", " }, input)?;
        }
        Ok(())
    }
}

pub struct PcodeDataFormatter<'a> {
    pcode: &'a PcodeData,
    sleigh: &'a Sleigh,
}

impl<'a> fmt::Display for PcodeDataFormatter<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref output) = self.pcode.output {
            write!(f, "{} = ", output.display(self.sleigh))?;
        }
        write!(f, "{}", self.pcode.opcode)?;
        for (i, input) in self.pcode.inputs.iter().enumerate() {
            write!(
                f,
                "{}{}",
                if i == 0 { " " } else { ", " },
                input.display(self.sleigh)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::space::SpaceKind;
    use crate::space_manager::SpaceManager;

    #[test]
    fn plain_formatting() {
        let mut manager = SpaceManager::new();
        let ram = manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);
        let constant = manager.constant_space().clone();

        let op = PcodeData {
            opcode: Opcode::Copy,
            output: Some(VarnodeData::new(ram, 0x10, 4)),
            inputs: smallvec::smallvec![VarnodeData::new(constant, 0x2a, 4)],
        };

        assert_eq!(op.to_string(), "ram[0x10]:4 = COPY 0x2a:4");
    }
}
