use std::mem;
use std::sync::Arc;

use ahash::AHashMap as Map;
use smallvec::{smallvec, SmallVec};

use crate::address::AddressValue;
use crate::bits;
use crate::disassembly::construct::{ConstTpl, ConstructTpl, HandleKind, OpTpl, VarnodeTpl};
use crate::disassembly::symbol::{Constructor, SymbolTable};
use crate::disassembly::walker::{ParserContext, ParserState, ParserWalker};
use crate::disassembly::{Error, Opcode, PcodeData, VarnodeData};
use crate::space::AddressSpace;
use crate::space_manager::SpaceManager;

/// Unique-space offset, relative to the unique base, of the temporary
/// holding an adjusted pointer.
const RUNTIME_EFFECTIVE_ADDRESS: u64 = 0x100;

#[derive(Debug, Copy, Clone)]
struct LabelRef {
    operation: usize,
    input: usize,
}

/// Expands the templates of a resolved instruction into concrete p-code.
///
/// Delay slots and cross-builds read other instructions' decode state from
/// `resolved`, which must already be fully resolved.
pub struct PcodeBuilder<'a> {
    symbols: &'a SymbolTable,
    resolved: Map<AddressValue, &'a ParserContext>,

    const_space: Arc<AddressSpace>,
    unique_space: Arc<AddressSpace>,
    unique_mask: u64,
    unique_offset: u64,
    effective_address: u64,

    issued: Vec<PcodeData>,

    label_base: usize,
    label_count: usize,
    labels: Vec<Option<usize>>,
    label_refs: Vec<LabelRef>,

    walker: ParserWalker<'a>,
}

impl<'a> PcodeBuilder<'a> {
    pub fn new(
        walker: ParserWalker<'a>,
        resolved: Map<AddressValue, &'a ParserContext>,
        manager: &SpaceManager,
        unique_base: u64,
        unique_mask: u64,
    ) -> Self {
        let unique_offset = (walker.address().offset() & unique_mask)
            .checked_shl(4)
            .unwrap_or(0);
        Self {
            symbols: walker.symbols(),
            resolved,
            const_space: manager.constant_space().clone(),
            unique_space: manager.unique_space().clone(),
            unique_mask,
            unique_offset,
            effective_address: unique_base + RUNTIME_EFFECTIVE_ADDRESS,
            issued: Vec::new(),
            label_base: 0,
            label_count: 0,
            labels: Vec::new(),
            label_refs: Vec::new(),
            walker,
        }
    }

    pub fn walker(&self) -> &ParserWalker<'a> {
        &self.walker
    }

    pub fn label_base(&self) -> usize {
        self.label_base
    }

    pub fn operations(&self) -> &[PcodeData] {
        &self.issued
    }

    pub fn into_operations(self) -> Vec<PcodeData> {
        self.issued
    }

    fn set_unique_offset(&mut self, address: &AddressValue) {
        self.unique_offset = (address.offset() & self.unique_mask)
            .checked_shl(4)
            .unwrap_or(0);
    }

    /// The error for a constructor with no semantics, naming the
    /// instruction currently being built.
    pub fn unimplemented(&self) -> Error {
        let mut walker = self.walker.clone();
        walker.base_state();

        let mut text = format!("{}: ", walker.address());
        if let Ok(ct) = walker
            .constructor()
            .and_then(|ct| self.symbols.constructor(ct))
        {
            let mut mnemonic = String::new();
            let mut body = String::new();
            if ct.print_mnemonic(&mut mnemonic, &mut walker).is_ok() {
                text.push_str(&mnemonic);
            }
            walker.base_state();
            if ct.print_body(&mut body, &mut walker).is_ok() && !body.is_empty() {
                text.push_str("  ");
                text.push_str(&body);
            }
        }

        Error::Unimplemented {
            address: walker.address().offset(),
            length: walker.length(),
            text,
        }
    }

    /// Builds the main section of the instruction under the walker.
    pub fn build_instruction(&mut self) -> Result<(), Error> {
        self.walker.base_state();
        let ct = self.symbols.constructor(self.walker.constructor()?)?;
        let template = ct.template().ok_or_else(|| self.unimplemented())?;
        self.build(template, None)
    }

    pub fn build(&mut self, template: &'a ConstructTpl, section: Option<usize>) -> Result<(), Error> {
        let old_base = self.label_base;
        self.label_base = self.label_count;
        self.label_count += template.labels();

        for op in template.operations() {
            match op.opcode() {
                Opcode::Build => self.append_build(op, section)?,
                Opcode::DelaySlot => self.delay_slot()?,
                Opcode::Label => self.set_label(op)?,
                Opcode::CrossBuild => self.append_cross_build(op, section)?,
                _ => self.dump(op)?,
            }
        }

        self.label_base = old_base;
        Ok(())
    }

    fn subtable_operand(&self, ct: &Constructor, index: usize) -> Result<bool, Error> {
        let operand = ct.operand(index).ok_or(Error::InvalidHandle)?;
        let operand = self.symbols.symbol(operand)?.as_operand()?;
        match operand.defining_symbol() {
            Some(id) => Ok(self.symbols.symbol(id)?.is_subtable()),
            None => Ok(false),
        }
    }

    fn append_build(&mut self, op: &'a OpTpl, section: Option<usize>) -> Result<(), Error> {
        let index = op
            .input(0)?
            .offset()
            .real()
            .ok_or_else(|| Error::invariant("BUILD operand index is not a constant"))?
            as usize;

        let ct = self.symbols.constructor(self.walker.constructor()?)?;
        if !self.subtable_operand(ct, index)? {
            return Ok(());
        }

        self.walker.push_operand(index)?;
        let sub = self.symbols.constructor(self.walker.constructor()?)?;
        match section {
            Some(section) => match sub.named_template(section) {
                Some(template) => self.build(template, Some(section))?,
                None => self.build_empty(sub, section)?,
            },
            None => {
                let template = sub.template().ok_or_else(|| self.unimplemented())?;
                self.build(template, None)?;
            }
        }
        self.walker.pop_operand();
        Ok(())
    }

    /// Builds `section` of every subtable operand of a constructor that
    /// has no template of its own for that section.
    fn build_empty(&mut self, ct: &'a Constructor, section: usize) -> Result<(), Error> {
        for index in 0..ct.operand_count() {
            if !self.subtable_operand(ct, index)? {
                continue;
            }

            self.walker.push_operand(index)?;
            let sub = self.symbols.constructor(self.walker.constructor()?)?;
            match sub.named_template(section) {
                Some(template) => self.build(template, Some(section))?,
                None => self.build_empty(sub, section)?,
            }
            self.walker.pop_operand();
        }
        Ok(())
    }

    fn resolved_context(&self, address: &AddressValue, what: &str) -> Result<&'a ParserContext, Error> {
        self.resolved
            .get(address)
            .copied()
            .filter(|ctx| ctx.parser_state() == ParserState::PCode)
            .ok_or_else(|| Error::invariant(format!("Could not obtain cached {} instruction", what)))
    }

    fn delay_slot(&mut self) -> Result<(), Error> {
        let old_unique = self.unique_offset;
        let base = self.walker.address();
        let delay = self.walker.context().delay_slot();
        let mut fall = self.walker.length();
        let mut bytes = 0;

        loop {
            let address = base + fall as u64;
            log::trace!("splicing delay slot instruction at {}", address);

            self.set_unique_offset(&address);
            let ctx = self.resolved_context(&address, "delay slot")?;
            let length = ctx.length();

            let mut walker = ParserWalker::new(ctx, self.symbols);
            walker.base_state();
            let outer = mem::replace(&mut self.walker, walker);

            let ct = self.symbols.constructor(self.walker.constructor()?)?;
            let template = ct.template().ok_or_else(|| self.unimplemented())?;
            self.build(template, None)?;

            self.walker = outer;

            fall += length;
            bytes += length;
            if bytes >= delay || length == 0 {
                break;
            }
        }

        self.unique_offset = old_unique;
        Ok(())
    }

    fn append_cross_build(&mut self, op: &'a OpTpl, section: Option<usize>) -> Result<(), Error> {
        if section.is_some() {
            return Err(Error::specification("CROSSBUILD directive within a named section"));
        }

        let section = op
            .input(1)?
            .offset()
            .real()
            .ok_or_else(|| Error::invariant("CROSSBUILD section is not a constant"))?
            as usize;

        let target = op.input(0)?;
        let space = target.space().fix_space(&self.walker)?.clone();
        let offset = space.wrap_offset(target.offset().fix(&self.walker)?);
        let address = AddressValue::new(space, offset);

        let old_unique = self.unique_offset;
        self.set_unique_offset(&address);

        let ctx = self.resolved_context(&address, "crossbuild")?;
        let mut walker = ParserWalker::with_cross(ctx, self.walker.context(), self.symbols);
        walker.base_state();
        let outer = mem::replace(&mut self.walker, walker);

        let ct = self.symbols.constructor(self.walker.constructor()?)?;
        match ct.named_template(section) {
            Some(template) => self.build(template, Some(section))?,
            None => self.build_empty(ct, section)?,
        }

        self.walker = outer;
        self.unique_offset = old_unique;
        Ok(())
    }

    fn set_label(&mut self, op: &OpTpl) -> Result<(), Error> {
        let id = op
            .input(0)?
            .offset()
            .real()
            .ok_or_else(|| Error::invariant("label identifier is not a constant"))?
            as usize
            + self.label_base;

        if self.labels.len() <= id {
            self.labels.resize(id + 1, None);
        }
        self.labels[id] = Some(self.issued.len());
        Ok(())
    }

    fn generate_location(&self, varnode: &'a VarnodeTpl) -> Result<VarnodeData, Error> {
        let space = varnode.space().fix_space(&self.walker)?.clone();
        let size = varnode.size().fix(&self.walker)? as usize;
        let offset = varnode.offset().fix(&self.walker)?;

        let offset = if space.is_constant() {
            offset & bits::calculate_mask(size)
        } else if space.is_unique() {
            offset | self.unique_offset
        } else {
            space.wrap_offset(offset)
        };

        Ok(VarnodeData::new(space, offset, size))
    }

    /// The pointer through which a dynamic varnode is accessed, and the
    /// space it points into.
    fn generate_pointer(&self, varnode: &VarnodeTpl) -> Result<(Arc<AddressSpace>, VarnodeData), Error> {
        let index = varnode.offset().handle_index().ok_or(Error::InvalidHandle)?;
        let handle = self.walker.fixed_handle(index)?;
        let space = handle.offset_space.clone().ok_or(Error::InvalidSpace)?;
        let size = handle.offset_size;

        let offset = if space.is_constant() {
            handle.offset_offset & bits::calculate_mask(size)
        } else if space.is_unique() {
            handle.offset_offset | self.unique_offset
        } else {
            space.wrap_offset(handle.offset_offset)
        };

        Ok((handle.space.clone(), VarnodeData::new(space, offset, size)))
    }

    fn space_reference(&self, space: &AddressSpace) -> VarnodeData {
        VarnodeData::new(
            self.const_space.clone(),
            space.index() as u64,
            self.const_space.address_size(),
        )
    }

    /// Issues a LOAD or STORE; a truncated handle first adds its byte
    /// adjustment to the pointer in a runtime temporary.
    fn issue_indirect(&mut self, mut op: PcodeData, varnode: &VarnodeTpl) {
        let plus = match varnode.offset() {
            ConstTpl::Handle(_, HandleKind::OffsetPlus(plus)) => plus & 0xffff,
            _ => 0,
        };

        if plus != 0 {
            let pointer = op.inputs[1].clone();
            let adjusted = VarnodeData::new(
                self.unique_space.clone(),
                self.effective_address,
                pointer.size(),
            );
            self.issued.push(PcodeData {
                opcode: Opcode::IntAdd,
                output: Some(adjusted.clone()),
                inputs: smallvec![
                    pointer.clone(),
                    VarnodeData::new(self.const_space.clone(), plus, pointer.size()),
                ],
            });
            op.inputs[1] = adjusted;
        }

        self.issued.push(op);
    }

    fn dump(&mut self, op: &'a OpTpl) -> Result<(), Error> {
        let mut inputs = SmallVec::<[VarnodeData; 4]>::with_capacity(op.inputs().len());

        for input in op.inputs() {
            let location = self.generate_location(input)?;
            if input.is_dynamic(&self.walker)? {
                let (space, pointer) = self.generate_pointer(input)?;
                let load = PcodeData {
                    opcode: Opcode::Load,
                    output: Some(location.clone()),
                    inputs: smallvec![self.space_reference(&space), pointer],
                };
                self.issue_indirect(load, input);
            }
            inputs.push(location);
        }

        if op.inputs().first().map(VarnodeTpl::is_relative).unwrap_or(false) {
            inputs[0].offset += self.label_base as u64;
            self.label_refs.push(LabelRef {
                operation: self.issued.len(),
                input: 0,
            });
        }

        match op.output() {
            Some(output) => {
                let location = self.generate_location(output)?;
                let dynamic = output.is_dynamic(&self.walker)?;

                self.issued.push(PcodeData {
                    opcode: op.opcode(),
                    output: Some(location.clone()),
                    inputs,
                });

                if dynamic {
                    let (space, pointer) = self.generate_pointer(output)?;
                    let store = PcodeData {
                        opcode: Opcode::Store,
                        output: None,
                        inputs: smallvec![self.space_reference(&space), pointer, location],
                    };
                    self.issue_indirect(store, output);
                }
            }
            None => self.issued.push(PcodeData {
                opcode: op.opcode(),
                output: None,
                inputs,
            }),
        }
        Ok(())
    }

    /// Rewrites label references as operation-relative distances.
    pub fn resolve_relatives(&mut self) -> Result<(), Error> {
        for label in self.label_refs.iter() {
            let varnode = &mut self.issued[label.operation].inputs[label.input];
            let target = self
                .labels
                .get(varnode.offset as usize)
                .copied()
                .flatten()
                .ok_or_else(|| Error::specification("Reference to non-existent sleigh label"))?;

            varnode.offset = (target as u64).wrapping_sub(label.operation as u64)
                & bits::calculate_mask(varnode.size);
        }
        Ok(())
    }
}
