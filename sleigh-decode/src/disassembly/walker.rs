use std::mem::size_of;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::address::AddressValue;
use crate::disassembly::symbol::{ConstructorRef, OperandSymbol, SymbolTable};
use crate::disassembly::Error;
use crate::space::AddressSpace;

pub const INSTRUCTION_BYTES: usize = 16;
const MAX_DEPTH: usize = 32;

/// A resolved operand: either a direct `space:offset` of `size` bytes, or,
/// when `offset_space` is set, the `size` bytes loaded from
/// `offset_space:offset_offset` and staged in `temp_space:temp_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedHandle {
    pub space: Arc<AddressSpace>,
    pub size: usize,
    pub offset_space: Option<Arc<AddressSpace>>,
    pub offset_offset: u64,
    pub offset_size: usize,
    pub temp_space: Option<Arc<AddressSpace>>,
    pub temp_offset: u64,
}

impl FixedHandle {
    pub fn new(space: Arc<AddressSpace>) -> Self {
        Self {
            space,
            size: 0,
            offset_space: None,
            offset_offset: 0,
            offset_size: 0,
            temp_space: None,
            temp_offset: 0,
        }
    }

    pub fn constant(space: Arc<AddressSpace>, value: u64) -> Self {
        Self {
            offset_offset: value,
            ..Self::new(space)
        }
    }

    pub fn direct(space: Arc<AddressSpace>, offset: u64, size: usize) -> Self {
        Self {
            size,
            offset_offset: offset,
            ..Self::new(space)
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.offset_space.is_some()
    }

    /// The offset a template sees: the staging location for dynamic
    /// handles.
    pub fn effective_offset(&self) -> u64 {
        if self.offset_space.is_none() {
            self.offset_offset
        } else {
            self.temp_offset
        }
    }
}

/// One node of the matched constructor tree.
#[derive(Debug, Clone, Default)]
pub struct ConstructState {
    ct: Option<ConstructorRef>,
    hand: Option<FixedHandle>,
    resolve: SmallVec<[Option<usize>; 8]>,
    parent: Option<usize>,
    length: usize,
    offset: usize,
}

impl ConstructState {
    pub fn constructor(&self) -> Option<ConstructorRef> {
        self.ct
    }

    pub fn handle(&self) -> Option<&FixedHandle> {
        self.hand.as_ref()
    }

    pub fn operand_state(&self, index: usize) -> Option<usize> {
        self.resolve.get(index).copied().flatten()
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// A pending context change recorded while matching.
#[derive(Debug, Clone)]
pub struct ContextSet {
    pub symbol: usize,
    pub point: usize,
    pub num: usize,
    pub mask: u32,
    pub value: u32,
    pub flow: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParserState {
    Uninitialised,
    Disassembly,
    PCode,
}

/// Decode state for one instruction address.
#[derive(Debug, Clone)]
pub struct ParserContext {
    parse_state: ParserState,
    buffer: [u8; INSTRUCTION_BYTES],
    context: Vec<u32>,
    commits: Vec<ContextSet>,

    address: AddressValue,
    next_address: AddressValue,
    next2_address: Option<AddressValue>,
    flow_address: Option<AddressValue>,

    delay_slot: usize,

    alloc: usize,
    states: Vec<ConstructState>,

    const_space: Arc<AddressSpace>,
}

impl ParserContext {
    pub fn new(address: AddressValue, const_space: Arc<AddressSpace>, context_words: usize) -> Self {
        Self {
            parse_state: ParserState::Uninitialised,
            buffer: [0; INSTRUCTION_BYTES],
            context: vec![0; context_words],
            commits: Vec::new(),
            next_address: address.clone(),
            address,
            next2_address: None,
            flow_address: None,
            delay_slot: 0,
            alloc: 1,
            states: vec![ConstructState::default(); 16],
            const_space,
        }
    }

    /// Repurposes the context for a new address; any previous decode is
    /// discarded.
    pub fn set_address(&mut self, address: AddressValue) {
        self.next_address = address.clone();
        self.address = address;
        self.next2_address = None;
        self.flow_address = None;
        self.parse_state = ParserState::Uninitialised;
    }

    pub fn address(&self) -> &AddressValue {
        &self.address
    }

    pub fn next_address(&self) -> &AddressValue {
        &self.next_address
    }

    pub fn next2_address(&self) -> Option<&AddressValue> {
        self.next2_address.as_ref()
    }

    pub fn set_next_address(&mut self, address: AddressValue) {
        self.next_address = address;
    }

    pub fn set_next2_address(&mut self, address: AddressValue) {
        self.next2_address = Some(address);
    }

    pub fn set_flow_address(&mut self, address: Option<AddressValue>) {
        self.flow_address = address;
    }

    pub fn parser_state(&self) -> ParserState {
        self.parse_state
    }

    pub fn set_parser_state(&mut self, state: ParserState) {
        self.parse_state = state;
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn load_context(&mut self, words: &[u32]) {
        self.context.clear();
        self.context.extend_from_slice(words);
    }

    pub fn context(&self) -> &[u32] {
        &self.context
    }

    pub fn delay_slot(&self) -> usize {
        self.delay_slot
    }

    pub fn set_delay_slot(&mut self, bytes: usize) {
        self.delay_slot = bytes;
    }

    /// Length in bytes of the matched instruction.
    pub fn length(&self) -> usize {
        self.states[0].length
    }

    pub fn const_space(&self) -> &Arc<AddressSpace> {
        &self.const_space
    }

    pub fn state(&self, point: usize) -> Option<&ConstructState> {
        self.states[..self.alloc].get(point)
    }

    /// Every state of the current constructor tree; the root is first.
    pub fn states(&self) -> &[ConstructState] {
        &self.states[..self.alloc]
    }

    pub fn commits(&self) -> &[ContextSet] {
        &self.commits
    }

    pub fn clear_commits(&mut self) {
        self.commits.clear();
    }

    /// Drops the constructor tree, leaving a fresh root state.
    pub fn deallocate_state(&mut self) {
        self.alloc = 1;
        self.states[0] = ConstructState::default();
    }

    fn allocate_state(&mut self, parent: usize) -> usize {
        let id = self.alloc;
        if id >= self.states.len() {
            self.states.resize(self.states.len() * 2, ConstructState::default());
        }

        let state = &mut self.states[id];
        state.ct = None;
        state.hand = None;
        state.resolve.clear();
        state.parent = Some(parent);
        state.length = 0;
        state.offset = 0;

        self.alloc += 1;
        id
    }

    pub fn instruction_bytes(&self, byte_start: usize, size: usize, offset: usize) -> Result<u32, Error> {
        let offset = offset + byte_start;
        if offset >= INSTRUCTION_BYTES {
            return Err(Error::bad_data(
                self.address.offset(),
                "Instruction is using more than 16 bytes",
            ));
        }

        Ok((0..size).fold(0u32, |res, i| {
            let byte = self.buffer.get(offset + i).copied().unwrap_or(0);
            res.checked_shl(8).unwrap_or(0) | byte as u32
        }))
    }

    pub fn instruction_bits(&self, start_bit: usize, size: usize, offset: usize) -> Result<u32, Error> {
        let offset = offset + start_bit / 8;
        if offset >= INSTRUCTION_BYTES {
            return Err(Error::bad_data(
                self.address.offset(),
                "Instruction is using more than 16 bytes",
            ));
        }

        let start_bit = start_bit % 8;
        let byte_size = (start_bit + size - 1) / 8 + 1;

        let res = (0..byte_size).fold(0u32, |res, i| {
            let byte = self.buffer.get(offset + i).copied().unwrap_or(0);
            res.checked_shl(8).unwrap_or(0) | byte as u32
        });

        let res = res
            .checked_shl((8 * (size_of::<u32>() - byte_size) + start_bit) as u32)
            .unwrap_or(0);
        Ok(res
            .checked_shr((8 * size_of::<u32>() - size) as u32)
            .unwrap_or(0))
    }

    fn context_word(&self, index: usize) -> u32 {
        self.context.get(index).copied().unwrap_or(0)
    }

    pub fn context_bytes(&self, byte_start: usize, size: usize) -> u32 {
        let word = byte_start / size_of::<u32>();
        let byte_offset = byte_start % size_of::<u32>();
        let unused = size_of::<u32>() - size;

        let mut res = self.context_word(word);
        res = res.checked_shl(8 * byte_offset as u32).unwrap_or(0);
        res = res.checked_shr(8 * unused as u32).unwrap_or(0);

        let remaining = (size + byte_offset).saturating_sub(size_of::<u32>());
        if remaining > 0 && word + 1 < self.context.len() {
            let unused = size_of::<u32>() - remaining;
            res |= self
                .context_word(word + 1)
                .checked_shr(8 * unused as u32)
                .unwrap_or(0);
        }
        res
    }

    pub fn context_bits(&self, start_bit: usize, size: usize) -> u32 {
        let bits = 8 * size_of::<u32>();
        let word = start_bit / bits;
        let bit_offset = start_bit % bits;
        let unused = bits - size;

        let mut res = self.context_word(word);
        res = res.checked_shl(bit_offset as u32).unwrap_or(0);
        res = res.checked_shr(unused as u32).unwrap_or(0);

        let remaining = (size + bit_offset).saturating_sub(bits);
        if remaining > 0 && word + 1 < self.context.len() {
            res |= self
                .context_word(word + 1)
                .checked_shr((bits - remaining) as u32)
                .unwrap_or(0);
        }
        res
    }

    pub fn set_context_word(&mut self, num: usize, value: u32, mask: u32) {
        if num >= self.context.len() {
            self.context.resize(num + 1, 0);
        }
        self.context[num] = (self.context[num] & !mask) | (value & mask);
    }

    pub fn add_commit(&mut self, symbol: usize, num: usize, mask: u32, flow: bool, point: usize) {
        let value = self.context_word(num) & mask;
        self.commits.push(ContextSet {
            symbol,
            point,
            num,
            mask,
            value,
            flow,
        });
    }
}

#[derive(Debug, Copy, Clone)]
struct Detached {
    ct: ConstructorRef,
    offset: usize,
    length: usize,
}

#[derive(Debug, Copy, Clone)]
struct Position {
    point: Option<usize>,
    depth: usize,
    breadcrumb: [usize; MAX_DEPTH],
    detached: Option<Detached>,
}

impl Position {
    fn base() -> Self {
        Self {
            point: Some(0),
            depth: 0,
            breadcrumb: [0; MAX_DEPTH],
            detached: None,
        }
    }
}

/// Read-only cursor over a resolved constructor tree.
///
/// Addresses are taken from the cross context, which differs from the
/// context being walked only while splicing in another instruction's
/// semantics.
#[derive(Debug, Clone)]
pub struct ParserWalker<'a> {
    ctx: &'a ParserContext,
    cross: &'a ParserContext,
    symbols: &'a SymbolTable,
    pos: Position,
}

impl<'a> ParserWalker<'a> {
    pub fn new(ctx: &'a ParserContext, symbols: &'a SymbolTable) -> Self {
        Self {
            ctx,
            cross: ctx,
            symbols,
            pos: Position::base(),
        }
    }

    pub fn with_cross(ctx: &'a ParserContext, cross: &'a ParserContext, symbols: &'a SymbolTable) -> Self {
        Self {
            ctx,
            cross,
            symbols,
            pos: Position::base(),
        }
    }

    pub fn context(&self) -> &'a ParserContext {
        self.ctx
    }

    pub fn symbols(&self) -> &'a SymbolTable {
        self.symbols
    }

    pub fn base_state(&mut self) {
        self.pos = Position::base();
    }

    /// Positions the walker on `point` as if it were the root.
    pub fn subtree_state(&mut self, point: usize) {
        self.pos = Position {
            point: Some(point),
            ..Position::base()
        };
    }

    pub fn is_state(&self) -> bool {
        self.pos.point.is_some() || self.pos.detached.is_some()
    }

    pub fn point(&self) -> Option<usize> {
        self.pos.point
    }

    fn current(&self) -> Result<&'a ConstructState, Error> {
        self.pos
            .point
            .and_then(|p| self.ctx.states.get(p))
            .ok_or_else(|| Error::invariant("walker is not positioned on a constructor state"))
    }

    pub fn push_operand(&mut self, index: usize) -> Result<(), Error> {
        let next = self.current()?.operand_state(index).ok_or(Error::InvalidHandle)?;
        if self.pos.depth + 1 >= MAX_DEPTH {
            return Err(Error::invariant("constructor nesting too deep"));
        }
        self.pos.breadcrumb[self.pos.depth] = index + 1;
        self.pos.depth += 1;
        self.pos.point = Some(next);
        self.pos.breadcrumb[self.pos.depth] = 0;
        Ok(())
    }

    pub fn pop_operand(&mut self) {
        self.pos.point = self.pos.point.and_then(|p| self.ctx.states[p].parent);
        self.pos.depth = self.pos.depth.saturating_sub(1);
    }

    /// Index of the next operand to visit at the current depth.
    pub fn operand(&self) -> usize {
        self.pos.breadcrumb[self.pos.depth]
    }

    pub fn constructor(&self) -> Result<ConstructorRef, Error> {
        if let Some(detached) = self.pos.detached {
            return Ok(detached.ct);
        }
        self.current()?
            .ct
            .ok_or_else(|| Error::invariant("constructor state is unresolved"))
    }

    fn current_offset(&self) -> Result<usize, Error> {
        match self.pos.detached {
            Some(detached) => Ok(detached.offset),
            None => Ok(self.current()?.offset),
        }
    }

    /// Absolute byte offset of the current constructor, or of the end of
    /// operand `index` when given.
    pub fn offset(&self, index: Option<usize>) -> Result<usize, Error> {
        match index {
            None => self.current_offset(),
            Some(index) => {
                let op = self.current()?.operand_state(index).ok_or(Error::InvalidHandle)?;
                let op = &self.ctx.states[op];
                Ok(op.offset + op.length)
            }
        }
    }

    pub fn current_length(&self) -> Result<usize, Error> {
        match self.pos.detached {
            Some(detached) => Ok(detached.length),
            None => Ok(self.current()?.length),
        }
    }

    pub fn length(&self) -> usize {
        self.ctx.length()
    }

    pub fn fixed_handle(&self, index: usize) -> Result<&'a FixedHandle, Error> {
        let op = self.current()?.operand_state(index).ok_or(Error::InvalidHandle)?;
        self.ctx.states[op].hand.as_ref().ok_or(Error::InvalidHandle)
    }

    pub fn parent_handle(&self) -> Result<&'a FixedHandle, Error> {
        self.current()?.hand.as_ref().ok_or(Error::InvalidHandle)
    }

    pub fn address(&self) -> &'a AddressValue {
        &self.cross.address
    }

    pub fn next_address(&self) -> &'a AddressValue {
        &self.cross.next_address
    }

    pub fn next2_address(&self) -> Option<&'a AddressValue> {
        self.cross.next2_address.as_ref()
    }

    pub fn flow_address(&self) -> Result<&'a AddressValue, Error> {
        self.cross
            .flow_address
            .as_ref()
            .ok_or_else(|| Error::invariant("flow reference address is not available"))
    }

    pub fn current_space(&self) -> &'a Arc<AddressSpace> {
        self.ctx.address.space()
    }

    pub fn const_space(&self) -> &'a Arc<AddressSpace> {
        &self.ctx.const_space
    }

    pub fn instruction_bytes(&self, byte_start: usize, size: usize) -> Result<u32, Error> {
        self.ctx
            .instruction_bytes(byte_start, size, self.current_offset()?)
    }

    pub fn instruction_bits(&self, start_bit: usize, size: usize) -> Result<u32, Error> {
        self.ctx
            .instruction_bits(start_bit, size, self.current_offset()?)
    }

    pub fn context_bytes(&self, byte_start: usize, size: usize) -> u32 {
        self.ctx.context_bytes(byte_start, size)
    }

    pub fn context_bits(&self, start_bit: usize, size: usize) -> u32 {
        self.ctx.context_bits(start_bit, size)
    }

    /// A walker positioned on operand `index` of the nearest enclosing
    /// instance of `ct`, usable before that operand's branch is built.
    pub fn out_of_band(&self, ct: ConstructorRef, index: usize, operand: &OperandSymbol) -> ParserWalker<'a> {
        let mut point = self.pos.point;
        while let Some(p) = point {
            let state = &self.ctx.states[p];
            if state.ct == Some(ct) {
                break;
            }
            point = state.parent;
        }

        let detached = match point {
            Some(p) => {
                let state = &self.ctx.states[p];
                let offset = match operand.offset_base() {
                    None => state.offset + operand.relative_offset(),
                    Some(_) => state
                        .operand_state(index)
                        .map(|op| self.ctx.states[op].offset)
                        .unwrap_or(state.offset),
                };
                Some(Detached {
                    ct,
                    offset,
                    length: state.length,
                })
            }
            None => match self.pos.detached {
                Some(detached) if detached.ct == ct => Some(Detached {
                    ct,
                    offset: if operand.offset_base().is_none() {
                        detached.offset + operand.relative_offset()
                    } else {
                        detached.offset
                    },
                    length: detached.length,
                }),
                _ => None,
            },
        };

        let mut walker = self.clone();
        if let Some(detached) = detached {
            walker.pos = Position {
                point: None,
                depth: 0,
                breadcrumb: [0; MAX_DEPTH],
                detached: Some(detached),
            };
        }
        walker
    }
}

/// Cursor used while building a constructor tree.
#[derive(Debug)]
pub struct ParserWalkerChange<'a> {
    ctx: &'a mut ParserContext,
    symbols: &'a SymbolTable,
    pos: Position,
}

impl<'a> ParserWalkerChange<'a> {
    pub fn new(ctx: &'a mut ParserContext, symbols: &'a SymbolTable) -> Self {
        Self {
            ctx,
            symbols,
            pos: Position::base(),
        }
    }

    /// A read-only walker at the same position.
    pub fn view(&self) -> ParserWalker<'_> {
        ParserWalker {
            ctx: &*self.ctx,
            cross: &*self.ctx,
            symbols: self.symbols,
            pos: self.pos,
        }
    }

    pub fn context_mut(&mut self) -> &mut ParserContext {
        self.ctx
    }

    pub fn is_state(&self) -> bool {
        self.pos.point.is_some()
    }

    pub fn point(&self) -> Option<usize> {
        self.pos.point
    }

    pub fn operand(&self) -> usize {
        self.pos.breadcrumb[self.pos.depth]
    }

    fn current_mut(&mut self) -> Result<&mut ConstructState, Error> {
        let point = self
            .pos
            .point
            .ok_or_else(|| Error::invariant("walker is not positioned on a constructor state"))?;
        Ok(&mut self.ctx.states[point])
    }

    pub fn set_offset(&mut self, offset: usize) -> Result<(), Error> {
        self.current_mut()?.offset = offset;
        Ok(())
    }

    pub fn set_constructor(&mut self, ct: ConstructorRef) -> Result<(), Error> {
        self.current_mut()?.ct = Some(ct);
        Ok(())
    }

    pub fn set_current_length(&mut self, length: usize) -> Result<(), Error> {
        self.current_mut()?.length = length;
        Ok(())
    }

    pub fn set_parent_handle(&mut self, handle: FixedHandle) -> Result<(), Error> {
        self.current_mut()?.hand = Some(handle);
        Ok(())
    }

    /// Sets the current length from the constructor's minimum length and
    /// the extent of its first `operands` operands.
    pub fn calc_current_length(&mut self, min_length: usize, operands: usize) -> Result<(), Error> {
        let point = self
            .pos
            .point
            .ok_or_else(|| Error::invariant("walker is not positioned on a constructor state"))?;
        let state = &self.ctx.states[point];

        let mut length = min_length + state.offset;
        for index in 0..operands {
            let sub = state.operand_state(index).ok_or(Error::InvalidHandle)?;
            let sub = &self.ctx.states[sub];
            length = length.max(sub.length + sub.offset);
        }

        let offset = state.offset;
        self.ctx.states[point].length = length - offset;
        Ok(())
    }

    /// Creates the state for operand `index` and descends into it.
    pub fn allocate_operand(&mut self, index: usize) -> Result<(), Error> {
        let point = self
            .pos
            .point
            .ok_or_else(|| Error::invariant("walker is not positioned on a constructor state"))?;
        if self.pos.depth + 1 >= MAX_DEPTH {
            return Err(Error::bad_data(
                self.ctx.address.offset(),
                "constructor nesting too deep",
            ));
        }

        let op = self.ctx.allocate_state(point);
        let resolve = &mut self.ctx.states[point].resolve;
        if resolve.len() <= index {
            resolve.resize(index + 1, None);
        }
        resolve[index] = Some(op);

        self.pos.breadcrumb[self.pos.depth] += 1;
        self.pos.depth += 1;
        self.pos.point = Some(op);
        self.pos.breadcrumb[self.pos.depth] = 0;
        Ok(())
    }

    pub fn push_operand(&mut self, index: usize) -> Result<(), Error> {
        let point = self
            .pos
            .point
            .ok_or_else(|| Error::invariant("walker is not positioned on a constructor state"))?;
        let next = self.ctx.states[point]
            .operand_state(index)
            .ok_or(Error::InvalidHandle)?;
        self.pos.breadcrumb[self.pos.depth] = index + 1;
        self.pos.depth += 1;
        self.pos.point = Some(next);
        self.pos.breadcrumb[self.pos.depth] = 0;
        Ok(())
    }

    pub fn pop_operand(&mut self) {
        self.pos.point = self.pos.point.and_then(|p| self.ctx.states[p].parent);
        self.pos.depth = self.pos.depth.saturating_sub(1);
    }

    pub fn set_context_word(&mut self, num: usize, value: u32, mask: u32) {
        self.ctx.set_context_word(num, value, mask);
    }

    pub fn add_commit(&mut self, symbol: usize, num: usize, mask: u32, flow: bool) -> Result<(), Error> {
        let point = self
            .pos
            .point
            .ok_or_else(|| Error::invariant("walker is not positioned on a constructor state"))?;
        self.ctx.add_commit(symbol, num, mask, flow, point);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::space_manager::SpaceManager;
    use crate::space::SpaceKind;

    fn context() -> ParserContext {
        let mut manager = SpaceManager::new();
        let ram = manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);
        ParserContext::new(
            AddressValue::new(ram, 0x1000),
            manager.constant_space().clone(),
            2,
        )
    }

    #[test]
    fn instruction_bits_and_bytes() -> Result<(), Error> {
        let mut ctx = context();
        ctx.buffer_mut()[..3].copy_from_slice(&[0xa5, 0x3c, 0xff]);

        assert_eq!(ctx.instruction_bytes(0, 2, 0)?, 0xa53c);
        assert_eq!(ctx.instruction_bytes(1, 1, 1)?, 0xff);
        assert_eq!(ctx.instruction_bits(0, 4, 0)?, 0xa);
        assert_eq!(ctx.instruction_bits(6, 4, 0)?, 0b0100);
        assert_eq!(ctx.instruction_bits(0, 8, 2)?, 0xff);

        assert!(ctx.instruction_bytes(0, 1, 16).map_err(|e| e.is_bad_data()).unwrap_err());
        Ok(())
    }

    #[test]
    fn context_reads_span_words() {
        let mut ctx = context();
        ctx.load_context(&[0x1234_5678, 0x9abc_def0]);

        assert_eq!(ctx.context_bytes(0, 1), 0x12);
        assert_eq!(ctx.context_bytes(2, 4), 0x5678_9abc);
        assert_eq!(ctx.context_bits(4, 8), 0x23);
        assert_eq!(ctx.context_bits(28, 8), 0x89);

        ctx.set_context_word(1, 0x0000_00ff, 0x0000_000f);
        assert_eq!(ctx.context()[1], 0x9abc_deff);
    }

    #[test]
    fn operand_allocation_and_lengths() -> Result<(), Error> {
        let mut ctx = context();
        let symbols = SymbolTable::default();
        let mut walker = ParserWalkerChange::new(&mut ctx, &symbols);

        walker.set_offset(0)?;
        walker.allocate_operand(0)?;
        walker.set_offset(1)?;
        walker.set_current_length(2)?;
        walker.pop_operand();

        walker.allocate_operand(1)?;
        walker.set_offset(3)?;
        walker.set_current_length(1)?;
        walker.pop_operand();

        assert_eq!(walker.operand(), 2);
        walker.calc_current_length(1, 2)?;
        walker.pop_operand();
        assert!(!walker.is_state());

        assert_eq!(ctx.length(), 4);
        let view = ParserWalker::new(&ctx, &symbols);
        assert_eq!(view.offset(Some(0))?, 3);
        assert_eq!(view.offset(Some(1))?, 4);
        Ok(())
    }

    #[test]
    fn commits_capture_masked_value() {
        let mut ctx = context();
        ctx.load_context(&[0xf0f0_0000, 0]);
        ctx.add_commit(7, 0, 0xff00_0000, true, 0);

        let commit = &ctx.commits()[0];
        assert_eq!(commit.value, 0xf000_0000);
        assert!(commit.flow);

        ctx.clear_commits();
        assert!(ctx.commits().is_empty());
    }
}
