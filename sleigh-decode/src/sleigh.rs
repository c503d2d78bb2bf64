use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap as Map;
use ustr::Ustr;

use crate::address::AddressValue;
use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::cache::DisassemblyCache;
use crate::disassembly::context::{ContextCache, ContextDatabase};
use crate::disassembly::symbol::{SymbolData, SymbolKind, SymbolTable};
use crate::disassembly::walker::{
    FixedHandle, ParserContext, ParserState, ParserWalker, ParserWalkerChange, INSTRUCTION_BYTES,
};
use crate::disassembly::{ConstructTpl, Error, Opcode, PatternExpression, PcodeBuilder, PcodeData, VarnodeData};
use crate::error::Error as LoadError;
use crate::space::AddressSpace;
use crate::space_manager::SpaceManager;

/// Version of the persisted specification format this engine reads.
pub const SLA_FORMAT_VERSION: u32 = 3;

/// Supplies instruction bytes.
pub trait LoadImage {
    /// Fills `buffer` with the image contents starting at `address`; bytes
    /// outside the image should be zero.
    fn load_fill(&self, buffer: &mut [u8], address: &AddressValue);
}

/// A flat image based at offset zero.
impl LoadImage for [u8] {
    fn load_fill(&self, buffer: &mut [u8], address: &AddressValue) {
        let start = address.offset() as usize;
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = start
                .checked_add(i)
                .and_then(|offset| self.get(offset))
                .copied()
                .unwrap_or(0);
        }
    }
}

impl LoadImage for Vec<u8> {
    fn load_fill(&self, buffer: &mut [u8], address: &AddressValue) {
        self.as_slice().load_fill(buffer, address)
    }
}

/// Receives the text of one disassembled instruction.
pub trait AssemblyEmitter {
    fn dump(&mut self, address: &AddressValue, mnemonic: &str, body: &str);
}

impl AssemblyEmitter for String {
    fn dump(&mut self, _address: &AddressValue, mnemonic: &str, body: &str) {
        self.clear();
        self.push_str(mnemonic);
        if !body.is_empty() {
            self.push(' ');
            self.push_str(body);
        }
    }
}

/// Receives p-code operations, one call per operation.
pub trait PcodeEmitter {
    fn dump(
        &mut self,
        address: &AddressValue,
        opcode: Opcode,
        output: Option<&VarnodeData>,
        inputs: &[VarnodeData],
    );
}

impl PcodeEmitter for Vec<PcodeData> {
    fn dump(
        &mut self,
        _address: &AddressValue,
        opcode: Opcode,
        output: Option<&VarnodeData>,
        inputs: &[VarnodeData],
    ) {
        self.push(PcodeData {
            opcode,
            output: output.cloned(),
            inputs: inputs.iter().cloned().collect(),
        });
    }
}

/// Processor-wide settings carried by a specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleighConfig {
    pub big_endian: bool,
    pub alignment: usize,
    pub unique_base: u64,
    pub max_delay: usize,
    pub unique_mask: u64,
    pub sections: usize,
}

impl Default for SleighConfig {
    fn default() -> Self {
        Self {
            big_endian: false,
            alignment: 1,
            unique_base: 0x1000,
            max_delay: 0,
            unique_mask: 0,
            sections: 0,
        }
    }
}

impl SleighConfig {
    /// Cache sizing: specifications with long delay slots or per-address
    /// temporaries revisit more nearby instructions per decode.
    fn cache_sizes(&self, lookahead: bool) -> (usize, usize) {
        if self.max_delay > 1 || self.unique_mask != 0 || lookahead {
            (8, 256)
        } else {
            (2, 32)
        }
    }
}

/// A loaded specification together with its decode caches.
#[derive(Debug, Clone)]
pub struct Sleigh {
    config: SleighConfig,
    source_files: Vec<String>,

    spaces: SpaceManager,
    symbols: SymbolTable,
    root: usize,

    registers: BTreeMap<(usize, u64, Reverse<usize>), Ustr>,
    user_ops: Vec<Ustr>,
    lookahead: bool,

    contexts: ContextCache,
    disassembly: DisassemblyCache,
}

impl Sleigh {
    /// Prepares a grammar for decoding, building its patterns and decision
    /// trees if that has not been done.
    pub fn new(config: SleighConfig, spaces: SpaceManager, symbols: SymbolTable) -> Result<Self, Error> {
        Self::with_source_files(config, spaces, symbols, Vec::new())
    }

    pub fn with_source_files(
        config: SleighConfig,
        spaces: SpaceManager,
        mut symbols: SymbolTable,
        source_files: Vec<String>,
    ) -> Result<Self, Error> {
        if config.alignment == 0 {
            return Err(Error::specification("instruction alignment must be non-zero"));
        }

        let root = symbols.root()?.id();
        if symbols.symbol(root)?.as_subtable()?.decision().is_none() {
            symbols.build_patterns()?;
        }

        let mut database = ContextDatabase::new();
        let mut registers = BTreeMap::new();
        let mut user_ops = Vec::new();

        let global = symbols.global_scope().id();
        for symbol in symbols.symbols().iter().filter(|s| s.scope() == global) {
            match *symbol.data() {
                SymbolData::Varnode {
                    ref space,
                    offset,
                    size,
                } => {
                    registers
                        .entry((space.index(), offset, Reverse(size)))
                        .or_insert_with(|| Ustr::from(symbol.name()));
                }
                SymbolData::Context { ref pattern, .. } => match **pattern {
                    PatternExpression::ContextField(ref field) => {
                        database.register_variable(symbol.name(), field.start_bit(), field.end_bit())?
                    }
                    _ => {
                        return Err(Error::specification(format!(
                            "context symbol `{}` does not have a context field",
                            symbol.name()
                        )))
                    }
                },
                SymbolData::UserOp { index } => {
                    if user_ops.len() <= index {
                        user_ops.resize(index + 1, Ustr::from(""));
                    }
                    user_ops[index] = Ustr::from(symbol.name());
                }
                _ => (),
            }
        }

        let lookahead = symbols.symbols_of(SymbolKind::Next2).next().is_some();
        let (reuse, window) = config.cache_sizes(lookahead);
        let disassembly = DisassemblyCache::new(
            spaces.constant_space().clone(),
            database.size().max(1),
            reuse,
            window,
        )?;

        log::debug!(
            "loaded specification: {} spaces, {} symbols, {} context words",
            spaces.spaces().len(),
            symbols.len(),
            database.size(),
        );

        Ok(Self {
            config,
            source_files,
            spaces,
            symbols,
            root,
            registers,
            user_ops,
            lookahead,
            contexts: ContextCache::new(database),
            disassembly,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let input = fs::read_to_string(path).map_err(|error| LoadError::ParseFile {
            path: path.to_owned(),
            error,
        })?;

        Self::from_str(&input).map_err(|error| LoadError::DeserialiseFile {
            path: path.to_owned(),
            error,
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str<S: AsRef<str>>(input: S) -> Result<Self, Error> {
        let document = xml::Document::parse(input.as_ref()).map_err(DeserialiseError::Xml)?;
        Self::from_xml(document.root_element())
    }

    pub fn from_xml(input: xml::Node) -> Result<Self, Error> {
        input.expect_tag("sleigh")?;

        let version = input.attribute_int_opt::<u32>("version", 0)?;
        if version != SLA_FORMAT_VERSION {
            return Err(DeserialiseError::VersionMismatch {
                expected: SLA_FORMAT_VERSION,
                found: version,
            }
            .into());
        }

        let config = SleighConfig {
            big_endian: input.attribute_bool("bigendian")?,
            alignment: input.attribute_int("align")?,
            unique_base: input.attribute_int("uniqbase")?,
            max_delay: input.attribute_int_opt("maxdelay", 0)?,
            unique_mask: input.attribute_int_opt("uniqmask", 0)?,
            sections: input.attribute_int_opt("numsections", 0)?,
        };

        let mut source_files = Vec::new();
        let mut spaces = None;
        let mut symbols = None;

        for child in input.children().filter(xml::Node::is_element) {
            match child.tag_name().name() {
                "floatformat" | "floatformats" => (),
                "sourcefiles" => {
                    for file in child.children().filter(xml::Node::is_element) {
                        file.expect_tag("sourcefile")?;
                        let index = file.attribute_int::<usize>("index")?;
                        if source_files.len() <= index {
                            source_files.resize(index + 1, String::new());
                        }
                        source_files[index] = file.attribute_string("name")?;
                    }
                }
                "spaces" => spaces = Some(SpaceManager::from_xml(child)?),
                "symbol_table" => {
                    let manager = spaces
                        .as_ref()
                        .ok_or(DeserialiseError::Invariant("symbol table precedes spaces"))?;
                    symbols = Some(SymbolTable::from_xml(child, manager)?);
                }
                name => return Err(DeserialiseError::TagUnexpected(name.to_owned()).into()),
            }
        }

        let spaces = spaces.ok_or(DeserialiseError::Invariant("spaces not defined"))?;
        let symbols = symbols.ok_or(DeserialiseError::Invariant("symbol table not defined"))?;

        log::debug!("read specification format version {}", version);

        Self::with_source_files(config, spaces, symbols, source_files)
    }

    pub fn to_xml(&self) -> String {
        let mut out = XmlWriter::new();
        out.start("sleigh")
            .attr("version", SLA_FORMAT_VERSION)
            .attr("bigendian", self.config.big_endian)
            .attr("align", self.config.alignment)
            .attr_hex("uniqbase", self.config.unique_base);
        if self.config.max_delay > 0 {
            out.attr("maxdelay", self.config.max_delay);
        }
        if self.config.unique_mask != 0 {
            out.attr_hex("uniqmask", self.config.unique_mask);
        }
        if self.config.sections > 0 {
            out.attr("numsections", self.config.sections);
        }

        out.start("sourcefiles");
        for (index, name) in self.source_files.iter().enumerate() {
            out.start("sourcefile")
                .attr("name", name)
                .attr("index", index)
                .end();
        }
        out.end();

        self.spaces.to_xml(&mut out);
        self.symbols.to_xml(&mut out);
        out.end();
        out.finish()
    }

    pub fn config(&self) -> &SleighConfig {
        &self.config
    }

    pub fn is_big_endian(&self) -> bool {
        self.config.big_endian
    }

    pub fn alignment(&self) -> usize {
        self.config.alignment
    }

    pub fn source_files(&self) -> &[String] {
        &self.source_files
    }

    pub fn manager(&self) -> &SpaceManager {
        &self.spaces
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// An address in the default code space.
    pub fn address(&self, offset: u64) -> AddressValue {
        AddressValue::new(self.spaces.default_space().clone(), offset)
    }

    pub fn context_cache(&self) -> &ContextCache {
        &self.contexts
    }

    /// Direct access to the context store; cached decodes are dropped since
    /// they may depend on the old values.
    pub fn context_cache_mut(&mut self) -> &mut ContextCache {
        self.disassembly.clear();
        &mut self.contexts
    }

    /// Enables or suppresses context changes made by decoded instructions.
    pub fn allow_context_set(&mut self, allow: bool) {
        self.contexts.allow_set(allow);
    }

    pub fn set_variable_default(&mut self, name: &str, value: u32) -> Result<(), Error> {
        self.disassembly.clear();
        self.contexts.database_mut().set_variable_default(name, value)
    }

    /// Sets a context variable from `address` onwards.
    pub fn set_variable(&mut self, name: &str, address: &AddressValue, value: u32) -> Result<(), Error> {
        self.disassembly.clear();
        self.contexts.database_mut().set_variable(name, address, value)
    }

    pub fn get_variable(&self, name: &str, address: &AddressValue) -> Result<u32, Error> {
        self.contexts.database().get_variable(name, address)
    }

    /// The name of the register containing `size` bytes at `offset`.
    pub fn register_name(&self, space: &AddressSpace, offset: u64, size: usize) -> Option<&str> {
        let key = (space.index(), offset, Reverse(size));
        let mut candidates = self.registers.range(..=key).rev();

        let (&(index, base, Reverse(length)), name) = candidates.next()?;
        if index != space.index() {
            return None;
        }
        if base + length as u64 >= offset + size as u64 {
            return Some(name.as_str());
        }

        for (&(index, start, Reverse(length)), name) in candidates {
            if index != space.index() || start != base {
                return None;
            }
            if start + length as u64 >= offset + size as u64 {
                return Some(name.as_str());
            }
        }
        None
    }

    /// Every named register, ordered by location.
    pub fn all_registers(&self) -> Vec<(VarnodeData, &str)> {
        self.registers
            .iter()
            .filter_map(|(&(index, offset, Reverse(size)), name)| {
                let space = self.spaces.spaces().get(index)?.clone();
                Some((VarnodeData::new(space, offset, size), name.as_str()))
            })
            .collect()
    }

    /// User-defined operation names indexed by their CALLOTHER number.
    pub fn user_op_names(&self) -> &[Ustr] {
        &self.user_ops
    }

    fn check_alignment(&self, address: &AddressValue) -> Result<(), Error> {
        if address.offset() % self.config.alignment as u64 != 0 {
            Err(Error::bad_data(
                address.offset(),
                format!("{}: Instruction address not aligned", address),
            ))
        } else {
            Ok(())
        }
    }

    /// Byte length of the instruction at `address`.
    pub fn instruction_length<L: LoadImage + ?Sized>(
        &mut self,
        image: &L,
        address: &AddressValue,
    ) -> Result<usize, Error> {
        self.check_alignment(address)?;
        let slot = self.obtain_context(image, address, ParserState::Disassembly)?;
        Ok(self.disassembly.context(slot).length())
    }

    /// Disassembles one instruction, returning its length.
    pub fn print_assembly<L, E>(&mut self, image: &L, emitter: &mut E, address: &AddressValue) -> Result<usize, Error>
    where
        L: LoadImage + ?Sized,
        E: AssemblyEmitter + ?Sized,
    {
        self.check_alignment(address)?;
        let slot = self.obtain_context(image, address, ParserState::Disassembly)?;

        let ctx = self.disassembly.context(slot);
        let mut walker = ParserWalker::new(ctx, &self.symbols);
        walker.base_state();

        let ct = self.symbols.constructor(walker.constructor()?)?;
        let mut mnemonic = String::new();
        ct.print_mnemonic(&mut mnemonic, &mut walker)?;

        walker.base_state();
        let mut body = String::new();
        ct.print_body(&mut body, &mut walker)?;

        emitter.dump(address, &mnemonic, &body);
        Ok(ctx.length())
    }

    /// Generates the p-code for one instruction, including any delay slot,
    /// returning the offset of the fall-through address.
    pub fn one_instruction<L, E>(&mut self, image: &L, emitter: &mut E, address: &AddressValue) -> Result<usize, Error>
    where
        L: LoadImage + ?Sized,
        E: PcodeEmitter + ?Sized,
    {
        self.check_alignment(address)?;

        let slot = self.obtain_context(image, address, ParserState::PCode)?;
        self.apply_commits(slot)?;

        let mut fall = self.disassembly.context(slot).length();
        let delay = self.disassembly.context(slot).delay_slot();

        let mut others = Vec::new();
        let mut spliced = vec![slot];

        if delay > 0 {
            let mut bytes = 0;
            loop {
                let next = address + fall as u64;
                let delay_slot = self.obtain_context(image, &next, ParserState::PCode)?;
                self.apply_commits(delay_slot)?;

                let length = self.disassembly.context(delay_slot).length();
                if length == 0 {
                    return Err(Error::invariant(format!("{}: zero-length delay slot instruction", next)));
                }

                others.push(next);
                spliced.push(delay_slot);
                fall += length;
                bytes += length;

                if bytes >= delay {
                    break;
                }
            }
            self.disassembly
                .context_mut(slot)
                .set_next_address(address + fall as u64);
        }

        let mut targets = Vec::new();
        for slot in spliced {
            self.cross_build_targets(slot, &mut targets)?;
        }
        for target in targets.iter() {
            self.obtain_context(image, target, ParserState::PCode)?;
        }

        let main = self.resident(address)?;
        let mut resolved = Map::default();
        for other in others.into_iter().chain(targets.into_iter()) {
            let ctx = self.resident(&other)?;
            resolved.insert(other, ctx);
        }

        let walker = ParserWalker::new(main, &self.symbols);
        let mut builder = PcodeBuilder::new(
            walker,
            resolved,
            &self.spaces,
            self.config.unique_base,
            self.config.unique_mask,
        );

        match builder
            .build_instruction()
            .and_then(|_| builder.resolve_relatives())
        {
            Ok(()) => (),
            Err(Error::Unimplemented { address, text, .. }) => {
                return Err(Error::Unimplemented {
                    address,
                    length: fall,
                    text,
                })
            }
            Err(e) => return Err(e),
        }

        for op in builder.into_operations() {
            emitter.dump(address, op.opcode, op.output.as_ref(), &op.inputs);
        }

        Ok(fall)
    }

    fn resident(&self, address: &AddressValue) -> Result<&ParserContext, Error> {
        self.disassembly
            .cached(address)
            .filter(|ctx| ctx.parser_state() == ParserState::PCode)
            .ok_or_else(|| {
                Error::invariant(format!("{}: decode state evicted from the disassembly cache", address))
            })
    }

    /// Brings the decode state for `address` up to at least `state`.
    fn obtain_context<L: LoadImage + ?Sized>(
        &mut self,
        image: &L,
        address: &AddressValue,
        state: ParserState,
    ) -> Result<usize, Error> {
        let slot = self.disassembly.slot(address);
        self.refresh(image, slot);
        let current = self.disassembly.context(slot).parser_state();
        if current >= state {
            return Ok(slot);
        }

        if current == ParserState::Uninitialised {
            self.resolve(image, slot).map_err(|e| {
                log::debug!("{}: cannot resolve instruction: {}", address, e);
                e
            })?;
            if self.lookahead {
                self.resolve_next2(image, slot);
            }
        }

        if state == ParserState::PCode {
            self.resolve_handles(slot).map_err(|e| {
                log::debug!("{}: cannot resolve operands: {}", address, e);
                e
            })?;
        }
        Ok(slot)
    }

    /// Drops a cached decode whose bytes no longer match `image`.
    fn refresh<L: LoadImage + ?Sized>(&mut self, image: &L, slot: usize) {
        let ctx = self.disassembly.context_mut(slot);
        if ctx.parser_state() == ParserState::Uninitialised {
            return;
        }

        let mut bytes = [0u8; INSTRUCTION_BYTES];
        image.load_fill(&mut bytes, ctx.address());
        if bytes[..] != *ctx.buffer() {
            log::trace!("{}: instruction bytes changed; decoding again", ctx.address());
            ctx.set_parser_state(ParserState::Uninitialised);
        }
    }

    /// Records the address after the following instruction. A following
    /// instruction that does not decode leaves it unset.
    fn resolve_next2<L: LoadImage + ?Sized>(&mut self, image: &L, slot: usize) {
        let next = self.disassembly.context(slot).next_address().clone();
        let next_slot = self.disassembly.slot(&next);
        self.refresh(image, next_slot);

        if self.disassembly.context(next_slot).parser_state() == ParserState::Uninitialised {
            if let Err(e) = self.resolve(image, next_slot) {
                log::debug!("{}: no instruction following for inst_next2: {}", next, e);
                return;
            }
        }

        let next2 = &next + self.disassembly.context(next_slot).length() as u64;
        self.disassembly.context_mut(slot).set_next2_address(next2);
    }

    /// Matches constructors against the bytes at the slot's address.
    fn resolve<L: LoadImage + ?Sized>(&mut self, image: &L, slot: usize) -> Result<(), Error> {
        let Self {
            ref symbols,
            ref mut contexts,
            ref mut disassembly,
            root,
            ..
        } = *self;

        let ctx = disassembly.context_mut(slot);
        let address = ctx.address().clone();

        image.load_fill(ctx.buffer_mut(), &address);
        ctx.deallocate_state();
        ctx.set_delay_slot(0);
        ctx.clear_commits();
        ctx.load_context(contexts.get_context(&address));

        let mut delay = 0;
        {
            let mut walker = ParserWalkerChange::new(ctx, symbols);
            walker.set_offset(0)?;

            let ct = symbols
                .symbol(root)?
                .resolve(&walker.view())?
                .ok_or(Error::InvalidSymbol)?;
            walker.set_constructor(ct)?;
            symbols.constructor(ct)?.apply_context(&mut walker)?;

            while walker.is_state() {
                let ct = symbols.constructor(walker.view().constructor()?)?;
                let count = ct.operand_count();
                let mut index = walker.operand();

                while index < count {
                    let operand = ct.operand(index).ok_or(Error::InvalidHandle)?;
                    let operand = symbols.symbol(operand)?.as_operand()?;

                    let offset = walker.view().offset(operand.offset_base())? + operand.relative_offset();
                    walker.allocate_operand(index)?;
                    walker.set_offset(offset)?;

                    if let Some(defining) = operand.defining_symbol() {
                        let sub = symbols.symbol(defining)?.resolve(&walker.view())?;
                        if let Some(sub) = sub {
                            walker.set_constructor(sub)?;
                            symbols.constructor(sub)?.apply_context(&mut walker)?;
                            break;
                        }
                    }

                    walker.set_current_length(operand.minimum_length())?;
                    walker.pop_operand();
                    index += 1;
                }

                if index >= count {
                    walker.calc_current_length(ct.minimum_length(), count)?;
                    walker.pop_operand();

                    if let Some(template) = ct.template() {
                        if template.delay_slot() > 0 {
                            delay = template.delay_slot();
                        }
                    }
                }
            }
        }

        ctx.set_delay_slot(delay);
        let next = &address + ctx.length() as u64;
        ctx.set_next_address(next);
        ctx.set_parser_state(ParserState::Disassembly);
        Ok(())
    }

    /// Fixes every operand's handle, bottom up, exporting constructor
    /// results to their parents.
    fn resolve_handles(&mut self, slot: usize) -> Result<(), Error> {
        let Self {
            ref symbols,
            ref mut disassembly,
            ..
        } = *self;

        let ctx = disassembly.context_mut(slot);
        let const_space = ctx.const_space().clone();

        {
            let mut walker = ParserWalkerChange::new(ctx, symbols);
            while walker.is_state() {
                let ct = symbols.constructor(walker.view().constructor()?)?;
                let count = ct.operand_count();
                let mut index = walker.operand();

                while index < count {
                    let operand = ct.operand(index).ok_or(Error::InvalidHandle)?;
                    let operand = symbols.symbol(operand)?.as_operand()?;
                    walker.push_operand(index)?;

                    let handle = if let Some(defining) = operand.defining_symbol() {
                        let symbol = symbols.symbol(defining)?;
                        if symbol.is_subtable() {
                            break;
                        }
                        symbol.fixed_handle(&walker.view())?
                    } else if let Some(expression) = operand.defining_expression() {
                        let value = expression.value(&walker.view())?;
                        FixedHandle::constant(const_space.clone(), value as u64)
                    } else {
                        return Err(Error::specification("operand has no defining symbol or expression"));
                    };

                    walker.set_parent_handle(handle)?;
                    walker.pop_operand();
                    index += 1;
                }

                if index >= count {
                    if let Some(result) = ct.template().and_then(ConstructTpl::result) {
                        let handle = result.fix(&walker.view())?;
                        walker.set_parent_handle(handle)?;
                    }
                    walker.pop_operand();
                }
            }
        }

        ctx.set_parser_state(ParserState::PCode);
        Ok(())
    }

    /// Writes the slot's recorded context changes to the context store.
    fn apply_commits(&mut self, slot: usize) -> Result<(), Error> {
        let Self {
            ref symbols,
            ref mut contexts,
            ref mut disassembly,
            ..
        } = *self;

        let ctx = disassembly.context(slot);
        if ctx.commits().is_empty() {
            return Ok(());
        }

        let mut walker = ParserWalker::new(ctx, symbols);
        walker.base_state();
        let code_space = ctx.address().space().clone();
        let mut stale = Vec::new();

        for commit in ctx.commits() {
            let symbol = symbols.symbol(commit.symbol)?;
            let (space, offset) = match *symbol.data() {
                SymbolData::Operand(ref operand) => {
                    let handle = ctx
                        .state(commit.point)
                        .and_then(|state| state.operand_state(operand.index()))
                        .and_then(|point| ctx.state(point))
                        .and_then(|state| state.handle())
                        .ok_or_else(|| {
                            Error::ContextCommit(format!("operand `{}` has no resolved value", symbol.name()))
                        })?;
                    (handle.space.clone(), handle.offset_offset)
                }
                _ => {
                    let handle = symbol.fixed_handle(&walker)?;
                    (handle.space, handle.offset_offset)
                }
            };

            let target = if space.is_constant() {
                let offset = offset.wrapping_mul(code_space.word_size() as u64);
                AddressValue::new(code_space.clone(), offset)
            } else {
                AddressValue::new(space, offset)
            };

            match target.checked_add(1) {
                Some(next) if !commit.flow => {
                    contexts.set_context_region(&target, &next, commit.num, commit.mask, commit.value);
                    stale.push((target, Some(next)));
                }
                _ => {
                    contexts.set_context_change_point(&target, commit.num, commit.mask, commit.value);
                    stale.push((target, None));
                }
            }
        }

        if contexts.is_set_allowed() {
            for (begin, end) in stale {
                disassembly.invalidate(&begin, end.as_ref(), slot);
            }
        }
        Ok(())
    }

    /// Addresses named by CROSSBUILD directives in the slot's constructors.
    fn cross_build_targets(&self, slot: usize, targets: &mut Vec<AddressValue>) -> Result<(), Error> {
        let ctx = self.disassembly.context(slot);
        let mut walker = ParserWalker::new(ctx, &self.symbols);

        for (point, state) in ctx.states().iter().enumerate() {
            let ct = match state.constructor() {
                Some(ct) => self.symbols.constructor(ct)?,
                None => continue,
            };
            walker.subtree_state(point);

            for template in ct.template().into_iter().chain(ct.named_templates()) {
                for op in template.operations() {
                    if op.opcode() != Opcode::CrossBuild {
                        continue;
                    }
                    let target = op.input(0)?;
                    let space: Arc<AddressSpace> = target.space().fix_space(&walker)?.clone();
                    let offset = space.wrap_offset(target.offset().fix(&walker)?);
                    targets.push(AddressValue::new(space, offset));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::space::SpaceKind;

    #[test]
    fn flat_images_zero_fill() {
        let mut manager = SpaceManager::new();
        let ram = manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);

        let image = [1u8, 2, 3];
        let mut buffer = [0xffu8; 4];
        image[..].load_fill(&mut buffer, &AddressValue::new(ram.clone(), 1));
        assert_eq!(buffer, [2, 3, 0, 0]);

        image[..].load_fill(&mut buffer, &AddressValue::new(ram, 0xffff_fffe));
        assert_eq!(buffer, [0; 4]);
    }

    #[test]
    fn assembly_text_joins_mnemonic_and_body() {
        let manager = SpaceManager::new();
        let address = AddressValue::new(manager.constant_space().clone(), 0);

        let mut text = String::from("stale");
        text.dump(&address, "MOV", "r0, 0x2a");
        assert_eq!(text, "MOV r0, 0x2a");

        text.dump(&address, "NOP", "");
        assert_eq!(text, "NOP");
    }

    #[test]
    fn cache_sizing() {
        let config = SleighConfig::default();
        assert_eq!(config.cache_sizes(false), (2, 32));
        assert_eq!(config.cache_sizes(true), (8, 256));

        let config = SleighConfig {
            max_delay: 2,
            ..Default::default()
        };
        assert_eq!(config.cache_sizes(false), (8, 256));
    }

    #[test]
    fn rejects_non_sleigh_documents() {
        assert!(matches!(
            Sleigh::from_str("<spaces/>"),
            Err(Error::Deserialise(DeserialiseError::TagUnexpected(_)))
        ));
        assert!(matches!(
            Sleigh::from_str("<sleigh version=\"1\" bigendian=\"false\" align=\"1\" uniqbase=\"0x0\"/>"),
            Err(Error::Deserialise(DeserialiseError::VersionMismatch {
                expected: SLA_FORMAT_VERSION,
                found: 1
            }))
        ));
    }
}
