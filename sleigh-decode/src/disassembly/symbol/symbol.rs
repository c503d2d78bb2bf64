use std::convert::TryFrom;
use std::fmt::Write;
use std::sync::Arc;

use ustr::Ustr;

use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::expression::{OperandValue, PatternExpression};
use crate::disassembly::symbol::{ConstructorRef, SubtableSymbol};
use crate::disassembly::token_pattern::Token;
use crate::disassembly::walker::{FixedHandle, ParserWalker};
use crate::disassembly::Error;
use crate::space::AddressSpace;
use crate::space_manager::SpaceManager;

/// Marks a value table entry with no value.
pub(crate) const INVALID_VALUE: i64 = 0xbadbeef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    UserOp,
    Epsilon,
    Value,
    ValueMap,
    Name,
    Varnode,
    Context,
    VarnodeList,
    Operand,
    Start,
    End,
    Next2,
    Subtable,
    FlowDest,
    FlowRef,
    Space,
    Token,
}

impl SymbolKind {
    const ALL: [SymbolKind; 17] = [
        Self::UserOp,
        Self::Epsilon,
        Self::Value,
        Self::ValueMap,
        Self::Name,
        Self::Varnode,
        Self::Context,
        Self::VarnodeList,
        Self::Operand,
        Self::Start,
        Self::End,
        Self::Next2,
        Self::Subtable,
        Self::FlowDest,
        Self::FlowRef,
        Self::Space,
        Self::Token,
    ];

    pub fn head_tag(&self) -> &'static str {
        match self {
            Self::UserOp => "userop_head",
            Self::Epsilon => "epsilon_sym_head",
            Self::Value => "value_sym_head",
            Self::ValueMap => "valuemap_sym_head",
            Self::Name => "name_sym_head",
            Self::Varnode => "varnode_sym_head",
            Self::Context => "context_sym_head",
            Self::VarnodeList => "varlist_sym_head",
            Self::Operand => "operand_sym_head",
            Self::Start => "start_sym_head",
            Self::End => "end_sym_head",
            Self::Next2 => "next2_sym_head",
            Self::Subtable => "subtable_sym_head",
            Self::FlowDest => "flowdest_sym_head",
            Self::FlowRef => "flowref_sym_head",
            Self::Space => "space_sym_head",
            Self::Token => "token_sym_head",
        }
    }

    pub fn content_tag(&self) -> &'static str {
        match self {
            Self::UserOp => "userop",
            Self::Epsilon => "epsilon_sym",
            Self::Value => "value_sym",
            Self::ValueMap => "valuemap_sym",
            Self::Name => "name_sym",
            Self::Varnode => "varnode_sym",
            Self::Context => "context_sym",
            Self::VarnodeList => "varlist_sym",
            Self::Operand => "operand_sym",
            Self::Start => "start_sym",
            Self::End => "end_sym",
            Self::Next2 => "next2_sym",
            Self::Subtable => "subtable_sym",
            Self::FlowDest => "flowdest_sym",
            Self::FlowRef => "flowref_sym",
            Self::Space => "space_sym",
            Self::Token => "token_sym",
        }
    }

    pub fn from_head_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.head_tag() == tag)
    }
}

/// One operand slot of a constructor.
#[derive(Debug, Clone)]
pub struct OperandSymbol {
    pub(crate) index: usize,
    pub(crate) relative_offset: usize,
    pub(crate) offset_base: Option<usize>,
    pub(crate) minimum_length: usize,
    pub(crate) defining_symbol: Option<usize>,
    pub(crate) defining_expression: Option<Arc<PatternExpression>>,
    pub(crate) local_expression: Arc<PatternExpression>,
    pub(crate) code: bool,
    pub(crate) offset_irrelevant: bool,
    pub(crate) variable_length: bool,
}

impl OperandSymbol {
    pub(crate) fn new(index: usize, ct: ConstructorRef) -> Self {
        Self {
            index,
            relative_offset: 0,
            offset_base: None,
            minimum_length: 0,
            defining_symbol: None,
            defining_expression: None,
            local_expression: Arc::new(PatternExpression::Operand(OperandValue::new(index, ct))),
            code: false,
            offset_irrelevant: false,
            variable_length: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn relative_offset(&self) -> usize {
        self.relative_offset
    }

    pub fn offset_base(&self) -> Option<usize> {
        self.offset_base
    }

    pub fn minimum_length(&self) -> usize {
        self.minimum_length
    }

    pub fn defining_symbol(&self) -> Option<usize> {
        self.defining_symbol
    }

    pub fn defining_expression(&self) -> Option<&Arc<PatternExpression>> {
        self.defining_expression.as_ref()
    }

    pub fn local_expression(&self) -> &Arc<PatternExpression> {
        &self.local_expression
    }

    pub fn is_code_address(&self) -> bool {
        self.code
    }

    pub fn is_offset_irrelevant(&self) -> bool {
        self.offset_irrelevant
    }

    pub fn is_variable_length(&self) -> bool {
        self.variable_length
    }

    pub fn set_code_address(&mut self, code: bool) {
        self.code = code;
    }

    fn print(&self, out: &mut String, walker: &mut ParserWalker) -> Result<(), Error> {
        let symbols = walker.symbols();
        if let Some(id) = self.defining_symbol {
            let symbol = symbols.symbol(id)?;
            if symbol.kind() == SymbolKind::Subtable {
                let ct = walker.constructor()?;
                symbols.constructor(ct)?.print(out, walker)
            } else {
                symbol.print(out, walker)
            }
        } else if let Some(ref expression) = self.defining_expression {
            print_signed_hex(out, expression.value(walker)?);
            Ok(())
        } else {
            Err(Error::specification("operand printed without a definition"))
        }
    }
}

#[derive(Debug, Clone)]
pub enum SymbolData {
    UserOp {
        index: usize,
    },
    Epsilon {
        pattern: Arc<PatternExpression>,
    },
    Value {
        pattern: Arc<PatternExpression>,
    },
    ValueMap {
        pattern: Arc<PatternExpression>,
        values: Vec<i64>,
        table_is_filled: bool,
    },
    Name {
        pattern: Arc<PatternExpression>,
        names: Vec<Option<String>>,
        table_is_filled: bool,
    },
    Varnode {
        space: Arc<AddressSpace>,
        offset: u64,
        size: usize,
    },
    Context {
        pattern: Arc<PatternExpression>,
        varnode: usize,
        low: usize,
        high: usize,
        flow: bool,
    },
    VarnodeList {
        pattern: Arc<PatternExpression>,
        varnodes: Vec<Option<usize>>,
        table_is_filled: bool,
    },
    Operand(OperandSymbol),
    Start {
        pattern: Arc<PatternExpression>,
    },
    End {
        pattern: Arc<PatternExpression>,
    },
    Next2 {
        pattern: Arc<PatternExpression>,
    },
    Subtable(SubtableSymbol),
    FlowDest,
    FlowRef,
    Space(Arc<AddressSpace>),
    Token(Arc<Token>),
}

/// Whether every value `pattern` can take selects a valid table entry.
fn table_filled(pattern: &PatternExpression, len: usize, has_holes: bool) -> bool {
    match (pattern.min_value(), pattern.max_value()) {
        (Ok(min), Ok(max)) => min >= 0 && max < len as i64 && !has_holes,
        _ => false,
    }
}

impl SymbolData {
    pub fn epsilon() -> Self {
        Self::Epsilon {
            pattern: Arc::new(PatternExpression::Constant(0)),
        }
    }

    pub fn value(pattern: Arc<PatternExpression>) -> Self {
        Self::Value { pattern }
    }

    pub fn value_map(pattern: Arc<PatternExpression>, values: Vec<i64>) -> Self {
        let has_holes = values.iter().any(|v| *v == INVALID_VALUE);
        let table_is_filled = table_filled(&pattern, values.len(), has_holes);
        Self::ValueMap {
            pattern,
            values,
            table_is_filled,
        }
    }

    /// Entries that are absent, `_` or a tab have no name.
    pub fn name_table<S: AsRef<str>>(pattern: Arc<PatternExpression>, names: &[Option<S>]) -> Self {
        let names = names
            .iter()
            .map(|name| {
                let name: Option<&str> = name.as_ref().map(|s| s.as_ref());
                match name {
                    None | Some("_") | Some("\t") => None,
                    Some(name) => Some(name.to_owned()),
                }
            })
            .collect::<Vec<_>>();
        let has_holes = names.iter().any(Option::is_none);
        let table_is_filled = table_filled(&pattern, names.len(), has_holes);
        Self::Name {
            pattern,
            names,
            table_is_filled,
        }
    }

    pub fn varnode(space: Arc<AddressSpace>, offset: u64, size: usize) -> Self {
        Self::Varnode {
            space,
            offset,
            size,
        }
    }

    pub fn varnode_list(pattern: Arc<PatternExpression>, varnodes: Vec<Option<usize>>) -> Self {
        let has_holes = varnodes.iter().any(Option::is_none);
        let table_is_filled = table_filled(&pattern, varnodes.len(), has_holes);
        Self::VarnodeList {
            pattern,
            varnodes,
            table_is_filled,
        }
    }

    pub fn start() -> Self {
        Self::Start {
            pattern: Arc::new(PatternExpression::StartInstruction),
        }
    }

    pub fn end() -> Self {
        Self::End {
            pattern: Arc::new(PatternExpression::EndInstruction),
        }
    }

    pub fn next2() -> Self {
        Self::Next2 {
            pattern: Arc::new(PatternExpression::Next2Instruction),
        }
    }

    pub fn kind(&self) -> SymbolKind {
        match self {
            Self::UserOp { .. } => SymbolKind::UserOp,
            Self::Epsilon { .. } => SymbolKind::Epsilon,
            Self::Value { .. } => SymbolKind::Value,
            Self::ValueMap { .. } => SymbolKind::ValueMap,
            Self::Name { .. } => SymbolKind::Name,
            Self::Varnode { .. } => SymbolKind::Varnode,
            Self::Context { .. } => SymbolKind::Context,
            Self::VarnodeList { .. } => SymbolKind::VarnodeList,
            Self::Operand(_) => SymbolKind::Operand,
            Self::Start { .. } => SymbolKind::Start,
            Self::End { .. } => SymbolKind::End,
            Self::Next2 { .. } => SymbolKind::Next2,
            Self::Subtable(_) => SymbolKind::Subtable,
            Self::FlowDest => SymbolKind::FlowDest,
            Self::FlowRef => SymbolKind::FlowRef,
            Self::Space(_) => SymbolKind::Space,
            Self::Token(_) => SymbolKind::Token,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    id: usize,
    scope: usize,
    name: Ustr,
    data: SymbolData,
}

fn print_signed_hex(out: &mut String, value: i64) {
    if value >= 0 {
        let _ = write!(out, "0x{:x}", value);
    } else {
        let _ = write!(out, "-0x{:x}", value.unsigned_abs());
    }
}

fn table_index(value: i64, len: usize) -> Option<usize> {
    usize::try_from(value).ok().filter(|index| *index < len)
}

impl Symbol {
    pub(crate) fn new(id: usize, scope: usize, name: Ustr, data: SymbolData) -> Self {
        Self {
            id,
            scope,
            name,
            data,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn scope(&self) -> usize {
        self.scope
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn kind(&self) -> SymbolKind {
        self.data.kind()
    }

    pub fn data(&self) -> &SymbolData {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut SymbolData {
        &mut self.data
    }

    pub fn is_subtable(&self) -> bool {
        matches!(self.data, SymbolData::Subtable(_))
    }

    pub fn is_operand(&self) -> bool {
        matches!(self.data, SymbolData::Operand(_))
    }

    pub fn as_operand(&self) -> Result<&OperandSymbol, Error> {
        match self.data {
            SymbolData::Operand(ref operand) => Ok(operand),
            _ => Err(Error::InvalidSymbol),
        }
    }

    pub(crate) fn as_operand_mut(&mut self) -> Result<&mut OperandSymbol, Error> {
        match self.data {
            SymbolData::Operand(ref mut operand) => Ok(operand),
            _ => Err(Error::InvalidSymbol),
        }
    }

    pub fn as_subtable(&self) -> Result<&SubtableSymbol, Error> {
        match self.data {
            SymbolData::Subtable(ref subtable) => Ok(subtable),
            _ => Err(Error::InvalidSymbol),
        }
    }

    pub(crate) fn as_subtable_mut(&mut self) -> Result<&mut SubtableSymbol, Error> {
        match self.data {
            SymbolData::Subtable(ref mut subtable) => Ok(subtable),
            _ => Err(Error::InvalidSymbol),
        }
    }

    /// The value this symbol contributes when used in an expression.
    pub fn pattern_expression(&self) -> Option<&Arc<PatternExpression>> {
        match self.data {
            SymbolData::Epsilon { ref pattern }
            | SymbolData::Value { ref pattern }
            | SymbolData::ValueMap { ref pattern, .. }
            | SymbolData::Name { ref pattern, .. }
            | SymbolData::Context { ref pattern, .. }
            | SymbolData::VarnodeList { ref pattern, .. }
            | SymbolData::Start { ref pattern }
            | SymbolData::End { ref pattern }
            | SymbolData::Next2 { ref pattern } => Some(pattern),
            SymbolData::Operand(ref operand) => Some(&operand.local_expression),
            _ => None,
        }
    }

    /// Picks the constructor for a subtable; for table-backed symbols,
    /// checks that the decoded index has an entry.
    pub fn resolve(&self, walker: &ParserWalker) -> Result<Option<ConstructorRef>, Error> {
        let missing = |what: &str| {
            Error::bad_data(
                walker.address().offset(),
                format!("{}: No corresponding entry in {}", walker.address(), what),
            )
        };

        match self.data {
            SymbolData::Subtable(ref subtable) => {
                let index = subtable.resolve(walker)?;
                Ok(Some(ConstructorRef::new(self.id, index)))
            }
            SymbolData::ValueMap {
                ref pattern,
                ref values,
                table_is_filled: false,
            } => {
                let index = table_index(pattern.value(walker)?, values.len());
                match index.map(|i| values[i]) {
                    Some(v) if v != INVALID_VALUE => Ok(None),
                    _ => Err(missing("valuetable")),
                }
            }
            SymbolData::Name {
                ref pattern,
                ref names,
                table_is_filled: false,
            } => {
                let index = table_index(pattern.value(walker)?, names.len());
                match index.and_then(|i| names[i].as_ref()) {
                    Some(_) => Ok(None),
                    None => Err(missing("nametable")),
                }
            }
            SymbolData::VarnodeList {
                ref pattern,
                ref varnodes,
                table_is_filled: false,
            } => {
                let index = table_index(pattern.value(walker)?, varnodes.len());
                match index.and_then(|i| varnodes[i]) {
                    Some(_) => Ok(None),
                    None => Err(missing("varnode list")),
                }
            }
            _ => Ok(None),
        }
    }

    /// The concrete location this symbol denotes at the walker's position.
    pub fn fixed_handle(&self, walker: &ParserWalker) -> Result<FixedHandle, Error> {
        let constant = |value: i64| FixedHandle::constant(walker.const_space().clone(), value as u64);

        Ok(match self.data {
            SymbolData::Epsilon { .. } => constant(0),
            SymbolData::Value { ref pattern }
            | SymbolData::Name { ref pattern, .. }
            | SymbolData::Context { ref pattern, .. } => constant(pattern.value(walker)?),
            SymbolData::ValueMap {
                ref pattern,
                ref values,
                ..
            } => {
                let value = table_index(pattern.value(walker)?, values.len())
                    .map(|i| values[i])
                    .ok_or_else(|| {
                        Error::bad_data(
                            walker.address().offset(),
                            format!("{}: No corresponding entry in valuetable", walker.address()),
                        )
                    })?;
                constant(value)
            }
            SymbolData::VarnodeList {
                ref pattern,
                ref varnodes,
                ..
            } => {
                let varnode = table_index(pattern.value(walker)?, varnodes.len())
                    .and_then(|i| varnodes[i])
                    .ok_or_else(|| {
                        Error::bad_data(
                            walker.address().offset(),
                            format!("No register attached to: {}", self.name),
                        )
                    })?;
                walker.symbols().symbol(varnode)?.fixed_handle(walker)?
            }
            SymbolData::Varnode {
                ref space,
                offset,
                size,
            } => FixedHandle::direct(space.clone(), offset, size),
            SymbolData::Operand(ref operand) => walker.fixed_handle(operand.index)?.clone(),
            SymbolData::Start { .. } => {
                let space = walker.current_space();
                FixedHandle::direct(space.clone(), walker.address().offset(), space.address_size())
            }
            SymbolData::End { .. } => {
                let space = walker.current_space();
                FixedHandle::direct(
                    space.clone(),
                    walker.next_address().offset(),
                    space.address_size(),
                )
            }
            SymbolData::Next2 { .. } => {
                let space = walker.current_space();
                let next2 = walker.next2_address().ok_or_else(|| {
                    Error::invariant("inst_next2 requested but not computed")
                })?;
                FixedHandle::direct(space.clone(), next2.offset(), space.address_size())
            }
            SymbolData::FlowDest | SymbolData::FlowRef => {
                let flow = walker.flow_address()?;
                FixedHandle::direct(
                    walker.const_space().clone(),
                    flow.offset(),
                    flow.address_size(),
                )
            }
            SymbolData::UserOp { .. }
            | SymbolData::Subtable(_)
            | SymbolData::Space(_)
            | SymbolData::Token(_) => return Err(Error::InvalidHandle),
        })
    }

    /// Appends the assembly text for this symbol at the walker's position.
    pub fn print(&self, out: &mut String, walker: &mut ParserWalker) -> Result<(), Error> {
        match self.data {
            SymbolData::Epsilon { .. } => out.push('0'),
            SymbolData::Value { ref pattern } | SymbolData::Context { ref pattern, .. } => {
                print_signed_hex(out, pattern.value(walker)?)
            }
            SymbolData::ValueMap {
                ref pattern,
                ref values,
                ..
            } => {
                let value = table_index(pattern.value(walker)?, values.len())
                    .map(|i| values[i])
                    .ok_or_else(|| Error::specification("Out of range index in value table print"))?;
                print_signed_hex(out, value)
            }
            SymbolData::Name {
                ref pattern,
                ref names,
                ..
            } => {
                let name = table_index(pattern.value(walker)?, names.len())
                    .and_then(|i| names[i].as_ref())
                    .ok_or_else(|| Error::specification("Out of range index in name table print"))?;
                out.push_str(name)
            }
            SymbolData::Varnode { .. } => out.push_str(self.name()),
            SymbolData::VarnodeList {
                ref pattern,
                ref varnodes,
                ..
            } => {
                let varnode = table_index(pattern.value(walker)?, varnodes.len())
                    .and_then(|i| varnodes[i])
                    .ok_or_else(|| Error::specification("Out of range index in varnode list print"))?;
                out.push_str(walker.symbols().symbol(varnode)?.name())
            }
            SymbolData::Operand(ref operand) => {
                walker.push_operand(operand.index)?;
                let res = operand.print(out, walker);
                walker.pop_operand();
                res?
            }
            SymbolData::Start { .. } => {
                let _ = write!(out, "0x{:x}", walker.address().offset());
            }
            SymbolData::End { .. } => {
                let _ = write!(out, "0x{:x}", walker.next_address().offset());
            }
            SymbolData::Next2 { .. } => {
                let next2 = walker.next2_address().ok_or_else(|| {
                    Error::invariant("inst_next2 requested but not computed")
                })?;
                let _ = write!(out, "0x{:x}", next2.offset());
            }
            SymbolData::FlowDest | SymbolData::FlowRef => {
                let _ = write!(out, "0x{:x}", walker.flow_address()?.offset());
            }
            SymbolData::Space(ref space) => out.push_str(space.name()),
            SymbolData::UserOp { .. } | SymbolData::Token(_) => out.push_str(self.name()),
            SymbolData::Subtable(_) => {
                let ct = walker.constructor()?;
                walker.symbols().constructor(ct)?.print(out, walker)?
            }
        }
        Ok(())
    }

    fn header(&self, out: &mut XmlWriter, tag: &'static str) {
        out.start(tag)
            .attr("name", self.name)
            .attr_hex("id", self.id as u64)
            .attr_hex("scope", self.scope as u64);
    }

    pub fn header_to_xml(&self, out: &mut XmlWriter) {
        self.header(out, self.kind().head_tag());
        out.end();
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        self.header(out, self.kind().content_tag());
        match self.data {
            SymbolData::UserOp { index } => {
                out.attr("index", index);
            }
            SymbolData::Epsilon { .. }
            | SymbolData::Start { .. }
            | SymbolData::End { .. }
            | SymbolData::Next2 { .. }
            | SymbolData::FlowDest
            | SymbolData::FlowRef => (),
            SymbolData::Value { ref pattern } => pattern.to_xml(out),
            SymbolData::ValueMap {
                ref pattern,
                ref values,
                ..
            } => {
                pattern.to_xml(out);
                for value in values {
                    out.start("valuetab").attr("val", value).end();
                }
            }
            SymbolData::Name {
                ref pattern,
                ref names,
                ..
            } => {
                pattern.to_xml(out);
                for name in names {
                    out.start("nametab");
                    if let Some(name) = name {
                        out.attr("name", name);
                    }
                    out.end();
                }
            }
            SymbolData::Varnode {
                ref space,
                offset,
                size,
            } => {
                out.attr("space", space.name())
                    .attr_hex("offset", offset)
                    .attr("size", size);
            }
            SymbolData::Context {
                ref pattern,
                varnode,
                low,
                high,
                flow,
            } => {
                out.attr_hex("varnode", varnode as u64)
                    .attr("low", low)
                    .attr("high", high)
                    .attr("flow", flow);
                pattern.to_xml(out);
            }
            SymbolData::VarnodeList {
                ref pattern,
                ref varnodes,
                ..
            } => {
                pattern.to_xml(out);
                for varnode in varnodes {
                    match varnode {
                        Some(id) => {
                            out.start("var").attr_hex("id", *id as u64).end();
                        }
                        None => {
                            out.empty("null");
                        }
                    }
                }
            }
            SymbolData::Operand(ref operand) => {
                if let Some(subsym) = operand.defining_symbol {
                    out.attr_hex("subsym", subsym as u64);
                }
                out.attr("off", operand.relative_offset)
                    .attr("base", operand.offset_base.map(|b| b as i64).unwrap_or(-1))
                    .attr("minlen", operand.minimum_length);
                if operand.code {
                    out.attr("code", true);
                }
                out.attr("index", operand.index);
                operand.local_expression.to_xml(out);
                if let Some(ref expression) = operand.defining_expression {
                    expression.to_xml(out);
                }
            }
            SymbolData::Subtable(ref subtable) => subtable.to_xml(out),
            SymbolData::Space(ref space) => {
                out.attr("space", space.name());
            }
            SymbolData::Token(ref token) => {
                out.attr("size", token.size())
                    .attr("bigendian", token.is_big_endian())
                    .attr("index", token.index());
            }
        }
        out.end();
    }

    /// Reads a symbol's content element; the header supplied `kind`, `id`,
    /// `scope` and `name`.
    pub(crate) fn from_xml(
        kind: SymbolKind,
        id: usize,
        scope: usize,
        name: Ustr,
        input: xml::Node,
        manager: &SpaceManager,
    ) -> Result<Self, DeserialiseError> {
        input.expect_tag(kind.content_tag())?;

        let mut children = input.children().filter(xml::Node::is_element);
        let mut expression = |what: &'static str| {
            children
                .next()
                .ok_or(DeserialiseError::Invariant(what))
                .and_then(PatternExpression::from_xml)
        };

        let data = match kind {
            SymbolKind::UserOp => SymbolData::UserOp {
                index: input.attribute_int("index")?,
            },
            SymbolKind::Epsilon => SymbolData::epsilon(),
            SymbolKind::Value => SymbolData::Value {
                pattern: expression("missing pattern expression for value")?,
            },
            SymbolKind::ValueMap => {
                let pattern = expression("missing pattern expression for value map")?;
                let values = input
                    .children()
                    .filter(|n| n.has_tag_name("valuetab"))
                    .map(|n| n.attribute_int("val"))
                    .collect::<Result<Vec<i64>, _>>()?;
                SymbolData::value_map(pattern, values)
            }
            SymbolKind::Name => {
                let pattern = expression("missing pattern expression for name table")?;
                let names = input
                    .children()
                    .filter(|n| n.has_tag_name("nametab"))
                    .map(|n| n.attribute("name"))
                    .collect::<Vec<_>>();
                SymbolData::name_table(pattern, &names)
            }
            SymbolKind::Varnode => {
                let space_name = input.attribute_string("space")?;
                let space = manager
                    .space_by_name(&space_name)
                    .ok_or(DeserialiseError::Invariant("varnode space not defined"))?;
                SymbolData::Varnode {
                    space,
                    offset: input.attribute_int("offset")?,
                    size: input.attribute_int("size")?,
                }
            }
            SymbolKind::Context => SymbolData::Context {
                pattern: expression("missing pattern expression for context")?,
                varnode: input.attribute_int("varnode")?,
                low: input.attribute_int("low")?,
                high: input.attribute_int("high")?,
                flow: input.attribute_bool_opt("flow", true)?,
            },
            SymbolKind::VarnodeList => {
                let pattern = expression("missing pattern expression for varnode list")?;
                let varnodes = input
                    .children()
                    .filter(xml::Node::is_element)
                    .skip(1)
                    .map(|n| {
                        Ok(if n.has_tag_name("var") {
                            Some(n.attribute_int("id")?)
                        } else {
                            None
                        })
                    })
                    .collect::<Result<Vec<_>, DeserialiseError>>()?;
                SymbolData::varnode_list(pattern, varnodes)
            }
            SymbolKind::Operand => {
                let local_expression = expression("missing local expression for operand")?;
                let defining_expression = children
                    .next()
                    .map(PatternExpression::from_xml)
                    .transpose()?;
                let base = input.attribute_int::<i64>("base")?;
                SymbolData::Operand(OperandSymbol {
                    index: input.attribute_int("index")?,
                    relative_offset: input.attribute_int("off")?,
                    offset_base: usize::try_from(base).ok(),
                    minimum_length: input.attribute_int("minlen")?,
                    defining_symbol: input
                        .attribute("subsym")
                        .map(|_| input.attribute_int("subsym"))
                        .transpose()?,
                    offset_irrelevant: defining_expression.is_some(),
                    defining_expression,
                    local_expression,
                    code: input.attribute_bool_opt("code", false)?,
                    variable_length: false,
                })
            }
            SymbolKind::Start => SymbolData::start(),
            SymbolKind::End => SymbolData::end(),
            SymbolKind::Next2 => SymbolData::next2(),
            SymbolKind::Subtable => {
                SymbolData::Subtable(SubtableSymbol::from_xml(id, input, manager)?)
            }
            SymbolKind::FlowDest => SymbolData::FlowDest,
            SymbolKind::FlowRef => SymbolData::FlowRef,
            SymbolKind::Space => {
                let space_name = input.attribute_string("space")?;
                SymbolData::Space(
                    manager
                        .space_by_name(&space_name)
                        .ok_or(DeserialiseError::Invariant("space symbol names unknown space"))?,
                )
            }
            SymbolKind::Token => SymbolData::Token(Arc::new(Token::new(
                name.as_str(),
                input.attribute_int("size")?,
                input.attribute_bool("bigendian")?,
                input.attribute_int("index")?,
            ))),
        };

        Ok(Self::new(id, scope, name, data))
    }
}
