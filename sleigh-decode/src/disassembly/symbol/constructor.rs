use std::fmt;
use std::sync::Arc;

use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::construct::ConstructTpl;
use crate::disassembly::context::ContextBitRange;
use crate::disassembly::equation::PatternEquation;
use crate::disassembly::expression::PatternExpression;
use crate::disassembly::token_pattern::TokenPattern;
use crate::disassembly::walker::{ParserWalker, ParserWalkerChange};
use crate::disassembly::Error;
use crate::space_manager::SpaceManager;

/// Names a constructor by its subtable symbol and position in that table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstructorRef {
    table: usize,
    index: usize,
}

impl ConstructorRef {
    pub fn new(table: usize, index: usize) -> Self {
        Self { table, index }
    }

    pub fn table(&self) -> usize {
        self.table
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for ConstructorRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}/{}", self.table, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintPiece {
    Text(String),
    Operand(usize),
}

/// A context adjustment performed when a constructor matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextChange {
    /// Writes an expression into context bits of the current decode.
    Operator {
        num: usize,
        shift: u32,
        mask: u32,
        expression: Arc<PatternExpression>,
    },
    /// Queues the current value of a context variable for the persistent
    /// context database.
    Commit {
        symbol: usize,
        num: usize,
        mask: u32,
        flow: bool,
    },
}

fn word_range(start_bit: usize, end_bit: usize) -> Result<ContextBitRange, Error> {
    if start_bit / 32 != end_bit / 32 || start_bit > end_bit {
        return Err(Error::specification(
            "Context field not contained within one machine int",
        ));
    }
    Ok(ContextBitRange::new(start_bit, end_bit))
}

impl ContextChange {
    pub fn operation(
        start_bit: usize,
        end_bit: usize,
        expression: Arc<PatternExpression>,
    ) -> Result<Self, Error> {
        let range = word_range(start_bit, end_bit)?;
        Ok(Self::Operator {
            num: range.word(),
            shift: range.shift(),
            mask: range.word_mask(),
            expression,
        })
    }

    pub fn commit(symbol: usize, start_bit: usize, end_bit: usize, flow: bool) -> Result<Self, Error> {
        let range = word_range(start_bit, end_bit)?;
        Ok(Self::Commit {
            symbol,
            num: range.word(),
            mask: range.word_mask(),
            flow,
        })
    }

    pub fn apply(&self, walker: &mut ParserWalkerChange) -> Result<(), Error> {
        match self {
            Self::Operator {
                num,
                shift,
                mask,
                expression,
            } => {
                let value = expression.value(&walker.view())? as u32;
                walker.set_context_word(*num, value.checked_shl(*shift).unwrap_or(0), *mask);
                Ok(())
            }
            Self::Commit {
                symbol,
                num,
                mask,
                flow,
            } => walker.add_commit(*symbol, *num, *mask, *flow),
        }
    }

    pub fn from_xml(input: xml::Node) -> Result<Self, DeserialiseError> {
        Ok(match input.tag_name().name() {
            "context_op" => Self::Operator {
                num: input.attribute_int("i")?,
                shift: input.attribute_int("shift")?,
                mask: input.attribute_int("mask")?,
                expression: input
                    .children()
                    .find(xml::Node::is_element)
                    .map(PatternExpression::from_xml)
                    .ok_or(DeserialiseError::Invariant("missing pattern for context_op"))??,
            },
            "commit" => Self::Commit {
                symbol: input.attribute_int("id")?,
                num: input.attribute_int("num")?,
                mask: input.attribute_int("mask")?,
                flow: input.attribute_bool_opt("flow", true)?,
            },
            name => return Err(DeserialiseError::TagUnexpected(name.to_owned())),
        })
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        match self {
            Self::Operator {
                num,
                shift,
                mask,
                expression,
            } => {
                out.start("context_op")
                    .attr("i", num)
                    .attr("shift", shift)
                    .attr_hex("mask", *mask as u64);
                expression.to_xml(out);
                out.end();
            }
            Self::Commit {
                symbol,
                num,
                mask,
                flow,
            } => {
                out.start("commit")
                    .attr_hex("id", *symbol as u64)
                    .attr("num", num)
                    .attr_hex("mask", *mask as u64)
                    .attr("flow", flow)
                    .end();
            }
        }
    }
}

/// One production of a subtable: display pieces, operands, context changes
/// and the semantic templates emitted when it matches.
#[derive(Debug, Clone)]
pub struct Constructor {
    id: ConstructorRef,
    pub(crate) operands: Vec<usize>,
    pub(crate) print_pieces: Vec<PrintPiece>,
    first_whitespace: Option<usize>,
    pub(crate) min_length: usize,
    source_file: usize,
    line: usize,
    pub(crate) context: Vec<ContextChange>,
    pub(crate) template: Option<ConstructTpl>,
    pub(crate) named_templates: Vec<Option<ConstructTpl>>,
    pub(crate) equation: Option<PatternEquation>,
    pub(crate) pattern: Option<TokenPattern>,
    scope: Option<usize>,
}

impl PartialEq for Constructor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Constructor {}

impl Constructor {
    pub(crate) fn new(id: ConstructorRef, scope: Option<usize>) -> Self {
        Self {
            id,
            operands: Vec::new(),
            print_pieces: Vec::new(),
            first_whitespace: None,
            min_length: 0,
            source_file: 0,
            line: 0,
            context: Vec::new(),
            template: None,
            named_templates: Vec::new(),
            equation: None,
            pattern: None,
            scope,
        }
    }

    pub fn id(&self) -> ConstructorRef {
        self.id
    }

    /// The subtable this constructor belongs to.
    pub fn parent(&self) -> usize {
        self.id.table
    }

    /// Scope holding this constructor's operand names, when built in
    /// memory.
    pub fn scope(&self) -> Option<usize> {
        self.scope
    }

    pub fn operand(&self, index: usize) -> Option<usize> {
        self.operands.get(index).copied()
    }

    pub fn operands(&self) -> &[usize] {
        &self.operands
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    pub fn minimum_length(&self) -> usize {
        self.min_length
    }

    pub fn print_pieces(&self) -> &[PrintPiece] {
        &self.print_pieces
    }

    pub fn first_whitespace(&self) -> Option<usize> {
        self.first_whitespace
    }

    /// Operand whose display stands in for the whole constructor.
    pub fn flow_through_index(&self) -> Option<usize> {
        match self.print_pieces.as_slice() {
            [PrintPiece::Operand(index)] => Some(*index),
            _ => None,
        }
    }

    pub fn source_location(&self) -> (usize, usize) {
        (self.source_file, self.line)
    }

    pub fn set_source_location(&mut self, source_file: usize, line: usize) {
        self.source_file = source_file;
        self.line = line;
    }

    pub fn template(&self) -> Option<&ConstructTpl> {
        self.template.as_ref()
    }

    pub fn named_template(&self, section: usize) -> Option<&ConstructTpl> {
        self.named_templates.get(section).and_then(Option::as_ref)
    }

    pub fn named_templates(&self) -> impl Iterator<Item = &ConstructTpl> {
        self.named_templates.iter().flatten()
    }

    /// Installs a template as the main body or, when it names a section, as
    /// that section.
    pub fn set_template(&mut self, template: ConstructTpl) -> Result<(), Error> {
        match template.section_id() {
            None => {
                if self.template.is_some() {
                    return Err(Error::specification("duplicate main section"));
                }
                self.template = Some(template);
            }
            Some(section) => {
                if self.named_templates.len() <= section {
                    self.named_templates.resize_with(section + 1, Default::default);
                }
                if self.named_templates[section].is_some() {
                    return Err(Error::specification("duplicate named section"));
                }
                self.named_templates[section] = Some(template);
            }
        }
        Ok(())
    }

    pub fn context_changes(&self) -> &[ContextChange] {
        &self.context
    }

    pub fn add_context_change(&mut self, change: ContextChange) {
        self.context.push(change);
    }

    pub fn equation(&self) -> Option<&PatternEquation> {
        self.equation.as_ref()
    }

    pub fn set_equation(&mut self, equation: PatternEquation) {
        self.equation = Some(equation);
        self.pattern = None;
    }

    /// The matching pattern, once built.
    pub fn pattern(&self) -> Option<&TokenPattern> {
        self.pattern.as_ref()
    }

    /// Appends display text. Runs of spaces collapse to one piece, and the
    /// first such piece separates the mnemonic from the body.
    pub fn add_syntax(&mut self, syntax: &str) {
        if syntax.is_empty() {
            return;
        }

        let trimmed = if syntax.chars().any(|c| c != ' ') {
            syntax
        } else {
            " "
        };

        if self.first_whitespace.is_none() && trimmed == " " {
            self.first_whitespace = Some(self.print_pieces.len());
        }

        match self.print_pieces.last_mut() {
            Some(PrintPiece::Text(last)) if last == " " && trimmed == " " => (),
            Some(PrintPiece::Text(last)) if last != " " && trimmed != " " => {
                last.push_str(trimmed);
            }
            _ => self.print_pieces.push(PrintPiece::Text(trimmed.to_owned())),
        }
    }

    pub fn add_print_operand(&mut self, index: usize) {
        self.print_pieces.push(PrintPiece::Operand(index));
    }

    pub fn remove_trailing_space(&mut self) {
        if let Some(PrintPiece::Text(last)) = self.print_pieces.last() {
            if last == " " {
                self.print_pieces.pop();
                if self.first_whitespace == Some(self.print_pieces.len()) {
                    self.first_whitespace = None;
                }
            }
        }
    }

    pub fn apply_context(&self, walker: &mut ParserWalkerChange) -> Result<(), Error> {
        for change in self.context.iter() {
            change.apply(walker)?;
        }
        Ok(())
    }

    fn print_pieces_to(
        &self,
        pieces: &[PrintPiece],
        out: &mut String,
        walker: &mut ParserWalker,
    ) -> Result<(), Error> {
        let symbols = walker.symbols();
        for piece in pieces {
            match piece {
                PrintPiece::Text(text) => out.push_str(text),
                PrintPiece::Operand(index) => {
                    let id = self.operand(*index).ok_or(Error::InvalidSymbol)?;
                    symbols.symbol(id)?.print(out, walker)?;
                }
            }
        }
        Ok(())
    }

    /// Descends into the flow-through operand when it is a subtable.
    fn flow_through_subtable(&self, walker: &ParserWalker) -> Result<Option<usize>, Error> {
        if let Some(index) = self.flow_through_index() {
            let symbols = walker.symbols();
            let id = self.operand(index).ok_or(Error::InvalidSymbol)?;
            if let Some(defining) = symbols.symbol(id)?.as_operand()?.defining_symbol() {
                if symbols.symbol(defining)?.is_subtable() {
                    return Ok(Some(index));
                }
            }
        }
        Ok(None)
    }

    pub fn print(&self, out: &mut String, walker: &mut ParserWalker) -> Result<(), Error> {
        self.print_pieces_to(&self.print_pieces, out, walker)
    }

    pub fn print_mnemonic(&self, out: &mut String, walker: &mut ParserWalker) -> Result<(), Error> {
        if let Some(index) = self.flow_through_subtable(walker)? {
            walker.push_operand(index)?;
            let symbols = walker.symbols();
            let res = walker
                .constructor()
                .and_then(|ct| symbols.constructor(ct))
                .and_then(|ct| ct.print_mnemonic(out, walker));
            walker.pop_operand();
            return res;
        }

        let end = self.first_whitespace.unwrap_or(self.print_pieces.len());
        self.print_pieces_to(&self.print_pieces[..end], out, walker)
    }

    pub fn print_body(&self, out: &mut String, walker: &mut ParserWalker) -> Result<(), Error> {
        if let Some(index) = self.flow_through_subtable(walker)? {
            walker.push_operand(index)?;
            let symbols = walker.symbols();
            let res = walker
                .constructor()
                .and_then(|ct| symbols.constructor(ct))
                .and_then(|ct| ct.print_body(out, walker));
            walker.pop_operand();
            return res;
        }

        match self.first_whitespace {
            Some(first) if first < self.print_pieces.len() => {
                self.print_pieces_to(&self.print_pieces[first + 1..], out, walker)
            }
            _ => Ok(()),
        }
    }

    pub fn from_xml(
        input: xml::Node,
        id: ConstructorRef,
        manager: &SpaceManager,
    ) -> Result<Self, DeserialiseError> {
        input.expect_tag("constructor")?;

        let mut ctor = Self::new(id, None);
        let first = input.attribute_int::<i64>("first")?;
        ctor.first_whitespace = if first < 0 { None } else { Some(first as usize) };
        ctor.min_length = input.attribute_int("length")?;
        let (source_file, line) = input.attribute_line_number("line")?;
        ctor.set_source_location(source_file, line);

        for child in input.children().filter(xml::Node::is_element) {
            match child.tag_name().name() {
                "oper" => ctor.operands.push(child.attribute_int("id")?),
                "print" => ctor
                    .print_pieces
                    .push(PrintPiece::Text(child.attribute_string("piece")?)),
                "opprint" => ctor
                    .print_pieces
                    .push(PrintPiece::Operand(child.attribute_int("id")?)),
                "context_op" | "commit" => ctor.context.push(ContextChange::from_xml(child)?),
                _ => {
                    let template = ConstructTpl::from_xml(child, manager)?;
                    ctor.set_template(template).map_err(|_| {
                        DeserialiseError::Invariant("duplicate constructor template section")
                    })?;
                }
            }
        }

        Ok(ctor)
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("constructor")
            .attr_hex("parent", self.id.table as u64)
            .attr("first", self.first_whitespace.map(|f| f as i64).unwrap_or(-1))
            .attr("length", self.min_length)
            .attr("line", format_args!("{}:{}", self.source_file, self.line));

        for operand in self.operands.iter() {
            out.start("oper").attr_hex("id", *operand as u64).end();
        }

        for piece in self.print_pieces.iter() {
            match piece {
                PrintPiece::Text(text) => out.start("print").attr("piece", text).end(),
                PrintPiece::Operand(index) => out.start("opprint").attr("id", index).end(),
            };
        }

        for change in self.context.iter() {
            change.to_xml(out);
        }

        if let Some(ref template) = self.template {
            template.to_xml(out);
        }

        for template in self.named_templates() {
            template.to_xml(out);
        }

        out.end();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disassembly::construct::OpTpl;
    use crate::disassembly::expression::ContextField;
    use crate::disassembly::opcode::Opcode;

    fn ctor() -> Constructor {
        Constructor::new(ConstructorRef::new(3, 0), None)
    }

    #[test]
    fn syntax_pieces_and_whitespace() {
        let mut c = ctor();
        c.add_syntax("MOV");
        c.add_syntax("   ");
        c.add_print_operand(0);
        c.add_syntax(",");
        c.add_syntax(" ");
        c.add_syntax(" ");
        c.add_print_operand(1);
        c.add_syntax(" ");
        c.remove_trailing_space();

        assert_eq!(c.first_whitespace(), Some(1));
        assert_eq!(
            c.print_pieces(),
            &[
                PrintPiece::Text("MOV".into()),
                PrintPiece::Text(" ".into()),
                PrintPiece::Operand(0),
                PrintPiece::Text(",".into()),
                PrintPiece::Text(" ".into()),
                PrintPiece::Operand(1),
            ]
        );
        assert_eq!(c.flow_through_index(), None);

        let mut single = ctor();
        single.add_print_operand(0);
        assert_eq!(single.flow_through_index(), Some(0));
    }

    #[test]
    fn context_words_and_masks() -> Result<(), Error> {
        let expr = Arc::new(PatternExpression::ContextField(ContextField::new(false, 0, 0)));
        match ContextChange::operation(36, 39, expr)? {
            ContextChange::Operator { num, shift, mask, .. } => {
                assert_eq!((num, shift, mask), (1, 24, 0x0f00_0000));
            }
            _ => panic!("expected context operation"),
        }
        assert!(ContextChange::commit(9, 30, 33, true).is_err());
        Ok(())
    }

    #[test]
    fn xml_round_trip() -> Result<(), crate::deserialise::Error> {
        let manager = SpaceManager::new();
        let mut c = ctor();
        c.operands = vec![7, 8];
        c.add_syntax("ADD");
        c.add_syntax(" ");
        c.add_print_operand(1);
        c.min_length = 2;
        c.set_source_location(1, 42);
        c.add_context_change(ContextChange::Commit {
            symbol: 5,
            num: 0,
            mask: 0xff,
            flow: false,
        });
        c.set_template(ConstructTpl::new(vec![OpTpl::new(Opcode::Return, None, vec![])]))
            .map_err(|_| crate::deserialise::Error::Invariant("template"))?;

        let mut out = XmlWriter::new();
        c.to_xml(&mut out);
        let text = out.finish();

        let doc = xml::Document::parse(&text)?;
        let back = Constructor::from_xml(doc.root_element(), c.id(), &manager)?;
        assert_eq!(back.operands(), c.operands());
        assert_eq!(back.print_pieces(), c.print_pieces());
        assert_eq!(c.first_whitespace(), Some(1));
        assert_eq!(back.first_whitespace(), c.first_whitespace());
        assert_eq!(back.source_location(), (1, 42));
        assert_eq!(back.context_changes(), c.context_changes());
        assert_eq!(back.template(), c.template());
        Ok(())
    }
}
