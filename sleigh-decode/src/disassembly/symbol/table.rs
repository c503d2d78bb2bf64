use std::sync::Arc;

use ustr::Ustr;

use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::decision::DecisionProperties;
use crate::disassembly::equation::{OperandPlacement, OperandResolve};
use crate::disassembly::expression::{OperandValue, PatternExpression};
use crate::disassembly::symbol::{
    Constructor, ConstructorRef, ContextChange, OperandSymbol, PrintPiece, SubtableSymbol, Symbol,
    SymbolData, SymbolKind, SymbolScope,
};
use crate::disassembly::token_pattern::TokenPattern;
use crate::disassembly::Error;
use crate::space_manager::SpaceManager;

/// Name of the subtable every instruction decode starts from.
pub const ROOT_TABLE: &str = "instruction";

/// How an operand obtains its value.
#[derive(Debug, Clone)]
pub enum OperandDefinition {
    /// Another symbol: a subtable, or a symbol with a pattern value.
    Symbol(usize),
    /// An expression over fields and other operands.
    Expression(Arc<PatternExpression>),
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<SymbolScope>,
    symbols: Vec<Symbol>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

enum OperandSource {
    Subtable { id: usize, being_built: bool },
    Expression(Option<Arc<PatternExpression>>),
    Undefined,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![SymbolScope::new(0, None)],
            symbols: Vec::new(),
        }
    }

    pub fn global_scope(&self) -> &SymbolScope {
        &self.scopes[0]
    }

    pub fn scope(&self, id: usize) -> Option<&SymbolScope> {
        self.scopes.get(id)
    }

    pub fn scopes(&self) -> &[SymbolScope] {
        &self.scopes
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn add_scope(&mut self, parent: usize) -> Result<usize, Error> {
        if parent >= self.scopes.len() {
            return Err(Error::invariant(format!("parent scope {} does not exist", parent)));
        }
        let id = self.scopes.len();
        self.scopes.push(SymbolScope::new(id, Some(parent)));
        Ok(id)
    }

    pub fn add_symbol(&mut self, scope: usize, name: &str, data: SymbolData) -> Result<usize, Error> {
        let id = self.symbols.len();
        let name = Ustr::from(name);
        self.scopes
            .get_mut(scope)
            .ok_or_else(|| Error::invariant(format!("scope {} does not exist", scope)))?
            .add_symbol(name, id)
            .map_err(|_| Error::specification(format!("Duplicate symbol name `{}`", name)))?;
        self.symbols.push(Symbol::new(id, scope, name, data));
        Ok(id)
    }

    pub fn add_global(&mut self, name: &str, data: SymbolData) -> Result<usize, Error> {
        self.add_symbol(0, name, data)
    }

    /// Looks `name` up in `scope` and then in each enclosing scope.
    pub fn find(&self, scope: usize, name: &str) -> Option<&Symbol> {
        let mut current = self.scopes.get(scope);
        while let Some(scope) = current {
            if let Some(id) = scope.find(name) {
                return self.symbols.get(id);
            }
            current = scope.parent().and_then(|p| self.scopes.get(p));
        }
        None
    }

    pub fn find_global(&self, name: &str) -> Option<&Symbol> {
        self.find(0, name)
    }

    pub fn symbol(&self, id: usize) -> Result<&Symbol, Error> {
        self.symbols.get(id).ok_or(Error::InvalidSymbol)
    }

    pub(crate) fn symbol_mut(&mut self, id: usize) -> Result<&mut Symbol, Error> {
        self.symbols.get_mut(id).ok_or(Error::InvalidSymbol)
    }

    /// Symbols of the given kind, in id order.
    pub fn symbols_of(&self, kind: SymbolKind) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(move |s| s.kind() == kind)
    }

    pub fn root(&self) -> Result<&Symbol, Error> {
        self.find_global(ROOT_TABLE)
            .filter(|s| s.is_subtable())
            .ok_or_else(|| Error::specification("No patterns to match."))
    }

    pub fn constructor(&self, ct: ConstructorRef) -> Result<&Constructor, Error> {
        self.symbol(ct.table())?
            .as_subtable()?
            .constructor(ct.index())
            .ok_or(Error::InvalidSymbol)
    }

    pub fn constructor_mut(&mut self, ct: ConstructorRef) -> Result<&mut Constructor, Error> {
        self.symbol_mut(ct.table())?
            .as_subtable_mut()?
            .constructors
            .get_mut(ct.index())
            .ok_or(Error::InvalidSymbol)
    }

    pub fn add_subtable(&mut self, name: &str) -> Result<usize, Error> {
        self.add_global(name, SymbolData::Subtable(SubtableSymbol::new()))
    }

    /// Adds an empty constructor to `table`, with its own scope for operand
    /// names.
    pub fn add_constructor(&mut self, table: usize) -> Result<ConstructorRef, Error> {
        self.symbol(table)?.as_subtable()?;
        let scope = self.add_scope(0)?;
        self.symbol_mut(table)?
            .as_subtable_mut()
            .map(|subtable| subtable.add_constructor(table, Some(scope)))
    }

    /// Declares the next operand of `ct`, returning its index.
    pub fn add_operand(&mut self, ct: ConstructorRef, name: &str) -> Result<usize, Error> {
        let ctor = self.constructor(ct)?;
        let index = ctor.operand_count();
        let scope = ctor
            .scope()
            .ok_or_else(|| Error::invariant("constructor has no operand scope"))?;

        let id = self.add_symbol(
            scope,
            name,
            SymbolData::Operand(OperandSymbol::new(index, ct)),
        )?;
        self.constructor_mut(ct)?.operands.push(id);
        Ok(index)
    }

    pub fn define_operand(
        &mut self,
        ct: ConstructorRef,
        index: usize,
        definition: OperandDefinition,
    ) -> Result<(), Error> {
        let id = self
            .constructor(ct)?
            .operand(index)
            .ok_or(Error::InvalidSymbol)?;

        if let OperandDefinition::Symbol(symbol) = definition {
            self.symbol(symbol)?;
        }

        let operand = self.symbol_mut(id)?.as_operand_mut()?;
        if operand.defining_symbol.is_some() || operand.defining_expression.is_some() {
            return Err(Error::specification("Redefining operand"));
        }

        match definition {
            OperandDefinition::Symbol(symbol) => operand.defining_symbol = Some(symbol),
            OperandDefinition::Expression(expression) => {
                operand.defining_expression = Some(expression);
                operand.offset_irrelevant = true;
            }
        }
        Ok(())
    }

    /// Expression standing for operand `index` of `ct`.
    pub fn operand_expression(&self, ct: ConstructorRef, index: usize) -> Result<Arc<PatternExpression>, Error> {
        let id = self
            .constructor(ct)?
            .operand(index)
            .ok_or(Error::InvalidSymbol)?;
        Ok(self.symbol(id)?.as_operand()?.local_expression().clone())
    }

    pub fn describe(&self, ct: ConstructorRef) -> String {
        let table = self
            .symbol(ct.table())
            .map(|s| s.name().to_owned())
            .unwrap_or_default();
        let line = self
            .constructor(ct)
            .map(|c| c.source_location().1)
            .unwrap_or_default();
        format!("table \"{}\" constructor starting at line {}", table, line)
    }

    /// Builds the pattern of every constructor reachable from the root
    /// table, then each table's decision tree.
    pub fn build_patterns(&mut self) -> Result<(), Error> {
        let root = self.root()?.id();

        let mut errors = Vec::new();
        self.build_subtable_pattern(root, &mut errors)?;

        let tables = self
            .symbols_of(SymbolKind::Subtable)
            .map(Symbol::id)
            .collect::<Vec<_>>();

        for &id in tables.iter() {
            if self.symbol(id)?.as_subtable()?.pattern().is_none() {
                log::warn!("{}: Unreferenced table", self.symbol(id)?.name());
            }
        }

        if !errors.is_empty() {
            return Err(Error::Specification(errors.join("\n")));
        }

        let mut identical = Vec::new();
        let mut conflicting = Vec::new();

        for id in std::iter::once(root).chain(tables.into_iter().filter(|id| *id != root)) {
            let mut props = DecisionProperties::new();
            self.symbol_mut(id)?
                .as_subtable_mut()?
                .build_decision_tree(&mut props)?;

            log::debug!(
                "built decision tree for `{}` ({} identical, {} conflicting)",
                self.symbol(id)?.name(),
                props.identical_errors().len(),
                props.conflict_errors().len(),
            );

            identical.extend(
                props
                    .identical_errors()
                    .iter()
                    .map(|(a, b)| (ConstructorRef::new(id, *a), ConstructorRef::new(id, *b))),
            );
            conflicting.extend(
                props
                    .conflict_errors()
                    .iter()
                    .map(|(a, b)| (ConstructorRef::new(id, *a), ConstructorRef::new(id, *b))),
            );
        }

        if identical.is_empty() && conflicting.is_empty() {
            return Ok(());
        }

        log::warn!(
            "{} identical and {} conflicting constructor pattern pairs",
            identical.len(),
            conflicting.len(),
        );

        let mut message = String::new();
        for (a, b) in identical {
            message.push_str(&format!(
                "Constructors with identical patterns:\n   {}\n   {}\n",
                self.describe(a),
                self.describe(b),
            ));
        }
        for (a, b) in conflicting {
            message.push_str(&format!(
                "Constructor patterns cannot be distinguished:\n   {}\n   {}\n",
                self.describe(a),
                self.describe(b),
            ));
        }
        Err(Error::Specification(message))
    }

    fn build_subtable_pattern(&mut self, id: usize, errors: &mut Vec<String>) -> Result<TokenPattern, Error> {
        let (name, count) = {
            let symbol = self.symbol(id)?;
            let subtable = symbol.as_subtable()?;
            if let Some(pattern) = subtable.pattern() {
                return Ok(pattern.clone());
            }
            (symbol.name().to_owned(), subtable.len())
        };

        {
            let subtable = self.symbol_mut(id)?.as_subtable_mut()?;
            subtable.being_built = true;
            subtable.pattern = Some(TokenPattern::new());
        }

        if count == 0 {
            errors.push(format!("There are no constructors in table: {}", name));
            self.symbol_mut(id)?.as_subtable_mut()?.being_built = false;
            return Ok(TokenPattern::new());
        }

        log::debug!("building patterns for `{}` ({} constructors)", name, count);

        let mut pattern: Option<TokenPattern> = None;
        for index in 0..count {
            let ct = ConstructorRef::new(id, index);
            match self.build_constructor_pattern(ct, errors) {
                Ok(()) => (),
                Err(Error::Specification(reason)) => {
                    errors.push(format!("{}: for {}", reason, self.describe(ct)));
                }
                Err(e) => return Err(e),
            }

            let ctor_pattern = self.constructor(ct)?.pattern.clone().unwrap_or_default();
            pattern = Some(match pattern {
                None => ctor_pattern,
                Some(common) => ctor_pattern.common_sub_pattern(&common)?,
            });
        }

        let pattern = pattern.unwrap_or_default();
        let subtable = self.symbol_mut(id)?.as_subtable_mut()?;
        subtable.pattern = Some(pattern.clone());
        subtable.being_built = false;
        Ok(pattern)
    }

    fn operand_source(&self, id: usize) -> Result<(String, OperandSource), Error> {
        let symbol = self.symbol(id)?;
        let operand = symbol.as_operand()?;
        let source = if let Some(defining) = operand.defining_symbol() {
            let defining = self.symbol(defining)?;
            match defining.data() {
                SymbolData::Subtable(subtable) => OperandSource::Subtable {
                    id: defining.id(),
                    being_built: subtable.being_built,
                },
                _ => OperandSource::Expression(defining.pattern_expression().cloned()),
            }
        } else if let Some(expression) = operand.defining_expression() {
            OperandSource::Expression(Some(expression.clone()))
        } else {
            OperandSource::Undefined
        };
        Ok((symbol.name().to_owned(), source))
    }

    fn build_constructor_pattern(&mut self, ct: ConstructorRef, errors: &mut Vec<String>) -> Result<(), Error> {
        let operand_ids = {
            let ctor = self.constructor_mut(ct)?;
            if ctor.pattern.is_some() {
                return Ok(());
            }
            ctor.pattern = Some(TokenPattern::new());
            ctor.operands.clone()
        };

        let mut patterns: Vec<TokenPattern> = Vec::with_capacity(operand_ids.len());
        let mut recursion = false;

        for &id in operand_ids.iter() {
            let (name, source) = self.operand_source(id)?;
            let pattern = match source {
                OperandSource::Subtable { being_built: true, .. } => {
                    if recursion {
                        return Err(Error::specification("Illegal recursion"));
                    }
                    recursion = true;
                    TokenPattern::new()
                }
                OperandSource::Subtable { id, .. } => self.build_subtable_pattern(id, errors)?,
                OperandSource::Expression(Some(expression)) => expression.gen_min_pattern(&patterns)?,
                OperandSource::Expression(None) => TokenPattern::new(),
                OperandSource::Undefined => {
                    return Err(Error::specification(format!("{}: operand is undefined", name)));
                }
            };

            let operand = self.symbol_mut(id)?.as_operand_mut()?;
            operand.minimum_length = pattern.minimum_length();
            if pattern.left_ellipsis() || pattern.right_ellipsis() {
                operand.variable_length = true;
            }
            patterns.push(pattern);
        }

        let mut pattern = {
            let ctor = self.constructor_mut(ct)?;
            let equation = ctor
                .equation
                .as_mut()
                .ok_or_else(|| Error::specification("Missing equation"))?;
            equation.gen_pattern(&patterns)?;
            equation.token_pattern().clone()
        };

        if pattern.always_false() {
            return Err(Error::specification("Impossible pattern"));
        }
        if recursion {
            pattern.set_right_ellipsis(true);
        }

        let mut placements = Vec::with_capacity(operand_ids.len());
        let mut lengths = Vec::with_capacity(operand_ids.len());
        for &id in operand_ids.iter() {
            let operand = self.symbol(id)?.as_operand()?;
            placements.push(OperandPlacement {
                offset_base: operand.offset_base(),
                relative_offset: operand.relative_offset(),
                offset_irrelevant: operand.is_offset_irrelevant(),
            });
            lengths.push((operand.minimum_length(), operand.is_variable_length()));
        }

        let resolved = {
            let ctor = self.constructor(ct)?;
            let mut state = OperandResolve::new(&mut placements);
            ctor.equation
                .as_ref()
                .map(|equation| equation.resolve_operand_left(&mut state))
                .unwrap_or(false)
        };
        if !resolved {
            return Err(Error::specification("Unable to resolve operand offsets"));
        }

        // fold relative offsets into absolute ones where lengths are fixed
        for i in 0..placements.len() {
            if placements[i].offset_irrelevant {
                placements[i].offset_base = None;
                placements[i].relative_offset = 0;
                continue;
            }
            let mut base = placements[i].offset_base;
            let mut offset = placements[i].relative_offset;
            while let Some(b) = base {
                let (min_length, variable) = lengths[b];
                if variable {
                    break;
                }
                base = placements[b].offset_base;
                offset += min_length + placements[b].relative_offset;
                if base.is_none() {
                    placements[i].relative_offset = offset;
                }
            }
            if base.is_none() {
                placements[i].offset_base = None;
            }
        }

        for (&id, placement) in operand_ids.iter().zip(placements.iter()) {
            let operand = self.symbol_mut(id)?.as_operand_mut()?;
            operand.offset_base = placement.offset_base;
            operand.relative_offset = placement.relative_offset;
        }

        {
            let ctor = self.constructor_mut(ct)?;
            ctor.min_length = pattern.minimum_length();
            ctor.pattern = Some(pattern);
        }

        self.validate_context(ct)?;
        self.order_operands(ct)
    }

    /// Context expressions are evaluated before operand offsets are known,
    /// so they may only use operands placed relative to the constructor.
    fn validate_context(&self, ct: ConstructorRef) -> Result<(), Error> {
        for change in self.constructor(ct)?.context_changes() {
            if let ContextChange::Operator { expression, .. } = change {
                for value in expression.operand_values() {
                    let id = self
                        .constructor(value.constructor())?
                        .operand(value.index())
                        .ok_or(Error::InvalidSymbol)?;
                    let symbol = self.symbol(id)?;
                    if symbol.as_operand()?.offset_base().is_some() {
                        return Err(Error::specification(format!(
                            "{}: cannot be used in context expression",
                            symbol.name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Reorders operands so each follows the operand its offset depends on,
    /// with expression-defined operands last.
    fn order_operands(&mut self, ct: ConstructorRef) -> Result<(), Error> {
        let ctor = self.constructor(ct)?;
        let operand_ids = ctor.operands.clone();
        let count = operand_ids.len();

        let mut marked = vec![false; count];
        let mut pattern_order = Vec::with_capacity(count);
        if let Some(ref equation) = ctor.equation {
            equation.operand_order(&mut pattern_order, &mut marked);
        }
        for (index, mark) in marked.iter_mut().enumerate() {
            if !*mark {
                *mark = true;
                pattern_order.push(index);
            }
        }

        let mut placement = Vec::with_capacity(count);
        for &id in operand_ids.iter() {
            let operand = self.symbol(id)?.as_operand()?;
            placement.push((operand.offset_base(), operand.is_offset_irrelevant()));
        }

        let mut order = Vec::with_capacity(count);
        loop {
            let last = order.len();
            for &index in pattern_order.iter() {
                let (base, irrelevant) = placement[index];
                if !marked[index] || irrelevant {
                    continue;
                }
                if base.map_or(true, |b| !marked[b]) {
                    order.push(index);
                    marked[index] = false;
                }
            }
            if order.len() == last {
                break;
            }
        }
        for &index in pattern_order.iter() {
            if placement[index].1 {
                order.push(index);
                marked[index] = false;
            }
        }

        if order.len() != count {
            return Err(Error::specification(
                "Circular offset dependency between operands",
            ));
        }

        let mut handmap = vec![0; count];
        for (new, &old) in order.iter().enumerate() {
            handmap[old] = new;
        }

        for (old, &id) in operand_ids.iter().enumerate() {
            let operand = self.symbol_mut(id)?.as_operand_mut()?;
            let new = handmap[old];
            operand.index = new;
            operand.local_expression = Arc::new(PatternExpression::Operand(OperandValue::new(new, ct)));
            operand.offset_base = operand.offset_base.map(|b| handmap[b]);
            if let Some(ref expression) = operand.defining_expression {
                operand.defining_expression = Some(expression.remap_operands(ct, &handmap));
            }
        }

        let ctor = self.constructor_mut(ct)?;
        ctor.operands = order.iter().map(|&old| operand_ids[old]).collect();

        if let Some(ref mut template) = ctor.template {
            template.change_handle_index(&handmap);
        }
        for template in ctor.named_templates.iter_mut().flatten() {
            template.change_handle_index(&handmap);
        }

        for piece in ctor.print_pieces.iter_mut() {
            if let PrintPiece::Operand(ref mut index) = piece {
                *index = handmap[*index];
            }
        }

        for change in ctor.context.iter_mut() {
            if let ContextChange::Operator { ref mut expression, .. } = change {
                *expression = expression.remap_operands(ct, &handmap);
            }
        }

        Ok(())
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("symbol_table")
            .attr("scopesize", self.scopes.len())
            .attr("symbolsize", self.symbols.len());

        for scope in self.scopes.iter() {
            out.start("scope")
                .attr_hex("id", scope.id() as u64)
                .attr_hex("parent", scope.parent().unwrap_or(scope.id()) as u64)
                .end();
        }

        for symbol in self.symbols.iter() {
            symbol.header_to_xml(out);
        }

        for symbol in self.symbols.iter() {
            symbol.to_xml(out);
        }

        out.end();
    }

    pub fn from_xml(input: xml::Node, manager: &SpaceManager) -> Result<Self, DeserialiseError> {
        input.expect_tag("symbol_table")?;

        let scope_size = input.attribute_int::<usize>("scopesize")?;
        let symbol_size = input.attribute_int::<usize>("symbolsize")?;

        if scope_size == 0 {
            return Err(DeserialiseError::Invariant("symbol table has no global scope"));
        }

        let mut children = input.children().filter(xml::Node::is_element);

        let mut scopes = vec![SymbolScope::default(); scope_size];
        for _ in 0..scope_size {
            let child = children
                .next()
                .ok_or(DeserialiseError::Invariant("incorrect number of scopes"))?;
            child.expect_tag("scope")?;

            let id = child.attribute_int::<usize>("id")?;
            let parent = child.attribute_int::<usize>("parent")?;
            let scope = scopes
                .get_mut(id)
                .ok_or(DeserialiseError::Invariant("scope id out of range"))?;

            scope.id = id;
            scope.parent = if id == parent { None } else { Some(parent) };
        }

        let mut headers: Vec<Option<(SymbolKind, usize, Ustr)>> = vec![None; symbol_size];
        for _ in 0..symbol_size {
            let child = children
                .next()
                .ok_or(DeserialiseError::Invariant("incorrect number of symbol headers"))?;

            let tag = child.tag_name().name();
            let kind = SymbolKind::from_head_tag(tag)
                .ok_or_else(|| DeserialiseError::TagUnexpected(tag.to_owned()))?;
            let id = child.attribute_int::<usize>("id")?;
            let scope = child.attribute_int::<usize>("scope")?;
            let name = Ustr::from(&child.attribute_string("name")?);

            let header = headers
                .get_mut(id)
                .ok_or(DeserialiseError::Invariant("symbol id out of range"))?;
            if header.is_some() {
                return Err(DeserialiseError::Invariant("inconsistent symbol id"));
            }
            *header = Some((kind, scope, name));

            scopes
                .get_mut(scope)
                .ok_or(DeserialiseError::Invariant("symbol scope out of range"))?
                .add_symbol(name, id)
                .map_err(|_| DeserialiseError::Invariant("duplicate symbol name in scope"))?;
        }

        let mut symbols: Vec<Option<Symbol>> = vec![None; symbol_size];
        for child in children {
            let id = child.attribute_int::<usize>("id")?;
            let (kind, scope, name) = headers
                .get(id)
                .copied()
                .flatten()
                .ok_or(DeserialiseError::Invariant("symbol content without header"))?;

            if child.tag_name().name() != kind.content_tag() {
                return Err(DeserialiseError::TagUnexpected(
                    child.tag_name().name().to_owned(),
                ));
            }

            symbols[id] = Some(Symbol::from_xml(kind, id, scope, name, child, manager)?);
        }

        let symbols = symbols
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(DeserialiseError::Invariant("symbol header without content"))?;

        Ok(Self { scopes, symbols })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disassembly::equation::PatternEquation;
    use crate::disassembly::expression::TokenField;
    use crate::disassembly::token_pattern::Token;

    fn byte_token() -> Arc<Token> {
        Arc::new(Token::new("byte", 1, true, 0))
    }

    fn field(token: &Arc<Token>, start: usize, end: usize) -> Arc<PatternExpression> {
        Arc::new(PatternExpression::TokenField(TokenField::new(
            token.clone(),
            false,
            start,
            end,
        )))
    }

    #[test]
    fn duplicate_names_and_scope_chain() -> Result<(), Error> {
        let mut table = SymbolTable::new();
        let global = table.add_global("r0", SymbolData::epsilon())?;
        assert!(table.add_global("r0", SymbolData::epsilon()).is_err());

        let inner = table.add_scope(0)?;
        assert_eq!(table.find(inner, "r0").map(Symbol::id), Some(global));

        let shadow = table.add_symbol(inner, "r0", SymbolData::epsilon())?;
        assert_eq!(table.find(inner, "r0").map(Symbol::id), Some(shadow));
        assert_eq!(table.find_global("r0").map(Symbol::id), Some(global));
        assert!(table.find(inner, "missing").is_none());
        Ok(())
    }

    #[test]
    fn operands_follow_equation_order() -> Result<(), Error> {
        let token = byte_token();
        let mut table = SymbolTable::new();

        let imm = table.add_global("imm", SymbolData::value(field(&token, 0, 7)))?;
        let root = table.add_subtable(ROOT_TABLE)?;
        let ct = table.add_constructor(root)?;

        let first = table.add_operand(ct, "a")?;
        let second = table.add_operand(ct, "b")?;
        table.define_operand(ct, first, OperandDefinition::Symbol(imm))?;
        table.define_operand(ct, second, OperandDefinition::Symbol(imm))?;

        let a_id = table.constructor(ct)?.operand(first).ok_or(Error::InvalidSymbol)?;
        let b_id = table.constructor(ct)?.operand(second).ok_or(Error::InvalidSymbol)?;

        {
            let ctor = table.constructor_mut(ct)?;
            ctor.add_syntax("PAIR");
            ctor.add_syntax(" ");
            ctor.add_print_operand(first);
            ctor.add_syntax(",");
            ctor.add_print_operand(second);
            ctor.set_equation(PatternEquation::cat(
                PatternEquation::operand(second),
                PatternEquation::operand(first),
            ));
        }

        table.build_patterns()?;

        let ctor = table.constructor(ct)?;
        assert_eq!(ctor.operands(), &[b_id, a_id]);
        assert_eq!(ctor.minimum_length(), 2);
        assert_eq!(
            ctor.print_pieces(),
            &[
                PrintPiece::Text("PAIR".into()),
                PrintPiece::Text(" ".into()),
                PrintPiece::Operand(1),
                PrintPiece::Text(",".into()),
                PrintPiece::Operand(0),
            ]
        );

        let a = table.symbol(a_id)?.as_operand()?;
        assert_eq!(a.index(), 1);
        assert_eq!(a.offset_base(), None);
        assert_eq!(a.relative_offset(), 1);
        assert_eq!(a.minimum_length(), 1);
        Ok(())
    }

    #[test]
    fn undefined_operand_and_missing_table() -> Result<(), Error> {
        let mut table = SymbolTable::new();
        assert!(table.build_patterns().is_err());

        let root = table.add_subtable(ROOT_TABLE)?;
        let ct = table.add_constructor(root)?;
        let index = table.add_operand(ct, "x")?;
        table
            .constructor_mut(ct)?
            .set_equation(PatternEquation::operand(index));

        match table.build_patterns() {
            Err(Error::Specification(msg)) => assert!(msg.contains("x: operand is undefined")),
            other => panic!("unexpected result: {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn xml_round_trip_keeps_scopes_and_headers() -> Result<(), Error> {
        let token = byte_token();
        let mut table = SymbolTable::new();
        table.add_global("imm", SymbolData::value(field(&token, 0, 7)))?;
        table.add_global("byte", SymbolData::Token(token))?;
        let inner = table.add_scope(0)?;
        table.add_symbol(inner, "local", SymbolData::epsilon())?;

        let mut out = XmlWriter::new();
        table.to_xml(&mut out);
        let text = out.finish();

        let manager = SpaceManager::new();
        let doc = xml::Document::parse(&text).map_err(DeserialiseError::from)?;
        let back = SymbolTable::from_xml(doc.root_element(), &manager)?;

        assert_eq!(back.len(), 3);
        assert_eq!(back.scopes().len(), 2);
        assert_eq!(back.find_global("byte").map(Symbol::kind), Some(SymbolKind::Token));
        assert_eq!(back.find(inner, "imm").map(Symbol::kind), Some(SymbolKind::Value));
        assert!(back.find_global("local").is_none());
        Ok(())
    }
}
