use std::fmt;
use std::sync::Arc;

use sleigh_bytes::{Order, BE, LE};

use crate::bits;
use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::symbol::ConstructorRef;
use crate::disassembly::token_pattern::{Token, TokenPattern};
use crate::disassembly::walker::ParserWalker;
use crate::disassembly::Error;

/// A bit-field of a token in the instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenField {
    token: Option<Arc<Token>>,
    big_endian: bool,
    sign_bit: bool,
    bit_start: usize,
    bit_end: usize,
    byte_start: usize,
    byte_end: usize,
    shift: u32,
}

impl TokenField {
    pub fn new(token: Arc<Token>, sign_bit: bool, bit_start: usize, bit_end: usize) -> Self {
        let big_endian = token.is_big_endian();
        let (byte_start, byte_end) = if big_endian {
            let bits = token.size() * 8;
            ((bits - bit_end - 1) / 8, (bits - bit_start - 1) / 8)
        } else {
            (bit_start / 8, bit_end / 8)
        };

        Self {
            token: Some(token),
            big_endian,
            sign_bit,
            bit_start,
            bit_end,
            byte_start,
            byte_end,
            shift: (bit_start % 8) as u32,
        }
    }

    pub fn token(&self) -> Option<&Arc<Token>> {
        self.token.as_ref()
    }

    pub fn is_big_endian(&self) -> bool {
        self.big_endian
    }

    pub fn is_signed(&self) -> bool {
        self.sign_bit
    }

    pub fn bit_start(&self) -> usize {
        self.bit_start
    }

    pub fn bit_end(&self) -> usize {
        self.bit_end
    }

    pub fn byte_start(&self) -> usize {
        self.byte_start
    }

    pub fn byte_end(&self) -> usize {
        self.byte_end
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    fn value(&self, walker: &ParserWalker) -> Result<i64, Error> {
        let mut bytes = [0u8; 8];
        let size = (self.byte_end - self.byte_start + 1).min(bytes.len());
        for (i, byte) in bytes[..size].iter_mut().enumerate() {
            *byte = walker.instruction_bytes(self.byte_start + i, 1)? as u8;
        }

        let res = if self.big_endian {
            <BE as Order>::read_word(&bytes[..size])
        } else {
            <LE as Order>::read_word(&bytes[..size])
        };

        let res = res.checked_shr(self.shift).unwrap_or(0);
        Ok(extend(res, self.sign_bit, self.bit_end - self.bit_start))
    }
}

/// A bit-field of the context vector. Bits are numbered from the most
/// significant bit of the first context word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextField {
    sign_bit: bool,
    start_bit: usize,
    end_bit: usize,
    start_byte: usize,
    end_byte: usize,
    shift: u32,
}

impl ContextField {
    pub fn new(sign_bit: bool, start_bit: usize, end_bit: usize) -> Self {
        Self {
            sign_bit,
            start_bit,
            end_bit,
            start_byte: start_bit / 8,
            end_byte: end_bit / 8,
            shift: (7 - (end_bit % 8)) as u32,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.sign_bit
    }

    pub fn start_bit(&self) -> usize {
        self.start_bit
    }

    pub fn end_bit(&self) -> usize {
        self.end_bit
    }

    pub fn start_byte(&self) -> usize {
        self.start_byte
    }

    pub fn end_byte(&self) -> usize {
        self.end_byte
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    fn value(&self, walker: &ParserWalker) -> i64 {
        let mut start = self.start_byte;
        let mut remaining = self.end_byte - self.start_byte + 1;
        let mut res = 0u64;

        while remaining >= 4 {
            let word = walker.context_bytes(start, 4);
            res = res.checked_shl(32).unwrap_or(0) | word as u64;
            start += 4;
            remaining -= 4;
        }

        if remaining > 0 {
            let word = walker.context_bytes(start, remaining);
            res = res.checked_shl(8 * remaining as u32).unwrap_or(0) | word as u64;
        }

        res = res.checked_shr(self.shift).unwrap_or(0);
        extend(res, self.sign_bit, self.end_bit - self.start_bit)
    }
}

/// Reference to operand `index` of a constructor, evaluated through the
/// operand's defining expression.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OperandValue {
    index: usize,
    ct: ConstructorRef,
}

impl OperandValue {
    pub fn new(index: usize, ct: ConstructorRef) -> Self {
        Self { index, ct }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn constructor(&self) -> ConstructorRef {
        self.ct
    }

    fn value(&self, walker: &ParserWalker) -> Result<i64, Error> {
        let symbols = walker.symbols();
        let ctor = symbols.constructor(self.ct)?;
        let operand_id = ctor.operand(self.index).ok_or(Error::InvalidSymbol)?;
        let operand = symbols.symbol(operand_id)?.as_operand()?;

        let expression = if let Some(expr) = operand.defining_expression() {
            expr
        } else if let Some(sym) = operand.defining_symbol() {
            symbols
                .symbol(sym)?
                .pattern_expression()
                .ok_or_else(|| {
                    Error::specification(format!(
                        "operand `{}` has no value usable in an expression",
                        symbols.symbol(operand_id).map(|s| s.name()).unwrap_or("?")
                    ))
                })?
        } else {
            return Err(Error::specification("operand used in expression is undefined"));
        };

        let detached = walker.out_of_band(self.ct, self.index, operand);
        expression.value(&detached)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Sub,
    Mult,
    LeftShift,
    RightShift,
    And,
    Or,
    Xor,
    Div,
}

impl BinaryOp {
    fn tag(&self) -> &'static str {
        match self {
            Self::Plus => "plus_exp",
            Self::Sub => "sub_exp",
            Self::Mult => "mult_exp",
            Self::LeftShift => "lshift_exp",
            Self::RightShift => "rshift_exp",
            Self::And => "and_exp",
            Self::Or => "or_exp",
            Self::Xor => "xor_exp",
            Self::Div => "div_exp",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "plus_exp" => Self::Plus,
            "sub_exp" => Self::Sub,
            "mult_exp" => Self::Mult,
            "lshift_exp" => Self::LeftShift,
            "rshift_exp" => Self::RightShift,
            "and_exp" => Self::And,
            "or_exp" => Self::Or,
            "xor_exp" => Self::Xor,
            "div_exp" => Self::Div,
            _ => return None,
        })
    }

    fn apply(&self, l: i64, r: i64) -> i64 {
        match self {
            Self::Plus => l.wrapping_add(r),
            Self::Sub => l.wrapping_sub(r),
            Self::Mult => l.wrapping_mul(r),
            Self::LeftShift => l.checked_shl(r as u32).unwrap_or(0),
            Self::RightShift => l
                .checked_shr(r as u32)
                .unwrap_or(if l < 0 { -1 } else { 0 }),
            Self::And => l & r,
            Self::Or => l | r,
            Self::Xor => l ^ r,
            Self::Div => l.checked_div(r).unwrap_or(0),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Not,
}

/// Expressions over instruction and context bits; subtrees are shared
/// between the operands and symbols that mention them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternExpression {
    TokenField(TokenField),
    ContextField(ContextField),
    Constant(i64),
    Operand(OperandValue),
    StartInstruction,
    EndInstruction,
    Next2Instruction,
    Binary(BinaryOp, Arc<Self>, Arc<Self>),
    Unary(UnaryOp, Arc<Self>),
}

fn extend(value: u64, signed: bool, bit: usize) -> i64 {
    if signed {
        bits::sign_extend(value, bit as u32) as i64
    } else {
        bits::zero_extend(value, bit as u32) as i64
    }
}

impl PatternExpression {
    pub fn binary(op: BinaryOp, lhs: Arc<Self>, rhs: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Binary(op, lhs, rhs))
    }

    pub fn unary(op: UnaryOp, operand: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Unary(op, operand))
    }

    /// True for the leaf values an equation may constrain directly.
    pub fn is_value(&self) -> bool {
        !matches!(self, Self::Binary(..) | Self::Unary(..))
    }

    pub fn value(&self, walker: &ParserWalker) -> Result<i64, Error> {
        Ok(match self {
            Self::TokenField(field) => field.value(walker)?,
            Self::ContextField(field) => field.value(walker),
            Self::Constant(value) => *value,
            Self::Operand(operand) => operand.value(walker)?,
            Self::StartInstruction => address_units(walker.address()),
            Self::EndInstruction => address_units(walker.next_address()),
            Self::Next2Instruction => {
                let addr = walker.next2_address().ok_or_else(|| {
                    Error::invariant("inst_next2 requested but not computed")
                })?;
                address_units(addr)
            }
            Self::Binary(op, lhs, rhs) => op.apply(lhs.value(walker)?, rhs.value(walker)?),
            Self::Unary(UnaryOp::Minus, operand) => operand.value(walker)?.wrapping_neg(),
            Self::Unary(UnaryOp::Not, operand) => !operand.value(walker)?,
        })
    }

    pub fn min_value(&self) -> Result<i64, Error> {
        match self {
            Self::TokenField(_)
            | Self::ContextField(_)
            | Self::StartInstruction
            | Self::EndInstruction
            | Self::Next2Instruction => Ok(0),
            Self::Constant(value) => Ok(*value),
            Self::Operand(_) => Err(Error::specification("operand used in pattern expression")),
            _ => Err(Error::invariant("range requested for a compound expression")),
        }
    }

    pub fn max_value(&self) -> Result<i64, Error> {
        match self {
            Self::TokenField(field) => Ok(extend(!0, false, field.bit_end - field.bit_start)),
            Self::ContextField(field) => Ok(extend(!0, false, field.end_bit - field.start_bit)),
            Self::StartInstruction | Self::EndInstruction | Self::Next2Instruction => Ok(0),
            Self::Constant(value) => Ok(*value),
            Self::Operand(_) => Err(Error::specification("operand used in pattern expression")),
            _ => Err(Error::invariant("range requested for a compound expression")),
        }
    }

    /// Leaf values in evaluation order.
    pub fn list_values<'a>(&'a self, values: &mut Vec<&'a PatternExpression>) {
        match self {
            Self::Binary(_, lhs, rhs) => {
                lhs.list_values(values);
                rhs.list_values(values);
            }
            Self::Unary(_, operand) => operand.list_values(values),
            leaf => values.push(leaf),
        }
    }

    /// Evaluates with each leaf replaced, in [`list_values`] order, by the
    /// corresponding entry of `replace`.
    ///
    /// [`list_values`]: PatternExpression::list_values
    pub fn sub_value(&self, replace: &[i64], position: &mut usize) -> Result<i64, Error> {
        match self {
            Self::Binary(op, lhs, rhs) => {
                let l = lhs.sub_value(replace, position)?;
                let r = rhs.sub_value(replace, position)?;
                Ok(op.apply(l, r))
            }
            Self::Unary(UnaryOp::Minus, operand) => {
                Ok(operand.sub_value(replace, position)?.wrapping_neg())
            }
            Self::Unary(UnaryOp::Not, operand) => Ok(!operand.sub_value(replace, position)?),
            _ => {
                let value = replace
                    .get(*position)
                    .copied()
                    .ok_or_else(|| Error::invariant("expression substitution underflow"))?;
                *position += 1;
                Ok(value)
            }
        }
    }

    /// Smallest pattern implied by the expression being evaluated at all,
    /// given the patterns of the constructor's operands.
    pub fn gen_min_pattern(&self, operands: &[TokenPattern]) -> Result<TokenPattern, Error> {
        match self {
            Self::TokenField(field) => Ok(field
                .token
                .clone()
                .map(TokenPattern::from_token)
                .unwrap_or_default()),
            Self::Operand(operand) => operands
                .get(operand.index)
                .cloned()
                .ok_or_else(|| Error::invariant("operand pattern requested before it was built")),
            Self::Binary(_, lhs, rhs) => lhs
                .gen_min_pattern(operands)?
                .and(&rhs.gen_min_pattern(operands)?),
            Self::Unary(_, operand) => operand.gen_min_pattern(operands),
            _ => Ok(TokenPattern::new()),
        }
    }

    /// Pattern matching exactly those bitstreams where this value equals
    /// `value`.
    pub fn gen_pattern(&self, value: i64) -> Result<TokenPattern, Error> {
        match self {
            Self::TokenField(field) => {
                let token = field.token.clone().ok_or_else(|| {
                    Error::specification("token field constrained without its token")
                })?;
                Ok(TokenPattern::from_field(
                    token,
                    value,
                    field.bit_start,
                    field.bit_end,
                ))
            }
            Self::ContextField(field) => Ok(TokenPattern::from_context(
                value,
                field.start_bit,
                field.end_bit,
            )),
            Self::Constant(constant) => Ok(TokenPattern::from_bool(*constant == value)),
            Self::StartInstruction | Self::EndInstruction | Self::Next2Instruction => {
                Ok(TokenPattern::new())
            }
            Self::Operand(_) => Err(Error::specification("operand used in pattern expression")),
            _ => Err(Error::invariant("pattern requested for a compound expression")),
        }
    }

    /// Operand references, including nested ones.
    pub fn operand_values(&self) -> Vec<OperandValue> {
        let mut values = Vec::new();
        self.list_values(&mut values);
        values
            .into_iter()
            .filter_map(|v| match v {
                Self::Operand(operand) => Some(*operand),
                _ => None,
            })
            .collect()
    }

    /// Rewrites references to operands of `ct` through `map` (old index to
    /// new index), sharing every untouched subtree.
    pub fn remap_operands(self: &Arc<Self>, ct: ConstructorRef, map: &[usize]) -> Arc<Self> {
        match self.as_ref() {
            Self::Operand(operand) if operand.ct == ct => match map.get(operand.index) {
                Some(&index) if index != operand.index => {
                    Arc::new(Self::Operand(OperandValue::new(index, ct)))
                }
                _ => self.clone(),
            },
            Self::Binary(op, lhs, rhs) => {
                let l = lhs.remap_operands(ct, map);
                let r = rhs.remap_operands(ct, map);
                if Arc::ptr_eq(&l, lhs) && Arc::ptr_eq(&r, rhs) {
                    self.clone()
                } else {
                    Self::binary(*op, l, r)
                }
            }
            Self::Unary(op, operand) => {
                let o = operand.remap_operands(ct, map);
                if Arc::ptr_eq(&o, operand) {
                    self.clone()
                } else {
                    Self::unary(*op, o)
                }
            }
            _ => self.clone(),
        }
    }

    pub fn from_xml(input: xml::Node) -> Result<Arc<Self>, DeserialiseError> {
        let tag = input.tag_name().name();
        if let Some(op) = BinaryOp::from_tag(tag) {
            let mut children = input.children().filter(xml::Node::is_element);
            let lhs = children
                .next()
                .ok_or(DeserialiseError::Invariant("missing lhs of binary expression"))?;
            let rhs = children
                .next()
                .ok_or(DeserialiseError::Invariant("missing rhs of binary expression"))?;
            return Ok(Self::binary(op, Self::from_xml(lhs)?, Self::from_xml(rhs)?));
        }

        Ok(Arc::new(match tag {
            "tokenfield" => Self::TokenField(TokenField {
                token: None,
                big_endian: input.attribute_bool("bigendian")?,
                sign_bit: input.attribute_bool("signbit")?,
                bit_start: input.attribute_int("bitstart")?,
                bit_end: input.attribute_int("bitend")?,
                byte_start: input.attribute_int("bytestart")?,
                byte_end: input.attribute_int("byteend")?,
                shift: input.attribute_int("shift")?,
            }),
            "contextfield" => Self::ContextField(ContextField {
                sign_bit: input.attribute_bool("signbit")?,
                start_bit: input.attribute_int("startbit")?,
                end_bit: input.attribute_int("endbit")?,
                start_byte: input.attribute_int("startbyte")?,
                end_byte: input.attribute_int("endbyte")?,
                shift: input.attribute_int("shift")?,
            }),
            "intb" => Self::Constant(input.attribute_int("val")?),
            "operand_exp" => Self::Operand(OperandValue::new(
                input.attribute_int("index")?,
                ConstructorRef::new(input.attribute_int("table")?, input.attribute_int("ct")?),
            )),
            "start_exp" => Self::StartInstruction,
            "end_exp" => Self::EndInstruction,
            "next2_exp" => Self::Next2Instruction,
            "minus_exp" | "not_exp" => {
                let operand = input
                    .children()
                    .find(xml::Node::is_element)
                    .ok_or(DeserialiseError::Invariant("missing operand of unary expression"))?;
                let op = if tag == "minus_exp" {
                    UnaryOp::Minus
                } else {
                    UnaryOp::Not
                };
                Self::Unary(op, Self::from_xml(operand)?)
            }
            tag => return Err(DeserialiseError::TagUnexpected(tag.to_owned())),
        }))
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        match self {
            Self::TokenField(field) => {
                out.start("tokenfield")
                    .attr("bigendian", field.big_endian)
                    .attr("signbit", field.sign_bit)
                    .attr("bitstart", field.bit_start)
                    .attr("bitend", field.bit_end)
                    .attr("bytestart", field.byte_start)
                    .attr("byteend", field.byte_end)
                    .attr("shift", field.shift)
                    .end();
            }
            Self::ContextField(field) => {
                out.start("contextfield")
                    .attr("signbit", field.sign_bit)
                    .attr("startbit", field.start_bit)
                    .attr("endbit", field.end_bit)
                    .attr("startbyte", field.start_byte)
                    .attr("endbyte", field.end_byte)
                    .attr("shift", field.shift)
                    .end();
            }
            Self::Constant(value) => {
                out.start("intb").attr("val", value).end();
            }
            Self::Operand(operand) => {
                out.start("operand_exp")
                    .attr("index", operand.index)
                    .attr_hex("table", operand.ct.table() as u64)
                    .attr_hex("ct", operand.ct.index() as u64)
                    .end();
            }
            Self::StartInstruction => {
                out.empty("start_exp");
            }
            Self::EndInstruction => {
                out.empty("end_exp");
            }
            Self::Next2Instruction => {
                out.empty("next2_exp");
            }
            Self::Binary(op, lhs, rhs) => {
                out.start(op.tag());
                lhs.to_xml(out);
                rhs.to_xml(out);
                out.end();
            }
            Self::Unary(op, operand) => {
                out.start(match op {
                    UnaryOp::Minus => "minus_exp",
                    UnaryOp::Not => "not_exp",
                });
                operand.to_xml(out);
                out.end();
            }
        }
    }
}

fn address_units(addr: &crate::address::AddressValue) -> i64 {
    (addr.offset() / addr.space().word_size().max(1) as u64) as i64
}

impl fmt::Display for PatternExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TokenField(field) => write!(f, "token[{}..={}]", field.bit_start, field.bit_end),
            Self::ContextField(field) => {
                write!(f, "context[{}..={}]", field.start_bit, field.end_bit)
            }
            Self::Constant(value) => write!(f, "{:#x}", value),
            Self::Operand(operand) => write!(f, "operand{}", operand.index),
            Self::StartInstruction => f.write_str("inst_start"),
            Self::EndInstruction => f.write_str("inst_next"),
            Self::Next2Instruction => f.write_str("inst_next2"),
            Self::Binary(op, lhs, rhs) => {
                let sym = match op {
                    BinaryOp::Plus => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mult => "*",
                    BinaryOp::LeftShift => "<<",
                    BinaryOp::RightShift => ">>",
                    BinaryOp::And => "&",
                    BinaryOp::Or => "|",
                    BinaryOp::Xor => "^",
                    BinaryOp::Div => "/",
                };
                write!(f, "({} {} {})", lhs, sym, rhs)
            }
            Self::Unary(UnaryOp::Minus, operand) => write!(f, "-{}", operand),
            Self::Unary(UnaryOp::Not, operand) => write!(f, "~{}", operand),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_field_layout() {
        let token = Arc::new(Token::new("instr", 2, true, 0));
        let field = TokenField::new(token, false, 4, 11);
        assert_eq!((field.byte_start(), field.byte_end()), (0, 1));
        assert_eq!(field.shift(), 4);

        let low = TokenField::new(Arc::new(Token::new("instr", 2, true, 0)), false, 0, 3);
        assert_eq!((low.byte_start(), low.byte_end()), (1, 1));
    }

    #[test]
    fn token_values_follow_byte_order() -> Result<(), Error> {
        use crate::address::AddressValue;
        use crate::disassembly::symbol::SymbolTable;
        use crate::disassembly::walker::ParserContext;
        use crate::space::SpaceKind;
        use crate::space_manager::SpaceManager;

        let mut manager = SpaceManager::new();
        let ram = manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);
        let mut ctx = ParserContext::new(AddressValue::new(ram, 0), manager.constant_space().clone(), 1);
        ctx.buffer_mut()[..2].copy_from_slice(&[0x12, 0xf4]);

        let symbols = SymbolTable::new();
        let walker = ParserWalker::new(&ctx, &symbols);

        let big = PatternExpression::TokenField(TokenField::new(
            Arc::new(Token::new("instr", 2, true, 0)),
            false,
            4,
            11,
        ));
        assert_eq!(big.value(&walker)?, 0x2f);

        let little = PatternExpression::TokenField(TokenField::new(
            Arc::new(Token::new("instr", 2, false, 0)),
            true,
            8,
            15,
        ));
        assert_eq!(little.value(&walker)?, -12);
        Ok(())
    }

    #[test]
    fn context_field_layout() {
        let field = ContextField::new(true, 3, 9);
        assert_eq!((field.start_byte(), field.end_byte()), (0, 1));
        assert_eq!(field.shift(), 6);
    }

    #[test]
    fn context_values_extend_from_top_bit() -> Result<(), Error> {
        use crate::address::AddressValue;
        use crate::disassembly::symbol::SymbolTable;
        use crate::disassembly::walker::ParserContext;
        use crate::space::SpaceKind;
        use crate::space_manager::SpaceManager;

        let mut manager = SpaceManager::new();
        let ram = manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);
        let mut ctx = ParserContext::new(AddressValue::new(ram, 0), manager.constant_space().clone(), 1);
        ctx.load_context(&[0xaff0_0000]);

        let symbols = SymbolTable::new();
        let walker = ParserWalker::new(&ctx, &symbols);

        let nibble = |signed| PatternExpression::ContextField(ContextField::new(signed, 0, 3));
        assert_eq!(nibble(true).value(&walker)?, -6);
        assert_eq!(nibble(false).value(&walker)?, 0xa);

        let spanning = |signed| PatternExpression::ContextField(ContextField::new(signed, 4, 11));
        assert_eq!(spanning(true).value(&walker)?, -1);
        assert_eq!(spanning(false).value(&walker)?, 0xff);
        Ok(())
    }

    #[test]
    fn field_ranges_and_impossible_constants() -> Result<(), Error> {
        let token = Arc::new(Token::new("instr", 1, true, 0));
        let field = PatternExpression::TokenField(TokenField::new(token, true, 0, 2));
        assert_eq!(field.min_value()?, 0);
        assert_eq!(field.max_value()?, 7);

        let seven = PatternExpression::Constant(7);
        assert!(seven.gen_pattern(7)?.always_true());
        assert!(seven.gen_pattern(3)?.always_false());
        Ok(())
    }

    #[test]
    fn substitution_follows_leaf_order() -> Result<(), Error> {
        let expr = PatternExpression::binary(
            BinaryOp::Sub,
            Arc::new(PatternExpression::Constant(10)),
            PatternExpression::unary(UnaryOp::Minus, Arc::new(PatternExpression::Constant(3))),
        );
        let mut values = Vec::new();
        expr.list_values(&mut values);
        assert_eq!(values.len(), 2);

        let mut position = 0;
        assert_eq!(expr.sub_value(&[5, 2], &mut position)?, 7);
        assert_eq!(position, 2);
        Ok(())
    }

    #[test]
    fn remapping_shares_untouched_subtrees() {
        let ct = ConstructorRef::new(4, 0);
        let other = ConstructorRef::new(5, 0);
        let lhs = Arc::new(PatternExpression::Operand(OperandValue::new(0, ct)));
        let rhs = Arc::new(PatternExpression::Operand(OperandValue::new(0, other)));
        let expr = PatternExpression::binary(BinaryOp::Plus, lhs, rhs.clone());

        let remapped = expr.remap_operands(ct, &[1, 0]);
        match remapped.as_ref() {
            PatternExpression::Binary(_, l, r) => {
                assert_eq!(**l, PatternExpression::Operand(OperandValue::new(1, ct)));
                assert!(Arc::ptr_eq(r, &rhs));
            }
            _ => panic!("expected binary expression"),
        }

        let unchanged = expr.remap_operands(ct, &[0, 1]);
        assert!(Arc::ptr_eq(&unchanged, &expr));
    }

    #[test]
    fn xml_round_trip() -> Result<(), DeserialiseError> {
        let expr = PatternExpression::binary(
            BinaryOp::LeftShift,
            Arc::new(PatternExpression::ContextField(ContextField::new(false, 0, 3))),
            Arc::new(PatternExpression::Constant(-2)),
        );

        let mut out = XmlWriter::new();
        expr.to_xml(&mut out);
        let text = out.finish();

        let doc = xml::Document::parse(&text)?;
        let back = PatternExpression::from_xml(doc.root_element())?;
        assert_eq!(back, expr);
        Ok(())
    }
}
