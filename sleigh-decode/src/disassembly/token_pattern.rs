use std::sync::Arc;

use ustr::Ustr;

use crate::disassembly::pattern::{DisjointPattern, Pattern};
use crate::disassembly::pattern_block::PatternBlock;
use crate::disassembly::Error;

/// A named, fixed-size unit of the instruction stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct Token {
    name: Ustr,
    size: usize,
    big_endian: bool,
    index: usize,
}

impl Token {
    pub fn new<S: AsRef<str>>(name: S, size: usize, big_endian: bool, index: usize) -> Self {
        Self {
            name: Ustr::from(name.as_ref()),
            size,
            big_endian,
            index,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_big_endian(&self) -> bool {
        self.big_endian
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// A pattern together with the sequence of tokens it spans.
///
/// Ellipses mark patterns whose token sequence may extend to the left or
/// right of the tokens listed.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPattern {
    pattern: Pattern,
    tokens: Vec<Arc<Token>>,
    left_ellipsis: bool,
    right_ellipsis: bool,
}

impl Default for TokenPattern {
    fn default() -> Self {
        Self::new()
    }
}

fn build_single(mut start_bit: usize, end_bit: usize, value: u32) -> PatternBlock {
    let size = end_bit - start_bit + 1;
    let offset = start_bit / 8;
    start_bit %= 8;

    let mask = (!0u32).checked_shl(32 - size as u32).unwrap_or(0);
    let value = value.checked_shl(32 - size as u32).unwrap_or(0) & mask;

    PatternBlock::from_word(offset, mask >> start_bit, value >> start_bit)
}

/// Field `[bit_start, bit_end]` of a `size` byte big-endian word, numbered
/// from the least significant bit.
fn build_big_block(size: usize, bit_start: usize, bit_end: usize, mut value: i64) -> PatternBlock {
    let start_bit = 8 * size - 1 - bit_end;
    let mut end_bit = 8 * size - 1 - bit_start;

    let mut block: Option<PatternBlock> = None;
    loop {
        let tmp_start = (end_bit - (end_bit & 7)).max(start_bit);
        let chunk = build_single(tmp_start, end_bit, value as u32);
        block = Some(match block {
            None => chunk,
            Some(block) => block.intersect(&chunk),
        });
        value >>= end_bit - tmp_start + 1;
        if tmp_start <= start_bit {
            break;
        }
        end_bit = tmp_start - 1;
    }
    block.unwrap_or_else(|| PatternBlock::new(true))
}

/// As [`build_big_block`], for a little-endian word: bit `i` lives in byte
/// `i / 8` of the stream.
fn build_little_block(bit_start: usize, bit_end: usize, value: i64) -> PatternBlock {
    let mut block = PatternBlock::new(true);
    let mut lo = bit_start;
    while lo <= bit_end {
        let byte = lo / 8;
        let hi = bit_end.min(8 * byte + 7);
        let chunk_value = (value >> (lo - bit_start)) as u32;
        let chunk = build_single(
            8 * byte + 7 - (hi % 8),
            8 * byte + 7 - (lo % 8),
            chunk_value,
        );
        block = block.intersect(&chunk);
        lo = hi + 1;
    }
    block
}

impl TokenPattern {
    pub fn new() -> Self {
        Self::from_bool(true)
    }

    pub fn from_bool(always: bool) -> Self {
        Self {
            pattern: Pattern::new(always),
            tokens: Vec::new(),
            left_ellipsis: false,
            right_ellipsis: false,
        }
    }

    pub fn from_token(token: Arc<Token>) -> Self {
        Self {
            tokens: vec![token],
            ..Self::new()
        }
    }

    /// Bits `[bit_start, bit_end]` of `token` fixed to `value`.
    pub fn from_field(token: Arc<Token>, value: i64, bit_start: usize, bit_end: usize) -> Self {
        let block = if token.is_big_endian() {
            build_big_block(token.size(), bit_start, bit_end, value)
        } else {
            build_little_block(bit_start, bit_end, value)
        };
        Self {
            pattern: Pattern::Disjoint(DisjointPattern::Instruction(block)),
            tokens: vec![token],
            left_ellipsis: false,
            right_ellipsis: false,
        }
    }

    /// Context bits `[start_bit, end_bit]`, numbered from the most
    /// significant bit of the context vector, fixed to `value`.
    pub fn from_context(value: i64, start_bit: usize, end_bit: usize) -> Self {
        let size = end_bit / 8 + 1;
        let block = build_big_block(size, size * 8 - 1 - end_bit, size * 8 - 1 - start_bit, value);
        Self {
            pattern: Pattern::Disjoint(DisjointPattern::Context(block)),
            tokens: Vec::new(),
            left_ellipsis: false,
            right_ellipsis: false,
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn tokens(&self) -> &[Arc<Token>] {
        &self.tokens
    }

    pub fn left_ellipsis(&self) -> bool {
        self.left_ellipsis
    }

    pub fn right_ellipsis(&self) -> bool {
        self.right_ellipsis
    }

    pub fn set_left_ellipsis(&mut self, value: bool) {
        self.left_ellipsis = value;
    }

    pub fn set_right_ellipsis(&mut self, value: bool) {
        self.right_ellipsis = value;
    }

    pub fn always_true(&self) -> bool {
        self.pattern.always_true()
    }

    pub fn always_false(&self) -> bool {
        self.pattern.always_false()
    }

    pub fn always_instruction_true(&self) -> bool {
        self.pattern.always_instruction_true()
    }

    pub fn simplify(&mut self) {
        self.pattern = self.pattern.simplify();
    }

    pub fn minimum_length(&self) -> usize {
        self.tokens.iter().map(|t| t.size()).sum()
    }

    fn is_free(&self) -> bool {
        self.tokens.is_empty() && !self.left_ellipsis && !self.right_ellipsis
    }

    fn size_mismatch(found: usize, expected: usize) -> Error {
        Error::specification(format!(
            "Mismatched pattern sizes -- {} != {}",
            found, expected
        ))
    }

    /// Aligns the token sequences of `tok1` and `tok2`; returns the byte
    /// displacement to apply to `tok2`'s pattern along with the combined
    /// token list and ellipses.
    fn resolve_tokens(tok1: &Self, tok2: &Self) -> Result<(isize, Self), Error> {
        let len1 = tok1.tokens.len();
        let len2 = tok2.tokens.len();
        let min_size = len1.min(len2);

        let mut res = Self::new();

        if min_size == 0 {
            if tok1.is_free() {
                res.tokens = tok2.tokens.clone();
                res.left_ellipsis = tok2.left_ellipsis;
                res.right_ellipsis = tok2.right_ellipsis;
                return Ok((0, res));
            } else if tok2.is_free() {
                res.tokens = tok1.tokens.clone();
                res.left_ellipsis = tok1.left_ellipsis;
                res.right_ellipsis = tok1.right_ellipsis;
                return Ok((0, res));
            }
        }

        let mut reverse = false;

        if tok1.left_ellipsis {
            reverse = true;
            if tok2.right_ellipsis {
                return Err(Error::specification("Right/left ellipsis"));
            } else if tok2.left_ellipsis {
                res.left_ellipsis = true;
            } else if len1 != min_size {
                return Err(Self::size_mismatch(len1, min_size));
            } else if len1 == len2 {
                return Err(Error::specification(
                    "Pattern size cannot vary (missing '...'?)",
                ));
            }
        } else if tok1.right_ellipsis {
            if tok2.left_ellipsis {
                return Err(Error::specification("Left/right ellipsis"));
            } else if tok2.right_ellipsis {
                res.right_ellipsis = true;
            } else if len1 != min_size {
                return Err(Self::size_mismatch(len1, min_size));
            } else if len1 == len2 {
                return Err(Error::specification(
                    "Pattern size cannot vary (missing '...'?)",
                ));
            }
        } else if tok2.left_ellipsis || tok2.right_ellipsis {
            reverse = tok2.left_ellipsis;
            if len2 != min_size {
                return Err(Self::size_mismatch(len2, min_size));
            } else if len1 == len2 {
                return Err(Error::specification(
                    "Pattern size cannot vary (missing '...'?)",
                ));
            }
        } else if len1 != len2 {
            return Err(Self::size_mismatch(len2, len1));
        }

        let mut shift = 0isize;
        if reverse {
            for i in 0..min_size {
                let t1 = &tok1.tokens[len1 - 1 - i];
                let t2 = &tok2.tokens[len2 - 1 - i];
                if t1 != t2 {
                    return Err(Error::specification(format!(
                        "Mismatched tokens when combining patterns -- {} != {}",
                        t1.name(),
                        t2.name()
                    )));
                }
            }
            let longer = if len1 <= len2 { &tok2.tokens } else { &tok1.tokens };
            shift = longer[..longer.len() - min_size]
                .iter()
                .map(|t| t.size() as isize)
                .sum();
            if len1 < len2 {
                shift = -shift;
            }
        } else {
            for (t1, t2) in tok1.tokens.iter().zip(tok2.tokens.iter()) {
                if t1 != t2 {
                    return Err(Error::specification(format!(
                        "Mismatched tokens when combining patterns -- {} != {}",
                        t1.name(),
                        t2.name()
                    )));
                }
            }
        }

        res.tokens = if len1 <= len2 {
            tok2.tokens.clone()
        } else {
            tok1.tokens.clone()
        };
        Ok((shift, res))
    }

    pub fn and(&self, other: &Self) -> Result<Self, Error> {
        let (shift, mut res) = Self::resolve_tokens(self, other)?;
        res.pattern = self.pattern.and(&other.pattern, shift);
        Ok(res)
    }

    pub fn or(&self, other: &Self) -> Result<Self, Error> {
        let (shift, mut res) = Self::resolve_tokens(self, other)?;
        res.pattern = self.pattern.or(&other.pattern, shift);
        Ok(res)
    }

    /// Sequential concatenation: `other` follows the tokens of `self`.
    pub fn cat(&self, other: &Self) -> Result<Self, Error> {
        let mut res = Self {
            pattern: Pattern::new(true),
            tokens: self.tokens.clone(),
            left_ellipsis: self.left_ellipsis,
            right_ellipsis: self.right_ellipsis,
        };

        let shift = if self.right_ellipsis || other.left_ellipsis {
            if self.right_ellipsis && !other.always_instruction_true() {
                return Err(Error::specification("Interior ellipsis in pattern"));
            }
            if other.left_ellipsis {
                if !self.always_instruction_true() {
                    return Err(Error::specification("Interior ellipsis in pattern"));
                }
                res.left_ellipsis = true;
            }
            0
        } else {
            let shift = self.minimum_length() as isize;
            res.tokens.extend(other.tokens.iter().cloned());
            res.right_ellipsis = other.right_ellipsis;
            shift
        };

        if res.left_ellipsis && res.right_ellipsis {
            return Err(Error::specification("Double ellipsis in pattern"));
        }

        res.pattern = self.pattern.and(&other.pattern, shift);
        Ok(res)
    }

    /// Pattern matched by anything matching either `self` or `other`.
    pub fn common_sub_pattern(&self, other: &Self) -> Result<Self, Error> {
        let reverse = if self.left_ellipsis || other.left_ellipsis {
            if self.right_ellipsis || other.right_ellipsis {
                return Err(Error::specification(
                    "Right/left ellipsis in commonSubPattern",
                ));
            }
            true
        } else {
            false
        };

        let mut res = Self {
            pattern: self.pattern.common_sub_pattern(&other.pattern, 0),
            tokens: Vec::new(),
            left_ellipsis: self.left_ellipsis || other.left_ellipsis,
            right_ellipsis: self.right_ellipsis || other.right_ellipsis,
        };

        let min_num = self.tokens.len().min(other.tokens.len());
        let max_num = self.tokens.len().max(other.tokens.len());

        let common = if reverse {
            self.tokens
                .iter()
                .rev()
                .zip(other.tokens.iter().rev())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.tokens
                .iter()
                .zip(other.tokens.iter())
                .take_while(|(a, b)| a == b)
                .count()
        };
        debug_assert!(common <= min_num);

        if reverse {
            res.tokens = self.tokens[self.tokens.len() - common..].to_vec();
            if common < max_num {
                res.left_ellipsis = true;
            }
        } else {
            res.tokens = self.tokens[..common].to_vec();
            if common < max_num {
                res.right_ellipsis = true;
            }
        }

        Ok(res)
    }
}
