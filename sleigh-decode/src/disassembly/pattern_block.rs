use std::mem::size_of;

use crate::bits::leading_byte_span;
use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::walker::ParserWalker;
use crate::disassembly::Error;

const WORD_BYTES: usize = size_of::<u32>();
const WORD_BITS: isize = 8 * WORD_BYTES as isize;

/// A mask/value constraint over a byte window of either the instruction
/// stream or the context vector.
///
/// `non_zero_size` is `Some(0)` for a block that matches everything and
/// `None` for one that matches nothing; otherwise it counts the bytes from
/// `offset` up to and including the last constrained byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct PatternBlock {
    offset: usize,
    non_zero_size: Option<usize>,
    masks: Vec<u32>,
    values: Vec<u32>,
}

impl PatternBlock {
    const ALWAYS_TRUE: Option<usize> = Some(0);
    const ALWAYS_FALSE: Option<usize> = None;

    pub fn new(always: bool) -> Self {
        Self {
            offset: 0,
            non_zero_size: if always {
                Self::ALWAYS_TRUE
            } else {
                Self::ALWAYS_FALSE
            },
            masks: Vec::new(),
            values: Vec::new(),
        }
    }

    /// A constraint confined to the single word at byte `offset`.
    pub fn from_word(offset: usize, mask: u32, value: u32) -> Self {
        let mut block = Self {
            offset,
            non_zero_size: Some(WORD_BYTES),
            masks: vec![mask],
            values: vec![value],
        };
        block.normalise();
        block
    }

    pub fn always_true(&self) -> bool {
        self.non_zero_size == Self::ALWAYS_TRUE
    }

    pub fn always_false(&self) -> bool {
        self.non_zero_size == Self::ALWAYS_FALSE
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.offset + self.non_zero_size.unwrap_or(0)
    }

    fn bits(words: &[u32], offset: usize, start_bit: isize, size: usize) -> u32 {
        let start_bit = start_bit - 8 * offset as isize;
        let word1 = start_bit.div_euclid(WORD_BITS);
        let shift = start_bit.rem_euclid(WORD_BITS) as u32;
        let word2 = (start_bit + size as isize - 1).div_euclid(WORD_BITS);

        let fetch = |index: isize| -> u32 {
            if index < 0 {
                0
            } else {
                words.get(index as usize).copied().unwrap_or(0)
            }
        };

        let mut res = fetch(word1).checked_shl(shift).unwrap_or(0);
        if word1 != word2 {
            res |= fetch(word2)
                .checked_shr(WORD_BITS as u32 - shift)
                .unwrap_or(0);
        }
        res.checked_shr(WORD_BITS as u32 - size as u32).unwrap_or(0)
    }

    /// Mask bits `[start_bit, start_bit + size)` counted from the most
    /// significant bit of byte 0, right-justified.
    pub fn mask(&self, start_bit: usize, size: usize) -> u32 {
        Self::bits(&self.masks, self.offset, start_bit as isize, size)
    }

    pub fn value(&self, start_bit: usize, size: usize) -> u32 {
        Self::bits(&self.values, self.offset, start_bit as isize, size)
    }

    pub fn intersect(&self, other: &Self) -> Self {
        if self.always_false() || other.always_false() {
            return Self::new(false);
        }

        let max_length = self.length().max(other.length());
        let mut res = Self::new(true);

        for offset in (0..max_length).step_by(WORD_BYTES) {
            let start = offset * 8;
            let mask1 = self.mask(start, 32);
            let value1 = self.value(start, 32);
            let mask2 = other.mask(start, 32);
            let value2 = other.value(start, 32);

            let common = mask1 & mask2;
            if (common & value1) != (common & value2) {
                return Self::new(false);
            }

            res.masks.push(mask1 | mask2);
            res.values.push((mask1 & value1) | (mask2 & value2));
        }

        res.non_zero_size = Some(max_length);
        res.normalise();
        res
    }

    /// Bits constrained by both blocks on which they agree.
    pub fn common_sub_pattern(&self, other: &Self) -> Self {
        if self.always_false() && other.always_false() {
            return Self::new(false);
        }

        let max_length = self.length().max(other.length());
        let mut res = Self::new(true);

        for offset in (0..max_length).step_by(WORD_BYTES) {
            let start = offset * 8;
            let mask1 = self.mask(start, 32);
            let value1 = self.value(start, 32);
            let mask2 = other.mask(start, 32);
            let value2 = other.value(start, 32);

            let mask = mask1 & mask2 & !(value1 ^ value2);
            res.masks.push(mask);
            res.values.push(value1 & value2 & mask);
        }

        res.non_zero_size = Some(max_length);
        res.normalise();
        res
    }

    /// Every bit `other` constrains, `self` constrains to the same value.
    pub fn specializes(&self, other: &Self) -> bool {
        let length = 8 * other.length();
        let mut sbit = 0;
        while sbit < length {
            let size = (length - sbit).min(32);
            let mask1 = self.mask(sbit, size);
            let value1 = self.value(sbit, size);
            let mask2 = other.mask(sbit, size);
            let value2 = other.value(sbit, size);
            if (mask1 & mask2) != mask2 || (value1 & mask2) != (value2 & mask2) {
                return false;
            }
            sbit += size;
        }
        true
    }

    pub fn identical(&self, other: &Self) -> bool {
        let length = 8 * self.length().max(other.length());
        let mut sbit = 0;
        while sbit < length {
            let size = (length - sbit).min(32);
            let mask1 = self.mask(sbit, size);
            let value1 = self.value(sbit, size);
            let mask2 = other.mask(sbit, size);
            let value2 = other.value(sbit, size);
            if mask1 != mask2 || (mask1 & value1) != (mask2 & value2) {
                return false;
            }
            sbit += size;
        }
        true
    }

    pub fn shift(&mut self, shift: isize) {
        let noffset = self.offset as isize + shift;
        self.offset = if noffset < 0 { 0 } else { noffset as usize };
        self.normalise()
    }

    pub fn normalise(&mut self) {
        if matches!(self.non_zero_size, Self::ALWAYS_TRUE | Self::ALWAYS_FALSE) {
            self.offset = 0;
            self.masks.clear();
            self.values.clear();
            return;
        }

        let lead = self
            .masks
            .iter()
            .position(|m| *m != 0)
            .unwrap_or(self.masks.len());
        self.offset += lead * WORD_BYTES;
        self.masks.drain(..lead);
        self.values.drain(..lead.min(self.values.len()));
        self.values.resize(self.masks.len(), 0);

        if let Some(first) = self.masks.first().copied() {
            let suboff = WORD_BYTES - leading_byte_span(first);
            if suboff != 0 {
                self.offset += suboff;
                let (hi, lo) = ((suboff * 8) as u32, ((WORD_BYTES - suboff) * 8) as u32);
                for words in [&mut self.masks, &mut self.values] {
                    for i in 0..words.len() - 1 {
                        words[i] = (words[i] << hi) | (words[i + 1] >> lo);
                    }
                    if let Some(last) = words.last_mut() {
                        *last <<= hi;
                    }
                }
            }

            let keep = self
                .masks
                .iter()
                .rposition(|m| *m != 0)
                .map(|i| i + 1)
                .unwrap_or(0);
            self.masks.truncate(keep);
            self.values.truncate(keep);
        }

        match self.masks.last().copied() {
            None => {
                self.offset = 0;
                self.non_zero_size = Self::ALWAYS_TRUE;
            }
            Some(mut last) => {
                let mut size = self.masks.len() * WORD_BYTES;
                while last & 0xff == 0 {
                    size -= 1;
                    last >>= 8;
                }
                self.non_zero_size = Some(size);
            }
        }
    }

    pub fn is_instruction_match(&self, walker: &ParserWalker) -> Result<bool, Error> {
        match self.non_zero_size {
            Self::ALWAYS_FALSE => Ok(false),
            Self::ALWAYS_TRUE => Ok(true),
            _ => {
                let mut offset = self.offset;
                for (mask, value) in self.masks.iter().zip(self.values.iter()) {
                    let data = walker.instruction_bytes(offset, WORD_BYTES)?;
                    if mask & data != *value {
                        return Ok(false);
                    }
                    offset += WORD_BYTES;
                }
                Ok(true)
            }
        }
    }

    pub fn is_context_match(&self, walker: &ParserWalker) -> bool {
        match self.non_zero_size {
            Self::ALWAYS_FALSE => false,
            Self::ALWAYS_TRUE => true,
            _ => {
                let mut offset = self.offset;
                for (mask, value) in self.masks.iter().zip(self.values.iter()) {
                    let data = walker.context_bytes(offset, WORD_BYTES);
                    if mask & data != *value {
                        return false;
                    }
                    offset += WORD_BYTES;
                }
                true
            }
        }
    }

    pub fn from_xml(input: xml::Node) -> Result<Self, DeserialiseError> {
        input.expect_tag("pat_block")?;

        let mut masks = Vec::new();
        let mut values = Vec::new();

        for input in input.children().filter(xml::Node::is_element) {
            masks.push(input.attribute_int("mask")?);
            values.push(input.attribute_int("val")?);
        }

        let non_zero = input.attribute_int::<isize>("nonzero")?;
        let mut block = Self {
            offset: input.attribute_int("offset")?,
            non_zero_size: if non_zero < 0 {
                Self::ALWAYS_FALSE
            } else {
                Some(non_zero as usize)
            },
            masks,
            values,
        };
        block.normalise();
        Ok(block)
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("pat_block")
            .attr("offset", self.offset)
            .attr("nonzero", self.non_zero_size.map(|v| v as isize).unwrap_or(-1));
        for (mask, value) in self.masks.iter().zip(self.values.iter()) {
            out.start("mask_word")
                .attr_hex("mask", *mask as u64)
                .attr_hex("val", *value as u64)
                .end();
        }
        out.end();
    }
}
