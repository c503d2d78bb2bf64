use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::pattern_block::PatternBlock;
use crate::disassembly::walker::ParserWalker;
use crate::disassembly::Error;

/// A conjunction of at most one instruction block and one context block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum DisjointPattern {
    Instruction(PatternBlock),
    Context(PatternBlock),
    Combine {
        context: PatternBlock,
        instruction: PatternBlock,
    },
}

/// Constraints over instruction and context bits, closed under AND/OR.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum Pattern {
    Disjoint(DisjointPattern),
    Or(Vec<DisjointPattern>),
}

impl DisjointPattern {
    pub fn block(&self, context: bool) -> Option<&PatternBlock> {
        match (self, context) {
            (Self::Instruction(block), false) | (Self::Context(block), true) => Some(block),
            (Self::Combine { instruction, .. }, false) => Some(instruction),
            (Self::Combine { context, .. }, true) => Some(context),
            _ => None,
        }
    }

    pub fn mask(&self, start_bit: usize, size: usize, context: bool) -> u32 {
        self.block(context)
            .map(|b| b.mask(start_bit, size))
            .unwrap_or(0)
    }

    pub fn value(&self, start_bit: usize, size: usize, context: bool) -> u32 {
        self.block(context)
            .map(|b| b.value(start_bit, size))
            .unwrap_or(0)
    }

    pub fn length(&self, context: bool) -> usize {
        self.block(context).map(PatternBlock::length).unwrap_or(0)
    }

    pub fn always_true(&self) -> bool {
        match self {
            Self::Instruction(b) | Self::Context(b) => b.always_true(),
            Self::Combine {
                context,
                instruction,
            } => context.always_true() && instruction.always_true(),
        }
    }

    pub fn always_false(&self) -> bool {
        match self {
            Self::Instruction(b) | Self::Context(b) => b.always_false(),
            Self::Combine {
                context,
                instruction,
            } => context.always_false() || instruction.always_false(),
        }
    }

    pub fn always_instruction_true(&self) -> bool {
        match self {
            Self::Instruction(b) => b.always_true(),
            Self::Context(_) => true,
            Self::Combine { instruction, .. } => instruction.always_true(),
        }
    }

    pub fn shift_instruction(&mut self, shift: isize) {
        match self {
            Self::Instruction(b) => b.shift(shift),
            Self::Context(_) => (),
            Self::Combine { instruction, .. } => instruction.shift(shift),
        }
    }

    pub fn simplify(&self) -> DisjointPattern {
        match self {
            Self::Combine {
                context,
                instruction,
            } => {
                if context.always_true() {
                    Self::Instruction(instruction.clone())
                } else if instruction.always_true() {
                    Self::Context(context.clone())
                } else if context.always_false() || instruction.always_false() {
                    Self::Instruction(PatternBlock::new(false))
                } else {
                    self.clone()
                }
            }
            _ => self.clone(),
        }
    }

    /// Wherever `other` constrains a bit, `self` constrains it identically.
    pub fn specializes(&self, other: &DisjointPattern) -> bool {
        [false, true].iter().all(|&context| {
            match (self.block(context), other.block(context)) {
                (_, None) => true,
                (_, Some(b)) if b.always_true() => true,
                (None, Some(_)) => false,
                (Some(a), Some(b)) => a.specializes(b),
            }
        })
    }

    pub fn identical(&self, other: &DisjointPattern) -> bool {
        [false, true].iter().all(|&context| {
            match (self.block(context), other.block(context)) {
                (None, None) => true,
                (None, Some(b)) => b.always_true(),
                (Some(a), None) => a.always_true(),
                (Some(a), Some(b)) => a.identical(b),
            }
        })
    }

    /// `self` is exactly the intersection of `op1` and `op2`.
    pub fn resolves_intersect(&self, op1: &DisjointPattern, op2: &DisjointPattern) -> bool {
        [false, true].iter().all(|&context| {
            let inter = match (op1.block(context), op2.block(context)) {
                (None, None) => None,
                (Some(b), None) | (None, Some(b)) => Some(b.clone()),
                (Some(b1), Some(b2)) => Some(b1.intersect(b2)),
            };
            match (inter, self.block(context)) {
                (None, this) => this.is_none(),
                (Some(_), None) => false,
                (Some(inter), Some(this)) => this.identical(&inter),
            }
        })
    }

    pub fn is_match(&self, walker: &ParserWalker) -> Result<bool, Error> {
        Ok(match self {
            Self::Instruction(b) => b.is_instruction_match(walker)?,
            Self::Context(b) => b.is_context_match(walker),
            Self::Combine {
                context,
                instruction,
            } => context.is_context_match(walker) && instruction.is_instruction_match(walker)?,
        })
    }

    pub fn from_xml(input: xml::Node) -> Result<Self, DeserialiseError> {
        let mut children = input.children().filter(xml::Node::is_element);
        let mut block = |what: &'static str| {
            children
                .next()
                .ok_or(DeserialiseError::Invariant(what))
                .and_then(PatternBlock::from_xml)
        };

        Ok(match input.tag_name().name() {
            "instruct_pat" => Self::Instruction(block("missing instruction block")?),
            "context_pat" => Self::Context(block("missing context block")?),
            "combine_pat" => {
                let mut children = input.children().filter(xml::Node::is_element);
                let context = children
                    .next()
                    .ok_or(DeserialiseError::Invariant("missing context pattern"))?;
                let instruction = children
                    .next()
                    .ok_or(DeserialiseError::Invariant("missing instruction pattern"))?;
                match (Self::from_xml(context)?, Self::from_xml(instruction)?) {
                    (Self::Context(context), Self::Instruction(instruction)) => Self::Combine {
                        context,
                        instruction,
                    },
                    _ => return Err(DeserialiseError::Invariant("malformed combined pattern")),
                }
            }
            tag => return Err(DeserialiseError::TagUnexpected(tag.to_owned())),
        })
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        match self {
            Self::Instruction(b) => {
                out.start("instruct_pat");
                b.to_xml(out);
                out.end();
            }
            Self::Context(b) => {
                out.start("context_pat");
                b.to_xml(out);
                out.end();
            }
            Self::Combine {
                context,
                instruction,
            } => {
                out.start("combine_pat");
                Self::Context(context.clone()).to_xml(out);
                Self::Instruction(instruction.clone()).to_xml(out);
                out.end();
            }
        }
    }
}

fn shifted(mut pattern: DisjointPattern, shift: isize) -> DisjointPattern {
    pattern.shift_instruction(shift);
    pattern
}

fn shifted_block(block: &PatternBlock, shift: isize) -> PatternBlock {
    let mut block = block.clone();
    block.shift(shift);
    block
}

fn and_blocks(a: &PatternBlock, b: &PatternBlock, sa: isize) -> PatternBlock {
    if sa < 0 {
        shifted_block(a, -sa).intersect(b)
    } else {
        a.intersect(&shifted_block(b, sa))
    }
}

fn common_blocks(a: &PatternBlock, b: &PatternBlock, sa: isize) -> PatternBlock {
    if sa < 0 {
        shifted_block(a, -sa).common_sub_pattern(b)
    } else {
        a.common_sub_pattern(&shifted_block(b, sa))
    }
}

impl DisjointPattern {
    fn and(&self, other: &DisjointPattern, sa: isize) -> DisjointPattern {
        use DisjointPattern::*;

        match (self, other) {
            (Instruction(a), Instruction(b)) => Instruction(and_blocks(a, b, sa)),
            (Instruction(a), Context(b)) => Combine {
                context: b.clone(),
                instruction: if sa < 0 { shifted_block(a, -sa) } else { a.clone() },
            },
            (Instruction(_), Combine { .. })
            | (Context(_), Instruction(_))
            | (Context(_), Combine { .. }) => other.and(self, -sa),
            (Context(a), Context(b)) => Context(a.intersect(b)),
            (
                Combine {
                    context: c1,
                    instruction: i1,
                },
                Combine {
                    context: c2,
                    instruction: i2,
                },
            ) => Combine {
                context: c1.intersect(c2),
                instruction: and_blocks(i1, i2, sa),
            },
            (
                Combine {
                    context,
                    instruction,
                },
                Instruction(b),
            ) => Combine {
                context: context.clone(),
                instruction: and_blocks(instruction, b, sa),
            },
            (
                Combine {
                    context,
                    instruction,
                },
                Context(b),
            ) => Combine {
                context: context.intersect(b),
                instruction: if sa < 0 {
                    shifted_block(instruction, -sa)
                } else {
                    instruction.clone()
                },
            },
        }
    }

    fn common(&self, other: &DisjointPattern, sa: isize) -> DisjointPattern {
        use DisjointPattern::*;

        match (self, other) {
            (Instruction(a), Instruction(b)) => Instruction(common_blocks(a, b, sa)),
            (Instruction(_), Context(_)) | (Context(_), Instruction(_)) => {
                Instruction(PatternBlock::new(true))
            }
            (Instruction(_), Combine { .. }) | (Context(_), Combine { .. }) => {
                other.common(self, -sa)
            }
            (Context(a), Context(b)) => Context(a.common_sub_pattern(b)),
            (
                Combine {
                    context: c1,
                    instruction: i1,
                },
                Combine {
                    context: c2,
                    instruction: i2,
                },
            ) => Combine {
                context: c1.common_sub_pattern(c2),
                instruction: common_blocks(i1, i2, sa),
            },
            (Combine { instruction, .. }, Instruction(b)) => {
                Instruction(common_blocks(instruction, b, sa))
            }
            (Combine { context, .. }, Context(b)) => Context(context.common_sub_pattern(b)),
        }
    }
}

impl Pattern {
    pub fn new(always: bool) -> Self {
        Self::Disjoint(DisjointPattern::Instruction(PatternBlock::new(always)))
    }

    pub fn disjoint(&self) -> &[DisjointPattern] {
        match self {
            Self::Disjoint(d) => std::slice::from_ref(d),
            Self::Or(list) => list,
        }
    }

    pub fn num_disjoint(&self) -> usize {
        match self {
            Self::Disjoint(_) => 0,
            Self::Or(list) => list.len(),
        }
    }

    pub fn always_true(&self) -> bool {
        match self {
            Self::Disjoint(d) => d.always_true(),
            Self::Or(list) => list.iter().any(DisjointPattern::always_true),
        }
    }

    pub fn always_false(&self) -> bool {
        match self {
            Self::Disjoint(d) => d.always_false(),
            Self::Or(list) => list.iter().all(DisjointPattern::always_false),
        }
    }

    pub fn always_instruction_true(&self) -> bool {
        match self {
            Self::Disjoint(d) => d.always_instruction_true(),
            Self::Or(list) => list.iter().all(DisjointPattern::always_instruction_true),
        }
    }

    /// Shifts only instruction constraints; context offsets are absolute.
    pub fn shift_instruction(&mut self, shift: isize) {
        match self {
            Self::Disjoint(d) => d.shift_instruction(shift),
            Self::Or(list) => list.iter_mut().for_each(|d| d.shift_instruction(shift)),
        }
    }

    pub fn simplify(&self) -> Pattern {
        match self {
            Self::Disjoint(d) => Self::Disjoint(d.simplify()),
            Self::Or(list) => {
                if list.iter().any(DisjointPattern::always_true) {
                    return Self::new(true);
                }
                let mut list = list
                    .iter()
                    .filter(|d| !d.always_false())
                    .map(DisjointPattern::simplify)
                    .collect::<Vec<_>>();
                match list.len() {
                    0 => Self::new(false),
                    1 => Self::Disjoint(list.remove(0)),
                    _ => Self::Or(list),
                }
            }
        }
    }

    /// Conjunction with `other` displaced by `sa` bytes.
    pub fn and(&self, other: &Pattern, sa: isize) -> Pattern {
        match (self, other) {
            (Self::Disjoint(a), Self::Disjoint(b)) => Self::Disjoint(a.and(b, sa)),
            (Self::Disjoint(_), Self::Or(_)) => other.and(self, -sa),
            (Self::Or(list), Self::Disjoint(b)) => {
                Self::Or(list.iter().map(|a| a.and(b, sa)).collect())
            }
            (Self::Or(list1), Self::Or(list2)) => Self::Or(
                list1
                    .iter()
                    .flat_map(|a| list2.iter().map(move |b| a.and(b, sa)))
                    .collect(),
            ),
        }
    }

    pub fn or(&self, other: &Pattern, sa: isize) -> Pattern {
        match (self, other) {
            (Self::Disjoint(DisjointPattern::Context(a)), Self::Disjoint(DisjointPattern::Context(b))) => {
                Self::Or(vec![
                    DisjointPattern::Context(a.clone()),
                    DisjointPattern::Context(b.clone()),
                ])
            }
            (Self::Disjoint(DisjointPattern::Context(_)), _) => other.or(self, -sa),
            (Self::Disjoint(DisjointPattern::Instruction(_)), Self::Disjoint(DisjointPattern::Combine { .. })) => {
                other.or(self, -sa)
            }
            (Self::Disjoint(_), Self::Or(_)) => other.or(self, -sa),
            (Self::Disjoint(a), Self::Disjoint(b)) => {
                let (a, b) = if sa < 0 {
                    (shifted(a.simplify(), -sa), b.simplify())
                } else {
                    (a.simplify(), shifted(b.simplify(), sa))
                };
                Self::Or(vec![a, b])
            }
            (Self::Or(list), _) => {
                let mut res = list
                    .iter()
                    .map(|d| {
                        let d = d.simplify();
                        if sa < 0 {
                            shifted(d, -sa)
                        } else {
                            d
                        }
                    })
                    .collect::<Vec<_>>();
                res.extend(other.disjoint().iter().map(|d| {
                    let d = d.simplify();
                    if sa > 0 {
                        shifted(d, sa)
                    } else {
                        d
                    }
                }));
                Self::Or(res)
            }
        }
    }

    pub fn common_sub_pattern(&self, other: &Pattern, sa: isize) -> Pattern {
        match (self, other) {
            (Self::Disjoint(a), Self::Disjoint(b)) => Self::Disjoint(a.common(b, sa)),
            (Self::Disjoint(_), Self::Or(_)) => other.common_sub_pattern(self, -sa),
            (Self::Or(list), _) => {
                let mut iter = list.iter();
                let first = match iter.next() {
                    Some(first) => first,
                    None => return Self::new(false),
                };
                let mut res = Self::Disjoint(first.clone()).common_sub_pattern(other, sa);
                let sa = sa.min(0);
                for d in iter {
                    res = Self::Disjoint(d.clone()).common_sub_pattern(&res, sa);
                }
                res
            }
        }
    }

    pub fn is_match(&self, walker: &ParserWalker) -> Result<bool, Error> {
        for d in self.disjoint() {
            if d.is_match(walker)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn from_xml(input: xml::Node) -> Result<Self, DeserialiseError> {
        if input.tag_name().name() == "or_pat" {
            input
                .children()
                .filter(xml::Node::is_element)
                .map(DisjointPattern::from_xml)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Or)
        } else {
            DisjointPattern::from_xml(input).map(Self::Disjoint)
        }
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        match self {
            Self::Disjoint(d) => d.to_xml(out),
            Self::Or(list) => {
                out.start("or_pat");
                for d in list {
                    d.to_xml(out);
                }
                out.end();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn instr(mask: u32, value: u32) -> Pattern {
        Pattern::Disjoint(DisjointPattern::Instruction(PatternBlock::from_word(
            0, mask, value,
        )))
    }

    fn ctx(mask: u32, value: u32) -> Pattern {
        Pattern::Disjoint(DisjointPattern::Context(PatternBlock::from_word(
            0, mask, value,
        )))
    }

    #[test]
    fn mixed_kinds_combine() {
        let p = instr(0xff00_0000, 0x1200_0000).and(&ctx(0x8000_0000, 0x8000_0000), 0);
        match p {
            Pattern::Disjoint(DisjointPattern::Combine {
                ref context,
                ref instruction,
            }) => {
                assert_eq!(context.value(0, 1), 1);
                assert_eq!(instruction.value(0, 8), 0x12);
            }
            _ => panic!("expected combined pattern, got {:?}", p),
        }

        let q = ctx(0x8000_0000, 0x8000_0000).and(&instr(0xff00_0000, 0x12000000), 0);
        assert_eq!(p, q);
    }

    #[test]
    fn shift_only_moves_instruction_bits() {
        let mut p = instr(0xff00_0000, 0x1200_0000).and(&ctx(0xff00_0000, 0x3400_0000), 0);
        p.shift_instruction(2);

        let d = &p.disjoint()[0];
        assert_eq!(d.block(false).map(PatternBlock::offset), Some(2));
        assert_eq!(d.block(true).map(PatternBlock::offset), Some(0));
    }

    #[test]
    fn displaced_conjunction() {
        let p = instr(0xff00_0000, 0x1100_0000).and(&instr(0xff00_0000, 0x2200_0000), 1);
        let d = &p.disjoint()[0];
        assert_eq!(d.value(0, 16, false), 0x1122);
        assert_eq!(d.length(false), 2);
    }

    #[test]
    fn or_distributes_and_simplifies() {
        let alt = instr(0x8000_0000, 0x8000_0000).or(&instr(0x8000_0000, 0), 0);
        assert_eq!(alt.num_disjoint(), 2);

        let both = alt.and(&ctx(0x0100_0000, 0x0100_0000), 0);
        assert_eq!(both.num_disjoint(), 2);
        assert!(both
            .disjoint()
            .iter()
            .all(|d| matches!(d, DisjointPattern::Combine { .. })));

        let cross = alt.and(&alt, 0);
        assert_eq!(cross.num_disjoint(), 4);
        assert!(matches!(cross.simplify(), Pattern::Or(ref l) if l.len() == 2));

        let single = Pattern::Or(vec![
            DisjointPattern::Instruction(PatternBlock::new(false)),
            DisjointPattern::Instruction(PatternBlock::from_word(0, 0xf000_0000, 0)),
        ]);
        assert!(matches!(single.simplify(), Pattern::Disjoint(_)));
    }

    #[test]
    fn common_sub_pattern_of_alternatives() {
        let alt = instr(0xc000_0000, 0x8000_0000).or(&instr(0xc000_0000, 0xc000_0000), 0);
        let common = alt.common_sub_pattern(&Pattern::new(true), 0);
        assert!(common.always_true());

        let common = alt.common_sub_pattern(&instr(0x8000_0000, 0x8000_0000), 0);
        assert_eq!(common.disjoint()[0].value(0, 2, false), 0b10);
        assert_eq!(common.disjoint()[0].mask(0, 2, false), 0b10);
    }

    #[test]
    fn disjoint_relations() {
        let a = DisjointPattern::Instruction(PatternBlock::from_word(0, 0xf000_0000, 0xa000_0000));
        let b = DisjointPattern::Context(PatternBlock::from_word(0, 0x8000_0000, 0x8000_0000));
        let ab = a.and(&b, 0);

        assert!(ab.specializes(&a));
        assert!(ab.specializes(&b));
        assert!(!a.specializes(&b));
        assert!(ab.resolves_intersect(&a, &b));
        assert!(!a.resolves_intersect(&a, &b));
        assert!(a.identical(&a.clone()));
        assert!(DisjointPattern::Instruction(PatternBlock::new(true))
            .identical(&DisjointPattern::Context(PatternBlock::new(true))));
    }

    #[test]
    fn xml_roundtrip() -> Result<(), DeserialiseError> {
        let p = instr(0xff00_0000, 0x1200_0000)
            .and(&ctx(0x8000_0000, 0), 0)
            .or(&instr(0x0f00_0000, 0x0100_0000), 0);

        let mut out = XmlWriter::new();
        p.to_xml(&mut out);
        let text = out.finish();
        let doc = xml::Document::parse(&text)?;
        assert_eq!(Pattern::from_xml(doc.root_element())?, p);
        Ok(())
    }
}
