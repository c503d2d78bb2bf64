use std::sync::Arc;

use crate::disassembly::expression::PatternExpression;
use crate::disassembly::token_pattern::TokenPattern;
use crate::disassembly::Error;

/// Where an operand starts: `relative_offset` bytes past the end of operand
/// `offset_base`, or past the start of the constructor when there is no base.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct OperandPlacement {
    pub offset_base: Option<usize>,
    pub relative_offset: usize,
    pub offset_irrelevant: bool,
}

const NO_ANCHOR: isize = -2;

/// Left-to-right traversal state used to place operands.
#[derive(Debug)]
pub struct OperandResolve<'a> {
    operands: &'a mut [OperandPlacement],
    base: isize,
    offset: usize,
    cur_rightmost: isize,
    size: isize,
}

impl<'a> OperandResolve<'a> {
    pub fn new(operands: &'a mut [OperandPlacement]) -> Self {
        Self {
            operands,
            base: -1,
            offset: 0,
            cur_rightmost: -1,
            size: 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Relation {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Relation {
    fn holds(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Equal => lhs == rhs,
            Self::NotEqual => lhs != rhs,
            Self::Less => lhs < rhs,
            Self::LessEqual => lhs <= rhs,
            Self::Greater => lhs > rhs,
            Self::GreaterEqual => lhs >= rhs,
        }
    }

    fn impossible(&self) -> &'static str {
        match self {
            Self::Equal => "equal constraint is impossible to match",
            Self::NotEqual => "not-equal constraint is impossible to match",
            Self::Less => "less-than constraint is impossible to match",
            Self::LessEqual => "less-than-or-equal constraint is impossible to match",
            Self::Greater => "greater-than constraint is impossible to match",
            Self::GreaterEqual => "greater-than-or-equal constraint is impossible to match",
        }
    }
}

#[derive(Debug, Clone)]
pub enum EquationKind {
    /// The operand's own pattern.
    Operand(usize),
    /// Whatever tokens the expression touches, with no constraint on them.
    Unconstrained(Arc<PatternExpression>),
    Constraint {
        relation: Relation,
        lhs: Arc<PatternExpression>,
        rhs: Arc<PatternExpression>,
    },
    And(Box<PatternEquation>, Box<PatternEquation>),
    Or(Box<PatternEquation>, Box<PatternEquation>),
    Cat(Box<PatternEquation>, Box<PatternEquation>),
    LeftEllipsis(Box<PatternEquation>),
    RightEllipsis(Box<PatternEquation>),
}

/// A constructor's matching condition. The pattern it denotes is produced
/// by [`PatternEquation::gen_pattern`] and kept alongside each node.
#[derive(Debug, Clone)]
pub struct PatternEquation {
    kind: EquationKind,
    pattern: TokenPattern,
}

fn advance_combination(values: &mut [i64], min: &[i64], max: &[i64]) -> bool {
    for i in 0..values.len() {
        values[i] += 1;
        if values[i] <= max[i] {
            return true;
        }
        values[i] = min[i];
    }
    false
}

fn build_pattern(
    lhs: &PatternExpression,
    lhs_value: i64,
    values: &[&PatternExpression],
    assignment: &[i64],
) -> Result<TokenPattern, Error> {
    let mut pattern = lhs.gen_pattern(lhs_value)?;
    for (value, v) in values.iter().zip(assignment) {
        pattern = pattern.and(&value.gen_pattern(*v)?)?;
    }
    Ok(pattern)
}

impl PatternEquation {
    fn from_kind(kind: EquationKind) -> Self {
        Self {
            kind,
            pattern: TokenPattern::new(),
        }
    }

    pub fn operand(index: usize) -> Self {
        Self::from_kind(EquationKind::Operand(index))
    }

    pub fn unconstrained(expression: Arc<PatternExpression>) -> Self {
        Self::from_kind(EquationKind::Unconstrained(expression))
    }

    /// `lhs relation rhs`; the left side must be a field or other value.
    pub fn constraint(
        relation: Relation,
        lhs: Arc<PatternExpression>,
        rhs: Arc<PatternExpression>,
    ) -> Result<Self, Error> {
        if !lhs.is_value() {
            return Err(Error::specification(
                "left side of a constraint must be a field",
            ));
        }
        Ok(Self::from_kind(EquationKind::Constraint { relation, lhs, rhs }))
    }

    pub fn and(lhs: Self, rhs: Self) -> Self {
        Self::from_kind(EquationKind::And(Box::new(lhs), Box::new(rhs)))
    }

    pub fn or(lhs: Self, rhs: Self) -> Self {
        Self::from_kind(EquationKind::Or(Box::new(lhs), Box::new(rhs)))
    }

    pub fn cat(lhs: Self, rhs: Self) -> Self {
        Self::from_kind(EquationKind::Cat(Box::new(lhs), Box::new(rhs)))
    }

    pub fn left_ellipsis(inner: Self) -> Self {
        Self::from_kind(EquationKind::LeftEllipsis(Box::new(inner)))
    }

    pub fn right_ellipsis(inner: Self) -> Self {
        Self::from_kind(EquationKind::RightEllipsis(Box::new(inner)))
    }

    pub fn kind(&self) -> &EquationKind {
        &self.kind
    }

    pub fn token_pattern(&self) -> &TokenPattern {
        &self.pattern
    }

    fn unknown_length(&self) -> bool {
        self.pattern.left_ellipsis() || self.pattern.right_ellipsis()
    }

    pub fn gen_pattern(&mut self, operands: &[TokenPattern]) -> Result<(), Error> {
        self.pattern = match self.kind {
            EquationKind::Operand(index) => operands
                .get(index)
                .cloned()
                .ok_or_else(|| Error::invariant("equation names a missing operand"))?,
            EquationKind::Unconstrained(ref expr) => expr.gen_min_pattern(operands)?,
            EquationKind::Constraint {
                relation,
                ref lhs,
                ref rhs,
            } => constraint_pattern(relation, lhs, rhs)?,
            EquationKind::And(ref mut l, ref mut r) => {
                l.gen_pattern(operands)?;
                r.gen_pattern(operands)?;
                l.pattern.and(&r.pattern)?
            }
            EquationKind::Or(ref mut l, ref mut r) => {
                l.gen_pattern(operands)?;
                r.gen_pattern(operands)?;
                l.pattern.or(&r.pattern)?
            }
            EquationKind::Cat(ref mut l, ref mut r) => {
                l.gen_pattern(operands)?;
                r.gen_pattern(operands)?;
                l.pattern.cat(&r.pattern)?
            }
            EquationKind::LeftEllipsis(ref mut inner) => {
                inner.gen_pattern(operands)?;
                let mut pattern = inner.pattern.clone();
                pattern.set_left_ellipsis(true);
                pattern
            }
            EquationKind::RightEllipsis(ref mut inner) => {
                inner.gen_pattern(operands)?;
                let mut pattern = inner.pattern.clone();
                pattern.set_right_ellipsis(true);
                pattern
            }
        };
        Ok(())
    }

    /// Assigns each operand an offset relative to its nearest placed left
    /// neighbour. Returns `false` when some operand has nothing to anchor to.
    pub fn resolve_operand_left(&self, state: &mut OperandResolve) -> bool {
        match self.kind {
            EquationKind::Operand(index) => {
                let base = state.base;
                let offset = state.offset;
                let placement = match state.operands.get_mut(index) {
                    Some(placement) => placement,
                    None => return false,
                };
                if placement.offset_irrelevant {
                    placement.offset_base = None;
                    placement.relative_offset = 0;
                    return true;
                }
                if base == NO_ANCHOR {
                    return false;
                }
                placement.offset_base = if base < 0 { None } else { Some(base as usize) };
                placement.relative_offset = offset;
                state.cur_rightmost = index as isize;
                state.size = 0;
                true
            }
            EquationKind::Unconstrained(_) | EquationKind::Constraint { .. } => {
                state.cur_rightmost = -1;
                state.size = if self.unknown_length() {
                    -1
                } else {
                    self.pattern.minimum_length() as isize
                };
                true
            }
            EquationKind::And(ref l, ref r) | EquationKind::Or(ref l, ref r) => {
                let mut cur_rightmost = -1;
                let mut cur_size = -1;
                if !r.resolve_operand_left(state) {
                    return false;
                }
                if state.cur_rightmost != -1 && state.size != -1 {
                    cur_rightmost = state.cur_rightmost;
                    cur_size = state.size;
                }
                if !l.resolve_operand_left(state) {
                    return false;
                }
                if state.cur_rightmost == -1 || state.size == -1 {
                    state.cur_rightmost = cur_rightmost;
                    state.size = cur_size;
                }
                true
            }
            EquationKind::Cat(ref l, ref r) => {
                if !l.resolve_operand_left(state) {
                    return false;
                }
                let cur_base = state.base;
                let cur_offset = state.offset;
                if !l.unknown_length() {
                    state.offset += l.pattern.minimum_length();
                } else if state.cur_rightmost != -1 {
                    state.base = state.cur_rightmost;
                    state.offset = state.size.max(0) as usize;
                } else if state.size != -1 {
                    state.offset += state.size as usize;
                } else {
                    state.base = NO_ANCHOR;
                }
                let cur_rightmost = state.cur_rightmost;
                let cur_size = state.size;
                if !r.resolve_operand_left(state) {
                    return false;
                }
                state.base = cur_base;
                state.offset = cur_offset;
                if state.cur_rightmost == -1
                    && state.size != -1
                    && cur_rightmost != -1
                    && cur_size != -1
                {
                    state.cur_rightmost = cur_rightmost;
                    state.size += cur_size;
                }
                true
            }
            EquationKind::LeftEllipsis(ref inner) => {
                let cur_base = state.base;
                state.base = NO_ANCHOR;
                if !inner.resolve_operand_left(state) {
                    return false;
                }
                state.base = cur_base;
                true
            }
            EquationKind::RightEllipsis(ref inner) => {
                if !inner.resolve_operand_left(state) {
                    return false;
                }
                state.size = -1;
                true
            }
        }
    }

    /// Operands in the order the equation mentions them; `marked` records
    /// operands already listed.
    pub fn operand_order(&self, order: &mut Vec<usize>, marked: &mut [bool]) {
        match self.kind {
            EquationKind::Operand(index) => {
                if let Some(mark) = marked.get_mut(index) {
                    if !*mark {
                        *mark = true;
                        order.push(index);
                    }
                }
            }
            EquationKind::And(ref l, ref r)
            | EquationKind::Or(ref l, ref r)
            | EquationKind::Cat(ref l, ref r) => {
                l.operand_order(order, marked);
                r.operand_order(order, marked);
            }
            EquationKind::LeftEllipsis(ref inner) | EquationKind::RightEllipsis(ref inner) => {
                inner.operand_order(order, marked)
            }
            EquationKind::Unconstrained(_) | EquationKind::Constraint { .. } => (),
        }
    }
}

fn constraint_pattern(
    relation: Relation,
    lhs: &PatternExpression,
    rhs: &PatternExpression,
) -> Result<TokenPattern, Error> {
    let lhs_min = lhs.min_value()?;
    let lhs_max = lhs.max_value()?;

    let mut values = Vec::new();
    rhs.list_values(&mut values);
    let min = values
        .iter()
        .map(|v| v.min_value())
        .collect::<Result<Vec<_>, _>>()?;
    let max = values
        .iter()
        .map(|v| v.max_value())
        .collect::<Result<Vec<_>, _>>()?;

    let mut current = min.clone();
    let mut result: Option<TokenPattern> = None;
    let mut accumulate = |pattern: TokenPattern| -> Result<(), Error> {
        result = Some(match result.take() {
            None => pattern,
            Some(acc) => acc.or(&pattern)?,
        });
        Ok(())
    };

    loop {
        let mut position = 0;
        let value = rhs.sub_value(&current, &mut position)?;

        if relation == Relation::Equal {
            if value >= lhs_min && value <= lhs_max {
                accumulate(build_pattern(lhs, value, &values, &current)?)?;
            }
        } else {
            for lhs_value in lhs_min..=lhs_max {
                if relation.holds(lhs_value, value) {
                    accumulate(build_pattern(lhs, lhs_value, &values, &current)?)?;
                }
            }
        }

        if !advance_combination(&mut current, &min, &max) {
            break;
        }
    }

    result.ok_or_else(|| Error::specification(relation.impossible()))
}
