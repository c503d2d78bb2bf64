#![allow(dead_code)]

use std::sync::Arc;

use sleigh_decode::disassembly::construct::{HandleKind, HandleTpl};
use sleigh_decode::disassembly::equation::Relation;
use sleigh_decode::disassembly::expression::{ContextField, TokenField};
use sleigh_decode::disassembly::symbol::{ContextChange, OperandDefinition, ROOT_TABLE};
use sleigh_decode::disassembly::{
    ConstTpl, ConstructTpl, ConstructorRef, Error, OpTpl, Opcode, PatternEquation,
    PatternExpression, SymbolData, SymbolTable, Token, VarnodeTpl,
};
use sleigh_decode::sleigh::{Sleigh, SleighConfig};
use sleigh_decode::space::SpaceKind;
use sleigh_decode::space_manager::SpaceManager;

pub const NOP: u8 = 0xff;
pub const SWITCH: u8 = 0xfe;
pub const HLT: u8 = 0xfd;
pub const DLY: u8 = 0xfc;
pub const TRAP: u8 = 0xfb;
pub const SKIP: u8 = 0xfa;
pub const ONCE: u8 = 0xf9;

pub const LDM: u8 = 0x10;
pub const STM: u8 = 0x20;
pub const LDH: u8 = 0x30;
pub const JMP: u8 = 0x40;
pub const XB: u8 = 0x50;
pub const BAD: u8 = 0x60;

pub fn spaces() -> SpaceManager {
    let mut manager = SpaceManager::new();
    manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);
    manager.add_space(SpaceKind::Register, "register", 4, 1, None, 0);
    manager.add_space(SpaceKind::Internal, "unique", 4, 1, None, 0);
    manager
}

/// A one-byte instruction set:
///
/// ```text
/// 0xff        NOP
/// 0xfe        SWITCH    sets `mode` from the next instruction on
/// 0xfd        HLT       no semantics
/// 0xfc        DLY       one byte delay slot
/// 0xfb        TRAP      user-defined operation
/// 0xfa        SKIP      branches to inst_next2
/// 0xf9        ONCE      sets `mode` for the next instruction only
/// 0b0iiiiiii  MOV imm   (mode == 0) r0 = imm
/// 0b0iiiiiii  ALT imm   (mode == 1) r0 = r0 + imm
/// ```
pub struct Grammar {
    pub table: SymbolTable,
    pub root: usize,
    pub opcode: Arc<PatternExpression>,
    pub imm: usize,
}

pub fn field(token: &Arc<Token>, start: usize, end: usize) -> Arc<PatternExpression> {
    Arc::new(PatternExpression::TokenField(TokenField::new(
        token.clone(),
        false,
        start,
        end,
    )))
}

pub fn constant(value: i64) -> Arc<PatternExpression> {
    Arc::new(PatternExpression::Constant(value))
}

pub fn equals(lhs: &Arc<PatternExpression>, value: i64) -> Result<PatternEquation, Error> {
    PatternEquation::constraint(Relation::Equal, lhs.clone(), constant(value))
}

fn named(table: &mut SymbolTable, ct: ConstructorRef, mnemonic: &str, equation: PatternEquation) -> Result<(), Error> {
    let ctor = table.constructor_mut(ct)?;
    ctor.add_syntax(mnemonic);
    ctor.set_equation(equation);
    Ok(())
}

pub fn fixed(table: &mut SymbolTable, root: usize, opcode: &Arc<PatternExpression>, value: u8, mnemonic: &str) -> Result<ConstructorRef, Error> {
    let ct = table.add_constructor(root)?;
    named(table, ct, mnemonic, equals(opcode, value as i64)?)?;
    Ok(ct)
}

fn immediate(
    table: &mut SymbolTable,
    root: usize,
    imm: usize,
    mnemonic: &str,
    constraint: PatternEquation,
) -> Result<ConstructorRef, Error> {
    let ct = table.add_constructor(root)?;
    let operand = table.add_operand(ct, "imm")?;
    table.define_operand(ct, operand, OperandDefinition::Symbol(imm))?;

    let ctor = table.constructor_mut(ct)?;
    ctor.add_syntax(mnemonic);
    ctor.add_syntax(" ");
    ctor.add_print_operand(operand);
    ctor.set_equation(PatternEquation::and(constraint, PatternEquation::operand(operand)));
    Ok(ct)
}

pub fn grammar(spaces: &SpaceManager) -> Result<Grammar, Error> {
    let token = Arc::new(Token::new("op", 1, true, 0));
    let register = spaces.register_space().cloned().ok_or(Error::InvalidSpace)?;
    let ram = spaces.default_space().clone();
    let consts = spaces.constant_space().clone();

    let opcode = field(&token, 0, 7);
    let top = field(&token, 7, 7);
    let mode_field = Arc::new(PatternExpression::ContextField(ContextField::new(false, 0, 0)));

    let mut table = SymbolTable::new();
    let imm = table.add_global("imm7", SymbolData::value(field(&token, 0, 6)))?;
    table.add_global("r0", SymbolData::varnode(register.clone(), 0, 4))?;
    table.add_global("r0l", SymbolData::varnode(register.clone(), 0, 2))?;
    table.add_global("r1", SymbolData::varnode(register.clone(), 4, 4))?;
    let contextreg = table.add_global("contextreg", SymbolData::varnode(register.clone(), 0x100, 4))?;
    table.add_global(
        "mode",
        SymbolData::Context {
            pattern: mode_field.clone(),
            varnode: contextreg,
            low: 0,
            high: 0,
            flow: true,
        },
    )?;
    let inst_next = table.add_global("inst_next", SymbolData::end())?;
    table.add_global("inst_next2", SymbolData::next2())?;
    table.add_global("trap", SymbolData::UserOp { index: 0 })?;

    let root = table.add_subtable(ROOT_TABLE)?;

    let reg = |offset| VarnodeTpl::new(ConstTpl::SpaceId(register.clone()), ConstTpl::Real(offset), ConstTpl::Real(4));
    let imm_tpl = || VarnodeTpl::new(ConstTpl::SpaceId(consts.clone()), ConstTpl::Handle(0, HandleKind::Offset), ConstTpl::Real(4));
    let real = |value| VarnodeTpl::new(ConstTpl::SpaceId(consts.clone()), ConstTpl::Real(value), ConstTpl::Real(4));

    let nop = fixed(&mut table, root, &opcode, NOP, "NOP")?;
    table.constructor_mut(nop)?.set_template(ConstructTpl::new(Vec::new()))?;

    let switch = fixed(&mut table, root, &opcode, SWITCH, "SWITCH")?;
    {
        let ctor = table.constructor_mut(switch)?;
        ctor.add_context_change(ContextChange::operation(0, 0, constant(1))?);
        ctor.add_context_change(ContextChange::commit(inst_next, 0, 0, true)?);
        ctor.set_template(ConstructTpl::new(Vec::new()))?;
    }

    let once = fixed(&mut table, root, &opcode, ONCE, "ONCE")?;
    {
        let ctor = table.constructor_mut(once)?;
        ctor.add_context_change(ContextChange::operation(0, 0, constant(1))?);
        ctor.add_context_change(ContextChange::commit(inst_next, 0, 0, false)?);
        ctor.set_template(ConstructTpl::new(Vec::new()))?;
    }

    fixed(&mut table, root, &opcode, HLT, "HLT")?;

    let dly = fixed(&mut table, root, &opcode, DLY, "DLY")?;
    table.constructor_mut(dly)?.set_template(
        ConstructTpl::new(vec![OpTpl::new(Opcode::DelaySlot, None, vec![real(1)])]).with_delay_slot(1),
    )?;

    let trap = fixed(&mut table, root, &opcode, TRAP, "TRAP")?;
    table
        .constructor_mut(trap)?
        .set_template(ConstructTpl::new(vec![OpTpl::new(Opcode::CallOther, None, vec![real(0)])]))?;

    let skip = fixed(&mut table, root, &opcode, SKIP, "SKIP")?;
    table.constructor_mut(skip)?.set_template(ConstructTpl::new(vec![OpTpl::new(
        Opcode::Branch,
        None,
        vec![VarnodeTpl::new(ConstTpl::SpaceId(ram), ConstTpl::Next2, ConstTpl::Real(4))],
    )]))?;

    let mov = immediate(
        &mut table,
        root,
        imm,
        "MOV",
        PatternEquation::and(equals(&mode_field, 0)?, equals(&top, 0)?),
    )?;
    table.constructor_mut(mov)?.set_template(ConstructTpl::new(vec![OpTpl::new(
        Opcode::Copy,
        Some(reg(0)),
        vec![imm_tpl()],
    )]))?;

    let alt = immediate(
        &mut table,
        root,
        imm,
        "ALT",
        PatternEquation::and(equals(&mode_field, 1)?, equals(&top, 0)?),
    )?;
    table.constructor_mut(alt)?.set_template(ConstructTpl::new(vec![OpTpl::new(
        Opcode::IntAdd,
        Some(reg(0)),
        vec![reg(0), imm_tpl()],
    )]))?;

    Ok(Grammar {
        table,
        root,
        opcode,
        imm,
    })
}

pub fn config() -> SleighConfig {
    SleighConfig {
        max_delay: 1,
        ..Default::default()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sleigh() -> Result<Sleigh, Error> {
    init_logging();
    let spaces = spaces();
    let grammar = grammar(&spaces)?;
    Sleigh::new(config(), spaces, grammar.table)
}

fn handle(index: usize) -> VarnodeTpl {
    VarnodeTpl::new(
        ConstTpl::Handle(index, HandleKind::Space),
        ConstTpl::Handle(index, HandleKind::Offset),
        ConstTpl::Handle(index, HandleKind::Size),
    )
}

fn with_operand(
    table: &mut SymbolTable,
    root: usize,
    sub: usize,
    constraint: Option<PatternEquation>,
) -> Result<ConstructorRef, Error> {
    let ct = table.add_constructor(root)?;
    let operand = table.add_operand(ct, "sub")?;
    table.define_operand(ct, operand, OperandDefinition::Symbol(sub))?;
    let equation = match constraint {
        Some(constraint) => PatternEquation::and(constraint, PatternEquation::operand(operand)),
        None => PatternEquation::operand(operand),
    };
    table.constructor_mut(ct)?.set_equation(equation);
    Ok(ct)
}

/// A one-byte instruction set built from nested tables:
///
/// ```text
/// reg   := bit 0          r0 | r1, exports the register
/// mem   := reg            [reg], exports the memory it points to
/// guard := low nibble 0   conditional skip over a local label
///
/// 0x1r  LDM mem           r1 = *mem
/// 0x2r  STM mem           *mem = r1
/// 0x3r  LDH mem           r0l = *(mem + 2), truncated to two bytes
/// 0x40  JMP guard         branch over a local label
/// 0x5-  XB                builds section 0 of the next instruction
/// 0x6-  BAD               references a label that is never placed
/// ```
///
/// Each `reg` constructor also defines section 0, which increments its
/// register.
pub fn memory_grammar(spaces: &SpaceManager) -> Result<SymbolTable, Error> {
    let token = Arc::new(Token::new("op", 1, true, 0));
    let register = spaces.register_space().cloned().ok_or(Error::InvalidSpace)?;
    let ram = spaces.default_space().clone();
    let unique = spaces.unique_space().clone();
    let consts = spaces.constant_space().clone();

    let hi = field(&token, 4, 7);
    let lo = field(&token, 0, 3);
    let bit = field(&token, 0, 0);

    let mut table = SymbolTable::new();
    table.add_global("r0", SymbolData::varnode(register.clone(), 0, 4))?;
    table.add_global("r0l", SymbolData::varnode(register.clone(), 0, 2))?;
    table.add_global("r1", SymbolData::varnode(register.clone(), 4, 4))?;

    let root = table.add_subtable(ROOT_TABLE)?;
    let reg_table = table.add_subtable("reg")?;
    let mem_table = table.add_subtable("mem")?;
    let guard_table = table.add_subtable("guard")?;

    let reg = |offset, size| VarnodeTpl::new(ConstTpl::SpaceId(register.clone()), ConstTpl::Real(offset), ConstTpl::Real(size));
    let real = |value| VarnodeTpl::new(ConstTpl::SpaceId(consts.clone()), ConstTpl::Real(value), ConstTpl::Real(4));
    let label = |value| VarnodeTpl::new(ConstTpl::SpaceId(consts.clone()), ConstTpl::Relative(value), ConstTpl::Real(4));
    let build = |index| OpTpl::new(Opcode::Build, None, vec![real(index)]);

    for (value, name, offset) in [(0, "r0", 0), (1, "r1", 4)] {
        let ct = table.add_constructor(reg_table)?;
        let ctor = table.constructor_mut(ct)?;
        ctor.add_syntax(name);
        ctor.set_equation(equals(&bit, value)?);
        ctor.set_template(ConstructTpl::new(Vec::new()).with_result(HandleTpl::direct(
            ConstTpl::SpaceId(register.clone()),
            ConstTpl::Real(4),
            ConstTpl::Real(offset),
        )))?;
        ctor.set_template(
            ConstructTpl::new(vec![OpTpl::new(
                Opcode::IntAdd,
                Some(reg(offset, 4)),
                vec![reg(offset, 4), real(1)],
            )])
            .with_section(0),
        )?;
    }

    let mem = with_operand(&mut table, mem_table, reg_table, None)?;
    {
        let ctor = table.constructor_mut(mem)?;
        ctor.add_syntax("[");
        ctor.add_print_operand(0);
        ctor.add_syntax("]");
        ctor.set_template(ConstructTpl::new(vec![build(0)]).with_result(HandleTpl::dynamic(
            ConstTpl::SpaceId(ram.clone()),
            ConstTpl::Real(4),
            ConstTpl::Handle(0, HandleKind::Space),
            ConstTpl::Handle(0, HandleKind::Offset),
            ConstTpl::Handle(0, HandleKind::Size),
            ConstTpl::SpaceId(unique),
            ConstTpl::Real(0x80),
        )))?;
    }

    let guard = table.add_constructor(guard_table)?;
    {
        let ctor = table.constructor_mut(guard)?;
        ctor.set_equation(equals(&lo, 0)?);
        ctor.set_template(
            ConstructTpl::new(vec![
                OpTpl::new(Opcode::CBranch, None, vec![label(0), reg(0, 4)]),
                OpTpl::new(Opcode::Copy, Some(reg(0, 4)), vec![real(0)]),
                OpTpl::new(Opcode::Label, None, vec![real(0)]),
            ])
            .with_labels(1),
        )?;
    }

    let loads: [(u8, &str, Vec<OpTpl>); 3] = [
        (LDM, "LDM", vec![build(0), OpTpl::new(Opcode::Copy, Some(reg(4, 4)), vec![handle(0)])]),
        (STM, "STM", vec![build(0), OpTpl::new(Opcode::Copy, Some(handle(0)), vec![reg(4, 4)])]),
        (
            LDH,
            "LDH",
            vec![
                build(0),
                OpTpl::new(
                    Opcode::Copy,
                    Some(reg(0, 2)),
                    vec![VarnodeTpl::new(
                        ConstTpl::Handle(0, HandleKind::Space),
                        ConstTpl::Handle(0, HandleKind::OffsetPlus(2)),
                        ConstTpl::Real(2),
                    )],
                ),
            ],
        ),
    ];
    for (opcode, mnemonic, operations) in loads {
        let ct = with_operand(&mut table, root, mem_table, Some(equals(&hi, (opcode >> 4) as i64)?))?;
        let ctor = table.constructor_mut(ct)?;
        ctor.add_syntax(mnemonic);
        ctor.add_syntax(" ");
        ctor.add_print_operand(0);
        ctor.set_template(ConstructTpl::new(operations))?;
    }

    let jmp = with_operand(&mut table, root, guard_table, Some(equals(&hi, (JMP >> 4) as i64)?))?;
    {
        let ctor = table.constructor_mut(jmp)?;
        ctor.add_syntax("JMP");
        ctor.set_template(
            ConstructTpl::new(vec![
                build(0),
                OpTpl::new(Opcode::Branch, None, vec![label(0)]),
                OpTpl::new(Opcode::Label, None, vec![real(0)]),
                OpTpl::new(Opcode::Copy, Some(reg(4, 4)), vec![real(1)]),
            ])
            .with_labels(1),
        )?;
    }

    let xb = table.add_constructor(root)?;
    named(&mut table, xb, "XB", equals(&hi, (XB >> 4) as i64)?)?;
    table.constructor_mut(xb)?.set_template(ConstructTpl::new(vec![OpTpl::new(
        Opcode::CrossBuild,
        None,
        vec![
            VarnodeTpl::new(ConstTpl::SpaceId(ram), ConstTpl::Next, ConstTpl::Real(4)),
            real(0),
        ],
    )]))?;

    let bad = table.add_constructor(root)?;
    named(&mut table, bad, "BAD", equals(&hi, (BAD >> 4) as i64)?)?;
    table
        .constructor_mut(bad)?
        .set_template(ConstructTpl::new(vec![OpTpl::new(Opcode::Branch, None, vec![label(0)])]).with_labels(1))?;

    Ok(table)
}

pub fn memory_sleigh() -> Result<Sleigh, Error> {
    init_logging();
    let spaces = spaces();
    let table = memory_grammar(&spaces)?;
    let config = SleighConfig {
        sections: 1,
        ..Default::default()
    };
    Sleigh::new(config, spaces, table)
}
