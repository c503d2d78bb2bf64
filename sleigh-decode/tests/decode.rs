mod common;

use common::*;

use sleigh_decode::deserialise::Error as DeserialiseError;
use sleigh_decode::disassembly::{Error, Opcode};
use sleigh_decode::sleigh::{Sleigh, SleighConfig};
use sleigh_decode::PcodeData;

fn pcode(sleigh: &mut Sleigh, image: &[u8], offset: u64) -> Result<(usize, Vec<String>), Error> {
    let address = sleigh.address(offset);
    let mut ops = Vec::<PcodeData>::new();
    let fall = sleigh.one_instruction(image, &mut ops, &address)?;
    let text = ops.iter().map(|op| op.display(sleigh).to_string()).collect();
    Ok((fall, text))
}

fn assembly(sleigh: &mut Sleigh, image: &[u8], offset: u64) -> Result<(usize, String), Error> {
    let address = sleigh.address(offset);
    let mut text = String::new();
    let length = sleigh.print_assembly(image, &mut text, &address)?;
    Ok((length, text))
}

#[test]
fn disassembles_fixed_and_operand_forms() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = [NOP, 0x2a, TRAP];

    assert_eq!(assembly(&mut sleigh, &image, 0)?, (1, "NOP".to_owned()));
    assert_eq!(assembly(&mut sleigh, &image, 1)?, (1, "MOV 0x2a".to_owned()));
    assert_eq!(assembly(&mut sleigh, &image, 2)?, (1, "TRAP".to_owned()));
    assert_eq!(sleigh.instruction_length(&image[..], &sleigh.address(1))?, 1);
    Ok(())
}

#[test]
fn generates_pcode_with_register_names() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = [0x2a];

    let (fall, ops) = pcode(&mut sleigh, &image, 0)?;
    assert_eq!(fall, 1);
    assert_eq!(ops, vec!["r0:4 = COPY 0x2a:4".to_owned()]);

    let (_, ops) = pcode(&mut sleigh, &[NOP], 0)?;
    assert!(ops.is_empty());
    Ok(())
}

#[test]
fn user_operations_are_indexed() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    assert_eq!(sleigh.user_op_names().len(), 1);
    assert_eq!(sleigh.user_op_names()[0].as_str(), "trap");

    let address = sleigh.address(0);
    let mut ops = Vec::<PcodeData>::new();
    sleigh.one_instruction(&[TRAP][..], &mut ops, &address)?;
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].opcode, Opcode::CallOther);
    assert_eq!(ops[0].inputs[0].offset(), 0);
    Ok(())
}

#[test]
fn missing_semantics_are_unimplemented() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = [HLT];

    assert_eq!(assembly(&mut sleigh, &image, 0)?, (1, "HLT".to_owned()));
    match pcode(&mut sleigh, &image, 0) {
        Err(Error::Unimplemented { length, text, .. }) => {
            assert_eq!(length, 1);
            assert!(text.contains("HLT"));
        }
        other => panic!("expected unimplemented instruction, got {:?}", other),
    }
    Ok(())
}

#[test]
fn unmatched_bytes_are_bad_data() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let err = assembly(&mut sleigh, &[0x80], 0).unwrap_err();
    assert!(err.is_bad_data());

    let err = pcode(&mut sleigh, &[0x81], 0).unwrap_err();
    assert!(err.is_bad_data());
    Ok(())
}

#[test]
fn misaligned_addresses_are_rejected() -> Result<(), Error> {
    let spaces = spaces();
    let grammar = grammar(&spaces)?;
    let config = SleighConfig {
        alignment: 2,
        ..config()
    };
    let mut sleigh = Sleigh::new(config, spaces, grammar.table)?;

    let image = [NOP, NOP, NOP];
    assert!(assembly(&mut sleigh, &image, 2).is_ok());
    match assembly(&mut sleigh, &image, 1) {
        Err(Error::BadData { address, reason }) => {
            assert_eq!(address, 1);
            assert!(reason.contains("not aligned"));
        }
        other => panic!("expected alignment error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn delay_slot_is_spliced() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = [DLY, 0x05];

    assert_eq!(assembly(&mut sleigh, &image, 0)?, (1, "DLY".to_owned()));

    let (fall, ops) = pcode(&mut sleigh, &image, 0)?;
    assert_eq!(fall, 2);
    assert_eq!(ops, vec!["r0:4 = COPY 0x5:4".to_owned()]);
    Ok(())
}

#[test]
fn next2_follows_the_next_instruction() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = [SKIP, NOP, 0x2a];

    let (fall, ops) = pcode(&mut sleigh, &image, 0)?;
    assert_eq!(fall, 1);
    assert_eq!(ops, vec!["BRANCH ram[0x2]:4".to_owned()]);
    Ok(())
}

#[test]
fn committed_context_changes_later_decodes() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = [SWITCH, 0x2a, 0x2a];

    assert_eq!(sleigh.get_variable("mode", &sleigh.address(1))?, 0);
    pcode(&mut sleigh, &image, 0)?;

    assert_eq!(sleigh.get_variable("mode", &sleigh.address(0))?, 0);
    assert_eq!(sleigh.get_variable("mode", &sleigh.address(1))?, 1);
    assert_eq!(sleigh.get_variable("mode", &sleigh.address(2))?, 1);

    assert_eq!(assembly(&mut sleigh, &image, 1)?, (1, "ALT 0x2a".to_owned()));
    let (_, ops) = pcode(&mut sleigh, &image, 1)?;
    assert_eq!(ops, vec!["r0:4 = INT_ADD r0:4, 0x2a:4".to_owned()]);
    Ok(())
}

#[test]
fn non_flowing_commit_covers_one_address() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = [ONCE, 0x2a, 0x2a];
    pcode(&mut sleigh, &image, 0)?;

    assert_eq!(sleigh.get_variable("mode", &sleigh.address(1))?, 1);
    assert_eq!(sleigh.get_variable("mode", &sleigh.address(2))?, 0);
    assert_eq!(assembly(&mut sleigh, &image, 1)?.1, "ALT 0x2a");
    assert_eq!(assembly(&mut sleigh, &image, 2)?.1, "MOV 0x2a");
    Ok(())
}

#[test]
fn context_changes_can_be_suppressed() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    sleigh.allow_context_set(false);

    let image = [SWITCH, 0x2a];
    pcode(&mut sleigh, &image, 0)?;

    assert_eq!(sleigh.get_variable("mode", &sleigh.address(1))?, 0);
    assert_eq!(assembly(&mut sleigh, &image, 1)?, (1, "MOV 0x2a".to_owned()));
    Ok(())
}

#[test]
fn setting_context_drops_cached_decodes() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = vec![0x2a; 0x20];

    assert_eq!(assembly(&mut sleigh, &image, 0x10)?.1, "MOV 0x2a");

    let address = sleigh.address(0x10);
    sleigh.set_variable("mode", &address, 1)?;

    assert_eq!(assembly(&mut sleigh, &image, 0x10)?.1, "ALT 0x2a");
    assert_eq!(assembly(&mut sleigh, &image, 0)?.1, "MOV 0x2a");
    assert!(sleigh.get_variable("missing", &address).is_err());
    Ok(())
}

#[test]
fn repeated_decodes_agree() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let image = (0..0x40u8).map(|b| b & 0x7f).collect::<Vec<_>>();

    let first = (0..0x40)
        .map(|offset| pcode(&mut sleigh, &image, offset))
        .collect::<Result<Vec<_>, _>>()?;
    let second = (0..0x40)
        .rev()
        .map(|offset| pcode(&mut sleigh, &image, offset))
        .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(first, second.into_iter().rev().collect::<Vec<_>>());
    assert_eq!(first[0x11].1, vec!["r0:4 = COPY 0x11:4".to_owned()]);
    Ok(())
}

#[test]
fn new_bytes_at_a_decoded_address_are_decoded_again() -> Result<(), Error> {
    let mut sleigh = sleigh()?;

    assert_eq!(assembly(&mut sleigh, &[0x10], 0)?.1, "MOV 0x10");
    assert_eq!(assembly(&mut sleigh, &[0x11], 0)?.1, "MOV 0x11");

    let (_, ops) = pcode(&mut sleigh, &[0x10], 0)?;
    assert_eq!(ops, vec!["r0:4 = COPY 0x10:4".to_owned()]);
    let (_, ops) = pcode(&mut sleigh, &[0x11], 0)?;
    assert_eq!(ops, vec!["r0:4 = COPY 0x11:4".to_owned()]);

    assert_eq!(assembly(&mut sleigh, &[TRAP], 0)?.1, "TRAP");
    assert_eq!(sleigh.instruction_length(&[DLY, NOP][..], &sleigh.address(0))?, 1);
    Ok(())
}

#[test]
fn register_names_resolve_containing_registers()-> Result<(), Error> {
    let sleigh = sleigh()?;
    let register = sleigh.manager().register_space().cloned().ok_or(Error::InvalidSpace)?;

    assert_eq!(sleigh.register_name(&register, 0, 4), Some("r0"));
    assert_eq!(sleigh.register_name(&register, 0, 2), Some("r0l"));
    assert_eq!(sleigh.register_name(&register, 2, 2), Some("r0"));
    assert_eq!(sleigh.register_name(&register, 4, 4), Some("r1"));
    assert_eq!(sleigh.register_name(&register, 6, 4), None);
    assert_eq!(sleigh.register_name(&register, 0x200, 4), None);

    let names = sleigh
        .all_registers()
        .into_iter()
        .map(|(_, name)| name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["r0", "r0l", "r1", "contextreg"]);
    Ok(())
}

#[test]
fn persisted_specification_reloads() -> Result<(), Error> {
    let mut sleigh = sleigh()?;
    let text = sleigh.to_xml();

    let mut reloaded = Sleigh::from_str(&text)?;
    assert_eq!(reloaded.config(), sleigh.config());
    assert_eq!(reloaded.symbols().len(), sleigh.symbols().len());

    let image = [SWITCH, 0x2a, DLY, 0x07, HLT];
    for offset in 0..4 {
        assert_eq!(
            assembly(&mut reloaded, &image, offset)?,
            assembly(&mut sleigh, &image, offset)?,
        );
    }
    assert_eq!(pcode(&mut reloaded, &image, 2)?, pcode(&mut sleigh, &image, 2)?);

    let stale = text.replacen("version=\"3\"", "version=\"2\"", 1);
    match Sleigh::from_str(&stale) {
        Err(Error::Deserialise(DeserialiseError::VersionMismatch { expected, found })) => {
            assert_eq!((expected, found), (3, 2));
        }
        other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[test]
fn missing_file_reports_path() {
    match Sleigh::from_file("/nonexistent/toy.sla") {
        Err(sleigh_decode::Error::ParseFile { path, .. }) => {
            assert_eq!(path.to_str(), Some("/nonexistent/toy.sla"));
        }
        other => panic!("expected a read error, got {:?}", other.map(|_| ())),
    }
}
