mod common;

use common::*;

use sleigh_decode::disassembly::Error;
use sleigh_decode::sleigh::Sleigh;
use sleigh_decode::PcodeData;

fn pcode(sleigh: &mut Sleigh, image: &[u8], offset: u64) -> Result<Vec<String>, Error> {
    let address = sleigh.address(offset);
    let mut ops = Vec::<PcodeData>::new();
    sleigh.one_instruction(image, &mut ops, &address)?;
    Ok(ops.iter().map(|op| op.display(sleigh).to_string()).collect())
}

fn assembly(sleigh: &mut Sleigh, image: &[u8], offset: u64) -> Result<String, Error> {
    let address = sleigh.address(offset);
    let mut text = String::new();
    sleigh.print_assembly(image, &mut text, &address)?;
    Ok(text)
}

/// The constant naming `ram` in LOAD and STORE.
fn ram_ref(sleigh: &Sleigh) -> String {
    let ram = sleigh.manager().default_space();
    let consts = sleigh.manager().constant_space();
    format!("{:#x}:{}", ram.index(), consts.address_size())
}

#[test]
fn nested_operands_print_through_their_tables() -> Result<(), Error> {
    let mut sleigh = memory_sleigh()?;

    assert_eq!(assembly(&mut sleigh, &[LDM], 0)?, "LDM [r0]");
    assert_eq!(assembly(&mut sleigh, &[LDM | 1], 0)?, "LDM [r1]");
    assert_eq!(assembly(&mut sleigh, &[STM], 0)?, "STM [r0]");
    assert_eq!(assembly(&mut sleigh, &[JMP], 0)?, "JMP");
    assert!(assembly(&mut sleigh, &[JMP | 1], 0).unwrap_err().is_bad_data());
    Ok(())
}

#[test]
fn exported_pointers_are_loaded() -> Result<(), Error> {
    let mut sleigh = memory_sleigh()?;
    let space = ram_ref(&sleigh);

    assert_eq!(
        pcode(&mut sleigh, &[LDM], 0)?,
        vec![
            format!("unique[0x80]:4 = LOAD {}, r0:4", space),
            "r1:4 = COPY unique[0x80]:4".to_owned(),
        ]
    );
    assert_eq!(
        pcode(&mut sleigh, &[LDM | 1], 0)?,
        vec![
            format!("unique[0x80]:4 = LOAD {}, r1:4", space),
            "r1:4 = COPY unique[0x80]:4".to_owned(),
        ]
    );
    Ok(())
}

#[test]
fn exported_pointers_are_stored() -> Result<(), Error> {
    let mut sleigh = memory_sleigh()?;
    let space = ram_ref(&sleigh);

    assert_eq!(
        pcode(&mut sleigh, &[STM], 0)?,
        vec![
            "unique[0x80]:4 = COPY r1:4".to_owned(),
            format!("STORE {}, r0:4, unique[0x80]:4", space),
        ]
    );
    Ok(())
}

#[test]
fn truncated_pointers_are_adjusted_first() -> Result<(), Error> {
    let mut sleigh = memory_sleigh()?;
    let space = ram_ref(&sleigh);

    assert_eq!(
        pcode(&mut sleigh, &[LDH], 0)?,
        vec![
            "unique[0x1100]:4 = INT_ADD r0:4, 0x2:4".to_owned(),
            format!("unique[0x82]:2 = LOAD {}, unique[0x1100]:4", space),
            "r0l:2 = COPY unique[0x82]:2".to_owned(),
        ]
    );
    Ok(())
}

#[test]
fn labels_resolve_within_each_constructor() -> Result<(), Error> {
    let mut sleigh = memory_sleigh()?;

    assert_eq!(
        pcode(&mut sleigh, &[JMP], 0)?,
        vec![
            "CBRANCH 0x2:4, r0:4",
            "r0:4 = COPY 0x0:4",
            "BRANCH 0x1:4",
            "r1:4 = COPY 0x1:4",
        ]
    );
    Ok(())
}

#[test]
fn unplaced_labels_are_reported() -> Result<(), Error> {
    let mut sleigh = memory_sleigh()?;

    match pcode(&mut sleigh, &[BAD], 0) {
        Err(Error::Specification(msg)) => assert!(msg.contains("non-existent sleigh label")),
        other => panic!("expected a label error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn cross_builds_descend_into_sections() -> Result<(), Error> {
    let mut sleigh = memory_sleigh()?;

    let image = [XB, LDM | 1];
    assert_eq!(pcode(&mut sleigh, &image, 0)?, vec!["r1:4 = INT_ADD r1:4, 0x1:4"]);

    let image = [XB, STM];
    assert_eq!(pcode(&mut sleigh, &image, 0)?, vec!["r0:4 = INT_ADD r0:4, 0x1:4"]);

    let image = [XB, JMP];
    assert!(pcode(&mut sleigh, &image, 0)?.is_empty());
    Ok(())
}

#[test]
fn nested_templates_survive_reloading() -> Result<(), Error> {
    let mut sleigh = memory_sleigh()?;
    let mut reloaded = Sleigh::from_str(&sleigh.to_xml())?;

    for image in [[LDM, 0], [STM | 1, 0], [LDH | 1, 0], [JMP, 0], [XB, LDM]] {
        assert_eq!(assembly(&mut reloaded, &image, 0)?, assembly(&mut sleigh, &image, 0)?);
        assert_eq!(pcode(&mut reloaded, &image, 0)?, pcode(&mut sleigh, &image, 0)?);
    }
    Ok(())
}
