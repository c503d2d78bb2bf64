use criterion::{criterion_group, criterion_main, Criterion};

use sleigh_decode::disassembly::Error;
use sleigh_decode::sleigh::Sleigh;
use sleigh_decode::PcodeData;

#[path = "../tests/common/mod.rs"]
mod common;

fn criterion_build_patterns(c: &mut Criterion) {
    c.bench_function("Sleigh::new(toy)", |b| {
        b.iter(|| -> Result<(), Error> {
            let spaces = common::spaces();
            let grammar = common::grammar(&spaces)?;
            Sleigh::new(common::config(), spaces, grammar.table)?;
            Ok(())
        })
    });
}

fn criterion_decode(c: &mut Criterion) {
    let mut sleigh = common::sleigh().expect("toy specification");
    let image = (0..0x100u32).map(|b| (b & 0x7f) as u8).collect::<Vec<_>>();

    c.bench_function("Sleigh::print_assembly(toy)", |b| {
        let mut text = String::new();
        b.iter(|| -> Result<(), Error> {
            for offset in 0..0x100 {
                let address = sleigh.address(offset);
                sleigh.print_assembly(&image, &mut text, &address)?;
            }
            Ok(())
        })
    });

    c.bench_function("Sleigh::one_instruction(toy)", |b| {
        let mut ops = Vec::<PcodeData>::new();
        b.iter(|| -> Result<(), Error> {
            for offset in 0..0x100 {
                let address = sleigh.address(offset);
                ops.clear();
                sleigh.one_instruction(&image, &mut ops, &address)?;
            }
            Ok(())
        })
    });
}

criterion_group!(benches, criterion_build_patterns, criterion_decode);
criterion_main!(benches);
