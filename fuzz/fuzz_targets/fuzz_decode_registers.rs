#![no_main]
use devgate::codec::{DataKind, decode_registers, decode_string};
use libfuzzer_sys::fuzz_target;

const KINDS: [DataKind; 9] = [
    DataKind::Raw,
    DataKind::U16,
    DataKind::I16,
    DataKind::U32,
    DataKind::I32,
    DataKind::F32,
    DataKind::F64,
    DataKind::Bool,
    DataKind::String,
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };

    // Interpret the remaining input as a big-endian register stream
    let regs: Vec<u16> = rest
        .chunks_exact(2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .collect();

    let kind = KINDS[usize::from(selector) % KINDS.len()];
    let scale = (selector & 0x80 != 0).then_some(0.1);
    let _ = decode_registers(kind, &regs, scale);
    let _ = decode_string(&regs, Some(32));
});
