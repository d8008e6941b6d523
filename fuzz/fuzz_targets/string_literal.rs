#![no_main]

use libfuzzer_sys::fuzz_target;
use unparanoid::smali::literal::{escape, unescape};

fuzz_target!(|data: &[u8]| {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let escaped = escape(&units);
    let back = unescape(&escaped).expect("escaped literal must parse");
    assert_eq!(back.as_slice(), units.as_slice());
});
