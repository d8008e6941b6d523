#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use unparanoid::{
    deobfuscation::{scan, DecoderRegistry},
    smali::SmaliFile,
};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(file) = SmaliFile::parse(source) {
        let _ = scan(&file, Path::new("fuzz.smali"), &DecoderRegistry::new());
    }
});
