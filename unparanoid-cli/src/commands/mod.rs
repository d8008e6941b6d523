pub mod common;
pub mod deobfuscate;
pub mod deobfuscate_string;
pub mod extract_chunks;
pub mod extract_strings;
