use std::{
    path::Path,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;
use unparanoid::{
    deobfuscation::{DeobfuscationEngine, EngineConfig},
    smali::{literal, JavaString},
};

/// Build an engine that stops when `cancel` is set.
pub fn build_engine(config: EngineConfig, cancel: &Arc<AtomicBool>) -> DeobfuscationEngine {
    DeobfuscationEngine::new(config).with_cancellation(Arc::clone(cancel))
}

/// Fail early with a readable message if the target does not exist.
pub fn check_target(target: &Path) -> anyhow::Result<()> {
    std::fs::metadata(target)
        .map(|_| ())
        .with_context(|| format!("cannot read target: {}", target.display()))
}

/// `path` relative to `root` for display, or the full path if it is not below it.
pub fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(path)
        .display()
        .to_string()
}

/// A Java string escaped with the smali literal grammar, without quotes.
pub fn escaped(value: &JavaString) -> String {
    literal::escape(value.as_slice())
}

/// A key as two's-complement hex, which `parse_key` accepts back.
pub fn key_hex(key: i64) -> String {
    format!("{key:#x}")
}

/// Parse a key in decimal or hex, with an optional smali `L` suffix.
pub fn parse_key(text: &str) -> anyhow::Result<i64> {
    literal::parse_integer(text).with_context(|| format!("invalid key: {text}"))
}
