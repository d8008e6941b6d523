use std::{
    path::Path,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;
use serde::Serialize;
use unparanoid::deobfuscation::EngineConfig;

use crate::{
    app::GlobalOptions,
    commands::common::{build_engine, check_target, display_path, key_hex},
    output::print_output,
};

#[derive(Debug, Serialize)]
struct DecodedString {
    file: String,
    line: usize,
    key: String,
    value: String,
}

pub fn run(target: &Path, global: &GlobalOptions, cancel: &Arc<AtomicBool>) -> anyhow::Result<()> {
    check_target(target)?;
    let engine = build_engine(EngineConfig::default().with_dry_run(true), cancel);
    let analysis = engine
        .analyze(target)
        .with_context(|| format!("failed to analyze {}", target.display()))?;

    let strings: Vec<DecodedString> = analysis
        .decoded()
        .filter_map(|(site, value)| {
            Some(DecodedString {
                file: display_path(target, &site.path),
                line: site.line,
                key: key_hex(site.key?),
                value: value.to_string_lossy(),
            })
        })
        .collect();

    print_output(&strings, global, |strings| {
        for s in strings {
            println!("[{}]:{}", s.key, s.value);
        }
    })
}
