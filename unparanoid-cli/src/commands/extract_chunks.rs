use std::{
    path::Path,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use unparanoid::deobfuscation::EngineConfig;

use crate::{
    app::GlobalOptions,
    commands::common::{build_engine, check_target, display_path, escaped},
};

/// Chunk tables as written by `extract-chunks` and read by `deobfuscate-string --chunks`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkFile {
    pub tables: Vec<TableEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TableEntry {
    /// Full field reference, `Lcls;->name:[Ljava/lang/String;`
    pub field: String,
    pub file: String,
    /// Accessors reading this table
    #[serde(default)]
    pub decoders: Vec<String>,
    /// Entries escaped with the smali literal grammar
    pub chunks: Vec<String>,
}

pub fn run(
    target: &Path,
    output: Option<&Path>,
    global: &GlobalOptions,
    cancel: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    check_target(target)?;
    let engine = build_engine(EngineConfig::default(), cancel);
    let tree = engine
        .index(target)
        .with_context(|| format!("failed to scan {}", target.display()))?;

    let descriptors = tree.index.descriptors();
    let tables: Vec<TableEntry> = tree
        .index
        .tables()
        .iter()
        .map(|table| TableEntry {
            field: table.field.to_string(),
            file: display_path(target, &table.path),
            decoders: descriptors
                .iter()
                .filter(|d| d.table.as_ref() == Some(&table.field))
                .map(|d| d.accessor.to_string())
                .collect(),
            chunks: table.chunks.iter().map(escaped).collect(),
        })
        .collect();
    let file = ChunkFile { tables };

    let json = serde_json::to_string_pretty(&file)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write chunks: {}", path.display()))?;
            if !global.json {
                eprintln!(
                    "{} chunk tables written to {}",
                    file.tables.len(),
                    path.display()
                );
            }
        }
        None => println!("{json}"),
    }

    for failure in &tree.failures {
        if let Some(error) = &failure.error {
            log::warn!("{}: {error}", failure.path.display());
        }
    }
    Ok(())
}
