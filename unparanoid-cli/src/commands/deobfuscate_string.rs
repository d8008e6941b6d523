use std::{path::Path, str::FromStr};

use anyhow::{bail, Context};
use serde::Serialize;
use unparanoid::{
    deobfuscation::{DecoderRegistry, SchemeVersion},
    smali::{literal, JavaString},
};

use crate::{
    app::GlobalOptions,
    commands::{
        common::{escaped, key_hex, parse_key},
        extract_chunks::{ChunkFile, TableEntry},
    },
    output::print_output,
};

#[derive(Debug, Serialize)]
struct Decoded {
    key: String,
    scheme: String,
    value: String,
    escaped: String,
}

pub fn run(
    key: &str,
    chunks: &[String],
    chunks_file: Option<&Path>,
    table: Option<&str>,
    scheme: &str,
    global: &GlobalOptions,
) -> anyhow::Result<()> {
    let key = parse_key(key)?;
    let version = SchemeVersion::from_str(scheme)
        .map_err(|_| anyhow::anyhow!("unknown scheme version: {scheme}"))?;

    let chunks = match chunks_file {
        Some(path) => load_chunks(path, table)?,
        None => parse_chunks(chunks)?,
    };

    let value = DecoderRegistry::new()
        .decode(Some(version), "command line", key, &chunks)
        .with_context(|| format!("cannot decode key {}", key_hex(key)))?;

    let decoded = Decoded {
        key: key_hex(key),
        scheme: version.to_string(),
        value: value.to_string_lossy(),
        escaped: escaped(&value),
    };
    print_output(&decoded, global, |d| println!("{}", d.value))
}

fn parse_chunks(chunks: &[String]) -> anyhow::Result<Vec<JavaString>> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| literal::unescape(c).with_context(|| format!("invalid chunk #{i}")))
        .collect()
}

fn load_chunks(path: &Path, table: Option<&str>) -> anyhow::Result<Vec<JavaString>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read chunks: {}", path.display()))?;
    let file: ChunkFile = serde_json::from_str(&text)
        .with_context(|| format!("invalid chunks file: {}", path.display()))?;

    let entry = select_table(&file.tables, table)?;
    entry
        .chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            literal::unescape(c)
                .with_context(|| format!("invalid chunk #{i} in {}", entry.field))
        })
        .collect()
}

fn select_table<'a>(tables: &'a [TableEntry], name: Option<&str>) -> anyhow::Result<&'a TableEntry> {
    match name {
        Some(name) => tables
            .iter()
            .find(|t| t.field == name || field_name(&t.field) == name)
            .with_context(|| format!("no table named {name}")),
        None => match tables {
            [only] => Ok(only),
            [] => bail!("chunks file holds no table"),
            _ => bail!(
                "chunks file holds {} tables, pick one with --table",
                tables.len()
            ),
        },
    }
}

fn field_name(field: &str) -> &str {
    let member = field.split_once("->").map_or(field, |(_, m)| m);
    member.split_once(':').map_or(member, |(n, _)| n)
}
