use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// unparanoid - recover Paranoid-encrypted strings in smali
#[derive(Debug, Parser)]
#[command(name = "unparanoid", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode every encrypted string under a smali tree and write the literals back.
    Deobfuscate {
        /// Directory of .smali files (or a single file).
        #[arg(value_name = "TARGET")]
        target: PathBuf,

        /// Write rewritten files under DIR, mirroring the input layout, instead of in place.
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Fail without writing anything if any call site cannot be decoded.
        #[arg(long)]
        strict: bool,

        /// Remove decoder accessors (and their tables when safe) once fully decoded.
        #[arg(long)]
        prune: bool,

        /// Decode and report without writing any file.
        #[arg(long)]
        dry_run: bool,

        /// Number of worker threads.
        #[arg(short = 'j', long, value_name = "N")]
        threads: Option<usize>,

        /// Write the full JSON report to FILE.
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// List every call site that was left untouched.
        #[arg(long)]
        detailed: bool,
    },

    /// Dump the chunk tables found under a smali tree as JSON.
    ExtractChunks {
        /// Directory of .smali files (or a single file).
        #[arg(value_name = "TARGET")]
        target: PathBuf,

        /// Write the JSON to this file instead of stdout.
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Print every decodable string with its key, without modifying files.
    ExtractStrings {
        /// Directory of .smali files (or a single file).
        #[arg(value_name = "TARGET")]
        target: PathBuf,
    },

    /// Decode a single key against explicit chunks.
    DeobfuscateString {
        /// Key in decimal or hex (`-0x1fL` style accepted).
        #[arg(value_name = "KEY", allow_hyphen_values = true)]
        key: String,

        /// Chunks as smali string bodies (escapes allowed, no quotes).
        #[arg(value_name = "CHUNK", allow_hyphen_values = true)]
        chunks: Vec<String>,

        /// Read chunks from a file written by `extract-chunks`.
        #[arg(long = "chunks", value_name = "FILE", conflicts_with = "chunks")]
        chunks_file: Option<PathBuf>,

        /// Table to use from the chunks file (field name or full reference).
        #[arg(long, value_name = "FIELD", requires = "chunks_file")]
        table: Option<String>,

        /// Scheme version.
        #[arg(long, default_value = "v1")]
        scheme: String,
    },
}
