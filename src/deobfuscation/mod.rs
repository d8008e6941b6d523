//! Static reversal of Paranoid string encryption in smali.
//!
//! Paranoid replaces every string literal in an app with a call to a generated
//! accessor, `getString(J)Ljava/lang/String;`, passing a 64-bit key. The accessor walks
//! a table of scrambled UTF-16 chunks built by its class initializer. This module finds
//! those accessors and tables, recovers each string offline and writes the literal back
//! into the call site.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Deobfuscation Pipeline                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  Input: directory of .smali files                                       │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  Phase 1 (parallel per file): Scanner                           │    │
//! │  │  chunk tables, decoder-shaped methods, call edges, fingerprints │    │
//! │  └────────────────────────────────┬────────────────────────────────┘    │
//! │                                   ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  Link: DescriptorIndex                                          │    │
//! │  │  fingerprint closure → scheme, one descriptor per class         │    │
//! │  └────────────────────────────────┬────────────────────────────────┘    │
//! │                                   ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  Phase 2 (parallel per file)                                    │    │
//! │  │  Locator → Extractor → Decoder → Patcher  ⇒  RewritePlan        │    │
//! │  └────────────────────────────────┬────────────────────────────────┘    │
//! │                                   ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  Commit: strict check → prune (optional) → atomic write         │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  Output: DeobfuscationReport (sites, files, descriptors, events)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - [`DeobfuscationEngine`] - Drives a run; entry point for most users
//! - [`EngineConfig`] - Strictness, pruning, output location, threads
//! - [`DescriptorIndex`] - Decoders and chunk tables shared by all files
//! - [`Decoder`] / [`DecoderRegistry`] - Versioned decoding schemes
//! - [`RewritePlan`] - Non-overlapping byte-span edits of one file
//! - [`DeobfuscationReport`] - Per-site and per-file outcomes
//!
//! Call sites that cannot be decoded are never fatal: they stay untouched and are
//! reported with the reason.

mod config;
mod engine;
mod events;
mod extractor;
mod index;
mod locator;
mod patcher;
mod prune;
mod report;
mod scanner;
pub mod scheme;
mod tracker;

pub use config::EngineConfig;
pub use engine::{Analysis, DeobfuscationEngine, IndexedTree};
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use extractor::{extract, Chunks};
pub use index::{
    CallConvention, ChunkTable, DecoderDescriptor, DescriptorIndex, DescriptorStatus,
};
pub use locator::{locate, CallSite, ChunkBinding, ChunkRef, ResultMove, UnresolvedReason};
pub use patcher::{render_literal, rewrite_site, Edit, RewritePlan};
pub use prune::prune;
pub use report::{DeobfuscationReport, DescriptorSummary, FileOutcome, SiteOutcome, SiteStatus};
pub use scanner::{is_helper_shaped, scan, DecoderCandidate, MethodSummary, ScanOutput};
pub use scheme::{Decoder, DecoderRegistry, SchemeVersion};
