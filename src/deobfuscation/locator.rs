//! Call-site discovery.
//!
//! Walks every method body of a file with a [`RegisterTracker`] and stops at each
//! `invoke-static` whose target is a known decoder accessor. At that point the tracker
//! knows which arguments are compile-time constants: the key register pair, and for
//! the key-plus-chunks convention, what the `String[]` argument holds. The matching
//! `move-result-object` (if any) is located so the patcher can replace the whole
//! sequence.
//!
//! Sites whose key or chunks are not constant are still reported, flagged with an
//! [`UnresolvedReason`], so the run summary can point at them.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::debug;
use strum::Display;

use crate::{
    deobfuscation::{
        index::{CallConvention, DecoderDescriptor, DescriptorIndex, DescriptorStatus},
        tracker::RegisterTracker,
    },
    smali::{
        ClassId, Directive, FieldRef, Instruction, InvokeKind, JavaString, LineKind, MethodDef,
        MethodRef, Register, SmaliFile,
    },
};

/// One chunk argument as seen at a call site.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkRef {
    /// A string literal loaded in the calling method
    Literal(JavaString),
    /// An entry of a static chunk table at a constant index
    Table {
        /// The table field
        field: FieldRef,
        /// Index into the table; may be out of range
        index: i64,
    },
}

/// What a call site binds as its chunk list.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkBinding {
    /// A whole static table, by reference
    Table(FieldRef),
    /// A locally built array; `None` entries are not statically known
    Elements(Vec<Option<ChunkRef>>),
}

/// Why a call site cannot be decoded statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnresolvedReason {
    /// The key is not a `const-wide` on the same straight-line path
    #[strum(to_string = "non-constant key")]
    NonConstantKey,
    /// The chunk array is not built from literals or table entries
    #[strum(to_string = "non-constant chunks")]
    NonConstantChunks,
    /// The decoder's chunk table was not found
    #[strum(to_string = "missing chunk table")]
    MissingChunkTable,
    /// The call does not pass the registers the signature requires
    #[strum(to_string = "unexpected arguments")]
    UnexpectedArguments,
}

/// The `move-result-object` picking up a decoder's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultMove {
    /// Line index of the `move-result-object`
    pub line: usize,
    /// Destination register
    pub register: Register,
}

/// A call to a decoder accessor.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    /// File containing the call
    pub path: PathBuf,
    /// 1-based line number of the invoke
    pub line: usize,
    /// Enclosing method
    pub method: MethodRef,
    /// Class of the decoder called, the key into the descriptor index
    pub decoder: ClassId,
    /// Accessor invoked
    pub target: MethodRef,
    /// Key passed, if constant
    pub key: Option<i64>,
    /// Chunks passed or implied, if known
    pub chunks: Option<ChunkBinding>,
    /// Line index of the invoke
    pub invoke: usize,
    /// Where the result is stored, if it is used
    pub result: Option<ResultMove>,
    /// Labels or directives sit between the invoke and its `move-result-object`
    pub bridged: bool,
    /// Set when the site cannot be decoded
    pub unresolved: Option<UnresolvedReason>,
}

impl CallSite {
    /// Returns `true` if key and chunks are both known.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_none()
    }

    /// Index of the last line belonging to the call sequence.
    #[must_use]
    pub fn last_line(&self) -> usize {
        self.result.map_or(self.invoke, |r| r.line)
    }
}

/// Find every decoder call site in `file`.
///
/// Calls made from inside decoder methods are part of the decoder itself and are
/// skipped.
#[must_use]
pub fn locate(file: &SmaliFile, path: &Path, index: &DescriptorIndex) -> Vec<CallSite> {
    let mut sites = Vec::new();
    for method in &file.methods {
        if index.is_decoder_method(&method.method) {
            continue;
        }
        locate_in_method(file, method, path, index, &mut sites);
    }
    sites
}

fn locate_in_method(
    file: &SmaliFile,
    method: &MethodDef,
    path: &Path,
    index: &DescriptorIndex,
    sites: &mut Vec<CallSite>,
) {
    let mut tracker = RegisterTracker::new(method.frame);

    for idx in method.body() {
        let instr = match &file.lines[idx].kind {
            LineKind::Label(name) => {
                tracker.label(name);
                continue;
            }
            LineKind::Instruction(instr) => instr,
            _ => continue,
        };

        if let Instruction::Invoke {
            kind: InvokeKind::Static,
            args,
            method: target,
        } = instr
        {
            if let Some(descriptor) = index.resolve(target) {
                let site = bind_site(file, method, path, idx, args, &descriptor, &tracker);
                debug!(
                    "{}:{}: call to {} (key {:?})",
                    path.display(),
                    site.line,
                    site.target,
                    site.key
                );
                sites.push(site);
            }
        }

        tracker.step(instr);
    }
}

fn bind_site(
    file: &SmaliFile,
    method: &MethodDef,
    path: &Path,
    idx: usize,
    args: &[Register],
    descriptor: &Arc<DecoderDescriptor>,
    tracker: &RegisterTracker,
) -> CallSite {
    let (result, bridged) = find_result(file, method, idx);

    let mut site = CallSite {
        path: path.to_path_buf(),
        line: file.lines[idx].number,
        method: method.method.clone(),
        decoder: descriptor.class.clone(),
        target: descriptor.accessor.clone(),
        key: None,
        chunks: None,
        invoke: idx,
        result,
        bridged,
        unresolved: None,
    };

    if args.len() != descriptor.accessor.param_words() {
        site.unresolved = Some(UnresolvedReason::UnexpectedArguments);
        return site;
    }

    site.key = tracker.wide_constant(args[0]);
    site.chunks = match descriptor.convention {
        CallConvention::KeyOnly => descriptor.table.clone().map(ChunkBinding::Table),
        CallConvention::KeyAndChunks => tracker.chunk_binding(args[2]),
    };

    site.unresolved = if site.key.is_none() {
        Some(UnresolvedReason::NonConstantKey)
    } else if descriptor.status() == DescriptorStatus::MissingChunkTable {
        Some(UnresolvedReason::MissingChunkTable)
    } else if site.chunks.is_none() {
        Some(UnresolvedReason::NonConstantChunks)
    } else {
        None
    };
    site
}

/// Find the `move-result-object` consuming the call at `idx`.
///
/// Returns the result move (if any) and whether labels or directives separate it from
/// the invoke.
fn find_result(file: &SmaliFile, method: &MethodDef, idx: usize) -> (Option<ResultMove>, bool) {
    let mut bridged = false;
    for next in idx + 1..method.end {
        let line = &file.lines[next];
        match &line.kind {
            LineKind::Blank | LineKind::Comment => {}
            LineKind::Label(_) | LineKind::Opaque => bridged = true,
            LineKind::Directive(Directive::EndMethod) => break,
            LineKind::Directive(_) => bridged = true,
            LineKind::Instruction(Instruction::MoveResult {
                dst, object: true, ..
            }) => {
                return (
                    Some(ResultMove {
                        line: next,
                        register: *dst,
                    }),
                    bridged,
                );
            }
            LineKind::Instruction(_) => break,
        }
    }
    (None, false)
}
