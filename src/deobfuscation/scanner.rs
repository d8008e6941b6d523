//! Per-file discovery of chunk tables and decoder-shaped methods.
//!
//! The scanner looks at one parsed file in isolation and reports:
//!
//! - chunk tables: static `String[]` fields of the class that its `<clinit>` stores a
//!   fully literal array into;
//! - decoder candidates: static methods shaped like a key-only accessor
//!   `(J)Ljava/lang/String;` or a key-plus-chunks helper
//!   `(J[Ljava/lang/String;)Ljava/lang/String;`;
//! - method summaries: static call edges and fingerprint constants, which the
//!   [`DescriptorIndex`](crate::deobfuscation::DescriptorIndex) follows across files to
//!   decide which scheme a candidate belongs to;
//! - table reads: every method outside a class's own initializer that loads a static
//!   `String[]` field, so pruning never deletes a table something else still reads.
//!
//! Nothing here depends on names: minified decoders are found by shape alone.

use std::path::{Path, PathBuf};

use crate::{
    deobfuscation::{
        index::{CallConvention, ChunkTable},
        scheme::DecoderRegistry,
        tracker::RegisterTracker,
    },
    smali::{
        AccessFlags, FieldRef, Instruction, InvokeKind, JavaString, LineKind, MethodDef, MethodRef,
        SmaliFile, STRING_ARRAY_TYPE, STRING_TYPE,
    },
};

/// A method whose signature matches one of the decoder calling conventions.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderCandidate {
    /// The candidate method
    pub method: MethodRef,
    /// Calling convention implied by its signature
    pub convention: CallConvention,
    /// Static `String[]` fields the method reads
    pub tables_read: Vec<FieldRef>,
    /// File declaring the method
    pub path: PathBuf,
}

/// Static call edges and fingerprint constants of one method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodSummary {
    /// Targets of `invoke-static`
    pub static_calls: Vec<MethodRef>,
    /// 64-bit literals that belong to a registered fingerprint
    pub constants: Vec<u64>,
}

/// Everything the scanner found in one file.
#[derive(Debug, Default)]
pub struct ScanOutput {
    /// Literal chunk tables initialised by the class
    pub tables: Vec<ChunkTable>,
    /// Decoder-shaped methods
    pub candidates: Vec<DecoderCandidate>,
    /// Summaries of methods with static calls or fingerprint constants
    pub summaries: Vec<(MethodRef, MethodSummary)>,
    /// `sget-object` of a `String[]` field and the method doing it
    pub table_reads: Vec<(FieldRef, MethodRef)>,
}

impl ScanOutput {
    /// Returns `true` if the file contributes nothing to the index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.candidates.is_empty()
            && self.summaries.is_empty()
            && self.table_reads.is_empty()
    }
}

/// Scan a parsed file.
#[must_use]
pub fn scan(file: &SmaliFile, path: &Path, registry: &DecoderRegistry) -> ScanOutput {
    let mut output = ScanOutput::default();

    for method in &file.methods {
        if method.is_class_initializer() {
            output.tables.extend(scan_initializer(file, method, path));
        }

        let summary = summarize(file, method, registry);
        let read = tables_read(file, method);
        // Own initializer reads are the javac fill pattern
        for field in &read {
            if !(method.is_class_initializer() && field.class == file.class) {
                output.table_reads.push((field.clone(), method.method.clone()));
            }
        }
        if let Some(convention) = convention_of(method) {
            output.candidates.push(DecoderCandidate {
                method: method.method.clone(),
                convention,
                tables_read: read,
                path: path.to_path_buf(),
            });
        }
        if !summary.static_calls.is_empty() || !summary.constants.is_empty() {
            output.summaries.push((method.method.clone(), summary));
        }
    }

    output
}

fn convention_of(method: &MethodDef) -> Option<CallConvention> {
    if !method.is_static() {
        return None;
    }
    if method.method.has_shape(&["J"], STRING_TYPE) {
        Some(CallConvention::KeyOnly)
    } else if method.method.has_shape(&["J", STRING_ARRAY_TYPE], STRING_TYPE) {
        Some(CallConvention::KeyAndChunks)
    } else {
        None
    }
}

/// Returns `true` for `(J[Ljava/lang/String;)Ljava/lang/String;` signatures.
#[must_use]
pub fn is_helper_shaped(method: &MethodRef) -> bool {
    method.has_shape(&["J", STRING_ARRAY_TYPE], STRING_TYPE)
}

fn tables_read(file: &SmaliFile, method: &MethodDef) -> Vec<FieldRef> {
    let mut fields: Vec<FieldRef> = Vec::new();
    for (_, instr) in file.instructions(method) {
        if let Instruction::StaticGet { field, .. } = instr {
            if field.is_string_array() && !fields.contains(field) {
                fields.push(field.clone());
            }
        }
    }
    fields
}

fn summarize(file: &SmaliFile, method: &MethodDef, registry: &DecoderRegistry) -> MethodSummary {
    let mut summary = MethodSummary::default();
    for (_, instr) in file.instructions(method) {
        match instr {
            Instruction::Invoke {
                kind: InvokeKind::Static,
                method: target,
                ..
            } => {
                if !summary.static_calls.contains(target) {
                    summary.static_calls.push(target.clone());
                }
            }
            Instruction::ConstWide { value, .. } => {
                let constant = *value as u64;
                if registry.is_fingerprint_constant(constant)
                    && !summary.constants.contains(&constant)
                {
                    summary.constants.push(constant);
                }
            }
            _ => {}
        }
    }
    summary
}

/// Find `sput-object` stores of fully literal `String[]` arrays into static fields of
/// this class.
///
/// Both shapes compilers emit are accepted: the array filled first and stored last, and
/// the empty array stored first and filled through `sget-object`/`aput-object`.
fn scan_initializer(file: &SmaliFile, method: &MethodDef, path: &Path) -> Vec<ChunkTable> {
    let mut tracker = RegisterTracker::new(method.frame);
    let mut stored: Vec<(FieldRef, Option<Vec<JavaString>>)> = Vec::new();
    let mut pure = true;

    for idx in method.body() {
        match &file.lines[idx].kind {
            LineKind::Label(name) => tracker.label(name),
            LineKind::Instruction(instr) => {
                if let Instruction::StaticPut { src, field } = instr {
                    let declared_static = field.class == file.class
                        && file
                            .field(field)
                            .is_some_and(|decl| decl.flags.contains(AccessFlags::STATIC));
                    if declared_static && field.is_string_array() && tracker.holds_array(*src) {
                        let snapshot = tracker.array_literals(*src);
                        stored.retain(|(f, _)| f != field);
                        stored.push((field.clone(), snapshot));
                    } else {
                        pure = false;
                    }
                } else if !is_table_construction(instr) {
                    pure = false;
                }
                tracker.step(instr);
            }
            LineKind::Directive(_) | LineKind::Blank | LineKind::Comment | LineKind::Opaque => {}
        }
    }

    // Later calls poison escaped arrays; fall back to the contents seen at the store
    stored
        .into_iter()
        .filter_map(|(field, snapshot)| {
            let chunks = tracker.stored_literals(&field).or(snapshot)?;
            Some(ChunkTable {
                field,
                chunks,
                path: path.to_path_buf(),
                prunable_initializer: pure,
            })
        })
        .collect()
}

fn is_table_construction(instr: &Instruction) -> bool {
    match instr {
        Instruction::Const { .. }
        | Instruction::ConstString { .. }
        | Instruction::NewArray { .. }
        | Instruction::FilledNewArray { .. }
        | Instruction::ArrayPutObject { .. }
        | Instruction::MoveResult { .. }
        | Instruction::Nop => true,
        Instruction::StaticGet { field, .. } => field.is_string_array(),
        Instruction::Other { mnemonic, .. } => mnemonic == "return-void",
        _ => false,
    }
}
