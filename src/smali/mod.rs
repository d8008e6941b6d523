//! Smali text model.
//!
//! A lossless, line-oriented view of baksmali output: enough structure to find
//! classes, fields, methods and the instructions the deobfuscator cares about,
//! while keeping byte spans into the original text for surgical rewrites.
//!
//! # Key Components
//!
//! - [`SmaliFile`] - Parsed file with per-line spans and classification
//! - [`Instruction`] - Decoded instruction subset with opaque fallback
//! - [`literal`] - String literal escaping and integer literal parsing
//! - [`MethodRef`], [`FieldRef`], [`ClassId`] - Member references

mod document;
mod instruction;
pub mod literal;
mod types;

pub use document::{Directive, FieldDecl, Line, LineKind, MethodDef, RegisterFrame, SmaliFile};
pub use instruction::{Instruction, InvokeKind, Register};
pub use literal::JavaString;
pub use types::{
    parse_type_list, type_words, AccessFlags, ClassId, FieldRef, MethodRef, STRING_ARRAY_TYPE,
    STRING_TYPE,
};
