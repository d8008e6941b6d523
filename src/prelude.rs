//! # unparanoid Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the library. Import it to drive a run and inspect its report.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all operations
pub use crate::Error;

/// The result type used throughout the crate
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Engine and its configuration
pub use crate::deobfuscation::{Analysis, DeobfuscationEngine, EngineConfig, IndexedTree};

/// Run results
pub use crate::deobfuscation::{
    DeobfuscationReport, DescriptorSummary, EventKind, EventLog, FileOutcome, SiteOutcome,
    SiteStatus,
};

// ================================================================================================
// Decoders
// ================================================================================================

/// Scheme registry and the decoder trait
pub use crate::deobfuscation::{Decoder, DecoderRegistry, SchemeVersion};

/// Decoder descriptors
pub use crate::deobfuscation::{
    CallConvention, ChunkTable, DecoderDescriptor, DescriptorIndex, DescriptorStatus,
};

// ================================================================================================
// Smali Model
// ================================================================================================

/// Parsed files and member references
pub use crate::smali::{ClassId, FieldRef, JavaString, MethodRef, SmaliFile};
