use std::ops::Range;

use thiserror::Error;

use crate::deobfuscation::UnresolvedReason;

macro_rules! malformed_error {
    // Single string version
    ($line:expr, $msg:expr) => {
        crate::Error::MalformedInput {
            message: $msg.to_string(),
            line: $line,
        }
    };

    // Format string with arguments version
    ($line:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedInput {
            message: format!($fmt, $($arg)*),
            line: $line,
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Per-file errors ([`Error::MalformedInput`], [`Error::FileError`])
/// are attributed to a single input file by the driver; the run continues with the remaining
/// files. Per-site errors ([`Error::UnresolvedCallSite`], [`Error::ChunkIndexOutOfRange`],
/// [`Error::ChunkOffsetOutOfRange`], [`Error::UnsupportedSchemeVersion`],
/// [`Error::EscapeOverflow`]) are attributed to a single call site, which is then left
/// untouched. Only [`Error::StrictModeViolation`], [`Error::Cancelled`] and errors raised
/// while enumerating the target directory abort a run.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::MalformedInput`] - A smali file could not be parsed
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// ## Call-Site Errors
/// - [`Error::UnresolvedCallSite`] - The key or chunks are not statically known
/// - [`Error::ChunkIndexOutOfRange`] - The decoder walked past the chunk table
/// - [`Error::ChunkOffsetOutOfRange`] - The decoder walked past the end of a chunk
/// - [`Error::UnsupportedSchemeVersion`] - No registered decoder handles the scheme
/// - [`Error::EscapeOverflow`] - The plaintext could not be re-emitted losslessly
///
/// ## Engine Errors
/// - [`Error::InvalidRewritePlan`] - A rewrite plan violated its ordering invariants
/// - [`Error::StrictModeViolation`] - Strict mode saw unresolved, failed or unsupported sites
/// - [`Error::Cancelled`] - The run was cancelled before completion
///
/// # Examples
///
/// ```rust,no_run
/// use unparanoid::{Error, deobfuscation::{DeobfuscationEngine, EngineConfig}};
/// use std::path::Path;
///
/// let engine = DeobfuscationEngine::new(EngineConfig::default());
/// match engine.process(Path::new("app/smali")) {
///     Ok(report) => println!("{} strings restored", report.rewritten()),
///     Err(Error::FileError(io_err)) => eprintln!("I/O error: {io_err}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `line` - 1-based line in the input where the problem was detected
    #[error("Malformed input - line {line}: {message}")]
    MalformedInput {
        /// The message to be printed for the MalformedInput error
        message: String,
        /// The input line on which this error occured
        line: usize,
    },

    /// The key or the chunk binding of a call site is not a compile-time constant.
    #[error("Unresolved call site: {0}")]
    UnresolvedCallSite(UnresolvedReason),

    /// The decode walk selected a chunk number outside the bound chunk list.
    ///
    /// Negative character indices also end up here.
    #[error("Chunk index {index} out of range (table holds {len} chunks)")]
    ChunkIndexOutOfRange {
        /// The chunk number (or the raw character index if negative)
        index: i64,
        /// Number of chunks bound at the call site
        len: usize,
    },

    /// The decode walk selected an offset past the end of a (short) chunk.
    #[error("Offset {offset} out of range for chunk {chunk} of length {len}")]
    ChunkOffsetOutOfRange {
        /// The chunk number
        chunk: usize,
        /// The offset inside the chunk
        offset: usize,
        /// Length of the chunk in UTF-16 code units
        len: usize,
    },

    /// The decoder descriptor carries a scheme no registered decoder supports.
    #[error("Unsupported scheme version for decoder {decoder}")]
    UnsupportedSchemeVersion {
        /// The accessor the descriptor was built from
        decoder: String,
    },

    /// The escaped literal does not parse back to the recovered plaintext.
    #[error("Escaped literal does not round-trip ({units} code units)")]
    EscapeOverflow {
        /// Length of the plaintext in UTF-16 code units
        units: usize,
    },

    /// A rewrite plan contained overlapping or out-of-bounds edits.
    #[error("Invalid rewrite plan: edits {first:?} and {second:?} conflict")]
    InvalidRewritePlan {
        /// The earlier edit span
        first: Range<usize>,
        /// The conflicting edit span
        second: Range<usize>,
    },

    /// Strict mode was requested and the run was not clean.
    #[error("Strict mode: {unresolved} unresolved, {errored} failed, {unsupported} unsupported sites, {malformed} unreadable files")]
    StrictModeViolation {
        /// Unresolved call sites
        unresolved: usize,
        /// Call sites whose decode or patch failed
        errored: usize,
        /// Call sites targeting a decoder with an unknown scheme
        unsupported: usize,
        /// Files that failed to parse or read
        malformed: usize,
    },

    /// The run was cancelled before all files were processed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Filesystem I/O errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl From<walkdir::Error> for Error {
    fn from(error: walkdir::Error) -> Self {
        match error.into_io_error() {
            Some(io) => Error::FileError(io),
            None => Error::Error("filesystem loop while walking the target tree".to_string()),
        }
    }
}

impl Error {
    /// Attach an input line number to a [`Error::MalformedInput`] raised by a line-agnostic
    /// helper. Other variants pass through unchanged.
    #[must_use]
    pub fn at_line(self, line: usize) -> Self {
        match self {
            Error::MalformedInput { message, .. } => Error::MalformedInput { message, line },
            other => other,
        }
    }

    /// Returns `true` for errors confined to a single call site.
    ///
    /// The driver records these against the site and keeps going.
    #[must_use]
    pub fn is_site_local(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedCallSite(_)
                | Error::ChunkIndexOutOfRange { .. }
                | Error::ChunkOffsetOutOfRange { .. }
                | Error::UnsupportedSchemeVersion { .. }
                | Error::EscapeOverflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_macro() {
        let err = malformed_error!(12, "unterminated method {}", "onCreate");
        match err {
            Error::MalformedInput { message, line } => {
                assert_eq!(line, 12);
                assert_eq!(message, "unterminated method onCreate");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_site_local() {
        assert!(Error::ChunkIndexOutOfRange { index: 5, len: 2 }.is_site_local());
        assert!(Error::UnresolvedCallSite(UnresolvedReason::NonConstantKey).is_site_local());
        assert!(!Error::Cancelled.is_site_local());
        assert!(!malformed_error!(1, "x").is_site_local());
    }

    #[test]
    fn test_display() {
        let err = Error::ChunkIndexOutOfRange { index: 5, len: 2 };
        assert_eq!(
            err.to_string(),
            "Chunk index 5 out of range (table holds 2 chunks)"
        );
    }
}
