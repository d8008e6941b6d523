//! Run report types.
//!
//! A [`DeobfuscationReport`] lists every call site found with what happened to it, the
//! files that were written or skipped, and a summary of the decoders in the index.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    deobfuscation::{
        events::EventLog,
        index::{CallConvention, DescriptorStatus},
        locator::UnresolvedReason,
        scheme::SchemeVersion,
    },
    smali::JavaString,
    Error,
};

/// What happened to a call site.
#[derive(Debug)]
pub enum SiteStatus {
    /// Decoded and rewritten (or planned, in a dry run)
    Rewritten(JavaString),
    /// Key or chunks not statically known
    Unresolved(UnresolvedReason),
    /// The decoder's scheme is not supported
    Unsupported,
    /// Decoding or patching failed
    Failed(Error),
}

impl SiteStatus {
    /// Classify a site-level error.
    #[must_use]
    pub fn from_error(error: Error) -> Self {
        match error {
            Error::UnresolvedCallSite(reason) => SiteStatus::Unresolved(reason),
            Error::UnsupportedSchemeVersion { .. } => SiteStatus::Unsupported,
            other => SiteStatus::Failed(other),
        }
    }

    /// The recovered string, if the site was rewritten.
    #[must_use]
    pub fn plaintext(&self) -> Option<&JavaString> {
        match self {
            SiteStatus::Rewritten(value) => Some(value),
            _ => None,
        }
    }

    /// Short label for tables.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SiteStatus::Rewritten(_) => "rewritten",
            SiteStatus::Unresolved(_) => "unresolved",
            SiteStatus::Unsupported => "unsupported",
            SiteStatus::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteStatus::Rewritten(value) => write!(f, "{}", value.to_string_lossy()),
            SiteStatus::Unresolved(reason) => write!(f, "unresolved: {reason}"),
            SiteStatus::Unsupported => f.write_str("unsupported scheme"),
            SiteStatus::Failed(error) => write!(f, "{error}"),
        }
    }
}

/// Outcome of one call site.
#[derive(Debug)]
pub struct SiteOutcome {
    /// File containing the call
    pub path: PathBuf,
    /// 1-based line of the invoke
    pub line: usize,
    /// Enclosing method, `name(params)ret`
    pub method: String,
    /// Accessor called
    pub decoder: String,
    /// Key, if constant
    pub key: Option<i64>,
    /// What happened
    pub status: SiteStatus,
}

/// Outcome of one input file, recorded for files that were changed or skipped.
#[derive(Debug)]
pub struct FileOutcome {
    /// The input file
    pub path: PathBuf,
    /// Where the result was written, if anywhere
    pub written: Option<PathBuf>,
    /// Call sites rewritten in this file
    pub rewritten: usize,
    /// Members removed by pruning
    pub pruned: Vec<String>,
    /// Why the file was skipped
    pub error: Option<Error>,
}

impl FileOutcome {
    pub(crate) fn failed(path: &Path, error: Error) -> Self {
        Self {
            path: path.to_path_buf(),
            written: None,
            rewritten: 0,
            pruned: Vec::new(),
            error: Some(error),
        }
    }
}

/// Summary of one decoder in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSummary {
    /// Accessor called by sites
    pub accessor: String,
    /// Calling convention
    pub convention: CallConvention,
    /// Detected scheme
    pub scheme: Option<SchemeVersion>,
    /// Usability
    pub status: DescriptorStatus,
    /// Chunks in the decoder's table
    pub chunks: usize,
    /// Sites rewritten
    pub decoded: usize,
    /// Sites left untouched
    pub failed: usize,
}

/// Result of a run.
#[derive(Debug, Default)]
pub struct DeobfuscationReport {
    /// Input root
    pub root: PathBuf,
    /// Number of input files visited
    pub files_scanned: usize,
    /// Every call site found, ordered by file and line
    pub sites: Vec<SiteOutcome>,
    /// Files written or skipped
    pub files: Vec<FileOutcome>,
    /// Decoders in the index
    pub descriptors: Vec<DescriptorSummary>,
    /// Nothing was written
    pub dry_run: bool,
    /// All events of the run
    pub events: EventLog,
    /// Wall time
    pub total_time: Duration,
}

impl DeobfuscationReport {
    fn count(&self, predicate: impl Fn(&SiteStatus) -> bool) -> usize {
        self.sites.iter().filter(|s| predicate(&s.status)).count()
    }

    /// Sites rewritten.
    #[must_use]
    pub fn rewritten(&self) -> usize {
        self.count(|s| matches!(s, SiteStatus::Rewritten(_)))
    }

    /// Sites with non-constant arguments.
    #[must_use]
    pub fn unresolved(&self) -> usize {
        self.count(|s| matches!(s, SiteStatus::Unresolved(_)))
    }

    /// Sites whose decoder scheme is unsupported.
    #[must_use]
    pub fn unsupported(&self) -> usize {
        self.count(|s| matches!(s, SiteStatus::Unsupported))
    }

    /// Sites where decoding or patching failed.
    #[must_use]
    pub fn errored(&self) -> usize {
        self.count(|s| matches!(s, SiteStatus::Failed(_)))
    }

    /// Files skipped because they could not be read or parsed.
    #[must_use]
    pub fn malformed(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }

    /// Files written.
    #[must_use]
    pub fn files_written(&self) -> usize {
        self.files.iter().filter(|f| f.written.is_some()).count()
    }

    /// Returns true if every site was rewritten and every file was readable.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unresolved() == 0
            && self.unsupported() == 0
            && self.errored() == 0
            && self.malformed() == 0
    }

    /// The error strict mode raises for this report.
    #[must_use]
    pub fn strict_violation(&self) -> Option<Error> {
        (!self.is_clean()).then(|| Error::StrictModeViolation {
            unresolved: self.unresolved(),
            errored: self.errored(),
            unsupported: self.unsupported(),
            malformed: self.malformed(),
        })
    }

    /// Sites that were not rewritten.
    pub fn skipped(&self) -> impl Iterator<Item = &SiteOutcome> {
        self.sites
            .iter()
            .filter(|s| !matches!(s.status, SiteStatus::Rewritten(_)))
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} rewritten, {} unresolved, {} errored, {} unsupported in {} files ({} written, {} unreadable)",
            self.rewritten(),
            self.unresolved(),
            self.errored(),
            self.unsupported(),
            self.files_scanned,
            self.files_written(),
            self.malformed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(status: SiteStatus) -> SiteOutcome {
        SiteOutcome {
            path: PathBuf::from("a.smali"),
            line: 1,
            method: "run()V".to_string(),
            decoder: "La;->d(J)Ljava/lang/String;".to_string(),
            key: Some(1),
            status,
        }
    }

    #[test]
    fn test_counts() {
        let report = DeobfuscationReport {
            sites: vec![
                site(SiteStatus::Rewritten(JavaString::from_str("x"))),
                site(SiteStatus::Rewritten(JavaString::from_str("y"))),
                site(SiteStatus::from_error(Error::UnresolvedCallSite(
                    UnresolvedReason::NonConstantKey,
                ))),
                site(SiteStatus::from_error(Error::ChunkIndexOutOfRange {
                    index: 5,
                    len: 2,
                })),
                site(SiteStatus::from_error(Error::UnsupportedSchemeVersion {
                    decoder: "d".to_string(),
                })),
            ],
            files_scanned: 3,
            ..Default::default()
        };
        assert_eq!(report.rewritten(), 2);
        assert_eq!(report.unresolved(), 1);
        assert_eq!(report.errored(), 1);
        assert_eq!(report.unsupported(), 1);
        assert_eq!(report.skipped().count(), 3);
        assert!(!report.is_clean());
        assert!(matches!(
            report.strict_violation(),
            Some(Error::StrictModeViolation {
                unresolved: 1,
                errored: 1,
                unsupported: 1,
                malformed: 0
            })
        ));
        assert_eq!(
            report.summary(),
            "2 rewritten, 1 unresolved, 1 errored, 1 unsupported in 3 files (0 written, 0 unreadable)"
        );
    }

    #[test]
    fn test_clean() {
        let report = DeobfuscationReport::default();
        assert!(report.is_clean());
        assert!(report.strict_violation().is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(
            SiteStatus::Rewritten(JavaString::from_str("Hello")).to_string(),
            "Hello"
        );
        assert_eq!(
            SiteStatus::Unresolved(UnresolvedReason::MissingChunkTable).to_string(),
            "unresolved: missing chunk table"
        );
        assert_eq!(SiteStatus::Unsupported.label(), "unsupported");
    }
}
