//! Configuration for the deobfuscation engine.
//!
//! This module provides the configuration type controlling which files are visited,
//! how output is written and how strictly call sites that cannot be decoded are
//! treated.

use std::path::PathBuf;

/// Configuration for the deobfuscation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Fail the run if any call site is unresolved, failed or unsupported, or any file
    /// could not be read (default: false). Checked before anything is written.
    pub strict: bool,

    /// Remove decoder accessors (and their tables when safe) once every call site
    /// was rewritten (default: false).
    pub prune_decoders: bool,

    /// Decode and plan rewrites without writing any file (default: false).
    pub dry_run: bool,

    /// Write rewritten files under this directory, mirroring the input layout.
    /// Files are rewritten in place when unset.
    pub output_dir: Option<PathBuf>,

    /// Worker threads for both phases. `None` uses the global rayon pool.
    pub threads: Option<usize>,

    /// File extensions (without dot) treated as input (default: `smali`).
    pub extensions: Vec<String>,

    /// How many static calls deep fingerprint constants are collected from a decoder
    /// candidate (default: 4).
    pub max_fingerprint_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict: false,
            prune_decoders: false,
            dry_run: false,
            output_dir: None,
            threads: None,
            extensions: vec!["smali".to_string()],
            max_fingerprint_depth: 4,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default settings.
    ///
    /// Equivalent to [`EngineConfig::default()`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a strict configuration: any site left untouched fails the run.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Enables or disables strict mode.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Enables or disables decoder pruning.
    #[must_use]
    pub fn with_pruning(mut self, prune: bool) -> Self {
        self.prune_decoders = prune;
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the output directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - Root under which rewritten files are written, mirroring the input
    ///   tree.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Sets the input file extensions.
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the fingerprint search depth.
    #[must_use]
    pub fn with_max_fingerprint_depth(mut self, depth: usize) -> Self {
        self.max_fingerprint_depth = depth;
        self
    }

    /// Returns true if files are written (not a dry run).
    #[must_use]
    pub fn writes_output(&self) -> bool {
        !self.dry_run
    }
}
