//! Main deobfuscation engine.
//!
//! The [`DeobfuscationEngine`] drives a run over a tree of smali files:
//!
//! 1. **Discovery**: walk the input root for `*.smali` files (sorted, so runs are
//!    reproducible)
//! 2. **Indexing**: scan every file in parallel and link the results into one
//!    [`DescriptorIndex`]; a decoder may be called from any file, so this completes
//!    before anything is located
//! 3. **Planning**: per file, in parallel, locate call sites, extract their chunks,
//!    decode and compute a [`RewritePlan`]
//! 4. **Commit**: unless strict mode rejects the run, optionally prune dead decoders
//!    and write every changed file atomically
//!
//! Cancellation is checked before each file of each phase.
//!
//! # Example
//!
//! ```rust,no_run
//! use unparanoid::deobfuscation::{DeobfuscationEngine, EngineConfig};
//! use std::path::Path;
//!
//! let engine = DeobfuscationEngine::new(EngineConfig::default().with_pruning(true));
//! let report = engine.process(Path::new("app/smali"))?;
//! println!("{}", report.summary());
//! # Ok::<(), unparanoid::Error>(())
//! ```

use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use log::{debug, info, warn};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::{
    deobfuscation::{
        config::EngineConfig,
        events::{EventKind, EventLog},
        extractor::extract,
        index::DescriptorIndex,
        locator::{locate, CallSite, UnresolvedReason},
        patcher::{rewrite_site, Edit, RewritePlan},
        prune::prune,
        report::{DeobfuscationReport, DescriptorSummary, FileOutcome, SiteOutcome, SiteStatus},
        scanner::{scan, ScanOutput},
        scheme::DecoderRegistry,
    },
    smali::{JavaString, SmaliFile},
    Error, Result,
};

/// Result of the indexing phase.
#[derive(Debug)]
pub struct IndexedTree {
    /// Input root
    pub root: PathBuf,
    /// Input files, sorted
    pub files: Vec<PathBuf>,
    /// The linked index
    pub index: DescriptorIndex,
    /// Files that could not be read or parsed
    pub failures: Vec<FileOutcome>,
    /// Events so far
    pub events: EventLog,
}

/// Result of the planning phase: every call site decoded, nothing written yet.
#[derive(Debug)]
pub struct Analysis {
    /// Input root
    pub root: PathBuf,
    /// Input files, sorted
    pub files: Vec<PathBuf>,
    /// The linked index, with per-decoder outcome counts
    pub index: DescriptorIndex,
    /// Every call site, ordered by file and line
    pub sites: Vec<SiteOutcome>,
    /// Files that could not be read or parsed
    pub failures: Vec<FileOutcome>,
    /// Events so far
    pub events: EventLog,
    pending: Vec<PendingFile>,
    started: Instant,
}

impl Analysis {
    /// Decoded strings with their sites.
    pub fn decoded(&self) -> impl Iterator<Item = (&SiteOutcome, &JavaString)> {
        self.sites
            .iter()
            .filter_map(|site| site.status.plaintext().map(|value| (site, value)))
    }

    fn descriptor_summaries(&self) -> Vec<DescriptorSummary> {
        self.index
            .descriptors()
            .iter()
            .map(|d| DescriptorSummary {
                accessor: d.accessor.to_string(),
                convention: d.convention,
                scheme: d.scheme,
                status: d.status(),
                chunks: d
                    .table
                    .as_ref()
                    .and_then(|t| self.index.table(t))
                    .map_or(0, |t| t.chunks.len()),
                decoded: self.index.decoded_count(&d.class),
                failed: self.index.failed_count(&d.class),
            })
            .collect()
    }
}

/// A parsed file with the edits planned for it.
#[derive(Debug)]
struct PendingFile {
    path: PathBuf,
    file: SmaliFile,
    plan: RewritePlan,
    rewritten: usize,
}

/// Per-file output of the planning phase.
struct FilePlan {
    sites: Vec<SiteOutcome>,
    pending: Option<PendingFile>,
}

/// Main deobfuscation engine.
///
/// The engine is cheap to construct and holds no state between runs except its
/// cancellation flag.
pub struct DeobfuscationEngine {
    config: EngineConfig,
    registry: DecoderRegistry,
    cancelled: Arc<AtomicBool>,
}

impl Default for DeobfuscationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DeobfuscationEngine {
    /// Creates a new engine with every built-in decoder.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, DecoderRegistry::new())
    }

    /// Creates a new engine with a custom decoder registry.
    #[must_use]
    pub fn with_registry(config: EngineConfig, registry: DecoderRegistry) -> Self {
        Self {
            config,
            registry,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The decoder registry.
    #[must_use]
    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// Shared flag that stops the run when set. Files already written stay written;
    /// no file is ever left half-written.
    #[must_use]
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Use an externally owned cancellation flag, e.g. one set from a signal handler.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn run<R: Send>(&self, op: impl FnOnce() -> Result<R> + Send) -> Result<R> {
        match self.config.threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| Error::Error(format!("failed to build thread pool: {e}")))?
                .install(op),
            None => op(),
        }
    }

    /// List input files under `root` (or `root` itself if it is a file), sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the tree cannot be walked.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if root.is_file() {
            return Ok(vec![root.to_path_buf()]);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && self.is_input(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn is_input(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.config.extensions.iter().any(|x| x == e))
    }

    /// Run the indexing phase over `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if cancelled, or [`Error::FileError`] if the tree
    /// cannot be walked. Unreadable files are reported in [`IndexedTree::failures`].
    pub fn index(&self, root: &Path) -> Result<IndexedTree> {
        self.run(|| self.index_tree(root))
    }

    fn index_tree(&self, root: &Path) -> Result<IndexedTree> {
        let files = self.discover(root)?;
        let events = EventLog::new();
        info!("Scanning {} files under {}", files.len(), root.display());

        let scanned: Vec<Result<ScanOutput>> = files
            .par_iter()
            .map(|path| {
                self.check_cancelled()?;
                let file = read_smali(path)?;
                Ok(scan(&file, path, &self.registry))
            })
            .collect();

        let mut outputs = Vec::with_capacity(scanned.len());
        let mut failures = Vec::new();
        for (path, result) in files.iter().zip(scanned) {
            match result {
                Ok(output) => outputs.push(output),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => {
                    warn!("Skipping {}: {error}", path.display());
                    events
                        .record(EventKind::FileSkipped)
                        .file(path)
                        .message(error.to_string());
                    failures.push(FileOutcome::failed(path, error));
                }
            }
        }

        let index = DescriptorIndex::link(
            outputs,
            &self.registry,
            self.config.max_fingerprint_depth,
            &events,
        );
        for table in index.tables() {
            events
                .record(EventKind::ChunkTableFound)
                .file(&table.path)
                .message(format!("{} ({} chunks)", table.field, table.chunks.len()));
        }
        info!(
            "Indexed {} decoders and {} chunk tables",
            index.descriptors().len(),
            index.tables().len()
        );

        Ok(IndexedTree {
            root: root.to_path_buf(),
            files,
            index,
            failures,
            events,
        })
    }

    /// Run the indexing and planning phases: every call site is decoded, nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// See [`DeobfuscationEngine::index`].
    pub fn analyze(&self, root: &Path) -> Result<Analysis> {
        self.run(|| self.analyze_tree(root))
    }

    fn analyze_tree(&self, root: &Path) -> Result<Analysis> {
        let started = Instant::now();
        let tree = self.index_tree(root)?;
        let IndexedTree {
            root,
            files,
            index,
            mut failures,
            events,
        } = tree;

        let skipped: HashSet<PathBuf> = failures.iter().map(|f| f.path.clone()).collect();

        let planned: Vec<(PathBuf, Result<FilePlan>)> = files
            .par_iter()
            .filter(|path| !skipped.contains(path.as_path()))
            .map(|path| (path.clone(), self.plan_file(path, &index, &events)))
            .collect();

        let mut sites = Vec::new();
        let mut pending = Vec::new();
        for (path, result) in planned {
            match result {
                Ok(plan) => {
                    sites.extend(plan.sites);
                    pending.extend(plan.pending);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => {
                    warn!("Skipping {}: {error}", path.display());
                    events
                        .record(EventKind::FileSkipped)
                        .file(&path)
                        .message(error.to_string());
                    failures.push(FileOutcome::failed(&path, error));
                }
            }
        }

        info!(
            "Located {} call sites, {} decoded",
            sites.len(),
            sites
                .iter()
                .filter(|s| s.status.plaintext().is_some())
                .count()
        );

        Ok(Analysis {
            root,
            files,
            index,
            sites,
            failures,
            events,
            pending,
            started,
        })
    }

    fn plan_file(&self, path: &Path, index: &DescriptorIndex, events: &EventLog) -> Result<FilePlan> {
        self.check_cancelled()?;
        let file = read_smali(path)?;
        let sites = locate(&file, path, index);

        let mut plan = RewritePlan::new(path);
        let mut outcomes = Vec::with_capacity(sites.len());
        let mut rewritten = 0;

        for site in &sites {
            let status = match self.decode_site(&file, site, index) {
                Ok((plaintext, edits)) if !edits.iter().any(|e| plan.overlaps(&e.span)) => {
                    plan.extend(edits);
                    index.record_success(&site.decoder);
                    rewritten += 1;
                    debug!(
                        "{}:{}: {:?}",
                        path.display(),
                        site.line,
                        plaintext.to_string_lossy()
                    );
                    events
                        .record(EventKind::StringDecoded)
                        .at(path, site.line)
                        .message(plaintext.to_string_lossy());
                    SiteStatus::Rewritten(plaintext)
                }
                Ok((_, edits)) => {
                    let span = edits.first().map_or(0..0, |e| e.span.clone());
                    self.site_failed(
                        site,
                        index,
                        events,
                        Error::InvalidRewritePlan {
                            first: span.clone(),
                            second: span,
                        },
                    )
                }
                Err(error) => self.site_failed(site, index, events, error),
            };

            outcomes.push(SiteOutcome {
                path: path.to_path_buf(),
                line: site.line,
                method: site.method.member(),
                decoder: site.target.to_string(),
                key: site.key,
                status,
            });
        }

        let declares_decoder = self.config.prune_decoders
            && index
                .descriptors()
                .iter()
                .any(|d| d.class == file.class);
        let pending = (!plan.is_empty() || declares_decoder || self.config.output_dir.is_some())
            .then(|| PendingFile {
                path: path.to_path_buf(),
                file,
                plan,
                rewritten,
            });

        Ok(FilePlan {
            sites: outcomes,
            pending,
        })
    }

    fn decode_site(
        &self,
        file: &SmaliFile,
        site: &CallSite,
        index: &DescriptorIndex,
    ) -> Result<(JavaString, Vec<Edit>)> {
        let chunks = extract(site, index)?;
        let key = site
            .key
            .ok_or(Error::UnresolvedCallSite(UnresolvedReason::NonConstantKey))?;
        let descriptor = index
            .resolve(&site.target)
            .ok_or_else(|| Error::Error(format!("decoder {} left the index", site.target)))?;

        let plaintext = match index.cached(&descriptor.class, key) {
            Some(value) => value,
            None => {
                let value = self.registry.decode(
                    descriptor.scheme,
                    &descriptor.accessor.to_string(),
                    key,
                    &chunks,
                )?;
                index.cache_value(&descriptor, key, value.clone());
                value
            }
        };

        let edits = rewrite_site(file, site, plaintext.as_slice())?;
        Ok((plaintext, edits))
    }

    fn site_failed(
        &self,
        site: &CallSite,
        index: &DescriptorIndex,
        events: &EventLog,
        error: Error,
    ) -> SiteStatus {
        index.record_failure(&site.decoder);
        let kind = match error {
            Error::UnresolvedCallSite(_) => EventKind::SiteUnresolved,
            _ => EventKind::SiteFailed,
        };
        warn!("{}:{}: {error}", site.path.display(), site.line);
        events
            .record(kind)
            .at(&site.path, site.line)
            .message(error.to_string());
        SiteStatus::from_error(error)
    }

    /// Run the full pipeline over `root` and write the results.
    ///
    /// # Errors
    ///
    /// - [`Error::StrictModeViolation`] in strict mode if any site or file was left
    ///   untouched; nothing is written in that case
    /// - [`Error::Cancelled`] if cancelled
    /// - [`Error::FileError`] if the tree cannot be walked or a result cannot be written
    pub fn process(&self, root: &Path) -> Result<DeobfuscationReport> {
        self.run(|| self.process_tree(root))
    }

    fn process_tree(&self, root: &Path) -> Result<DeobfuscationReport> {
        let analysis = self.analyze_tree(root)?;
        let descriptors = analysis.descriptor_summaries();

        let mut report = DeobfuscationReport {
            root: analysis.root.clone(),
            files_scanned: analysis.files.len(),
            descriptors,
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        let Analysis {
            index,
            sites,
            failures,
            events,
            pending,
            started,
            ..
        } = analysis;
        report.sites = sites;
        report.files = failures;

        if self.config.strict {
            if let Some(violation) = report.strict_violation() {
                return Err(violation);
            }
        }

        let removable = if !self.config.prune_decoders {
            Vec::new()
        } else if report.malformed() > 0 {
            warn!(
                "Not pruning: {} unreadable files may still call the decoders",
                report.malformed()
            );
            Vec::new()
        } else {
            index.removable_decoders()
        };

        let committed: Vec<Result<Option<FileOutcome>>> = pending
            .into_par_iter()
            .map(|pending| {
                self.check_cancelled()?;
                let PendingFile {
                    path,
                    file,
                    plan,
                    rewritten,
                } = pending;

                let (mut plan, pruned) = if removable.is_empty() {
                    (plan, Vec::new())
                } else {
                    prune(&file, &index, &removable, plan)
                };
                for member in &pruned {
                    events
                        .record(EventKind::ArtifactRemoved)
                        .file(&path)
                        .message(member.clone());
                }

                if plan.is_empty() && self.config.output_dir.is_none() {
                    return Ok(None);
                }

                let output = plan.apply(file.source())?;
                let target = self.target_path(root, &path);
                if !self.config.dry_run {
                    write_atomic(&target, &output)?;
                    events.record(EventKind::FileRewritten).file(&target);
                }

                Ok(Some(FileOutcome {
                    path,
                    written: (!self.config.dry_run).then_some(target),
                    rewritten,
                    pruned,
                    error: None,
                }))
            })
            .collect();

        for outcome in committed {
            if let Some(outcome) = outcome? {
                report.files.push(outcome);
            }
        }
        if self.config.output_dir.is_some() && !self.config.dry_run {
            for failed in report.files.iter_mut().filter(|f| f.error.is_some()) {
                failed.written = self.copy_unchanged(root, &failed.path, &events);
            }
        }
        report.files.sort_by(|a, b| a.path.cmp(&b.path));

        report.events = events;
        report.total_time = started.elapsed();
        info!("{}", report.summary());
        Ok(report)
    }

    /// Mirror a file that could not be parsed into the output directory as is.
    fn copy_unchanged(&self, root: &Path, path: &Path, events: &EventLog) -> Option<PathBuf> {
        let target = self.target_path(root, path);
        let copied = fs::read(path)
            .map_err(Error::from)
            .and_then(|contents| write_atomic(&target, &contents));
        match copied {
            Ok(()) => {
                warn!("Copied unreadable {} unchanged", path.display());
                events.record(EventKind::FileRewritten).file(&target);
                Some(target)
            }
            Err(error) => {
                warn!("Could not mirror {}: {error}", path.display());
                None
            }
        }
    }

    fn target_path(&self, root: &Path, path: &Path) -> PathBuf {
        let Some(output_dir) = &self.config.output_dir else {
            return path.to_path_buf();
        };
        let relative = if root.is_file() {
            path.file_name().map(PathBuf::from).unwrap_or_default()
        } else {
            path.strip_prefix(root).unwrap_or(path).to_path_buf()
        };
        output_dir.join(relative)
    }
}

fn read_smali(path: &Path) -> Result<SmaliFile> {
    let source = fs::read_to_string(path)?;
    SmaliFile::parse(source)
}

/// Write `contents` to `target` through a temporary file in the same directory.
fn write_atomic(target: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(contents.as_ref())?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| Error::FileError(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::smali::{caller_class, paranoid_tree, write_file};

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/Z.smali"), ".class LZ;\n").unwrap();
        fs::write(dir.path().join("A.smali"), ".class LA;\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let engine = DeobfuscationEngine::default();
        let files = engine.discover(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("A.smali"), dir.path().join("b/Z.smali")]
        );
    }

    #[test]
    fn test_process_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let keys = paranoid_tree(dir.path(), &["Hello", "World"]);
        write_file(
            dir.path(),
            "com/example/Main.smali",
            &caller_class("Lcom/example/Main;", &keys),
        );

        let engine = DeobfuscationEngine::default();
        let report = engine.process(dir.path()).unwrap();
        assert_eq!(report.rewritten(), 2);
        assert!(report.is_clean());
        assert_eq!(report.files_written(), 1);

        let main = fs::read_to_string(dir.path().join("com/example/Main.smali")).unwrap();
        assert!(main.contains("const-string v0, \"Hello\""));
        assert!(main.contains("const-string v0, \"World\""));
        assert!(!main.contains("Deobfuscator$app;->getString"));
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let keys = paranoid_tree(dir.path(), &["Hello"]);
        let source = caller_class("Lcom/example/Main;", &keys);
        let main_path = write_file(dir.path(), "com/example/Main.smali", &source);

        let engine = DeobfuscationEngine::new(EngineConfig::default().with_dry_run(true));
        let report = engine.process(dir.path()).unwrap();
        assert_eq!(report.rewritten(), 1);
        assert_eq!(report.files_written(), 0);
        assert_eq!(fs::read_to_string(&main_path).unwrap(), source);
    }

    #[test]
    fn test_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        paranoid_tree(dir.path(), &["Hello"]);
        let engine = DeobfuscationEngine::default();
        engine.cancel();
        assert!(matches!(engine.process(dir.path()), Err(Error::Cancelled)));
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        paranoid_tree(dir.path(), &["Hello"]);
        fs::write(dir.path().join("Broken.smali"), ".method static a()V\n").unwrap();

        let report = DeobfuscationEngine::default().process(dir.path()).unwrap();
        assert_eq!(report.malformed(), 1);
        assert!(!report.is_clean());

        let strict = DeobfuscationEngine::new(EngineConfig::strict());
        assert!(matches!(
            strict.process(dir.path()),
            Err(Error::StrictModeViolation { malformed: 1, .. })
        ));
    }

    #[test]
    fn test_dedicated_pool() {
        let dir = tempfile::tempdir().unwrap();
        let keys = paranoid_tree(dir.path(), &["a", "b", "c"]);
        write_file(
            dir.path(),
            "com/example/Main.smali",
            &caller_class("Lcom/example/Main;", &keys),
        );

        let engine = DeobfuscationEngine::new(EngineConfig::default().with_threads(2));
        let analysis = engine.analyze(dir.path()).unwrap();
        let decoded: Vec<String> = analysis
            .decoded()
            .map(|(_, s)| s.to_string_lossy())
            .collect();
        assert_eq!(decoded, vec!["a", "b", "c"]);
    }
}
