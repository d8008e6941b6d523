//! Global descriptor index built in phase 1.
//!
//! The index is the only state shared between files. It is assembled from the
//! per-file [`ScanOutput`]s, linked once (fingerprints resolved across files, one
//! descriptor per class), and from then on only read, except for the decode cache and
//! the per-descriptor success and failure counters that the pruner consults.
//!
//! ```text
//!  ScanOutput* ──► link ──► DescriptorIndex
//!                             ├─ decoders : ClassId  → DecoderDescriptor
//!                             ├─ tables   : FieldRef → ChunkTable
//!                             ├─ readers  : FieldRef → methods loading it
//!                             ├─ cache    : (ClassId, key) → plaintext
//!                             └─ outcomes : ClassId  → (decoded, failed)
//! ```

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    path::PathBuf,
    sync::Arc,
};

use dashmap::{DashMap, DashSet};
use log::{debug, warn};
use strum::Display;

use crate::{
    deobfuscation::{
        events::{EventKind, EventLog},
        scanner::{is_helper_shaped, DecoderCandidate, MethodSummary, ScanOutput},
        scheme::{DecoderRegistry, SchemeVersion},
    },
    smali::{ClassId, FieldRef, JavaString, MethodRef},
};

/// How a decoder receives its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CallConvention {
    /// `(J)Ljava/lang/String;`, chunks come from the decoder's own table
    #[strum(to_string = "key-only")]
    KeyOnly,
    /// `(J[Ljava/lang/String;)Ljava/lang/String;`, chunks are passed by the caller
    #[strum(to_string = "key+chunks")]
    KeyAndChunks,
}

/// A static `String[]` field populated with literals by its class initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTable {
    /// The field
    pub field: FieldRef,
    /// Literal entries, in index order
    pub chunks: Vec<JavaString>,
    /// File declaring the field
    pub path: PathBuf,
    /// `<clinit>` does nothing except build chunk tables
    pub prunable_initializer: bool,
}

/// Usability of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DescriptorStatus {
    /// Call sites can be decoded
    #[strum(to_string = "ready")]
    Ready,
    /// Key-only accessor whose table could not be resolved to literals
    #[strum(to_string = "missing chunk table")]
    MissingChunkTable,
    /// No registered scheme matches the decoder code
    #[strum(to_string = "unsupported scheme")]
    UnsupportedScheme,
}

/// A recognised decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderDescriptor {
    /// Declaring class
    pub class: ClassId,
    /// The method call sites invoke
    pub accessor: MethodRef,
    /// Argument convention
    pub convention: CallConvention,
    /// Chunk table of a key-only accessor
    pub table: Option<FieldRef>,
    /// Detected scheme
    pub scheme: Option<SchemeVersion>,
    /// File declaring the accessor
    pub path: PathBuf,
}

impl DecoderDescriptor {
    /// Whether call sites of this descriptor can be decoded.
    #[must_use]
    pub fn status(&self) -> DescriptorStatus {
        if self.scheme.is_none() {
            DescriptorStatus::UnsupportedScheme
        } else if self.convention == CallConvention::KeyOnly && self.table.is_none() {
            DescriptorStatus::MissingChunkTable
        } else {
            DescriptorStatus::Ready
        }
    }
}

impl fmt::Display for DecoderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.accessor, self.convention)?;
        match self.scheme {
            Some(scheme) => write!(f, " {scheme}"),
            None => write!(f, " unknown scheme"),
        }
    }
}

/// Shared index of decoders and chunk tables.
#[derive(Debug, Default)]
pub struct DescriptorIndex {
    decoders: DashMap<ClassId, Arc<DecoderDescriptor>>,
    tables: DashMap<FieldRef, Arc<ChunkTable>>,
    readers: DashMap<FieldRef, Vec<MethodRef>>,
    decoder_methods: DashSet<MethodRef>,
    cache: DashMap<(ClassId, i64), JavaString>,
    decoded: DashMap<ClassId, usize>,
    failed: DashMap<ClassId, usize>,
}

impl DescriptorIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Link per-file scan outputs into an index.
    ///
    /// Candidates are matched against `registry` through the fingerprint constants of
    /// their static call closure (up to `max_depth` calls deep). Key-only accessors that
    /// match no scheme are kept only if they delegate to a helper-shaped method; helpers
    /// that match no scheme are dropped.
    #[must_use]
    pub fn link(
        outputs: Vec<ScanOutput>,
        registry: &DecoderRegistry,
        max_depth: usize,
        events: &EventLog,
    ) -> Self {
        let index = Self::new();
        let mut summaries: HashMap<MethodRef, MethodSummary> = HashMap::new();
        let mut candidates: Vec<DecoderCandidate> = Vec::new();

        for output in outputs {
            for table in output.tables {
                index.insert_table(table);
            }
            for (field, method) in output.table_reads {
                index.record_read(field, method);
            }
            summaries.extend(output.summaries);
            candidates.extend(output.candidates);
        }

        candidates.sort_by(|a, b| a.method.cmp(&b.method));

        for candidate in candidates {
            let constants = closure_constants(&candidate.method, &summaries, max_depth);
            let scheme = registry.detect(&constants);

            let descriptor = match candidate.convention {
                CallConvention::KeyAndChunks => {
                    if scheme.is_none() {
                        continue;
                    }
                    DecoderDescriptor {
                        class: candidate.method.class.clone(),
                        accessor: candidate.method,
                        convention: CallConvention::KeyAndChunks,
                        table: None,
                        scheme,
                        path: candidate.path,
                    }
                }
                CallConvention::KeyOnly => {
                    let delegates = summaries
                        .get(&candidate.method)
                        .is_some_and(|s| s.static_calls.iter().any(is_helper_shaped));
                    if scheme.is_none() && !delegates {
                        continue;
                    }
                    let table = match candidate.tables_read.as_slice() {
                        [field] if index.tables.contains_key(field) => Some(field.clone()),
                        _ => None,
                    };
                    DecoderDescriptor {
                        class: candidate.method.class.clone(),
                        accessor: candidate.method,
                        convention: CallConvention::KeyOnly,
                        table,
                        scheme,
                        path: candidate.path,
                    }
                }
            };

            index.register(descriptor, events);
        }

        index
    }

    /// Register a descriptor. A class keeps at most one; key-only accessors win over
    /// helpers, otherwise the first registration stays.
    pub fn register(&self, descriptor: DecoderDescriptor, events: &EventLog) {
        self.decoder_methods.insert(descriptor.accessor.clone());

        if let Some(existing) = self.decoders.get(&descriptor.class) {
            let replace = existing.convention == CallConvention::KeyAndChunks
                && descriptor.convention == CallConvention::KeyOnly;
            if !replace {
                debug!(
                    "Ignoring second decoder {} in {}",
                    descriptor.accessor, descriptor.class
                );
                return;
            }
        }

        match descriptor.status() {
            DescriptorStatus::Ready => {
                debug!("Decoder identified: {descriptor}");
                events
                    .record(EventKind::DecoderIdentified)
                    .file(descriptor.path.clone())
                    .message(descriptor.to_string());
            }
            status => {
                warn!("Decoder {} is unusable: {status}", descriptor.accessor);
                events
                    .record(EventKind::DecoderPartial)
                    .file(descriptor.path.clone())
                    .message(format!("{}: {status}", descriptor.accessor));
            }
        }

        self.decoders
            .insert(descriptor.class.clone(), Arc::new(descriptor));
    }

    /// Add a chunk table.
    pub fn insert_table(&self, table: ChunkTable) {
        self.tables.insert(table.field.clone(), Arc::new(table));
    }

    /// Note that `method` loads the static `String[]` field `field`.
    pub fn record_read(&self, field: FieldRef, method: MethodRef) {
        let mut readers = self.readers.entry(field).or_default();
        if !readers.contains(&method) {
            readers.push(method);
        }
    }

    /// Methods outside the declaring initializer that load `field`.
    #[must_use]
    pub fn table_readers(&self, field: &FieldRef) -> Vec<MethodRef> {
        self.readers
            .get(field)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// The descriptor whose accessor is exactly `target`.
    #[must_use]
    pub fn resolve(&self, target: &MethodRef) -> Option<Arc<DecoderDescriptor>> {
        let descriptor = self.decoders.get(&target.class)?;
        (descriptor.accessor == *target).then(|| Arc::clone(&descriptor))
    }

    /// Look up a chunk table.
    #[must_use]
    pub fn table(&self, field: &FieldRef) -> Option<Arc<ChunkTable>> {
        self.tables.get(field).map(|t| Arc::clone(&t))
    }

    /// Returns `true` if `method` is a decoder entry point (call sites inside it are
    /// part of the decoder, not of the application).
    #[must_use]
    pub fn is_decoder_method(&self, method: &MethodRef) -> bool {
        self.decoder_methods.contains(method)
    }

    /// All descriptors, ordered by class.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Arc<DecoderDescriptor>> {
        let mut all: Vec<_> = self.decoders.iter().map(|d| Arc::clone(d.value())).collect();
        all.sort_by(|a, b| a.class.cmp(&b.class));
        all
    }

    /// All chunk tables, ordered by field.
    #[must_use]
    pub fn tables(&self) -> Vec<Arc<ChunkTable>> {
        let mut all: Vec<_> = self.tables.iter().map(|t| Arc::clone(t.value())).collect();
        all.sort_by(|a, b| a.field.cmp(&b.field));
        all
    }

    /// Returns `true` if no decoder was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Look up a previously decoded key.
    #[must_use]
    pub fn cached(&self, class: &ClassId, key: i64) -> Option<JavaString> {
        self.cache.get(&(class.clone(), key)).map(|v| v.clone())
    }

    /// Remember a decoded key. Only key-only decoders are cached; their chunks are
    /// fixed per descriptor.
    pub fn cache_value(&self, descriptor: &DecoderDescriptor, key: i64, value: JavaString) {
        if descriptor.convention == CallConvention::KeyOnly {
            self.cache.insert((descriptor.class.clone(), key), value);
        }
    }

    /// Count a rewritten call site.
    pub fn record_success(&self, class: &ClassId) {
        *self.decoded.entry(class.clone()).or_insert(0) += 1;
    }

    /// Count a call site that was left untouched.
    pub fn record_failure(&self, class: &ClassId) {
        *self.failed.entry(class.clone()).or_insert(0) += 1;
    }

    /// Number of rewritten call sites of a decoder.
    #[must_use]
    pub fn decoded_count(&self, class: &ClassId) -> usize {
        self.decoded.get(class).map_or(0, |c| *c)
    }

    /// Number of untouched call sites of a decoder.
    #[must_use]
    pub fn failed_count(&self, class: &ClassId) -> usize {
        self.failed.get(class).map_or(0, |c| *c)
    }

    /// Key-only decoders whose every call site was rewritten.
    #[must_use]
    pub fn removable_decoders(&self) -> Vec<Arc<DecoderDescriptor>> {
        self.descriptors()
            .into_iter()
            .filter(|d| {
                d.convention == CallConvention::KeyOnly
                    && d.status() == DescriptorStatus::Ready
                    && self.decoded_count(&d.class) > 0
                    && self.failed_count(&d.class) == 0
            })
            .collect()
    }
}

/// Union of fingerprint constants over `start` and its static callees.
fn closure_constants(
    start: &MethodRef,
    summaries: &HashMap<MethodRef, MethodSummary>,
    max_depth: usize,
) -> HashSet<u64> {
    let mut constants = HashSet::new();
    let mut seen: HashSet<&MethodRef> = HashSet::new();
    let mut queue: VecDeque<(&MethodRef, usize)> = VecDeque::new();
    queue.push_back((start, 0));

    while let Some((method, depth)) = queue.pop_front() {
        if !seen.insert(method) {
            continue;
        }
        let Some(summary) = summaries.get(method) else {
            continue;
        };
        constants.extend(summary.constants.iter().copied());
        if depth < max_depth {
            for callee in &summary.static_calls {
                queue.push_back((callee, depth + 1));
            }
        }
    }

    constants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        deobfuscation::scanner::scan,
        smali::SmaliFile,
        test::smali::{accessor_class, helper_class, random_helper_class},
    };
    use std::path::Path;

    const ACCESSOR: &str = "Lio/michaelrocks/paranoid/Deobfuscator$app;";

    fn scan_all(sources: &[String]) -> Vec<ScanOutput> {
        let registry = DecoderRegistry::new();
        sources
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let file = SmaliFile::parse(s.as_str()).unwrap();
                scan(&file, Path::new(&format!("{i}.smali")), &registry)
            })
            .collect()
    }

    fn accessor_ref() -> MethodRef {
        MethodRef::parse(&format!("{ACCESSOR}->getString(J)Ljava/lang/String;")).unwrap()
    }

    #[test]
    fn test_link_full_runtime() {
        let chunks = vec![JavaString::from_str("abc")];
        let outputs = scan_all(&[
            accessor_class(ACCESSOR, "chunks", &chunks),
            helper_class(),
            random_helper_class(),
        ]);
        let events = EventLog::new();
        let index = DescriptorIndex::link(outputs, &DecoderRegistry::new(), 4, &events);

        let descriptor = index.resolve(&accessor_ref()).unwrap();
        assert_eq!(descriptor.convention, CallConvention::KeyOnly);
        assert_eq!(descriptor.scheme, Some(SchemeVersion::V1));
        assert_eq!(descriptor.status(), DescriptorStatus::Ready);
        assert_eq!(
            index.table(descriptor.table.as_ref().unwrap()).unwrap().chunks,
            chunks
        );
        assert!(index.is_decoder_method(&accessor_ref()));
        assert_eq!(index.descriptors().len(), 2);
        assert_eq!(events.count_kind(EventKind::DecoderIdentified), 2);
    }

    #[test]
    fn test_link_without_fingerprint() {
        let chunks = vec![JavaString::from_str("abc")];
        let outputs = scan_all(&[accessor_class(ACCESSOR, "chunks", &chunks), helper_class()]);
        let events = EventLog::new();
        let index = DescriptorIndex::link(outputs, &DecoderRegistry::new(), 4, &events);

        let descriptor = index.resolve(&accessor_ref()).unwrap();
        assert_eq!(descriptor.status(), DescriptorStatus::UnsupportedScheme);
        assert_eq!(index.descriptors().len(), 1);
        assert_eq!(events.count_kind(EventKind::DecoderPartial), 1);
    }

    #[test]
    fn test_depth_limit() {
        let chunks = vec![JavaString::from_str("abc")];
        let outputs = scan_all(&[
            accessor_class(ACCESSOR, "chunks", &chunks),
            helper_class(),
            random_helper_class(),
        ]);
        let index = DescriptorIndex::link(outputs, &DecoderRegistry::new(), 1, &EventLog::new());
        assert_eq!(
            index.resolve(&accessor_ref()).unwrap().status(),
            DescriptorStatus::UnsupportedScheme
        );
    }

    #[test]
    fn test_counters_and_removal() {
        let chunks = vec![JavaString::from_str("abc")];
        let outputs = scan_all(&[
            accessor_class(ACCESSOR, "chunks", &chunks),
            helper_class(),
            random_helper_class(),
        ]);
        let index = DescriptorIndex::link(outputs, &DecoderRegistry::new(), 4, &EventLog::new());
        let class = ClassId::parse(ACCESSOR).unwrap();

        assert!(index.removable_decoders().is_empty());
        index.record_success(&class);
        assert_eq!(index.removable_decoders().len(), 1);
        index.record_failure(&class);
        assert!(index.removable_decoders().is_empty());
    }

    #[test]
    fn test_resolve_requires_exact_signature() {
        let chunks = vec![JavaString::from_str("abc")];
        let outputs = scan_all(&[
            accessor_class(ACCESSOR, "chunks", &chunks),
            helper_class(),
            random_helper_class(),
        ]);
        let index = DescriptorIndex::link(outputs, &DecoderRegistry::new(), 4, &EventLog::new());
        let other = MethodRef::parse(&format!("{ACCESSOR}->other(J)Ljava/lang/String;")).unwrap();
        assert!(index.resolve(&other).is_none());
    }
}
