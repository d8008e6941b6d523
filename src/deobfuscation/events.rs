//! Event logging for a deobfuscation run.
//!
//! Every noteworthy decision the engine makes (a decoder identified, a call site
//! rewritten or skipped, a file written) is recorded as an [`Event`] in an
//! [`EventLog`]. The log is append-only and can be shared across the worker threads
//! of both phases.
//!
//! # Example
//!
//! ```rust
//! use unparanoid::deobfuscation::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::StringDecoded)
//!     .at("smali/com/example/Main.smali", 42)
//!     .message("\"hello world\"");
//! log.record(EventKind::FileRewritten).file("smali/com/example/Main.smali");
//!
//! assert_eq!(log.count_kind(EventKind::StringDecoded), 1);
//! println!("{}", log.summary());
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A call site was decoded and rewritten to a literal load.
    StringDecoded,
    /// A decoder accessor or its table was removed.
    ArtifactRemoved,
    /// A rewritten file was written.
    FileRewritten,

    /// A method was identified as a string decoder.
    DecoderIdentified,
    /// A decoder-shaped method was found but cannot be used.
    DecoderPartial,
    /// A literal chunk table was found.
    ChunkTableFound,

    /// A call site was left untouched because its arguments are not constant.
    SiteUnresolved,
    /// Decoding or patching a call site failed.
    SiteFailed,
    /// A file could not be read or parsed.
    FileSkipped,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::StringDecoded => "string decoded",
            Self::ArtifactRemoved => "artifact removed",
            Self::FileRewritten => "file rewritten",
            // Analysis
            Self::DecoderIdentified => "decoder identified",
            Self::DecoderPartial => "partial decoder",
            Self::ChunkTableFound => "chunk table found",
            // Skips
            Self::SiteUnresolved => "call site unresolved",
            Self::SiteFailed => "call site failed",
            Self::FileSkipped => "file skipped",
        }
    }

    /// Returns true if this event represents a change to the output.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::StringDecoded | Self::ArtifactRemoved | Self::FileRewritten
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The file the event concerns (if applicable).
    pub file: Option<PathBuf>,
    /// 1-based line within the file.
    pub line: Option<usize>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{line}: ", file.display())?,
            (Some(file), None) => write!(f, "{}: ", file.display())?,
            _ => {}
        }
        f.write_str(&self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the builder
/// is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    file: Option<PathBuf>,
    line: Option<usize>,
    message: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            file: None,
            line: None,
            message: None,
        }
    }

    /// Sets the file and line where the event occurred.
    pub fn at(mut self, file: impl AsRef<Path>, line: usize) -> Self {
        self.file = Some(file.as_ref().to_path_buf());
        self.line = Some(line);
        self
    }

    /// Sets only the file (for file-level events).
    pub fn file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = Some(file.as_ref().to_path_buf());
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            file: self.file.take(),
            line: self.line.take(),
            message,
        });
    }
}

/// Collection of events from a run.
///
/// This type is thread-safe: events can be appended concurrently from multiple
/// threads using shared references (`&self`).
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Generates a human-readable summary of all transformation events.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut counts: BTreeMap<EventKind, usize> = BTreeMap::new();
        for event in self.iter().filter(|e| e.kind.is_transformation()) {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return format!("{} events", self.len());
        }

        counts
            .iter()
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let log = EventLog::new();
        assert!(log.is_empty());

        log.record(EventKind::StringDecoded)
            .at("a.smali", 3)
            .message("\"x\"");
        log.record(EventKind::StringDecoded).file("b.smali");
        log.record(EventKind::SiteFailed).at("a.smali", 9);

        assert_eq!(log.len(), 3);
        assert_eq!(log.count_kind(EventKind::StringDecoded), 2);
        assert_eq!(log.count_kind(EventKind::FileSkipped), 0);
        assert_eq!(
            log.iter()
                .filter(|e| e.file.as_deref() == Some(Path::new("a.smali")))
                .count(),
            2
        );
    }

    #[test]
    fn test_default_message() {
        let log = EventLog::new();
        log.record(EventKind::FileSkipped);
        assert_eq!(log.iter().next().unwrap().message, "file skipped");
    }

    #[test]
    fn test_display() {
        let log = EventLog::new();
        log.record(EventKind::SiteUnresolved)
            .at("a.smali", 7)
            .message("non-constant key");
        assert_eq!(
            log.iter().next().unwrap().to_string(),
            "[call site unresolved] a.smali:7: non-constant key"
        );
    }

    #[test]
    fn test_summary() {
        let log = EventLog::new();
        assert_eq!(log.summary(), "no events");
        log.record(EventKind::DecoderIdentified);
        assert_eq!(log.summary(), "1 events");
        log.record(EventKind::StringDecoded);
        log.record(EventKind::StringDecoded);
        log.record(EventKind::FileRewritten);
        assert_eq!(log.summary(), "2 string decoded, 1 file rewritten");
    }

    #[test]
    fn test_concurrent_recording() {
        use rayon::prelude::*;

        let log = EventLog::new();
        (0..64).into_par_iter().for_each(|i| {
            log.record(EventKind::StringDecoded).at("a.smali", i);
        });
        assert_eq!(log.count_kind(EventKind::StringDecoded), 64);
    }
}
