//! Cross-hop trace capture and reconstruction.
//!
//! Every call-frame takes a [`Snapshot`] when it is created, and every
//! [`Error`] takes one where it is raised. When a deferred value rejects, the
//! tracer stitches the error's own snapshot together with the snapshots of
//! every frame between the rejecting frame and the root, innermost first:
//!
//! ```text
//!     at raised (src/math.rs:12:20)
//! *** tasync ***
//!     at app::divide (src/app.rs:40:9)
//! *** tasync ***
//!     at app::curry (src/app.rs:51:5)
//! ```
//!
//! Framework frames never enter a snapshot: records are taken at the public
//! API boundary through `#[track_caller]`. With the `native-stack-traces`
//! feature, a native backtrace is captured as well and sliced by frame
//! identity between the capture function and [`boundary`].
//!
//! Capturing is the dominant cost of the whole design, so it can be switched
//! off process-wide with [`set_trace_enabled`].

#[cfg(feature = "native-stack-traces")]
mod native;

use std::borrow::Cow;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::TraceConfig;
use crate::error::Error;
use crate::frame::Frame;

/// Separator line written between hop sections.
pub const DEFAULT_SEPARATOR: &str = "*** tasync ***";

static ENABLED: AtomicBool = AtomicBool::new(true);

struct Settings {
    max_hops: Option<usize>,
    native: bool,
    separator: Cow<'static, str>,
}

static SETTINGS: RwLock<Settings> = parking_lot::const_rwlock(Settings {
    max_hops: None,
    native: false,
    separator: Cow::Borrowed(DEFAULT_SEPARATOR),
});

/// Enables or disables snapshot capture for the whole process.
///
/// Values created while capture is off carry no snapshot, and errors rejected
/// while it is off carry no trace.
pub fn set_trace_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Returns true if snapshot capture is enabled.
#[must_use]
pub fn trace_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub(crate) fn apply(config: &TraceConfig) {
    set_trace_enabled(config.enabled);
    let mut settings = SETTINGS.write();
    settings.max_hops = config.max_hops;
    settings.native = config.native_backtraces;
    settings.separator = Cow::Owned(config.separator.clone());
}

/// Runs `body` behind the dispatch boundary and returns its value.
pub(crate) fn boundary<R>(body: impl FnOnce() -> R) -> R {
    let mut body = Some(body);
    loop {
        let mut output = None;
        dispatch(&mut || output = body.take().map(|body| body()));
        if let Some(output) = output {
            return output;
        }
    }
}

/// Native backtraces are cut at this function: everything below it belongs to
/// the framework (or the event loop) that resumed the call.
#[inline(never)]
fn dispatch(body: &mut dyn FnMut()) {
    body();
}

/// One source position recorded in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    label: &'static str,
    location: &'static Location<'static>,
}

impl Record {
    /// Returns the label (the invoked function's type name, or a role such as
    /// `raised` or `delay`).
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Returns the recorded source location.
    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// A trace snapshot taken when a frame or an error is created.
#[derive(Clone)]
pub struct Snapshot {
    records: SmallVec<[Record; 1]>,
    #[cfg(feature = "native-stack-traces")]
    native: Option<native::NativeTrace>,
}

impl Snapshot {
    /// Captures a snapshot, or returns `None` while capture is disabled.
    pub(crate) fn capture(label: &'static str, location: &'static Location<'static>) -> Option<Self> {
        if !trace_enabled() {
            return None;
        }
        let mut records = SmallVec::new();
        records.push(Record { label, location });
        Some(Self {
            records,
            #[cfg(feature = "native-stack-traces")]
            native: SETTINGS.read().native.then(native::capture),
        })
    }

    /// Returns the recorded positions.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn lines(&self) -> Vec<Line> {
        #[allow(unused_mut)]
        let mut lines: Vec<Line> = self.records.iter().map(Line::from).collect();
        #[cfg(feature = "native-stack-traces")]
        if let Some(native) = &self.native {
            lines.extend(native.lines());
        }
        lines
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

/// One rendered line of a reconstructed trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// Function or role label.
    pub label: String,
    /// Source file, when known.
    pub file: Option<String>,
    /// Source line, when known.
    pub line: Option<u32>,
    /// Source column, when known.
    pub column: Option<u32>,
}

impl From<&Record> for Line {
    fn from(record: &Record) -> Self {
        Self {
            label: record.label.to_string(),
            file: Some(record.location.file().to_string()),
            line: Some(record.location.line()),
            column: Some(record.location.column()),
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "    at {}", self.label)?;
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(column)) => write!(f, " ({file}:{line}:{column})"),
            (Some(file), Some(line), None) => write!(f, " ({file}:{line})"),
            (Some(file), None, _) => write!(f, " ({file})"),
            _ => Ok(()),
        }
    }
}

/// Where a trace section came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// The error's own snapshot.
    Origin,
    /// One asynchronous hop: the snapshot of a call-frame.
    Hop,
}

/// A contiguous block of lines in a reconstructed trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Origin or hop.
    pub kind: SectionKind,
    /// Path of the frame (empty for the origin section).
    pub path: Vec<u64>,
    /// Rendered lines.
    pub lines: Vec<Line>,
}

/// A trace reconstructed across every hop a failure propagated through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    message: String,
    sections: Vec<Section>,
    omitted_hops: usize,
    separator: String,
}

impl Trace {
    /// Builds the trace for `error` rejecting under `frame`.
    pub(crate) fn reconstruct(error: &Error, frame: &Frame) -> Self {
        let settings = SETTINGS.read();
        let mut sections = Vec::new();
        sections.push(Section {
            kind: SectionKind::Origin,
            path: Vec::new(),
            lines: error.origin().map(Snapshot::lines).unwrap_or_default(),
        });

        let mut hops = 0;
        let mut omitted_hops = 0;
        for hop in frame.ancestors() {
            if settings.max_hops.is_some_and(|max| hops >= max) {
                omitted_hops += 1;
                continue;
            }
            hops += 1;
            sections.push(Section {
                kind: SectionKind::Hop,
                path: hop.path(),
                lines: hop.snapshot().map(Snapshot::lines).unwrap_or_default(),
            });
        }

        Self {
            message: error.message().to_string(),
            sections,
            omitted_hops,
            separator: settings.separator.to_string(),
        }
    }

    /// Returns the message of the error the trace was built for.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the sections, origin first, then hops innermost first.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Returns the number of hop sections.
    #[must_use]
    pub fn hops(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.kind == SectionKind::Hop)
            .count()
    }

    /// Returns the number of hops dropped by the `max_hops` setting.
    #[must_use]
    pub fn omitted_hops(&self) -> usize {
        self.omitted_hops
    }

    /// Returns true if any line carries `label`.
    #[must_use]
    pub fn mentions(&self, label: &str) -> bool {
        self.sections
            .iter()
            .flat_map(|s| &s.lines)
            .any(|line| line.label.contains(label))
    }

    /// Serializes the trace as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            if section.kind == SectionKind::Hop {
                writeln!(f, "{}", self.separator)?;
            }
            for line in &section.lines {
                writeln!(f, "{line}")?;
            }
        }
        if self.omitted_hops > 0 {
            writeln!(f, "{}", self.separator)?;
            writeln!(f, "    ... {} more hops", self.omitted_hops)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::TraceConfig;
    use parking_lot::Mutex;

    /// Serializes tests that flip process-wide trace settings.
    pub(crate) static SETTINGS_LOCK: Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn snapshot_records_caller() {
        let _lock = SETTINGS_LOCK.lock();
        set_trace_enabled(true);
        let snapshot = Snapshot::capture("sample", Location::caller()).expect("enabled");
        assert_eq!(snapshot.records().len(), 1);
        assert_eq!(snapshot.records()[0].label(), "sample");
        assert!(snapshot.records()[0].location().file().ends_with(".rs"));
    }

    #[test]
    fn disabled_capture_yields_nothing() {
        let _lock = SETTINGS_LOCK.lock();
        set_trace_enabled(false);
        assert!(Snapshot::capture("sample", Location::caller()).is_none());
        set_trace_enabled(true);
    }

    #[test]
    fn line_display_variants() {
        let full = Line {
            label: "app::divide".into(),
            file: Some("src/app.rs".into()),
            line: Some(4),
            column: Some(9),
        };
        assert_eq!(full.to_string(), "    at app::divide (src/app.rs:4:9)");

        let bare = Line {
            label: "main".into(),
            file: None,
            line: None,
            column: None,
        };
        assert_eq!(bare.to_string(), "    at main");
    }

    #[test]
    fn reconstruct_walks_frames_innermost_first() {
        let _lock = SETTINGS_LOCK.lock();
        set_trace_enabled(true);
        let outer = Frame::current().child("outer", Location::caller());
        let _entered = outer.enter();
        let inner = Frame::current().child("inner", Location::caller());

        let err = Error::user("nope");
        let trace = Trace::reconstruct(&err, &inner);
        assert_eq!(trace.message(), "nope");
        assert_eq!(trace.hops(), 2);
        assert_eq!(trace.sections()[0].kind, SectionKind::Origin);
        assert_eq!(trace.sections()[1].lines[0].label, "inner");
        assert_eq!(trace.sections()[2].lines[0].label, "outer");

        let text = trace.to_string();
        assert_eq!(text.matches(DEFAULT_SEPARATOR).count(), 2);
        let inner_at = text.find("at inner").expect("inner line");
        let outer_at = text.find("at outer").expect("outer line");
        assert!(inner_at < outer_at);
    }

    #[test]
    fn max_hops_summarizes_the_rest() {
        let _lock = SETTINGS_LOCK.lock();
        apply(&TraceConfig {
            max_hops: Some(1),
            ..TraceConfig::default()
        });
        let a = Frame::current().child("a", Location::caller());
        let _entered = a.enter();
        let b = Frame::current().child("b", Location::caller());

        let trace = Trace::reconstruct(&Error::user("x"), &b);
        apply(&TraceConfig::default());

        assert_eq!(trace.hops(), 1);
        assert_eq!(trace.omitted_hops(), 1);
        assert!(trace.to_string().contains("... 1 more hops"));
    }

    #[test]
    fn trace_serializes_to_json() {
        let _lock = SETTINGS_LOCK.lock();
        set_trace_enabled(true);
        let frame = Frame::current().child("json_sample", Location::caller());
        let trace = Trace::reconstruct(&Error::user("json"), &frame);
        let json = trace.to_json().expect("serialize");
        assert!(json.contains("\"kind\": \"hop\""));
        assert!(json.contains("json_sample"));
        let back: Trace = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, trace);
    }
}
